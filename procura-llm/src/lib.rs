//! HTTP adapters for the capabilities the procurement workflow consumes.

mod analytics;
mod chat;
mod http;
mod lookup;

pub use analytics::{HttpAnalyticsQuery, HttpAnalyticsQueryBuilder};
pub use chat::{ChatCompletionClient, ChatCompletionClientBuilder};
pub use lookup::{HttpHierarchyLookup, HttpHierarchyLookupBuilder};
