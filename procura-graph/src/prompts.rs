//! Instruction templates sent to the extraction capability, plus the
//! catalogue of user-visible log lines the steps append to the conversation.

use procura_core::{render_transcript, Message};
use regex::{Captures, Regex};

use crate::{StepName, WorkflowState};

pub const MATERIAL_LEVELS: [&str; 5] = [
    "category",
    "sub_category",
    "product_line",
    "sku_group",
    "material_name",
];

pub const LOCATION_LEVELS: [&str; 3] = ["region_name", "cluster_name", "country_name"];

#[derive(Clone, Debug, Default)]
pub struct PromptSet;

impl PromptSet {
    pub fn material_extraction(&self, user_prompt: &str) -> String {
        format!(
            "You assist with procurement data for a consumer goods company.\n\
             Materials are tagged on five hierarchy levels: {levels}.\n\
             Typical materials: tea, coffee, fruits and vegetables, packaging (plastic film roll, PET bottle, corrugated box), dairy, sauces.\n\n\
             Read the user prompt and:\n\
             1. Extract the material being referred to.\n\
             2. Extract the hierarchy level only if the prompt states it explicitly (\"at the sku group level\", \"by category\").\n\
             3. Never guess a level and never default to material_name.\n\
             4. Phrases such as \"group by\" or \"filter by\" do not count as stating a level.\n\
             5. When no level is stated, answer None.\n\n\
             Answer with exactly these two lines and nothing else:\n\
             Material: <material or None>\n\
             Hierarchy: <one of {levels}, or None>\n\n\
             Prompt:\n\"{user_prompt}\"",
            levels = MATERIAL_LEVELS.join(", "),
        )
    }

    pub fn location_extraction(&self, user_prompt: &str) -> String {
        format!(
            "You assist with procurement data for a consumer goods company.\n\
             Locations follow a three level hierarchy: {levels}.\n\n\
             Extract:\n\
             1. The location named in the prompt (\"India\", \"EMEA\", \"APAC\", \"Northern Europe\").\n\
             2. The hierarchy level only if it is stated explicitly (\"at the country level\", \"for the region\", \"by cluster\").\n\
             Do not infer the level from the location itself.\n\n\
             Answer with exactly these two lines:\n\
             location: <location or None>\n\
             hierarchy: <one of {levels}, or None>\n\n\
             User prompt:\n\"{user_prompt}\"",
            levels = LOCATION_LEVELS.join(", "),
        )
    }

    pub fn summary(&self, messages: &[Message]) -> String {
        format!(
            "You are a procurement insights assistant. Summarize the analytics answer below for a business user.\n\n\
             Conversation:\n{transcript}\n\n\
             Rules:\n\
             - Focus on the analytics answer.\n\
             - Keep every figure exactly as returned. Do not round, rescale or use scientific notation.\n\
             - Spend amounts are in euros (EUR). Never convert them to another currency or unit.\n\
             - Use short paragraphs, bullet points or a table as fits the data.\n\
             - If no data, null values or an error came back, say that no meaningful data was returned, \
             point to earlier messages (for example an unknown material) and suggest rephrasing the question.\n\
             - Do not mention internal step or agent names.\n\
             - You may offer further breakdowns, for example by region or supplier.",
            transcript = render_transcript(messages),
        )
    }

    pub fn supervisor(&self, state: &WorkflowState) -> String {
        let completed = state
            .completed_steps()
            .iter()
            .map(StepName::as_str)
            .collect::<Vec<_>>()
            .join(", ");
        let order = StepName::ORDER
            .iter()
            .map(StepName::as_str)
            .collect::<Vec<_>>();
        format!(
            "You coordinate a multi-step workflow that answers procurement questions.\n\n\
             Request: {request}\n\
             Material: {material:?} (hierarchy: {material_hierarchy:?})\n\
             Location: {location:?} (hierarchy: {location_hierarchy:?})\n\
             Steps already completed: [{completed}]\n\
             Messages so far:\n{transcript}\n\n\
             Choose the next step. Rules:\n\
             1. Each step runs once per request; never choose a completed step.\n\
             2. Follow this order: {ordered}.\n\
             3. When every other step is done, choose {last}.\n\n\
             Answer with exactly one of: {choices}\n\n\
             Next step:",
            request = state.original_prompt,
            material = state.material,
            material_hierarchy = state.material_hierarchy,
            location = state.location,
            location_hierarchy = state.location_hierarchy,
            transcript = render_transcript(&state.messages),
            ordered = order.join(" -> "),
            last = StepName::Summarizer.as_str(),
            choices = order.join(", "),
        )
    }
}

/// User-visible log lines. Placeholders are `{kind}`, `{item}`,
/// `{hierarchy}` and `{error}`.
#[derive(Clone, Debug)]
pub struct SystemMessages {
    pub extraction_success: String,
    pub hierarchy_resolved: String,
    pub ambiguous_hierarchy: String,
    pub unidentified_hierarchy: String,
    pub hierarchy_confirmed: String,
    pub hierarchy_skipped: String,
    pub nothing_found: String,
    pub extraction_unavailable: String,
    pub missing_query: String,
    pub empty_query: String,
    pub short_query: String,
    pub analytics_error: String,
    pub analytics_empty: String,
    pub no_data_summary: String,
}

impl Default for SystemMessages {
    fn default() -> Self {
        Self {
            extraction_success: "Extracted {kind}: '{item}' and hierarchy: '{hierarchy}'.".into(),
            hierarchy_resolved: "Resolved hierarchy from lookup: '{hierarchy}'.".into(),
            ambiguous_hierarchy:
                "'{item}' appears in multiple {kind} hierarchies. Please confirm the {kind} hierarchy level."
                    .into(),
            unidentified_hierarchy:
                "No {kind} hierarchy could be identified for '{item}'. Please confirm the {kind} hierarchy level."
                    .into(),
            hierarchy_confirmed: "Confirmed hierarchy is '{hierarchy}' for the {kind} '{item}'.".into(),
            hierarchy_skipped: "User skipped {kind} hierarchy confirmation.".into(),
            nothing_found: "No {kind} or hierarchy found.".into(),
            extraction_unavailable: "LLM unavailable for extraction.".into(),
            missing_query: "Error: Missing combined_prompt for the analytics query.".into(),
            empty_query: "Error: Empty combined_prompt for the analytics query.".into(),
            short_query: "Error: Combined prompt too short for meaningful analysis.".into(),
            analytics_error: "Error processing the analytics response: {error}".into(),
            analytics_empty: "The analytics query returned an empty or invalid response.".into(),
            no_data_summary:
                "No meaningful data was returned for this request. Please refine or rephrase your question."
                    .into(),
        }
    }
}

impl SystemMessages {
    /// Fills `{name}` placeholders in `template` in a single pass, so
    /// substituted values are never expanded again. Unknown names are kept.
    pub fn render(template: &str, values: &[(&str, &str)]) -> String {
        let pattern = match Regex::new(r"\{(\w+)\}") {
            Ok(pattern) => pattern,
            Err(error) => {
                tracing::warn!(error = %error, "placeholder pattern failed to compile");
                return template.to_string();
            }
        };
        pattern
            .replace_all(template, |caps: &Captures| {
                let name = &caps[1];
                values
                    .iter()
                    .find(|(key, _)| *key == name)
                    .map(|(_, value)| value.to_string())
                    .unwrap_or_else(|| caps[0].to_string())
            })
            .into_owned()
    }
}
