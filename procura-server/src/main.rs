use std::error::Error;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use procura_checkpoint_sqlite::SqliteCheckpointer;
use procura_core::{InMemoryTranscript, TranscriptStore};
use procura_graph::{ExecutionConfig, WorkflowEngine};
use procura_llm::{ChatCompletionClient, HttpAnalyticsQuery, HttpHierarchyLookup};
use procura_server::{
    agent_router, gateway_router, GatewayConfig, HttpServingEndpoint, StreamingGateway,
};

#[derive(Parser)]
#[command(name = "procura-server", version, about = "Procurement Q&A workflow host and chat gateway")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the workflow engine over /invocations
    Agent(AgentArgs),
    /// Serve the streaming chat gateway over /chat
    Gateway(GatewayArgs),
}

#[derive(Args)]
struct AgentArgs {
    #[arg(long, env = "PROCURA_BIND", default_value = "0.0.0.0:8080")]
    bind: SocketAddr,
    #[arg(long, env = "PROCURA_DATABASE_URL", default_value = "sqlite://procura.db?mode=rwc")]
    database_url: String,
    /// OpenAI-compatible base url used for extraction, routing and summaries
    #[arg(long, env = "PROCURA_LLM_BASE_URL")]
    llm_base_url: Option<String>,
    #[arg(long, env = "PROCURA_LLM_MODEL", default_value = "gpt-4o-mini")]
    llm_model: String,
    #[arg(long, env = "PROCURA_LLM_API_KEY", hide_env_values = true)]
    llm_api_key: Option<String>,
    #[arg(long, env = "PROCURA_MATERIAL_LOOKUP_URL")]
    material_lookup_url: String,
    #[arg(long, env = "PROCURA_LOCATION_LOOKUP_URL")]
    location_lookup_url: String,
    #[arg(long, env = "PROCURA_ANALYTICS_URL")]
    analytics_url: String,
    /// Bearer token for the lookup and analytics functions
    #[arg(long, env = "PROCURA_WAREHOUSE_TOKEN", hide_env_values = true)]
    warehouse_token: Option<String>,
    #[arg(long, env = "PROCURA_MAX_STEPS", default_value_t = 16)]
    max_steps: usize,
}

#[derive(Args)]
struct GatewayArgs {
    #[arg(long, env = "PROCURA_BIND", default_value = "0.0.0.0:8000")]
    bind: SocketAddr,
    /// Base url of the serving host (the `agent` subcommand)
    #[arg(long, env = "PROCURA_SERVING_ENDPOINT_URL")]
    endpoint_url: String,
    #[arg(long, env = "PROCURA_SERVING_ENDPOINT_TOKEN", hide_env_values = true)]
    endpoint_token: Option<String>,
    /// Transcript database; transcripts stay in memory when unset
    #[arg(long, env = "PROCURA_TRANSCRIPT_DATABASE_URL")]
    transcript_database_url: Option<String>,
    #[arg(long, env = "PROCURA_MAX_CONCURRENT_STREAMS", default_value_t = 10)]
    max_concurrent_streams: usize,
    #[arg(long, env = "PROCURA_MAX_QUEUE_SIZE", default_value_t = 100)]
    max_queue_size: usize,
    #[arg(long, env = "PROCURA_CAPABILITY_TTL_SECS", default_value_t = 300)]
    capability_ttl_secs: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    match Cli::parse().command {
        Command::Agent(args) => run_agent(args).await,
        Command::Gateway(args) => run_gateway(args).await,
    }
}

async fn run_agent(args: AgentArgs) -> Result<(), Box<dyn Error>> {
    let checkpointer = SqliteCheckpointer::builder(args.database_url.clone())
        .max_connections(4)
        .build()
        .await?;

    let mut builder = WorkflowEngine::builder()
        .checkpointer(Arc::new(checkpointer))
        .execution_config(ExecutionConfig {
            max_steps: args.max_steps,
        });

    match &args.llm_base_url {
        Some(base_url) => {
            let mut client = ChatCompletionClient::builder(base_url.clone()).model(args.llm_model.clone());
            if let Some(key) = &args.llm_api_key {
                client = client.api_key(key.clone());
            }
            builder = builder.extraction(Arc::new(client.build()?));
        }
        None => tracing::warn!("no llm configured, extraction and summaries are unavailable"),
    }

    let token = args.warehouse_token.clone().unwrap_or_default();
    let material_lookup = HttpHierarchyLookup::builder(args.material_lookup_url.clone())
        .parameter("material_name")
        .api_key(token.clone())
        .build()?;
    let location_lookup = HttpHierarchyLookup::builder(args.location_lookup_url.clone())
        .parameter("location_name")
        .api_key(token.clone())
        .build()?;
    let analytics = HttpAnalyticsQuery::builder(args.analytics_url.clone())
        .api_key(token)
        .build()?;
    builder = builder
        .material_lookup(Arc::new(material_lookup))
        .location_lookup(Arc::new(location_lookup))
        .analytics(Arc::new(analytics));

    let engine = Arc::new(builder.build()?);
    serve(args.bind, agent_router(engine)).await
}

async fn run_gateway(args: GatewayArgs) -> Result<(), Box<dyn Error>> {
    let config = GatewayConfig {
        max_concurrent_streams: args.max_concurrent_streams,
        max_queue_size: args.max_queue_size,
        capability_ttl: Duration::from_secs(args.capability_ttl_secs),
        ..GatewayConfig::default()
    };

    let mut endpoint = HttpServingEndpoint::builder(args.endpoint_url.clone())
        .connect_timeout(config.connect_timeout)
        .read_timeout(config.read_timeout);
    if let Some(token) = &args.endpoint_token {
        endpoint = endpoint.api_key(token.clone());
    }

    let transcript: Arc<dyn TranscriptStore> = match &args.transcript_database_url {
        Some(url) => {
            let store = SqliteCheckpointer::builder(url.clone())
                .max_connections(4)
                .build()
                .await?;
            Arc::new(store.transcript_store())
        }
        None => Arc::new(InMemoryTranscript::new()),
    };

    let gateway = Arc::new(StreamingGateway::new(
        Arc::new(endpoint.build()?),
        transcript,
        config,
    ));
    serve(args.bind, gateway_router(gateway)).await
}

async fn serve(bind: SocketAddr, router: axum::Router) -> Result<(), Box<dyn Error>> {
    let listener = tokio::net::TcpListener::bind(bind).await?;
    tracing::info!(%bind, "listening");
    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            if let Err(error) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %error, "failed to listen for shutdown signal");
            }
        })
        .await?;
    Ok(())
}
