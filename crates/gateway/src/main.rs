//! CLI launcher for the gateway
//!
//! Exit codes: 0 normal shutdown, 2 bad configuration, 3 a required
//! adapter is unreachable at startup, 4 the listen port is in use.

use clap::Parser;
use std::path::PathBuf;
use std::process::exit;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use helpdesk_rag_core::GatewayConfig;
use helpdesk_rag_gateway::server::{build_adapters, run, AppState};
use helpdesk_rag_monitoring::init_prometheus;

const EXIT_BAD_CONFIG: i32 = 2;
const EXIT_ADAPTER_UNREACHABLE: i32 = 3;
const EXIT_PORT_IN_USE: i32 = 4;

#[derive(Parser, Debug)]
#[command(author, version, about = "Retrieval-augmented IT helpdesk gateway")]
struct Args {
    /// Path to the JSON configuration file
    #[arg(short, long, default_value = "gateway.json")]
    config: PathBuf,

    /// Listen address
    #[arg(short, long, default_value = "0.0.0.0:8080")]
    listen: String,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args = Args::parse();

    let config = match GatewayConfig::from_file(&args.config) {
        Ok(config) => config,
        Err(e) => {
            error!(path = %args.config.display(), error = %e, "cannot load configuration");
            exit(EXIT_BAD_CONFIG);
        }
    };

    let (embedder, store, llm) = build_adapters(&config);

    // Fail fast when a required collaborator is down
    let (embedding_ok, store_ok, llm_ok) =
        tokio::join!(embedder.ping(), store.ping(), llm.ping());
    if let Err(e) = embedding_ok {
        error!(error = %e, "embedding provider unreachable");
        exit(EXIT_ADAPTER_UNREACHABLE);
    }
    if let Err(e) = store_ok {
        error!(error = %e, "vector store unreachable");
        exit(EXIT_ADAPTER_UNREACHABLE);
    }
    if let Err(e) = llm_ok {
        error!(error = %e, "LLM provider unreachable");
        exit(EXIT_ADAPTER_UNREACHABLE);
    }

    let prometheus = init_prometheus();
    let state = Arc::new(
        AppState::assemble(&config, embedder, store, llm).with_prometheus(prometheus),
    );
    state.cache.spawn_purge_task();

    let listener = match TcpListener::bind(&args.listen).await {
        Ok(listener) => listener,
        Err(e) if e.kind() == std::io::ErrorKind::AddrInUse => {
            error!(addr = %args.listen, "listen address already in use");
            exit(EXIT_PORT_IN_USE);
        }
        Err(e) => {
            error!(addr = %args.listen, error = %e, "cannot bind listen address");
            exit(EXIT_PORT_IN_USE);
        }
    };

    info!(
        sources = config.enabled_sources().len(),
        model = %config.llm.model,
        "gateway starting"
    );

    if let Err(e) = run(listener, state).await {
        error!(error = %e, "server terminated");
        exit(1);
    }
}
