//! cidgate gateway - chunked uploads and CID retrieval over IPFS

use cidgate_cli::{run_server_with_shutdown, GatewayConfig};
use clap::Parser;
use std::net::IpAddr;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "cidgate-gateway")]
#[command(about = "Chunked upload and retrieval gateway for an IPFS daemon")]
#[command(version)]
struct Args {
    /// Host to bind to
    #[arg(short = 'H', long, default_value = "0.0.0.0", env = "CIDGATE_HOST")]
    host: String,

    /// Port to listen on
    #[arg(short, long, default_value = "3000", env = "PORT")]
    port: u16,

    /// Kubo RPC API URL
    #[arg(long, default_value = "http://localhost:5001", env = "KUBO_URL")]
    kubo_url: String,

    /// Directory for upload staging files
    #[arg(long, default_value = "uploads", env = "CIDGATE_STAGING_DIR")]
    staging_dir: PathBuf,

    /// Use in-memory storage (for testing, data will not persist)
    #[arg(long, env = "CIDGATE_MEMORY_STORE")]
    memory_store: bool,

    /// Enable debug logging
    #[arg(short, long, env = "CIDGATE_DEBUG")]
    debug: bool,

    /// Allowed CORS origins, comma separated ("*" allows any)
    #[arg(
        long,
        default_value = "http://localhost:3000",
        env = "CIDGATE_CORS_ORIGIN",
        value_delimiter = ','
    )]
    cors_origin: Vec<String>,

    /// Requests per second allowed per client
    #[arg(long, default_value = "100", env = "CIDGATE_RATE_LIMIT")]
    rate_limit: u32,

    /// Reverse proxies trusted to set x-forwarded-for, comma separated
    #[arg(long, env = "CIDGATE_TRUSTED_PROXIES", value_delimiter = ',')]
    trusted_proxy: Vec<IpAddr>,

    /// Deadline for opening a content read (seconds)
    #[arg(long, default_value = "30", env = "CIDGATE_RETRIEVAL_TIMEOUT")]
    retrieval_timeout: u64,

    /// Longest silence tolerated on a content stream (seconds)
    #[arg(long, default_value = "30", env = "CIDGATE_STALL_TIMEOUT")]
    stall_timeout: u64,

    /// Deadline for dialing a peer (seconds)
    #[arg(long, default_value = "10", env = "CIDGATE_PEER_CONNECT_TIMEOUT")]
    peer_connect_timeout: u64,

    /// Wall clock bound on a latency probe (seconds)
    #[arg(long, default_value = "10", env = "CIDGATE_LATENCY_TIMEOUT")]
    latency_timeout: u64,

    /// Ping replies requested per latency probe
    #[arg(long, default_value = "5", env = "CIDGATE_LATENCY_PROBES")]
    latency_probes: u32,

    /// Upload sessions older than this are dropped (seconds)
    #[arg(long, default_value = "86400", env = "CIDGATE_UPLOAD_EXPIRY")]
    upload_expiry: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    let args = Args::parse();

    let log_level = if args.debug { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!(
                    "cidgate_cli={lvl},cidgate_core={lvl},cidgate_store={lvl},tower_http=debug",
                    lvl = log_level
                )
                .into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting cidgate gateway on {}:{}", args.host, args.port);
    tracing::info!("Kubo API: {}", args.kubo_url);

    if args.memory_store {
        tracing::warn!("Using in-memory storage - data will NOT persist!");
    }

    let config = GatewayConfig {
        host: args.host,
        port: args.port,
        kubo_url: args.kubo_url,
        staging_dir: args.staging_dir,
        use_memory_store: args.memory_store,
        rate_limit_rps: args.rate_limit,
        trusted_proxies: args.trusted_proxy,
        cors_origins: args.cors_origin,
        retrieval_timeout_secs: args.retrieval_timeout,
        stall_timeout_secs: args.stall_timeout,
        peer_connect_timeout_secs: args.peer_connect_timeout,
        latency_timeout_secs: args.latency_timeout,
        latency_probes: args.latency_probes,
        upload_expiry_secs: args.upload_expiry,
        ..Default::default()
    };

    run_server_with_shutdown(config, async {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("Shutdown signal received");
    })
    .await
}
