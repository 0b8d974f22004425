use std::{path::PathBuf, sync::Arc};

use clap::Parser;
use tracing_subscriber::EnvFilter;
use zmirror::{
    MirrorConfig, MirrorState, build_router,
    hooks::CronRegistry,
};

/// A transparent mirroring reverse proxy.
#[derive(Parser)]
#[command(name = "zmirror", version, about)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, short, default_value = "config.toml")]
    config: PathBuf,

    /// Override the configured public port.
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let mut conf = MirrorConfig::load(&cli.config)?;
    if let Some(port) = cli.port {
        conf.server.my_port = Some(port);
    }

    let bind_addr = format!(
        "{}:{}",
        conf.server.bind_host,
        conf.server.my_port.unwrap_or(80)
    );
    let state = Arc::new(MirrorState::build(conf)?);

    // Builtin cron targets keep the cache tidy; users can register more
    // before spawn_all in their own embedding.
    let mut registry = CronRegistry::new();
    if let Some(cache) = &state.cache {
        let sweep_cache = cache.clone();
        registry.register(
            "cache_clean",
            Arc::new(move || {
                let cache = sweep_cache.clone();
                tokio::spawn(async move { cache.sweep().await });
            }),
        );
        let flush_cache = cache.clone();
        registry.register(
            "cache_flush",
            Arc::new(move || {
                let cache = flush_cache.clone();
                tokio::spawn(async move { cache.flush().await });
            }),
        );
    }
    registry.spawn_all(&state.conf);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!(
        addr = %bind_addr,
        target = %state.conf.upstream.target_domain,
        mirror = %state.conf.my_scheme_and_host(),
        "mirror listening"
    );

    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to install the shutdown handler");
        return;
    }
    tracing::info!("shutdown signal received");
}
