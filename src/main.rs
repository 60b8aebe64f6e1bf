//! Process entrypoint: load config, boot the engine, serve the HTTP
//! adapter, and drain cleanly on shutdown signal (§9 design notes).
//! Grounded on the axum `tokio::main` + `tracing_subscriber::fmt::init`
//! boot pattern in `cortex-works-cortex-act`'s `fine-tune-service/src/main.rs`.

use std::sync::Arc;

use sttstudio::config::Config;
use sttstudio::engine::Engine;
use sttstudio::http::build_router;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = Config::from_env();
    let bind_addr = config.bind_addr.clone();

    let engine = Arc::new(Engine::boot(config)?);
    let router = build_router(engine.clone());

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!(addr = %bind_addr, "sttstudio listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("shutdown signal received, draining background tasks");
    match Arc::try_unwrap(engine) {
        Ok(engine) => engine.shutdown(),
        Err(_) => tracing::warn!("engine still has live references at shutdown; skipping final flush"),
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        let mut sig = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler");
        sig.recv().await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
