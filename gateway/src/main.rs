use std::sync::Arc;
use std::time::Duration;

use envconfig::Envconfig;
use tokio::signal;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use gateway::config::Config;
use gateway::HandlerBuilder;

async fn shutdown() {
    let mut term = signal::unix::signal(signal::unix::SignalKind::terminate())
        .expect("failed to register SIGTERM handler");

    let mut interrupt = signal::unix::signal(signal::unix::SignalKind::interrupt())
        .expect("failed to register SIGINT handler");

    tokio::select! {
        _ = term.recv() => {},
        _ = interrupt.recv() => {},
    }
}

#[tokio::main]
async fn main() {
    let config = Config::init_from_env().expect("Invalid configuration:");

    // stdout logging with a level configured by the RUST_LOG envvar
    // (default=INFO)
    let log_layer = tracing_subscriber::fmt::layer().with_filter(
        EnvFilter::builder()
            .with_default_directive(LevelFilter::INFO.into())
            .from_env_lossy(),
    );
    tracing_subscriber::registry().with(log_layer).init();

    let listener = tokio::net::TcpListener::bind(config.address)
        .await
        .expect("could not bind port");
    let advertise = format!(
        "http://{}",
        listener.local_addr().expect("listener has no local address")
    );

    // The bare front door: health only. Embedding processes mount their
    // services through the builder before calling build().
    let handler = Arc::new(
        HandlerBuilder::new()
            .bind(config.address.to_string())
            .listener(listener, advertise)
            .close_timeout(Duration::from_secs(config.close_timeout_seconds))
            .build()
            .expect("could not build http handler"),
    );

    let closer = handler.clone();
    tokio::spawn(async move {
        shutdown().await;
        if let Err(e) = closer.close().await {
            tracing::error!("shutdown failed: {e}");
        }
    });

    if handler.serve().await.is_err() {
        // serve() already logged the cause at error level
        std::process::exit(1);
    }
}
