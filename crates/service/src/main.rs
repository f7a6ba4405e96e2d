//! Orderline order service.
//!
//! This binary consumes orders from a message stream, persists them to
//! `PostgreSQL`, and serves them over HTTP on port 8081.
//!
//! # Startup
//!
//! 1. Load configuration and initialize Sentry and tracing
//! 2. Connect to the `orders` database
//! 3. Warm the order cache from the store (failure is fatal)
//! 4. Start the ingestion loop and the HTTP server
//!
//! Ctrl+C or SIGTERM stops the HTTP server, then gives the ingestion loop
//! `SHUTDOWN_GRACE_SECS` to finish before aborting it.

#![cfg_attr(not(test), forbid(unsafe_code))]

use std::sync::Arc;
use std::time::Duration;

use orderline_service::cache::OrderCache;
use orderline_service::config::{IngestConfig, IngestSource, KafkaConfig, ServiceConfig};
use orderline_service::db::{self, OrderRepository, PgOrderRepository};
use orderline_service::ingest::{
    DeadLetterError, DeadLetterSink, DiscardSink, IngestStats, IngestionLoop, JsonLinesSink,
    LineSource, MessageSource,
};
use orderline_service::lookup::LookupService;
use orderline_service::routes;
use orderline_service::state::AppState;
use orderline_service::store::OrderStore;
use orderline_service::warmer::{WarmupError, warm_cache};
use sentry::integrations::tracing as sentry_tracing;
use thiserror::Error;
use tokio::io::BufReader;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Failures that stop the service.
#[derive(Debug, Error)]
enum StartupError {
    #[error("failed to create database pool: {0}")]
    Database(#[from] sqlx::Error),

    #[error("cache warm-up failed: {0}")]
    Warmup(#[from] WarmupError),

    #[error("failed to open dead-letter file: {0}")]
    DeadLetter(#[from] DeadLetterError),

    #[cfg(feature = "kafka")]
    #[error("failed to connect to Kafka: {0}")]
    Kafka(#[from] orderline_service::ingest::TransportError),

    #[cfg(not(feature = "kafka"))]
    #[error("INGEST_SOURCE=kafka requires building with the `kafka` feature")]
    KafkaDisabled,

    #[error("failed to bind {0}: {1}")]
    Bind(std::net::SocketAddr, std::io::Error),

    #[error("server error: {0}")]
    Serve(std::io::Error),
}

/// Initialize Sentry error tracking and return guard that must be kept alive.
fn init_sentry(config: &ServiceConfig) -> Option<sentry::ClientInitGuard> {
    let dsn = config.sentry_dsn.as_ref()?;

    let guard = sentry::init((
        dsn.as_str(),
        sentry::ClientOptions {
            release: sentry::release_name!(),
            environment: config
                .sentry_environment
                .clone()
                .map(std::borrow::Cow::Owned),
            attach_stacktrace: true,
            ..Default::default()
        },
    ));

    Some(guard)
}

/// Filter tracing events to Sentry event types.
fn sentry_event_filter(metadata: &tracing::Metadata<'_>) -> sentry_tracing::EventFilter {
    match *metadata.level() {
        tracing::Level::ERROR | tracing::Level::WARN => sentry_tracing::EventFilter::Event,
        tracing::Level::INFO | tracing::Level::DEBUG => sentry_tracing::EventFilter::Breadcrumb,
        _ => sentry_tracing::EventFilter::Ignore,
    }
}

fn init_tracing() {
    // Defaults to info level for our crate if RUST_LOG is not set
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "orderline_service=info,tower_http=debug".into());

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .with(sentry_tracing::layer().event_filter(sentry_event_filter))
        .init();
}

#[tokio::main]
async fn main() {
    let config = match ServiceConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            #[allow(clippy::print_stderr)]
            {
                eprintln!("Failed to load configuration: {e}");
            }
            std::process::exit(1);
        }
    };

    // Sentry must be initialized before the tracing subscriber
    let sentry_guard = init_sentry(&config);
    init_tracing();
    if sentry_guard.is_some() {
        info!("Sentry initialized");
    }

    let code = match run(config).await {
        Ok(()) => 0,
        Err(e) => {
            error!(error = %e, "Service stopped");
            1
        }
    };

    // Exit explicitly: a blocked stdin read would keep the runtime alive.
    drop(sentry_guard);
    std::process::exit(code);
}

async fn run(config: ServiceConfig) -> Result<(), StartupError> {
    let pool = db::create_pool(&config.database_url).await?;
    info!("Database pool created");

    // NOTE: The schema is NOT applied on startup.
    // Apply it explicitly via: orderline-cli migrate

    let repository: Arc<dyn OrderRepository> = Arc::new(PgOrderRepository::new(pool));
    let cache = Arc::new(OrderCache::with_capacity(config.cache_max_entries));
    match cache.capacity() {
        Some(max) => info!(
            max_entries = max.get(),
            "Order cache is bounded, oldest entries are evicted first"
        ),
        None => info!("Order cache is unbounded, every stored order stays in memory"),
    }
    warm_cache(repository.as_ref(), &cache).await?;

    let store = OrderStore::new(repository, cache);
    let dead_letters = dead_letter_sink(&config.ingest).await?;
    let source = open_source(&config)?;

    let app = routes::router(AppState::new(LookupService::new(store.clone())))
        // Sentry layers (outermost for full request coverage)
        .layer(sentry_tower::NewSentryLayer::new_from_top())
        .layer(sentry_tower::SentryHttpLayer::new().enable_transaction());

    let addr = config.socket_addr();
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| StartupError::Bind(addr, e))?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let ingestion = tokio::spawn(
        IngestionLoop::new(source, store, config.ingest.retry, dead_letters).run(shutdown_rx),
    );

    info!("order service listening on {}", addr);
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    // The receiver may already be gone if the stream closed on its own
    let _ = shutdown_tx.send(true);
    stop_ingestion(ingestion, config.shutdown_grace).await;

    served.map_err(StartupError::Serve)
}

async fn dead_letter_sink(config: &IngestConfig) -> Result<Arc<dyn DeadLetterSink>, StartupError> {
    match &config.dead_letter_path {
        Some(path) => {
            let sink = JsonLinesSink::open(path).await?;
            info!(path = %path.display(), "Dead letters will be written to file");
            Ok(Arc::new(sink))
        }
        None => Ok(Arc::new(DiscardSink)),
    }
}

fn open_source(config: &ServiceConfig) -> Result<Box<dyn MessageSource>, StartupError> {
    match config.source {
        IngestSource::Stdin => {
            info!("Reading orders from stdin");
            Ok(Box::new(LineSource::new(BufReader::new(tokio::io::stdin()))))
        }
        IngestSource::Kafka => open_kafka(&config.kafka),
    }
}

#[cfg(feature = "kafka")]
fn open_kafka(config: &KafkaConfig) -> Result<Box<dyn MessageSource>, StartupError> {
    let source = orderline_service::ingest::KafkaSource::connect(config)?;
    Ok(Box::new(source))
}

#[cfg(not(feature = "kafka"))]
fn open_kafka(_config: &KafkaConfig) -> Result<Box<dyn MessageSource>, StartupError> {
    Err(StartupError::KafkaDisabled)
}

/// Wait up to `grace` for the ingestion loop to stop, then abort it.
async fn stop_ingestion(mut handle: JoinHandle<IngestStats>, grace: Duration) {
    match tokio::time::timeout(grace, &mut handle).await {
        Ok(Ok(stats)) => info!(
            messages = stats.messages(),
            stored = stats.stored,
            "Ingestion stopped"
        ),
        Ok(Err(e)) => error!(error = %e, "Ingestion task failed"),
        Err(_) => {
            warn!(
                grace_ms = grace.as_millis(),
                "Ingestion did not stop in time, aborting"
            );
            handle.abort();
        }
    }
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("Shutdown signal received, starting graceful shutdown");
}
