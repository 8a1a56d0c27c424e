use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::info;

mod api;
mod config;
mod db;
mod error;
mod i18n;
mod notify;
mod service;

use crate::config::{RuntimeConfig, load_static_config};
use crate::db::Database;
use crate::notify::HttpPushNotifier;
use crate::service::SlotbookService;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    init_logging();

    info!("Starting Slotbook service v{}", env!("CARGO_PKG_VERSION"));

    // Load static configuration (server binding, storage path)
    // We need to load this first to know where the database is
    let static_config = load_static_config()?;

    info!(
        host = %static_config.server.host,
        port = static_config.server.port,
        "Static configuration loaded"
    );

    // Ensure data directory exists
    std::fs::create_dir_all(&static_config.storage.data_dir)?;

    // Initialize database
    let db_path = static_config.storage.data_dir.join("slotbook.db");
    let db = Arc::new(Database::open(&db_path)?);
    info!(path = %db_path.display(), "Database initialized");

    // Load runtime config (static + dynamic with DB overrides)
    let runtime_config = Arc::new(RuntimeConfig::load(static_config, &db)?);
    info!(
        supervisors = runtime_config.dynamic().access.supervisor_ids.len(),
        "Runtime configuration loaded with DB settings"
    );

    // Initialize the service
    let notifier = Arc::new(HttpPushNotifier::new(runtime_config.clone()));
    let service = Arc::new(SlotbookService::new(
        db,
        runtime_config.clone(),
        notifier,
    ));

    let seeded = service.seed_price_rules()?;
    info!(rules = seeded, "Price rules seeded");

    // Build the router
    let app = api::router(service);

    // Start the server
    let addr = format!(
        "{}:{}",
        runtime_config.static_config.server.host, runtime_config.static_config.server.port
    );
    let listener = TcpListener::bind(&addr).await?;
    info!("Listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}

fn init_logging() {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let format = fmt::format()
        .with_target(true)
        .with_thread_ids(true)
        .compact();

    // Use RUST_LOG if set, otherwise default to info level for our crate
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("slotbook_service=info"));

    tracing_subscriber::registry()
        .with(fmt::layer().event_format(format))
        .with(filter)
        .init();
}
