use std::sync::Arc;

use tower_http::{services::ServeDir, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cryptoflow_news::config::Config;
use cryptoflow_news::db::Database;
use cryptoflow_news::ingest::{start_background_refresh, Ingestor};
use cryptoflow_news::routes::{self, AppState};
use cryptoflow_news::session::{start_session_sweeper, FeedSessions};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cryptoflow_news=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config_path = std::env::var("PORTAL_CONFIG").unwrap_or_else(|_| "portal.toml".to_string());
    let config = Config::load(&config_path)?;
    info!(
        "Loaded {} sources from {} (page size {})",
        config.sources.len(),
        config_path,
        config.feed.page_size
    );

    // Initialize database
    let database_url = std::env::var("DATABASE_URL")
        .unwrap_or_else(|_| "sqlite:cryptoflow_news.db?mode=rwc".to_string());
    let db = Database::new(&database_url).await?;
    db.initialize().await?;
    db.sync_sources(&config.sources).await?;
    info!("Database initialized");

    let db = Arc::new(db);

    // Ingest sources in the background
    let ingestor = Arc::new(Ingestor::new(db.clone()));
    let bg_ingestor = ingestor.clone();
    let refresh_interval = config.refresh_interval;
    tokio::spawn(async move {
        start_background_refresh(bg_ingestor, refresh_interval).await;
    });

    // Related feed sessions, swept when idle
    let sessions = Arc::new(FeedSessions::new(
        db.clone(),
        config.feed.clone(),
        config.sensor.clone(),
    ));
    let sweeper = sessions.clone();
    let ttl = config.feed.session_ttl();
    tokio::spawn(async move {
        start_session_sweeper(sweeper, ttl).await;
    });

    let state = Arc::new(AppState {
        db: db.clone(),
        ingestor,
        sessions: sessions.clone(),
    });

    let app = routes::router(state)
        .nest_service("/static", ServeDir::new("static"))
        .layer(TraceLayer::new_for_http());

    // Start server
    let bind_addr = std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".to_string());
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("Server starting on http://{}", bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown signal received");
        })
        .await?;

    sessions.close_all().await;

    Ok(())
}
