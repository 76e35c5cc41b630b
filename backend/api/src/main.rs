//! Enrollment funnel backend — entry point.
//!
//! Boots the SQLite-backed store, seeds the config and admin-credential
//! singletons, picks the notification adapter, and serves the Axum API.

use std::sync::Arc;

use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use enrollment_api::api::{self, AppState};
use enrollment_api::auth::{SessionStore, SESSION_TTL_HOURS};
use enrollment_api::config::{Config, DEFAULT_ADMIN_PASSWORD};
use enrollment_api::db::Store;
use enrollment_api::notify::{LogNotifier, Notifier, ResendNotifier};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialise structured logging (RUST_LOG controls verbosity).
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // Load optional .env file (ignored if missing).
    let _ = dotenvy::dotenv();

    // Load config from environment.
    let config = Config::from_env().map_err(|e| anyhow::anyhow!("{e}"))?;

    // ─── Store + explicit first-run seeding ───────────────
    let store = Store::open(&config.database_url).await?;
    store.seed_config(config.default_max_places).await?;
    if !store.has_admin_credential().await? {
        if config.admin_password == DEFAULT_ADMIN_PASSWORD {
            warn!("ADMIN_PASSWORD is not set; seeding the default development password");
        }
        let hash = bcrypt::hash(&config.admin_password, bcrypt::DEFAULT_COST)?;
        store.set_admin_credential(&hash).await?;
        info!("admin credential initialised");
    }

    // ─── Notification adapter ─────────────────────────────
    let notifier: Arc<dyn Notifier> = match &config.resend_api_key {
        Some(key) => {
            info!("email notifications enabled, sender: {}", config.email_from);
            Arc::new(ResendNotifier::new(
                key.clone(),
                config.email_from.clone(),
                config.admin_email.clone(),
                config.program_name.clone(),
            )?)
        }
        None => {
            warn!("RESEND_API_KEY not set; notifications will only be logged");
            Arc::new(LogNotifier)
        }
    };

    // ─── REST API ─────────────────────────────────────────
    let state = Arc::new(AppState {
        store,
        sessions: SessionStore::new(chrono::Duration::hours(SESSION_TTL_HOURS)),
        notifier,
        config: config.clone(),
    });

    let app = api::router(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr = format!("0.0.0.0:{}", config.port);
    info!("API listening on http://{addr}");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
