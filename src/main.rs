mod codec;
mod config;
mod dispatch;
mod encrypt;
mod error;
mod handlers;
mod keys;
mod models;
mod state;
mod store;
mod vapid;

use std::sync::Arc;

use axum::{
    extract::DefaultBodyLimit,
    http::HeaderValue,
    routing::{delete, get, post},
    Router,
};
use dotenvy::dotenv;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::{
    config::Config,
    dispatch::Dispatcher,
    handlers::{config as config_handler, health, notify, subscribe, unsubscribe},
    state::AppState,
    store::RedbStore,
    vapid::VapidKeyPair,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    if std::env::args().nth(1).as_deref() == Some("generate-vapid-keys") {
        print_vapid_keys();
        return Ok(());
    }

    let cfg = Arc::new(Config::from_env()?);
    let vapid = Arc::new(cfg.vapid_keys()?);
    let store = Arc::new(RedbStore::open(&cfg.db_path).map_err(|err| anyhow::anyhow!(err))?);
    let dispatcher = Dispatcher::new(store.clone(), cfg.dispatch_options())?;

    let state = AppState {
        store,
        cfg: cfg.clone(),
        vapid,
        dispatcher,
    };

    let cors = if cfg.cors_allow_any {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let origins = cfg
            .cors_origins
            .iter()
            .map(|origin| HeaderValue::from_str(origin))
            .collect::<Result<Vec<_>, _>>()?;
        CorsLayer::new()
            .allow_origin(AllowOrigin::list(origins))
            .allow_methods(Any)
            .allow_headers(Any)
    };

    let app = Router::new()
        .route("/health", get(health))
        .route("/api/config", get(config_handler))
        // Keep subscription payloads small (PushSubscription JSON).
        .route(
            "/api/subscribe",
            post(subscribe).layer(DefaultBodyLimit::max(8 * 1024)),
        )
        .route("/api/subscribe/:id", delete(unsubscribe))
        .route(
            "/api/notify",
            post(notify).layer(DefaultBodyLimit::max(64 * 1024)),
        )
        .layer(cors)
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(&cfg.bind_addr).await?;
    info!("listening on {}", cfg.bind_addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

fn print_vapid_keys() {
    let keys = VapidKeyPair::generate("mailto:admin@example.com");
    println!("VAPID_PUBLIC_KEY={}", keys.public_key_b64());
    println!("VAPID_PRIVATE_KEY={}", codec::encode_b64url(&keys.private_key));
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown signal received");
}
