//! Shelter Backend
//!
//! Serves the open-data adoptable-animal feed through a TTL cache and keeps
//! saved animals per signed-in user in a versioned document store, or on
//! this device for visitors.

mod api;
mod auth;
mod cache;
mod clock;
mod collection;
mod config;
mod db;
mod errors;
mod favorites;
mod filter;
mod inflight;
mod kv;
mod models;
mod orchestrator;
mod session;
mod upstream;
mod users;

use std::sync::Arc;

use axum::{
    middleware,
    routing::{delete, get, post, put},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use cache::CacheStore;
use clock::SystemClock;
use collection::CollectionSet;
use config::Config;
use db::DocumentStore;
use favorites::{FileStorage, LocalFavoritesStore};
use kv::RemoteKv;
use orchestrator::DataFetchOrchestrator;
use session::SessionRegistry;
use upstream::HttpAnimalSource;
use users::UserDirectory;

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub cache: Arc<CacheStore>,
    pub orchestrator: Arc<DataFetchOrchestrator>,
    pub collection: Arc<CollectionSet>,
    pub favorites: Arc<LocalFavoritesStore>,
    pub sessions: Arc<SessionRegistry>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::from_env()?;

    // Initialize logging
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Shelter Backend");
    tracing::info!("Database path: {:?}", config.db_path);
    tracing::info!("Local storage: {:?}", config.storage_dir);
    tracing::info!("Upstream: {}", config.upstream_url);
    tracing::info!("Bind address: {}", config.bind_addr);

    if config.api_psk.is_none() {
        tracing::warn!("No API PSK configured (SHELTER_API_PSK). Authentication is disabled!");
    }

    // Remote document store
    let pool = db::init_database(&config.db_path).await?;
    let kv: Arc<dyn RemoteKv> = Arc::new(DocumentStore::new(pool));

    let state = build_state(config.clone(), kv)?;

    // Favorites must be restored before they can be changed
    state.favorites.load().await?;

    if let Some(interval) = config.sweep_interval {
        spawn_sweeper(Arc::clone(&state.cache), interval);
    }

    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    tracing::info!("Server listening on {}", config.bind_addr);

    axum::serve(listener, app).await?;

    Ok(())
}

/// Wire every component onto one remote store.
pub fn build_state(config: Config, kv: Arc<dyn RemoteKv>) -> Result<AppState, errors::AppError> {
    let clock = Arc::new(SystemClock);
    let cache = Arc::new(CacheStore::with_ttl(
        Arc::clone(&kv),
        clock.clone(),
        config.cache_ttl,
    ));
    let source = Arc::new(HttpAnimalSource::new(
        config.upstream_url.clone(),
        config.upstream_timeout,
    )?);
    let orchestrator = Arc::new(DataFetchOrchestrator::new(
        Arc::clone(&cache),
        source,
        config.dataset_key.clone(),
    ));
    let collection = Arc::new(CollectionSet::new(Arc::clone(&kv)));
    let favorites = Arc::new(LocalFavoritesStore::new(Arc::new(FileStorage::new(
        config.storage_dir.clone(),
    ))));
    let users = Arc::new(UserDirectory::new(kv, clock));
    let sessions = Arc::new(SessionRegistry::new(
        users,
        Arc::clone(&collection),
        Arc::clone(&favorites),
    ));

    Ok(AppState {
        config: Arc::new(config),
        cache,
        orchestrator,
        collection,
        favorites,
        sessions,
    })
}

fn spawn_sweeper(cache: Arc<CacheStore>, interval: std::time::Duration) {
    tracing::info!("Sweeping expired cache entries every {:?}", interval);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // First tick completes immediately
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let report = cache.sweep().await;
            tracing::info!(
                "Cache sweep examined {} entries, removed {}",
                report.examined,
                report.removed
            );
        }
    });
}

/// Create the application router with all routes.
pub fn create_router(state: AppState) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Clone PSK for the auth layer
    let psk = state.config.api_psk.clone();

    // API routes
    let api_routes = Router::new()
        // Dataset
        .route("/animals", get(api::list_animals))
        .route("/animals/options", get(api::animal_options))
        .route("/animals/{id}", get(api::get_animal))
        .route("/cache/sweep", post(api::sweep_cache))
        // Session
        .route("/session", post(api::sign_in).delete(api::sign_out))
        // Signed-in collection
        .route("/collection", get(api::list_collection))
        .route(
            "/collection/{id}",
            get(api::get_collected)
                .put(api::add_collected)
                .delete(api::remove_collected),
        )
        // Device favorites
        .route("/favorites", get(api::list_favorites).post(api::add_favorite))
        .route("/favorites/{id}", delete(api::remove_favorite))
        // Whichever of the two applies
        .route("/saved/{id}", put(api::save).delete(api::unsave))
        // Apply PSK auth middleware
        .layer(middleware::from_fn(move |req, next| {
            auth::psk_auth_layer(psk.clone(), req, next)
        }));

    // Health check (no auth required)
    let health_routes = Router::new().route("/health", get(health_check));

    Router::new()
        .nest("/api", api_routes)
        .merge(health_routes)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Health check endpoint.
async fn health_check() -> &'static str {
    "OK"
}
