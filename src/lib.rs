pub mod api;
pub mod config;
pub mod error;
pub mod logic;
pub mod model;
pub mod problems;
pub mod schema;
pub mod store;

pub use api::handlers;
pub use api::routes;
pub use error::{RepositoryError, Result};

use axum::Router;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::services::ServeDir;

use crate::api::{AppState, SharedState};
use crate::config::AppConfig;
use crate::logic::{QueryEngine, Repository};
use crate::schema::SchemaRegistry;
use crate::store::{FileStore, IndexStore, MemoryIndexStore, PostgresIndexStore};

/// Open the file store and index configured in `config`.
pub async fn build_repository(config: &AppConfig) -> anyhow::Result<Repository> {
    let registry = SchemaRegistry::load(problems::builtin(), config.repository.problems.as_deref())?;
    let files = FileStore::open(&config.repository.root)?;

    let index: Arc<dyn IndexStore> = match config.database_url() {
        Some(database_url) => {
            log::info!("Connecting to PostgreSQL index...");
            let store = PostgresIndexStore::new(&database_url, config.database.max_connections).await?;
            store.migrate().await?;
            Arc::new(store)
        }
        None => {
            log::info!("No database configured, keeping the index in memory");
            Arc::new(MemoryIndexStore::new())
        }
    };

    Ok(Repository::new(Arc::new(registry), files, index))
}

pub fn build_state(repo: Repository, config: &AppConfig) -> SharedState {
    let queries = QueryEngine::new(repo.clone(), config.query_settings());
    Arc::new(AppState::new(repo, queries, config.repository.api_key.clone()))
}

/// Router with state attached, plus the static file mirror when the public
/// URL root is a local path.
pub fn build_app(state: SharedState, config: &AppConfig) -> Router {
    let app = routes::create_router().with_state(state);
    let url_root = config.repository.url_root.trim_end_matches('/');
    if url_root.starts_with('/') {
        app.nest_service(url_root, ServeDir::new(&config.repository.root))
    } else {
        app
    }
}

/// Rebuild the index, then serve until the listener fails.
pub async fn run_server(config: &AppConfig) -> anyhow::Result<()> {
    let repo = build_repository(config).await?;
    let state = build_state(repo, config);

    let report = state.reconciler.rebuild().await?;
    if report.skipped() > 0 {
        log::warn!(
            "{} files could not be indexed, see the log above for details",
            report.skipped()
        );
    }
    if config.repository.api_key.is_none() {
        log::warn!("No API key configured, mutating endpoints will fail");
    }

    let app = build_app(state, config);
    let bind_address = config.server_address();
    let listener = TcpListener::bind(&bind_address).await?;
    log::info!("Instance repository running on http://{}", bind_address);

    axum::serve(listener, app).await?;

    Ok(())
}
