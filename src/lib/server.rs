use std::{net::SocketAddr, sync::Arc};

use axum::{
    Json, Router,
    extract::{Query, State},
    response::IntoResponse,
    routing::get,
};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;

use super::{
    archive::{ArchiveAdaptor, ScalarCount, SpeciesFilter},
    config::Config,
    error::{MetaError, Result},
    report::{self, CombinedReport},
    store::MetadataStore,
};

#[derive(Clone)]
pub(crate) struct AppState {
    adaptor: Arc<ArchiveAdaptor>,
}

impl AppState {
    pub(crate) fn adaptor(&self) -> Arc<ArchiveAdaptor> {
        Arc::clone(&self.adaptor)
    }
}

pub async fn run(config: Config) -> Result<()> {
    let store = MetadataStore::new(&config.database_path);
    let state = AppState {
        adaptor: Arc::new(ArchiveAdaptor::new(store)),
    };

    let app = router(state).layer(TraceLayer::new_for_http());

    let addr = SocketAddr::from((config.bind_addr, config.port));
    info!(
        "Starting metadata API server on {addr} (database {})",
        config.database_path.display()
    );
    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/{version}/meta/files/count", get(count_files))
        .route("/{version}/meta/species/count", get(count_species))
        .route("/{version}/meta/studies/count", get(count_studies))
        .route("/{version}/meta/studies/stats", get(studies_stats))
        .with_state(state)
}

async fn health() -> impl IntoResponse {
    Json(HealthResponse { status: "ok" })
}

#[derive(Serialize)]
struct HealthResponse<'a> {
    status: &'a str,
}

#[derive(Serialize)]
struct CountResponse {
    count: u64,
}

impl From<ScalarCount> for CountResponse {
    fn from(result: ScalarCount) -> Self {
        Self {
            count: result.count,
        }
    }
}

async fn count_files(State(state): State<AppState>) -> Result<Json<CountResponse>> {
    let adaptor = state.adaptor();
    let count = tokio::task::spawn_blocking(move || adaptor.count_files())
        .await
        .map_err(task_error)??;
    Ok(Json(count.into()))
}

async fn count_species(State(state): State<AppState>) -> Result<Json<CountResponse>> {
    let adaptor = state.adaptor();
    let count = tokio::task::spawn_blocking(move || adaptor.count_species())
        .await
        .map_err(task_error)??;
    Ok(Json(count.into()))
}

async fn count_studies(State(state): State<AppState>) -> Result<Json<CountResponse>> {
    let adaptor = state.adaptor();
    let count = tokio::task::spawn_blocking(move || adaptor.count_studies())
        .await
        .map_err(task_error)??;
    Ok(Json(count.into()))
}

#[derive(Deserialize, Default)]
struct StatsQuery {
    #[serde(default)]
    species: Option<String>,
}

/// The two dimension queries are independent reads over the same table, so
/// they run concurrently; composition fails atomically if either does.
async fn studies_stats(
    State(state): State<AppState>,
    Query(params): Query<StatsQuery>,
) -> Result<Json<CombinedReport>> {
    let filter = params
        .species
        .as_deref()
        .map(SpeciesFilter::parse)
        .unwrap_or_default();

    let species_task = tokio::task::spawn_blocking({
        let adaptor = state.adaptor();
        let filter = filter.clone();
        move || adaptor.count_studies_per_species(&filter)
    });
    let types_task = tokio::task::spawn_blocking({
        let adaptor = state.adaptor();
        let filter = filter.clone();
        move || adaptor.count_studies_per_type(&filter)
    });

    let (species, types) = tokio::join!(species_task, types_task);
    let species = species.map_err(task_error)?;
    let types = types.map_err(task_error)?;

    let report = report::combine(vec![("species", species), ("type", types)])?;
    Ok(Json(report))
}

fn task_error(err: tokio::task::JoinError) -> MetaError {
    MetaError::Query(format!("query task failed: {err}"))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        let mut sigterm =
            signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
        sigterm.recv().await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
