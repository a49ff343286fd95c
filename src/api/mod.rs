//! HTTP surface
//!
//! Only the playback/streaming endpoints the core contract names; library
//! management, auth and the query API live in external collaborators.

pub mod playback;

use std::sync::Arc;

use axum::routing::get;
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::db::Database;
use crate::media::bif::BifStore;
use crate::playback::{DecisionConfig, PlaylistService, SeekService, SessionRegistry, TranscodeSupervisor};

/// Shared state for HTTP handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub db: Database,
    pub sessions: Arc<SessionRegistry>,
    pub playlists: Arc<PlaylistService>,
    pub seek: Arc<SeekService>,
    pub bif: BifStore,
    pub supervisor: TranscodeSupervisor,
    pub decision_config: DecisionConfig,
}

/// Build the Axum router: playback routes, layers, health.
pub fn build_app(state: AppState) -> Router<()> {
    Router::new()
        .merge(playback::routes())
        .route("/health", get(|| async { "ok" }))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
