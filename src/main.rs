//! Curator backend entry point
//!
//! Wires configuration, the store, the frozen parts registry, playback
//! services, background jobs and the streaming HTTP surface.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use curator::api::{self, AppState};
use curator::config::Config;
use curator::db::Database;
use curator::media::bif::BifStore;
use curator::media::ffprobe::FfprobeService;
use curator::playback::{
    DecisionConfig, PlaybackEngine, PlaylistService, SeekService, SessionRegistry,
    TranscodeSupervisor,
};
use curator::scan::content_rating::LocalContentRatingResolver;
use curator::scan::{build_default_registry, ScannerService};
use curator::services::ArtworkService;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = Arc::new(Config::from_env()?);

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "curator=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Curator backend");

    if let Some(parent) = std::path::Path::new(&config.database_path).parent() {
        tokio::fs::create_dir_all(parent).await.ok();
    }
    let db = Database::connect(&config.database_path).await?;
    db.migrate().await?;
    tracing::info!("Database connected");

    let ffprobe = FfprobeService::with_path(config.ffprobe_path.clone());
    if !ffprobe.is_available().await {
        tracing::warn!("ffprobe not found; stream analysis and keyframe seeks degraded");
    }

    // Parts are registered once at startup; the registry is frozen before
    // the first scan.
    let registry = build_default_registry(ffprobe.clone());
    let artwork = ArtworkService::new(PathBuf::from(&config.media_path));
    let rating_resolver = Arc::new(LocalContentRatingResolver);
    let scanner = ScannerService::new(db.clone(), registry, artwork, rating_resolver);

    let session_ttl = Duration::days(config.playback_expiry_days);
    let decision_config = DecisionConfig {
        use_hardware_acceleration: config.use_hardware_acceleration,
        enable_tone_mapping: config.enable_tone_mapping,
        force_transcode: false,
    };

    let supervisor = TranscodeSupervisor::start_supervisor(
        db.clone(),
        PathBuf::from(&config.cache_path),
        config.ffmpeg_path.clone(),
    );
    let bif = BifStore::new(PathBuf::from(&config.media_path));
    let playlists = Arc::new(PlaylistService::with_chunk_size(
        db.clone(),
        session_ttl,
        config.playlist_chunk_size,
    ));
    let engine = Arc::new(PlaybackEngine::new(
        db.clone(),
        supervisor.clone(),
        playlists.clone(),
        bif.clone(),
        decision_config.clone(),
        session_ttl,
    ));
    let sessions = SessionRegistry::new(db.clone(), engine, supervisor.clone(), session_ttl);
    let seek = Arc::new(SeekService::new(ffprobe.clone()));

    // Scans interrupted by a previous shutdown pick their cursors back up.
    {
        let scanner = scanner.clone();
        tokio::spawn(async move {
            if let Err(e) = scanner.resume_interrupted().await {
                tracing::error!(error = %e, "Interrupted-scan resume failed");
            }
        });
    }

    let jobs = curator::jobs::JobRunner::start(
        scanner.clone(),
        supervisor.clone(),
        sessions.clone(),
        playlists.clone(),
    )
    .await?;

    let state = AppState {
        config: config.clone(),
        db,
        sessions,
        playlists,
        seek,
        bif,
        supervisor,
        decision_config,
    };
    let app = api::build_app(state);

    let addr: SocketAddr = format!(
        "{}:{}",
        config.host.as_deref().unwrap_or("0.0.0.0"),
        config.port
    )
    .parse()?;
    tracing::info!(%addr, "Listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutting down");
        })
        .await?;

    jobs.shutdown().await?;
    Ok(())
}
