//! Integration tests for the playback engine
//!
//! Decision rounds over a real store: container-only remux, capability
//! version mismatch, and the end-of-item protocol through a playlist
//! generator.

use std::path::PathBuf;
use std::sync::Arc;

use curator::db::{CreateLibrarySection, Database};
use curator::model::capability::{
    AudioCodecSupport, CapabilityProfile, SubtitleSupport, VideoCodecSupport,
};
use curator::model::{
    ItemKind, LibraryKind, LibrarySettings, MediaItem, MediaPart, MediaStream, MetadataItem,
    PlaylistSeed, StreamType,
};
use curator::media::bif::BifStore;
use curator::playback::engine::{ClientStatus, DecideAction, DecideInput};
use curator::playback::{
    DecisionConfig, PlaybackEngine, PlaylistService, SessionRegistry, StreamPlan,
    TranscodeSupervisor,
};
use tempfile::TempDir;
use time::Duration;
use uuid::Uuid;

struct Harness {
    db: Database,
    sessions: Arc<SessionRegistry>,
    playlists: Arc<PlaylistService>,
    section_id: Uuid,
    _dirs: Vec<TempDir>,
}

async fn harness() -> Harness {
    let db_dir = tempfile::tempdir().unwrap();
    let cache_dir = tempfile::tempdir().unwrap();
    let media_dir = tempfile::tempdir().unwrap();

    let db = Database::connect(db_dir.path().join("test.db").to_str().unwrap())
        .await
        .unwrap();
    db.migrate().await.unwrap();

    let section = db
        .library_sections()
        .create(CreateLibrarySection {
            name: "Movies".into(),
            kind: LibraryKind::Movies,
            root_paths: vec![],
            settings: LibrarySettings::default(),
        })
        .await
        .unwrap();

    let supervisor = TranscodeSupervisor::start_supervisor(
        db.clone(),
        cache_dir.path().to_path_buf(),
        "ffmpeg".to_string(),
    );
    let ttl = Duration::days(1);
    let playlists = Arc::new(PlaylistService::new(db.clone(), ttl));
    let engine = Arc::new(PlaybackEngine::new(
        db.clone(),
        supervisor.clone(),
        playlists.clone(),
        BifStore::new(media_dir.path().to_path_buf()),
        DecisionConfig::default(),
        ttl,
    ));
    let sessions = SessionRegistry::new(db.clone(), engine, supervisor, ttl);

    Harness {
        db,
        sessions,
        playlists,
        section_id: section.id,
        _dirs: vec![db_dir, cache_dir, media_dir],
    }
}

fn mp4_profile(version: i64) -> CapabilityProfile {
    CapabilityProfile {
        version,
        containers: vec!["mp4".into()],
        video: vec![VideoCodecSupport {
            codec: "h264".into(),
            profiles: vec![],
            max_level: None,
            max_bitrate: Some(10_000_000),
            max_width: Some(1920),
            max_height: Some(1080),
            max_bit_depth: Some(8),
        }],
        audio: vec![AudioCodecSupport {
            codec: "aac".into(),
            max_channels: Some(2),
            max_sample_rate: None,
            max_bitrate: None,
        }],
        subtitles: SubtitleSupport { text_formats: vec!["vtt".into()], accepts_burn_in: false },
        accepts_hdr: false,
        max_total_bitrate: None,
    }
}

/// An mkv/h264/aac movie at 5 Mbps.
async fn insert_mkv_movie(db: &Database, section: Uuid, title: &str) -> Uuid {
    let mut item = MetadataItem::skeleton(ItemKind::Movie);
    item.title = Some(title.to_string());
    item.library_section_id = Some(section);
    let item = db.metadata_items().insert(&item).await.unwrap();

    let mut media = MediaItem::new(item.id);
    let part_id = Uuid::new_v4();
    let mut video = MediaStream::new(part_id, 0, StreamType::Video, "h264");
    video.width = Some(1920);
    video.height = Some(1080);
    video.bitrate = Some(5_000_000);
    let mut audio = MediaStream::new(part_id, 1, StreamType::Audio, "aac");
    audio.channels = Some(2);
    media.parts.push(MediaPart {
        id: part_id,
        media_item_id: media.id,
        part_index: 0,
        file_path: format!("/library/{title}.mkv"),
        size_bytes: 1 << 30,
        modified_at: None,
        hash: None,
        duration_ms: Some(3_600_000),
        container: Some("mkv".into()),
        streams: vec![video, audio],
    });
    media.recompute_summary();
    db.media().upsert(&media).await.unwrap();
    item.id
}

// ============================================================================
// Decision rounds
// ============================================================================

#[tokio::test]
async fn test_container_only_mismatch_direct_streams() {
    let h = harness().await;
    let movie = insert_mkv_movie(&h.db, h.section_id, "Movie").await;

    let profile = mp4_profile(3);
    let session = h.sessions.open_session("user-1", &profile).await.unwrap();

    let output = h
        .sessions
        .decide(DecideInput {
            session_id: session.id,
            metadata_item_id: Some(movie),
            status: ClientStatus::Playing,
            progress_ms: 0,
            current_item_id: None,
            capability_profile: None,
            capability_version: 3,
        })
        .await
        .unwrap();

    assert_eq!(output.action, DecideAction::Play);
    assert!(!output.capability_version_mismatch);

    let plan: StreamPlan = serde_json::from_str(output.stream_plan_json.as_deref().unwrap()).unwrap();
    assert_eq!(plan.mode, curator::playback::DeliveryMode::DirectStream);
    assert_eq!(plan.container.as_deref(), Some("mp4"));

    let url = output.playback_url.unwrap();
    assert!(url.contains("/remux-seek.mp4?seekMs=0"), "got {url}");
}

#[tokio::test]
async fn test_capability_version_mismatch_flagged() {
    let h = harness().await;
    let movie = insert_mkv_movie(&h.db, h.section_id, "Movie").await;

    let session = h.sessions.open_session("user-1", &mp4_profile(3)).await.unwrap();

    // The client references an older version without re-declaring.
    let output = h
        .sessions
        .decide(DecideInput {
            session_id: session.id,
            metadata_item_id: Some(movie),
            status: ClientStatus::Playing,
            progress_ms: 0,
            current_item_id: None,
            capability_profile: None,
            capability_version: 2,
        })
        .await
        .unwrap();
    assert!(output.capability_version_mismatch);

    // Re-declaring with a full newer profile clears the mismatch.
    let output = h
        .sessions
        .decide(DecideInput {
            session_id: session.id,
            metadata_item_id: Some(movie),
            status: ClientStatus::Playing,
            progress_ms: 0,
            current_item_id: None,
            capability_profile: Some(mp4_profile(4)),
            capability_version: 4,
        })
        .await
        .unwrap();
    assert!(!output.capability_version_mismatch);
    assert_eq!(output.capability_profile_version, 4);
}

// ============================================================================
// End-of-item protocol
// ============================================================================

#[tokio::test]
async fn test_ended_advances_through_generator_then_stops() {
    let h = harness().await;
    let first = insert_mkv_movie(&h.db, h.section_id, "First").await;
    let second = insert_mkv_movie(&h.db, h.section_id, "Second").await;

    let session = h.sessions.open_session("user-1", &mp4_profile(1)).await.unwrap();
    h.playlists
        .create(
            session.id,
            PlaylistSeed::Explicit { item_ids: vec![first, second] },
            false,
            false,
            None,
        )
        .await
        .unwrap();

    // Start on the first item.
    let play = h
        .sessions
        .decide(DecideInput {
            session_id: session.id,
            metadata_item_id: Some(first),
            status: ClientStatus::Playing,
            progress_ms: 0,
            current_item_id: None,
            capability_profile: None,
            capability_version: 1,
        })
        .await
        .unwrap();
    assert_eq!(play.action, DecideAction::Play);

    // First item ends: the generator hands over the second.
    let next = h
        .sessions
        .decide(DecideInput {
            session_id: session.id,
            metadata_item_id: None,
            status: ClientStatus::Ended,
            progress_ms: 3_600_000,
            current_item_id: Some(first),
            capability_profile: None,
            capability_version: 1,
        })
        .await
        .unwrap();
    assert_eq!(next.action, DecideAction::Next);
    assert_eq!(next.next_item_id, Some(second));
    assert_eq!(next.next_item_title.as_deref(), Some("Second"));
    assert!(next.stream_plan_json.is_some());

    // Second item ends: the generator is exhausted.
    let stop = h
        .sessions
        .decide(DecideInput {
            session_id: session.id,
            metadata_item_id: None,
            status: ClientStatus::Ended,
            progress_ms: 3_600_000,
            current_item_id: Some(second),
            capability_profile: None,
            capability_version: 1,
        })
        .await
        .unwrap();
    assert_eq!(stop.action, DecideAction::Stop);
    assert!(stop.stream_plan_json.is_none());
}

// ============================================================================
// Session heartbeats
// ============================================================================

#[tokio::test]
async fn test_heartbeat_extends_session_expiry() {
    let h = harness().await;
    let movie = insert_mkv_movie(&h.db, h.section_id, "Movie").await;

    let session = h.sessions.open_session("user-1", &mp4_profile(1)).await.unwrap();
    let initial_expiry = session.expires_at;

    tokio::time::sleep(std::time::Duration::from_millis(1100)).await;
    h.sessions
        .decide(DecideInput {
            session_id: session.id,
            metadata_item_id: Some(movie),
            status: ClientStatus::Playing,
            progress_ms: 30_000,
            current_item_id: None,
            capability_profile: None,
            capability_version: 1,
        })
        .await
        .unwrap();

    let refreshed = h.db.playback_sessions().get(session.id).await.unwrap().unwrap();
    assert!(refreshed.expires_at > initial_expiry);
    assert_eq!(refreshed.playhead_ms, 30_000);
}
