//! Integration tests for the scan pipeline
//!
//! Exercises the full stage chain over real temp directories: movie
//! stacking, extras ownership, scan determinism, checkpoint resume and
//! orphan reconciliation.

use std::path::Path;
use std::sync::Arc;

use curator::db::{CreateLibrarySection, Database};
use curator::media::ffprobe::FfprobeService;
use curator::model::{ItemKind, LibraryKind, LibrarySettings, RelationKind, ScanStatus};
use curator::scan::content_rating::LocalContentRatingResolver;
use curator::scan::{build_default_registry, ScannerService};
use curator::services::ArtworkService;

use tempfile::TempDir;
use uuid::Uuid;

struct Harness {
    db: Database,
    scanner: Arc<ScannerService>,
    section_id: Uuid,
    library_root: TempDir,
    _media_root: TempDir,
    _db_dir: TempDir,
}

async fn harness(kind: LibraryKind) -> Harness {
    let db_dir = tempfile::tempdir().unwrap();
    let db = Database::connect(db_dir.path().join("test.db").to_str().unwrap())
        .await
        .unwrap();
    db.migrate().await.unwrap();

    let library_root = tempfile::tempdir().unwrap();
    let media_root = tempfile::tempdir().unwrap();

    let section = db
        .library_sections()
        .create(CreateLibrarySection {
            name: "Test Library".into(),
            kind,
            root_paths: vec![library_root.path().to_string_lossy().to_string()],
            settings: LibrarySettings::default(),
        })
        .await
        .unwrap();

    let registry = build_default_registry(FfprobeService::new());
    let artwork = ArtworkService::new(media_root.path().to_path_buf());
    let scanner = ScannerService::new(
        db.clone(),
        registry,
        artwork,
        Arc::new(LocalContentRatingResolver),
    );

    Harness {
        db,
        scanner,
        section_id: section.id,
        library_root,
        _media_root: media_root,
        _db_dir: db_dir,
    }
}

fn write_file(dir: &Path, name: &str, len: usize) {
    std::fs::write(dir.join(name), vec![0u8; len]).unwrap();
}

// ============================================================================
// Stacked movies and extras
// ============================================================================

#[tokio::test]
async fn test_stacked_movie_single_item_ordered_parts() {
    let h = harness(LibraryKind::Movies).await;
    let movie_dir = h.library_root.path().join("Movie (2001)");
    std::fs::create_dir(&movie_dir).unwrap();
    write_file(&movie_dir, "Movie.cd1.mkv", 2048);
    write_file(&movie_dir, "Movie.cd2.mkv", 1024);

    let scan = h.scanner.scan_section(h.section_id).await.unwrap();
    assert_eq!(scan.status, ScanStatus::Completed);

    let movies = h
        .db
        .metadata_items()
        .list_by_section(h.section_id, Some(ItemKind::Movie), false)
        .await
        .unwrap();
    assert_eq!(movies.len(), 1, "stack must collapse to one movie");
    let movie = &movies[0];
    assert_eq!(movie.title.as_deref(), Some("Movie"));
    assert_eq!(movie.year, Some(2001));

    let media = h.db.media().find_by_metadata_item(movie.id).await.unwrap();
    assert_eq!(media.len(), 1);
    let rendition = &media[0];
    assert_eq!(rendition.parts.len(), 2);
    assert!(rendition.parts[0].file_path.ends_with("Movie.cd1.mkv"));
    assert!(rendition.parts[1].file_path.ends_with("Movie.cd2.mkv"));
    assert_eq!(rendition.file_size_bytes, Some(3072));
}

#[tokio::test]
async fn test_inline_trailer_owns_stacked_movie() {
    let h = harness(LibraryKind::Movies).await;
    let movie_dir = h.library_root.path().join("Movie (2001)");
    std::fs::create_dir(&movie_dir).unwrap();
    write_file(&movie_dir, "Movie.cd1.mkv", 2048);
    write_file(&movie_dir, "Movie.cd2.mkv", 1024);
    write_file(&movie_dir, "Movie - trailer.mp4", 128);

    h.scanner.scan_section(h.section_id).await.unwrap();

    let movies = h
        .db
        .metadata_items()
        .list_by_section(h.section_id, Some(ItemKind::Movie), false)
        .await
        .unwrap();
    assert_eq!(movies.len(), 1);
    let movie_id = movies[0].id;

    let trailers = h
        .db
        .metadata_items()
        .list_by_section(h.section_id, Some(ItemKind::Trailer), false)
        .await
        .unwrap();
    assert_eq!(trailers.len(), 1);
    let trailer = h
        .db
        .metadata_items()
        .get(trailers[0].id, false)
        .await
        .unwrap()
        .unwrap();

    let promo = trailer
        .relations_out
        .iter()
        .find(|r| r.kind == RelationKind::TrailerPromotes)
        .expect("trailer must carry its owner relation");
    assert_eq!(promo.to_id, movie_id);

    let media = h.db.media().find_by_metadata_item(trailer.id).await.unwrap();
    assert!(media[0].parts[0].file_path.ends_with("Movie - trailer.mp4"));
}

#[tokio::test]
async fn test_samples_and_extras_folders_excluded_from_feature() {
    let h = harness(LibraryKind::Movies).await;
    let movie_dir = h.library_root.path().join("Feature (1999)");
    std::fs::create_dir(&movie_dir).unwrap();
    write_file(&movie_dir, "Feature.mkv", 4096);
    write_file(&movie_dir, "feature.sample.mkv", 100_000);
    let featurettes = movie_dir.join("Featurettes");
    std::fs::create_dir(&featurettes).unwrap();
    write_file(&featurettes, "Making Of.mkv", 512);

    h.scanner.scan_section(h.section_id).await.unwrap();

    let movies = h
        .db
        .metadata_items()
        .list_by_section(h.section_id, Some(ItemKind::Movie), false)
        .await
        .unwrap();
    assert_eq!(movies.len(), 1);
    let media = h.db.media().find_by_metadata_item(movies[0].id).await.unwrap();
    assert!(media[0].parts[0].file_path.ends_with("Feature.mkv"));

    let featurette_items = h
        .db
        .metadata_items()
        .list_by_section(h.section_id, Some(ItemKind::Featurette), false)
        .await
        .unwrap();
    assert_eq!(featurette_items.len(), 1);
}

// ============================================================================
// Scan determinism
// ============================================================================

#[tokio::test]
async fn test_second_scan_over_unchanged_tree_writes_nothing() {
    let h = harness(LibraryKind::Movies).await;
    let movie_dir = h.library_root.path().join("Movie (2001)");
    std::fs::create_dir(&movie_dir).unwrap();
    write_file(&movie_dir, "Movie.mkv", 2048);
    write_file(&movie_dir, "Movie - trailer.mp4", 128);

    let first = h.scanner.scan_section(h.section_id).await.unwrap();
    assert!(first.items_created > 0);

    let items_after_first = h
        .db
        .metadata_items()
        .list_by_section(h.section_id, None, false)
        .await
        .unwrap();
    let updated_stamps: Vec<_> = items_after_first.iter().map(|i| i.updated_at).collect();

    let second = h.scanner.scan_section(h.section_id).await.unwrap();
    assert_eq!(second.status, ScanStatus::Completed);
    assert_eq!(second.items_created, 0, "unchanged tree must create nothing");
    assert_eq!(second.items_updated, 0, "unchanged tree must update nothing");

    let items_after_second = h
        .db
        .metadata_items()
        .list_by_section(h.section_id, None, false)
        .await
        .unwrap();
    assert_eq!(items_after_first.len(), items_after_second.len());
    let stamps_after: Vec<_> = items_after_second.iter().map(|i| i.updated_at).collect();
    assert_eq!(updated_stamps, stamps_after, "no row may be touched");
}

// ============================================================================
// Checkpoint resume
// ============================================================================

#[tokio::test]
async fn test_resume_fast_forwards_without_duplicates() {
    let h = harness(LibraryKind::Movies).await;
    for name in ["Alpha (2000)", "Beta (2001)", "Gamma (2002)"] {
        let dir = h.library_root.path().join(name);
        std::fs::create_dir(&dir).unwrap();
        let stem = name.split_whitespace().next().unwrap();
        write_file(&dir, &format!("{stem}.mkv"), 1024);
    }

    // A full uninterrupted run establishes the expected item set.
    let baseline = h.scanner.scan_section(h.section_id).await.unwrap();
    assert_eq!(baseline.status, ScanStatus::Completed);
    let expected: Vec<_> = h
        .db
        .metadata_items()
        .list_by_section(h.section_id, Some(ItemKind::Movie), false)
        .await
        .unwrap()
        .iter()
        .map(|i| i.title.clone())
        .collect();
    assert_eq!(expected.len(), 3);

    // Simulate a killed scan: a running row checkpointed inside Beta, with
    // the seen paths accumulated up to that point.
    let section = h.db.library_sections().get(h.section_id).await.unwrap().unwrap();
    let location = &section.locations[0];
    let beta_file = h.library_root.path().join("Beta (2001)").join("Beta.mkv");
    let killed = h.db.scans().create(h.section_id).await.unwrap();
    h.db.scans()
        .checkpoint(
            killed.id,
            0,
            &curator::model::ResumeCursor {
                stage: "directory_traversal".into(),
                cursor: format!("{}|{}", location.id, beta_file.display()),
            },
        )
        .await
        .unwrap();
    let pre_kill_seen: Vec<String> = vec![
        h.library_root.path().join("Alpha (2000)").to_string_lossy().into_owned(),
        h.library_root
            .path()
            .join("Alpha (2000)/Alpha.mkv")
            .to_string_lossy()
            .into_owned(),
        h.library_root.path().join("Beta (2001)").to_string_lossy().into_owned(),
        beta_file.to_string_lossy().into_owned(),
    ];
    h.db.scans().record_seen_paths(killed.id, &pre_kill_seen).await.unwrap();

    // The next scan request resumes the checkpointed row.
    let resumed = h.scanner.scan_section(h.section_id).await.unwrap();
    assert_eq!(resumed.id, killed.id, "checkpointed scan must be resumed");
    assert_eq!(resumed.status, ScanStatus::Completed);
    assert!(resumed.resume.is_none(), "resume flag cleared after fast-forward");

    // Same set as the uninterrupted scan; nothing soft-deleted, nothing
    // duplicated.
    let after: Vec<_> = h
        .db
        .metadata_items()
        .list_by_section(h.section_id, Some(ItemKind::Movie), false)
        .await
        .unwrap()
        .iter()
        .map(|i| i.title.clone())
        .collect();
    assert_eq!(after, expected);

    // Seen paths accumulated across the kill without duplicates.
    let seen = h.db.scans().seen_paths(killed.id).await.unwrap();
    let unique: std::collections::HashSet<_> = seen.iter().collect();
    assert_eq!(seen.len(), unique.len());
    assert!(seen.iter().any(|p| p.ends_with("Gamma.mkv")));
}

// ============================================================================
// Orphan reconciliation
// ============================================================================

#[tokio::test]
async fn test_removed_file_soft_deletes_item() {
    let h = harness(LibraryKind::Movies).await;
    let keep_dir = h.library_root.path().join("Keep (2001)");
    let gone_dir = h.library_root.path().join("Gone (2002)");
    std::fs::create_dir(&keep_dir).unwrap();
    std::fs::create_dir(&gone_dir).unwrap();
    write_file(&keep_dir, "Keep.mkv", 1024);
    write_file(&gone_dir, "Gone.mkv", 1024);

    h.scanner.scan_section(h.section_id).await.unwrap();
    assert_eq!(
        h.db.metadata_items()
            .list_by_section(h.section_id, Some(ItemKind::Movie), false)
            .await
            .unwrap()
            .len(),
        2
    );

    std::fs::remove_dir_all(&gone_dir).unwrap();
    h.scanner.scan_section(h.section_id).await.unwrap();

    let visible = h
        .db
        .metadata_items()
        .list_by_section(h.section_id, Some(ItemKind::Movie), false)
        .await
        .unwrap();
    assert_eq!(visible.len(), 1);
    assert_eq!(visible[0].title.as_deref(), Some("Keep"));

    // The orphan is soft-deleted, still visible to the reconciler.
    let with_deleted = h
        .db
        .metadata_items()
        .list_by_section(h.section_id, Some(ItemKind::Movie), true)
        .await
        .unwrap();
    assert_eq!(with_deleted.len(), 2);
}

// ============================================================================
// Music trees
// ============================================================================

#[tokio::test]
async fn test_album_medium_track_tree() {
    let h = harness(LibraryKind::Music).await;
    let album_dir = h.library_root.path().join("Artist").join("Album (1999)");
    std::fs::create_dir_all(&album_dir).unwrap();
    write_file(&album_dir, "01 - First.flac", 256);
    write_file(&album_dir, "02 - Second.flac", 256);

    h.scanner.scan_section(h.section_id).await.unwrap();

    let albums = h
        .db
        .metadata_items()
        .list_by_section(h.section_id, Some(ItemKind::AlbumRelease), false)
        .await
        .unwrap();
    assert_eq!(albums.len(), 1);

    let mediums = h.db.metadata_items().children_of(albums[0].id).await.unwrap();
    assert_eq!(mediums.len(), 1);
    assert_eq!(mediums[0].kind, ItemKind::AlbumMedium);

    let tracks = h.db.metadata_items().children_of(mediums[0].id).await.unwrap();
    assert_eq!(tracks.len(), 2);
    assert_eq!(tracks[0].index_number, Some(1));
    assert_eq!(tracks[0].title.as_deref(), Some("First"));

    // No Person/Group is materialized for the artist folder.
    let people = h
        .db
        .metadata_items()
        .list_by_section(h.section_id, Some(ItemKind::Person), false)
        .await
        .unwrap();
    assert!(people.is_empty());
}

// ============================================================================
// Sidecar enrichment
// ============================================================================

#[tokio::test]
async fn test_nfo_sidecar_enriches_movie() {
    let h = harness(LibraryKind::Movies).await;
    let movie_dir = h.library_root.path().join("Enriched (2001)");
    std::fs::create_dir(&movie_dir).unwrap();
    write_file(&movie_dir, "Enriched.mkv", 1024);
    std::fs::write(
        movie_dir.join("Enriched.nfo"),
        r#"<movie>
  <title>Enriched, Properly</title>
  <plot>A plot.</plot>
  <mpaa>PG-13</mpaa>
  <premiered>2001-06-15</premiered>
  <genre>Drama</genre>
  <uniqueid type="imdb">tt0000001</uniqueid>
</movie>"#,
    )
    .unwrap();

    h.scanner.scan_section(h.section_id).await.unwrap();

    let movies = h
        .db
        .metadata_items()
        .list_by_section(h.section_id, Some(ItemKind::Movie), false)
        .await
        .unwrap();
    assert_eq!(movies.len(), 1);
    let movie = h.db.metadata_items().get(movies[0].id, false).await.unwrap().unwrap();

    assert_eq!(movie.title.as_deref(), Some("Enriched, Properly"));
    assert_eq!(movie.summary.as_deref(), Some("A plot."));
    assert_eq!(movie.content_rating.as_deref(), Some("PG-13"));
    // The rating resolves to an age even though the sidecar carried none.
    assert_eq!(movie.content_rating_age, Some(13));
    // Release date wins the year derivation.
    assert_eq!(movie.year, Some(2001));
    assert!(movie.genres.contains("Drama"));
    assert!(movie
        .external_ids
        .iter()
        .any(|e| e.provider == "imdb" && e.value == "tt0000001"));
}
