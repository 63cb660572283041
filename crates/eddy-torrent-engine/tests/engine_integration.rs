//! End-to-end engine scenarios over the stub backend and the file store.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use eddy_events::{Event, EventBus, EventStream};
use eddy_store::RecordStore;
use eddy_torrent_core::{
    InfoHash, Metainfo, PersistenceGateway, TorrentBuilder, TorrentError, TorrentSettings,
    TorrentState,
};
use eddy_torrent_engine::{StubSession, TorrentEngine};

const MAGNET: &str = "magnet:?xt=urn:btih:0123456789abcdef0123456789abcdef01234567&dn=demo";
const MAGNET_HASH: &str = "0123456789abcdef0123456789abcdef01234567";
const EVENT_TIMEOUT: Duration = Duration::from_secs(5);

struct Harness {
    engine: TorrentEngine,
    stub: StubSession,
    events: EventBus,
    store: Arc<RecordStore>,
}

fn build(root: &Path) -> Result<Harness> {
    let store = Arc::new(RecordStore::new(root.join("records")));
    let events = EventBus::with_capacity(256);
    let stub = StubSession::new();
    let settings = TorrentSettings {
        download_path: root.join("downloads"),
        ..TorrentSettings::default()
    };
    let engine = TorrentEngine::with_session(
        settings,
        store.clone(),
        events.clone(),
        Arc::new(stub.clone()),
    )?;
    Ok(Harness {
        engine,
        stub,
        events,
        store,
    })
}

async fn wait_for<F>(stream: &mut EventStream, mut matches: F) -> Event
where
    F: FnMut(&Event) -> bool,
{
    tokio::time::timeout(EVENT_TIMEOUT, async {
        loop {
            let envelope = stream.next().await.expect("event bus closed");
            if matches(&envelope.event) {
                return envelope.event;
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

fn payload_file(root: &Path, name: &str, len: usize) -> Result<PathBuf> {
    let path = root.join(name);
    std::fs::write(&path, vec![0xC3_u8; len])?;
    Ok(path)
}

fn small_metainfo(root: &Path) -> Result<Vec<u8>> {
    let path = payload_file(root, "payload.bin", 4_096)?;
    Ok(TorrentBuilder::new(path)
        .tracker("udp://tracker.invalid:6969")
        .build()?)
}

#[tokio::test]
async fn add_magnet_resolves_and_announces() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let harness = build(dir.path())?;
    let mut stream = harness.events.subscribe(None);

    let info_hash = harness.engine.add_magnet(MAGNET, None, None).await?;
    assert_eq!(info_hash.to_string(), MAGNET_HASH);

    let event = wait_for(&mut stream, |event| {
        matches!(event, Event::TorrentAdded { .. })
    })
    .await;
    let Event::TorrentAdded {
        info_hash: announced,
        name,
    } = event
    else {
        unreachable!("filtered by wait_for");
    };
    assert_eq!(announced, info_hash);
    assert_eq!(name, "demo");
    assert!(harness.engine.has(&info_hash));

    wait_for(&mut stream, |event| {
        matches!(
            event,
            Event::TorrentStateChanged {
                new: TorrentState::DownloadingMetadata,
                ..
            }
        )
    })
    .await;
    assert_eq!(
        harness.engine.status_of(&info_hash)?.state,
        TorrentState::DownloadingMetadata
    );
    Ok(())
}

#[tokio::test]
async fn duplicate_add_is_rejected_without_events() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let harness = build(dir.path())?;
    let mut stream = harness.events.subscribe(None);

    let info_hash = harness.engine.add_magnet(MAGNET, None, None).await?;
    wait_for(&mut stream, |event| {
        matches!(event, Event::TorrentAdded { .. })
    })
    .await;

    let duplicate = harness.engine.add_magnet(MAGNET, None, None).await;
    assert_eq!(duplicate, Err(TorrentError::DuplicateTorrent));
    assert_eq!(harness.engine.list_info_hashes(), vec![info_hash]);

    // No second materialisation may surface.
    let extra_added = tokio::time::timeout(Duration::from_millis(400), async {
        loop {
            let envelope = stream.next().await.expect("event bus closed");
            if matches!(envelope.event, Event::TorrentAdded { .. }) {
                return envelope.event;
            }
        }
    })
    .await;
    assert!(extra_added.is_err(), "duplicate add must not emit events");
    Ok(())
}

#[tokio::test]
async fn pause_and_resume_restore_prior_state() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let harness = build(dir.path())?;
    let mut stream = harness.events.subscribe(None);

    let info_hash = harness.engine.add_magnet(MAGNET, None, None).await?;
    wait_for(&mut stream, |event| {
        matches!(
            event,
            Event::TorrentStateChanged {
                new: TorrentState::DownloadingMetadata,
                ..
            }
        )
    })
    .await;

    harness.engine.pause(&info_hash)?;
    wait_for(&mut stream, |event| {
        matches!(
            event,
            Event::TorrentStateChanged {
                new: TorrentState::Paused,
                ..
            }
        )
    })
    .await;
    let status = harness.engine.status_of(&info_hash)?;
    assert!(status.paused);
    assert_eq!(status.state, TorrentState::Paused);

    harness.engine.resume(&info_hash)?;
    let event = wait_for(&mut stream, |event| {
        matches!(
            event,
            Event::TorrentStateChanged {
                old: TorrentState::Paused,
                ..
            }
        )
    })
    .await;
    let Event::TorrentStateChanged { new, .. } = event else {
        unreachable!("filtered by wait_for");
    };
    assert_eq!(new, TorrentState::DownloadingMetadata);

    let status = harness.engine.status_of(&info_hash)?;
    assert!(!status.paused);
    assert_eq!(status.state, TorrentState::DownloadingMetadata);
    Ok(())
}

#[tokio::test]
async fn remove_erases_entry_record_and_announces() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let harness = build(dir.path())?;
    let mut stream = harness.events.subscribe(None);

    let info_hash = harness.engine.add_magnet(MAGNET, None, None).await?;
    wait_for(&mut stream, |event| {
        matches!(event, Event::TorrentAdded { .. })
    })
    .await;
    assert!(harness.store.get_record(&info_hash).await?.is_some());

    harness.engine.remove(&info_hash, false)?;
    assert!(!harness.engine.has(&info_hash));

    wait_for(&mut stream, |event| {
        matches!(event, Event::TorrentRemoved { .. })
    })
    .await;
    assert!(harness.store.get_record(&info_hash).await?.is_none());
    Ok(())
}

#[tokio::test]
async fn remove_unknown_torrent_is_not_found_and_silent() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let harness = build(dir.path())?;

    let unknown: InfoHash = MAGNET_HASH.parse()?;
    assert_eq!(
        harness.engine.remove(&unknown, false),
        Err(TorrentError::TorrentNotFound)
    );
    assert!(harness.events.last_event_id().is_none());
    Ok(())
}

#[tokio::test]
async fn created_torrent_parses_back_to_its_source() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let harness = build(dir.path())?;

    let source = payload_file(dir.path(), "movie.bin", 1_048_576)?;
    let bytes = harness
        .engine
        .create_torrent(
            &source,
            vec!["udp://tracker.invalid:6969".into()],
            Some("made for the round trip".into()),
            None,
            false,
        )
        .await?;

    let parsed = Metainfo::parse(&bytes)?;
    assert_eq!(parsed.total_size, 1_048_576);
    assert_eq!(parsed.num_files, 1);
    assert_eq!(parsed.files[0].path, "movie.bin");
    assert_eq!(parsed.trackers, ["udp://tracker.invalid:6969"]);
    Ok(())
}

#[tokio::test]
async fn metainfo_add_checks_free_space() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let harness = build(dir.path())?;

    // Hand-rolled dictionary claiming an impossible payload size.
    let huge = format!(
        "d4:infod6:lengthi{}e4:name4:huge12:piece lengthi16384e6:pieces20:{}ee",
        u64::MAX / 2,
        "a".repeat(20)
    );
    let result = harness
        .engine
        .add_metainfo(huge.as_bytes(), None, None)
        .await;
    assert!(matches!(
        result,
        Err(TorrentError::InsufficientSpace { .. })
    ));
    assert!(harness.engine.list_info_hashes().is_empty());
    Ok(())
}

#[tokio::test]
async fn malformed_inputs_are_rejected() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let harness = build(dir.path())?;

    assert_eq!(
        harness.engine.add_metainfo(&[], None, None).await,
        Err(TorrentError::InvalidTorrentFile)
    );
    assert_eq!(
        harness.engine.add_metainfo(b"4:spam", None, None).await,
        Err(TorrentError::InvalidTorrentFile)
    );
    assert_eq!(
        harness
            .engine
            .add_magnet("magnet:?xt=urn:btih:0123", None, None)
            .await,
        Err(TorrentError::InvalidMagnetLink)
    );
    Ok(())
}

#[tokio::test]
async fn finished_torrent_reports_full_progress() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let harness = build(dir.path())?;
    let mut stream = harness.events.subscribe(None);

    let blob = small_metainfo(dir.path())?;
    let info_hash = harness.engine.add_metainfo(&blob, None, None).await?;
    wait_for(&mut stream, |event| {
        matches!(event, Event::TorrentAdded { .. })
    })
    .await;

    harness.stub.complete(info_hash)?;
    wait_for(&mut stream, |event| {
        matches!(event, Event::TorrentFinished { .. })
    })
    .await;

    let status = harness.engine.status_of(&info_hash)?;
    assert!(status.finished);
    assert!((status.progress - 1.0).abs() < f64::EPSILON);

    wait_for(&mut stream, |event| {
        matches!(
            event,
            Event::TorrentStateChanged {
                new: TorrentState::Seeding,
                ..
            }
        )
    })
    .await;
    Ok(())
}

#[tokio::test]
async fn magnet_metadata_materialises_into_the_record() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let harness = build(dir.path())?;
    let mut stream = harness.events.subscribe(None);

    let info_hash = harness.engine.add_magnet(MAGNET, None, None).await?;
    wait_for(&mut stream, |event| {
        matches!(event, Event::TorrentAdded { .. })
    })
    .await;
    let record = harness
        .store
        .get_record(&info_hash)
        .await?
        .expect("record persisted");
    assert!(record.metainfo.is_none());
    assert!(record.magnet_uri.is_some());

    let blob = small_metainfo(dir.path())?;
    harness.stub.provide_metadata(info_hash, &blob)?;
    wait_for(&mut stream, |event| {
        matches!(
            event,
            Event::TorrentStateChanged {
                new: TorrentState::Downloading,
                ..
            }
        )
    })
    .await;

    let record = harness
        .store
        .get_record(&info_hash)
        .await?
        .expect("record persisted");
    assert!(record.metainfo.is_some());
    assert_eq!(record.total_size, 4_096);
    assert_eq!(record.files, vec!["payload.bin".to_owned()]);
    Ok(())
}

#[tokio::test]
async fn tracker_failures_surface_as_events_and_status_text() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let harness = build(dir.path())?;
    let mut stream = harness.events.subscribe(None);

    let info_hash = harness.engine.add_magnet(MAGNET, None, None).await?;
    wait_for(&mut stream, |event| {
        matches!(event, Event::TorrentAdded { .. })
    })
    .await;

    harness
        .stub
        .tracker_error(info_hash, "udp://tracker.invalid:6969", "announce refused")?;
    let event = wait_for(&mut stream, |event| {
        matches!(event, Event::TrackerError { .. })
    })
    .await;
    let Event::TrackerError {
        tracker, message, ..
    } = event
    else {
        unreachable!("filtered by wait_for");
    };
    assert_eq!(tracker, "udp://tracker.invalid:6969");
    assert_eq!(message, "announce refused");
    assert_eq!(
        harness.engine.status_of(&info_hash)?.error.as_deref(),
        Some("announce refused")
    );
    Ok(())
}

#[tokio::test]
async fn session_stats_merge_engine_counters() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let harness = build(dir.path())?;
    let mut stream = harness.events.subscribe(None);

    harness.stub.set_counters(eddy_torrent_engine::StatsCounters {
        total_payload_download: 8_192,
        total_payload_upload: 4_096,
        dht_nodes: 23,
    });

    let stats = loop {
        let event = wait_for(&mut stream, |event| {
            matches!(event, Event::SessionStatsUpdated { .. })
        })
        .await;
        let Event::SessionStatsUpdated { stats } = event else {
            unreachable!("filtered by wait_for");
        };
        if stats.total_downloaded > 0 {
            break stats;
        }
    };
    assert_eq!(stats.total_downloaded, 8_192);
    assert_eq!(stats.total_uploaded, 4_096);
    assert_eq!(stats.dht_nodes, 23);
    assert!((stats.global_ratio - 0.5).abs() < f64::EPSILON);
    Ok(())
}

#[tokio::test]
async fn seed_file_starts_in_seed_mode() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let harness = build(dir.path())?;
    let mut stream = harness.events.subscribe(None);

    let source = payload_file(dir.path(), "seedme.bin", 65_536)?;
    let info_hash = harness.engine.seed_file(&source, None).await?;

    wait_for(&mut stream, |event| {
        matches!(
            event,
            Event::TorrentStateChanged {
                new: TorrentState::Seeding,
                ..
            }
        )
    })
    .await;
    let status = harness.engine.status_of(&info_hash)?;
    assert!(status.seeding);
    assert!((status.progress - 1.0).abs() < f64::EPSILON);
    Ok(())
}

#[tokio::test]
async fn file_priorities_clamp_to_bounds() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let harness = build(dir.path())?;
    let mut stream = harness.events.subscribe(None);

    let blob = small_metainfo(dir.path())?;
    let info_hash = harness.engine.add_metainfo(&blob, None, None).await?;
    wait_for(&mut stream, |event| {
        matches!(event, Event::TorrentAdded { .. })
    })
    .await;

    harness.engine.set_file_priorities(&info_hash, &[99, -4])?;

    // The cached view refreshes at the stats cadence.
    let status = loop {
        wait_for(&mut stream, |event| {
            matches!(event, Event::TorrentProgress { .. })
        })
        .await;
        let status = harness.engine.status_of(&info_hash)?;
        if status.files.first().map(|file| file.priority) == Some(7) {
            break status;
        }
    };
    assert_eq!(status.files.len(), 1);
    assert_eq!(status.files[0].priority, 7);
    Ok(())
}

#[tokio::test]
async fn restart_restores_persisted_torrents() -> Result<()> {
    let dir = tempfile::tempdir()?;

    let blob = small_metainfo(dir.path())?;
    let (metainfo_hash, magnet_hash) = {
        let harness = build(dir.path())?;
        let mut stream = harness.events.subscribe(None);

        let metainfo_hash = harness.engine.add_metainfo(&blob, None, None).await?;
        let magnet_hash = harness.engine.add_magnet(MAGNET, None, None).await?;
        let mut added = 0;
        while added < 2 {
            wait_for(&mut stream, |event| {
                matches!(event, Event::TorrentAdded { .. })
            })
            .await;
            added += 1;
        }
        harness.engine.shutdown().await?;
        (metainfo_hash, magnet_hash)
    };

    let harness = build(dir.path())?;
    let mut stream = harness.events.subscribe(None);
    let restored = harness.engine.restore().await?;
    assert_eq!(restored, 2);

    let mut added = 0;
    while added < 2 {
        wait_for(&mut stream, |event| {
            matches!(event, Event::TorrentAdded { .. })
        })
        .await;
        added += 1;
    }

    let mut hashes = harness.engine.list_info_hashes();
    hashes.sort();
    let mut expected = vec![metainfo_hash, magnet_hash];
    expected.sort();
    assert_eq!(hashes, expected);
    assert_eq!(harness.engine.list_statuses().len(), 2);
    Ok(())
}

#[tokio::test]
async fn shutdown_persists_the_session_blob() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let harness = build(dir.path())?;

    assert!(harness.store.read_session_blob().await?.is_none());
    harness.engine.shutdown().await?;
    assert!(harness.store.read_session_blob().await?.is_some());
    Ok(())
}
