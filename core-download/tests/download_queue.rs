use bridge_traits::storage::SettingsStore;
use bridge_traits::testing::{
    FakeTransferEngine, MemoryFileSystem, MemorySettingsStore, StaticNetworkMonitor,
};
use bridge_traits::transfer::TransferStatus;
use core_download::{
    DownloadConfig, DownloadError, DownloadQueueManager, DownloadStatus, EnqueueOptions,
    EnqueueOutcome, WIFI_ONLY_SETTING,
};
use core_runtime::config::NetworkTimeouts;
use core_runtime::events::{CoreEvent, DownloadEvent, EventBus};
use futures::StreamExt;
use provider_audiobookshelf::testing::{FakeServer, StaticTokenProvider};
use provider_audiobookshelf::{ApiClient, RemoteProgressClient};
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

const DOWNLOAD_DIR: &str = "/data/downloads";

struct Harness {
    server: Arc<FakeServer>,
    engine: Arc<FakeTransferEngine>,
    fs: Arc<MemoryFileSystem>,
    settings: Arc<MemorySettingsStore>,
    events: EventBus,
    manager: DownloadQueueManager,
}

fn harness_with_network(network: Option<Arc<StaticNetworkMonitor>>) -> Harness {
    let server = Arc::new(FakeServer::new());
    let api = ApiClient::new(
        server.clone(),
        FakeServer::BASE_URL,
        Arc::new(StaticTokenProvider::new("tok")),
    );
    let remote = RemoteProgressClient::new(api, NetworkTimeouts::default());
    let engine = Arc::new(FakeTransferEngine::new());
    let fs = Arc::new(MemoryFileSystem::new());
    let settings = Arc::new(MemorySettingsStore::new());
    let events = EventBus::new(128);

    let manager = DownloadQueueManager::new(
        DownloadConfig::new(DOWNLOAD_DIR),
        remote,
        engine.clone(),
        fs.clone(),
        settings.clone(),
        network.map(|n| n as Arc<dyn bridge_traits::NetworkMonitor>),
        events.clone(),
    );
    manager.start();

    Harness {
        server,
        engine,
        fs,
        settings,
        events,
        manager,
    }
}

fn harness() -> Harness {
    harness_with_network(None)
}

fn add_book_with_files(server: &FakeServer, id: &str, sizes: &[u64]) {
    server.add_book(id, &format!("Book {}", id), "Author", &[60.0]);
    let files: Vec<_> = sizes
        .iter()
        .enumerate()
        .map(|(i, size)| json!({"ino": format!("{}", 100 + i), "name": format!("part{:02}.mp3", i + 1), "size": size}))
        .collect();
    server.set_files(id, json!({ "files": files }));
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached");
}

fn book_dir(id: &str) -> PathBuf {
    Path::new(DOWNLOAD_DIR).join(id)
}

#[tokio::test]
async fn test_enqueue_creates_one_job_per_file() {
    let h = harness();
    add_book_with_files(&h.server, "li_1", &[100, 200]);
    let mut rx = h.events.subscribe();

    let outcome = h
        .manager
        .enqueue_item_downloads("li_1", EnqueueOptions::default().display_title("Dune"))
        .await
        .unwrap();
    assert_eq!(
        outcome,
        EnqueueOutcome::Enqueued {
            jobs: 2,
            replaced: vec![]
        }
    );

    let requests = h.engine.requests();
    assert_eq!(requests.len(), 2);
    let (_, first) = &requests[0];
    assert_eq!(first.url, "https://abs.test/api/items/li_1/file/100/download");
    assert_eq!(first.headers["Authorization"], "Bearer tok");
    assert_eq!(first.destination, book_dir("li_1").join("part01.mp3"));
    assert_eq!(first.group, "li_1");
    assert_eq!(first.expected_bytes, Some(100));
    assert_eq!(first.display_name.as_deref(), Some("Dune"));

    let progress = h.manager.get_quick_progress("li_1");
    assert_eq!(progress.status, DownloadStatus::Queued);
    assert_eq!(progress.total, 2);
    assert!(h.manager.has_active_or_queued());
    assert_eq!(h.manager.list_tracked_item_ids(), vec!["li_1"]);

    assert_eq!(
        rx.recv().await.unwrap(),
        CoreEvent::Download(DownloadEvent::Enqueued {
            book_id: "li_1".to_string(),
            file_count: 2
        })
    );
}

#[tokio::test]
async fn test_same_book_twice_is_a_no_op() {
    let h = harness();
    add_book_with_files(&h.server, "li_1", &[100]);

    h.manager
        .enqueue_item_downloads("li_1", EnqueueOptions::default())
        .await
        .unwrap();
    let again = h
        .manager
        .enqueue_item_downloads("li_1", EnqueueOptions::default())
        .await
        .unwrap();

    assert_eq!(again, EnqueueOutcome::AlreadyActive);
    assert_eq!(h.engine.requests().len(), 1);
}

#[tokio::test]
async fn test_second_book_requires_confirmation() {
    let h = harness();
    add_book_with_files(&h.server, "li_a", &[100]);
    add_book_with_files(&h.server, "li_b", &[100]);

    h.manager
        .enqueue_item_downloads("li_a", EnqueueOptions::default())
        .await
        .unwrap();

    let err = h
        .manager
        .enqueue_item_downloads("li_b", EnqueueOptions::default())
        .await
        .unwrap_err();
    assert!(err.is_admission_conflict());
    match err {
        DownloadError::AdmissionConflict { active } => assert_eq!(active, vec!["li_a"]),
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(h.manager.list_tracked_item_ids(), vec!["li_a"]);

    let outcome = h
        .manager
        .enqueue_item_downloads("li_b", EnqueueOptions::default().confirmed_replace(true))
        .await
        .unwrap();
    assert_eq!(
        outcome,
        EnqueueOutcome::Enqueued {
            jobs: 1,
            replaced: vec!["li_a".to_string()]
        }
    );
    assert_eq!(h.manager.list_tracked_item_ids(), vec!["li_b"]);
    assert_eq!(h.engine.cancelled(), h.engine.ids_for_group("li_a"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_enqueues_admit_one_book() {
    let h = harness();
    add_book_with_files(&h.server, "li_a", &[100]);
    add_book_with_files(&h.server, "li_b", &[100]);

    let a = h.manager.clone();
    let b = h.manager.clone();
    let (ra, rb) = tokio::join!(
        tokio::spawn(async move { a.enqueue_item_downloads("li_a", EnqueueOptions::default()).await }),
        tokio::spawn(async move { b.enqueue_item_downloads("li_b", EnqueueOptions::default()).await }),
    );
    let results = [ra.unwrap(), rb.unwrap()];

    let admitted = results.iter().filter(|r| r.is_ok()).count();
    let refused = results
        .iter()
        .filter(|r| matches!(r, Err(e) if e.is_admission_conflict()))
        .count();
    assert_eq!((admitted, refused), (1, 1));
    assert_eq!(h.manager.list_tracked_item_ids().len(), 1);
}

#[tokio::test]
async fn test_progress_stream_aggregates_jobs() {
    let h = harness();
    add_book_with_files(&h.server, "li_1", &[100, 100]);
    let mut stream = h.manager.watch_item_progress("li_1");
    assert_eq!(stream.next().await.unwrap().status, DownloadStatus::None);

    h.manager
        .enqueue_item_downloads("li_1", EnqueueOptions::default())
        .await
        .unwrap();
    let jobs = h.engine.ids_for_group("li_1");

    h.engine.progress(&jobs[0], 50, 100);
    wait_until(|| h.manager.get_quick_progress("li_1").status == DownloadStatus::Running).await;
    let running = h.manager.get_quick_progress("li_1");
    assert!((running.progress - 0.25).abs() < 1e-9);

    h.engine.complete(&jobs[0]);
    h.engine.complete(&jobs[1]);
    wait_until(|| h.manager.get_quick_progress("li_1").status == DownloadStatus::Complete).await;

    let mut last = None;
    while let Some(progress) = tokio::time::timeout(Duration::from_millis(50), stream.next())
        .await
        .ok()
        .flatten()
    {
        last = Some(progress);
    }
    let last = last.unwrap();
    assert_eq!(last.status, DownloadStatus::Complete);
    assert_eq!((last.completed, last.total), (2, 2));
    assert!(!h.manager.has_active_or_queued());

    let again = h
        .manager
        .enqueue_item_downloads("li_1", EnqueueOptions::default())
        .await
        .unwrap();
    assert_eq!(again, EnqueueOutcome::AlreadyComplete);
}

#[tokio::test]
async fn test_failed_job_marks_book_as_error_and_can_retry() {
    let h = harness();
    add_book_with_files(&h.server, "li_1", &[100, 100]);
    let mut rx = h.events.subscribe();

    h.manager
        .enqueue_item_downloads("li_1", EnqueueOptions::default())
        .await
        .unwrap();
    let jobs = h.engine.ids_for_group("li_1");
    h.engine.fail(&jobs[1], "HTTP 500");
    wait_until(|| h.manager.get_quick_progress("li_1").status == DownloadStatus::Error).await;

    let mut failed = None;
    while let Ok(event) = rx.try_recv() {
        if let CoreEvent::Download(DownloadEvent::Failed { message, .. }) = event {
            failed = Some(message);
        }
    }
    assert_eq!(failed.as_deref(), Some("HTTP 500"));
    assert!(!h.manager.has_active_or_queued());

    let retry = h
        .manager
        .enqueue_item_downloads("li_1", EnqueueOptions::default())
        .await
        .unwrap();
    assert!(matches!(retry, EnqueueOutcome::Enqueued { jobs: 2, .. }));
    assert_eq!(h.engine.cancelled(), vec![jobs[0].clone()]);
    assert_eq!(
        h.manager.get_quick_progress("li_1").status,
        DownloadStatus::Queued
    );
}

#[tokio::test]
async fn test_cancel_signals_jobs_and_removes_files() {
    let h = harness();
    add_book_with_files(&h.server, "li_1", &[100, 100]);
    h.manager
        .enqueue_item_downloads("li_1", EnqueueOptions::default())
        .await
        .unwrap();
    let jobs = h.engine.ids_for_group("li_1");
    h.engine.progress(&jobs[0], 10, 100);

    assert!(h.manager.cancel_for_item("li_1").await);
    for job in &jobs {
        assert_eq!(h.engine.status(job), Some(TransferStatus::Canceled));
    }
    assert_eq!(h.manager.get_quick_progress("li_1").status, DownloadStatus::None);
    assert!(h.manager.list_tracked_item_ids().is_empty());

    wait_until(|| h.fs.deleted().contains(&book_dir("li_1"))).await;
    assert!(!h.manager.cancel_for_item("li_1").await);
}

#[tokio::test]
async fn test_cancel_all_clears_queue() {
    let h = harness();
    add_book_with_files(&h.server, "li_1", &[100]);
    h.manager
        .enqueue_item_downloads("li_1", EnqueueOptions::default())
        .await
        .unwrap();

    assert_eq!(h.manager.cancel_all().await, vec!["li_1"]);
    assert!(!h.manager.has_active_or_queued());
}

#[tokio::test]
async fn test_cancel_keeps_finished_downloads() {
    let h = harness();
    add_book_with_files(&h.server, "li_1", &[100]);
    add_book_with_files(&h.server, "li_2", &[100]);
    h.manager
        .enqueue_item_downloads("li_1", EnqueueOptions::default())
        .await
        .unwrap();
    let job = h.engine.ids_for_group("li_1").remove(0);
    h.engine.complete(&job);
    wait_until(|| h.manager.get_quick_progress("li_1").status == DownloadStatus::Complete).await;

    h.manager
        .enqueue_item_downloads("li_2", EnqueueOptions::default())
        .await
        .unwrap();

    assert_eq!(h.manager.cancel_all().await, vec!["li_2"]);
    assert!(!h.manager.cancel_for_item("li_1").await);
    wait_until(|| h.fs.deleted().contains(&book_dir("li_2"))).await;

    assert!(!h.fs.deleted().contains(&book_dir("li_1")));
    assert_eq!(
        h.manager.get_quick_progress("li_1").status,
        DownloadStatus::Complete
    );
    assert_eq!(h.manager.list_tracked_item_ids(), vec!["li_1"]);
}

#[tokio::test]
async fn test_delete_local_refuses_active_download() {
    let h = harness();
    add_book_with_files(&h.server, "li_1", &[100]);
    h.manager
        .enqueue_item_downloads("li_1", EnqueueOptions::default())
        .await
        .unwrap();

    let err = h.manager.delete_local("li_1").await.unwrap_err();
    assert!(matches!(err, DownloadError::StillActive { .. }));

    let job = h.engine.ids_for_group("li_1").remove(0);
    h.engine.complete(&job);
    wait_until(|| h.manager.get_quick_progress("li_1").status == DownloadStatus::Complete).await;

    h.manager.delete_local("li_1").await.unwrap();
    assert!(h.fs.deleted().contains(&book_dir("li_1")));
    assert!(h.manager.list_tracked_item_ids().is_empty());
    assert!(h.engine.cancelled().is_empty());
}

#[tokio::test]
async fn test_enqueue_failure_rolls_back_created_jobs() {
    let h = harness();
    add_book_with_files(&h.server, "li_1", &[100, 100, 100]);
    h.engine.fail_enqueue_after(Some(1));

    let err = h
        .manager
        .enqueue_item_downloads("li_1", EnqueueOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, DownloadError::Bridge(_)));
    assert_eq!(h.engine.cancelled().len(), 1);
    assert!(h.manager.list_tracked_item_ids().is_empty());
}

#[tokio::test]
async fn test_book_without_files_is_rejected() {
    let h = harness();
    h.server.add_book("li_1", "Dune", "Frank Herbert", &[60.0]);

    let err = h
        .manager
        .enqueue_item_downloads("li_1", EnqueueOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, DownloadError::NoFiles { .. }));
    assert!(!h.manager.has_active_or_queued());
}

#[tokio::test]
async fn test_wifi_only_setting_blocks_cellular() {
    let network = Arc::new(StaticNetworkMonitor::cellular());
    let h = harness_with_network(Some(network.clone()));
    add_book_with_files(&h.server, "li_1", &[100]);
    h.settings.set_bool(WIFI_ONLY_SETTING, true).await.unwrap();

    let err = h
        .manager
        .enqueue_item_downloads("li_1", EnqueueOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, DownloadError::WifiRequired));
    assert!(h.engine.requests().is_empty());

    h.settings.set_bool(WIFI_ONLY_SETTING, false).await.unwrap();
    assert!(h
        .manager
        .enqueue_item_downloads("li_1", EnqueueOptions::default())
        .await
        .is_ok());
}

#[tokio::test]
async fn test_restore_rehydrates_from_engine() {
    let h = harness();
    h.engine
        .seed("li_1", TransferStatus::Complete, book_dir("li_1").join("a.mp3"));
    h.engine
        .seed("li_1", TransferStatus::Running, book_dir("li_1").join("b.mp3"));
    h.engine
        .seed("li_2", TransferStatus::Canceled, book_dir("li_2").join("a.mp3"));

    assert_eq!(h.manager.restore().await.unwrap(), 1);
    assert_eq!(h.manager.list_tracked_item_ids(), vec!["li_1"]);

    let progress = h.manager.get_quick_progress("li_1");
    assert_eq!(progress.status, DownloadStatus::Running);
    assert_eq!((progress.completed, progress.total), (1, 2));

    let job = h.engine.ids_for_group("li_1")[1].clone();
    h.engine.complete(&job);
    wait_until(|| h.manager.get_quick_progress("li_1").status == DownloadStatus::Complete).await;
}
