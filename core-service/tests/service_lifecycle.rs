use bridge_traits::storage::SettingsStore;
use bridge_traits::testing::{
    FakeAudioEngine, FakeTransferEngine, MemoryFileSystem, MemorySecureStore, MemorySettingsStore,
};
use bridge_traits::time::ManualClock;
use chrono::Utc;
use core_auth::{AuthTokens, SessionStatus};
use core_download::{EnqueueOptions, EnqueueOutcome};
use core_library::SyncOutcome;
use core_playback::LAST_PLAYED_SETTING;
use core_runtime::config::CoreConfig;
use core_service::CoreService;
use provider_audiobookshelf::testing::FakeServer;
use serde_json::json;
use std::sync::Arc;

struct Harness {
    server: Arc<FakeServer>,
    secure: Arc<MemorySecureStore>,
    settings: Arc<MemorySettingsStore>,
    clock: Arc<ManualClock>,
    core: CoreService,
}

async fn harness() -> Harness {
    let server = Arc::new(FakeServer::new());
    let secure = Arc::new(MemorySecureStore::new());
    let settings = Arc::new(MemorySettingsStore::new());
    let clock = Arc::new(ManualClock::new(Utc::now()));

    let config = CoreConfig::builder()
        .server_url(FakeServer::BASE_URL)
        .database_path(":memory:")
        .download_dir("/data/downloads")
        .http_client(server.clone())
        .file_system(Arc::new(MemoryFileSystem::new()))
        .secure_store(secure.clone())
        .settings_store(settings.clone())
        .audio_engine(Arc::new(FakeAudioEngine::new()))
        .transfer_engine(Arc::new(FakeTransferEngine::new()))
        .clock(clock.clone())
        .build()
        .unwrap();

    let core = CoreService::new(config).await.unwrap();
    Harness {
        server,
        secure,
        settings,
        clock,
        core,
    }
}

async fn sign_in(h: &Harness) {
    h.core
        .auth()
        .sign_in_with_tokens(AuthTokens::new("tok", "usr_1"))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_bootstrap_fills_library() {
    let h = harness().await;
    h.server.add_book("li_1", "Dune", "Frank Herbert", &[1800.0, 1500.0]);
    h.server.add_book("li_2", "Emma", "Jane Austen", &[600.0]);
    h.server.add_book("li_3", "Ubik", "Philip K. Dick", &[900.0]);
    sign_in(&h).await;

    let outcome = h.core.bootstrap_after_login().await.unwrap();

    assert_eq!(outcome, SyncOutcome::Completed { books: 3 });
    assert_eq!(h.core.library().count().await.unwrap(), 3);
}

#[tokio::test]
async fn test_sign_out_clears_user_state() {
    let h = harness().await;
    h.server.add_book("li_1", "Dune", "Frank Herbert", &[1800.0, 1500.0]);
    h.server.add_book("li_2", "Emma", "Jane Austen", &[600.0]);
    h.server.set_files(
        "li_2",
        json!({"files": [{"ino": "100", "name": "part01.mp3", "size": 4096}]}),
    );
    sign_in(&h).await;
    h.core.bootstrap_after_login().await.unwrap();

    h.core.playback().play_item("li_1").await.unwrap();
    let outcome = h
        .core
        .downloads()
        .enqueue_item_downloads("li_2", EnqueueOptions::default())
        .await
        .unwrap();
    assert!(matches!(outcome, EnqueueOutcome::Enqueued { jobs: 1, .. }));
    assert_eq!(h.server.open_session_count(), 1);

    h.core.sign_out().await.unwrap();

    assert!(h.core.downloads().list_tracked_item_ids().is_empty());
    assert!(h.core.playback().now_playing().is_none());
    assert_eq!(h.server.open_session_count(), 0);
    assert_eq!(h.core.library().count().await.unwrap(), 0);
    assert!(h.core.auth().current_tokens().await.is_none());
    assert!(h.secure.is_empty());
    assert_eq!(h.settings.get_string(LAST_PLAYED_SETTING).await.unwrap(), None);
}

#[tokio::test]
async fn test_unreachable_server_keeps_session() {
    let h = harness().await;
    sign_in(&h).await;
    assert_eq!(h.core.validate_session().await, SessionStatus::Valid);

    h.clock.advance(chrono::Duration::minutes(10));
    h.server.set_offline(true);

    assert_eq!(h.core.validate_session().await, SessionStatus::Stale);
    assert!(h.core.auth().current_tokens().await.is_some());
}

#[tokio::test]
async fn test_rejected_session_clears_library() {
    let h = harness().await;
    h.server.add_book("li_1", "Dune", "Frank Herbert", &[1800.0]);
    sign_in(&h).await;
    h.core.bootstrap_after_login().await.unwrap();

    h.clock.advance(chrono::Duration::minutes(10));
    h.server.set_rejected(true);

    assert_eq!(h.core.validate_session().await, SessionStatus::Invalid);
    assert!(h.core.auth().current_tokens().await.is_none());
    assert_eq!(h.core.library().count().await.unwrap(), 0);
}

#[tokio::test]
async fn test_restore_state_warm_loads_without_playing() {
    let h = harness().await;
    h.server.add_book("li_1", "Dune", "Frank Herbert", &[1800.0]);
    sign_in(&h).await;
    h.settings.set_string(LAST_PLAYED_SETTING, "li_1").await.unwrap();

    h.core.restore_state().await;

    let now_playing = h.core.playback().now_playing().unwrap();
    assert_eq!(now_playing.book_id, "li_1");
    assert!(!now_playing.state.is_playing());
}
