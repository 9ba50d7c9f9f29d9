use bridge_traits::time::SystemClock;
use core_library::{
    create_test_pool, Book, LibraryError, LocalLibraryCache, SqliteBookRepository, SyncOptions,
    SyncOutcome,
};
use core_runtime::config::NetworkTimeouts;
use core_runtime::events::{CoreEvent, EventBus, LibraryEvent};
use futures::StreamExt;
use provider_audiobookshelf::testing::{FakeServer, StaticTokenProvider};
use provider_audiobookshelf::{ApiClient, RemoteError, RemoteProgressClient};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

async fn setup() -> (Arc<FakeServer>, LocalLibraryCache, EventBus) {
    let server = Arc::new(FakeServer::new());
    let api = ApiClient::new(
        server.clone(),
        FakeServer::BASE_URL,
        Arc::new(StaticTokenProvider::new("tok")),
    );
    let remote = RemoteProgressClient::new(api, NetworkTimeouts::default());
    let repo = Arc::new(SqliteBookRepository::new(create_test_pool().await.unwrap()));
    let events = EventBus::new(64);
    let cache = LocalLibraryCache::new(repo, remote, events.clone(), Arc::new(SystemClock));
    (server, cache, events)
}

#[tokio::test]
async fn test_cached_book_survives_network_failure() {
    let (server, cache, _) = setup().await;
    server.add_book("li_1", "Dune", "Frank Herbert", &[1800.0, 1500.0]);

    let online = cache.get_book("li_1").await.unwrap();
    assert_eq!(online.authors, vec!["Frank Herbert"]);
    assert_eq!(online.duration_ms, Some(3_300_000));

    server.set_offline(true);
    let offline = cache.get_book("li_1").await.unwrap();
    assert_eq!(offline, online);
}

#[tokio::test]
async fn test_uncached_book_offline_is_not_cached() {
    let (server, cache, _) = setup().await;
    server.add_book("li_1", "Dune", "Frank Herbert", &[100.0]);
    server.set_offline(true);

    let err = cache.get_book("li_1").await.unwrap_err();
    assert!(err.is_not_cached());
    match err {
        LibraryError::NotCached { id, cause } => {
            assert_eq!(id, "li_1");
            assert!(matches!(cause, RemoteError::Network(_)));
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn test_rejection_also_falls_back_to_local_copy() {
    let (server, cache, _) = setup().await;
    server.add_book("li_1", "Dune", "Frank Herbert", &[100.0]);
    cache.get_book("li_1").await.unwrap();

    server.set_rejected(true);
    assert_eq!(cache.get_book("li_1").await.unwrap().title, "Dune");
}

#[tokio::test]
async fn test_resolved_duration_is_kept_when_server_omits_it() {
    let (server, cache, _) = setup().await;
    server.add_item(json!({"id": "li_1", "media": {"metadata": {"title": "Dune"}}}));

    let book = cache.get_book("li_1").await.unwrap();
    assert_eq!(book.duration_ms, None);

    assert!(cache.record_duration("li_1", 3_300_000).await.unwrap());
    assert!(!cache.record_duration("li_1", 1).await.unwrap());

    server.update_item("li_1", |item| {
        item["media"]["metadata"]["title"] = json!("Dune (Unabridged)");
    });
    let book = cache.get_book("li_1").await.unwrap();
    assert_eq!(book.title, "Dune (Unabridged)");
    assert_eq!(book.duration_ms, Some(3_300_000));
}

#[tokio::test]
async fn test_upsert_book_notifies_watchers() {
    let (_server, cache, _) = setup().await;
    let mut watcher = cache.watch_book("li_1");
    let mut changes = cache.subscribe_changes();

    let mut book = Book::new("li_1", "Dune");
    book.size_bytes = Some(1024);
    cache.upsert_book(&book).await.unwrap();

    assert_eq!(changes.next().await.unwrap(), vec!["li_1".to_string()]);
    let seen = watcher.next().await.unwrap();
    assert_eq!(seen.size_bytes, Some(1024));
    assert!(cache.get_book_from_db("li_1").await.unwrap().is_some());
}

#[tokio::test]
async fn test_unchanged_read_does_not_notify() {
    let (server, cache, _) = setup().await;
    server.add_book("li_1", "Dune", "Frank Herbert", &[100.0]);
    cache.get_book("li_1").await.unwrap();

    let mut changes = cache.subscribe_changes();
    cache.get_book("li_1").await.unwrap();
    server.add_book("li_2", "Emma", "Jane Austen", &[100.0]);
    cache.get_book("li_2").await.unwrap();

    assert_eq!(changes.next().await.unwrap(), vec!["li_2".to_string()]);
}

#[tokio::test]
async fn test_sync_stores_every_page() {
    let (server, cache, events) = setup().await;
    for i in 0..7 {
        server.add_book(&format!("li_{}", i), &format!("Book {}", i), "Author", &[60.0]);
    }
    let mut rx = events.subscribe();

    let outcome = cache
        .sync_all_books_to_db(SyncOptions::default().page_size(3))
        .await
        .unwrap();

    assert_eq!(outcome, SyncOutcome::Completed { books: 7 });
    assert_eq!(cache.count().await.unwrap(), 7);
    assert_eq!(server.request_count("GET /api/libraries/lib_main/items"), 3);

    let mut completed = false;
    while let Ok(event) = rx.try_recv() {
        if let CoreEvent::Library(LibraryEvent::SyncCompleted { books_synced, .. }) = event {
            assert_eq!(books_synced, 7);
            completed = true;
        }
    }
    assert!(completed);
}

#[tokio::test]
async fn test_slow_sync_reports_partial_progress() {
    let (server, cache, _) = setup().await;
    for i in 0..5 {
        server.add_book(&format!("li_{}", i), &format!("Book {}", i), "Author", &[60.0]);
    }
    server.set_delay(Some(Duration::from_millis(100)));

    let outcome = cache
        .sync_all_books_to_db(
            SyncOptions::default()
                .page_size(1)
                .timeout(Duration::from_millis(250)),
        )
        .await
        .unwrap();

    assert!(!outcome.is_complete());
    assert!(outcome.books() < 5);
    assert!(cache.count().await.unwrap() as u64 >= outcome.books());
}

#[tokio::test]
async fn test_sync_failure_is_an_error() {
    let (server, cache, _) = setup().await;
    server.set_offline(true);

    let err = cache
        .sync_all_books_to_db(SyncOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, LibraryError::Remote(RemoteError::Network(_))));
}

#[tokio::test]
async fn test_clear_removes_everything() {
    let (server, cache, _) = setup().await;
    server.add_book("li_1", "Dune", "Frank Herbert", &[100.0]);
    cache.get_book("li_1").await.unwrap();

    cache.clear().await.unwrap();
    assert_eq!(cache.count().await.unwrap(), 0);

    server.set_offline(true);
    assert!(cache.get_book("li_1").await.unwrap_err().is_not_cached());
}
