//! WAL behavior: flush triggers, truncation, crash recovery, and corruption
//! handling.

mod common;

use burrow_store::{BurrowError, Config, Database, Store};
use common::{user, TestUser};
use std::path::Path;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn wal_size(path: &Path) -> u64 {
    std::fs::metadata(path).map(|m| m.len()).unwrap_or(0)
}

/// Config that never flushes on its own.
fn manual_flush_config() -> Config {
    Config {
        wal_flush_interval: Duration::from_secs(3600),
        max_buffer_bytes: 100 * 1024 * 1024,
        ..Default::default()
    }
}

/// Waits until the WAL at `path` is empty, or panics after ~2s.
async fn wait_for_empty_wal(path: &Path) {
    for _ in 0..200 {
        if wal_size(path) == 0 {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("WAL at {} was not flushed in time", path.display());
}

#[tokio::test]
async fn test_size_triggered_flush() {
    let dir = tempfile::tempdir().unwrap();
    let config = Config {
        wal_flush_interval: Duration::from_secs(3600),
        // Every operation crosses the threshold, so each put signals the
        // flusher and the final flush is guaranteed.
        max_buffer_bytes: 1,
        ..Default::default()
    };
    let db = Database::open_with_config(dir.path().join("test.db"), config)
        .await
        .unwrap();
    let store: Store<TestUser> = Store::new(&db, "users").unwrap();
    let ctx = CancellationToken::new();

    for i in 0..10 {
        store
            .put(
                &ctx,
                &user(
                    &format!("user{}", i),
                    &format!("Name{}", i),
                    &format!("email{}@example.com", i),
                    i,
                ),
            )
            .await
            .unwrap();
    }

    wait_for_empty_wal(db.wal_path()).await;

    let retrieved = store.get(&ctx, "user0").await.unwrap();
    assert_eq!(retrieved.name, "Name0");

    db.close().await.unwrap();
}

#[tokio::test]
async fn test_interval_triggered_flush() {
    let dir = tempfile::tempdir().unwrap();
    let config = Config {
        wal_flush_interval: Duration::from_millis(50),
        max_buffer_bytes: 100 * 1024 * 1024,
        ..Default::default()
    };
    let db = Database::open_with_config(dir.path().join("test.db"), config)
        .await
        .unwrap();
    let store: Store<TestUser> = Store::new(&db, "users").unwrap();
    let ctx = CancellationToken::new();

    store
        .put(&ctx, &user("key1", "John", "john@example.com", 28))
        .await
        .unwrap();
    assert!(wal_size(db.wal_path()) > 0);

    wait_for_empty_wal(db.wal_path()).await;

    let retrieved = store.get(&ctx, "key1").await.unwrap();
    assert_eq!(retrieved.name, "John");

    db.close().await.unwrap();
}

#[tokio::test]
async fn test_wal_truncation_after_flush() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("test.db");
    let db = Database::open_with_config(&db_path, manual_flush_config())
        .await
        .unwrap();
    let store: Store<TestUser> = Store::new(&db, "users").unwrap();
    let ctx = CancellationToken::new();

    for i in 0..10 {
        store
            .put(
                &ctx,
                &user(&format!("user{}", i), "TruncationTest", "t@example.com", i),
            )
            .await
            .unwrap();
    }
    assert!(wal_size(db.wal_path()) > 0, "WAL should grow before flush");

    db.flush().await;
    assert_eq!(wal_size(db.wal_path()), 0, "flush of everything empties the WAL");

    for i in 10..15 {
        store
            .put(
                &ctx,
                &user(&format!("user{}", i), "TruncationTest", "t@example.com", i),
            )
            .await
            .unwrap();
    }
    assert!(wal_size(db.wal_path()) > 0, "new operations regrow the WAL");

    db.flush().await;
    assert_eq!(wal_size(db.wal_path()), 0);

    db.close().await.unwrap();

    // Everything must survive a clean reopen.
    let db = Database::open_with_config(&db_path, manual_flush_config())
        .await
        .unwrap();
    let store: Store<TestUser> = Store::new(&db, "users").unwrap();
    for i in 0..15 {
        let retrieved = store.get(&ctx, &format!("user{}", i)).await.unwrap();
        assert_eq!(retrieved.name, "TruncationTest");
    }
    db.close().await.unwrap();
}

#[tokio::test]
async fn test_recovery_after_crash() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("test.db");

    {
        let db = Database::open_with_config(&db_path, manual_flush_config())
            .await
            .unwrap();
        let store: Store<TestUser> = Store::new(&db, "users").unwrap();
        let ctx = CancellationToken::new();
        for i in 0..50 {
            store
                .put(
                    &ctx,
                    &user(&format!("user{}", i), "CrashTest", "crash@example.com", i),
                )
                .await
                .unwrap();
        }
        // Dropped without close: nothing was flushed, only logged.
    }

    let db = Database::open_with_config(&db_path, manual_flush_config())
        .await
        .unwrap();
    let store: Store<TestUser> = Store::new(&db, "users").unwrap();
    let ctx = CancellationToken::new();
    for i in 0..50 {
        let retrieved = store.get(&ctx, &format!("user{}", i)).await.unwrap();
        assert_eq!(retrieved.name, "CrashTest");
    }

    // Replay consumed the WAL.
    assert_eq!(wal_size(db.wal_path()), 0);

    db.close().await.unwrap();
}

#[tokio::test]
async fn test_recovery_preserves_latest_write_per_key() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("test.db");

    {
        let db = Database::open_with_config(&db_path, manual_flush_config())
            .await
            .unwrap();
        let store: Store<TestUser> = Store::new(&db, "users").unwrap();
        let ctx = CancellationToken::new();
        store
            .put(&ctx, &user("key1", "First", "f@example.com", 1))
            .await
            .unwrap();
        store
            .put(&ctx, &user("key1", "Second", "s@example.com", 2))
            .await
            .unwrap();
        store.delete(&ctx, "key2").await.unwrap();
        store
            .put(&ctx, &user("key2", "Reborn", "r@example.com", 3))
            .await
            .unwrap();
    }

    let db = Database::open_with_config(&db_path, manual_flush_config())
        .await
        .unwrap();
    let store: Store<TestUser> = Store::new(&db, "users").unwrap();
    let ctx = CancellationToken::new();

    // The WAL holds the full history; replay applies it in order, so the
    // last write per key wins.
    assert_eq!(store.get(&ctx, "key1").await.unwrap().name, "Second");
    assert_eq!(store.get(&ctx, "key2").await.unwrap().name, "Reborn");

    db.close().await.unwrap();
}

#[tokio::test]
async fn test_truncated_wal_discarded_on_open() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("test.db");
    let wal_path;

    {
        let db = Database::open_with_config(&db_path, manual_flush_config())
            .await
            .unwrap();
        let store: Store<TestUser> = Store::new(&db, "users").unwrap();
        let ctx = CancellationToken::new();

        store
            .put(&ctx, &user("flushed", "Test", "test@example.com", 25))
            .await
            .unwrap();
        db.flush().await;

        store
            .put(&ctx, &user("pending", "Pending", "p@example.com", 30))
            .await
            .unwrap();
        wal_path = db.wal_path().to_path_buf();
        // Dropped without close; "pending" exists only in the WAL.
    }

    // Corrupt the WAL by cutting it short.
    let data = std::fs::read(&wal_path).unwrap();
    std::fs::write(&wal_path, &data[..10.min(data.len())]).unwrap();

    let db = Database::open_with_config(&db_path, manual_flush_config())
        .await
        .unwrap();
    let store: Store<TestUser> = Store::new(&db, "users").unwrap();
    let ctx = CancellationToken::new();

    // The flushed record is intact; the corrupt WAL was discarded.
    assert_eq!(store.get(&ctx, "flushed").await.unwrap().name, "Test");
    assert!(store.get(&ctx, "pending").await.is_err());

    db.close().await.unwrap();
}

#[tokio::test]
async fn test_checksum_corruption_discards_unflushed_tail() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("test.db");
    let wal_path;

    {
        let db = Database::open_with_config(&db_path, manual_flush_config())
            .await
            .unwrap();
        let store: Store<TestUser> = Store::new(&db, "users").unwrap();
        let ctx = CancellationToken::new();

        store
            .put(&ctx, &user("flushed", "Kept", "kept@example.com", 1))
            .await
            .unwrap();
        db.flush().await;
        assert_eq!(wal_size(db.wal_path()), 0);

        store
            .put(&ctx, &user("unflushed", "Lost", "lost@example.com", 2))
            .await
            .unwrap();
        wal_path = db.wal_path().to_path_buf();
    }

    // Flip one byte in the CRC region: the checksum is the trailing field of
    // the frame, so the last byte of the file sits inside it.
    let mut data = std::fs::read(&wal_path).unwrap();
    assert!(!data.is_empty());
    let last = data.len() - 1;
    data[last] ^= 0x01;
    std::fs::write(&wal_path, &data).unwrap();

    let db = Database::open_with_config(&db_path, manual_flush_config())
        .await
        .unwrap();
    let store: Store<TestUser> = Store::new(&db, "users").unwrap();
    let ctx = CancellationToken::new();

    assert_eq!(store.get(&ctx, "flushed").await.unwrap().name, "Kept");
    let err = store.get(&ctx, "unflushed").await.unwrap_err();
    assert!(matches!(err, BurrowError::KeyNotFound { .. }));

    db.close().await.unwrap();
}

#[tokio::test]
async fn test_close_flushes_pending_operations() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("test.db");

    {
        let db = Database::open_with_config(&db_path, manual_flush_config())
            .await
            .unwrap();
        let store: Store<TestUser> = Store::new(&db, "users").unwrap();
        let ctx = CancellationToken::new();
        store
            .put(&ctx, &user("key1", "John", "john@example.com", 28))
            .await
            .unwrap();
        db.close().await.unwrap();
    }

    let db = Database::open_with_config(&db_path, manual_flush_config())
        .await
        .unwrap();
    let store: Store<TestUser> = Store::new(&db, "users").unwrap();
    let ctx = CancellationToken::new();
    assert_eq!(store.get(&ctx, "key1").await.unwrap().name, "John");

    db.close().await.unwrap();
}

#[tokio::test]
async fn test_flush_with_empty_buffer_is_noop() {
    let dir = tempfile::tempdir().unwrap();
    let db = Database::open_with_config(dir.path().join("test.db"), manual_flush_config())
        .await
        .unwrap();
    let store: Store<TestUser> = Store::new(&db, "users").unwrap();
    let ctx = CancellationToken::new();

    store
        .put(&ctx, &user("key1", "John", "john@example.com", 28))
        .await
        .unwrap();

    db.flush().await;
    db.flush().await;
    db.flush().await;

    assert_eq!(store.get(&ctx, "key1").await.unwrap().name, "John");
    assert_eq!(wal_size(db.wal_path()), 0);

    db.close().await.unwrap();
}

#[tokio::test]
async fn test_invalid_config_rejected() {
    let dir = tempfile::tempdir().unwrap();

    let config = Config {
        wal_flush_size: 0,
        ..Default::default()
    };
    let err = Database::open_with_config(dir.path().join("a.db"), config)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        BurrowError::ConfigInvalid {
            field: "wal_flush_size",
            ..
        }
    ));

    let config = Config {
        wal_flush_interval: Duration::ZERO,
        ..Default::default()
    };
    let err = Database::open_with_config(dir.path().join("b.db"), config)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        BurrowError::ConfigInvalid {
            field: "wal_flush_interval",
            ..
        }
    ));
}

#[tokio::test]
async fn test_custom_wal_path() {
    let dir = tempfile::tempdir().unwrap();
    let wal_path = dir.path().join("custom.log");
    let config = Config {
        wal_path: Some(wal_path.clone()),
        ..manual_flush_config()
    };
    let db = Database::open_with_config(dir.path().join("test.db"), config)
        .await
        .unwrap();
    let store: Store<TestUser> = Store::new(&db, "users").unwrap();
    let ctx = CancellationToken::new();

    store
        .put(&ctx, &user("key1", "John", "john@example.com", 28))
        .await
        .unwrap();
    assert!(wal_size(&wal_path) > 0);
    assert_eq!(db.wal_path(), wal_path.as_path());

    db.close().await.unwrap();
}

#[tokio::test]
async fn test_sync_on_write() {
    let dir = tempfile::tempdir().unwrap();
    let config = Config {
        sync_on_write: true,
        ..manual_flush_config()
    };
    let db = Database::open_with_config(dir.path().join("test.db"), config)
        .await
        .unwrap();
    let store: Store<TestUser> = Store::new(&db, "users").unwrap();
    let ctx = CancellationToken::new();

    store
        .put(&ctx, &user("key1", "John", "john@example.com", 28))
        .await
        .unwrap();
    assert!(wal_size(db.wal_path()) > 0);

    db.close().await.unwrap();
}

#[tokio::test]
async fn test_index_consistency_after_recovery() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("test.db");

    {
        let db = Database::open_with_config(&db_path, manual_flush_config())
            .await
            .unwrap();
        let store: Store<TestUser> = Store::new(&db, "users").unwrap();
        let ctx = CancellationToken::new();
        store
            .put(&ctx, &user("u1", "Alice", "alice@example.com", 30))
            .await
            .unwrap();
        store
            .put(&ctx, &user("u2", "Bob", "bob@example.com", 25))
            .await
            .unwrap();
        // Rename u1 while everything is still only in the WAL.
        store
            .put(&ctx, &user("u1", "Alicia", "alice@example.com", 30))
            .await
            .unwrap();
    }

    let db = Database::open_with_config(&db_path, manual_flush_config())
        .await
        .unwrap();
    let store: Store<TestUser> = Store::new(&db, "users").unwrap();
    let ctx = CancellationToken::new();

    let query = |name: &str| burrow_store::Query {
        conditions: vec![burrow_store::Condition::equals("Name", name)],
        ..Default::default()
    };
    assert_eq!(store.query(&ctx, &query("Alice")).await.unwrap().len(), 0);
    assert_eq!(store.query(&ctx, &query("Alicia")).await.unwrap().len(), 1);
    assert_eq!(store.query(&ctx, &query("Bob")).await.unwrap().len(), 1);

    db.close().await.unwrap();
}
