// Unit tests for the credential pool.
//
// Every test runs against an in-memory SQLite record store, so rotation
// order, expiry handling and durability are checked end to end without a
// file on disk.

use std::sync::Arc;

use crowdstats::credentials::{now_millis, CredentialPool, PoolError, RECORD_KEY};
use crowdstats::db::{RecordStore, SqliteRecordStore};

const DAY_MS: i64 = 86_400_000;

fn store() -> Arc<dyn RecordStore> {
    Arc::new(SqliteRecordStore::in_memory().unwrap())
}

async fn pool_on(store: Arc<dyn RecordStore>) -> CredentialPool {
    let pool = CredentialPool::new(store);
    pool.load().await.unwrap();
    pool
}

fn future() -> i64 {
    now_millis() + DAY_MS
}

fn past() -> i64 {
    now_millis() - DAY_MS
}

// ============================================================
// Rotation
// ============================================================

#[tokio::test]
async fn get_rotates_round_robin() {
    let pool = pool_on(store()).await;
    pool.put("A", "Alice", future()).await.unwrap();
    pool.put("B", "Bob", future()).await.unwrap();

    assert_eq!(pool.get().await.unwrap().token, "A");
    assert_eq!(pool.get().await.unwrap().token, "B");
    assert_eq!(pool.get().await.unwrap().token, "A");
}

#[tokio::test]
async fn two_logins_then_delete_then_restart() {
    let store = store();
    let pool = pool_on(store.clone()).await;
    pool.put("T1", "Alice", future()).await.unwrap();
    pool.put("T2", "Bob", future()).await.unwrap();

    let first = pool.get().await.unwrap();
    assert_eq!(first.token, "T1");
    assert_eq!(first.name, "Alice");
    assert_eq!(pool.get().await.unwrap().name, "Bob");

    pool.delete("T1").await.unwrap();
    assert_eq!(pool.count().await.unwrap(), 1);
    assert_eq!(pool.get().await.unwrap().token, "T2");

    // A new process reading the same record sees the same pool
    let restarted = pool_on(store).await;
    let list = restarted.list().await.unwrap();
    assert_eq!(list.len(), 1);
    assert_eq!(list[0].token, "T2");
    assert_eq!(list[0].name, "Bob");
}

#[tokio::test]
async fn get_does_not_change_count() {
    let pool = pool_on(store()).await;
    pool.put("A", "Alice", future()).await.unwrap();
    for _ in 0..5 {
        pool.get().await.unwrap();
    }
    assert_eq!(pool.count().await.unwrap(), 1);
}

// ============================================================
// Expiry
// ============================================================

#[tokio::test]
async fn expired_credentials_are_skipped_and_dropped() {
    let pool = pool_on(store()).await;
    pool.put("old", "Old", past()).await.unwrap();
    pool.put("new", "New", future()).await.unwrap();

    assert_eq!(pool.get().await.unwrap().token, "new");
    assert_eq!(pool.count().await.unwrap(), 1);
    assert!(matches!(
        pool.lookup("old").await,
        Err(PoolError::NotFound(_))
    ));
}

#[tokio::test]
async fn empty_pool_reports_no_credentials() {
    let pool = pool_on(store()).await;
    assert!(matches!(pool.get().await, Err(PoolError::NoCredentials)));
}

#[tokio::test]
async fn all_expired_reports_no_valid_credentials() {
    let pool = pool_on(store()).await;
    pool.put("x", "X", past()).await.unwrap();
    pool.put("y", "Y", past()).await.unwrap();

    assert!(matches!(pool.get().await, Err(PoolError::NoValidCredentials)));
    assert_eq!(pool.count().await.unwrap(), 0);
    // Second call sees an empty pool
    assert!(matches!(pool.get().await, Err(PoolError::NoCredentials)));
}

#[tokio::test]
async fn token_expiring_now_is_rejected() {
    let pool = pool_on(store()).await;
    pool.put("T1", "Alice", now_millis()).await.unwrap();

    assert!(matches!(pool.get().await, Err(PoolError::NoValidCredentials)));
    assert_eq!(pool.count().await.unwrap(), 0);
}

#[tokio::test]
async fn load_drops_expired_and_rewrites_record() {
    let store = store();
    let pool = pool_on(store.clone()).await;
    pool.put("keep", "Keep", future()).await.unwrap();
    pool.put("gone", "Gone", past()).await.unwrap();

    let reloaded = pool_on(store.clone()).await;
    assert_eq!(reloaded.count().await.unwrap(), 1);

    let raw = store.get_record(RECORD_KEY).await.unwrap().unwrap();
    assert!(raw.contains("keep"));
    assert!(!raw.contains("gone"));
}

#[tokio::test]
async fn load_is_idempotent() {
    let pool = pool_on(store()).await;
    pool.put("A", "Alice", future()).await.unwrap();
    pool.put("B", "Bob", future()).await.unwrap();

    pool.load().await.unwrap();
    pool.load().await.unwrap();

    let tokens: Vec<String> = pool
        .list()
        .await
        .unwrap()
        .into_iter()
        .map(|c| c.token)
        .collect();
    assert_eq!(tokens, vec!["A", "B"]);
}

// ============================================================
// Errors and health updates
// ============================================================

#[tokio::test]
async fn unknown_token_is_not_found() {
    let pool = pool_on(store()).await;
    pool.put("A", "Alice", future()).await.unwrap();

    assert!(matches!(pool.delete("nope").await, Err(PoolError::NotFound(_))));
    assert!(matches!(
        pool.update_last_failed("nope").await,
        Err(PoolError::NotFound(_))
    ));
    assert!(matches!(
        pool.update_last_successful("nope").await,
        Err(PoolError::NotFound(_))
    ));
    assert_eq!(pool.count().await.unwrap(), 1);
}

#[tokio::test]
async fn health_fields_survive_restart() {
    let store = store();
    let pool = pool_on(store.clone()).await;
    pool.put("A", "Alice", future()).await.unwrap();
    pool.update_last_tried("A").await.unwrap();
    pool.update_last_failed("A").await.unwrap();

    let reloaded = pool_on(store).await;
    let cred = reloaded.lookup("A").await.unwrap();
    assert_eq!(cred.consecutive_failures, 1);
    assert!(cred.last_tried > 0);
}

#[tokio::test]
async fn concurrent_puts_all_land() {
    let store = store();
    let pool = Arc::new(pool_on(store.clone()).await);

    let mut handles = Vec::new();
    for i in 0..20 {
        let pool = pool.clone();
        handles.push(tokio::spawn(async move {
            pool.put(&format!("token-{i}"), &format!("User {i}"), future())
                .await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    assert_eq!(pool.count().await.unwrap(), 20);
    let reloaded = pool_on(store).await;
    assert_eq!(reloaded.count().await.unwrap(), 20);
}

// ============================================================
// Another process sharing the record
// ============================================================

#[tokio::test]
async fn delete_from_another_process_is_not_undone() {
    let store = store();
    let server = pool_on(store.clone()).await;
    server.put("T1", "Alice", future()).await.unwrap();
    server.put("T2", "Bob", future()).await.unwrap();

    // `crowdstats tokens delete T1` while the server keeps running
    let cli = pool_on(store.clone()).await;
    cli.delete("T1").await.unwrap();

    // The server's next health write must start from the CLI's record
    server.update_last_tried("T2").await.unwrap();
    assert!(matches!(
        server.update_last_tried("T1").await,
        Err(PoolError::NotFound(_))
    ));
    assert_eq!(server.get().await.unwrap().token, "T2");

    let restarted = pool_on(store).await;
    let tokens: Vec<String> = restarted
        .list()
        .await
        .unwrap()
        .into_iter()
        .map(|c| c.token)
        .collect();
    assert_eq!(tokens, vec!["T2"]);
}

#[tokio::test]
async fn add_from_another_process_is_visible() {
    let store = store();
    let server = pool_on(store.clone()).await;
    server.put("T1", "Alice", future()).await.unwrap();

    let cli = pool_on(store.clone()).await;
    cli.put("T2", "Bob", future()).await.unwrap();

    assert_eq!(server.count().await.unwrap(), 2);
    server.put("T3", "Carol", future()).await.unwrap();

    let restarted = pool_on(store).await;
    assert_eq!(restarted.count().await.unwrap(), 3);
    assert_eq!(restarted.lookup("T2").await.unwrap().name, "Bob");
}

#[tokio::test]
async fn clear_from_another_process_empties_the_server_pool() {
    let store = store();
    let server = pool_on(store.clone()).await;
    server.put("T1", "Alice", future()).await.unwrap();

    let cli = pool_on(store.clone()).await;
    cli.clear().await.unwrap();

    assert!(matches!(server.get().await, Err(PoolError::NoCredentials)));
}
