// CredentialPool: round-robin token rotation with a write-through record.
//
// All state sits behind one tokio Mutex. Mutations keep the guard across the
// durable rewrite, so writes to the record are totally ordered and a second
// writer simply waits its turn. If the rewrite fails, the in-memory change is
// rolled back before the error is returned.
//
// The record may also be rewritten by another process (the CLI next to a
// running server). Every operation re-reads it first and adopts the stored
// rotation when it differs from the last value this pool saw or wrote.

use std::collections::VecDeque;
use std::sync::Arc;

use anyhow::Context;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::models::{mask_token, now_millis, Credential, PoolRecord};
use super::{PoolError, RECORD_KEY};
use crate::db::RecordStore;

#[derive(Debug, Clone, Default)]
struct PoolState {
    /// Front = next credential handed out.
    rotation: VecDeque<Credential>,
    loaded: bool,
    /// Record JSON as of the last load, refresh, or commit.
    last_seen: Option<String>,
}

impl PoolState {
    fn ensure_loaded(&self) -> Result<(), PoolError> {
        if self.loaded {
            Ok(())
        } else {
            Err(PoolError::NotLoaded)
        }
    }

    fn find_mut(&mut self, token: &str) -> Result<&mut Credential, PoolError> {
        self.rotation
            .iter_mut()
            .find(|c| c.token == token)
            .ok_or_else(|| PoolError::NotFound(mask_token(token)))
    }

    /// Replace the rotation with the record's credentials, in stored order.
    /// A record written by an older build may hold duplicates; the first wins.
    fn adopt(&mut self, record: PoolRecord, drop_expired_at: Option<i64>) {
        let mut rotation: VecDeque<Credential> = VecDeque::with_capacity(record.credentials.len());
        for credential in record.credentials {
            if drop_expired_at.is_some_and(|now| credential.is_expired(now)) {
                continue;
            }
            if rotation.iter().any(|c| c.token == credential.token) {
                continue;
            }
            rotation.push_back(credential);
        }
        self.rotation = rotation;
    }

    fn to_record(&self) -> PoolRecord {
        PoolRecord {
            credentials: self.rotation.iter().cloned().collect(),
        }
    }
}

pub struct CredentialPool {
    state: Mutex<PoolState>,
    store: Arc<dyn RecordStore>,
}

impl CredentialPool {
    /// Create an unloaded pool. Call `load()` before anything else.
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self {
            state: Mutex::new(PoolState::default()),
            store,
        }
    }

    /// Read the durable record, drop expired credentials, and write the
    /// filtered set back. Safe to call repeatedly.
    pub async fn load(&self) -> Result<(), PoolError> {
        let mut state = self.state.lock().await;

        let record = match self.store.get_record(RECORD_KEY).await? {
            Some(json) => parse_record(&json)?,
            None => PoolRecord::default(),
        };
        let total = record.credentials.len();

        let previous = std::mem::take(&mut *state);
        state.adopt(record, Some(now_millis()));
        state.loaded = true;
        self.commit(&mut state, previous).await?;

        info!(
            loaded = state.rotation.len(),
            dropped = total - state.rotation.len(),
            "Credential pool loaded"
        );
        Ok(())
    }

    /// Add a credential to the back of the rotation. An existing entry with
    /// the same token is replaced.
    pub async fn put(
        &self,
        token: &str,
        name: &str,
        expires_at_millis: i64,
    ) -> Result<(), PoolError> {
        let mut state = self.state.lock().await;
        self.refresh(&mut state).await?;

        let previous = state.clone();
        state.rotation.retain(|c| c.token != token);
        state
            .rotation
            .push_back(Credential::new(token, name, expires_at_millis));
        self.commit(&mut state, previous).await?;

        debug!(token = %mask_token(token), name, "Credential added");
        Ok(())
    }

    /// Hand out the next un-expired credential and rotate it to the back.
    ///
    /// Expired credentials met on the way are discarded and the record is
    /// rewritten. If every remaining credential had expired the pool ends up
    /// empty and `NoValidCredentials` is returned.
    pub async fn get(&self) -> Result<Credential, PoolError> {
        let mut state = self.state.lock().await;
        self.refresh(&mut state).await?;

        if state.rotation.is_empty() {
            return Err(PoolError::NoCredentials);
        }

        let previous = state.clone();
        let now = now_millis();
        let mut discarded = 0usize;
        let mut found = None;

        while let Some(credential) = state.rotation.pop_front() {
            if credential.is_expired(now) {
                debug!(token = %credential.masked_token(), "Discarding expired credential");
                discarded += 1;
                continue;
            }
            state.rotation.push_back(credential.clone());
            found = Some(credential);
            break;
        }

        if discarded > 0 {
            self.commit(&mut state, previous).await?;
            info!(discarded, remaining = state.rotation.len(), "Expired credentials removed");
        }

        found.ok_or(PoolError::NoValidCredentials)
    }

    /// Remove one credential permanently.
    pub async fn delete(&self, token: &str) -> Result<(), PoolError> {
        let mut state = self.state.lock().await;
        self.refresh(&mut state).await?;

        if !state.rotation.iter().any(|c| c.token == token) {
            return Err(PoolError::NotFound(mask_token(token)));
        }

        let previous = state.clone();
        state.rotation.retain(|c| c.token != token);
        self.commit(&mut state, previous).await?;

        info!(token = %mask_token(token), "Credential deleted");
        Ok(())
    }

    /// Number of credentials currently in the rotation.
    pub async fn count(&self) -> Result<usize, PoolError> {
        let mut state = self.state.lock().await;
        self.refresh(&mut state).await?;
        Ok(state.rotation.len())
    }

    /// Ordered copy of the rotation, front first.
    pub async fn list(&self) -> Result<Vec<Credential>, PoolError> {
        let mut state = self.state.lock().await;
        self.refresh(&mut state).await?;
        Ok(state.rotation.iter().cloned().collect())
    }

    /// Look up one credential without rotating.
    pub async fn lookup(&self, token: &str) -> Result<Credential, PoolError> {
        let mut state = self.state.lock().await;
        self.refresh(&mut state).await?;
        state
            .rotation
            .iter()
            .find(|c| c.token == token)
            .cloned()
            .ok_or_else(|| PoolError::NotFound(mask_token(token)))
    }

    /// Stamp the time of the latest attempt with this credential.
    pub async fn update_last_tried(&self, token: &str) -> Result<(), PoolError> {
        self.update(token, |c| c.last_tried = now_millis()).await
    }

    /// Count one more failure since the last success.
    pub async fn update_last_failed(&self, token: &str) -> Result<(), PoolError> {
        self.update(token, |c| c.consecutive_failures += 1).await
    }

    /// Stamp a success and reset the failure counter.
    pub async fn update_last_successful(&self, token: &str) -> Result<(), PoolError> {
        self.update(token, |c| {
            c.last_successful = now_millis();
            c.consecutive_failures = 0;
        })
        .await
    }

    /// Drop every credential. Also marks the pool as loaded.
    pub async fn clear(&self) -> Result<(), PoolError> {
        let mut state = self.state.lock().await;
        let previous = state.clone();
        state.rotation.clear();
        state.loaded = true;
        self.commit(&mut state, previous).await?;

        info!("Credential pool cleared");
        Ok(())
    }

    async fn update<F>(&self, token: &str, apply: F) -> Result<(), PoolError>
    where
        F: FnOnce(&mut Credential),
    {
        let mut state = self.state.lock().await;
        self.refresh(&mut state).await?;

        let previous = state.clone();
        apply(state.find_mut(token)?);
        self.commit(&mut state, previous).await
    }

    /// Adopt the stored record if another process rewrote it since this pool
    /// last saw it. Expired entries are left for `get` to discard.
    async fn refresh(&self, state: &mut PoolState) -> Result<(), PoolError> {
        state.ensure_loaded()?;

        let stored = self.store.get_record(RECORD_KEY).await?;
        if stored == state.last_seen {
            return Ok(());
        }

        let record = match &stored {
            Some(json) => parse_record(json)?,
            None => PoolRecord::default(),
        };
        let before = state.rotation.len();
        state.adopt(record, None);
        state.last_seen = stored;

        info!(
            before,
            after = state.rotation.len(),
            "Credential record changed by another writer, reloaded"
        );
        Ok(())
    }

    /// Rewrite the durable record from `state`. On failure, restore
    /// `previous` so memory and disk stay in agreement.
    async fn commit(&self, state: &mut PoolState, previous: PoolState) -> Result<(), PoolError> {
        let json = serde_json::to_string(&state.to_record())
            .context("Failed to serialize credential record")?;

        if let Err(e) = self.store.put_record(RECORD_KEY, &json).await {
            warn!(error = %e, "Credential record write failed, rolling back");
            *state = previous;
            return Err(PoolError::Storage(e));
        }
        state.last_seen = Some(json);
        Ok(())
    }
}

fn parse_record(json: &str) -> Result<PoolRecord, PoolError> {
    let record = serde_json::from_str::<PoolRecord>(json)
        .context("Stored credential record is not valid JSON")?;
    Ok(record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::SqliteRecordStore;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    const HOUR_MS: i64 = 3_600_000;

    fn store() -> Arc<dyn RecordStore> {
        Arc::new(SqliteRecordStore::in_memory().unwrap())
    }

    async fn loaded_pool() -> CredentialPool {
        let pool = CredentialPool::new(store());
        pool.load().await.unwrap();
        pool
    }

    /// Store that sleeps inside every write and tracks overlapping writers.
    struct SlowStore {
        inner: SqliteRecordStore,
        active: AtomicUsize,
        max_active: AtomicUsize,
        fail_writes: AtomicBool,
    }

    #[async_trait]
    impl RecordStore for SlowStore {
        async fn table_count(&self) -> anyhow::Result<i64> {
            self.inner.table_count().await
        }
        async fn get_record(&self, key: &str) -> anyhow::Result<Option<String>> {
            self.inner.get_record(key).await
        }
        async fn put_record(&self, key: &str, value: &str) -> anyhow::Result<()> {
            if self.fail_writes.load(Ordering::SeqCst) {
                anyhow::bail!("disk full");
            }
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_active.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(5)).await;
            let result = self.inner.put_record(key, value).await;
            self.active.fetch_sub(1, Ordering::SeqCst);
            result
        }
        async fn delete_record(&self, key: &str) -> anyhow::Result<bool> {
            self.inner.delete_record(key).await
        }
        async fn record_info(&self, key: &str) -> anyhow::Result<Option<crate::db::RecordInfo>> {
            self.inner.record_info(key).await
        }
    }

    fn slow_store() -> Arc<SlowStore> {
        Arc::new(SlowStore {
            inner: SqliteRecordStore::in_memory().unwrap(),
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
            fail_writes: AtomicBool::new(false),
        })
    }

    #[tokio::test]
    async fn test_operations_before_load_are_rejected() {
        let pool = CredentialPool::new(store());
        assert!(matches!(pool.count().await, Err(PoolError::NotLoaded)));
        assert!(matches!(pool.get().await, Err(PoolError::NotLoaded)));
        assert!(matches!(
            pool.put("t", "n", now_millis() + HOUR_MS).await,
            Err(PoolError::NotLoaded)
        ));
        assert!(matches!(
            pool.update_last_tried("t").await,
            Err(PoolError::NotLoaded)
        ));
    }

    #[tokio::test]
    async fn test_put_same_token_replaces() {
        let pool = loaded_pool().await;
        let exp = now_millis() + HOUR_MS;
        pool.put("a", "Alice", exp).await.unwrap();
        pool.put("b", "Bob", exp).await.unwrap();
        pool.put("a", "Alice again", exp).await.unwrap();
        assert_eq!(pool.count().await.unwrap(), 2);
        let list = pool.list().await.unwrap();
        assert_eq!(list[0].token, "b");
        assert_eq!(list[1].name, "Alice again");
    }

    #[tokio::test]
    async fn test_clear_without_load_marks_loaded() {
        let pool = CredentialPool::new(store());
        pool.clear().await.unwrap();
        assert_eq!(pool.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_health_counters() {
        let pool = loaded_pool().await;
        pool.put("a", "Alice", now_millis() + HOUR_MS).await.unwrap();

        pool.update_last_tried("a").await.unwrap();
        pool.update_last_failed("a").await.unwrap();
        pool.update_last_failed("a").await.unwrap();
        let cred = pool.lookup("a").await.unwrap();
        assert_eq!(cred.consecutive_failures, 2);
        assert!(cred.last_tried > 0);
        assert_eq!(cred.last_successful, 0);

        pool.update_last_successful("a").await.unwrap();
        let cred = pool.lookup("a").await.unwrap();
        assert_eq!(cred.consecutive_failures, 0);
        assert!(cred.last_successful > 0);
    }

    #[tokio::test]
    async fn test_writes_never_overlap() {
        let slow = slow_store();
        let pool = Arc::new(CredentialPool::new(slow.clone()));
        pool.load().await.unwrap();

        let exp = now_millis() + HOUR_MS;
        let mut handles = Vec::new();
        for i in 0..8 {
            let pool = pool.clone();
            handles.push(tokio::spawn(async move {
                pool.put(&format!("tok{i}"), "n", exp).await
            }));
        }
        for h in handles {
            h.await.unwrap().unwrap();
        }

        assert_eq!(pool.count().await.unwrap(), 8);
        assert_eq!(slow.max_active.load(Ordering::SeqCst), 1);

        // And the record on disk has all of them
        let fresh = CredentialPool::new(slow.clone());
        fresh.load().await.unwrap();
        assert_eq!(fresh.count().await.unwrap(), 8);
    }

    #[tokio::test]
    async fn test_failed_write_rolls_back() {
        let slow = slow_store();
        let pool = CredentialPool::new(slow.clone());
        pool.load().await.unwrap();
        pool.put("a", "Alice", now_millis() + HOUR_MS).await.unwrap();

        slow.fail_writes.store(true, Ordering::SeqCst);
        assert!(matches!(
            pool.put("b", "Bob", now_millis() + HOUR_MS).await,
            Err(PoolError::Storage(_))
        ));
        assert!(pool.delete("a").await.is_err());
        assert_eq!(pool.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_own_writes_do_not_trigger_reload() {
        let store = store();
        let pool = CredentialPool::new(store.clone());
        pool.load().await.unwrap();
        pool.put("a", "Alice", now_millis() + HOUR_MS).await.unwrap();

        let seen = pool.state.lock().await.last_seen.clone();
        assert_eq!(seen, store.get_record(RECORD_KEY).await.unwrap());
    }

    #[tokio::test]
    async fn test_load_rejects_corrupt_record() {
        let store = store();
        store.put_record(RECORD_KEY, "not json").await.unwrap();
        let pool = CredentialPool::new(store);
        assert!(matches!(pool.load().await, Err(PoolError::Storage(_))));
    }
}
