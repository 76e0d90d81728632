// RecordStore trait: async interface over the durable named-record table.
//
// The credential pool persists itself as one JSON record. Keeping the seam
// as a trait lets the pool run against an on-disk SQLite file in production
// and an in-memory connection in tests.

use anyhow::Result;
use async_trait::async_trait;

#[async_trait]
pub trait RecordStore: Send + Sync {
    // --- Lifecycle ---

    /// Count the number of user-created tables in the database.
    async fn table_count(&self) -> Result<i64>;

    // --- Named records ---

    /// Load a record's JSON value by key.
    async fn get_record(&self, key: &str) -> Result<Option<String>>;

    /// Replace a record's JSON value (upsert).
    async fn put_record(&self, key: &str, value: &str) -> Result<()>;

    /// Remove a record. Returns true if a row was deleted.
    async fn delete_record(&self, key: &str) -> Result<bool>;

    /// Last write time and writer of a record.
    async fn record_info(&self, key: &str) -> Result<Option<RecordInfo>>;
}

/// Bookkeeping columns stored next to a record's value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordInfo {
    /// SQLite `datetime('now')` of the last write.
    pub updated_at: String,
    /// Writer tag of the last write; absent for rows that predate it.
    pub written_by: Option<String>,
}
