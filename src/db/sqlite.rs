// SqliteRecordStore: rusqlite backend implementing the RecordStore trait.
//
// The Connection is wrapped in tokio::sync::Mutex because Connection is !Sync.
// Trait methods lock the mutex, do synchronous rusqlite work, and return.

use anyhow::Result;
use async_trait::async_trait;
use rusqlite::Connection;
use tokio::sync::Mutex;

use super::traits::{RecordInfo, RecordStore};

pub struct SqliteRecordStore {
    conn: Mutex<Connection>,
}

impl SqliteRecordStore {
    /// Wrap an already-opened rusqlite Connection.
    pub fn new(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
        }
    }

    /// A throwaway in-memory store with the schema applied.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        super::schema::create_tables(&conn)?;
        Ok(Self::new(conn))
    }
}

#[async_trait]
impl RecordStore for SqliteRecordStore {
    async fn table_count(&self) -> Result<i64> {
        let conn = self.conn.lock().await;
        super::schema::table_count(&conn)
    }

    async fn get_record(&self, key: &str) -> Result<Option<String>> {
        let conn = self.conn.lock().await;
        super::queries::get_record(&conn, key)
    }

    async fn put_record(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.conn.lock().await;
        super::queries::put_record(&conn, key, value)
    }

    async fn delete_record(&self, key: &str) -> Result<bool> {
        let conn = self.conn.lock().await;
        super::queries::delete_record(&conn, key)
    }

    async fn record_info(&self, key: &str) -> Result<Option<RecordInfo>> {
        let conn = self.conn.lock().await;
        super::queries::record_info(&conn, key)
    }
}
