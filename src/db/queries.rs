// Database queries: CRUD for the durable record table.
//
// Every SQL statement lives here; the async trait impl in sqlite.rs only
// locks the connection and delegates.

use anyhow::Result;
use rusqlite::{params, Connection, OptionalExtension};

use super::traits::RecordInfo;

/// Tag written alongside each record: build version plus process id, so
/// `status` can tell which process owns the pool.
pub fn writer_tag() -> String {
    format!(
        "crowdstats/{} pid {}",
        env!("CARGO_PKG_VERSION"),
        std::process::id()
    )
}

/// Load a record's value by key.
pub fn get_record(conn: &Connection, key: &str) -> Result<Option<String>> {
    let mut stmt = conn.prepare("SELECT value FROM durable_records WHERE key = ?1")?;
    let result = stmt.query_row(params![key], |row| row.get(0)).optional()?;
    Ok(result)
}

/// Replace a record's value (upsert).
pub fn put_record(conn: &Connection, key: &str, value: &str) -> Result<()> {
    conn.execute(
        "INSERT INTO durable_records (key, value, updated_at, written_by)
         VALUES (?1, ?2, datetime('now'), ?3)
         ON CONFLICT(key) DO UPDATE SET
            value = ?2,
            updated_at = datetime('now'),
            written_by = ?3",
        params![key, value, writer_tag()],
    )?;
    Ok(())
}

/// Delete a record. Returns true if it existed.
pub fn delete_record(conn: &Connection, key: &str) -> Result<bool> {
    let deleted = conn.execute("DELETE FROM durable_records WHERE key = ?1", params![key])?;
    Ok(deleted > 0)
}

/// When a record was last written, and by which process.
pub fn record_info(conn: &Connection, key: &str) -> Result<Option<RecordInfo>> {
    let mut stmt =
        conn.prepare("SELECT updated_at, written_by FROM durable_records WHERE key = ?1")?;
    let result = stmt
        .query_row(params![key], |row| {
            Ok(RecordInfo {
                updated_at: row.get(0)?,
                written_by: row.get(1)?,
            })
        })
        .optional()?;
    Ok(result)
}
