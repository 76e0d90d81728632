// Credential pool: persisted, rotating set of Graph API access tokens.
//
// Every group poller draws its token from one shared CredentialPool. The
// pool is backed by a single JSON record in the durable store and rewrites
// that record in full after each mutation.

pub mod models;
pub mod pool;

pub use models::{mask_token, now_millis, Credential, PoolRecord};
pub use pool::CredentialPool;

use thiserror::Error;

/// Record key the pool is persisted under.
pub const RECORD_KEY: &str = "credentials";

/// Pool-state errors. Returned to the caller as-is; the pool never retries.
#[derive(Debug, Error)]
pub enum PoolError {
    #[error("credentials not loaded, call load() first")]
    NotLoaded,

    #[error("credential '{0}' not found")]
    NotFound(String),

    #[error("no credentials available")]
    NoCredentials,

    #[error("no un-expired credentials available")]
    NoValidCredentials,

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}
