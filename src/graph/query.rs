// QueryClient: retry loop over a GraphApi that reports credential health.
//
// Transient failures (network, non-2xx, unparseable body) are retried on the
// same credential after the caller's retry interval, for as long as it takes.
// Two things end the loop early: the remote side declaring the token revoked,
// and the token vanishing from the pool because another group's loop removed
// it. Malformed bodies are capped so a persistently broken endpoint cannot
// pin a loop forever.

use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::{debug, warn};

use super::client::{FetchError, GraphApi};
use crate::credentials::{Credential, CredentialPool, PoolError};

/// Consecutive malformed responses tolerated before giving up.
pub const MAX_MALFORMED_RETRIES: u32 = 5;

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("credential {0} was revoked and has been removed")]
    CredentialRevoked(String),

    #[error("credential {0} is no longer in the pool")]
    CredentialGone(String),

    #[error("gave up after {attempts} malformed responses")]
    Malformed { attempts: u32, last_body: String },

    #[error(transparent)]
    Pool(PoolError),
}

pub struct QueryClient {
    api: Arc<dyn GraphApi>,
    pool: Arc<CredentialPool>,
}

impl QueryClient {
    pub fn new(api: Arc<dyn GraphApi>, pool: Arc<CredentialPool>) -> Self {
        Self { api, pool }
    }

    pub fn api(&self) -> &Arc<dyn GraphApi> {
        &self.api
    }

    pub fn pool(&self) -> &Arc<CredentialPool> {
        &self.pool
    }

    /// GET `uri` with `credential` and decode the body as `T`, retrying
    /// transient failures every `retry_interval`.
    ///
    /// A body that is valid JSON but does not fit `T` counts as malformed.
    pub async fn query<T: DeserializeOwned>(
        &self,
        uri: &str,
        credential: &Credential,
        retry_interval: Duration,
    ) -> Result<T, QueryError> {
        let token = credential.token.as_str();
        let masked = credential.masked_token();
        let mut malformed = 0u32;

        loop {
            self.pool
                .update_last_tried(token)
                .await
                .map_err(|e| gone_or_pool(e, &masked))?;

            let outcome = match self.api.get_json(uri, token).await {
                Ok(value) => serde_json::from_value::<T>(value).map_err(|e| {
                    FetchError::Malformed {
                        body: e.to_string(),
                    }
                }),
                Err(e) => Err(e),
            };

            let err = match outcome {
                Ok(payload) => {
                    match self.pool.update_last_successful(token).await {
                        Ok(()) => {}
                        // Removed mid-flight; the payload is still good.
                        Err(PoolError::NotFound(_)) => {
                            debug!(token = %masked, "Credential removed before success was recorded");
                        }
                        Err(e) => return Err(QueryError::Pool(e)),
                    }
                    debug!(uri = uri, "Graph query complete");
                    return Ok(payload);
                }
                Err(err) => err,
            };

            if err.is_irrecoverable() {
                warn!(token = %masked, error = %err, "Credential revoked, removing from pool");
                match self.pool.delete(token).await {
                    Ok(()) | Err(PoolError::NotFound(_)) => {}
                    Err(e) => return Err(QueryError::Pool(e)),
                }
                return Err(QueryError::CredentialRevoked(masked));
            }

            self.pool
                .update_last_failed(token)
                .await
                .map_err(|e| gone_or_pool(e, &masked))?;

            if let FetchError::Malformed { body } = &err {
                malformed += 1;
                if malformed >= MAX_MALFORMED_RETRIES {
                    warn!(uri = uri, attempts = malformed, "Giving up on malformed responses");
                    return Err(QueryError::Malformed {
                        attempts: malformed,
                        last_body: body.clone(),
                    });
                }
            } else {
                malformed = 0;
            }

            warn!(
                uri = uri,
                error = %err,
                retry_secs = retry_interval.as_secs_f64(),
                "Graph query failed, retrying in {:.1}s",
                retry_interval.as_secs_f64(),
            );

            tokio::time::sleep(retry_interval).await;
        }
    }
}

fn gone_or_pool(err: PoolError, masked: &str) -> QueryError {
    match err {
        PoolError::NotFound(_) => QueryError::CredentialGone(masked.to_string()),
        other => QueryError::Pool(other),
    }
}
