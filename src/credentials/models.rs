// Credential models: the tokens the pollers authenticate with, and the
// record shape they are persisted in.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// One Graph API access token plus its health history.
///
/// `expires_at_millis` is fixed when the credential is created. Only the two
/// timestamps and the failure counter change afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Credential {
    pub token: String,
    /// Display name of the user who granted the token.
    pub name: String,
    /// Absolute expiry, milliseconds since the Unix epoch.
    pub expires_at_millis: i64,
    /// Last time a request was attempted with this token (0 = never).
    #[serde(default)]
    pub last_tried: i64,
    /// Last time a request with this token succeeded (0 = never).
    #[serde(default)]
    pub last_successful: i64,
    #[serde(default)]
    pub consecutive_failures: u32,
}

impl Credential {
    pub fn new(token: impl Into<String>, name: impl Into<String>, expires_at_millis: i64) -> Self {
        Self {
            token: token.into(),
            name: name.into(),
            expires_at_millis,
            last_tried: 0,
            last_successful: 0,
            consecutive_failures: 0,
        }
    }

    /// A credential whose expiry is at or before `now_millis` is unusable.
    pub fn is_expired(&self, now_millis: i64) -> bool {
        self.expires_at_millis <= now_millis
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_millis_opt(self.expires_at_millis).single()
    }

    /// Token shortened for logs and admin pages.
    pub fn masked_token(&self) -> String {
        mask_token(&self.token)
    }
}

/// Keep the first few characters of a token, hide the rest.
pub fn mask_token(token: &str) -> String {
    let visible: String = token.chars().take(6).collect();
    if token.chars().count() <= 6 {
        "******".to_string()
    } else {
        format!("{visible}…")
    }
}

/// The single durable unit the pool rewrites after every mutation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolRecord {
    #[serde(default)]
    pub credentials: Vec<Credential>,
}

/// Current wall-clock time in epoch milliseconds.
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}
