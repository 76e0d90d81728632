// Facebook login: the OAuth round trip that both signs a user in and
// enrolls their access token into the credential pool.
//
// GET /auth/facebook           → redirect to the Facebook dialog with a state nonce
// GET /auth/facebook/callback  → exchange code, read profile, read expiry,
//                                pool.put(), collector.go(), set session cookie

use anyhow::{Context, Result};
use chrono::Utc;
use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use tracing::info;

use super::auth::SessionUser;
use crate::config::Config;
use crate::graph::{AccessTokenResponse, DebugTokenResponse, GraphApi, UserProfile};

/// Expiry assumed when Facebook reports neither `expires_at` nor `expires_in`.
const FALLBACK_TOKEN_LIFETIME_SECS: i64 = 60 * 86_400;

fn enc(raw: &str) -> String {
    utf8_percent_encode(raw, NON_ALPHANUMERIC).to_string()
}

/// App access token, `{app_id}|{app_secret}`.
fn app_token(config: &Config) -> String {
    format!("{}|{}", config.facebook_app_id, config.facebook_app_secret)
}

/// URL of the Facebook login dialog.
pub fn authorize_url(config: &Config, state: &str) -> String {
    format!(
        "https://www.facebook.com/{}/dialog/oauth?client_id={}&redirect_uri={}&state={}",
        config.graph_version,
        enc(&config.facebook_app_id),
        enc(&config.facebook_callback_url),
        enc(state),
    )
}

/// Relative Graph uri for the code exchange.
pub fn access_token_uri(config: &Config, code: &str) -> String {
    format!(
        "oauth/access_token?client_id={}&redirect_uri={}&client_secret={}&code={}",
        enc(&config.facebook_app_id),
        enc(&config.facebook_callback_url),
        enc(&config.facebook_app_secret),
        enc(code),
    )
}

/// Relative Graph uri for token introspection, signed with the app token.
pub fn debug_token_uri(config: &Config, user_token: &str) -> String {
    format!(
        "debug_token?input_token={}&access_token={}",
        enc(user_token),
        enc(&app_token(config)),
    )
}

/// Absolute expiry in epoch millis from what Facebook told us.
pub fn expiry_millis(expires_at_secs: i64, expires_in_secs: Option<i64>, now_millis: i64) -> i64 {
    if expires_at_secs > 0 {
        expires_at_secs * 1000
    } else if let Some(secs) = expires_in_secs.filter(|s| *s > 0) {
        now_millis + secs * 1000
    } else {
        now_millis + FALLBACK_TOKEN_LIFETIME_SECS * 1000
    }
}

/// A finished login: who signed in and the token they granted.
pub struct Enrollment {
    pub user: SessionUser,
    pub token: String,
    pub expires_at_millis: i64,
}

/// Turn an authorization `code` into a signed-in user plus a pool-ready token.
///
/// Each call is a single attempt; a failed login is retried by the user.
pub async fn complete_login(api: &dyn GraphApi, config: &Config, code: &str) -> Result<Enrollment> {
    let exchanged: AccessTokenResponse = serde_json::from_value(
        api.get_json(&access_token_uri(config, code), &app_token(config))
            .await
            .context("Code exchange failed")?,
    )
    .context("Unexpected code exchange response")?;

    let profile: UserProfile = serde_json::from_value(
        api.get_json("me?fields=id,name", &exchanged.access_token)
            .await
            .context("Profile lookup failed")?,
    )
    .context("Unexpected profile response")?;

    let debug: DebugTokenResponse = serde_json::from_value(
        api.get_json(
            &debug_token_uri(config, &exchanged.access_token),
            &exchanged.access_token,
        )
        .await
        .context("Token introspection failed")?,
    )
    .context("Unexpected debug_token response")?;

    if !debug.data.is_valid {
        anyhow::bail!("Facebook reports the new token as invalid");
    }

    let expires_at_millis = expiry_millis(
        debug.data.expires_at,
        exchanged.expires_in,
        Utc::now().timestamp_millis(),
    );

    info!(user_id = %profile.id, name = %profile.name, "Facebook login completed");

    Ok(Enrollment {
        user: SessionUser {
            id: profile.id,
            name: profile.name,
        },
        token: exchanged.access_token,
        expires_at_millis,
    })
}
