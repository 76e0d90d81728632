// Session middleware: stateless HMAC-SHA256 session cookies carrying the
// logged-in Facebook user.
//
// Session token format: {timestamp_secs}.{nonce_hex}.{user_b64}.{hmac_hex}
//
// `user_b64` is the URL-safe base64 of the JSON `{id, name}` of the user who
// logged in. The HMAC covers everything before the last dot and is signed
// with CROWDSTATS_SESSION_SECRET. Tokens are valid for SESSION_TTL_SECS.
//
// Force-login (this middleware):
//   valid crowdstats_session cookie → attach SessionUser → allow
//   public path (/please-login, /logout, /auth/*, /health) → allow
//   otherwise → remember the URL in crowdstats_prelogin, redirect to /please-login

use std::time::{SystemTime, UNIX_EPOCH};

use axum::extract::{Request, State};
use axum::http::{header, HeaderMap, HeaderValue};
use axum::middleware::Next;
use axum::response::{IntoResponse, Redirect, Response};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use hmac::{Hmac, Mac};
use percent_encoding::{percent_decode_str, utf8_percent_encode, NON_ALPHANUMERIC};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use tracing::debug;

use super::AppState;

type HmacSha256 = Hmac<Sha256>;

/// Session cookie name.
pub const COOKIE_NAME: &str = "crowdstats_session";

/// Where the user was headed before being sent to log in.
pub const PRELOGIN_COOKIE: &str = "crowdstats_prelogin";

/// CSRF nonce for the OAuth round trip.
pub const OAUTH_STATE_COOKIE: &str = "crowdstats_oauth_state";

/// Session lifetime: 7 days.
pub const SESSION_TTL_SECS: u64 = 7 * 86_400;

/// Short-lived cookies (pre-login URL, OAuth state): 10 minutes.
pub const SHORT_COOKIE_SECS: u64 = 600;

/// The Facebook user a session belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionUser {
    pub id: String,
    pub name: String,
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Random hex string, used for token nonces and the OAuth state.
pub fn new_nonce() -> String {
    let mut bytes = [0u8; 16];
    rand::rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Build a new session token for `user` signed with `secret`.
pub fn create_token(secret: &str, user: &SessionUser) -> String {
    create_token_at(secret, user, now_secs())
}

fn create_token_at(secret: &str, user: &SessionUser, timestamp: u64) -> String {
    let nonce = new_nonce();
    // Serializing two strings cannot fail
    let json = serde_json::to_vec(user).unwrap_or_default();
    let user_b64 = URL_SAFE_NO_PAD.encode(json);

    let payload = format!("{timestamp}.{nonce}.{user_b64}");
    let sig = hmac_sign(secret, &payload);

    format!("{payload}.{sig}")
}

/// Verify a session token and return its user if the HMAC is valid and the
/// token is younger than `SESSION_TTL_SECS`.
pub fn verify_token(secret: &str, token: &str) -> Option<SessionUser> {
    let (payload, provided_sig) = token.rsplit_once('.')?;
    let expected_sig = hmac_sign(secret, payload);
    if !constant_time_eq(provided_sig, &expected_sig) {
        return None;
    }

    let mut parts = payload.splitn(3, '.');
    let timestamp: u64 = parts.next()?.parse().ok()?;
    let _nonce = parts.next()?;
    let user_b64 = parts.next()?;

    if now_secs().saturating_sub(timestamp) >= SESSION_TTL_SECS {
        return None;
    }

    let bytes = URL_SAFE_NO_PAD.decode(user_b64.as_bytes()).ok()?;
    serde_json::from_slice(&bytes).ok()
}

/// Paths reachable without a session.
pub fn is_public_path(path: &str) -> bool {
    path == "/please-login"
        || path == "/logout"
        || path == "/health"
        || path == "/auth"
        || path.starts_with("/auth/")
}

/// Axum middleware: attach the session user, or send anonymous visitors to
/// /please-login after remembering where they were going.
pub async fn force_login(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    let session = read_cookie(request.headers(), COOKIE_NAME)
        .and_then(|token| verify_token(&state.config.session_secret, &token));

    if let Some(user) = session {
        request.extensions_mut().insert(user);
        return next.run(request).await;
    }

    let path = request.uri().path();
    if is_public_path(path) {
        return next.run(request).await;
    }

    let target = request
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| "/".to_string());
    debug!(url = %target, "Anonymous request, redirecting to login");

    let cookie = set_cookie_header(
        PRELOGIN_COOKIE,
        &encode_cookie_value(&target),
        SHORT_COOKIE_SECS,
        state.secure_cookies(),
    );
    with_cookie(Redirect::to("/please-login").into_response(), &cookie)
}

/// Only same-site absolute paths are followed after login.
pub fn safe_return_path(raw: Option<String>) -> String {
    match raw {
        Some(path) if path.starts_with('/') && !path.starts_with("//") => path,
        _ => "/".to_string(),
    }
}

/// Build a `Set-Cookie` header value.
pub fn set_cookie_header(name: &str, value: &str, max_age_secs: u64, secure: bool) -> String {
    let secure_flag = if secure { "; Secure" } else { "" };
    format!("{name}={value}; HttpOnly{secure_flag}; SameSite=Lax; Path=/; Max-Age={max_age_secs}")
}

/// Build the `Set-Cookie` header value that clears `name`.
pub fn clear_cookie_header(name: &str) -> String {
    format!("{name}=; HttpOnly; SameSite=Lax; Path=/; Max-Age=0")
}

/// Append a `Set-Cookie` header to an existing response.
pub fn with_cookie(mut response: Response, cookie: &str) -> Response {
    if let Ok(value) = HeaderValue::from_str(cookie) {
        response.headers_mut().append(header::SET_COOKIE, value);
    }
    response
}

/// Value of cookie `name`, if the request carries it.
pub fn read_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    for value in headers.get_all(header::COOKIE) {
        let Ok(cookie_header) = value.to_str() else {
            continue;
        };
        for pair in cookie_header.split(';') {
            if let Some((k, v)) = pair.trim().split_once('=') {
                if k.trim() == name {
                    return Some(v.trim().to_string());
                }
            }
        }
    }
    None
}

pub fn encode_cookie_value(raw: &str) -> String {
    utf8_percent_encode(raw, NON_ALPHANUMERIC).to_string()
}

pub fn decode_cookie_value(encoded: &str) -> Option<String> {
    percent_decode_str(encoded)
        .decode_utf8()
        .ok()
        .map(|s| s.into_owned())
}

// --- Private helpers ---

fn hmac_sign(secret: &str, payload: &str) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts keys of any length");
    mac.update(payload.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Constant-time string comparison to prevent timing attacks.
fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.bytes()
        .zip(b.bytes())
        .fold(0u8, |acc, (x, y)| acc | (x ^ y))
        == 0
}
