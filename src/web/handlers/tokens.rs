// Token administration.
//
// GET    /api/tokens         pool contents in rotation order, tokens masked
// DELETE /api/tokens/{token} remove by full token or by the `id` from the list
//
// The list never returns raw tokens. Each entry carries a short SHA-256
// fingerprint as its `id`, which DELETE accepts in place of the token.
// Both routes are limited to the Facebook ids in CROWDSTATS_ADMIN_IDS; any
// other logged-in user gets 403.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use crate::credentials::{now_millis, PoolError};
use crate::web::{api_error, AppState, SessionUser};

/// First 16 hex chars of the token's SHA-256.
pub fn token_fingerprint(token: &str) -> String {
    let digest = Sha256::digest(token.as_bytes());
    hex::encode(&digest[..8])
}

fn forbidden(state: &AppState, user: &SessionUser) -> Option<Response> {
    if state.config.is_admin(&user.id) {
        return None;
    }
    warn!(user_id = %user.id, name = %user.name, "Token administration refused");
    Some(api_error(
        StatusCode::FORBIDDEN,
        "Token administration is limited to admins",
    ))
}

pub async fn list_tokens(
    State(state): State<AppState>,
    Extension(user): Extension<SessionUser>,
) -> Response {
    if let Some(refused) = forbidden(&state, &user) {
        return refused;
    }

    let credentials = match state.collector.pool().list().await {
        Ok(list) => list,
        Err(e) => return api_error(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string()),
    };

    let now = now_millis();
    let tokens: Vec<serde_json::Value> = credentials
        .iter()
        .map(|c| {
            serde_json::json!({
                "id": token_fingerprint(&c.token),
                "token": c.masked_token(),
                "name": c.name,
                "expires_at": c.expires_at().map(|t| t.to_rfc3339()),
                "expired": c.is_expired(now),
                "last_tried": c.last_tried,
                "last_successful": c.last_successful,
                "consecutive_failures": c.consecutive_failures,
            })
        })
        .collect();

    Json(serde_json::json!({ "tokens": tokens, "total": tokens.len() })).into_response()
}

pub async fn delete_token(
    State(state): State<AppState>,
    Extension(user): Extension<SessionUser>,
    Path(token): Path<String>,
) -> Response {
    if let Some(refused) = forbidden(&state, &user) {
        return refused;
    }

    let pool = state.collector.pool();

    // Resolve a fingerprint to the real token
    let target = match pool.list().await {
        Ok(list) => list
            .into_iter()
            .find(|c| c.token == token || token_fingerprint(&c.token) == token)
            .map(|c| c.token),
        Err(e) => return api_error(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string()),
    };
    let Some(target) = target else {
        return api_error(StatusCode::NOT_FOUND, "Token not found");
    };

    match pool.delete(&target).await {
        Ok(()) => {
            info!(by = %user.name, id = %token_fingerprint(&target), "Token deleted via API");
            (
                StatusCode::OK,
                Json(serde_json::json!({ "message": "Token deleted" })),
            )
                .into_response()
        }
        Err(PoolError::NotFound(_)) => api_error(StatusCode::NOT_FOUND, "Token not found"),
        Err(e) => api_error(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string()),
    }
}
