// Auth handlers: Facebook login, callback, and logout.
//
// Login: redirect to the Facebook dialog with a random state nonce kept in
// a short-lived cookie.
//
// Callback: check the state, finish the OAuth exchange, put the user's token
// into the credential pool, start any idle poll loops, set the session
// cookie, and send the user back to where they were headed.
//
// Logout: clear the session cookie.

use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{Html, IntoResponse, Redirect, Response};
use serde::Deserialize;
use tracing::{info, warn};

use crate::credentials::mask_token;
use crate::web::auth::{
    clear_cookie_header, create_token, decode_cookie_value, new_nonce, read_cookie,
    safe_return_path, set_cookie_header, with_cookie, COOKIE_NAME, OAUTH_STATE_COOKIE,
    PRELOGIN_COOKIE, SESSION_TTL_SECS, SHORT_COOKIE_SECS,
};
use crate::web::{oauth, views, AppState};

/// GET /auth/facebook: start the OAuth round trip.
pub async fn facebook_login(State(state): State<AppState>) -> Response {
    let nonce = new_nonce();
    let url = oauth::authorize_url(&state.config, &nonce);
    let cookie = set_cookie_header(
        OAUTH_STATE_COOKIE,
        &nonce,
        SHORT_COOKIE_SECS,
        state.secure_cookies(),
    );
    with_cookie(Redirect::to(&url).into_response(), &cookie)
}

#[derive(Deserialize)]
pub struct CallbackParams {
    code: Option<String>,
    state: Option<String>,
    error_description: Option<String>,
}

fn login_failed(state: &AppState, reason: &str) -> Response {
    let ctx = state.page_context(None);
    (
        StatusCode::UNAUTHORIZED,
        Html(views::render_login_failed(reason, &ctx)),
    )
        .into_response()
}

/// GET /auth/facebook/callback: finish login and enroll the token.
pub async fn facebook_callback(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<CallbackParams>,
) -> Response {
    if let Some(reason) = params.error_description {
        return login_failed(&state, &reason);
    }

    let expected_state = read_cookie(&headers, OAUTH_STATE_COOKIE);
    if expected_state.is_none() || expected_state != params.state {
        warn!("OAuth callback with missing or mismatched state");
        return login_failed(&state, "login session expired, please start again");
    }

    let Some(code) = params.code else {
        return login_failed(&state, "Facebook did not return an authorization code");
    };

    let enrollment =
        match oauth::complete_login(state.collector.api().as_ref(), &state.config, &code).await {
            Ok(e) => e,
            Err(e) => {
                warn!(error = %format!("{e:#}"), "Facebook login failed");
                return login_failed(&state, "could not verify your Facebook login");
            }
        };

    let pool = state.collector.pool();
    if let Err(e) = pool
        .put(
            &enrollment.token,
            &enrollment.user.name,
            enrollment.expires_at_millis,
        )
        .await
    {
        warn!(error = %e, "Could not add login token to the pool");
        return login_failed(&state, "could not save your access token");
    }

    let spawned = state.collector.go();
    info!(
        user = %enrollment.user.name,
        token = %mask_token(&enrollment.token),
        spawned,
        "Token enrolled"
    );

    let return_to = safe_return_path(
        read_cookie(&headers, PRELOGIN_COOKIE).and_then(|raw| decode_cookie_value(&raw)),
    );

    let session = create_token(&state.config.session_secret, &enrollment.user);
    let secure = state.secure_cookies();
    let mut response = Redirect::to(&return_to).into_response();
    response = with_cookie(
        response,
        &set_cookie_header(COOKIE_NAME, &session, SESSION_TTL_SECS, secure),
    );
    response = with_cookie(response, &clear_cookie_header(PRELOGIN_COOKIE));
    with_cookie(response, &clear_cookie_header(OAUTH_STATE_COOKIE))
}

/// GET /logout: clear the session cookie and go home.
pub async fn logout() -> Response {
    with_cookie(
        Redirect::to("/").into_response(),
        &clear_cookie_header(COOKIE_NAME),
    )
}
