// Router tests: requests go through the full Axum stack (force-login
// middleware included) via tower's `oneshot`, with a scripted GraphApi
// standing in for Facebook.

#![cfg(feature = "web")]

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Request, Response, StatusCode};
use axum::Router;
use chrono::Utc;
use serde_json::{json, Value};
use tower::ServiceExt;

use crowdstats::config::{Config, GroupSettings};
use crowdstats::credentials::{now_millis, CredentialPool};
use crowdstats::db::SqliteRecordStore;
use crowdstats::graph::{FetchError, GraphApi};
use crowdstats::poller::Collector;
use crowdstats::ranking::{Identity, RankedEntry, Ranking};
use crowdstats::snapshots::{Snapshot, SnapshotStore};
use crowdstats::web::auth::{create_token, verify_token, COOKIE_NAME};
use crowdstats::web::handlers::tokens::token_fingerprint;
use crowdstats::web::{build_router, AppState, SessionUser};

const SECRET: &str = "test-session-secret";

/// Plays the Facebook side of the login flow.
struct FakeFacebook;

#[async_trait]
impl GraphApi for FakeFacebook {
    async fn get_json(&self, uri: &str, _token: &str) -> Result<Value, FetchError> {
        if uri.starts_with("oauth/access_token") {
            Ok(json!({ "access_token": "EAAuser-token-123", "expires_in": 5_184_000 }))
        } else if uri.starts_with("me?") {
            Ok(json!({ "id": "42", "name": "Dana" }))
        } else if uri.starts_with("debug_token") {
            Ok(json!({ "data": { "is_valid": true, "expires_at": 0, "user_id": "42" } }))
        } else {
            Err(FetchError::Network(format!("unexpected uri {uri}")))
        }
    }
}

fn config() -> Config {
    Config {
        db_path: ":memory:".into(),
        crowds_file: PathBuf::from("crowds.json"),
        graph_url: "http://graph.invalid".into(),
        graph_version: "v2.7".into(),
        http_timeout: Duration::from_secs(5),
        facebook_app_id: "app-id".into(),
        facebook_app_secret: "app-secret".into(),
        facebook_callback_url: "http://localhost:3000/auth/facebook/callback".into(),
        session_secret: SECRET.into(),
        admin_ids: vec!["42".into()],
    }
}

fn settings() -> GroupSettings {
    GroupSettings {
        crowd_key: "pets".into(),
        crowd_name: "Pet Owners".into(),
        group_key: "cats".into(),
        id: "123".into(),
        num_posts: 25,
        num_top_posters: 10,
        num_top_commenters: 10,
        refresh_secs: 300,
        retry_secs: 10,
        user_photos: false,
    }
}

fn entry(id: &str, name: &str, count: u32, percent: u32) -> RankedEntry {
    RankedEntry {
        identity: Identity::new(id, name),
        count,
        percent,
    }
}

fn seeded_store() -> Arc<SnapshotStore> {
    let store = Arc::new(SnapshotStore::new());
    store.install(
        "pets",
        "cats",
        Snapshot {
            group_id: "123".into(),
            group_name: "Cat People".into(),
            crowd_name: "Pet Owners".into(),
            top_posters: Ranking::new(vec![entry("a", "Ann", 3, 100), entry("b", "Ben", 1, 33)]),
            top_commenters: Ranking::new(vec![entry("c", "Cy", 2, 100)]),
            poster_posts: BTreeMap::new(),
            last_updated: Utc::now(),
            settings: settings(),
        },
    );
    store
}

struct Harness {
    router: Router,
    pool: Arc<CredentialPool>,
}

/// No configured groups, so logins never spawn poll loops.
async fn harness() -> Harness {
    let pool = Arc::new(CredentialPool::new(Arc::new(
        SqliteRecordStore::in_memory().unwrap(),
    )));
    pool.load().await.unwrap();

    let collector = Arc::new(Collector::new(
        Vec::new(),
        pool.clone(),
        seeded_store(),
        Arc::new(FakeFacebook),
    ));
    let state = AppState {
        collector,
        config: Arc::new(config()),
    };
    Harness {
        router: build_router(state),
        pool,
    }
}

fn session_cookie() -> String {
    session_for("42", "Dana")
}

fn session_for(id: &str, name: &str) -> String {
    let user = SessionUser {
        id: id.into(),
        name: name.into(),
    };
    format!("{COOKIE_NAME}={}", create_token(SECRET, &user))
}

async fn send(router: &Router, method: &str, uri: &str, cookie: Option<&str>) -> Response<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(cookie) = cookie {
        builder = builder.header(header::COOKIE, cookie);
    }
    router
        .clone()
        .oneshot(builder.body(Body::empty()).unwrap())
        .await
        .unwrap()
}

async fn body_text(response: Response<Body>) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

async fn body_json(response: Response<Body>) -> Value {
    serde_json::from_str(&body_text(response).await).unwrap()
}

fn location(response: &Response<Body>) -> String {
    response.headers()[header::LOCATION]
        .to_str()
        .unwrap()
        .to_string()
}

fn set_cookies(response: &Response<Body>) -> Vec<String> {
    response
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .map(|v| v.to_str().unwrap().to_string())
        .collect()
}

// ============================================================
// Force-login middleware
// ============================================================

#[tokio::test]
async fn health_is_public() {
    let h = harness().await;
    let response = send(&h.router, "GET", "/health", None).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["status"], "ok");
}

#[tokio::test]
async fn anonymous_visitor_is_sent_to_login() {
    let h = harness().await;
    let response = send(&h.router, "GET", "/group/pets?x=1", None).await;

    assert!(response.status().is_redirection());
    assert_eq!(location(&response), "/please-login");
    let cookies = set_cookies(&response);
    assert!(cookies
        .iter()
        .any(|c| c.starts_with("crowdstats_prelogin=%2Fgroup%2Fpets%3Fx%3D1")));
}

#[tokio::test]
async fn please_login_page_is_public() {
    let h = harness().await;
    let response = send(&h.router, "GET", "/please-login", None).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(body_text(response).await.contains("Log in with Facebook"));
}

#[tokio::test]
async fn tampered_session_is_rejected() {
    let h = harness().await;
    let cookie = format!("{}x", session_cookie());
    let response = send(&h.router, "GET", "/api/data", Some(&cookie)).await;
    assert!(response.status().is_redirection());
}

// ============================================================
// Pages and JSON reads
// ============================================================

#[tokio::test]
async fn api_data_returns_tree() {
    let h = harness().await;
    let response = send(&h.router, "GET", "/api/data", Some(&session_cookie())).await;
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    let crowd = &body["crowds"][0];
    assert_eq!(crowd["key"], "pets");
    assert_eq!(crowd["name"], "Pet Owners");
    let snapshot = &crowd["groups"][0]["snapshot"];
    assert_eq!(snapshot["group_name"], "Cat People");
    assert_eq!(snapshot["top_posters"]["entries"][1]["percent"], 33);
}

#[tokio::test]
async fn api_status_reports_counts() {
    let h = harness().await;
    h.pool
        .put("EAAstatus-token", "Eve", now_millis() + 86_400_000)
        .await
        .unwrap();

    let response = send(&h.router, "GET", "/api/status", Some(&session_cookie())).await;
    let body = body_json(response).await;
    assert_eq!(body["tokens"], 1);
    assert_eq!(body["groups_with_data"], 1);
    assert_eq!(body["running"], false);
}

#[tokio::test]
async fn group_and_user_pages_render() {
    let h = harness().await;
    let cookie = session_cookie();

    let response = send(&h.router, "GET", "/", Some(&cookie)).await;
    let html = body_text(response).await;
    assert!(html.contains("Pet Owners"));
    assert!(html.contains("Logged in as Dana"));

    let response = send(&h.router, "GET", "/group/pets/cats", Some(&cookie)).await;
    assert_eq!(response.status(), StatusCode::OK);
    let html = body_text(response).await;
    assert!(html.contains("Top posters"));
    assert!(html.contains("Ann"));

    let response = send(&h.router, "GET", "/group/pets/cats/c", Some(&cookie)).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(body_text(response).await.contains("#1 commenter with 2 comments"));
}

#[tokio::test]
async fn unknown_keys_render_not_found() {
    let h = harness().await;
    let cookie = session_cookie();

    let cases = [
        ("/group/nope", "Crowd not found!"),
        ("/group/pets/nope", "Group not found!"),
        ("/group/nope/cats/a", "Crowd not found!"),
        ("/group/pets/cats/zzz", "User not found!"),
        ("/no/such/page", "Page not found!"),
    ];
    for (uri, message) in cases {
        let response = send(&h.router, "GET", uri, Some(&cookie)).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND, "{uri}");
        assert!(body_text(response).await.contains(message), "{uri}");
    }
}

// ============================================================
// Token administration
// ============================================================

#[tokio::test]
async fn token_list_masks_and_delete_by_fingerprint() {
    let h = harness().await;
    let cookie = session_cookie();
    let token = "EAAsecret-token-value";
    h.pool
        .put(token, "Eve", now_millis() + 86_400_000)
        .await
        .unwrap();

    let response = send(&h.router, "GET", "/api/tokens", Some(&cookie)).await;
    let text = body_text(response).await;
    assert!(!text.contains(token));
    let body: Value = serde_json::from_str(&text).unwrap();
    assert_eq!(body["total"], 1);
    assert_eq!(body["tokens"][0]["name"], "Eve");
    let id = body["tokens"][0]["id"].as_str().unwrap().to_string();
    assert_eq!(id, token_fingerprint(token));

    let uri = format!("/api/tokens/{id}");
    let response = send(&h.router, "DELETE", &uri, Some(&cookie)).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(h.pool.count().await.unwrap(), 0);

    let response = send(&h.router, "DELETE", &uri, Some(&cookie)).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn token_delete_requires_session() {
    let h = harness().await;
    h.pool
        .put("EAAkeep-me", "Eve", now_millis() + 86_400_000)
        .await
        .unwrap();

    let response = send(&h.router, "DELETE", "/api/tokens/EAAkeep-me", None).await;
    assert!(response.status().is_redirection());
    assert_eq!(h.pool.count().await.unwrap(), 1);
}

#[tokio::test]
async fn token_admin_refused_for_non_admin() {
    let h = harness().await;
    let cookie = session_for("7", "Eve");
    let token = "EAAsomeone-elses-token";
    h.pool
        .put(token, "Dana", now_millis() + 86_400_000)
        .await
        .unwrap();

    let response = send(&h.router, "GET", "/api/tokens", Some(&cookie)).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert!(!body_text(response).await.contains("EAA"));

    let uri = format!("/api/tokens/{}", token_fingerprint(token));
    let response = send(&h.router, "DELETE", &uri, Some(&cookie)).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(h.pool.count().await.unwrap(), 1);
}

// ============================================================
// Facebook login
// ============================================================

#[tokio::test]
async fn login_redirects_to_facebook_with_state_cookie() {
    let h = harness().await;
    let response = send(&h.router, "GET", "/auth/facebook", None).await;

    assert!(response.status().is_redirection());
    let target = location(&response);
    assert!(target.starts_with("https://www.facebook.com/v2.7/dialog/oauth?client_id=app%2Did"));
    assert!(set_cookies(&response)
        .iter()
        .any(|c| c.starts_with("crowdstats_oauth_state=")));
}

#[tokio::test]
async fn callback_with_wrong_state_is_refused() {
    let h = harness().await;
    let response = send(
        &h.router,
        "GET",
        "/auth/facebook/callback?code=abc&state=forged",
        Some("crowdstats_oauth_state=expected"),
    )
    .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(h.pool.count().await.unwrap(), 0);
}

#[tokio::test]
async fn callback_enrolls_token_and_signs_in() {
    let h = harness().await;
    let response = send(
        &h.router,
        "GET",
        "/auth/facebook/callback?code=abc&state=nonce1",
        Some("crowdstats_oauth_state=nonce1; crowdstats_prelogin=%2Fgroup%2Fpets"),
    )
    .await;

    assert!(response.status().is_redirection());
    assert_eq!(location(&response), "/group/pets");

    let cookies = set_cookies(&response);
    let session = cookies
        .iter()
        .find_map(|c| c.strip_prefix(&format!("{COOKIE_NAME}=")))
        .and_then(|rest| rest.split(';').next())
        .expect("session cookie set");
    let user = verify_token(SECRET, session).expect("valid session");
    assert_eq!(user.name, "Dana");

    let credentials = h.pool.list().await.unwrap();
    assert_eq!(credentials.len(), 1);
    assert_eq!(credentials[0].token, "EAAuser-token-123");
    assert_eq!(credentials[0].name, "Dana");
    assert!(credentials[0].expires_at_millis > now_millis());
}

#[tokio::test]
async fn logout_clears_session() {
    let h = harness().await;
    let response = send(&h.router, "GET", "/logout", Some(&session_cookie())).await;
    assert!(response.status().is_redirection());
    assert!(set_cookies(&response)
        .iter()
        .any(|c| c.starts_with(&format!("{COOKIE_NAME}=;"))));
}
