// HTML leaderboard pages.
//
// GET /                                  crowd index
// GET /group/{crowd}                     groups in a crowd
// GET /group/{crowd}/{group}             top posters and commenters
// GET /group/{crowd}/{group}/{user_id}   one ranked user
// GET /please-login                      landing page for anonymous visitors
//
// Unknown keys render a 404 page naming what was missing.

use axum::extract::{OriginalUri, Path, State};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use axum::Extension;
use tracing::debug;

use crate::web::views::{self, PageContext};
use crate::web::{AppState, SessionUser};

type MaybeUser = Option<Extension<SessionUser>>;

fn context(state: &AppState, user: MaybeUser) -> PageContext {
    state.page_context(user.map(|Extension(u)| u))
}

fn not_found(uri: &OriginalUri, message: &str, ctx: &PageContext) -> Response {
    (
        StatusCode::NOT_FOUND,
        Html(views::render_not_found(uri.path(), message, ctx)),
    )
        .into_response()
}

pub async fn index(State(state): State<AppState>, user: MaybeUser) -> Html<String> {
    let ctx = context(&state, user);
    Html(views::render_index(&state.collector.get_data(), &ctx))
}

pub async fn crowd(
    State(state): State<AppState>,
    user: MaybeUser,
    uri: OriginalUri,
    Path(crowd): Path<String>,
) -> Response {
    let ctx = context(&state, user);
    let data = state.collector.get_data();
    debug!(crowd = %crowd, "Crowd page");

    match data.crowd(&crowd) {
        Some(view) => Html(views::render_crowd(view, &ctx)).into_response(),
        None => not_found(&uri, "Crowd not found!", &ctx),
    }
}

pub async fn group(
    State(state): State<AppState>,
    user: MaybeUser,
    uri: OriginalUri,
    Path((crowd, group)): Path<(String, String)>,
) -> Response {
    let ctx = context(&state, user);
    let data = state.collector.get_data();

    let Some(crowd_view) = data.crowd(&crowd) else {
        return not_found(&uri, "Crowd not found!", &ctx);
    };
    let Some(group_view) = crowd_view.group(&group) else {
        return not_found(&uri, "Group not found!", &ctx);
    };

    Html(views::render_group(crowd_view, group_view, &ctx)).into_response()
}

pub async fn user(
    State(state): State<AppState>,
    user: MaybeUser,
    uri: OriginalUri,
    Path((crowd, group, user_id)): Path<(String, String, String)>,
) -> Response {
    let ctx = context(&state, user);
    let data = state.collector.get_data();

    let Some(crowd_view) = data.crowd(&crowd) else {
        return not_found(&uri, "Crowd not found!", &ctx);
    };
    let Some(group_view) = crowd_view.group(&group) else {
        return not_found(&uri, "Group not found!", &ctx);
    };

    match views::render_user(crowd_view, group_view, &user_id, &ctx) {
        Some(html) => Html(html).into_response(),
        None => not_found(&uri, "User not found!", &ctx),
    }
}

pub async fn please_login(State(state): State<AppState>, user: MaybeUser) -> Html<String> {
    let ctx = context(&state, user);
    Html(views::render_please_login(&ctx))
}
