// Facebook Graph API access.
//
// `client` is the single-attempt transport behind the `GraphApi` trait,
// `query` wraps it in the retrying, health-reporting QueryClient, and
// `models` holds the response shapes.

pub mod client;
pub mod models;
pub mod query;

pub use client::{
    build_url, FetchError, GraphApi, HttpGraphApi, DEFAULT_GRAPH_URL, DEFAULT_GRAPH_VERSION,
};
pub use models::{
    pictures_by_id, AccessTokenResponse, Author, Comment, CommentPage, DebugTokenResponse,
    FeedPage, FeedPost, GroupMeta, PictureResponse, UserProfile,
};
pub use query::{QueryClient, QueryError, MAX_MALFORMED_RETRIES};

/// Recent posts of a group, with their authors and nested comments.
pub fn feed_uri(group_id: &str, limit: u32) -> String {
    format!("{group_id}/feed?fields=from,message,comments&limit={limit}")
}

/// Batched id/name/picture lookup for a set of user ids.
pub fn pictures_uri<'a>(ids: impl IntoIterator<Item = &'a str>) -> String {
    let ids: Vec<&str> = ids.into_iter().collect();
    format!("?ids={}&fields=id,name,picture", ids.join(","))
}
