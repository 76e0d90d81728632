// Serde shapes for the Graph API responses the poller and login flow read.
//
// Only the fields we use are declared; everything else in the payload is
// ignored. Missing pieces default rather than fail, since the Graph API
// omits `from` on posts by deleted or restricted users.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::ranking::Identity;

/// `GET {group_id}`
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GroupMeta {
    pub id: String,
    #[serde(default)]
    pub name: String,
}

/// The `from` field on posts and comments.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct Author {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
}

impl Author {
    pub fn identity(&self) -> Identity {
        Identity::new(self.id.clone(), self.name.clone())
    }
}

/// `GET {id}/feed?fields=from,message,comments&limit=N`
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct FeedPage {
    #[serde(default)]
    pub data: Vec<FeedPost>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct FeedPost {
    #[serde(default)]
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<Author>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comments: Option<CommentPage>,
}

impl FeedPost {
    pub fn comments(&self) -> &[Comment] {
        self.comments.as_ref().map(|c| c.data.as_slice()).unwrap_or(&[])
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct CommentPage {
    #[serde(default)]
    pub data: Vec<Comment>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct Comment {
    #[serde(default)]
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<Author>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_time: Option<String>,
}

/// One value of the `?ids=a,b&fields=id,name,picture` response, which is
/// keyed by user id.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PictureEntry {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub picture: Option<PictureField>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PictureField {
    #[serde(default)]
    pub data: PictureData,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PictureData {
    #[serde(default)]
    pub url: Option<String>,
}

pub type PictureResponse = HashMap<String, PictureEntry>;

/// Flatten a picture response into id -> URL, skipping users without one.
pub fn pictures_by_id(response: &PictureResponse) -> HashMap<String, String> {
    response
        .iter()
        .filter_map(|(key, entry)| {
            let url = entry.picture.as_ref()?.data.url.clone()?;
            let id = if entry.id.is_empty() {
                key.clone()
            } else {
                entry.id.clone()
            };
            Some((id, url))
        })
        .collect()
}

/// `GET me?fields=id,name`
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct UserProfile {
    pub id: String,
    #[serde(default)]
    pub name: String,
}

/// `GET oauth/access_token?...&code=...`
#[derive(Debug, Clone, Deserialize)]
pub struct AccessTokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub expires_in: Option<i64>,
}

/// `GET debug_token?input_token=...&access_token={app_id}|{secret}`
#[derive(Debug, Clone, Deserialize)]
pub struct DebugTokenResponse {
    pub data: DebugTokenData,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DebugTokenData {
    #[serde(default)]
    pub is_valid: bool,
    /// Unix seconds. Zero means the token never expires.
    #[serde(default)]
    pub expires_at: i64,
    #[serde(default)]
    pub user_id: Option<String>,
}
