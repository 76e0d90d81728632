use std::collections::BTreeMap;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Central configuration loaded from environment variables.
///
/// Secrets come from env vars only. The .env file is loaded automatically
/// at startup via dotenvy. The monitored crowds live in a separate JSON
/// file, read on demand by `load_crowds()`.
pub struct Config {
    pub db_path: String,
    /// JSON file describing crowds, groups and poll defaults.
    pub crowds_file: PathBuf,
    /// Graph API host (defaults to https://graph.facebook.com).
    pub graph_url: String,
    /// Graph API version segment (defaults to v2.7).
    pub graph_version: String,
    /// Upper bound on each Graph request.
    pub http_timeout: Duration,
    /// Facebook app credentials for the login flow
    #[cfg(feature = "web")]
    pub facebook_app_id: String,
    #[cfg(feature = "web")]
    pub facebook_app_secret: String,
    /// Absolute URL of `/auth/facebook/callback` as registered with Facebook.
    #[cfg(feature = "web")]
    pub facebook_callback_url: String,
    /// Secret for HMAC session token signing (CROWDSTATS_SESSION_SECRET env var)
    #[cfg(feature = "web")]
    pub session_secret: String,
    /// Facebook user ids allowed to list and delete pooled tokens
    /// (CROWDSTATS_ADMIN_IDS, comma separated). Empty means nobody.
    #[cfg(feature = "web")]
    pub admin_ids: Vec<String>,
}

/// Placeholder value shipped in the sample .env.
#[cfg(feature = "web")]
const PLACEHOLDER: &str = "FIXME";

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Everything has a default except the Facebook app settings, which are
    /// only checked (by `require_web`) before serving.
    pub fn load() -> Result<Self> {
        let http_timeout = match env::var("CROWDSTATS_HTTP_TIMEOUT_SECS") {
            Ok(raw) => {
                let secs: u64 = raw
                    .trim()
                    .parse()
                    .with_context(|| format!("CROWDSTATS_HTTP_TIMEOUT_SECS is not a number: {raw}"))?;
                if secs == 0 {
                    anyhow::bail!("CROWDSTATS_HTTP_TIMEOUT_SECS must be greater than zero");
                }
                Duration::from_secs(secs)
            }
            Err(_) => Duration::from_secs(30),
        };

        Ok(Self {
            db_path: env::var("CROWDSTATS_DB_PATH")
                .unwrap_or_else(|_| "./crowdstats.db".to_string()),
            crowds_file: env::var("CROWDSTATS_CROWDS_FILE")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("./crowds.json")),
            graph_url: env::var("CROWDSTATS_GRAPH_URL")
                .unwrap_or_else(|_| crate::graph::DEFAULT_GRAPH_URL.to_string()),
            graph_version: env::var("CROWDSTATS_GRAPH_VERSION")
                .unwrap_or_else(|_| crate::graph::DEFAULT_GRAPH_VERSION.to_string()),
            http_timeout,
            #[cfg(feature = "web")]
            facebook_app_id: env::var("FACEBOOK_APP_ID").unwrap_or_default(),
            #[cfg(feature = "web")]
            facebook_app_secret: env::var("FACEBOOK_APP_SECRET").unwrap_or_default(),
            #[cfg(feature = "web")]
            facebook_callback_url: env::var("FACEBOOK_CALLBACK_URL").unwrap_or_default(),
            #[cfg(feature = "web")]
            session_secret: env::var("CROWDSTATS_SESSION_SECRET").unwrap_or_default(),
            #[cfg(feature = "web")]
            admin_ids: parse_id_list(&env::var("CROWDSTATS_ADMIN_IDS").unwrap_or_default()),
        })
    }

    /// Whether this Facebook user may administer the token pool.
    #[cfg(feature = "web")]
    pub fn is_admin(&self, user_id: &str) -> bool {
        self.admin_ids.iter().any(|id| id == user_id)
    }

    /// Read and validate the crowds file.
    pub fn load_crowds(&self) -> Result<CrowdsConfig> {
        CrowdsConfig::load(&self.crowds_file)
    }

    /// Preflight for `serve`: every login setting must be filled in with a
    /// real value, not left empty or at the placeholder.
    #[cfg(feature = "web")]
    pub fn require_web(&self) -> Result<()> {
        require_set(
            "FACEBOOK_APP_ID",
            &self.facebook_app_id,
            "Set it to the app ID from https://developers.facebook.com/",
        )?;
        require_set(
            "FACEBOOK_APP_SECRET",
            &self.facebook_app_secret,
            "Set it to the app secret from https://developers.facebook.com/",
        )?;
        require_set(
            "FACEBOOK_CALLBACK_URL",
            &self.facebook_callback_url,
            "It should point at /auth/facebook/callback, e.g. http://localhost:3000/auth/facebook/callback",
        )?;
        require_set(
            "CROWDSTATS_SESSION_SECRET",
            &self.session_secret,
            "Use any long random string. Generate one with: openssl rand -hex 32",
        )?;
        Ok(())
    }
}

#[cfg(feature = "web")]
fn parse_id_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(String::from)
        .collect()
}

#[cfg(feature = "web")]
fn require_set(var: &str, value: &str, hint: &str) -> Result<()> {
    if value.trim().is_empty() || value.trim() == PLACEHOLDER {
        anyhow::bail!(
            "{var} has not been set. {hint}\n\
             Add it to your .env file. See .env.example for the required variables."
        );
    }
    Ok(())
}

// -- Crowds file --

/// Poll settings that may be given at any level of the crowds file.
/// An absent field inherits from the level above; a present one wins,
/// including an explicit zero.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PollOverrides {
    pub num_posts: Option<u32>,
    pub num_top_posters: Option<u32>,
    pub num_top_commenters: Option<u32>,
    /// Seconds between completed polls.
    pub refresh_interval: Option<u64>,
    /// Seconds to wait after a failed step.
    pub retry_interval: Option<u64>,
    pub user_photos: Option<bool>,
}

impl PollOverrides {
    /// Built-in values used when no level of the file sets a field.
    pub fn builtin() -> Self {
        Self {
            num_posts: Some(100),
            num_top_posters: Some(10),
            num_top_commenters: Some(10),
            refresh_interval: Some(300),
            retry_interval: Some(10),
            user_photos: Some(true),
        }
    }

    /// `over` on top of `self`.
    pub fn layer(&self, over: &PollOverrides) -> PollOverrides {
        PollOverrides {
            num_posts: over.num_posts.or(self.num_posts),
            num_top_posters: over.num_top_posters.or(self.num_top_posters),
            num_top_commenters: over.num_top_commenters.or(self.num_top_commenters),
            refresh_interval: over.refresh_interval.or(self.refresh_interval),
            retry_interval: over.retry_interval.or(self.retry_interval),
            user_photos: over.user_photos.or(self.user_photos),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupEntry {
    /// Remote Graph id of the group.
    pub id: String,
    #[serde(flatten)]
    pub overrides: PollOverrides,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrowdEntry {
    /// Display name; defaults to the crowd key.
    #[serde(default)]
    pub name: Option<String>,
    #[serde(flatten)]
    pub overrides: PollOverrides,
    #[serde(default)]
    pub groups: BTreeMap<String, GroupEntry>,
}

/// Parsed crowds file.
///
/// ```json
/// {
///   "defaults": { "numPosts": 100, "refreshInterval": 300 },
///   "crowds": {
///     "pets": {
///       "name": "Pet Owners",
///       "userPhotos": false,
///       "groups": { "cats": { "id": "1234567890", "numTopPosters": 5 } }
///     }
///   }
/// }
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CrowdsConfig {
    pub defaults: PollOverrides,
    pub crowds: BTreeMap<String, CrowdEntry>,
}

/// Fully resolved settings for one monitored group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupSettings {
    pub crowd_key: String,
    pub crowd_name: String,
    pub group_key: String,
    /// Remote Graph id.
    pub id: String,
    pub num_posts: u32,
    pub num_top_posters: u32,
    pub num_top_commenters: u32,
    pub refresh_secs: u64,
    pub retry_secs: u64,
    pub user_photos: bool,
}

impl GroupSettings {
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_secs)
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_secs(self.retry_secs)
    }

    /// `crowd/group`, used in log fields and task bookkeeping.
    pub fn label(&self) -> String {
        format!("{}/{}", self.crowd_key, self.group_key)
    }
}

impl CrowdsConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read crowds file {}", path.display()))?;
        Self::from_json(&raw).with_context(|| format!("Invalid crowds file {}", path.display()))
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        let parsed: CrowdsConfig =
            serde_json::from_str(raw).context("Crowds file is not valid JSON")?;
        // Validate eagerly so a bad file fails at startup, not in a loop
        parsed.groups()?;
        Ok(parsed)
    }

    /// Resolve every group: group overrides > crowd overrides > file
    /// defaults > built-ins. Ordered by crowd key, then group key.
    pub fn groups(&self) -> Result<Vec<GroupSettings>> {
        let base = PollOverrides::builtin().layer(&self.defaults);
        let mut out = Vec::new();

        for (crowd_key, crowd) in &self.crowds {
            let crowd_level = base.layer(&crowd.overrides);
            let crowd_name = crowd
                .name
                .clone()
                .filter(|n| !n.trim().is_empty())
                .unwrap_or_else(|| crowd_key.clone());

            for (group_key, group) in &crowd.groups {
                let r = crowd_level.layer(&group.overrides);
                let label = format!("{crowd_key}/{group_key}");

                if group.id.trim().is_empty() {
                    anyhow::bail!("Group {label} has no id");
                }

                let settings = GroupSettings {
                    crowd_key: crowd_key.clone(),
                    crowd_name: crowd_name.clone(),
                    group_key: group_key.clone(),
                    id: group.id.trim().to_string(),
                    num_posts: r.num_posts.unwrap_or_default(),
                    num_top_posters: r.num_top_posters.unwrap_or_default(),
                    num_top_commenters: r.num_top_commenters.unwrap_or_default(),
                    refresh_secs: r.refresh_interval.unwrap_or_default(),
                    retry_secs: r.retry_interval.unwrap_or_default(),
                    user_photos: r.user_photos.unwrap_or_default(),
                };

                if settings.refresh_secs == 0 {
                    anyhow::bail!("Group {label}: refreshInterval must be greater than zero");
                }
                if settings.retry_secs == 0 {
                    anyhow::bail!("Group {label}: retryInterval must be greater than zero");
                }

                out.push(settings);
            }
        }

        Ok(out)
    }
}
