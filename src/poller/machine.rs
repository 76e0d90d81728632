// Group poller: one explicit state machine per monitored group.
//
// AcquireCredential -> FetchGroupMeta -> FetchFeed -> Aggregate ->
// (EnrichPictures) -> Persist -> ScheduleNext -> AcquireCredential ...
//
// `step` performs exactly one state's work and says where to go next.
// `run` drives it until a step halts, which only happens when the pool
// has nothing to hand out.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::config::GroupSettings;
use crate::credentials::Credential;
use crate::graph::{self, FeedPage, FeedPost, GroupMeta, PictureResponse, QueryClient};
use crate::ranking::{IdentityCounter, Ranking};
use crate::snapshots::{Snapshot, SnapshotStore};

/// Rankings and per-poster posts built from one feed page.
#[derive(Debug, Clone)]
pub struct Draft {
    pub meta: GroupMeta,
    pub top_posters: Ranking,
    pub top_commenters: Ranking,
    pub poster_posts: BTreeMap<String, Vec<FeedPost>>,
}

impl Draft {
    /// Ids in either ranking, posters first, without repeats.
    pub fn ranked_ids(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        self.top_posters
            .ids()
            .chain(self.top_commenters.ids())
            .filter(|id| seen.insert(*id))
            .map(str::to_string)
            .collect()
    }
}

#[derive(Debug)]
pub enum PollState {
    AcquireCredential,
    FetchGroupMeta {
        credential: Credential,
    },
    FetchFeed {
        credential: Credential,
        meta: GroupMeta,
    },
    Aggregate {
        credential: Credential,
        meta: GroupMeta,
        feed: FeedPage,
    },
    EnrichPictures {
        credential: Credential,
        draft: Draft,
    },
    Persist {
        draft: Draft,
    },
    ScheduleNext,
}

impl PollState {
    pub fn name(&self) -> &'static str {
        match self {
            PollState::AcquireCredential => "acquire_credential",
            PollState::FetchGroupMeta { .. } => "fetch_group_meta",
            PollState::FetchFeed { .. } => "fetch_feed",
            PollState::Aggregate { .. } => "aggregate",
            PollState::EnrichPictures { .. } => "enrich_pictures",
            PollState::Persist { .. } => "persist",
            PollState::ScheduleNext => "schedule_next",
        }
    }
}

/// What the runner does after a step.
#[derive(Debug)]
pub enum Transition {
    /// Continue immediately.
    Next(PollState),
    /// Sleep, then continue.
    After(Duration, PollState),
    /// Stop this group's loop.
    Halt(String),
}

/// Count a feed page into poster and commenter rankings.
pub fn aggregate_feed(settings: &GroupSettings, meta: GroupMeta, feed: &FeedPage) -> Draft {
    let mut posters = IdentityCounter::new();
    let mut commenters = IdentityCounter::new();
    let mut posts_by_author: BTreeMap<String, Vec<FeedPost>> = BTreeMap::new();

    for post in &feed.data {
        if let Some(author) = &post.from {
            let identity = author.identity();
            if identity.is_resolvable() {
                posts_by_author
                    .entry(identity.id.clone())
                    .or_default()
                    .push(post.clone());
            }
            posters.record(&identity);
        }

        for comment in post.comments() {
            if let Some(author) = &comment.from {
                commenters.record(&author.identity());
            }
        }
    }

    let top_posters = Ranking::new(posters.top_n(settings.num_top_posters as usize));
    let top_commenters = Ranking::new(commenters.top_n(settings.num_top_commenters as usize));

    // Only ranked posters keep their posts
    posts_by_author.retain(|id, _| top_posters.position(id).is_some());

    Draft {
        meta,
        top_posters,
        top_commenters,
        poster_posts: posts_by_author,
    }
}

pub struct GroupPoller {
    settings: GroupSettings,
    client: Arc<QueryClient>,
    store: Arc<SnapshotStore>,
}

impl GroupPoller {
    pub fn new(settings: GroupSettings, client: Arc<QueryClient>, store: Arc<SnapshotStore>) -> Self {
        Self {
            settings,
            client,
            store,
        }
    }

    pub fn settings(&self) -> &GroupSettings {
        &self.settings
    }

    /// Drive the machine until it halts; returns the halt reason.
    pub async fn run(&self) -> String {
        let label = self.settings.label();
        info!(group = %label, "Poll loop started");

        let mut state = PollState::AcquireCredential;
        loop {
            match self.step(state).await {
                Transition::Next(next) => state = next,
                Transition::After(delay, next) => {
                    debug!(group = %label, next = next.name(), delay_secs = delay.as_secs(), "Sleeping");
                    tokio::time::sleep(delay).await;
                    state = next;
                }
                Transition::Halt(reason) => {
                    warn!(group = %label, reason = %reason, "Poll loop halted");
                    return reason;
                }
            }
        }
    }

    fn retry(&self) -> Transition {
        Transition::After(self.settings.retry_interval(), PollState::AcquireCredential)
    }

    /// Perform one state's work.
    pub async fn step(&self, state: PollState) -> Transition {
        let label = self.settings.label();
        let retry_interval = self.settings.retry_interval();

        match state {
            PollState::AcquireCredential => match self.client.pool().get().await {
                Ok(credential) => {
                    debug!(group = %label, token = %credential.masked_token(), "Credential acquired");
                    Transition::Next(PollState::FetchGroupMeta { credential })
                }
                Err(e) => Transition::Halt(format!("no credential for {label}: {e}")),
            },

            PollState::FetchGroupMeta { credential } => {
                match self
                    .client
                    .query::<GroupMeta>(&self.settings.id, &credential, retry_interval)
                    .await
                {
                    Ok(meta) => Transition::Next(PollState::FetchFeed { credential, meta }),
                    Err(e) => {
                        warn!(group = %label, error = %e, "Group metadata fetch failed");
                        self.retry()
                    }
                }
            }

            PollState::FetchFeed { credential, meta } => {
                let uri = graph::feed_uri(&meta.id, self.settings.num_posts);
                match self
                    .client
                    .query::<FeedPage>(&uri, &credential, retry_interval)
                    .await
                {
                    Ok(feed) => {
                        self.store.mark_feed_success(Utc::now());
                        Transition::Next(PollState::Aggregate {
                            credential,
                            meta,
                            feed,
                        })
                    }
                    Err(e) => {
                        warn!(group = %label, error = %e, "Feed fetch failed");
                        self.retry()
                    }
                }
            }

            PollState::Aggregate {
                credential,
                meta,
                feed,
            } => {
                let draft = aggregate_feed(&self.settings, meta, &feed);
                debug!(
                    group = %label,
                    posts = feed.data.len(),
                    posters = draft.top_posters.entries.len(),
                    commenters = draft.top_commenters.entries.len(),
                    "Feed aggregated"
                );

                let has_ids = !draft.top_posters.is_empty() || !draft.top_commenters.is_empty();
                if self.settings.user_photos && has_ids {
                    Transition::Next(PollState::EnrichPictures { credential, draft })
                } else {
                    Transition::Next(PollState::Persist { draft })
                }
            }

            PollState::EnrichPictures {
                credential,
                mut draft,
            } => {
                let ids = draft.ranked_ids();
                let uri = graph::pictures_uri(ids.iter().map(String::as_str));
                match self
                    .client
                    .query::<PictureResponse>(&uri, &credential, retry_interval)
                    .await
                {
                    Ok(response) => {
                        let pictures = graph::pictures_by_id(&response);
                        draft.top_posters.attach_pictures(&pictures);
                        draft.top_commenters.attach_pictures(&pictures);
                    }
                    Err(e) => {
                        warn!(group = %label, error = %e, "Picture enrichment failed, saving without pictures");
                    }
                }
                Transition::Next(PollState::Persist { draft })
            }

            PollState::Persist { draft } => {
                let group_name = if draft.meta.name.trim().is_empty() {
                    self.settings.group_key.clone()
                } else {
                    draft.meta.name.clone()
                };

                let snapshot = Snapshot {
                    group_id: draft.meta.id,
                    group_name,
                    crowd_name: self.settings.crowd_name.clone(),
                    top_posters: draft.top_posters,
                    top_commenters: draft.top_commenters,
                    poster_posts: draft.poster_posts,
                    last_updated: Utc::now(),
                    settings: self.settings.clone(),
                };
                self.store
                    .install(&self.settings.crowd_key, &self.settings.group_key, snapshot);
                info!(group = %label, "Snapshot saved");
                Transition::Next(PollState::ScheduleNext)
            }

            PollState::ScheduleNext => {
                debug!(
                    group = %label,
                    refresh_secs = self.settings.refresh_secs,
                    "Next refresh scheduled"
                );
                Transition::After(self.settings.refresh_interval(), PollState::AcquireCredential)
            }
        }
    }
}
