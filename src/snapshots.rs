// Snapshot store: latest completed poll per group, kept in sorted order.
//
// crowd key -> { crowd name, group key -> Arc<Snapshot> }. Each level keeps
// a sorted key list that is updated when a key is first inserted, so reads
// walk it directly instead of sorting on every page load. Keys are never
// removed. The lock is a std RwLock and is never held across an await.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::GroupSettings;
use crate::graph::FeedPost;
use crate::ranking::Ranking;

/// Result of one completed poll cycle. Installed whole, never edited.
#[derive(Debug, Clone, Serialize)]
pub struct Snapshot {
    pub group_id: String,
    pub group_name: String,
    pub crowd_name: String,
    pub top_posters: Ranking,
    pub top_commenters: Ranking,
    /// Feed items of each ranked poster, by identity id.
    pub poster_posts: BTreeMap<String, Vec<FeedPost>>,
    pub last_updated: DateTime<Utc>,
    pub settings: GroupSettings,
}

impl Snapshot {
    pub fn posts_by(&self, user_id: &str) -> &[FeedPost] {
        self.poster_posts
            .get(user_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

/// Whether any group has fetched its feed yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "at", rename_all = "snake_case")]
pub enum Liveness {
    NotStarted,
    LastFeed(DateTime<Utc>),
}

impl Liveness {
    pub fn last_feed(&self) -> Option<DateTime<Utc>> {
        match self {
            Liveness::NotStarted => None,
            Liveness::LastFeed(at) => Some(*at),
        }
    }
}

struct CrowdNode {
    name: String,
    groups: HashMap<String, Arc<Snapshot>>,
    sorted: Vec<String>,
}

struct Tree {
    crowds: HashMap<String, CrowdNode>,
    sorted: Vec<String>,
    liveness: Liveness,
}

/// Read copy of one group inside a crowd.
#[derive(Debug, Clone, Serialize)]
pub struct GroupView {
    pub key: String,
    pub snapshot: Arc<Snapshot>,
}

/// Read copy of one crowd, groups in key order.
#[derive(Debug, Clone, Serialize)]
pub struct CrowdView {
    pub key: String,
    pub name: String,
    pub groups: Vec<GroupView>,
}

impl CrowdView {
    pub fn group(&self, key: &str) -> Option<&GroupView> {
        self.groups.iter().find(|g| g.key == key)
    }
}

/// Read copy of the whole store, crowds in key order.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DataTree {
    pub crowds: Vec<CrowdView>,
}

impl DataTree {
    pub fn crowd(&self, key: &str) -> Option<&CrowdView> {
        self.crowds.iter().find(|c| c.key == key)
    }

    pub fn is_empty(&self) -> bool {
        self.crowds.is_empty()
    }

    pub fn group_count(&self) -> usize {
        self.crowds.iter().map(|c| c.groups.len()).sum()
    }
}

pub struct SnapshotStore {
    tree: RwLock<Tree>,
}

impl Default for SnapshotStore {
    fn default() -> Self {
        Self::new()
    }
}

fn insert_sorted(keys: &mut Vec<String>, key: &str) {
    if let Err(pos) = keys.binary_search_by(|k| k.as_str().cmp(key)) {
        keys.insert(pos, key.to_string());
    }
}

impl SnapshotStore {
    pub fn new() -> Self {
        Self {
            tree: RwLock::new(Tree {
                crowds: HashMap::new(),
                sorted: Vec::new(),
                liveness: Liveness::NotStarted,
            }),
        }
    }

    // A poisoned lock only means a writer panicked between two plain
    // assignments; the tree itself is still consistent.
    fn read(&self) -> RwLockReadGuard<'_, Tree> {
        self.tree.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Tree> {
        self.tree.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Replace the snapshot for `crowd_key/group_key`, creating either
    /// level on first sight.
    pub fn install(&self, crowd_key: &str, group_key: &str, snapshot: Snapshot) {
        let mut tree = self.write();
        let tree = &mut *tree;

        if !tree.crowds.contains_key(crowd_key) {
            tree.crowds.insert(
                crowd_key.to_string(),
                CrowdNode {
                    name: snapshot.crowd_name.clone(),
                    groups: HashMap::new(),
                    sorted: Vec::new(),
                },
            );
            insert_sorted(&mut tree.sorted, crowd_key);
        }

        if let Some(crowd) = tree.crowds.get_mut(crowd_key) {
            crowd.name = snapshot.crowd_name.clone();
            if !crowd.groups.contains_key(group_key) {
                insert_sorted(&mut crowd.sorted, group_key);
            }
            crowd
                .groups
                .insert(group_key.to_string(), Arc::new(snapshot));
        }
    }

    /// Shallow copy of everything, in sorted key order at both levels.
    pub fn get_all(&self) -> DataTree {
        let tree = self.read();
        let crowds = tree
            .sorted
            .iter()
            .filter_map(|key| {
                let node = tree.crowds.get(key)?;
                Some(CrowdView {
                    key: key.clone(),
                    name: node.name.clone(),
                    groups: node
                        .sorted
                        .iter()
                        .filter_map(|g| {
                            node.groups.get(g).map(|s| GroupView {
                                key: g.clone(),
                                snapshot: Arc::clone(s),
                            })
                        })
                        .collect(),
                })
            })
            .collect();
        DataTree { crowds }
    }

    pub fn get_group(&self, crowd_key: &str, group_key: &str) -> Option<Arc<Snapshot>> {
        self.read()
            .crowds
            .get(crowd_key)?
            .groups
            .get(group_key)
            .cloned()
    }

    pub fn is_running(&self) -> Liveness {
        self.read().liveness
    }

    /// Record a successful feed fetch by any group.
    pub fn mark_feed_success(&self, at: DateTime<Utc>) {
        self.write().liveness = Liveness::LastFeed(at);
    }
}
