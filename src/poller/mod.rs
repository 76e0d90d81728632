// Collector: owns the per-group poll loops and the snapshot store they
// write into. The web layer and the CLI only talk to this.

pub mod machine;

pub use machine::{aggregate_feed, Draft, GroupPoller, PollState, Transition};

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use futures::future::join_all;
use tracing::info;

use crate::config::GroupSettings;
use crate::credentials::CredentialPool;
use crate::graph::{GraphApi, QueryClient};
use crate::snapshots::{DataTree, Liveness, Snapshot, SnapshotStore};

/// Labels of groups with a live loop.
type ActiveSet = Arc<Mutex<HashSet<String>>>;

/// Removes a group from the active set when its loop ends, however it ends.
struct ActiveGuard {
    active: ActiveSet,
    label: String,
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        let mut active = self.active.lock().unwrap_or_else(|e| e.into_inner());
        active.remove(&self.label);
    }
}

pub struct Collector {
    groups: Vec<GroupSettings>,
    client: Arc<QueryClient>,
    store: Arc<SnapshotStore>,
    active: ActiveSet,
}

impl Collector {
    pub fn new(
        groups: Vec<GroupSettings>,
        pool: Arc<CredentialPool>,
        store: Arc<SnapshotStore>,
        api: Arc<dyn GraphApi>,
    ) -> Self {
        Self {
            groups,
            client: Arc::new(QueryClient::new(api, pool)),
            store,
            active: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub fn groups(&self) -> &[GroupSettings] {
        &self.groups
    }

    pub fn pool(&self) -> &Arc<CredentialPool> {
        self.client.pool()
    }

    pub fn api(&self) -> &Arc<dyn GraphApi> {
        self.client.api()
    }

    /// Number of groups with a live loop.
    pub fn active_count(&self) -> usize {
        self.active.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Claim every configured group that has no live loop and build its
    /// poller. Claimed groups stay in the active set until the guard drops.
    fn claim_idle(&self) -> Vec<(GroupPoller, ActiveGuard)> {
        let mut active = self.active.lock().unwrap_or_else(|e| e.into_inner());
        self.groups
            .iter()
            .filter(|settings| active.insert(settings.label()))
            .map(|settings| {
                let guard = ActiveGuard {
                    active: Arc::clone(&self.active),
                    label: settings.label(),
                };
                let poller =
                    GroupPoller::new(settings.clone(), self.client.clone(), self.store.clone());
                (poller, guard)
            })
            .collect()
    }

    /// Spawn a background loop for every group not already polling.
    /// Returns how many loops were started.
    pub fn go(&self) -> usize {
        let claimed = self.claim_idle();
        let spawned = claimed.len();

        for (poller, guard) in claimed {
            info!(
                group = %guard.label,
                crowd = %poller.settings().crowd_name,
                "Spawning poll loop"
            );
            tokio::spawn(async move {
                let _guard = guard;
                poller.run().await;
            });
        }

        spawned
    }

    /// Poll every idle group in the foreground until all loops halt.
    /// Returns `(group label, halt reason)` per loop.
    pub async fn run(&self) -> Vec<(String, String)> {
        let claimed = self.claim_idle();
        let loops = claimed.into_iter().map(|(poller, guard)| async move {
            let reason = poller.run().await;
            (guard.label.clone(), reason)
        });
        join_all(loops).await
    }

    pub fn get_data(&self) -> DataTree {
        self.store.get_all()
    }

    pub fn get_group(&self, crowd_key: &str, group_key: &str) -> Option<Arc<Snapshot>> {
        self.store.get_group(crowd_key, group_key)
    }

    pub fn is_running(&self) -> Liveness {
        self.store.is_running()
    }
}
