// Leaderboard ranking: per-identity occurrence counts and top-N extraction.
//
// One IdentityCounter is filled from exactly one feed page. Ordering is
// fully deterministic: count descending, then display name ascending, then
// remote id ascending, so two counters fed the same multiset in any order
// produce the same ranking.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

/// A remote user who authored a post or comment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub id: String,
    pub name: String,
    /// Profile picture URL, filled in by the enrichment step.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub picture: Option<String>,
}

impl Identity {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            picture: None,
        }
    }

    /// An identity is countable only when both halves of its key are present.
    pub fn is_resolvable(&self) -> bool {
        !self.id.trim().is_empty() && !self.name.trim().is_empty()
    }
}

/// One row of a leaderboard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankedEntry {
    pub identity: Identity,
    pub count: u32,
    /// Whole-number share of the top entry's count, in [1, 100].
    pub percent: u32,
}

#[derive(Debug)]
struct Tally {
    identity: Identity,
    count: u32,
}

/// Counts occurrences per (remote id, display name).
#[derive(Debug, Default)]
pub struct IdentityCounter {
    tallies: HashMap<(String, String), Tally>,
}

impl IdentityCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one occurrence. Identities missing an id or name are skipped.
    pub fn record(&mut self, identity: &Identity) {
        if !identity.is_resolvable() {
            return;
        }

        let key = (identity.id.clone(), identity.name.clone());
        let tally = self.tallies.entry(key).or_insert_with(|| Tally {
            identity: identity.clone(),
            count: 0,
        });
        tally.count += 1;
        // Keep the most recently seen payload
        tally.identity = identity.clone();
    }

    /// Number of distinct identities seen so far.
    pub fn len(&self) -> usize {
        self.tallies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tallies.is_empty()
    }

    /// Return up to `n` entries, highest count first.
    pub fn top_n(&self, n: usize) -> Vec<RankedEntry> {
        let mut tallies: Vec<&Tally> = self.tallies.values().collect();
        tallies.sort_by(|a, b| compare_tallies(a, b));
        tallies.truncate(n);

        let top = tallies.first().map(|t| t.count).unwrap_or(0);

        tallies
            .into_iter()
            .map(|t| RankedEntry {
                identity: t.identity.clone(),
                count: t.count,
                percent: percent_of(t.count, top),
            })
            .collect()
    }
}

fn compare_tallies(a: &Tally, b: &Tally) -> Ordering {
    b.count
        .cmp(&a.count)
        .then_with(|| a.identity.name.cmp(&b.identity.name))
        .then_with(|| a.identity.id.cmp(&b.identity.id))
}

/// Share of `top`, truncated to a whole number and never below 1.
pub fn percent_of(count: u32, top: u32) -> u32 {
    if top == 0 {
        return 0;
    }
    let pct = (u64::from(count) * 100 / u64::from(top)) as u32;
    pct.clamp(1, 100)
}

/// A finished leaderboard plus the reverse index from identity id to row.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ranking {
    pub entries: Vec<RankedEntry>,
    pub index: BTreeMap<String, usize>,
}

impl Ranking {
    pub fn new(entries: Vec<RankedEntry>) -> Self {
        let mut index = BTreeMap::new();
        for (offset, entry) in entries.iter().enumerate() {
            // First (highest-ranked) row wins if an id appears under two names
            index.entry(entry.identity.id.clone()).or_insert(offset);
        }
        Self { entries, index }
    }

    pub fn position(&self, id: &str) -> Option<usize> {
        self.index.get(id).copied()
    }

    pub fn entry_for(&self, id: &str) -> Option<&RankedEntry> {
        self.position(id).and_then(|i| self.entries.get(i))
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.identity.id.as_str())
    }

    /// Attach pictures by identity id. Entries with no match keep `None`.
    pub fn attach_pictures(&mut self, pictures: &HashMap<String, String>) {
        for entry in &mut self.entries {
            if let Some(url) = pictures.get(&entry.identity.id) {
                entry.identity.picture = Some(url.clone());
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
