//! Data models for the mirrored following set.
//!
//! These structures represent one immutable, fully-indexed version of the
//! remote relation ("who the user follows") plus the search and event
//! types built on top of it. Field names match the persisted JSON format.

use chrono::{DateTime, TimeZone, Utc};
use serde::de::Error as _;
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Persisted snapshot format version.
pub const SNAPSHOT_VERSION: &str = "1.0";

/// Sentinel key carrying an index's key count in the persisted format.
pub const INDEX_TOTAL_KEY: &str = "__total__";

/// One remote account record mirrored locally.
///
/// `id` is the natural key; duplicates from the remote are overwritten
/// last-write-wins during snapshot build.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FollowedUser {
    pub id: String,
    pub display_name: String,
    #[serde(default)]
    pub bio: String,
    /// Unix seconds of the follow action; `None` when the remote did not
    /// report one.
    #[serde(default)]
    pub followed_at: Option<i64>,
    #[serde(default)]
    pub avatar_ref: String,
    /// Opaque remote decorations (verification, membership tiers, ...).
    #[serde(default)]
    pub badges: BTreeMap<String, serde_json::Value>,
}

impl FollowedUser {
    /// Human-readable follow time, or "unknown".
    #[must_use]
    pub fn followed_at_display(&self) -> String {
        self.followed_at
            .and_then(|ts| Utc.timestamp_opt(ts, 0).single())
            .map_or_else(
                || "unknown".to_string(),
                |dt| dt.format("%Y-%m-%d %H:%M").to_string(),
            )
    }

    /// Label of the verification badge, if any.
    #[must_use]
    pub fn verified_label(&self) -> Option<&str> {
        self.badges
            .get("official")
            .and_then(|v| v.get("desc"))
            .and_then(serde_json::Value::as_str)
            .filter(|s| !s.is_empty())
    }
}

/// One inverted index: key → ids.
///
/// Serializes as a flat JSON map with an extra [`INDEX_TOTAL_KEY`] entry
/// holding the key count, so consumers of the persisted file get O(1)
/// stats without walking the map. A key with an empty id set is never
/// stored.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InvertedIndex {
    entries: BTreeMap<String, Vec<String>>,
}

impl InvertedIndex {
    /// Append `id` under `key`. Duplicates under the same key are kept.
    pub fn insert(&mut self, key: String, id: &str) {
        self.entries.entry(key).or_default().push(id.to_string());
    }

    /// Append `id` under `key` unless it is already present for that key.
    pub fn insert_unique(&mut self, key: String, id: &str) {
        let ids = self.entries.entry(key).or_default();
        if !ids.iter().any(|existing| existing == id) {
            ids.push(id.to_string());
        }
    }

    /// Ids recorded under `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&[String]> {
        self.entries.get(key).map(Vec::as_slice)
    }

    /// Number of keys (the value of the persisted sentinel).
    #[must_use]
    pub fn key_count(&self) -> usize {
        self.entries.len()
    }

    /// Whether the index has no keys.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate over `(key, ids)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Vec<String>)> {
        self.entries.iter()
    }
}

impl Serialize for InvertedIndex {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len() + 1))?;
        for (key, ids) in &self.entries {
            map.serialize_entry(key, ids)?;
        }
        map.serialize_entry(INDEX_TOTAL_KEY, &self.entries.len())?;
        map.end()
    }
}

impl<'de> Deserialize<'de> for InvertedIndex {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = BTreeMap::<String, serde_json::Value>::deserialize(deserializer)?;
        let mut entries = BTreeMap::new();
        for (key, value) in raw {
            if key == INDEX_TOTAL_KEY {
                continue;
            }
            let ids: Vec<String> = serde_json::from_value(value).map_err(D::Error::custom)?;
            if !ids.is_empty() {
                entries.insert(key, ids);
            }
        }
        Ok(Self { entries })
    }
}

/// The three inverted indices built per snapshot.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct IndexSet {
    /// Case-folded prefixes of `display_name` (length 1..=20) → ids.
    pub by_name: InvertedIndex,
    /// Prefixes of the id string (only for ids of ≤ 20 chars) → ids.
    pub by_id: InvertedIndex,
    /// Alphanumeric bio tokens of length ≥ 2, case-folded → ids.
    pub by_bio_token: InvertedIndex,
}

/// Length-distribution histograms computed per snapshot.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Statistics {
    /// Display-name length distribution, bucketed by 10 ("0-9", "10-19", ...).
    pub name_length_stats: BTreeMap<String, u64>,
    /// Bio length distribution, bucketed by 50.
    pub bio_length_stats: BTreeMap<String, u64>,
}

/// One immutable, fully-indexed version of the mirrored following set.
///
/// A snapshot is never mutated after construction; updates build a new
/// snapshot that atomically replaces the old one in the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub version: String,
    pub update_time: DateTime<Utc>,
    pub total_count: usize,
    pub users: BTreeMap<String, FollowedUser>,
    pub index: IndexSet,
    pub statistics: Statistics,
}

impl Snapshot {
    /// An empty snapshot (no entities, no indices).
    #[must_use]
    pub fn empty() -> Self {
        Self {
            version: SNAPSHOT_VERSION.to_string(),
            update_time: Utc::now(),
            total_count: 0,
            users: BTreeMap::new(),
            index: IndexSet::default(),
            statistics: Statistics::default(),
        }
    }

    /// Whether the snapshot holds no entities.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

/// One page of search results with pagination metadata.
#[derive(Debug, Clone, Serialize)]
pub struct SearchPage {
    pub results: Vec<FollowedUser>,
    pub total: usize,
    pub page: usize,
    pub page_size: usize,
    pub total_pages: usize,
    pub query: String,
    /// Wall-clock milliseconds for the filter+slice step only.
    pub elapsed_ms: f64,
}

impl SearchPage {
    /// The canonical empty result for a blank query.
    #[must_use]
    pub fn empty(page_size: usize) -> Self {
        Self {
            results: Vec::new(),
            total: 0,
            page: 1,
            page_size,
            total_pages: 0,
            query: String::new(),
            elapsed_ms: 0.0,
        }
    }
}

/// Change notification delivered to store observers.
#[derive(Debug, Clone)]
pub enum StoreEvent {
    /// A new snapshot replaced the current one (bulk build or removal).
    SnapshotReplaced(Arc<Snapshot>),
    /// The store was explicitly cleared and the backing file removed.
    SnapshotCleared,
    /// The persisted file existed but could not be decoded.
    LoadFailed(String),
}
