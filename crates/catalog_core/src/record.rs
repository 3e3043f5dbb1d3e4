use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::search::search_key;

/// How a record relates to the previous run's snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Preservation {
    /// Not present in the snapshot; all fields come from the fresh fetch.
    #[default]
    Fresh,
    /// Present in both; curated fields were carried over from the snapshot.
    Preserved,
    /// Only present in the snapshot; carried over unchanged.
    Survivor,
}

impl Preservation {
    pub fn is_preserved(self) -> bool {
        !matches!(self, Preservation::Fresh)
    }
}

/// Canonical per-video entity shared by every pipeline stage.
///
/// `id` is the only field guaranteed stable across refetches. Unknown fields
/// are ignored on read, so detail projections written by the shard builder
/// deserialize back into a `Record`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Record {
    pub id: String,
    pub title: String,
    pub raw_title: String,
    pub description: String,
    pub embed_url: String,
    pub download_url: String,
    pub thumbnail_url: String,
    pub splash_url: String,
    pub duration_secs: u64,
    pub size_bytes: u64,
    pub views: u64,
    pub uploaded: String,
    pub source: String,
    pub category: String,
    pub search_key: String,
    pub custom: Map<String, Value>,
    pub preservation: Preservation,
}

impl Record {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        let mut record = Self {
            id: id.into(),
            title: title.into(),
            ..Self::default()
        };
        record.refresh_search_key();
        record
    }

    pub fn has_identity(&self) -> bool {
        !self.id.trim().is_empty()
    }

    /// Recompute `search_key` from the current title.
    pub fn refresh_search_key(&mut self) {
        self.search_key = search_key(&self.title);
    }
}
