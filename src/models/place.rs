//! Gazetteer and search result structures.

use hashbrown::HashSet;
use serde::{Deserialize, Serialize};

use crate::search::normalize;

/// Raw gazetteer record as read from the static source file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GazetteerRecord {
    pub label: String,
    #[serde(default)]
    pub address: String,
    pub lat: f64,
    pub lon: f64,
}

/// A named place from the static gazetteer, pre-normalized at load time.
///
/// Immutable after startup; the search fallback only ever reads these.
#[derive(Debug, Clone)]
pub struct GazetteerPlace {
    pub label: String,
    pub address: String,
    pub lat: f64,
    pub lon: f64,
    pub normalized_label: String,
    pub normalized_address: String,
    pub token_set: HashSet<String>,
}

impl GazetteerPlace {
    pub fn from_record(record: GazetteerRecord) -> Self {
        let normalized_label = normalize(&record.label);
        let normalized_address = normalize(&record.address);
        let token_set = normalized_label
            .split_whitespace()
            .chain(normalized_address.split_whitespace())
            .map(String::from)
            .collect();

        Self {
            label: record.label,
            address: record.address,
            lat: record.lat,
            lon: record.lon,
            normalized_label,
            normalized_address,
            token_set,
        }
    }
}

/// A ranked search suggestion returned to the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Suggestion {
    pub label: String,
    /// Secondary display line (the place's address, when known).
    pub context: String,
    pub lat: f64,
    pub lon: f64,
    /// Great-circle distance to the caller in meters, when both the caller
    /// and the place have finite coordinates.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub distance: Option<f64>,
}

/// A recently looked-up entrance, kept in the bounded entrance cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedEntrance {
    pub id: String,
    pub lat: f64,
    pub lon: f64,
    pub label: String,
}

/// One entry in the recent-searches list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecentSearch {
    pub id: String,
    pub label: String,
    pub lat: f64,
    pub lon: f64,
}
