//! Local search fallback over the static gazetteer.
//!
//! Ranking is deliberately simple: token hits, prefix bonuses and a small
//! proximity bonus. It only has to be good enough to keep search usable when
//! the remote provider is unreachable.

pub mod normalize;

use std::path::Path;

use anyhow::{Context, Result};
use tracing::info;

use crate::geo::haversine_m;
use crate::models::{GazetteerPlace, GazetteerRecord, Suggestion};

pub use normalize::{normalize, tokenize};

const DEFAULT_LIMIT: usize = 8;
const MAX_LIMIT: usize = 50;

/// Score points for an exact token-set hit.
const TOKEN_HIT: f64 = 4.0;
/// Score points for a bare substring hit.
const SUBSTRING_HIT: f64 = 1.0;
/// Bonus when the normalized label starts with the full query.
const LABEL_PREFIX_BONUS: f64 = 3.0;
/// Bonus when the normalized address starts with the full query.
const ADDRESS_PREFIX_BONUS: f64 = 1.0;
/// Proximity bonus tapers to zero at this distance.
const PROXIMITY_RANGE_M: f64 = 5000.0;

/// Clamp a requested result count into the allowed range.
pub fn clamp_limit(limit: Option<usize>) -> usize {
    limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT)
}

/// Options for a fallback search.
#[derive(Debug, Clone, Copy, Default)]
pub struct SuggestOptions {
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub limit: Option<usize>,
}

/// Immutable gazetteer snapshot loaded once at startup.
#[derive(Debug, Default)]
pub struct Gazetteer {
    places: Vec<GazetteerPlace>,
}

impl Gazetteer {
    pub fn new(places: Vec<GazetteerPlace>) -> Self {
        Self { places }
    }

    /// Load places from a static JSON file (array of records).
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read gazetteer {}", path.as_ref().display()))?;
        let records: Vec<GazetteerRecord> =
            serde_json::from_str(&content).context("Failed to parse gazetteer file")?;

        let places = records.into_iter().map(GazetteerPlace::from_record).collect();
        let gazetteer = Self { places };
        info!("Loaded gazetteer with {} places", gazetteer.len());
        Ok(gazetteer)
    }

    pub fn len(&self) -> usize {
        self.places.len()
    }

    pub fn is_empty(&self) -> bool {
        self.places.is_empty()
    }

    /// Rank places against a free-text query.
    ///
    /// Pure and deterministic for a fixed snapshot: identical inputs always
    /// produce the identical ordered output.
    pub fn suggest(&self, query: &str, options: SuggestOptions) -> Vec<Suggestion> {
        let normalized_query = normalize(query);
        let tokens: Vec<&str> = normalized_query.split_whitespace().collect();
        if tokens.is_empty() || self.places.is_empty() {
            return Vec::new();
        }

        let limit = clamp_limit(options.limit);
        let focus = match (options.lat, options.lon) {
            (Some(lat), Some(lon)) if lat.is_finite() && lon.is_finite() => Some((lat, lon)),
            _ => None,
        };

        let mut scored: Vec<(f64, Suggestion)> = Vec::new();
        for place in &self.places {
            let Some(mut score) = score_tokens(place, &tokens) else {
                continue;
            };
            if place.normalized_label.starts_with(&normalized_query) {
                score += LABEL_PREFIX_BONUS;
            }
            if !place.normalized_address.is_empty()
                && place.normalized_address.starts_with(&normalized_query)
            {
                score += ADDRESS_PREFIX_BONUS;
            }

            let distance = focus.and_then(|(lat, lon)| {
                (place.lat.is_finite() && place.lon.is_finite())
                    .then(|| haversine_m(lat, lon, place.lat, place.lon))
            });
            if let Some(d) = distance {
                score += (1.0 - d / PROXIMITY_RANGE_M).max(0.0);
            }

            scored.push((
                score,
                Suggestion {
                    label: place.label.clone(),
                    context: place.address.clone(),
                    lat: place.lat,
                    lon: place.lon,
                    distance,
                },
            ));
        }

        // Score descending, then nearest first (no distance sorts last),
        // then label as the final deterministic tie-break.
        scored.sort_by(|(sa, a), (sb, b)| {
            sb.partial_cmp(sa)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| match (a.distance, b.distance) {
                    (Some(da), Some(db)) => {
                        da.partial_cmp(&db).unwrap_or(std::cmp::Ordering::Equal)
                    }
                    (Some(_), None) => std::cmp::Ordering::Less,
                    (None, Some(_)) => std::cmp::Ordering::Greater,
                    (None, None) => std::cmp::Ordering::Equal,
                })
                .then_with(|| a.label.cmp(&b.label))
        });

        scored.into_iter().take(limit).map(|(_, s)| s).collect()
    }
}

/// Token score: +4 per exact token-set hit, +1 per loose hit (substring of
/// the normalized text, or a near-miss of one of its tokens). A place with
/// no hit at all is excluded.
fn score_tokens(place: &GazetteerPlace, tokens: &[&str]) -> Option<f64> {
    let haystack = format!("{} {}", place.normalized_label, place.normalized_address);
    let mut score = 0.0;
    for token in tokens {
        if place.token_set.contains(*token) {
            score += TOKEN_HIT;
        } else if haystack.contains(token) || near_miss(place, token) {
            score += SUBSTRING_HIT;
        }
    }
    (score > 0.0).then_some(score)
}

/// Misspelling tolerance for the loose tier ("suzzalo" should still find
/// "suzzallo"). Short tokens are excluded to keep noise down.
fn near_miss(place: &GazetteerPlace, token: &str) -> bool {
    token.len() >= 4
        && place
            .token_set
            .iter()
            .any(|t| strsim::jaro_winkler(t, token) >= 0.9)
}
