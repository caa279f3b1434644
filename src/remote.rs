//! Remote suggestion/geocoding provider client.
//!
//! The provider speaks a GeoJSON-ish shape:
//! `{features:[{geometry:{coordinates:[lon,lat]}, properties:{label|name}}]}`.
//! Any non-200 status, timeout, or parse failure surfaces as
//! `ProviderUnavailable` so the caller can fall back to the local gazetteer.

use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, warn};
use url::Url;

use crate::error::WaysideError;
use crate::geo::haversine_m;
use crate::models::Suggestion;
use crate::search::clamp_limit;

#[derive(Debug, Deserialize)]
struct FeatureCollection {
    features: Vec<Feature>,
}

#[derive(Debug, Deserialize)]
struct Feature {
    geometry: Geometry,
    properties: Properties,
}

#[derive(Debug, Deserialize)]
struct Geometry {
    /// [lon, lat]
    coordinates: [f64; 2],
}

#[derive(Debug, Deserialize)]
struct Properties {
    label: Option<String>,
    name: Option<String>,
}

/// Client for the remote suggestion service.
#[derive(Clone)]
pub struct SuggestionProvider {
    client: Client,
    endpoint: Url,
}

impl SuggestionProvider {
    pub fn new(client: Client, endpoint: Url) -> Self {
        Self { client, endpoint }
    }

    /// Forward the query to the remote provider. The result count honors the
    /// same clamped limit the local fallback applies.
    pub async fn suggest(
        &self,
        text: &str,
        lat: Option<f64>,
        lon: Option<f64>,
        limit: Option<usize>,
    ) -> Result<Vec<Suggestion>, WaysideError> {
        let mut url = self.endpoint.clone();
        {
            let mut pairs = url.query_pairs_mut();
            pairs.append_pair("text", text);
            if let (Some(lat), Some(lon)) = (lat, lon) {
                pairs.append_pair("focus.point.lat", &lat.to_string());
                pairs.append_pair("focus.point.lon", &lon.to_string());
            }
        }

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| WaysideError::ProviderUnavailable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            warn!("Suggestion provider returned {}", status);
            return Err(WaysideError::ProviderUnavailable(format!(
                "status {}",
                status
            )));
        }

        let collection: FeatureCollection = response
            .json()
            .await
            .map_err(|e| WaysideError::ProviderUnavailable(e.to_string()))?;

        debug!(
            "Suggestion provider returned {} features",
            collection.features.len()
        );

        let suggestions = collection
            .features
            .into_iter()
            .filter_map(|f| {
                let [f_lon, f_lat] = f.geometry.coordinates;
                let label = f.properties.label.or(f.properties.name)?;
                let distance = match (lat, lon) {
                    (Some(lat), Some(lon)) if lat.is_finite() && lon.is_finite() => {
                        Some(haversine_m(lat, lon, f_lat, f_lon))
                    }
                    _ => None,
                };
                Some(Suggestion {
                    label,
                    context: String::new(),
                    lat: f_lat,
                    lon: f_lon,
                    distance,
                })
            })
            .take(clamp_limit(limit))
            .collect();

        Ok(suggestions)
    }
}
