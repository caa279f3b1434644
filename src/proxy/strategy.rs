//! Per-route caching/queueing policy.

use reqwest::Method;
use url::{Origin, Url};

use crate::models::ActionKind;

/// How an intercepted request is served.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// POST to a confirm/correct endpoint: attempt the network, enqueue on
    /// failure instead of surfacing an error.
    NetworkOnlyQueue(ActionKind),
    /// Map tiles: serve from store when present and unexpired.
    CacheFirst,
    /// Same-origin API GETs: network with a 3 s timeout, cache as fallback.
    NetworkFirst,
    /// Style/asset requests: serve stale immediately, refresh in background.
    StaleWhileRevalidate,
    /// Everything else goes straight to the network.
    PassThrough,
}

/// Route matching rules, evaluated in fixed precedence order: write-queue
/// rule, tile rule, API rule, asset rule, then default pass-through.
#[derive(Debug, Clone)]
pub struct RouteTable {
    pub tile_origin: Origin,
    pub api_origin: Origin,
    pub asset_origin: Origin,
    /// Path prefix for cacheable API GETs.
    pub api_prefix: String,
    /// Path prefix whose GET responses feed the entrance cache.
    pub entrances_path: String,
    /// POST endpoints behind the write queue.
    pub confirm_path: String,
    pub correct_path: String,
    /// Path suffixes treated as style/asset requests.
    pub asset_suffixes: Vec<String>,
}

impl RouteTable {
    pub fn new(tile_origin: &Url, api_origin: &Url, asset_origin: &Url) -> Self {
        Self {
            tile_origin: tile_origin.origin(),
            api_origin: api_origin.origin(),
            asset_origin: asset_origin.origin(),
            api_prefix: "/api/".to_string(),
            entrances_path: "/api/entrances".to_string(),
            confirm_path: "/api/entrances/confirm".to_string(),
            correct_path: "/api/entrances/correct".to_string(),
            asset_suffixes: vec![
                ".json".to_string(),
                ".png".to_string(),
                ".pbf".to_string(),
                ".css".to_string(),
            ],
        }
    }

    /// URL of the write endpoint for an action kind, used for replay.
    pub fn write_endpoint(&self, kind: ActionKind) -> Url {
        let path = match kind {
            ActionKind::Confirm => &self.confirm_path,
            ActionKind::Correct => &self.correct_path,
        };
        let base = self.api_origin.ascii_serialization();
        Url::parse(&format!("{}{}", base, path)).expect("origin + path is a valid url")
    }

    pub fn classify(&self, method: &Method, url: &Url) -> Strategy {
        let origin = url.origin();
        let path = url.path();

        if *method == Method::POST && origin == self.api_origin {
            if path == self.confirm_path {
                return Strategy::NetworkOnlyQueue(ActionKind::Confirm);
            }
            if path == self.correct_path {
                return Strategy::NetworkOnlyQueue(ActionKind::Correct);
            }
        }
        if *method == Method::GET && origin == self.tile_origin {
            return Strategy::CacheFirst;
        }
        if *method == Method::GET && origin == self.api_origin && path.starts_with(&self.api_prefix)
        {
            return Strategy::NetworkFirst;
        }
        if *method == Method::GET
            && origin == self.asset_origin
            && self.asset_suffixes.iter().any(|s| path.ends_with(s))
        {
            return Strategy::StaleWhileRevalidate;
        }
        Strategy::PassThrough
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> RouteTable {
        RouteTable::new(
            &Url::parse("https://tiles.example.com").unwrap(),
            &Url::parse("https://app.example.com").unwrap(),
            &Url::parse("https://assets.example.com").unwrap(),
        )
    }

    #[test]
    fn test_write_rule_matches_first() {
        let t = table();
        let url = Url::parse("https://app.example.com/api/entrances/confirm").unwrap();
        assert_eq!(
            t.classify(&Method::POST, &url),
            Strategy::NetworkOnlyQueue(ActionKind::Confirm)
        );
        let url = Url::parse("https://app.example.com/api/entrances/correct").unwrap();
        assert_eq!(
            t.classify(&Method::POST, &url),
            Strategy::NetworkOnlyQueue(ActionKind::Correct)
        );
        // A GET to the same path is not a write; it falls to the API rule.
        assert_eq!(t.classify(&Method::GET, &url), Strategy::NetworkFirst);
    }

    #[test]
    fn test_tile_rule() {
        let t = table();
        let url = Url::parse("https://tiles.example.com/14/2620/5725.png").unwrap();
        assert_eq!(t.classify(&Method::GET, &url), Strategy::CacheFirst);
        // Tile origin wins over the asset suffix rule.
        let url = Url::parse("https://tiles.example.com/style.json").unwrap();
        assert_eq!(t.classify(&Method::GET, &url), Strategy::CacheFirst);
    }

    #[test]
    fn test_api_rule_requires_prefix_and_origin() {
        let t = table();
        let url = Url::parse("https://app.example.com/api/entrances?near=47,-122").unwrap();
        assert_eq!(t.classify(&Method::GET, &url), Strategy::NetworkFirst);
        let url = Url::parse("https://app.example.com/about").unwrap();
        assert_eq!(t.classify(&Method::GET, &url), Strategy::PassThrough);
        let url = Url::parse("https://elsewhere.example.com/api/entrances").unwrap();
        assert_eq!(t.classify(&Method::GET, &url), Strategy::PassThrough);
    }

    #[test]
    fn test_asset_rule_by_suffix() {
        let t = table();
        let url = Url::parse("https://assets.example.com/map/style.json").unwrap();
        assert_eq!(t.classify(&Method::GET, &url), Strategy::StaleWhileRevalidate);
        let url = Url::parse("https://assets.example.com/map/readme.txt").unwrap();
        assert_eq!(t.classify(&Method::GET, &url), Strategy::PassThrough);
    }

    #[test]
    fn test_default_pass_through() {
        let t = table();
        let url = Url::parse("https://app.example.com/api/entrances").unwrap();
        assert_eq!(t.classify(&Method::PUT, &url), Strategy::PassThrough);
    }
}
