//! End-to-end tests for the interception strategies and queue replay,
//! against throwaway upstream servers on loopback ports.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use axum::{extract::Json, http::StatusCode, routing::get, routing::post, Router};
use chrono::{Duration, Utc};
use reqwest::{Client, Method};
use tokio::sync::Mutex;
use url::Url;

use wayside::models::{ActionKind, QueuedAction};
use wayside::proxy::{Gateway, Outcome, RouteTable};
use wayside::remote::SuggestionProvider;
use wayside::replay::ReplayCoordinator;
use wayside::store::{LocalStore, Partition};

/// Serve an axum router on an ephemeral port; returns its base URL and the
/// task handle (abort it to simulate the upstream going away).
async fn serve(app: Router) -> (Url, tokio::task::JoinHandle<()>) {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    let url = Url::parse(&format!("http://{}/", addr)).unwrap();
    (url, handle)
}

fn counting_router(hits: Arc<AtomicUsize>, body: &'static str) -> Router {
    Router::new().route(
        "/{*path}",
        get(move || {
            let hits = hits.clone();
            async move {
                hits.fetch_add(1, Ordering::SeqCst);
                body
            }
        }),
    )
}

fn gateway_for(store: LocalStore, routes: RouteTable) -> Gateway {
    Gateway::new(store, Client::new(), routes)
}

/// An origin that is never contacted; keeps the other route rules from
/// matching the server under test.
fn unused_origin() -> Url {
    Url::parse("http://127.0.0.1:9/").unwrap()
}

#[tokio::test]
async fn cache_first_serves_second_request_from_store() {
    let hits = Arc::new(AtomicUsize::new(0));
    let (tile_url, _server) = serve(counting_router(hits.clone(), "tile-bytes")).await;

    let routes = RouteTable::new(&tile_url, &unused_origin(), &unused_origin());
    let store = LocalStore::temporary();
    let gateway = gateway_for(store, routes);

    let url = tile_url.join("14/2620/5725.png").unwrap();
    let first = gateway
        .handle(Method::GET, url.clone(), None)
        .await
        .unwrap();
    match first {
        Outcome::Response {
            from_cache, body, ..
        } => {
            assert!(!from_cache);
            assert_eq!(body, b"tile-bytes");
        }
        other => panic!("unexpected outcome {:?}", other),
    }

    let second = gateway.handle(Method::GET, url, None).await.unwrap();
    match second {
        Outcome::Response { from_cache, .. } => assert!(from_cache),
        other => panic!("unexpected outcome {:?}", other),
    }

    // The upstream saw exactly one fetch.
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn tile_cache_key_ignores_query_string() {
    let hits = Arc::new(AtomicUsize::new(0));
    let (tile_url, _server) = serve(counting_router(hits.clone(), "tile-bytes")).await;

    let routes = RouteTable::new(&tile_url, &unused_origin(), &unused_origin());
    let gateway = gateway_for(LocalStore::temporary(), routes);

    // A rotating query parameter must not fragment the small tile cache.
    let first_url = tile_url.join("14/2620/5725.png?key=abc").unwrap();
    let second_url = tile_url.join("14/2620/5725.png?key=def").unwrap();

    let first = gateway.handle(Method::GET, first_url, None).await.unwrap();
    assert!(matches!(
        first,
        Outcome::Response {
            from_cache: false,
            ..
        }
    ));

    let second = gateway.handle(Method::GET, second_url, None).await.unwrap();
    assert!(matches!(second, Outcome::Response { from_cache: true, .. }));
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn network_first_falls_back_to_cache_when_fetch_fails() {
    let hits = Arc::new(AtomicUsize::new(0));
    let (api_url, server) = serve(counting_router(hits.clone(), "{\"ok\":true}")).await;

    let routes = RouteTable::new(&unused_origin(), &api_url, &unused_origin());
    let store = LocalStore::temporary();
    let gateway = gateway_for(store, routes);

    let url = api_url.join("api/status").unwrap();
    let first = gateway
        .handle(Method::GET, url.clone(), None)
        .await
        .unwrap();
    assert!(matches!(
        first,
        Outcome::Response {
            from_cache: false,
            ..
        }
    ));

    // Kill the upstream; the cached copy must be served instead of an error.
    server.abort();
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    let second = gateway.handle(Method::GET, url, None).await.unwrap();
    match second {
        Outcome::Response {
            from_cache, body, ..
        } => {
            assert!(from_cache);
            assert_eq!(body, b"{\"ok\":true}");
        }
        other => panic!("unexpected outcome {:?}", other),
    }
}

#[tokio::test]
async fn network_first_propagates_failure_without_cache() {
    let (api_url, server) = serve(Router::new()).await;
    let routes = RouteTable::new(&unused_origin(), &api_url, &unused_origin());
    server.abort();
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    let gateway = gateway_for(LocalStore::temporary(), routes);
    let url = api_url.join("api/status").unwrap();
    assert!(gateway.handle(Method::GET, url, None).await.is_err());
}

#[tokio::test]
async fn stale_while_revalidate_serves_cached_and_refreshes() {
    let hits = Arc::new(AtomicUsize::new(0));
    let (asset_url, _server) = serve(counting_router(hits.clone(), "{}")).await;

    let routes = RouteTable::new(&unused_origin(), &unused_origin(), &asset_url);
    let gateway = gateway_for(LocalStore::temporary(), routes);

    let url = asset_url.join("map/style.json").unwrap();
    let first = gateway
        .handle(Method::GET, url.clone(), None)
        .await
        .unwrap();
    assert!(matches!(
        first,
        Outcome::Response {
            from_cache: false,
            ..
        }
    ));

    let second = gateway.handle(Method::GET, url, None).await.unwrap();
    assert!(matches!(second, Outcome::Response { from_cache: true, .. }));

    // The second request kicked off a background refresh.
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    assert_eq!(hits.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn failed_write_is_queued_not_failed() {
    let (api_url, server) = serve(Router::new()).await;
    let routes = RouteTable::new(&unused_origin(), &api_url, &unused_origin());
    server.abort();
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    let store = LocalStore::temporary();
    let gateway = gateway_for(store.clone(), routes.clone());

    let url = api_url.join("api/entrances/confirm").unwrap();
    let payload = serde_json::json!({"id": "act-1", "entrance": "e9"});
    let outcome = gateway
        .handle(Method::POST, url.clone(), Some(payload.clone()))
        .await
        .unwrap();
    match outcome {
        Outcome::Queued { id } => assert_eq!(id, "act-1"),
        other => panic!("unexpected outcome {:?}", other),
    }
    assert_eq!(store.len(Partition::WriteQueue).await, 1);

    // Re-submitting the same action id never duplicates the queue entry.
    let outcome = gateway
        .handle(Method::POST, url, Some(payload))
        .await
        .unwrap();
    assert!(matches!(outcome, Outcome::Queued { .. }));
    assert_eq!(store.len(Partition::WriteQueue).await, 1);
}

#[tokio::test]
async fn server_error_write_is_queued() {
    let app = Router::new().route(
        "/api/entrances/correct",
        post(|| async { StatusCode::SERVICE_UNAVAILABLE }),
    );
    let (api_url, _server) = serve(app).await;
    let routes = RouteTable::new(&unused_origin(), &api_url, &unused_origin());

    let store = LocalStore::temporary();
    let gateway = gateway_for(store.clone(), routes);

    let url = api_url.join("api/entrances/correct").unwrap();
    let outcome = gateway
        .handle(Method::POST, url, Some(serde_json::json!({"fix": 1})))
        .await
        .unwrap();
    assert!(matches!(outcome, Outcome::Queued { .. }));

    let queued: Vec<QueuedAction> = store.get_all(Partition::WriteQueue).await;
    assert_eq!(queued.len(), 1);
    assert_eq!(queued[0].kind, ActionKind::Correct);
}

/// Upstream that records replayed action ids and the maximum number of
/// requests it ever saw in flight at once.
fn recording_write_router(
    order: Arc<Mutex<Vec<String>>>,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,
) -> Router {
    Router::new().route(
        "/api/entrances/confirm",
        post(move |Json(payload): Json<serde_json::Value>| {
            let order = order.clone();
            let in_flight = in_flight.clone();
            let max_in_flight = max_in_flight.clone();
            async move {
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                max_in_flight.fetch_max(now, Ordering::SeqCst);
                // Give a concurrent replay a chance to overlap, if one were
                // ever issued.
                tokio::time::sleep(std::time::Duration::from_millis(30)).await;
                if let Some(id) = payload.get("id").and_then(|v| v.as_str()) {
                    order.lock().await.push(id.to_string());
                }
                in_flight.fetch_sub(1, Ordering::SeqCst);
                StatusCode::OK
            }
        }),
    )
}

#[tokio::test]
async fn replay_drains_fifo_and_serially() {
    let order = Arc::new(Mutex::new(Vec::new()));
    let in_flight = Arc::new(AtomicUsize::new(0));
    let max_in_flight = Arc::new(AtomicUsize::new(0));
    let (api_url, _server) = serve(recording_write_router(
        order.clone(),
        in_flight.clone(),
        max_in_flight.clone(),
    ))
    .await;

    let routes = RouteTable::new(&unused_origin(), &api_url, &unused_origin());
    let store = LocalStore::temporary();

    // Enqueue out of insertion order relative to created_at to prove the
    // drain sorts by creation time.
    let base = Utc::now() - Duration::minutes(30);
    for (offset, id) in [(2, "c"), (0, "a"), (1, "b")] {
        let mut action = QueuedAction::new(
            id.to_string(),
            ActionKind::Confirm,
            serde_json::json!({"id": id}),
        );
        action.created_at = base + Duration::minutes(offset);
        store.put(Partition::WriteQueue, &action.id, &action).await;
    }

    let coordinator = ReplayCoordinator::new(store.clone(), Client::new(), routes);
    let report = coordinator.drain().await;

    assert_eq!(report.replayed, 3);
    assert_eq!(report.remaining, 0);
    assert_eq!(store.len(Partition::WriteQueue).await, 0);
    assert_eq!(*order.lock().await, vec!["a", "b", "c"]);
    assert_eq!(max_in_flight.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn replay_drops_rejected_action_and_continues() {
    let order = Arc::new(Mutex::new(Vec::new()));
    let app = {
        let order = order.clone();
        Router::new().route(
            "/api/entrances/confirm",
            post(move |Json(payload): Json<serde_json::Value>| {
                let order = order.clone();
                async move {
                    let id = payload
                        .get("id")
                        .and_then(|v| v.as_str())
                        .unwrap_or_default()
                        .to_string();
                    order.lock().await.push(id.clone());
                    if id == "bad" {
                        StatusCode::UNPROCESSABLE_ENTITY
                    } else {
                        StatusCode::OK
                    }
                }
            }),
        )
    };
    let (api_url, _server) = serve(app).await;
    let routes = RouteTable::new(&unused_origin(), &api_url, &unused_origin());
    let store = LocalStore::temporary();

    let base = Utc::now() - Duration::minutes(10);
    for (offset, id) in [(0, "bad"), (1, "good")] {
        let mut action = QueuedAction::new(
            id.to_string(),
            ActionKind::Confirm,
            serde_json::json!({"id": id}),
        );
        action.created_at = base + Duration::minutes(offset);
        store.put(Partition::WriteQueue, &action.id, &action).await;
    }

    let coordinator = ReplayCoordinator::new(store.clone(), Client::new(), routes);
    let report = coordinator.drain().await;

    // The malformed action is a permanent rejection: dropped, drain goes on.
    assert_eq!(report.dropped, 1);
    assert_eq!(report.replayed, 1);
    assert_eq!(store.len(Partition::WriteQueue).await, 0);
    assert_eq!(*order.lock().await, vec!["bad", "good"]);
}

#[tokio::test]
async fn provider_results_honor_clamped_limit() {
    // A chatty provider returning more features than requested must be cut
    // down to the same clamped limit the local fallback uses.
    let app = Router::new().route(
        "/v1/autocomplete",
        get(|| async {
            let features: Vec<serde_json::Value> = (0..20)
                .map(|i| {
                    serde_json::json!({
                        "geometry": {"coordinates": [-122.3, 47.6]},
                        "properties": {"label": format!("Place {}", i)}
                    })
                })
                .collect();
            axum::Json(serde_json::json!({"features": features}))
        }),
    );
    let (base_url, _server) = serve(app).await;
    let endpoint = base_url.join("v1/autocomplete").unwrap();
    let provider = SuggestionProvider::new(Client::new(), endpoint);

    let defaulted = provider.suggest("place", None, None, None).await.unwrap();
    assert_eq!(defaulted.len(), 8);

    let capped = provider
        .suggest("place", None, None, Some(3))
        .await
        .unwrap();
    assert_eq!(capped.len(), 3);
    assert_eq!(capped[0].label, "Place 0");
}

#[tokio::test]
async fn gateway_actor_handles_requests_over_channel() {
    let hits = Arc::new(AtomicUsize::new(0));
    let (base_url, _server) = serve(counting_router(hits.clone(), "tile")).await;

    let routes = RouteTable::new(&base_url, &unused_origin(), &unused_origin());
    let handle = Gateway::new(LocalStore::temporary(), Client::new(), routes).spawn();

    let url = base_url.join("10/1/2.png").unwrap();
    let outcome = handle.fetch(Method::GET, url, None).await.unwrap();
    assert!(matches!(outcome, Outcome::Response { status: 200, .. }));
}
