//! Offline-resilience gateway server.
//!
//! Plays the role of the client-facing event loop: every map/API/asset/write
//! request is forwarded to the interception task over a channel, which
//! applies the per-route caching and queueing policy against the local
//! store. Search falls back to the bundled gazetteer when the remote
//! provider is unreachable.

mod config;

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post, put},
    Router,
};
use clap::Parser;
use reqwest::Method;
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;
use url::Url;

use wayside::export::export_corrections;
use wayside::proxy::{Gateway, GatewayHandle, Outcome, RouteTable};
use wayside::remote::SuggestionProvider;
use wayside::replay::{ConnectivityEvent, ReplayCoordinator};
use wayside::search::{Gazetteer, SuggestOptions};
use wayside::store::{LocalStore, Partition};
use wayside::models::{RecentSearch, Suggestion, UserPreferences};

use crate::config::Config;

#[derive(Parser, Debug)]
#[command(name = "gateway")]
#[command(about = "Offline-resilience gateway for map clients")]
struct Args {
    /// Listen address
    #[arg(short, long, default_value = "0.0.0.0:3000")]
    listen: String,

    /// Configuration file (origins, provider endpoint)
    #[arg(short, long, default_value = "wayside.toml")]
    config: PathBuf,

    /// Directory for the durable local store
    #[arg(long, default_value = "wayside-store")]
    store_path: PathBuf,

    /// Static gazetteer file for offline search
    #[arg(long, default_value = "gazetteer.json")]
    gazetteer: PathBuf,
}

/// Application state shared across handlers
struct AppState {
    gateway: GatewayHandle,
    store: LocalStore,
    gazetteer: Gazetteer,
    provider: SuggestionProvider,
    routes: RouteTable,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::DEBUG)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let args = Args::parse();

    info!("Wayside Gateway");
    let config = Config::load_from_file(&args.config)?;

    let tile_origin = Url::parse(&config.origins.tiles)?;
    let api_origin = Url::parse(&config.origins.api)?;
    let asset_origin = Url::parse(&config.origins.assets)?;
    let provider_endpoint = Url::parse(&config.provider.endpoint)?;

    let store = LocalStore::open(&args.store_path);

    let gazetteer = match Gazetteer::load_from_file(&args.gazetteer) {
        Ok(g) => g,
        Err(e) => {
            warn!("No gazetteer loaded ({}); offline search will be empty", e);
            Gazetteer::default()
        }
    };

    let client = reqwest::Client::builder()
        .user_agent("Wayside/0.1 (offline gateway)")
        .build()?;
    // The provider gets its own short deadline so a slow geocoder trips the
    // local fallback instead of stalling the user.
    let provider_client = reqwest::Client::builder()
        .user_agent("Wayside/0.1 (offline gateway)")
        .timeout(Duration::from_secs(3))
        .build()?;

    let routes = RouteTable::new(&tile_origin, &api_origin, &asset_origin);
    let gateway = Gateway::new(store.clone(), client.clone(), routes.clone()).spawn();

    let (events_tx, events_rx) = tokio::sync::broadcast::channel(16);
    ReplayCoordinator::new(store.clone(), client.clone(), routes.clone()).spawn(events_rx);
    spawn_connectivity_probe(
        client.clone(),
        api_origin.clone(),
        config.probe_interval_secs,
        events_tx,
    );

    let state = Arc::new(AppState {
        gateway,
        store,
        gazetteer,
        provider: SuggestionProvider::new(provider_client, provider_endpoint),
        routes,
    });

    // Build router
    let app = Router::new()
        .route("/health", get(health_handler))
        .route("/v1/suggest", get(suggest_handler))
        .route("/v1/confirm", post(confirm_handler))
        .route("/v1/correct", post(correct_handler))
        .route("/v1/export", get(export_handler))
        .route("/v1/preferences", get(preferences_handler))
        .route("/v1/preferences", put(set_preferences_handler))
        .route("/v1/recent-searches", get(recent_searches_handler))
        .route("/v1/recent-searches", post(push_recent_search_handler))
        .route("/v1/cache/clear", post(cache_clear_handler))
        .route("/tiles/{*path}", get(tiles_handler))
        .route("/api/{*path}", get(api_handler))
        .route("/assets/{*path}", get(assets_handler))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    info!("Starting server on {}", args.listen);

    let listener = tokio::net::TcpListener::bind(&args.listen).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Poll the API origin and broadcast a restore event whenever connectivity
/// comes back after an outage.
fn spawn_connectivity_probe(
    client: reqwest::Client,
    api_origin: Url,
    interval_secs: u64,
    events: tokio::sync::broadcast::Sender<ConnectivityEvent>,
) {
    let online = Arc::new(AtomicBool::new(true));
    tokio::spawn(async move {
        let probe_url = api_origin.join("health").unwrap_or(api_origin);
        let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs.max(1)));
        loop {
            ticker.tick().await;
            let reachable = tokio::time::timeout(
                Duration::from_secs(3),
                client.get(probe_url.clone()).send(),
            )
            .await
            .map(|r| r.is_ok())
            .unwrap_or(false);

            let was_online = online.swap(reachable, Ordering::SeqCst);
            if reachable && !was_online {
                info!("Connectivity restored, signalling replay");
                let _ = events.send(ConnectivityEvent::Restored);
            }
        }
    });
}

/// Health check endpoint
async fn health_handler(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        gazetteer_places: state.gazetteer.len(),
        queued_actions: state.store.len(Partition::WriteQueue).await,
    })
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    gazetteer_places: usize,
    queued_actions: usize,
}

#[derive(Deserialize)]
struct SuggestQueryParams {
    /// Search text
    text: String,
    /// Focus latitude
    lat: Option<f64>,
    /// Focus longitude
    lon: Option<f64>,
    /// Number of results
    limit: Option<usize>,
    /// Include the result source ("remote"/"local") in the response
    #[serde(default)]
    include_source: bool,
}

#[derive(Serialize)]
struct SuggestResponse {
    suggestions: Vec<Suggestion>,
    #[serde(skip_serializing_if = "Option::is_none")]
    source: Option<&'static str>,
}

/// Forward suggestion search with transparent offline fallback
async fn suggest_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<SuggestQueryParams>,
) -> Json<SuggestResponse> {
    let (suggestions, source) = match state
        .provider
        .suggest(&params.text, params.lat, params.lon, params.limit)
        .await
    {
        Ok(remote) => (remote, "remote"),
        Err(e) => {
            info!("Provider unavailable ({}), using local fallback", e);
            let local = state.gazetteer.suggest(
                &params.text,
                SuggestOptions {
                    lat: params.lat,
                    lon: params.lon,
                    limit: params.limit,
                },
            );
            (local, "local")
        }
    };

    Json(SuggestResponse {
        suggestions,
        source: params.include_source.then_some(source),
    })
}

#[derive(Serialize)]
struct WriteResponse {
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<String>,
}

async fn confirm_handler(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<serde_json::Value>,
) -> Result<Response, (StatusCode, String)> {
    write_through(&state, state.routes.confirm_path.clone(), payload).await
}

async fn correct_handler(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<serde_json::Value>,
) -> Result<Response, (StatusCode, String)> {
    write_through(&state, state.routes.correct_path.clone(), payload).await
}

/// Send a write through the gateway. A queued outcome is an acknowledgment
/// ("saved, will sync"), never an error.
async fn write_through(
    state: &AppState,
    path: String,
    payload: serde_json::Value,
) -> Result<Response, (StatusCode, String)> {
    let url = join_origin(&state.routes.api_origin.ascii_serialization(), &path)?;
    let outcome = state
        .gateway
        .fetch(Method::POST, url, Some(payload))
        .await
        .map_err(internal_error)?;

    match outcome {
        Outcome::Queued { id } => Ok((
            StatusCode::ACCEPTED,
            Json(WriteResponse {
                status: "queued",
                id: Some(id),
            }),
        )
            .into_response()),
        Outcome::Response { status, .. } if (200..300).contains(&status) => Ok(Json(
            WriteResponse {
                status: "synced",
                id: None,
            },
        )
        .into_response()),
        Outcome::Response { status, body, .. } => Ok((
            StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY),
            body,
        )
            .into_response()),
    }
}

/// Export all pending corrections as a downloadable document. No network.
async fn export_handler(State(state): State<Arc<AppState>>) -> Response {
    let doc = export_corrections(&state.store).await;
    (
        [(
            header::CONTENT_DISPOSITION,
            "attachment; filename=\"corrections.json\"",
        )],
        Json(doc),
    )
        .into_response()
}

async fn preferences_handler(State(state): State<Arc<AppState>>) -> Json<UserPreferences> {
    Json(state.store.preferences().await)
}

async fn set_preferences_handler(
    State(state): State<Arc<AppState>>,
    Json(prefs): Json<UserPreferences>,
) -> Json<UserPreferences> {
    state.store.set_preferences(&prefs).await;
    Json(prefs)
}

async fn recent_searches_handler(State(state): State<Arc<AppState>>) -> Json<Vec<RecentSearch>> {
    Json(state.store.recent_searches().await)
}

async fn push_recent_search_handler(
    State(state): State<Arc<AppState>>,
    Json(search): Json<RecentSearch>,
) -> StatusCode {
    state.store.push_recent_search(search).await;
    StatusCode::NO_CONTENT
}

/// Explicit cache clear: bounded cache partitions only; the write queue and
/// preferences survive.
async fn cache_clear_handler(State(state): State<Arc<AppState>>) -> StatusCode {
    state.store.clear(Partition::Entrances).await;
    state.store.clear(Partition::Tiles).await;
    state.store.clear(Partition::ApiCache).await;
    StatusCode::NO_CONTENT
}

async fn tiles_handler(
    State(state): State<Arc<AppState>>,
    Path(path): Path<String>,
) -> Result<Response, (StatusCode, String)> {
    proxy_get(
        &state,
        &state.routes.tile_origin.ascii_serialization(),
        &path,
        None,
    )
    .await
}

async fn api_handler(
    State(state): State<Arc<AppState>>,
    Path(path): Path<String>,
    Query(query): Query<Vec<(String, String)>>,
) -> Result<Response, (StatusCode, String)> {
    proxy_get(
        &state,
        &state.routes.api_origin.ascii_serialization(),
        &format!("api/{}", path),
        Some(query),
    )
    .await
}

async fn assets_handler(
    State(state): State<Arc<AppState>>,
    Path(path): Path<String>,
) -> Result<Response, (StatusCode, String)> {
    proxy_get(
        &state,
        &state.routes.asset_origin.ascii_serialization(),
        &path,
        None,
    )
    .await
}

async fn proxy_get(
    state: &AppState,
    origin: &str,
    path: &str,
    query: Option<Vec<(String, String)>>,
) -> Result<Response, (StatusCode, String)> {
    let mut url = join_origin(origin, path)?;
    if let Some(query) = query {
        if !query.is_empty() {
            url.query_pairs_mut().extend_pairs(query);
        }
    }

    let outcome = state
        .gateway
        .fetch(Method::GET, url, None)
        .await
        .map_err(internal_error)?;

    match outcome {
        Outcome::Response {
            status,
            content_type,
            body,
            ..
        } => {
            let mut response = (
                StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY),
                body,
            )
                .into_response();
            if let Some(ct) = content_type {
                if let Ok(value) = ct.parse() {
                    response.headers_mut().insert(header::CONTENT_TYPE, value);
                }
            }
            Ok(response)
        }
        Outcome::Queued { .. } => Err((
            StatusCode::INTERNAL_SERVER_ERROR,
            "unexpected queued outcome for read".to_string(),
        )),
    }
}

fn join_origin(origin: &str, path: &str) -> Result<Url, (StatusCode, String)> {
    let joined = format!("{}/{}", origin.trim_end_matches('/'), path.trim_start_matches('/'));
    Url::parse(&joined).map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()))
}

fn internal_error(e: anyhow::Error) -> (StatusCode, String) {
    tracing::error!("Gateway request failed: {}", e);
    (StatusCode::BAD_GATEWAY, e.to_string())
}
