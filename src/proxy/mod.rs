//! Network interception layer.
//!
//! The gateway is a long-lived actor task sitting between the client-facing
//! handlers and the upstream origins. Handlers never touch the network or
//! the store directly: they send an [`Intercept`] over a channel and await
//! the reply. Each intercepted request is served on its own task, so
//! distinct cache keys interleave freely; only the write-queue path is
//! ordered, and that ordering is enforced by the replay coordinator's serial
//! drain, not here.

pub mod strategy;

use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use reqwest::{Client, Method};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};
use url::Url;

use crate::models::{ActionKind, CachedEntrance, QueuedAction};
use crate::store::{LocalStore, Partition};

pub use strategy::{RouteTable, Strategy};

/// Timeout for the network attempt of network-first and write requests.
pub const NETWORK_TIMEOUT: Duration = Duration::from_secs(3);

/// A cached upstream response body with enough metadata to re-serve it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedResponse {
    pub status: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

/// What the gateway resolved an intercepted request to.
#[derive(Debug)]
pub enum Outcome {
    Response {
        status: u16,
        content_type: Option<String>,
        body: Vec<u8>,
        from_cache: bool,
    },
    /// The write could not reach the network and was parked for replay.
    /// This is an acknowledgment, not a failure.
    Queued { id: String },
}

/// One intercepted request, sent to the gateway task.
pub struct Intercept {
    pub method: Method,
    pub url: Url,
    pub body: Option<serde_json::Value>,
    pub reply: oneshot::Sender<Result<Outcome>>,
}

/// Cheap-to-clone sender side of the gateway channel.
#[derive(Clone)]
pub struct GatewayHandle {
    tx: mpsc::Sender<Intercept>,
}

impl GatewayHandle {
    /// Route a request through the gateway and await its outcome.
    pub async fn fetch(
        &self,
        method: Method,
        url: Url,
        body: Option<serde_json::Value>,
    ) -> Result<Outcome> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Intercept {
                method,
                url,
                body,
                reply,
            })
            .await
            .map_err(|_| anyhow!("gateway task is gone"))?;
        rx.await.context("gateway dropped the request")?
    }
}

/// The interception engine: strategy matrix over (method, origin, path),
/// backed by the local store.
#[derive(Clone)]
pub struct Gateway {
    store: LocalStore,
    client: Client,
    routes: RouteTable,
}

impl Gateway {
    pub fn new(store: LocalStore, client: Client, routes: RouteTable) -> Self {
        Self {
            store,
            client,
            routes,
        }
    }

    pub fn routes(&self) -> &RouteTable {
        &self.routes
    }

    /// Spawn the actor loop and return its handle. Requests are dispatched
    /// onto their own tasks so slow upstreams do not serialize the matrix.
    pub fn spawn(self) -> GatewayHandle {
        let (tx, mut rx) = mpsc::channel::<Intercept>(64);
        tokio::spawn(async move {
            info!("Gateway interception task started");
            while let Some(intercept) = rx.recv().await {
                let gateway = self.clone();
                tokio::spawn(async move {
                    let result = gateway
                        .handle(intercept.method, intercept.url, intercept.body)
                        .await;
                    let _ = intercept.reply.send(result);
                });
            }
            info!("Gateway interception task stopped");
        });
        GatewayHandle { tx }
    }

    /// Apply the strategy matrix to one request.
    pub async fn handle(
        &self,
        method: Method,
        url: Url,
        body: Option<serde_json::Value>,
    ) -> Result<Outcome> {
        match self.routes.classify(&method, &url) {
            Strategy::NetworkOnlyQueue(kind) => {
                self.network_only_queue(kind, url, body.unwrap_or(serde_json::Value::Null))
                    .await
            }
            Strategy::CacheFirst => self.cache_first(url).await,
            Strategy::NetworkFirst => self.network_first(url).await,
            Strategy::StaleWhileRevalidate => self.stale_while_revalidate(url).await,
            Strategy::PassThrough => self.pass_through(method, url, body).await,
        }
    }

    // ---- strategies -------------------------------------------------------

    /// Tiles: serve from the store when present and unexpired, otherwise
    /// fetch, cache, serve.
    async fn cache_first(&self, url: Url) -> Result<Outcome> {
        let key = cache_key(&url, false);
        if let Some(cached) = self
            .store
            .get::<CachedResponse>(Partition::Tiles, &key)
            .await
        {
            debug!("Tile cache hit for {}", key);
            return Ok(served(cached, true));
        }

        let response = self.fetch_upstream(&url, None).await?;
        if is_success(response.status) {
            self.store.put(Partition::Tiles, &key, &response).await;
        }
        Ok(served(response, false))
    }

    /// API GETs: network with a 3 s timeout, cached value as the fallback.
    /// The timeout cancels only this fetch attempt.
    async fn network_first(&self, url: Url) -> Result<Outcome> {
        let key = cache_key(&url, true);
        match self.fetch_upstream(&url, Some(NETWORK_TIMEOUT)).await {
            Ok(response) if is_success(response.status) => {
                self.store.put(Partition::ApiCache, &key, &response).await;
                self.cache_entrances(&url, &response).await;
                Ok(served(response, false))
            }
            Ok(response) => Ok(served(response, false)),
            Err(e) => {
                if let Some(cached) = self
                    .store
                    .get::<CachedResponse>(Partition::ApiCache, &key)
                    .await
                {
                    debug!("Network failed for {}, serving cached: {}", key, e);
                    return Ok(served(cached, true));
                }
                Err(e)
            }
        }
    }

    /// Style/assets: serve the cached copy immediately and refresh it in the
    /// background; without a cached copy, wait for the network.
    async fn stale_while_revalidate(&self, url: Url) -> Result<Outcome> {
        let key = cache_key(&url, true);
        if let Some(cached) = self
            .store
            .get::<CachedResponse>(Partition::ApiCache, &key)
            .await
        {
            let gateway = self.clone();
            let refresh_url = url.clone();
            tokio::spawn(async move {
                match gateway.fetch_upstream(&refresh_url, None).await {
                    Ok(fresh) if is_success(fresh.status) => {
                        gateway.store.put(Partition::ApiCache, &key, &fresh).await;
                    }
                    Ok(fresh) => debug!("Asset refresh for {} got {}", key, fresh.status),
                    Err(e) => debug!("Asset refresh for {} failed: {}", key, e),
                }
            });
            return Ok(served(cached, true));
        }

        let response = self.fetch_upstream(&url, None).await?;
        if is_success(response.status) {
            self.store.put(Partition::ApiCache, &key, &response).await;
        }
        Ok(served(response, false))
    }

    /// Confirm/correct writes: attempt the network; offline, timeout, or a
    /// 5xx parks the action in the write queue and acknowledges it as queued.
    async fn network_only_queue(
        &self,
        kind: ActionKind,
        url: Url,
        payload: serde_json::Value,
    ) -> Result<Outcome> {
        let attempt = tokio::time::timeout(
            NETWORK_TIMEOUT,
            self.client.post(url.clone()).json(&payload).send(),
        )
        .await;

        match attempt {
            Ok(Ok(response)) if !response.status().is_server_error() => {
                let status = response.status().as_u16();
                let content_type = content_type_of(&response);
                let body = response.bytes().await.map(|b| b.to_vec()).unwrap_or_default();
                Ok(Outcome::Response {
                    status,
                    content_type,
                    body,
                    from_cache: false,
                })
            }
            Ok(Ok(response)) => {
                warn!("Write to {} got {}, queueing", url, response.status());
                self.enqueue(kind, payload).await
            }
            Ok(Err(e)) => {
                warn!("Write to {} failed offline, queueing: {}", url, e);
                self.enqueue(kind, payload).await
            }
            Err(_) => {
                warn!("Write to {} timed out, queueing", url);
                self.enqueue(kind, payload).await
            }
        }
    }

    async fn pass_through(
        &self,
        method: Method,
        url: Url,
        body: Option<serde_json::Value>,
    ) -> Result<Outcome> {
        let mut request = self.client.request(method, url);
        if let Some(body) = body {
            request = request.json(&body);
        }
        let response = request.send().await.context("pass-through fetch failed")?;
        let status = response.status().as_u16();
        let content_type = content_type_of(&response);
        let body = response.bytes().await.context("pass-through body read")?;
        Ok(Outcome::Response {
            status,
            content_type,
            body: body.to_vec(),
            from_cache: false,
        })
    }

    // ---- helpers ----------------------------------------------------------

    async fn fetch_upstream(&self, url: &Url, timeout: Option<Duration>) -> Result<CachedResponse> {
        let request = self.client.get(url.clone());
        let send = async {
            let response = request.send().await?;
            let status = response.status().as_u16();
            let content_type = content_type_of(&response);
            let body = response.bytes().await?;
            Ok::<_, reqwest::Error>(CachedResponse {
                status,
                content_type,
                body: body.to_vec(),
            })
        };

        match timeout {
            Some(limit) => tokio::time::timeout(limit, send)
                .await
                .map_err(|_| anyhow!("upstream fetch timed out after {:?}", limit))?
                .with_context(|| format!("upstream fetch failed for {}", url)),
            None => send
                .await
                .with_context(|| format!("upstream fetch failed for {}", url)),
        }
    }

    /// Park a write for replay. Actions are never duplicated for the same
    /// id: a re-enqueue keeps the original entry and its created_at.
    async fn enqueue(&self, kind: ActionKind, payload: serde_json::Value) -> Result<Outcome> {
        let id = payload
            .get("id")
            .and_then(|v| v.as_str())
            .map(String::from)
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        let existing: Option<QueuedAction> = self.store.get(Partition::WriteQueue, &id).await;
        if existing.is_none() {
            let action = QueuedAction::new(id.clone(), kind, payload);
            self.store.put(Partition::WriteQueue, &id, &action).await;
            info!("Queued {} action {}", kind, id);
        } else {
            debug!("Action {} already queued, keeping original", id);
        }
        Ok(Outcome::Queued { id })
    }

    /// Entrance lookups additionally feed the bounded entrance cache.
    async fn cache_entrances(&self, url: &Url, response: &CachedResponse) {
        if !url.path().starts_with(&self.routes.entrances_path) {
            return;
        }
        let Ok(entrances) = serde_json::from_slice::<Vec<CachedEntrance>>(&response.body) else {
            return;
        };
        for entrance in entrances {
            let key = entrance.id.clone();
            self.store.put(Partition::Entrances, &key, &entrance).await;
        }
    }
}

fn served(cached: CachedResponse, from_cache: bool) -> Outcome {
    Outcome::Response {
        status: cached.status,
        content_type: cached.content_type,
        body: cached.body,
        from_cache,
    }
}

fn is_success(status: u16) -> bool {
    (200..300).contains(&status)
}

fn content_type_of(response: &reqwest::Response) -> Option<String> {
    response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(String::from)
}

/// Cache key: origin + path. Parameterized API reads also carry the query so
/// distinct parameter sets cache separately; tile keys drop it so a varying
/// parameter (an api key, say) cannot fragment the small tile cache.
fn cache_key(url: &Url, with_query: bool) -> String {
    let mut key = format!("{}{}", url.origin().ascii_serialization(), url.path());
    if with_query {
        if let Some(query) = url.query() {
            key.push('?');
            key.push_str(query);
        }
    }
    key
}
