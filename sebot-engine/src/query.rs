//! Game server queries.
//!
//! `ServerQuery` is the opaque network call. `QueryCoordinator` sits in front
//! of it and makes sure concurrent callers asking for the same endpoint share
//! one in-flight request instead of each hitting the server.

use async_trait::async_trait;
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use scc::hash_map::Entry;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::QueryError;
use crate::model::{Endpoint, Player, ServerSnapshot};

/// The raw `Query(host, port)` call.
#[async_trait]
pub trait ServerQuery: Send + Sync {
    async fn query(&self, endpoint: &Endpoint) -> Result<ServerSnapshot, QueryError>;
}

type PendingQuery = Shared<BoxFuture<'static, Option<ServerSnapshot>>>;

/// Deduplicates concurrent fetches per `host:port`.
pub struct QueryCoordinator {
    query: Arc<dyn ServerQuery>,
    pending: Arc<scc::HashMap<String, PendingQuery>>,
}

impl QueryCoordinator {
    pub fn new(query: Arc<dyn ServerQuery>) -> Self {
        Self {
            query,
            pending: Arc::new(scc::HashMap::new()),
        }
    }

    /// Fetch a snapshot of `endpoint`.
    ///
    /// Joins the in-flight request for the same endpoint if there is one.
    /// Failures are logged and come back as `None`; nothing is retried here.
    pub async fn fetch(&self, endpoint: &Endpoint) -> Option<ServerSnapshot> {
        let key = endpoint.key();

        // The entry holds the bucket lock only for the lookup/insert, never
        // across the network call.
        let pending = match self.pending.entry_async(key.clone()).await {
            Entry::Occupied(entry) => {
                debug!(endpoint = %key, "reusing in-flight query");
                entry.get().clone()
            }
            Entry::Vacant(entry) => {
                let pending = self.start(key, endpoint.clone());
                let _ = entry.insert_entry(pending.clone());
                pending
            }
        };

        pending.await
    }

    /// Number of endpoints with a query in flight.
    pub fn in_flight(&self) -> usize {
        self.pending.len()
    }

    fn start(&self, key: String, endpoint: Endpoint) -> PendingQuery {
        let query = Arc::clone(&self.query);
        let pending = Arc::clone(&self.pending);

        async move {
            let result = match query.query(&endpoint).await {
                Ok(snapshot) => {
                    info!(
                        endpoint = %key,
                        "queried {} ({}/{})",
                        snapshot.name,
                        snapshot.player_count,
                        snapshot.max_players
                    );
                    Some(snapshot)
                }
                Err(err) => {
                    warn!(endpoint = %key, %err, "query failed");
                    None
                }
            };
            // Released before any awaiter sees the result.
            let _ = pending.remove_async(&key).await;
            result
        }
        .boxed()
        .shared()
    }
}

/// Snapshot document served by the query gateway.
#[derive(Debug, Deserialize)]
struct GatewaySnapshot {
    #[serde(default)]
    name: String,
    #[serde(default)]
    player_count: u32,
    #[serde(default)]
    max_players: u32,
    #[serde(default)]
    players: Vec<GatewayPlayer>,
}

#[derive(Debug, Deserialize)]
struct GatewayPlayer {
    #[serde(default)]
    name: String,
    #[serde(default)]
    duration_secs: f64,
}

impl GatewaySnapshot {
    fn into_snapshot(self, endpoint: Endpoint) -> ServerSnapshot {
        ServerSnapshot {
            name: self.name,
            player_count: self.player_count,
            max_players: self.max_players,
            players: self
                .players
                .into_iter()
                .map(|p| {
                    Player::new(
                        p.name,
                        Duration::try_from_secs_f64(p.duration_secs).unwrap_or_default(),
                    )
                })
                .collect(),
            endpoint,
        }
    }
}

/// `ServerQuery` backed by an HTTP query gateway that speaks the game's
/// own query protocol and answers with JSON.
pub struct HttpQuery {
    client: reqwest::Client,
    url_template: String,
}

impl HttpQuery {
    pub fn new(url_template: impl Into<String>, timeout: Duration) -> Result<Self, QueryError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url_template: url_template.into(),
        })
    }

    fn url_for(&self, endpoint: &Endpoint) -> String {
        self.url_template
            .replace("{host}", &endpoint.url_host())
            .replace("{port}", &endpoint.port.to_string())
    }
}

#[async_trait]
impl ServerQuery for HttpQuery {
    async fn query(&self, endpoint: &Endpoint) -> Result<ServerSnapshot, QueryError> {
        let response = self
            .client
            .get(self.url_for(endpoint))
            .send()
            .await
            .map_err(|err| {
                if err.is_timeout() {
                    QueryError::Timeout
                } else {
                    QueryError::Http(err)
                }
            })?;

        if !response.status().is_success() {
            return Err(QueryError::Status(response.status().as_u16()));
        }

        let body: GatewaySnapshot = response.json().await?;
        Ok(body.into_snapshot(endpoint.clone()))
    }
}
