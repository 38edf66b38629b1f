//! Bot presence line showing how busy the tracked servers are.

use async_trait::async_trait;
use futures::FutureExt;
use std::collections::BTreeSet;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::error::EngineError;
use crate::query::QueryCoordinator;
use crate::settings::Settings;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BotPresence {
    /// "Watching ..." with an online status.
    Watching(String),
    /// Do-not-disturb with the given text.
    Offline(String),
}

/// Where the presence line ends up (the chat gateway).
#[async_trait]
pub trait PresenceSink: Send + Sync {
    async fn publish(&self, presence: &BotPresence);
}

pub struct StatusRefresher {
    coordinator: Arc<QueryCoordinator>,
    settings: Settings,
    sink: Arc<dyn PresenceSink>,
    interval: Duration,
    refreshing: Mutex<()>,
}

impl StatusRefresher {
    pub fn new(
        coordinator: Arc<QueryCoordinator>,
        settings: Settings,
        sink: Arc<dyn PresenceSink>,
        interval: Duration,
    ) -> Self {
        Self {
            coordinator,
            settings,
            sink,
            interval,
            refreshing: Mutex::new(()),
        }
    }

    /// Query every tracked server once and publish the totals.
    ///
    /// Returns the published presence, or `None` when nothing is tracked or
    /// another refresh was already running.
    pub async fn refresh(&self) -> Result<Option<BotPresence>, EngineError> {
        let Ok(_guard) = self.refreshing.try_lock() else {
            debug!("status refresh already running, skipping");
            return Ok(None);
        };

        let endpoints: BTreeSet<_> = self.settings.endpoints().await?.into_values().collect();
        if endpoints.is_empty() {
            debug!("no servers tracked, leaving presence alone");
            return Ok(None);
        }

        let snapshots = futures::future::join_all(
            endpoints.iter().map(|endpoint| self.coordinator.fetch(endpoint)),
        )
        .await;

        let online: Vec<_> = snapshots
            .into_iter()
            .flatten()
            .filter(|s| s.is_online())
            .collect();
        let presence = if online.is_empty() {
            BotPresence::Offline("Server Offline".to_string())
        } else {
            let players = online.iter().fold(0u32, |sum, s| sum.saturating_add(s.player_count));
            let max = online.iter().fold(0u32, |sum, s| sum.saturating_add(s.max_players));
            BotPresence::Watching(format!("{}/{} players", players, max))
        };

        self.sink.publish(&presence).await;
        debug!(?presence, "presence updated");
        Ok(Some(presence))
    }

    pub async fn run(self: Arc<Self>, token: CancellationToken) {
        info!(interval_secs = self.interval.as_secs(), "status refresh started");
        while !token.is_cancelled() {
            match AssertUnwindSafe(self.refresh()).catch_unwind().await {
                Ok(Ok(_)) => {}
                Ok(Err(err)) => error!(%err, "status refresh failed"),
                Err(_) => error!("status refresh panicked"),
            }

            tokio::select! {
                _ = token.cancelled() => break,
                _ = tokio::time::sleep(self.interval) => {}
            }
        }
        info!("status refresh stopped");
    }
}
