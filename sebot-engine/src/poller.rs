//! Periodic polling of every tracked server and join/leave detection.

use futures::FutureExt;
use scc::hash_map::Entry;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::EngineError;
use crate::events::{EventBus, PresenceEvent};
use crate::model::{CommunityId, Endpoint, Player, ServerSnapshot};
use crate::query::QueryCoordinator;
use crate::settings::Settings;

/// Latest snapshot per tracked community.
#[derive(Default)]
pub struct SnapshotStore {
    snapshots: scc::HashMap<CommunityId, Arc<ServerSnapshot>>,
}

impl SnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, community_id: CommunityId) -> Option<Arc<ServerSnapshot>> {
        self.snapshots
            .read_async(&community_id, |_, snapshot| Arc::clone(snapshot))
            .await
    }

    /// Store `snapshot` and hand back the one it superseded, in one write.
    pub async fn replace(
        &self,
        community_id: CommunityId,
        snapshot: Arc<ServerSnapshot>,
    ) -> Option<Arc<ServerSnapshot>> {
        match self.snapshots.entry_async(community_id).await {
            Entry::Occupied(mut entry) => Some(std::mem::replace(entry.get_mut(), snapshot)),
            Entry::Vacant(entry) => {
                let _ = entry.insert_entry(snapshot);
                None
            }
        }
    }

    pub async fn remove(&self, community_id: CommunityId) {
        let _ = self.snapshots.remove_async(&community_id).await;
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }
}

/// Players that appeared and disappeared between two snapshots.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct PlayerDiff {
    pub joined: Vec<Player>,
    pub left: Vec<Player>,
}

impl PlayerDiff {
    pub fn is_empty(&self) -> bool {
        self.joined.is_empty() && self.left.is_empty()
    }
}

/// Diff two snapshots by player name. Blank names never match and never
/// show up on either side.
pub fn diff_players(old: &ServerSnapshot, new: &ServerSnapshot) -> PlayerDiff {
    let old_names = old.player_names();
    let new_names = new.player_names();

    PlayerDiff {
        joined: only_in(&new.players, &old_names),
        left: only_in(&old.players, &new_names),
    }
}

fn only_in(players: &[Player], other: &BTreeSet<&str>) -> Vec<Player> {
    let mut seen = HashSet::new();
    players
        .iter()
        .filter(|p| {
            if p.is_blank() {
                debug!("skipping player with blank name");
                return false;
            }
            !other.contains(p.name.as_str()) && seen.insert(p.name.as_str())
        })
        .cloned()
        .collect()
}

pub struct StatePoller {
    coordinator: Arc<QueryCoordinator>,
    settings: Settings,
    snapshots: Arc<SnapshotStore>,
    events: Arc<EventBus>,
    interval: Duration,
    backoff: Duration,
    tracked: Mutex<BTreeSet<CommunityId>>,
}

impl StatePoller {
    pub fn new(
        coordinator: Arc<QueryCoordinator>,
        settings: Settings,
        snapshots: Arc<SnapshotStore>,
        events: Arc<EventBus>,
        interval: Duration,
        backoff: Duration,
    ) -> Self {
        Self {
            coordinator,
            settings,
            snapshots,
            events,
            interval,
            backoff,
            tracked: Mutex::new(BTreeSet::new()),
        }
    }

    /// Poll until `token` is cancelled.
    pub async fn run(self: Arc<Self>, token: CancellationToken) {
        info!(interval_secs = self.interval.as_secs(), "poller started");
        while !token.is_cancelled() {
            // A tick in progress is allowed to finish.
            let delay = match AssertUnwindSafe(self.tick()).catch_unwind().await {
                Ok(Ok(())) => self.interval,
                Ok(Err(err)) => {
                    error!(%err, "poller tick failed, backing off");
                    self.backoff
                }
                Err(_) => {
                    error!("poller tick panicked, backing off");
                    self.backoff
                }
            };

            tokio::select! {
                _ = token.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }
        info!("poller stopped");
    }

    /// One pass over every tracked community.
    pub async fn tick(&self) -> Result<(), EngineError> {
        let endpoints = self.settings.endpoints().await?;
        self.forget_untracked(&endpoints).await;

        let mut servers: BTreeMap<&Endpoint, Vec<CommunityId>> = BTreeMap::new();
        for (community_id, endpoint) in &endpoints {
            servers.entry(endpoint).or_default().push(*community_id);
        }

        futures::future::join_all(
            servers
                .into_iter()
                .map(|(endpoint, communities)| self.poll_server(endpoint, communities)),
        )
        .await;
        Ok(())
    }

    async fn forget_untracked(&self, endpoints: &BTreeMap<CommunityId, Endpoint>) {
        let dropped: Vec<CommunityId> = {
            let mut tracked = self.tracked.lock().unwrap_or_else(|e| e.into_inner());
            let dropped = tracked
                .iter()
                .filter(|id| !endpoints.contains_key(id))
                .copied()
                .collect();
            *tracked = endpoints.keys().copied().collect();
            dropped
        };

        for community_id in dropped {
            debug!(community_id, "community no longer tracked, forgetting snapshot");
            self.snapshots.remove(community_id).await;
        }
    }

    /// Query one server and update every community watching it. Events are
    /// raised once per server; listeners fan out to the communities.
    async fn poll_server(&self, endpoint: &Endpoint, communities: Vec<CommunityId>) {
        let new = match self.coordinator.fetch(endpoint).await {
            Some(snapshot) => snapshot,
            None => {
                warn!(
                    %endpoint,
                    ?communities,
                    "no result from server, treating it as empty (tracked players will appear to leave)"
                );
                ServerSnapshot::empty(endpoint.clone())
            }
        };
        let new = Arc::new(new);

        let mut baseline = None;
        for community_id in communities {
            match self.snapshots.replace(community_id, Arc::clone(&new)).await {
                Some(old) if old.endpoint == new.endpoint => {
                    baseline.get_or_insert(old);
                }
                Some(_) => debug!(community_id, %endpoint, "server changed, starting a new baseline"),
                None => debug!(community_id, %endpoint, "first snapshot, nothing to compare against"),
            }
        }
        let Some(old) = baseline else {
            return;
        };

        let diff = diff_players(&old, &new);
        if diff.is_empty() {
            return;
        }
        debug!(
            %endpoint,
            joined = diff.joined.len(),
            left = diff.left.len(),
            "player list changed"
        );
        self.publish(old, new, diff);
    }

    fn publish(&self, old: Arc<ServerSnapshot>, new: Arc<ServerSnapshot>, diff: PlayerDiff) {
        for player in &diff.joined {
            self.events.emit(PresenceEvent::Joined {
                old: Arc::clone(&old),
                new: Arc::clone(&new),
                player: player.clone(),
            });
        }
        for player in &diff.left {
            self.events.emit(PresenceEvent::Left {
                old: Arc::clone(&old),
                new: Arc::clone(&new),
                player: player.clone(),
            });
        }
        if !diff.joined.is_empty() {
            self.events.emit(PresenceEvent::JoinedBatch {
                old: Arc::clone(&old),
                new: Arc::clone(&new),
                players: diff.joined,
            });
        }
        if !diff.left.is_empty() {
            self.events.emit(PresenceEvent::LeftBatch {
                old,
                new,
                players: diff.left,
            });
        }
    }
}
