//! Per-user "tell me when someone leaves" subscriptions.
//!
//! A user holds at most one subscription, scoped to one community. The
//! registry owns a background loop that removes subscriptions once they are
//! older than the configured time-to-live and tells the user about it.

use async_trait::async_trait;
use futures::FutureExt;
use std::collections::{BTreeSet, HashMap};
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::EngineError;
use crate::events::{PresenceEvent, PresenceListener};
use crate::helpers::Clock;
use crate::messenger::{ACCENT_BLUE, DeliveryTarget, Messenger, Notice};
use crate::model::{CommunityId, ServerSnapshot, UserId};
use crate::settings::Settings;
use crate::translations::Translations;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    pub user_id: UserId,
    pub community_id: CommunityId,
    /// Unix seconds.
    pub created_at: i64,
}

/// What a `subscribe` call did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscribeOutcome {
    Started,
    /// Same community asked twice: the subscription was removed.
    Stopped,
    /// Re-pointed from another community, with a fresh timestamp.
    Moved { from: CommunityId },
}

struct EvictionLoop {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

pub struct SubscriptionRegistry {
    subscriptions: RwLock<HashMap<UserId, Subscription>>,
    clock: Arc<dyn Clock>,
    messenger: Arc<dyn Messenger>,
    translations: Arc<Translations>,
    eviction: Mutex<Option<EvictionLoop>>,
}

impl SubscriptionRegistry {
    pub fn new(
        clock: Arc<dyn Clock>,
        messenger: Arc<dyn Messenger>,
        translations: Arc<Translations>,
    ) -> Self {
        Self {
            subscriptions: RwLock::new(HashMap::new()),
            clock,
            messenger,
            translations,
            eviction: Mutex::new(None),
        }
    }

    /// Toggle `user_id`'s subscription for `community_id`.
    pub async fn subscribe(&self, user_id: UserId, community_id: CommunityId) -> SubscribeOutcome {
        let now = self.clock.now();
        let mut subscriptions = self.subscriptions.write().await;

        let current = subscriptions.get(&user_id).map(|s| s.community_id);
        let outcome = match current {
            Some(from) if from == community_id => {
                subscriptions.remove(&user_id);
                SubscribeOutcome::Stopped
            }
            Some(from) => {
                subscriptions.insert(
                    user_id,
                    Subscription {
                        user_id,
                        community_id,
                        created_at: now,
                    },
                );
                SubscribeOutcome::Moved { from }
            }
            None => {
                subscriptions.insert(
                    user_id,
                    Subscription {
                        user_id,
                        community_id,
                        created_at: now,
                    },
                );
                SubscribeOutcome::Started
            }
        };

        debug!(user_id, community_id, ?outcome, "subscription toggled");
        outcome
    }

    /// Remove `user_id`'s subscription, if any.
    pub async fn unsubscribe(&self, user_id: UserId) -> Option<Subscription> {
        self.subscriptions.write().await.remove(&user_id)
    }

    pub async fn get(&self, user_id: UserId) -> Option<Subscription> {
        self.subscriptions.read().await.get(&user_id).cloned()
    }

    /// Point-in-time copy of every active subscription.
    pub async fn active(&self) -> Vec<Subscription> {
        self.subscriptions.read().await.values().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.subscriptions.read().await.len()
    }

    /// Remove every subscription at least `ttl` old and notify its owner.
    /// Returns how many were removed.
    pub async fn evict_expired(&self, ttl: Duration) -> usize {
        self.evict(ttl, &CancellationToken::new()).await
    }

    async fn evict(&self, ttl: Duration, token: &CancellationToken) -> usize {
        let now = self.clock.now();
        let ttl_secs = i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX);
        let expired: Vec<Subscription> = self
            .active()
            .await
            .into_iter()
            .filter(|s| now.saturating_sub(s.created_at) >= ttl_secs)
            .collect();

        let mut removed = 0;
        for subscription in expired {
            // Finish the current delivery, then stop between users.
            if token.is_cancelled() {
                break;
            }

            {
                let mut subscriptions = self.subscriptions.write().await;
                // Moved or toggled since the copy was taken.
                if subscriptions.get(&subscription.user_id) != Some(&subscription) {
                    continue;
                }
                subscriptions.remove(&subscription.user_id);
            }
            removed += 1;

            let notice = Notice::new()
                .line(self.translations.get("Player Leave Notification Header"))
                .line(self.translations.get("Player Leave Notification Automatic Removal"));
            match self
                .messenger
                .deliver(DeliveryTarget::User(subscription.user_id), &notice)
                .await
            {
                Ok(()) => debug!(user_id = subscription.user_id, "subscription expired"),
                Err(err) => warn!(
                    user_id = subscription.user_id,
                    %err,
                    "subscription expired but the user could not be told"
                ),
            }
        }
        removed
    }

    /// Start the eviction loop. Does nothing if it is already running.
    pub fn start_eviction(self: &Arc<Self>, ttl: Duration, interval: Duration) {
        let mut eviction = self.eviction.lock().unwrap_or_else(|e| e.into_inner());
        if eviction.as_ref().is_some_and(|e| !e.handle.is_finished()) {
            debug!("eviction loop already running");
            return;
        }

        let token = CancellationToken::new();
        let handle = tokio::spawn(Arc::clone(self).run_eviction(ttl, interval, token.clone()));
        *eviction = Some(EvictionLoop { token, handle });
    }

    pub fn eviction_running(&self) -> bool {
        self.eviction
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .is_some_and(|e| !e.handle.is_finished())
    }

    /// Cancel the eviction loop and wait up to `timeout` for it to exit.
    /// Returns false when it did not stop in time.
    pub async fn stop_eviction(&self, timeout: Duration) -> bool {
        let eviction = self.eviction.lock().unwrap_or_else(|e| e.into_inner()).take();
        let Some(EvictionLoop { token, handle }) = eviction else {
            return true;
        };

        token.cancel();
        match tokio::time::timeout(timeout, handle).await {
            Ok(Ok(())) => true,
            Ok(Err(err)) => {
                error!(%err, "eviction loop ended abnormally");
                true
            }
            Err(_) => {
                warn!(timeout_secs = timeout.as_secs(), "eviction loop did not stop in time");
                false
            }
        }
    }

    async fn run_eviction(self: Arc<Self>, ttl: Duration, interval: Duration, token: CancellationToken) {
        info!(
            ttl_secs = ttl.as_secs(),
            interval_secs = interval.as_secs(),
            "eviction loop started"
        );
        while !token.is_cancelled() {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
            }

            match AssertUnwindSafe(self.evict(ttl, &token)).catch_unwind().await {
                Ok(0) => {}
                Ok(removed) => info!(removed, "expired leave subscriptions removed"),
                Err(_) => error!("eviction pass panicked"),
            }
        }
        info!("eviction loop stopped");
    }
}

/// Tells subscribers when a player leaves the server they watch.
pub struct LeaveNotifier {
    registry: Arc<SubscriptionRegistry>,
    settings: Settings,
    messenger: Arc<dyn Messenger>,
    translations: Arc<Translations>,
}

impl LeaveNotifier {
    pub fn new(
        registry: Arc<SubscriptionRegistry>,
        settings: Settings,
        messenger: Arc<dyn Messenger>,
        translations: Arc<Translations>,
    ) -> Self {
        Self {
            registry,
            settings,
            messenger,
            translations,
        }
    }

    async fn notify(&self, snapshot: &ServerSnapshot) -> Result<(), EngineError> {
        let watching: BTreeSet<CommunityId> = self
            .settings
            .communities_watching(&snapshot.endpoint)
            .await?
            .into_iter()
            .collect();
        if watching.is_empty() {
            return Ok(());
        }

        let server_name = snapshot.display_name();
        for subscription in self.registry.active().await {
            if !watching.contains(&subscription.community_id) {
                continue;
            }

            let notice = Notice::new()
                .line(self.translations.get("Player Leave Notification Header"))
                .line(self.translations.format(
                    "Player Leave Notification Leave Message",
                    &[("ServerName", &server_name)],
                ))
                .accent(ACCENT_BLUE);

            let Err(err) = self
                .messenger
                .deliver(DeliveryTarget::User(subscription.user_id), &notice)
                .await
            else {
                continue;
            };
            debug!(user_id = subscription.user_id, %err, "direct message failed, trying log channel");
            if let Err(err) = self.fall_back(&subscription, notice).await {
                error!(user_id = subscription.user_id, %err, "leave notice fallback failed");
            }
        }
        Ok(())
    }

    async fn fall_back(&self, subscription: &Subscription, notice: Notice) -> Result<(), EngineError> {
        let Some(channel_id) = self.settings.log_channel(subscription.community_id).await? else {
            warn!(
                user_id = subscription.user_id,
                community_id = subscription.community_id,
                "leave notice undeliverable, community has no log channel"
            );
            return Ok(());
        };

        let notice = notice.mention(subscription.user_id);
        if let Err(err) = self
            .messenger
            .deliver(DeliveryTarget::Channel(channel_id), &notice)
            .await
        {
            warn!(
                user_id = subscription.user_id,
                channel_id,
                %err,
                "leave notice undeliverable in log channel"
            );
        }
        Ok(())
    }
}

#[async_trait]
impl PresenceListener for LeaveNotifier {
    fn name(&self) -> &'static str {
        "leave-notifier"
    }

    async fn on_event(&self, event: &PresenceEvent) -> Result<(), EngineError> {
        match event {
            // After a failed query only the old snapshot has the server name.
            PresenceEvent::Left { old, .. } => self.notify(old).await,
            _ => Ok(()),
        }
    }
}
