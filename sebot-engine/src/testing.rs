//! Fakes shared by the unit tests.

use async_trait::async_trait;
use sebot_db::ConfigStore;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::commands::{Reply, Responder, Services};
use crate::error::{DeliveryError, QueryError};
use crate::helpers::ManualClock;
use crate::messenger::{DeliveryTarget, Messenger, Notice};
use crate::model::{Endpoint, Player, ServerSnapshot};
use crate::poller::SnapshotStore;
use crate::query::{QueryCoordinator, ServerQuery};
use crate::settings::Settings;
use crate::subscriptions::SubscriptionRegistry;
use crate::translations::Translations;

/// Server stand-in that counts calls and answers after `delay`.
pub struct FakeQuery {
    calls: AtomicUsize,
    delay: Duration,
    answers: Mutex<HashMap<String, ServerSnapshot>>,
}

impl FakeQuery {
    pub fn new(delay: Duration) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            delay,
            answers: Mutex::new(HashMap::new()),
        }
    }

    pub fn answer(&self, snapshot: ServerSnapshot) {
        self.answers
            .lock()
            .unwrap()
            .insert(snapshot.endpoint.key(), snapshot);
    }

    pub fn fail(&self, endpoint: &Endpoint) {
        self.answers.lock().unwrap().remove(&endpoint.key());
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ServerQuery for FakeQuery {
    async fn query(&self, endpoint: &Endpoint) -> Result<ServerSnapshot, QueryError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.answers
            .lock()
            .unwrap()
            .get(&endpoint.key())
            .cloned()
            .ok_or_else(|| QueryError::Other("unreachable".to_string()))
    }
}

pub fn snapshot(endpoint: &Endpoint, name: &str, players: &[&str]) -> ServerSnapshot {
    ServerSnapshot {
        name: name.to_string(),
        player_count: players.len() as u32,
        max_players: 16,
        players: players
            .iter()
            .map(|p| Player::new(*p, Duration::from_secs(60)))
            .collect(),
        endpoint: endpoint.clone(),
    }
}

/// Messenger that records every delivery and rejects chosen targets.
#[derive(Default)]
pub struct RecordingMessenger {
    sent: Mutex<Vec<(DeliveryTarget, Notice)>>,
    rejecting: Mutex<HashSet<DeliveryTarget>>,
}

impl RecordingMessenger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reject(&self, target: DeliveryTarget) {
        self.rejecting.lock().unwrap().insert(target);
    }

    pub fn sent(&self) -> Vec<(DeliveryTarget, Notice)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_to(&self, target: DeliveryTarget) -> Vec<Notice> {
        self.sent()
            .into_iter()
            .filter(|(t, _)| *t == target)
            .map(|(_, n)| n)
            .collect()
    }
}

#[async_trait]
impl Messenger for RecordingMessenger {
    async fn deliver(&self, target: DeliveryTarget, notice: &Notice) -> Result<(), DeliveryError> {
        if self.rejecting.lock().unwrap().contains(&target) {
            return Err(DeliveryError::Rejected(format!("{:?}", target)));
        }
        self.sent.lock().unwrap().push((target, notice.clone()));
        Ok(())
    }
}

/// One call made on a `RecordingResponder`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Sent {
    Respond(Reply),
    Defer { ephemeral: bool },
    FollowUp(Reply),
}

#[derive(Default)]
pub struct RecordingResponder {
    sent: Mutex<Vec<Sent>>,
    fail_defer: bool,
}

impl RecordingResponder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_defer(mut self) -> Self {
        self.fail_defer = true;
        self
    }

    pub fn sent(&self) -> Vec<Sent> {
        self.sent.lock().unwrap().clone()
    }

    /// Replies only, deferrals left out.
    pub fn replies(&self) -> Vec<Reply> {
        self.sent()
            .into_iter()
            .filter_map(|s| match s {
                Sent::Respond(r) | Sent::FollowUp(r) => Some(r),
                Sent::Defer { .. } => None,
            })
            .collect()
    }

    pub fn only_reply(&self) -> Reply {
        let mut replies = self.replies();
        assert_eq!(replies.len(), 1, "expected exactly one reply: {:?}", replies);
        replies.remove(0)
    }
}

#[async_trait]
impl Responder for RecordingResponder {
    async fn respond(&self, reply: &Reply) -> Result<(), DeliveryError> {
        self.sent.lock().unwrap().push(Sent::Respond(reply.clone()));
        Ok(())
    }

    async fn defer(&self, ephemeral: bool) -> Result<(), DeliveryError> {
        if self.fail_defer {
            return Err(DeliveryError::Transport("interaction expired".to_string()));
        }
        self.sent.lock().unwrap().push(Sent::Defer { ephemeral });
        Ok(())
    }

    async fn follow_up(&self, reply: &Reply) -> Result<(), DeliveryError> {
        self.sent.lock().unwrap().push(Sent::FollowUp(reply.clone()));
        Ok(())
    }
}

/// Command services over in-memory fakes, with handles to the fakes.
pub struct TestServices {
    pub services: Arc<Services>,
    pub fake: Arc<FakeQuery>,
    pub clock: Arc<ManualClock>,
    pub messenger: Arc<RecordingMessenger>,
}

pub async fn test_services() -> TestServices {
    let settings = Settings::new(ConfigStore::open_in_memory().await.unwrap());
    let fake = Arc::new(FakeQuery::new(Duration::from_millis(1)));
    let clock = Arc::new(ManualClock::new(1_700_000_000));
    let messenger = Arc::new(RecordingMessenger::new());
    let translations = Arc::new(Translations::builtin());
    let subscriptions = Arc::new(SubscriptionRegistry::new(
        clock.clone(),
        messenger.clone(),
        Arc::clone(&translations),
    ));
    let services = Arc::new(Services {
        settings,
        coordinator: Arc::new(QueryCoordinator::new(fake.clone())),
        snapshots: Arc::new(SnapshotStore::new()),
        subscriptions,
        translations,
        clock: clock.clone(),
    });
    TestServices {
        services,
        fake,
        clock,
        messenger,
    }
}

pub async fn services() -> Arc<Services> {
    test_services().await.services
}
