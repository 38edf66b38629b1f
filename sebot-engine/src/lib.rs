pub mod announcer;
pub mod commands;
pub mod config;
pub mod error;
pub mod events;
pub mod helpers;
pub mod lifecycle;
pub mod messenger;
pub mod model;
pub mod poller;
pub mod query;
mod routes;
pub mod settings;
pub mod status;
pub mod subscriptions;
pub mod translations;

#[cfg(test)]
mod testing;

use axum::{Router, http::StatusCode, routing::get};
use sebot_db::ConfigStore;
use std::sync::Arc;
use std::time::Duration;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::announcer::LogChannelAnnouncer;
use crate::commands::{CommandRouter, Services, builtin};
use crate::config::Config;
use crate::error::EngineError;
use crate::events::{EventBus, PresenceListener, run_listener};
use crate::helpers::Clock;
use crate::lifecycle::LifecycleCoordinator;
use crate::messenger::Messenger;
use crate::poller::{SnapshotStore, StatePoller};
use crate::query::{QueryCoordinator, ServerQuery};
use crate::settings::Settings;
use crate::status::{PresenceSink, StatusRefresher};
use crate::subscriptions::{LeaveNotifier, SubscriptionRegistry};
use crate::translations::Translations;

pub struct AppState {
    pub settings: Settings,
    pub snapshots: Arc<SnapshotStore>,
}

/// Create the status router over the given settings and snapshot map
pub fn create_app(settings: Settings, snapshots: Arc<SnapshotStore>, request_timeout: Duration) -> Router {
    let state = Arc::new(AppState {
        settings,
        snapshots,
    });

    Router::new()
        .route("/health", get(|| async { StatusCode::OK }))
        .route("/status", get(routes::status))
        .route("/status/{community_id}", get(routes::community))
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            request_timeout,
        ))
        .with_state(state)
}

/// Platform pieces the engine is wired to.
pub struct EngineDeps {
    pub store: ConfigStore,
    pub query: Arc<dyn ServerQuery>,
    pub messenger: Arc<dyn Messenger>,
    pub presence: Arc<dyn PresenceSink>,
    pub clock: Arc<dyn Clock>,
    pub translations: Translations,
}

/// Owns every shared component; nothing lives in process-wide statics.
pub struct Engine {
    pub settings: Settings,
    pub coordinator: Arc<QueryCoordinator>,
    pub snapshots: Arc<SnapshotStore>,
    pub events: Arc<EventBus>,
    pub subscriptions: Arc<SubscriptionRegistry>,
    pub translations: Arc<Translations>,
    pub router: Arc<CommandRouter>,
    poller: Arc<StatePoller>,
    status: Arc<StatusRefresher>,
    messenger: Arc<dyn Messenger>,
    store: ConfigStore,
    shutdown_timeout: Duration,
}

impl Engine {
    pub fn new(config: &Config, deps: EngineDeps) -> Self {
        let settings = Settings::new(deps.store.clone());
        let translations = Arc::new(deps.translations);
        let coordinator = Arc::new(QueryCoordinator::new(deps.query));
        let snapshots = Arc::new(SnapshotStore::new());
        let events = Arc::new(EventBus::default());
        let subscriptions = Arc::new(SubscriptionRegistry::new(
            Arc::clone(&deps.clock),
            Arc::clone(&deps.messenger),
            Arc::clone(&translations),
        ));

        let poller = Arc::new(StatePoller::new(
            Arc::clone(&coordinator),
            settings.clone(),
            Arc::clone(&snapshots),
            Arc::clone(&events),
            config.poll_interval,
            config.poll_backoff,
        ));
        let status = Arc::new(StatusRefresher::new(
            Arc::clone(&coordinator),
            settings.clone(),
            deps.presence,
            config.status_interval,
        ));

        let services = Arc::new(Services {
            settings: settings.clone(),
            coordinator: Arc::clone(&coordinator),
            snapshots: Arc::clone(&snapshots),
            subscriptions: Arc::clone(&subscriptions),
            translations: Arc::clone(&translations),
            clock: deps.clock,
        });
        let (router, _report) = CommandRouter::register(builtin::COMMANDS, services);

        Self {
            settings,
            coordinator,
            snapshots,
            events,
            subscriptions,
            translations,
            router: Arc::new(router),
            poller,
            status,
            messenger: deps.messenger,
            store: deps.store,
            shutdown_timeout: config.shutdown_timeout,
        }
    }

    pub fn http_app(&self, request_timeout: Duration) -> Router {
        create_app(self.settings.clone(), Arc::clone(&self.snapshots), request_timeout)
    }

    fn listeners(&self) -> Vec<Arc<dyn PresenceListener>> {
        vec![
            Arc::new(LeaveNotifier::new(
                Arc::clone(&self.subscriptions),
                self.settings.clone(),
                Arc::clone(&self.messenger),
                Arc::clone(&self.translations),
            )),
            Arc::new(LogChannelAnnouncer::new(
                self.settings.clone(),
                Arc::clone(&self.messenger),
                Arc::clone(&self.translations),
            )),
        ]
    }

    /// Start every background loop. The returned coordinator stops them.
    pub async fn start(&self) -> Result<LifecycleCoordinator, EngineError> {
        self.settings.ensure_defaults().await?;
        let ttl = self.settings.subscription_ttl().await?;
        let check_interval = self.settings.subscription_check_interval().await?;

        let mut lifecycle = LifecycleCoordinator::new(self.shutdown_timeout);

        // Listeners subscribe before the first tick can publish.
        for listener in self.listeners() {
            let rx = self.events.subscribe();
            lifecycle.spawn(listener.name(), move |token| run_listener(listener, rx, token));
        }

        let poller = Arc::clone(&self.poller);
        lifecycle.spawn("poller", move |token| poller.run(token));
        let status = Arc::clone(&self.status);
        lifecycle.spawn("status", move |token| status.run(token));
        lifecycle.supervise_eviction(Arc::clone(&self.subscriptions), ttl, check_interval);
        lifecycle.release_on_shutdown(self.store.clone());

        tracing::info!(
            ttl_secs = ttl.as_secs(),
            check_interval_secs = check_interval.as_secs(),
            "engine started"
        );
        Ok(lifecycle)
    }
}
