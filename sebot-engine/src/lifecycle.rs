//! Startup and bounded shutdown of the background loops.

use sebot_db::ConfigStore;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::subscriptions::SubscriptionRegistry;

/// Which loops stopped on their own and which had to be abandoned.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ShutdownReport {
    pub stopped: Vec<&'static str>,
    pub timed_out: Vec<&'static str>,
}

impl ShutdownReport {
    pub fn is_clean(&self) -> bool {
        self.timed_out.is_empty()
    }
}

pub struct LifecycleCoordinator {
    token: CancellationToken,
    tasks: Vec<(&'static str, JoinHandle<()>)>,
    eviction: Option<Arc<SubscriptionRegistry>>,
    store: Option<ConfigStore>,
    timeout: Duration,
}

impl LifecycleCoordinator {
    pub fn new(timeout: Duration) -> Self {
        Self {
            token: CancellationToken::new(),
            tasks: Vec::new(),
            eviction: None,
            store: None,
            timeout,
        }
    }

    /// Spawn a loop that exits once its token is cancelled.
    pub fn spawn<F, Fut>(&mut self, name: &'static str, start: F)
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(start(self.token.clone()));
        self.tasks.push((name, handle));
    }

    /// Start `registry`'s eviction loop and stop it on shutdown.
    pub fn supervise_eviction(&mut self, registry: Arc<SubscriptionRegistry>, ttl: Duration, interval: Duration) {
        registry.start_eviction(ttl, interval);
        self.eviction = Some(registry);
    }

    /// Close `store` once every loop is gone.
    pub fn release_on_shutdown(&mut self, store: ConfigStore) {
        self.store = Some(store);
    }

    pub fn running(&self) -> usize {
        self.tasks.iter().filter(|(_, h)| !h.is_finished()).count()
            + usize::from(self.eviction.as_ref().is_some_and(|r| r.eviction_running()))
    }

    /// Cancel everything, wait up to the timeout for each loop, then release
    /// held resources whatever happened.
    pub async fn shutdown(mut self) -> ShutdownReport {
        info!(tasks = self.tasks.len(), "shutting down");
        self.token.cancel();

        let timeout = self.timeout;
        let results = futures::future::join_all(self.tasks.drain(..).map(|(name, mut handle)| async move {
            match tokio::time::timeout(timeout, &mut handle).await {
                Ok(Ok(())) => (name, true),
                Ok(Err(err)) => {
                    error!(task = name, %err, "background task ended abnormally");
                    (name, true)
                }
                Err(_) => {
                    warn!(task = name, timeout_secs = timeout.as_secs(), "background task did not stop in time");
                    handle.abort();
                    (name, false)
                }
            }
        }))
        .await;

        let mut report = ShutdownReport::default();
        for (name, stopped) in results {
            if stopped {
                report.stopped.push(name);
            } else {
                report.timed_out.push(name);
            }
        }

        if let Some(registry) = self.eviction.take() {
            if registry.stop_eviction(timeout).await {
                report.stopped.push("eviction");
            } else {
                report.timed_out.push("eviction");
            }
        }

        if let Some(store) = self.store.take() {
            if let Err(err) = store.close().await {
                error!(%err, "failed to close config store");
            }
        }

        info!(
            stopped = report.stopped.len(),
            timed_out = report.timed_out.len(),
            "shutdown complete"
        );
        report
    }
}
