//! Typed view over the persisted config keys this bot reads and writes.

use sebot_db::{ConfigStore, Result};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use crate::model::{ChannelId, CommunityId, Endpoint};

pub const PING_INFO: &str = "PingInfo";
pub const LOG_CHANNEL: &str = "LogChannel";
pub const AUTO_REMOVE_TIME: &str = "PlayerLeaveNotificationAutoRemoveTime";
pub const CHECK_INTERVAL: &str = "PlayerLeaveNotificationCheckInterval";

pub const DEFAULT_AUTO_REMOVE_SECS: u64 = 3600;
pub const DEFAULT_CHECK_INTERVAL_SECS: u64 = 30;

#[derive(Clone)]
pub struct Settings {
    store: ConfigStore,
    // Serializes read-modify-write of the map-valued keys.
    write_lock: Arc<Mutex<()>>,
}

impl Settings {
    pub fn new(store: ConfigStore) -> Self {
        Self {
            store,
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn store(&self) -> &ConfigStore {
        &self.store
    }

    /// Write the eviction defaults so operators find the keys to edit.
    pub async fn ensure_defaults(&self) -> Result<()> {
        self.store.add_default(AUTO_REMOVE_TIME, &DEFAULT_AUTO_REMOVE_SECS).await?;
        self.store.add_default(CHECK_INTERVAL, &DEFAULT_CHECK_INTERVAL_SECS).await?;
        Ok(())
    }

    /// Every tracked community and the server it watches.
    pub async fn endpoints(&self) -> Result<BTreeMap<CommunityId, Endpoint>> {
        Ok(self.store.load(PING_INFO).await?.unwrap_or_default())
    }

    pub async fn endpoint(&self, community_id: CommunityId) -> Result<Option<Endpoint>> {
        Ok(self.endpoints().await?.remove(&community_id))
    }

    pub async fn set_endpoint(&self, community_id: CommunityId, endpoint: Endpoint) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut endpoints = self.endpoints().await?;
        endpoints.insert(community_id, endpoint);
        self.store.save(PING_INFO, &endpoints).await
    }

    /// Communities whose configured server is `endpoint`.
    pub async fn communities_watching(&self, endpoint: &Endpoint) -> Result<Vec<CommunityId>> {
        Ok(self
            .endpoints()
            .await?
            .into_iter()
            .filter(|(_, e)| e == endpoint)
            .map(|(id, _)| id)
            .collect())
    }

    pub async fn log_channels(&self) -> Result<BTreeMap<CommunityId, ChannelId>> {
        Ok(self.store.load(LOG_CHANNEL).await?.unwrap_or_default())
    }

    pub async fn log_channel(&self, community_id: CommunityId) -> Result<Option<ChannelId>> {
        Ok(self.log_channels().await?.remove(&community_id))
    }

    pub async fn set_log_channel(&self, community_id: CommunityId, channel_id: ChannelId) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut channels = self.log_channels().await?;
        channels.insert(community_id, channel_id);
        self.store.save(LOG_CHANNEL, &channels).await
    }

    /// Age at which a leave subscription is removed automatically.
    pub async fn subscription_ttl(&self) -> Result<Duration> {
        let secs: Option<u64> = self.store.load(AUTO_REMOVE_TIME).await?;
        Ok(Duration::from_secs(secs.unwrap_or(DEFAULT_AUTO_REMOVE_SECS).max(1)))
    }

    /// How often the eviction loop looks for expired subscriptions.
    pub async fn subscription_check_interval(&self) -> Result<Duration> {
        let secs: Option<u64> = self.store.load(CHECK_INTERVAL).await?;
        Ok(Duration::from_secs(secs.unwrap_or(DEFAULT_CHECK_INTERVAL_SECS).max(1)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn settings() -> Settings {
        Settings::new(ConfigStore::open_in_memory().await.unwrap())
    }

    #[tokio::test]
    async fn test_defaults_when_absent() {
        let settings = settings().await;
        assert!(settings.endpoints().await.unwrap().is_empty());
        assert!(settings.log_channel(1).await.unwrap().is_none());
        assert_eq!(settings.subscription_ttl().await.unwrap(), Duration::from_secs(3600));
        assert_eq!(
            settings.subscription_check_interval().await.unwrap(),
            Duration::from_secs(30)
        );
    }

    #[tokio::test]
    async fn test_set_endpoint_keeps_other_communities() {
        let settings = settings().await;
        settings.set_endpoint(1, Endpoint::new("a", 1)).await.unwrap();
        settings.set_endpoint(2, Endpoint::new("b", 2)).await.unwrap();
        settings.set_endpoint(1, Endpoint::new("c", 3)).await.unwrap();

        let endpoints = settings.endpoints().await.unwrap();
        assert_eq!(endpoints.len(), 2);
        assert_eq!(endpoints[&1], Endpoint::new("c", 3));
        assert_eq!(endpoints[&2], Endpoint::new("b", 2));
    }

    #[tokio::test]
    async fn test_communities_watching_same_server() {
        let settings = settings().await;
        settings.set_endpoint(1, Endpoint::new("a", 1)).await.unwrap();
        settings.set_endpoint(2, Endpoint::new("a", 1)).await.unwrap();
        settings.set_endpoint(3, Endpoint::new("b", 1)).await.unwrap();

        let watching = settings.communities_watching(&Endpoint::new("a", 1)).await.unwrap();
        assert_eq!(watching, vec![1, 2]);
    }

    #[tokio::test]
    async fn test_configured_intervals() {
        let settings = settings().await;
        settings.store().save(AUTO_REMOVE_TIME, &60u64).await.unwrap();
        settings.store().save(CHECK_INTERVAL, &5u64).await.unwrap();

        assert_eq!(settings.subscription_ttl().await.unwrap(), Duration::from_secs(60));
        assert_eq!(
            settings.subscription_check_interval().await.unwrap(),
            Duration::from_secs(5)
        );
    }

    #[tokio::test]
    async fn test_zero_intervals_are_raised_to_one_second() {
        let settings = settings().await;
        settings.store().save(AUTO_REMOVE_TIME, &0u64).await.unwrap();
        settings.store().save(CHECK_INTERVAL, &0u64).await.unwrap();

        assert_eq!(settings.subscription_ttl().await.unwrap(), Duration::from_secs(1));
        assert_eq!(
            settings.subscription_check_interval().await.unwrap(),
            Duration::from_secs(1)
        );
    }

    #[tokio::test]
    async fn test_ensure_defaults_keeps_existing_values() {
        let settings = settings().await;
        settings.store().save(AUTO_REMOVE_TIME, &120u64).await.unwrap();

        settings.ensure_defaults().await.unwrap();

        assert_eq!(settings.subscription_ttl().await.unwrap(), Duration::from_secs(120));
        let interval: Option<u64> = settings.store().load(CHECK_INTERVAL).await.unwrap();
        assert_eq!(interval, Some(DEFAULT_CHECK_INTERVAL_SECS));
    }

    #[tokio::test]
    async fn test_log_channel_roundtrip() {
        let settings = settings().await;
        settings.set_log_channel(7, 700).await.unwrap();
        assert_eq!(settings.log_channel(7).await.unwrap(), Some(700));
    }
}
