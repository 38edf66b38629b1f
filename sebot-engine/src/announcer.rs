use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::EngineError;
use crate::events::{PresenceEvent, PresenceListener};
use crate::messenger::{ACCENT_BLUE, ACCENT_MAGENTA, DeliveryTarget, Messenger, Notice};
use crate::model::{Player, ServerSnapshot};
use crate::settings::Settings;
use crate::translations::Translations;

/// Posts joins and leaves to each watching community's log channel.
pub struct LogChannelAnnouncer {
    settings: Settings,
    messenger: Arc<dyn Messenger>,
    translations: Arc<Translations>,
}

#[derive(Clone, Copy)]
enum Direction {
    Joined,
    Left,
}

impl LogChannelAnnouncer {
    pub fn new(settings: Settings, messenger: Arc<dyn Messenger>, translations: Arc<Translations>) -> Self {
        Self {
            settings,
            messenger,
            translations,
        }
    }

    fn render(&self, direction: Direction, snapshot: &ServerSnapshot, players: &[Player]) -> Notice {
        let (single, batch, accent) = match direction {
            Direction::Joined => ("Join Message", "Batch Join Message", ACCENT_MAGENTA),
            Direction::Left => ("Leave Message", "Batch Leave Message", ACCENT_BLUE),
        };

        let line = match players {
            [player] => self.translations.format(single, &[("PlayerName", &player.name)]),
            _ => {
                let names = players
                    .iter()
                    .map(|p| p.name.as_str())
                    .collect::<Vec<_>>()
                    .join(", ");
                self.translations.format(
                    batch,
                    &[("Count", &players.len().to_string()), ("PlayerNames", &names)],
                )
            }
        };

        Notice::new()
            .line(line)
            .accent(accent)
            .footer(snapshot.display_name())
    }

    async fn announce(
        &self,
        direction: Direction,
        snapshot: &ServerSnapshot,
        players: &[Player],
    ) -> Result<(), EngineError> {
        let communities = self.settings.communities_watching(&snapshot.endpoint).await?;
        if communities.is_empty() {
            return Ok(());
        }

        let channels = self.settings.log_channels().await?;
        let notice = self.render(direction, snapshot, players);
        for community_id in communities {
            let Some(channel_id) = channels.get(&community_id).copied() else {
                debug!(community_id, "no log channel configured, skipping announcement");
                continue;
            };
            if let Err(err) = self
                .messenger
                .deliver(DeliveryTarget::Channel(channel_id), &notice)
                .await
            {
                warn!(community_id, channel_id, %err, "failed to post to log channel");
            }
        }
        Ok(())
    }
}

#[async_trait]
impl PresenceListener for LogChannelAnnouncer {
    fn name(&self) -> &'static str {
        "log-channel"
    }

    async fn on_event(&self, event: &PresenceEvent) -> Result<(), EngineError> {
        match event {
            PresenceEvent::JoinedBatch { new, players, .. } => {
                self.announce(Direction::Joined, new, players).await
            }
            PresenceEvent::LeftBatch { old, players, .. } => {
                // A failed query leaves an unnamed snapshot behind; the old one
                // still knows the server's name.
                self.announce(Direction::Left, old, players).await
            }
            _ => Ok(()),
        }
    }
}
