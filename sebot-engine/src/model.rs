//! Plain data shared by the poller, the subscription registry and the
//! command handlers.

use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::BTreeSet;
use std::fmt;
use std::time::Duration;

/// Chat platform community (a Discord guild).
pub type CommunityId = u64;
/// Chat platform user.
pub type UserId = u64;
/// Channel inside a community.
pub type ChannelId = u64;

/// Address of one game server instance.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    #[serde(rename = "ip")]
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Host as it appears before `:port` in an address. IPv6 literals are
    /// bracketed.
    pub fn url_host(&self) -> Cow<'_, str> {
        if self.host.contains(':') {
            Cow::Owned(format!("[{}]", self.host))
        } else {
            Cow::Borrowed(&self.host)
        }
    }

    /// Identity used to deduplicate queries: `host:port`.
    pub fn key(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.url_host(), self.port)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Player {
    pub name: String,
    /// How long the player has been connected when the snapshot was taken.
    pub session: Duration,
}

impl Player {
    pub fn new(name: impl Into<String>, session: Duration) -> Self {
        Self {
            name: name.into(),
            session,
        }
    }

    /// Blank names never take part in join/leave tracking.
    pub fn is_blank(&self) -> bool {
        self.name.trim().is_empty()
    }
}

/// Point-in-time read of one server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerSnapshot {
    pub name: String,
    pub player_count: u32,
    pub max_players: u32,
    pub players: Vec<Player>,
    pub endpoint: Endpoint,
}

impl ServerSnapshot {
    /// Default result used when a query produced nothing.
    pub fn empty(endpoint: Endpoint) -> Self {
        Self {
            name: String::new(),
            player_count: 0,
            max_players: 0,
            players: Vec::new(),
            endpoint,
        }
    }

    /// A snapshot without a server name is what a failed query leaves behind.
    pub fn is_online(&self) -> bool {
        !self.name.is_empty()
    }

    /// Non-blank player names.
    pub fn player_names(&self) -> BTreeSet<&str> {
        self.players
            .iter()
            .filter(|p| !p.is_blank())
            .map(|p| p.name.as_str())
            .collect()
    }

    /// Server name, falling back to the address for display.
    pub fn display_name(&self) -> String {
        if self.name.is_empty() {
            self.endpoint.to_string()
        } else {
            self.name.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_key() {
        let endpoint = Endpoint::new("10.0.0.1", 27016);
        assert_eq!(endpoint.key(), "10.0.0.1:27016");
        assert_eq!(endpoint.to_string(), "10.0.0.1:27016");
    }

    #[test]
    fn test_ipv6_endpoint_is_bracketed() {
        let endpoint = Endpoint::new("::1", 27016);
        assert_eq!(endpoint.url_host(), "[::1]");
        assert_eq!(endpoint.key(), "[::1]:27016");
        assert_eq!(endpoint.to_string(), "[::1]:27016");
        // Stored as typed
        let json = serde_json::to_value(&endpoint).unwrap();
        assert_eq!(json["ip"], "::1");
    }

    #[test]
    fn test_endpoint_serializes_host_as_ip() {
        let json = serde_json::to_value(Endpoint::new("example.org", 1)).unwrap();
        assert_eq!(json["ip"], "example.org");
        assert_eq!(json["port"], 1);
    }

    #[test]
    fn test_player_names_skip_blank() {
        let mut snapshot = ServerSnapshot::empty(Endpoint::new("h", 1));
        snapshot.players = vec![
            Player::new("Alex", Duration::ZERO),
            Player::new("   ", Duration::ZERO),
            Player::new("", Duration::ZERO),
        ];
        assert_eq!(snapshot.player_names().into_iter().collect::<Vec<_>>(), vec!["Alex"]);
    }

    #[test]
    fn test_empty_snapshot_is_offline() {
        let snapshot = ServerSnapshot::empty(Endpoint::new("h", 1));
        assert!(!snapshot.is_online());
        assert_eq!(snapshot.display_name(), "h:1");
    }
}
