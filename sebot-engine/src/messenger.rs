use async_trait::async_trait;

use crate::error::DeliveryError;
use crate::model::{ChannelId, UserId};

pub const ACCENT_MAGENTA: u32 = 0xE91E63;
pub const ACCENT_BLUE: u32 = 0x3498DB;
pub const ACCENT_GREEN: u32 = 0x2ECC71;
pub const ACCENT_RED: u32 = 0xE74C3C;

/// Where a message goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeliveryTarget {
    /// Direct message to one user.
    User(UserId),
    /// A channel inside a community.
    Channel(ChannelId),
}

/// Platform-neutral message body; the adapter decides how to render it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Notice {
    pub lines: Vec<String>,
    pub accent: Option<u32>,
    pub footer: Option<String>,
    /// User to tag in the message.
    pub mention: Option<UserId>,
}

impl Notice {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn line(mut self, line: impl Into<String>) -> Self {
        self.lines.push(line.into());
        self
    }

    pub fn accent(mut self, accent: u32) -> Self {
        self.accent = Some(accent);
        self
    }

    pub fn footer(mut self, footer: impl Into<String>) -> Self {
        self.footer = Some(footer.into());
        self
    }

    pub fn mention(mut self, user_id: UserId) -> Self {
        self.mention = Some(user_id);
        self
    }

    pub fn text(&self) -> String {
        self.lines.join("\n")
    }
}

/// The opaque `Deliver(target, content)` call.
#[async_trait]
pub trait Messenger: Send + Sync {
    async fn deliver(&self, target: DeliveryTarget, notice: &Notice) -> Result<(), DeliveryError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_notice_builder() {
        let notice = Notice::new().line("a").line("b").accent(ACCENT_BLUE).mention(7);
        assert_eq!(notice.text(), "a\nb");
        assert_eq!(notice.accent, Some(ACCENT_BLUE));
        assert_eq!(notice.mention, Some(7));
    }
}
