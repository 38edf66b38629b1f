use std::collections::HashMap;
use std::path::Path;
use tracing::{info, warn};

const DEFAULTS: &[(&str, &str)] = &[
    ("Join Message", "**{PlayerName}** joined the server"),
    ("Leave Message", "**{PlayerName}** left the server"),
    ("Batch Join Message", "**{Count}** players joined: {PlayerNames}"),
    ("Batch Leave Message", "**{Count}** players left: {PlayerNames}"),
    ("Player List Current", "### Players online: {PlayerCount}/{MaxPlayers}"),
    ("Player List Empty", "Nobody is online right now."),
    ("Query Failed", "Failed to get server info. Failed to query!"),
    ("Server Not Configured", "No server is configured for this community. Ask an admin to run `/setserver`."),
    ("Player Leave Notification Header", "### Player Leave Notification"),
    ("Player Leave Notification Start", "You will be notified when a player leaves **{ServerName}**."),
    ("Player Leave Notification Stop", "You will no longer be notified when a player leaves."),
    ("Player Leave Notification Update", "You will now be notified when a player leaves **{ServerName}** instead."),
    ("Player Leave Notification Leave Message", "A player just left **{ServerName}**."),
    ("Player Leave Notification Automatic Removal", "Your leave notification expired and was removed automatically."),
    ("Player List Entry", "- {PlayerName} ({Duration}, joined {JoinedAt})"),
    ("Server Set", "Now watching `{Endpoint}`."),
    ("Log Channel Set", "Join and leave messages will be posted in <#{ChannelId}>."),
    ("Wiki Message", "The Space Engineers wiki: {WikiUrl}"),
    ("Status Online", "🟢 Online"),
    ("Status Offline", "🔴 Offline"),
    ("Unknown Command", "Unknown command: `{Command}`"),
    ("Unknown Subcommand", "Unknown subcommand: `{Command}`"),
    ("Community Only", "This command can only be used in a server."),
    ("Direct Only", "This command can only be used in DMs."),
    ("No Permission", "You don't have permission to use this command."),
    ("Missing Arguments", "Missing arguments. Required: {Required}, Provided: {Provided}\n**Expected:** {Expected}"),
    ("Command Failed", "An error occurred while processing the command."),
];

/// Localized strings with `{Name}` placeholders.
#[derive(Debug, Clone)]
pub struct Translations {
    strings: HashMap<String, String>,
}

impl Translations {
    /// Built-in English strings.
    pub fn builtin() -> Self {
        Self {
            strings: DEFAULTS
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }

    /// Built-in strings overridden by a JSON object file. An unreadable or
    /// malformed file is logged and ignored.
    pub async fn load(path: impl AsRef<Path>) -> Self {
        let mut translations = Self::builtin();
        let path = path.as_ref();

        let raw = match tokio::fs::read_to_string(path).await {
            Ok(raw) => raw,
            Err(err) => {
                warn!(path = %path.display(), %err, "translations file unreadable, using built-in strings");
                return translations;
            }
        };

        match serde_json::from_str::<HashMap<String, String>>(&raw) {
            Ok(overrides) => {
                info!(path = %path.display(), count = overrides.len(), "loaded translation overrides");
                translations.strings.extend(overrides);
            }
            Err(err) => {
                warn!(path = %path.display(), %err, "translations file malformed, using built-in strings");
            }
        }
        translations
    }

    /// The string for `key`, or the key itself when unknown.
    pub fn get(&self, key: &str) -> String {
        self.strings
            .get(key)
            .cloned()
            .unwrap_or_else(|| key.to_string())
    }

    /// The string for `key` with every `{Name}` replaced. Substituted values
    /// are inserted verbatim and never expanded again.
    pub fn format(&self, key: &str, substitutions: &[(&str, &str)]) -> String {
        let template = self.get(key);
        let mut out = String::with_capacity(template.len());
        let mut rest = template.as_str();
        while let Some(open) = rest.find('{') {
            out.push_str(&rest[..open]);
            let after = &rest[open + 1..];
            let found = after.find('}').and_then(|close| {
                let name = &after[..close];
                substitutions
                    .iter()
                    .find(|(n, _)| *n == name)
                    .map(|(_, value)| (*value, close))
            });
            match found {
                Some((value, close)) => {
                    out.push_str(value);
                    rest = &after[close + 1..];
                }
                None => {
                    out.push('{');
                    rest = after;
                }
            }
        }
        out.push_str(rest);
        out
    }
}

impl Default for Translations {
    fn default() -> Self {
        Self::builtin()
    }
}
