//! The bot's own commands, registered from [`COMMANDS`] at startup.

use futures::FutureExt;
use futures::future::BoxFuture;

use super::validation::parse_endpoint;
use super::{
    ArgKind, ArgSpec, CommandContext, CommandSpec, ContextRestriction, Defer, Permission, Reply,
};
use crate::error::CommandError;
use crate::helpers::{format_duration, relative_timestamp};
use crate::messenger::{ACCENT_GREEN, ACCENT_RED, Notice};
use crate::model::Endpoint;
use crate::subscriptions::SubscribeOutcome;

pub const WIKI_URL: &str = "https://spaceengineers.wiki.gg/";

pub const COMMANDS: &[fn() -> CommandSpec] = &[
    playerlist,
    status,
    player_leave_notification,
    wiki,
    set_server,
    set_log_channel,
];

type HandlerFuture = BoxFuture<'static, Result<Reply, CommandError>>;

/// Server configured for the invoking community, or the reply saying
/// there is none.
async fn configured_endpoint(ctx: &CommandContext) -> Result<Result<Endpoint, Reply>, CommandError> {
    let community_id = ctx.community_id()?;
    Ok(match ctx.services.settings.endpoint(community_id).await? {
        Some(endpoint) => Ok(endpoint),
        None => Err(Reply::failure(ctx.translate("Server Not Configured", &[]))),
    })
}

pub fn playerlist() -> CommandSpec {
    CommandSpec::new("playerlist", "Show who is playing right now")
        .context(ContextRestriction::Community)
        .defer(Defer::Public)
        .run(run_playerlist)
}

fn run_playerlist(ctx: CommandContext) -> HandlerFuture {
    async move {
        let endpoint = match configured_endpoint(&ctx).await? {
            Ok(endpoint) => endpoint,
            Err(reply) => return Ok(reply),
        };
        let Some(snapshot) = ctx.services.coordinator.fetch(&endpoint).await else {
            return Ok(Reply::failure(ctx.translate("Query Failed", &[])));
        };

        let mut notice = Notice::new()
            .line(ctx.translate(
                "Player List Current",
                &[
                    ("PlayerCount", &snapshot.player_count.to_string()),
                    ("MaxPlayers", &snapshot.max_players.to_string()),
                ],
            ))
            .accent(ACCENT_GREEN)
            .footer(snapshot.display_name());

        let now = ctx.services.clock.now();
        let players: Vec<_> = snapshot.players.iter().filter(|p| !p.is_blank()).collect();
        if players.is_empty() {
            notice = notice.line(ctx.translate("Player List Empty", &[]));
        }
        for player in players {
            notice = notice.line(ctx.translate(
                "Player List Entry",
                &[
                    ("PlayerName", &player.name),
                    ("Duration", &format_duration(player.session)),
                    ("JoinedAt", &relative_timestamp(now, player.session)),
                ],
            ));
        }
        Ok(Reply::rich(notice))
    }
    .boxed()
}

pub fn status() -> CommandSpec {
    CommandSpec::new("status", "Show whether the server is up")
        .context(ContextRestriction::Community)
        .defer(Defer::Public)
        .run(run_status)
}

fn run_status(ctx: CommandContext) -> HandlerFuture {
    async move {
        let endpoint = match configured_endpoint(&ctx).await? {
            Ok(endpoint) => endpoint,
            Err(reply) => return Ok(reply),
        };

        let notice = match ctx.services.coordinator.fetch(&endpoint).await {
            Some(snapshot) if snapshot.is_online() => Notice::new()
                .line(format!("**{}**", snapshot.name))
                .line(format!("Address: `{}`", endpoint))
                .line(format!("Status: {}", ctx.translate("Status Online", &[])))
                .line(format!("Players: {}/{}", snapshot.player_count, snapshot.max_players))
                .accent(ACCENT_GREEN),
            _ => Notice::new()
                .line(format!("Address: `{}`", endpoint))
                .line(format!("Status: {}", ctx.translate("Status Offline", &[])))
                .accent(ACCENT_RED),
        };
        Ok(Reply::rich(notice))
    }
    .boxed()
}

pub fn player_leave_notification() -> CommandSpec {
    CommandSpec::new(
        "playerleavenotification",
        "Toggle a direct message whenever a player leaves",
    )
    .context(ContextRestriction::Community)
    .defer(Defer::Public)
    .run(run_player_leave_notification)
}

fn run_player_leave_notification(ctx: CommandContext) -> HandlerFuture {
    async move {
        let endpoint = match configured_endpoint(&ctx).await? {
            Ok(endpoint) => endpoint,
            Err(reply) => return Ok(reply),
        };
        let community_id = ctx.community_id()?;
        let server_name = match ctx.services.snapshots.get(community_id).await {
            Some(snapshot) if snapshot.is_online() => snapshot.name.clone(),
            _ => endpoint.to_string(),
        };

        let outcome = ctx
            .services
            .subscriptions
            .subscribe(ctx.invocation.user_id, community_id)
            .await;
        let key = match outcome {
            SubscribeOutcome::Started => "Player Leave Notification Start",
            SubscribeOutcome::Stopped => "Player Leave Notification Stop",
            SubscribeOutcome::Moved { .. } => "Player Leave Notification Update",
        };

        Ok(Reply::rich(
            Notice::new()
                .line(ctx.translate("Player Leave Notification Header", &[]))
                .line(ctx.translate(key, &[("ServerName", &server_name)])),
        ))
    }
    .boxed()
}

pub fn wiki() -> CommandSpec {
    CommandSpec::new("wiki", "Link to the game wiki").sync(|ctx| {
        Ok(Reply::ok(ctx.translate("Wiki Message", &[("WikiUrl", WIKI_URL)])))
    })
}

static SET_SERVER_ARGS: &[ArgSpec] = &[
    ArgSpec::new("ip", "Server IP address or host name", ArgKind::String),
    ArgSpec::new("port", "Server query port", ArgKind::Integer),
];

pub fn set_server() -> CommandSpec {
    CommandSpec::new("setserver", "Choose the server this community watches")
        .permission(Permission::ManageMessages)
        .context(ContextRestriction::Community)
        .args(SET_SERVER_ARGS)
        .defer(Defer::Ephemeral)
        .run(run_set_server)
}

fn run_set_server(ctx: CommandContext) -> HandlerFuture {
    async move {
        let community_id = ctx.community_id()?;
        let host = ctx.args.get("ip").and_then(|v| v.as_str()).unwrap_or_default();
        let Some(port) = ctx.args.get("port").and_then(|v| v.as_integer()) else {
            return Ok(Reply::failure("Port must be a number"));
        };

        let endpoint = match parse_endpoint(host, port) {
            Ok(endpoint) => endpoint,
            Err(err) => return Ok(Reply::failure(err.to_string())),
        };
        ctx.services
            .settings
            .set_endpoint(community_id, endpoint.clone())
            .await?;
        tracing::info!(community_id, %endpoint, "server configured");

        Ok(Reply::ok(ctx.translate("Server Set", &[("Endpoint", &endpoint.to_string())])).ephemeral())
    }
    .boxed()
}

static SET_LOG_CHANNEL_ARGS: &[ArgSpec] = &[ArgSpec::new(
    "channel",
    "Channel for join and leave messages",
    ArgKind::Channel,
)];

pub fn set_log_channel() -> CommandSpec {
    CommandSpec::new("setlogchannel", "Choose where join and leave messages go")
        .permission(Permission::ManageMessages)
        .context(ContextRestriction::Community)
        .args(SET_LOG_CHANNEL_ARGS)
        .defer(Defer::Ephemeral)
        .run(run_set_log_channel)
}

fn run_set_log_channel(ctx: CommandContext) -> HandlerFuture {
    async move {
        let community_id = ctx.community_id()?;
        let Some(channel_id) = ctx.args.get("channel").and_then(|v| v.as_channel()) else {
            return Ok(Reply::failure("Please pick a text channel"));
        };
        ctx.services
            .settings
            .set_log_channel(community_id, channel_id)
            .await?;
        tracing::info!(community_id, channel_id, "log channel configured");

        Ok(Reply::ok(ctx.translate(
            "Log Channel Set",
            &[("ChannelId", &channel_id.to_string())],
        ))
        .ephemeral())
    }
    .boxed()
}
