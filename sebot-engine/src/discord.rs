//! Discord side of the bot: turns interactions into invocations and sends
//! notices, replies and presence back through serenity.

use async_trait::async_trait;
use poise::serenity_prelude as serenity;
use serenity::{
    ActivityData, ChannelType, CommandDataOption, CommandDataOptionValue, CommandInteraction,
    CommandOptionType, CreateCommand, CreateCommandOption, CreateEmbed, CreateEmbedFooter,
    CreateInteractionResponse, CreateInteractionResponseFollowup, CreateInteractionResponseMessage,
    CreateMessage, FullEvent, Http, Interaction, OnlineStatus, Permissions, ShardManager,
};
use std::sync::{Arc, OnceLock};
use tracing::{debug, info};

use sebot_engine::commands::{
    ArgKind, CommandNode, CommandOption, CommandRouter, ContextRestriction, Invocation,
    InvocationContext, OptionValue, Permission, Reply, Responder,
};
use sebot_engine::error::DeliveryError;
use sebot_engine::messenger::{DeliveryTarget, Messenger, Notice};
use sebot_engine::status::{BotPresence, PresenceSink};

use crate::Data;

pub(crate) type Error = Box<dyn std::error::Error + Send + Sync>;

fn transport(err: serenity::Error) -> DeliveryError {
    DeliveryError::Transport(err.to_string())
}

fn embed(notice: &Notice) -> CreateEmbed {
    let mut embed = CreateEmbed::new().description(notice.text());
    if let Some(accent) = notice.accent {
        embed = embed.color(accent);
    }
    if let Some(footer) = &notice.footer {
        embed = embed.footer(CreateEmbedFooter::new(footer));
    }
    embed
}

// ============================================================================
// Command registration
// ============================================================================

fn argument_options(node: &CommandNode) -> Vec<CreateCommandOption> {
    node.args
        .iter()
        .map(|arg| {
            let kind = match arg.kind {
                ArgKind::String => CommandOptionType::String,
                ArgKind::Integer => CommandOptionType::Integer,
                ArgKind::Channel => CommandOptionType::Channel,
            };
            let option = CreateCommandOption::new(kind, arg.name, arg.description).required(true);
            if arg.kind == ArgKind::Channel {
                option.channel_types(vec![ChannelType::Text])
            } else {
                option
            }
        })
        .collect()
}

fn nested_option(node: &CommandNode) -> CreateCommandOption {
    if node.children.is_empty() {
        return argument_options(node).into_iter().fold(
            CreateCommandOption::new(CommandOptionType::SubCommand, &node.name, &node.description),
            |option, arg| option.add_sub_option(arg),
        );
    }
    node.children.values().fold(
        CreateCommandOption::new(CommandOptionType::SubCommandGroup, &node.name, &node.description),
        |group, child| group.add_sub_option(nested_option(child)),
    )
}

/// Slash command definitions for every registered command.
pub(crate) fn create_commands(router: &CommandRouter) -> Vec<CreateCommand> {
    router
        .commands()
        .map(|node| {
            let mut command = CreateCommand::new(&node.name).description(&node.description);
            if node.context == ContextRestriction::Community {
                command = command.dm_permission(false);
            }
            match node.permission {
                Permission::ManageMessages => {
                    command = command.default_member_permissions(Permissions::MANAGE_MESSAGES)
                }
                Permission::Administrator => {
                    command = command.default_member_permissions(Permissions::ADMINISTRATOR)
                }
                Permission::SendMessages => {}
            }

            let options = if node.children.is_empty() {
                argument_options(node)
            } else {
                node.children.values().map(|child| nested_option(child)).collect()
            };
            options.into_iter().fold(command, |command, option| command.add_option(option))
        })
        .collect()
}

// ============================================================================
// Interactions
// ============================================================================

fn convert_options(options: &[CommandDataOption]) -> Vec<CommandOption> {
    options
        .iter()
        .filter_map(|option| {
            let name = option.name.clone();
            let value = match &option.value {
                CommandDataOptionValue::SubCommand(inner) => {
                    return Some(CommandOption::Subcommand {
                        name,
                        options: convert_options(inner),
                    });
                }
                CommandDataOptionValue::SubCommandGroup(inner) => {
                    return Some(CommandOption::SubcommandGroup {
                        name,
                        options: convert_options(inner),
                    });
                }
                CommandDataOptionValue::String(s) => OptionValue::String(s.clone()),
                CommandDataOptionValue::Integer(i) => OptionValue::Integer(*i),
                CommandDataOptionValue::Boolean(b) => OptionValue::Bool(*b),
                CommandDataOptionValue::Channel(c) => OptionValue::Channel(c.get()),
                CommandDataOptionValue::User(u) => OptionValue::User(u.get()),
                _ => return None,
            };
            Some(CommandOption::Value { name, value })
        })
        .collect()
}

fn permissions(command: &CommandInteraction) -> Vec<Permission> {
    let Some(granted) = command.member.as_ref().and_then(|m| m.permissions) else {
        // Direct messages: nobody else to ask.
        return vec![Permission::SendMessages];
    };

    let mut permissions = Vec::new();
    if granted.administrator() {
        permissions.push(Permission::Administrator);
    }
    if granted.manage_messages() {
        permissions.push(Permission::ManageMessages);
    }
    if granted.send_messages() {
        permissions.push(Permission::SendMessages);
    }
    permissions
}

fn to_invocation(command: &CommandInteraction) -> Invocation {
    let context = match command.guild_id {
        Some(guild_id) => InvocationContext::Community(guild_id.get()),
        None => InvocationContext::Direct,
    };
    let mut invocation = Invocation::new(command.data.name.clone(), command.user.id.get(), context)
        .with_permissions(&permissions(command));
    invocation.options = convert_options(&command.data.options);
    invocation
}

struct InteractionResponder {
    http: Arc<Http>,
    command: CommandInteraction,
}

#[async_trait]
impl Responder for InteractionResponder {
    async fn respond(&self, reply: &Reply) -> Result<(), DeliveryError> {
        let message = CreateInteractionResponseMessage::new()
            .embed(embed(&reply.notice))
            .ephemeral(reply.ephemeral);
        self.command
            .create_response(&*self.http, CreateInteractionResponse::Message(message))
            .await
            .map_err(transport)
    }

    async fn defer(&self, ephemeral: bool) -> Result<(), DeliveryError> {
        let message = CreateInteractionResponseMessage::new().ephemeral(ephemeral);
        self.command
            .create_response(&*self.http, CreateInteractionResponse::Defer(message))
            .await
            .map_err(transport)
    }

    async fn follow_up(&self, reply: &Reply) -> Result<(), DeliveryError> {
        let followup = CreateInteractionResponseFollowup::new()
            .embed(embed(&reply.notice))
            .ephemeral(reply.ephemeral);
        self.command
            .create_followup(&*self.http, followup)
            .await
            .map(|_| ())
            .map_err(transport)
    }
}

pub(crate) async fn handle_event(
    ctx: &serenity::Context,
    event: &FullEvent,
    _framework: poise::FrameworkContext<'_, Data, Error>,
    data: &Data,
) -> Result<(), Error> {
    match event {
        FullEvent::Ready { data_about_bot } => {
            info!(user = %data_about_bot.user.name, "connected to Discord");
        }
        FullEvent::InteractionCreate {
            interaction: Interaction::Command(command),
        } => {
            let responder = InteractionResponder {
                http: Arc::clone(&ctx.http),
                command: command.clone(),
            };
            let outcome = data
                .engine
                .router
                .dispatch(to_invocation(command), &responder)
                .await;
            debug!(command = %command.data.name, ?outcome, "interaction handled");
        }
        _ => {}
    }
    Ok(())
}

// ============================================================================
// Outbound
// ============================================================================

/// Direct messages and channel posts.
pub(crate) struct DiscordMessenger {
    http: Arc<Http>,
}

impl DiscordMessenger {
    pub(crate) fn new(http: Arc<Http>) -> Self {
        Self { http }
    }
}

#[async_trait]
impl Messenger for DiscordMessenger {
    async fn deliver(&self, target: DeliveryTarget, notice: &Notice) -> Result<(), DeliveryError> {
        let mut message = CreateMessage::new().embed(embed(notice));
        if let Some(user_id) = notice.mention {
            message = message.content(format!("<@{}>", user_id));
        }

        match target {
            DeliveryTarget::User(0) | DeliveryTarget::Channel(0) => {
                Err(DeliveryError::NotFound(format!("{:?}", target)))
            }
            DeliveryTarget::User(user_id) => serenity::UserId::new(user_id)
                .direct_message(&*self.http, message)
                .await
                .map(|_| ())
                .map_err(|err| DeliveryError::Rejected(err.to_string())),
            DeliveryTarget::Channel(channel_id) => serenity::ChannelId::new(channel_id)
                .send_message(&*self.http, message)
                .await
                .map(|_| ())
                .map_err(transport),
        }
    }
}

/// Bot presence on every shard. The shard manager only exists once the
/// client is built, so it is attached afterwards.
#[derive(Default)]
pub(crate) struct ShardPresence {
    manager: OnceLock<Arc<ShardManager>>,
}

impl ShardPresence {
    pub(crate) fn attach(&self, manager: Arc<ShardManager>) {
        let _ = self.manager.set(manager);
    }
}

#[async_trait]
impl PresenceSink for ShardPresence {
    async fn publish(&self, presence: &BotPresence) {
        let Some(manager) = self.manager.get() else {
            debug!("gateway not connected yet, presence not sent");
            return;
        };

        let (activity, status) = match presence {
            BotPresence::Watching(text) => (ActivityData::watching(text), OnlineStatus::Online),
            BotPresence::Offline(text) => (ActivityData::playing(text), OnlineStatus::DoNotDisturb),
        };
        let runners = manager.runners.lock().await;
        for info in runners.values() {
            info.runner_tx.set_presence(Some(activity.clone()), status);
        }
    }
}
