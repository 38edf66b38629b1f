//! Chat commands: the command tree, the invocation shape coming in from the
//! platform, and the reply shape going back out.

pub mod builtin;
mod router;
pub mod validation;

pub use router::{CommandRouter, DispatchOutcome, RegistrationReport};

use async_trait::async_trait;
use futures::future::BoxFuture;
use std::collections::BTreeMap;
use std::sync::{Arc, Weak};

use crate::error::{CommandError, DeliveryError};
use crate::helpers::Clock;
use crate::messenger::Notice;
use crate::model::{ChannelId, CommunityId, UserId};
use crate::poller::SnapshotStore;
use crate::query::QueryCoordinator;
use crate::settings::Settings;
use crate::subscriptions::SubscriptionRegistry;
use crate::translations::Translations;

/// Deepest allowed node: root (0) → group (1) → subcommand (2).
pub const MAX_DEPTH: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Permission {
    SendMessages,
    ManageMessages,
    /// Implies every other permission.
    Administrator,
}

impl Permission {
    pub fn held_by(self, granted: &[Permission]) -> bool {
        granted.contains(&Permission::Administrator) || granted.contains(&self)
    }
}

/// Where a command may be used.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextRestriction {
    Community,
    Direct,
    Any,
}

/// Whether the router acknowledges before running the handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Defer {
    No,
    Public,
    Ephemeral,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgKind {
    String,
    Integer,
    Channel,
}

#[derive(Debug, Clone, Copy)]
pub struct ArgSpec {
    pub name: &'static str,
    pub description: &'static str,
    pub kind: ArgKind,
}

impl ArgSpec {
    pub const fn new(name: &'static str, description: &'static str, kind: ArgKind) -> Self {
        Self {
            name,
            description,
            kind,
        }
    }
}

pub type SyncHandler = fn(&CommandContext) -> Result<Reply, CommandError>;
pub type AsyncHandler = fn(CommandContext) -> BoxFuture<'static, Result<Reply, CommandError>>;

/// Handler plus its calling convention, fixed when the command is declared.
#[derive(Clone, Copy)]
pub enum Handler {
    Sync(SyncHandler),
    Async(AsyncHandler),
}

impl Handler {
    pub fn kind(&self) -> &'static str {
        match self {
            Handler::Sync(_) => "sync",
            Handler::Async(_) => "async",
        }
    }
}

/// Declaration of one command (or subcommand / group).
#[derive(Clone)]
pub struct CommandSpec {
    pub name: &'static str,
    pub description: &'static str,
    pub permission: Permission,
    pub context: ContextRestriction,
    pub required_args: usize,
    pub args: &'static [ArgSpec],
    pub defer: Defer,
    /// Groups and commands with subcommands have none.
    pub handler: Option<Handler>,
    pub subcommands: Vec<CommandSpec>,
}

impl CommandSpec {
    pub fn new(name: &'static str, description: &'static str) -> Self {
        Self {
            name,
            description,
            permission: Permission::SendMessages,
            context: ContextRestriction::Any,
            required_args: 0,
            args: &[],
            defer: Defer::No,
            handler: None,
            subcommands: Vec::new(),
        }
    }

    pub fn permission(mut self, permission: Permission) -> Self {
        self.permission = permission;
        self
    }

    pub fn context(mut self, context: ContextRestriction) -> Self {
        self.context = context;
        self
    }

    /// Declare the argument shape; every argument is required.
    pub fn args(mut self, args: &'static [ArgSpec]) -> Self {
        self.args = args;
        self.required_args = args.len();
        self
    }

    pub fn defer(mut self, defer: Defer) -> Self {
        self.defer = defer;
        self
    }

    pub fn sync(mut self, handler: SyncHandler) -> Self {
        self.handler = Some(Handler::Sync(handler));
        self
    }

    pub fn run(mut self, handler: AsyncHandler) -> Self {
        self.handler = Some(Handler::Async(handler));
        self
    }

    pub fn subcommand(mut self, spec: CommandSpec) -> Self {
        self.subcommands.push(spec);
        self
    }
}

/// A registered command. Children point back at their parent.
pub struct CommandNode {
    pub name: String,
    pub description: String,
    pub permission: Permission,
    pub context: ContextRestriction,
    pub required_args: usize,
    pub args: &'static [ArgSpec],
    pub defer: Defer,
    pub handler: Option<Handler>,
    pub children: BTreeMap<String, Arc<CommandNode>>,
    parent: Weak<CommandNode>,
}

impl CommandNode {
    pub(crate) fn build(spec: &CommandSpec, parent: Weak<CommandNode>) -> Arc<CommandNode> {
        Arc::new_cyclic(|me| CommandNode {
            name: spec.name.to_lowercase(),
            description: spec.description.to_string(),
            permission: spec.permission,
            context: spec.context,
            required_args: spec.required_args,
            args: spec.args,
            defer: spec.defer,
            handler: spec.handler,
            children: spec
                .subcommands
                .iter()
                .map(|child| (child.name.to_lowercase(), CommandNode::build(child, me.clone())))
                .collect(),
            parent,
        })
    }

    pub fn parent(&self) -> Option<Arc<CommandNode>> {
        self.parent.upgrade()
    }

    /// Full invocation path, e.g. `admin server set`.
    pub fn path(&self) -> String {
        match self.parent() {
            Some(parent) => format!("{} {}", parent.path(), self.name),
            None => self.name.clone(),
        }
    }

    /// `<ip> <port>` style argument shape.
    pub fn usage(&self) -> String {
        self.args
            .iter()
            .map(|a| format!("<{}>", a.name))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Where an invocation was issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvocationContext {
    Community(CommunityId),
    Direct,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OptionValue {
    String(String),
    Integer(i64),
    Channel(ChannelId),
    User(UserId),
    Bool(bool),
}

impl OptionValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            OptionValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            OptionValue::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_channel(&self) -> Option<ChannelId> {
        match self {
            OptionValue::Channel(c) => Some(*c),
            _ => None,
        }
    }
}

/// One option as the platform delivered it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandOption {
    Value { name: String, value: OptionValue },
    Subcommand { name: String, options: Vec<CommandOption> },
    SubcommandGroup { name: String, options: Vec<CommandOption> },
}

#[derive(Debug, Clone)]
pub struct Invocation {
    pub name: String,
    pub user_id: UserId,
    pub context: InvocationContext,
    /// Permissions the invoking user holds where the command was issued.
    pub permissions: Vec<Permission>,
    pub options: Vec<CommandOption>,
}

impl Invocation {
    pub fn new(name: impl Into<String>, user_id: UserId, context: InvocationContext) -> Self {
        Self {
            name: name.into(),
            user_id,
            context,
            permissions: Vec::new(),
            options: Vec::new(),
        }
    }

    pub fn with_permissions(mut self, permissions: &[Permission]) -> Self {
        self.permissions = permissions.to_vec();
        self
    }

    pub fn with_option(mut self, option: CommandOption) -> Self {
        self.options.push(option);
        self
    }

    pub fn with_value(self, name: &str, value: OptionValue) -> Self {
        self.with_option(CommandOption::Value {
            name: name.to_string(),
            value,
        })
    }

    pub fn community_id(&self) -> Option<CommunityId> {
        match self.context {
            InvocationContext::Community(id) => Some(id),
            InvocationContext::Direct => None,
        }
    }
}

/// Positional arguments collected at the resolved node.
#[derive(Debug, Clone, Default)]
pub struct Args {
    values: Vec<(String, OptionValue)>,
}

impl Args {
    pub(crate) fn collect(options: &[CommandOption]) -> Self {
        Self {
            values: options
                .iter()
                .filter_map(|o| match o {
                    CommandOption::Value { name, value } => Some((name.clone(), value.clone())),
                    _ => None,
                })
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&OptionValue> {
        self.values.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }
}

/// What a handler sends back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub success: bool,
    pub notice: Notice,
    pub ephemeral: bool,
}

impl Reply {
    pub fn ok(text: impl Into<String>) -> Self {
        Self::rich(Notice::new().line(text))
    }

    pub fn rich(notice: Notice) -> Self {
        Self {
            success: true,
            notice,
            ephemeral: false,
        }
    }

    pub fn failure(text: impl Into<String>) -> Self {
        Self {
            success: false,
            notice: Notice::new().line(text),
            ephemeral: true,
        }
    }

    pub fn ephemeral(mut self) -> Self {
        self.ephemeral = true;
        self
    }

    pub fn text(&self) -> String {
        self.notice.text()
    }
}

/// The caller-facing half of an interaction.
#[async_trait]
pub trait Responder: Send + Sync {
    /// Immediate response.
    async fn respond(&self, reply: &Reply) -> Result<(), DeliveryError>;

    /// "Acknowledged, response pending".
    async fn defer(&self, ephemeral: bool) -> Result<(), DeliveryError>;

    /// Response after `defer`.
    async fn follow_up(&self, reply: &Reply) -> Result<(), DeliveryError>;
}

/// Everything command handlers can reach.
pub struct Services {
    pub settings: Settings,
    pub coordinator: Arc<QueryCoordinator>,
    pub snapshots: Arc<SnapshotStore>,
    pub subscriptions: Arc<SubscriptionRegistry>,
    pub translations: Arc<Translations>,
    pub clock: Arc<dyn Clock>,
}

/// Handed to each handler call.
#[derive(Clone)]
pub struct CommandContext {
    pub invocation: Invocation,
    pub args: Args,
    pub services: Arc<Services>,
}

impl CommandContext {
    pub fn translate(&self, key: &str, substitutions: &[(&str, &str)]) -> String {
        self.services.translations.format(key, substitutions)
    }

    /// Community the command was issued in. Handlers behind a community
    /// restriction can rely on it.
    pub fn community_id(&self) -> Result<CommunityId, CommandError> {
        self.invocation
            .community_id()
            .ok_or_else(|| CommandError::from("This command can only be used in a server"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_administrator_implies_everything() {
        assert!(Permission::ManageMessages.held_by(&[Permission::Administrator]));
        assert!(Permission::SendMessages.held_by(&[Permission::SendMessages]));
        assert!(!Permission::ManageMessages.held_by(&[Permission::SendMessages]));
        assert!(!Permission::SendMessages.held_by(&[]));
    }

    #[test]
    fn test_tree_links_parents() {
        let spec = CommandSpec::new("Admin", "admin tools").subcommand(
            CommandSpec::new("server", "server settings")
                .subcommand(CommandSpec::new("set", "set it").sync(|_| Ok(Reply::ok("ok")))),
        );
        let root = CommandNode::build(&spec, Weak::new());

        assert_eq!(root.name, "admin");
        assert!(root.parent().is_none());
        let leaf = &root.children["server"].children["set"];
        assert_eq!(leaf.path(), "admin server set");
        assert_eq!(leaf.parent().unwrap().name, "server");
    }

    #[test]
    fn test_args_shape() {
        static ARGS: &[ArgSpec] = &[
            ArgSpec::new("ip", "host", ArgKind::String),
            ArgSpec::new("port", "port", ArgKind::Integer),
        ];
        let root = CommandNode::build(&CommandSpec::new("setserver", "").args(ARGS), Weak::new());
        assert_eq!(root.required_args, 2);
        assert_eq!(root.usage(), "<ip> <port>");
    }
}
