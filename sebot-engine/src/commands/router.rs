use futures::FutureExt;
use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Weak};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use super::{
    Args, CommandContext, CommandNode, CommandOption, CommandSpec, ContextRestriction, Defer,
    Handler, Invocation, InvocationContext, MAX_DEPTH, Reply, Responder, Services,
};
use crate::error::CommandError;

/// Why a table entry was not registered.
#[derive(Debug, Error, PartialEq)]
pub enum RegistrationError {
    #[error("command name cannot be empty")]
    EmptyName,

    #[error("command name '{0}' is already registered")]
    Duplicate(String),

    #[error("command '{0}' nests deeper than a group and a subcommand")]
    TooDeep(String),

    #[error("command '{0}' has neither a handler nor subcommands")]
    MissingHandler(String),

    #[error("command '{0}' has both a handler and subcommands")]
    HandlerOnParent(String),
}

/// Result of the startup scan.
#[derive(Debug, Default, PartialEq)]
pub struct RegistrationReport {
    pub registered: Vec<String>,
    pub skipped: Vec<RegistrationError>,
}

/// How one dispatch ended. Every variant corresponds to exactly one reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    UnknownCommand,
    WrongContext,
    UnknownSubcommand,
    NoPermission,
    MissingArguments,
    Handled { success: bool },
    HandlerFailed,
}

pub struct CommandRouter {
    commands: BTreeMap<String, Arc<CommandNode>>,
    services: Arc<Services>,
}

impl CommandRouter {
    /// Build every command from `table` once. Entries that fail validation
    /// are skipped with a warning.
    pub fn register(table: &[fn() -> CommandSpec], services: Arc<Services>) -> (Self, RegistrationReport) {
        let mut commands = BTreeMap::new();
        let mut report = RegistrationReport::default();

        for factory in table {
            let spec = factory();
            if let Err(err) = validate(&spec, 0) {
                warn!(command = spec.name, %err, "skipping command");
                report.skipped.push(err);
                continue;
            }

            let name = spec.name.to_lowercase();
            if commands.contains_key(&name) {
                let err = RegistrationError::Duplicate(name);
                warn!(command = spec.name, %err, "skipping command");
                report.skipped.push(err);
                continue;
            }

            let node = CommandNode::build(&spec, Weak::new());
            debug!(
                command = %name,
                handler = node.handler.map(|h| h.kind()).unwrap_or("group"),
                "registered command"
            );
            report.registered.push(name.clone());
            commands.insert(name, node);
        }

        info!(
            registered = report.registered.len(),
            skipped = report.skipped.len(),
            "commands registered"
        );
        (Self { commands, services }, report)
    }

    /// Case-insensitive lookup of a top-level command.
    pub fn resolve(&self, name: &str) -> Option<Arc<CommandNode>> {
        self.commands.get(&name.to_lowercase()).cloned()
    }

    pub fn commands(&self) -> impl Iterator<Item = &Arc<CommandNode>> {
        self.commands.values()
    }

    /// Run one invocation to completion. Exactly one reply goes out through
    /// `responder`: `respond` normally, `follow_up` once deferred.
    pub async fn dispatch(&self, invocation: Invocation, responder: &dyn Responder) -> DispatchOutcome {
        let t = &self.services.translations;

        let Some(root) = self.resolve(&invocation.name) else {
            debug!(command = %invocation.name, user_id = invocation.user_id, "unknown command");
            let reply = Reply::failure(t.format("Unknown Command", &[("Command", &invocation.name)]));
            send(responder, &reply, false, &invocation.name).await;
            return DispatchOutcome::UnknownCommand;
        };

        if let Some(key) = context_mismatch(root.context, invocation.context) {
            debug!(command = %root.name, user_id = invocation.user_id, "used in the wrong context");
            send(responder, &Reply::failure(t.get(key)), false, &root.name).await;
            return DispatchOutcome::WrongContext;
        }

        let (node, options) = match resolve_nested(&root, &invocation.options) {
            Ok(found) => found,
            Err(name) => {
                debug!(command = %root.name, subcommand = %name, "unknown subcommand");
                let reply = Reply::failure(t.format("Unknown Subcommand", &[("Command", &name)]));
                send(responder, &reply, false, &root.name).await;
                return DispatchOutcome::UnknownSubcommand;
            }
        };
        let path = node.path();

        if !node.permission.held_by(&invocation.permissions) {
            debug!(command = %path, user_id = invocation.user_id, permission = ?node.permission, "missing permission");
            send(responder, &Reply::failure(t.get("No Permission")), false, &path).await;
            return DispatchOutcome::NoPermission;
        }

        let args = Args::collect(options);
        if args.len() < node.required_args {
            debug!(command = %path, provided = args.len(), required = node.required_args, "missing arguments");
            let reply = Reply::failure(t.format(
                "Missing Arguments",
                &[
                    ("Required", &node.required_args.to_string()),
                    ("Provided", &args.len().to_string()),
                    ("Expected", &format!("`/{} {}`", path, node.usage())),
                ],
            ));
            send(responder, &reply, false, &path).await;
            return DispatchOutcome::MissingArguments;
        }

        let Some(handler) = node.handler else {
            // Groups are never leaves after resolution; a parent invoked bare
            // lands here.
            let reply = Reply::failure(t.format("Unknown Subcommand", &[("Command", &path)]));
            send(responder, &reply, false, &path).await;
            return DispatchOutcome::UnknownSubcommand;
        };

        let deferred = match node.defer {
            Defer::No => false,
            defer => match responder.defer(defer == Defer::Ephemeral).await {
                Ok(()) => true,
                Err(err) => {
                    warn!(command = %path, %err, "failed to defer, answering directly");
                    false
                }
            },
        };

        info!(command = %path, user_id = invocation.user_id, "executing command");
        let ctx = CommandContext {
            invocation,
            args,
            services: Arc::clone(&self.services),
        };
        let (reply, outcome) = match execute(handler, ctx).await {
            Ok(reply) => {
                let success = reply.success;
                (reply, DispatchOutcome::Handled { success })
            }
            Err(err) => {
                error!(command = %path, %err, "command failed");
                (Reply::failure(t.get("Command Failed")), DispatchOutcome::HandlerFailed)
            }
        };

        send(responder, &reply, deferred, &path).await;
        outcome
    }
}

fn validate(spec: &CommandSpec, depth: usize) -> Result<(), RegistrationError> {
    let name = spec.name.trim();
    if name.is_empty() {
        return Err(RegistrationError::EmptyName);
    }
    if depth > MAX_DEPTH {
        return Err(RegistrationError::TooDeep(name.to_string()));
    }
    match (&spec.handler, spec.subcommands.is_empty()) {
        (None, true) => return Err(RegistrationError::MissingHandler(name.to_string())),
        (Some(_), false) => return Err(RegistrationError::HandlerOnParent(name.to_string())),
        _ => {}
    }

    let mut seen = std::collections::HashSet::new();
    for child in &spec.subcommands {
        validate(child, depth + 1)?;
        if !seen.insert(child.name.to_lowercase()) {
            return Err(RegistrationError::Duplicate(format!("{} {}", name, child.name)));
        }
    }
    Ok(())
}

fn context_mismatch(required: ContextRestriction, actual: InvocationContext) -> Option<&'static str> {
    match (required, actual) {
        (ContextRestriction::Community, InvocationContext::Direct) => Some("Community Only"),
        (ContextRestriction::Direct, InvocationContext::Community(_)) => Some("Direct Only"),
        _ => None,
    }
}

/// Follow a subcommand or group option down to the leaf. Returns the leaf
/// and the options that belong to it, or the name that did not resolve.
fn resolve_nested<'a>(
    root: &Arc<CommandNode>,
    options: &'a [CommandOption],
) -> Result<(Arc<CommandNode>, &'a [CommandOption]), String> {
    let nested = options.iter().find_map(|o| match o {
        CommandOption::Subcommand { name, options } => Some((false, name, options)),
        CommandOption::SubcommandGroup { name, options } => Some((true, name, options)),
        CommandOption::Value { .. } => None,
    });

    let Some((is_group, name, inner)) = nested else {
        return Ok((Arc::clone(root), options));
    };
    let child = root
        .children
        .get(&name.to_lowercase())
        .ok_or_else(|| name.clone())?;
    if !is_group {
        return Ok((Arc::clone(child), inner.as_slice()));
    }

    match inner.iter().find_map(|o| match o {
        CommandOption::Subcommand { name, options } => Some((name, options)),
        _ => None,
    }) {
        Some((sub, sub_options)) => child
            .children
            .get(&sub.to_lowercase())
            .map(|leaf| (Arc::clone(leaf), sub_options.as_slice()))
            .ok_or_else(|| format!("{} {}", name, sub)),
        None => Err(name.clone()),
    }
}

/// Run the handler, turning errors and panics alike into `CommandError`.
async fn execute(handler: Handler, ctx: CommandContext) -> Result<Reply, CommandError> {
    let result = match handler {
        Handler::Sync(f) => std::panic::catch_unwind(AssertUnwindSafe(|| f(&ctx))),
        Handler::Async(f) => AssertUnwindSafe(f(ctx)).catch_unwind().await,
    };
    result.unwrap_or_else(|_| Err(CommandError::from("handler panicked")))
}

async fn send(responder: &dyn Responder, reply: &Reply, deferred: bool, command: &str) {
    let result = if deferred {
        responder.follow_up(reply).await
    } else {
        responder.respond(reply).await
    };
    if let Err(err) = result {
        warn!(command, deferred, %err, "failed to deliver command reply");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::{ArgKind, ArgSpec, OptionValue, Permission};
    use crate::testing::{RecordingResponder, Sent, services};

    fn echo() -> CommandSpec {
        static ARGS: &[ArgSpec] = &[ArgSpec::new("text", "what to echo", ArgKind::String)];
        CommandSpec::new("Echo", "echo")
            .context(ContextRestriction::Community)
            .permission(Permission::ManageMessages)
            .args(ARGS)
            .sync(|ctx| {
                let text = ctx.args.get("text").and_then(|v| v.as_str()).unwrap_or_default();
                Ok(Reply::ok(text))
            })
    }

    fn slow() -> CommandSpec {
        CommandSpec::new("slow", "slow")
            .defer(Defer::Ephemeral)
            .run(|_| {
                async {
                    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
                    Ok(Reply::ok("done"))
                }
                .boxed()
            })
    }

    fn broken() -> CommandSpec {
        CommandSpec::new("broken", "always fails")
            .defer(Defer::Public)
            .run(|_| async { Err(CommandError::from("database on fire")) }.boxed())
    }

    fn panicky() -> CommandSpec {
        CommandSpec::new("panicky", "panics").sync(|_| panic!("boom"))
    }

    fn dm_only() -> CommandSpec {
        CommandSpec::new("dmonly", "dm only")
            .context(ContextRestriction::Direct)
            .sync(|_| Ok(Reply::ok("hi")))
    }

    fn grouped() -> CommandSpec {
        CommandSpec::new("admin", "admin").subcommand(
            CommandSpec::new("server", "server").subcommand(
                CommandSpec::new("show", "show")
                    .permission(Permission::Administrator)
                    .sync(|_| Ok(Reply::ok("shown"))),
            ),
        )
    }

    fn nameless() -> CommandSpec {
        CommandSpec::new("  ", "").sync(|_| Ok(Reply::ok("")))
    }

    fn handlerless() -> CommandSpec {
        CommandSpec::new("nothing", "")
    }

    fn too_deep() -> CommandSpec {
        CommandSpec::new("a", "").subcommand(
            CommandSpec::new("b", "").subcommand(
                CommandSpec::new("c", "")
                    .subcommand(CommandSpec::new("d", "").sync(|_| Ok(Reply::ok("")))),
            ),
        )
    }

    const TABLE: &[fn() -> CommandSpec] = &[echo, slow, broken, panicky, dm_only, grouped];

    async fn router() -> CommandRouter {
        CommandRouter::register(TABLE, services().await).0
    }

    fn in_community(name: &str) -> Invocation {
        Invocation::new(name, 42, InvocationContext::Community(7))
            .with_permissions(&[Permission::SendMessages, Permission::ManageMessages])
    }

    #[tokio::test]
    async fn test_registration_skips_invalid_entries() {
        let table: &[fn() -> CommandSpec] = &[echo, nameless, handlerless, too_deep, echo, slow];
        let (router, report) = CommandRouter::register(table, services().await);

        assert_eq!(report.registered, vec!["echo", "slow"]);
        assert_eq!(
            report.skipped,
            vec![
                RegistrationError::EmptyName,
                RegistrationError::MissingHandler("nothing".to_string()),
                RegistrationError::TooDeep("d".to_string()),
                RegistrationError::Duplicate("echo".to_string()),
            ]
        );
        assert!(router.resolve("ECHO").is_some());
    }

    #[tokio::test]
    async fn test_unknown_command() {
        let router = router().await;
        let responder = RecordingResponder::new();

        let outcome = router.dispatch(in_community("nope"), &responder).await;

        assert_eq!(outcome, DispatchOutcome::UnknownCommand);
        assert_eq!(responder.replies().len(), 1);
        assert!(responder.only_reply().text().contains("nope"));
    }

    #[tokio::test]
    async fn test_community_command_from_dm_rejected_before_other_checks() {
        let router = router().await;
        let responder = RecordingResponder::new();
        // No permissions and no arguments: the context check still wins.
        let invocation = Invocation::new("echo", 42, InvocationContext::Direct);

        let outcome = router.dispatch(invocation, &responder).await;

        assert_eq!(outcome, DispatchOutcome::WrongContext);
        assert_eq!(
            responder.only_reply().text(),
            "This command can only be used in a server."
        );
    }

    #[tokio::test]
    async fn test_direct_command_from_community_rejected() {
        let router = router().await;
        let responder = RecordingResponder::new();

        let outcome = router.dispatch(in_community("dmonly"), &responder).await;
        assert_eq!(outcome, DispatchOutcome::WrongContext);
    }

    #[tokio::test]
    async fn test_permission_checked_before_arguments() {
        let router = router().await;
        let responder = RecordingResponder::new();
        let invocation = Invocation::new("echo", 42, InvocationContext::Community(7))
            .with_permissions(&[Permission::SendMessages]);

        let outcome = router.dispatch(invocation, &responder).await;

        assert_eq!(outcome, DispatchOutcome::NoPermission);
        assert_eq!(responder.replies().len(), 1);
    }

    #[tokio::test]
    async fn test_missing_arguments_names_expected_shape() {
        let router = router().await;
        let responder = RecordingResponder::new();

        let outcome = router.dispatch(in_community("echo"), &responder).await;

        assert_eq!(outcome, DispatchOutcome::MissingArguments);
        let text = responder.only_reply().text();
        assert!(text.contains("Required: 1, Provided: 0"));
        assert!(text.contains("`/echo <text>`"));
    }

    #[tokio::test]
    async fn test_sync_handler_responds_immediately() {
        let router = router().await;
        let responder = RecordingResponder::new();
        let invocation =
            in_community("Echo").with_value("text", OptionValue::String("hello".to_string()));

        let outcome = router.dispatch(invocation, &responder).await;

        assert_eq!(outcome, DispatchOutcome::Handled { success: true });
        assert_eq!(responder.sent(), vec![Sent::Respond(Reply::ok("hello"))]);
    }

    #[tokio::test]
    async fn test_deferred_handler_follows_up() {
        let router = router().await;
        let responder = RecordingResponder::new();

        router.dispatch(in_community("slow"), &responder).await;

        assert_eq!(
            responder.sent(),
            vec![Sent::Defer { ephemeral: true }, Sent::FollowUp(Reply::ok("done"))]
        );
    }

    #[tokio::test]
    async fn test_failing_handler_gets_exactly_one_follow_up() {
        let router = router().await;
        let responder = RecordingResponder::new();

        let outcome = router.dispatch(in_community("broken"), &responder).await;

        assert_eq!(outcome, DispatchOutcome::HandlerFailed);
        let sent = responder.sent();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0], Sent::Defer { ephemeral: false });
        match &sent[1] {
            Sent::FollowUp(reply) => {
                assert!(!reply.success);
                assert!(reply.ephemeral);
            }
            other => panic!("expected follow-up, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_panicking_handler_still_answers() {
        let router = router().await;
        let responder = RecordingResponder::new();

        let outcome = router.dispatch(in_community("panicky"), &responder).await;

        assert_eq!(outcome, DispatchOutcome::HandlerFailed);
        assert_eq!(
            responder.only_reply().text(),
            "An error occurred while processing the command."
        );
    }

    #[tokio::test]
    async fn test_failed_defer_falls_back_to_respond() {
        let router = router().await;
        let responder = RecordingResponder::new().failing_defer();

        router.dispatch(in_community("slow"), &responder).await;

        assert_eq!(responder.sent(), vec![Sent::Respond(Reply::ok("done"))]);
    }

    #[tokio::test]
    async fn test_group_resolution_and_leaf_permission() {
        let router = router().await;
        let group = CommandOption::SubcommandGroup {
            name: "Server".to_string(),
            options: vec![CommandOption::Subcommand {
                name: "show".to_string(),
                options: vec![],
            }],
        };

        let responder = RecordingResponder::new();
        let outcome = router
            .dispatch(in_community("admin").with_option(group.clone()), &responder)
            .await;
        assert_eq!(outcome, DispatchOutcome::NoPermission);

        let responder = RecordingResponder::new();
        let admin = Invocation::new("admin", 1, InvocationContext::Community(7))
            .with_permissions(&[Permission::Administrator])
            .with_option(group);
        let outcome = router.dispatch(admin, &responder).await;
        assert_eq!(outcome, DispatchOutcome::Handled { success: true });
        assert_eq!(responder.only_reply().text(), "shown");
    }

    #[tokio::test]
    async fn test_unknown_subcommand() {
        let router = router().await;
        let responder = RecordingResponder::new();
        let invocation = in_community("admin").with_option(CommandOption::SubcommandGroup {
            name: "server".to_string(),
            options: vec![CommandOption::Subcommand {
                name: "delete".to_string(),
                options: vec![],
            }],
        });

        let outcome = router.dispatch(invocation, &responder).await;

        assert_eq!(outcome, DispatchOutcome::UnknownSubcommand);
        assert!(responder.only_reply().text().contains("server delete"));
    }
}
