//! The fixed hook interface a plugin implements a subset of.
//!
//! A plugin reports the hooks it implements as a [`HookSet`] during the
//! handshake. The host only dispatches reported hooks, so absent hooks are
//! a capability question answered up front rather than a failure discovered
//! on the first call.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Identifier of a hook in the fixed hook interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HookId {
    /// Invoked once the session is established and capabilities are injected.
    OnActivate,
    /// Invoked before the host tears the session down.
    OnDeactivate,
    /// Invoked when host-side plugin configuration changes.
    OnConfigurationChange,
    /// Invoked for a slash command registered by the plugin.
    ExecuteCommand,
}

impl HookId {
    /// Returns the canonical string representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::OnActivate => "on_activate",
            Self::OnDeactivate => "on_deactivate",
            Self::OnConfigurationChange => "on_configuration_change",
            Self::ExecuteCommand => "execute_command",
        }
    }
}

impl fmt::Display for HookId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Set of hooks a plugin implements.
///
/// # Example
///
/// ```
/// use plexus_plugin::hooks::{HookId, HookSet};
///
/// let hooks = HookSet::from_iter([HookId::OnActivate, HookId::ExecuteCommand]);
/// assert!(hooks.contains(HookId::OnActivate));
/// assert!(!hooks.contains(HookId::OnDeactivate));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HookSet(BTreeSet<HookId>);

impl HookSet {
    /// An empty set.
    #[must_use]
    pub const fn new() -> Self {
        Self(BTreeSet::new())
    }

    /// Whether `hook` is implemented.
    #[must_use]
    pub fn contains(&self, hook: HookId) -> bool {
        self.0.contains(&hook)
    }

    /// Iterates the implemented hooks in a stable order.
    pub fn iter(&self) -> impl Iterator<Item = HookId> + '_ {
        self.0.iter().copied()
    }

    /// Number of implemented hooks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` when no hook is implemented.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<HookId> for HookSet {
    fn from_iter<T: IntoIterator<Item = HookId>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Arguments of an `execute_command` hook call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandArgs {
    command: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    user_id: Option<String>,
}

impl CommandArgs {
    /// Creates arguments for the given command line, e.g. `/echo hello`.
    #[must_use]
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            user_id: None,
        }
    }

    /// Attaches the invoking user.
    #[must_use]
    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// Full command line.
    #[must_use]
    pub const fn command(&self) -> &str {
        self.command.as_str()
    }

    /// Invoking user, when known.
    #[must_use]
    pub fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }

    /// The command trigger, i.e. the first word without the leading slash.
    #[must_use]
    pub fn trigger(&self) -> &str {
        self.command
            .split_whitespace()
            .next()
            .map_or("", |word| word.trim_start_matches('/'))
    }

    /// Everything after the trigger, trimmed.
    #[must_use]
    pub fn rest(&self) -> &str {
        let trimmed = self.command.trim_start();
        trimmed
            .split_once(char::is_whitespace)
            .map_or("", |(_, rest)| rest.trim())
    }
}

/// Reply of an `execute_command` hook call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandResponse {
    text: String,
}

impl CommandResponse {
    /// Creates a response with the given text.
    #[must_use]
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }

    /// Response text.
    #[must_use]
    pub const fn text(&self) -> &str {
        self.text.as_str()
    }
}

/// Failure reported by a hook implementation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct HookError {
    message: String,
}

impl HookError {
    /// Creates a hook error with the given message.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// Error message.
    #[must_use]
    pub const fn message(&self) -> &str {
        self.message.as_str()
    }
}

/// Hook interface. Every method has a default so a plugin only overrides
/// what it declares in [`Hooks::implemented`].
pub trait Hooks: Send + Sync {
    /// Hooks this plugin implements. Only these are dispatched by the host.
    fn implemented(&self) -> HookSet;

    /// Called after capability injection, before any other hook.
    ///
    /// # Errors
    ///
    /// An error aborts the attach: the host closes the session.
    fn on_activate(&self) -> Result<(), HookError> {
        Ok(())
    }

    /// Called before the host closes the session.
    ///
    /// # Errors
    ///
    /// Errors are logged by the host; teardown proceeds regardless.
    fn on_deactivate(&self) -> Result<(), HookError> {
        Ok(())
    }

    /// Called when host-side configuration for the plugin changes.
    ///
    /// # Errors
    ///
    /// Errors are returned to the caller of the hook.
    fn on_configuration_change(&self) -> Result<(), HookError> {
        Ok(())
    }

    /// Handles a slash command.
    ///
    /// # Errors
    ///
    /// The default implementation reports that no command is handled.
    fn execute_command(&self, args: &CommandArgs) -> Result<CommandResponse, HookError> {
        Err(HookError::new(format!(
            "command '{}' is not handled by this plugin",
            args.trigger()
        )))
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case("/echo hello world", "echo", "hello world")]
    #[case("  /status", "status", "")]
    #[case("", "", "")]
    fn command_args_split_trigger_and_rest(
        #[case] line: &str,
        #[case] trigger: &str,
        #[case] rest: &str,
    ) {
        let args = CommandArgs::new(line);
        assert_eq!(args.trigger(), trigger);
        assert_eq!(args.rest(), rest);
    }

    #[test]
    fn hook_set_serialises_as_sorted_list() {
        let hooks = HookSet::from_iter([HookId::ExecuteCommand, HookId::OnActivate]);
        let json = serde_json::to_string(&hooks).expect("serialise");
        assert_eq!(json, r#"["on_activate","execute_command"]"#);
    }

    struct Silent;

    impl Hooks for Silent {
        fn implemented(&self) -> HookSet {
            HookSet::new()
        }
    }

    #[test]
    fn default_execute_command_names_trigger() {
        let error = Silent
            .execute_command(&CommandArgs::new("/deploy now"))
            .expect_err("no commands handled");
        assert!(error.message().contains("deploy"));
    }
}
