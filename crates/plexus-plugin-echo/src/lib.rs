//! A minimal Plexus plugin that echoes slash commands.
//!
//! `EchoPlugin` answers `/echo <text>` with `<text>` and keeps a count of
//! how many times it has been activated in its key-value store. It is
//! mostly useful for exercising the host's reattach path by hand: start the
//! binary, copy the descriptor it prints, and point the host at it.


use plexus_plugin::{
    Api, CapabilityError, CommandArgs, CommandResponse, HookError, HookId, HookSet, Hooks,
    LogLevel, Plugin, PluginBase,
};
use thiserror::Error;
use tracing::debug;

const ECHO_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::echo");

/// Trigger of the only command this plugin answers.
pub const ECHO_TRIGGER: &str = "echo";

/// Key holding the activation counter.
pub const ACTIVATIONS_KEY: &str = "activations";

/// Errors raised by the echo plugin's hooks.
#[derive(Debug, Error)]
pub enum EchoError {
    /// A hook ran before the host injected its API handle.
    #[error("host API is not available")]
    MissingApi,
    /// A call back into the host failed.
    #[error(transparent)]
    Capability(#[from] CapabilityError),
    /// The stored activation counter is not a number.
    #[error("stored activation counter is corrupt: {value:?}")]
    CorruptCounter {
        /// Raw stored value.
        value: String,
    },
    /// The command trigger is not `/echo`.
    #[error("unknown command '/{trigger}'")]
    UnknownCommand {
        /// Trigger that was received.
        trigger: String,
    },
}

impl From<EchoError> for HookError {
    fn from(error: EchoError) -> Self {
        Self::new(error.to_string())
    }
}

/// The echo plugin.
#[derive(Debug, Default)]
pub struct EchoPlugin {
    base: PluginBase,
}

impl EchoPlugin {
    /// Creates a plugin with no capabilities injected yet.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn require_api(&self) -> Result<std::sync::Arc<dyn Api>, EchoError> {
        self.api().ok_or(EchoError::MissingApi)
    }
}

/// Increments the activation counter stored through `api`.
///
/// Returns the new count.
///
/// # Errors
///
/// Returns [`EchoError`] when the store cannot be read or written, or holds
/// something other than a decimal count.
pub fn record_activation(api: &dyn Api) -> Result<u64, EchoError> {
    let stored = api.kv_get(ACTIVATIONS_KEY)?;
    let previous = stored.map_or(Ok(0), |raw| parse_counter(&raw))?;
    let count = previous.saturating_add(1);
    api.kv_set(ACTIVATIONS_KEY, count.to_string().as_bytes())?;
    Ok(count)
}

fn parse_counter(raw: &[u8]) -> Result<u64, EchoError> {
    let text = String::from_utf8_lossy(raw);
    text.parse::<u64>().map_err(|_| EchoError::CorruptCounter {
        value: text.into_owned(),
    })
}

/// Answers `/echo <text>` with `<text>`.
///
/// # Errors
///
/// Returns [`EchoError::UnknownCommand`] for any other trigger.
pub fn echo(args: &CommandArgs) -> Result<CommandResponse, EchoError> {
    if args.trigger() != ECHO_TRIGGER {
        return Err(EchoError::UnknownCommand {
            trigger: args.trigger().to_owned(),
        });
    }
    Ok(CommandResponse::new(args.rest()))
}

impl Hooks for EchoPlugin {
    fn implemented(&self) -> HookSet {
        [
            HookId::OnActivate,
            HookId::OnDeactivate,
            HookId::ExecuteCommand,
        ]
        .into_iter()
        .collect()
    }

    fn on_activate(&self) -> Result<(), HookError> {
        let api = self.require_api()?;
        let count = record_activation(api.as_ref())?;
        api.log(LogLevel::Info, &format!("echo plugin activated ({count})"))
            .map_err(EchoError::from)?;
        debug!(target: ECHO_TARGET, activations = count, "activated");
        Ok(())
    }

    fn on_deactivate(&self) -> Result<(), HookError> {
        let api = self.require_api()?;
        api.log(LogLevel::Info, "echo plugin deactivating")
            .map_err(EchoError::from)?;
        Ok(())
    }

    fn execute_command(&self, args: &CommandArgs) -> Result<CommandResponse, HookError> {
        echo(args).map_err(HookError::from)
    }
}

impl Plugin for EchoPlugin {
    fn base(&self) -> &PluginBase {
        &self.base
    }
}
