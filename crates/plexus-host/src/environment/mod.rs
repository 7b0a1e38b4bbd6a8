//! Registry of plugin identities and their live sessions.
//!
//! The [`Environment`] maps each plugin identifier to at most one entry: the
//! manifest, a lifecycle state and at most one [`PluginSession`]. Lifecycle
//! operations for one identifier are serialised by a per-identifier lock;
//! the entry map itself is only locked for short lookups and updates, never
//! across network I/O.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde_json::Value;
use tracing::{debug, warn};

use plexus_plugin::wire::HookRequest;
use plexus_plugin::{CommandArgs, CommandResponse, HookId, ReattachConfig};

use crate::error::PluginError;
use crate::health::{HealthReporter, StructuredHealthReporter};
use crate::manifest::PluginManifest;
use crate::services::HostServices;
use crate::session::{PluginSession, SessionOptions};

const REGISTRY_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::registry");

/// Lifecycle state of a registered plugin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PluginState {
    /// Registered without a live session.
    NotRunning,
    /// Attached and activated.
    Running,
    /// Being torn down.
    Stopping,
}

impl PluginState {
    /// Returns the canonical string representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NotRunning => "not_running",
            Self::Running => "running",
            Self::Stopping => "stopping",
        }
    }
}

impl fmt::Display for PluginState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

struct PluginEntry {
    manifest: Arc<PluginManifest>,
    state: PluginState,
    session: Option<Arc<PluginSession>>,
}

impl PluginEntry {
    fn live_session(&self) -> Option<&Arc<PluginSession>> {
        self.session.as_ref().filter(|session| !session.is_closed())
    }
}

/// The host's plugin registry.
pub struct Environment {
    entries: RwLock<HashMap<String, PluginEntry>>,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    services: HostServices,
    options: SessionOptions,
    reporter: Arc<dyn HealthReporter>,
}

impl fmt::Debug for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Environment")
            .field("plugins", &self.entries().len())
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl Environment {
    /// Creates an empty registry whose sessions are served by `services`.
    #[must_use]
    pub fn new(services: HostServices, options: SessionOptions) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            locks: Mutex::new(HashMap::new()),
            services,
            options,
            reporter: Arc::new(StructuredHealthReporter::new()),
        }
    }

    /// Routes lifecycle events to `reporter`.
    #[must_use]
    pub fn with_reporter(mut self, reporter: Arc<dyn HealthReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    fn entries(&self) -> RwLockReadGuard<'_, HashMap<String, PluginEntry>> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn entries_mut(&self) -> RwLockWriteGuard<'_, HashMap<String, PluginEntry>> {
        self.entries.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn lifecycle_lock(&self, plugin_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(locks.entry(plugin_id.to_owned()).or_default())
    }

    /// Drops the lock of an identifier that has no entry once nobody else
    /// holds or awaits it.
    fn release_lifecycle_lock(&self, plugin_id: &str, lock: &Arc<Mutex<()>>) {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        // One reference lives in the map and one is `lock`.
        let idle = locks
            .get(plugin_id)
            .is_some_and(|held| Arc::ptr_eq(held, lock) && Arc::strong_count(lock) == 2);
        if idle && !self.entries().contains_key(plugin_id) {
            locks.remove(plugin_id);
        }
    }

    /// Runs `operation` while holding the lifecycle lock of `plugin_id`.
    ///
    /// Lifecycle operations on one identifier never interleave; operations
    /// on different identifiers proceed independently.
    pub fn with_plugin_lock<T>(
        &self,
        plugin_id: &str,
        operation: impl FnOnce(&LockedPlugin<'_>) -> T,
    ) -> T {
        let lock = self.lifecycle_lock(plugin_id);
        let outcome = {
            let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
            operation(&LockedPlugin {
                environment: self,
                plugin_id,
            })
        };
        self.release_lifecycle_lock(plugin_id, &lock);
        outcome
    }

    /// Tears down the session of `plugin_id`, if any. Idempotent.
    ///
    /// Returns whether a session was torn down.
    pub fn deactivate(&self, plugin_id: &str) -> bool {
        self.with_plugin_lock(plugin_id, |plugin| plugin.deactivate())
    }

    /// Forgets `plugin_id` entirely, closing any session still present.
    /// Idempotent.
    ///
    /// Returns whether an entry existed.
    pub fn remove_plugin(&self, plugin_id: &str) -> bool {
        self.with_plugin_lock(plugin_id, |plugin| plugin.remove())
    }

    /// Attaches to the running plugin process described by `config`.
    ///
    /// # Errors
    ///
    /// See [`LockedPlugin::reattach`].
    pub fn reattach(
        &self,
        manifest: &PluginManifest,
        config: &ReattachConfig,
    ) -> Result<(), PluginError> {
        self.with_plugin_lock(manifest.id(), |plugin| plugin.reattach(manifest, config))
    }

    /// The session of `plugin_id`, if one is installed.
    #[must_use]
    pub fn session(&self, plugin_id: &str) -> Option<Arc<PluginSession>> {
        self.entries()
            .get(plugin_id)
            .and_then(|entry| entry.session.clone())
    }

    /// Whether `plugin_id` is running with a live session.
    #[must_use]
    pub fn is_active(&self, plugin_id: &str) -> bool {
        self.state(plugin_id) == Some(PluginState::Running)
    }

    /// Lifecycle state of `plugin_id`, or `None` when it is not registered.
    ///
    /// A running plugin whose session ended on the plugin side reads as
    /// [`PluginState::NotRunning`].
    #[must_use]
    pub fn state(&self, plugin_id: &str) -> Option<PluginState> {
        self.entries().get(plugin_id).map(|entry| {
            if entry.state == PluginState::Running && entry.live_session().is_none() {
                PluginState::NotRunning
            } else {
                entry.state
            }
        })
    }

    /// Identifiers of every running plugin, sorted.
    #[must_use]
    pub fn active_plugin_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .entries()
            .iter()
            .filter(|(_, entry)| {
                entry.state == PluginState::Running && entry.live_session().is_some()
            })
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    /// Manifest registered for `plugin_id`.
    #[must_use]
    pub fn manifest(&self, plugin_id: &str) -> Option<Arc<PluginManifest>> {
        self.entries()
            .get(plugin_id)
            .map(|entry| Arc::clone(&entry.manifest))
    }

    /// Invokes a hook on the running plugin.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::NotFound`] when the plugin has no session, and
    /// the session's errors otherwise.
    pub fn run_hook(&self, plugin_id: &str, request: HookRequest) -> Result<Value, PluginError> {
        self.require_session(plugin_id)?.invoke(request)
    }

    /// Runs a slash command on the running plugin.
    ///
    /// # Errors
    ///
    /// As [`Environment::run_hook`].
    pub fn execute_command(
        &self,
        plugin_id: &str,
        args: CommandArgs,
    ) -> Result<CommandResponse, PluginError> {
        self.require_session(plugin_id)?.execute_command(args)
    }

    /// Deactivates every plugin. Used when the host shuts down.
    pub fn shutdown(&self) {
        let ids: Vec<String> = self.entries().keys().cloned().collect();
        for id in ids {
            self.deactivate(&id);
        }
    }

    fn require_session(&self, plugin_id: &str) -> Result<Arc<PluginSession>, PluginError> {
        self.entries()
            .get(plugin_id)
            .filter(|entry| entry.state == PluginState::Running)
            .and_then(|entry| entry.session.clone())
            .ok_or_else(|| PluginError::NotFound {
                id: plugin_id.to_owned(),
            })
    }
}

/// Lifecycle operations on one identifier, available while its lock is held.
///
/// Obtained from [`Environment::with_plugin_lock`].
pub struct LockedPlugin<'a> {
    environment: &'a Environment,
    plugin_id: &'a str,
}

impl LockedPlugin<'_> {
    /// Identifier this handle operates on.
    #[must_use]
    pub const fn plugin_id(&self) -> &str {
        self.plugin_id
    }

    /// Tears down the session, if any.
    ///
    /// Invokes `on_deactivate` when the plugin reported it (failures are
    /// logged), closes the connection and marks the entry not running.
    /// Returns whether a session was torn down.
    pub fn deactivate(&self) -> bool {
        let id = self.plugin_id;
        let session = {
            let mut entries = self.environment.entries_mut();
            let Some(entry) = entries.get_mut(id) else {
                return false;
            };
            let Some(session) = entry.session.clone() else {
                return false;
            };
            entry.state = PluginState::Stopping;
            session
        };

        if session.implements(HookId::OnDeactivate)
            && !session.is_closed()
            && let Err(error) = session.invoke(HookRequest::OnDeactivate)
        {
            warn!(
                target: REGISTRY_TARGET,
                plugin = %id,
                error = %error,
                "on_deactivate failed; closing the session anyway"
            );
        }
        session.close();

        if let Some(entry) = self.environment.entries_mut().get_mut(id) {
            entry.session = None;
            entry.state = PluginState::NotRunning;
        }
        self.environment.reporter.plugin_deactivated(id);
        true
    }

    /// Removes the entry, closing any session still attached to it.
    ///
    /// Returns whether an entry existed.
    pub fn remove(&self) -> bool {
        let removed = self.environment.entries_mut().remove(self.plugin_id);
        let Some(entry) = removed else {
            return false;
        };
        if let Some(session) = entry.session {
            session.close();
        }
        debug!(target: REGISTRY_TARGET, plugin = %self.plugin_id, "plugin removed");
        true
    }

    /// Attaches to the running plugin process described by `config`.
    ///
    /// Connects, runs the handshake, invokes `on_activate` when the plugin
    /// reported it, and installs the session with state
    /// [`PluginState::Running`]. On failure the registry is left unchanged
    /// and the attempted connection is closed.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::Manifest`] for a blank identifier,
    /// [`PluginError::AlreadyAttached`] when a live session exists,
    /// [`PluginError::Activation`] when `on_activate` fails, and the
    /// transport-classified errors of [`PluginSession::establish`].
    pub fn reattach(
        &self,
        manifest: &PluginManifest,
        config: &ReattachConfig,
    ) -> Result<(), PluginError> {
        manifest.validate()?;
        let id = self.plugin_id;
        if self
            .environment
            .entries()
            .get(id)
            .is_some_and(|entry| entry.live_session().is_some())
        {
            return Err(PluginError::AlreadyAttached { id: id.to_owned() });
        }

        let reporter = &self.environment.reporter;
        reporter.plugin_attaching(id, &config.addr);
        let session = PluginSession::establish(
            id,
            config,
            self.environment.services.dispatcher_for(id),
            &self.environment.options,
        )
        .and_then(|established| {
            activate(established).map_err(|source| PluginError::Activation {
                id: id.to_owned(),
                source: Box::new(source),
            })
        })
        .inspect_err(|error| reporter.plugin_attach_failed(id, error))?;

        reporter.plugin_attached(id, session.hooks());
        let previous = self.environment.entries_mut().insert(
            id.to_owned(),
            PluginEntry {
                manifest: Arc::new(manifest.clone()),
                state: PluginState::Running,
                session: Some(Arc::new(session)),
            },
        );
        if let Some(superseded) = previous.and_then(|entry| entry.session) {
            superseded.close();
        }
        Ok(())
    }
}

/// Runs `on_activate` when reported; the session is closed on failure.
fn activate(session: PluginSession) -> Result<PluginSession, PluginError> {
    if session.implements(HookId::OnActivate)
        && let Err(error) = session.invoke(HookRequest::OnActivate)
    {
        session.close();
        return Err(error);
    }
    Ok(session)
}
