//! Shared fixtures: an in-process plugin, a recording reporter and
//! configuration loaders.

use std::ffi::OsString;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, mpsc};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use ortho_config::{OrthoConfig, OrthoError};

use plexus_config::{Config, SocketEndpoint};
use plexus_plugin::{
    CancelToken, CommandArgs, CommandResponse, HookError, HookId, HookSet, Hooks, Plugin,
    PluginBase, ReattachConfig, ServeError, serve_for_testing,
};

use crate::bootstrap::{BootstrapError, ConfigLoader};
use crate::environment::Environment;
use crate::error::{AppError, PluginError};
use crate::health::HealthReporter;
use crate::host::PluginHost;
use crate::manifest::PluginManifest;
use crate::services::{DisabledDriver, HostApi, HostServices, MemoryApi};
use crate::session::{PluginSession, SessionOptions};

pub const WAIT: Duration = Duration::from_secs(2);

/// Key the test plugin bumps from `on_activate`.
pub const ACTIVATIONS_KEY: &str = "activations";

/// Plugin that counts its lifecycle hooks through the injected API.
#[derive(Default)]
pub struct Recorder {
    base: PluginBase,
    refuse_activation: AtomicBool,
    activations: AtomicUsize,
    deactivations: AtomicUsize,
}

impl Recorder {
    pub fn refusing_activation() -> Self {
        let plugin = Self::default();
        plugin.refuse_activation.store(true, Ordering::SeqCst);
        plugin
    }

    pub fn activations(&self) -> usize {
        self.activations.load(Ordering::SeqCst)
    }

    pub fn deactivations(&self) -> usize {
        self.deactivations.load(Ordering::SeqCst)
    }
}

impl Hooks for Recorder {
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
        if self.refuse_activation.load(Ordering::SeqCst) {
            return Err(HookError::new("activation refused"));
        }
        let api = self
            .api()
            .ok_or_else(|| HookError::new("api handle missing during activation"))?;
        let count = self.activations.fetch_add(1, Ordering::SeqCst) + 1;
        api.kv_set(ACTIVATIONS_KEY, count.to_string().as_bytes())
            .map_err(|error| HookError::new(error.to_string()))
    }

    fn on_deactivate(&self) -> Result<(), HookError> {
        self.deactivations.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn execute_command(&self, args: &CommandArgs) -> Result<CommandResponse, HookError> {
        Ok(CommandResponse::new(args.rest()))
    }
}

impl Plugin for Recorder {
    fn base(&self) -> &PluginBase {
        &self.base
    }
}

/// A [`Recorder`] served on a loopback port for the duration of a test.
pub struct ServedPlugin {
    pub plugin: Arc<Recorder>,
    pub descriptor: ReattachConfig,
    cancel: CancelToken,
    thread: Option<JoinHandle<Result<(), ServeError>>>,
}

impl ServedPlugin {
    pub fn start(plugin: Recorder) -> Self {
        let plugin = Arc::new(plugin);
        let cancel = CancelToken::new();
        let (reattach_tx, reattach_rx) = mpsc::channel();
        let thread = {
            let serve_cancel = cancel.clone();
            let served = Arc::clone(&plugin);
            thread::spawn(move || serve_for_testing(&serve_cancel, served, &reattach_tx, None))
        };
        let descriptor = reattach_rx.recv_timeout(WAIT).expect("reattach descriptor");
        Self {
            plugin,
            descriptor,
            cancel,
            thread: Some(thread),
        }
    }

    pub fn stop(&mut self) {
        self.cancel.cancel();
        if let Some(thread) = self.thread.take() {
            thread
                .join()
                .expect("serve thread panicked")
                .expect("serve failed");
        }
    }
}

impl Drop for ServedPlugin {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Descriptor pointing at a port nothing listens on.
pub fn unreachable_descriptor() -> ReattachConfig {
    let port = std::net::TcpListener::bind(("127.0.0.1", 0))
        .and_then(|listener| listener.local_addr())
        .expect("reserve port")
        .port();
    ReattachConfig::new(SocketEndpoint::tcp("127.0.0.1", port))
}

/// An environment whose API store can be inspected.
pub fn environment_with_store(
    reporter: Arc<RecordingHealthReporter>,
) -> (Environment, Arc<MemoryApi>) {
    let store = Arc::new(MemoryApi::new());
    let api: Arc<dyn HostApi> = Arc::<MemoryApi>::clone(&store);
    let services = HostServices::new(api, Arc::new(DisabledDriver));
    let options = SessionOptions::new()
        .with_handshake_timeout(WAIT)
        .with_call_timeout(WAIT);
    let environment = Environment::new(services, options).with_reporter(reporter);
    (environment, store)
}

/// Loader returning a configuration suited to tests.
pub struct TestConfigLoader {
    config: Config,
}

impl TestConfigLoader {
    pub fn new() -> Self {
        Self {
            config: Config {
                log_filter: String::from("warn"),
                handshake_timeout_ms: 2_000,
                call_timeout_ms: 2_000,
                ..Config::default()
            },
        }
    }

    pub fn with_plugins_disabled(mut self) -> Self {
        self.config.plugins_enabled = false;
        self
    }

    pub fn with_startup_files(
        mut self,
        manifest: camino::Utf8PathBuf,
        descriptor: camino::Utf8PathBuf,
    ) -> Self {
        self.config.reattach_manifest = Some(manifest);
        self.config.reattach_descriptor = Some(descriptor);
        self
    }
}

impl ConfigLoader for TestConfigLoader {
    fn load(&self) -> Result<Config, Arc<OrthoError>> {
        Ok(self.config.clone())
    }
}

/// Loader that intentionally fails by passing invalid CLI arguments.
pub struct FailingConfigLoader;

impl ConfigLoader for FailingConfigLoader {
    fn load(&self) -> Result<Config, Arc<OrthoError>> {
        let args = vec![
            OsString::from("plexus-host"),
            OsString::from("--handshake-timeout-ms"),
            OsString::from("soon"),
        ];
        Config::load_from_iter(args)
    }
}

/// Records health events for assertions.
#[derive(Default)]
pub struct RecordingHealthReporter {
    events: Mutex<Vec<HealthEvent>>,
}

impl RecordingHealthReporter {
    /// Captures a copy of the recorded events.
    pub fn events(&self) -> Vec<HealthEvent> {
        self.events
            .lock()
            .expect("health reporter mutex poisoned")
            .clone()
    }

    fn record(&self, event: HealthEvent) {
        self.events
            .lock()
            .expect("health reporter mutex poisoned")
            .push(event);
    }
}

impl HealthReporter for RecordingHealthReporter {
    fn bootstrap_starting(&self) {
        self.record(HealthEvent::BootstrapStarting);
    }

    fn bootstrap_succeeded(&self, _config: &Config) {
        self.record(HealthEvent::BootstrapSucceeded);
    }

    fn bootstrap_failed(&self, error: &BootstrapError) {
        self.record(HealthEvent::BootstrapFailed(error.to_string()));
    }

    fn plugin_attaching(&self, plugin_id: &str, _endpoint: &SocketEndpoint) {
        self.record(HealthEvent::PluginAttaching(plugin_id.to_owned()));
    }

    fn plugin_attached(&self, plugin_id: &str, _hooks: &HookSet) {
        self.record(HealthEvent::PluginAttached(plugin_id.to_owned()));
    }

    fn plugin_attach_failed(&self, plugin_id: &str, error: &PluginError) {
        self.record(HealthEvent::PluginAttachFailed {
            plugin: plugin_id.to_owned(),
            transport: error.is_transport(),
        });
    }

    fn plugin_deactivated(&self, plugin_id: &str) {
        self.record(HealthEvent::PluginDeactivated(plugin_id.to_owned()));
    }
}

/// Structured health events tracked during tests.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum HealthEvent {
    BootstrapStarting,
    BootstrapSucceeded,
    BootstrapFailed(String),
    PluginAttaching(String),
    PluginAttached(String),
    PluginAttachFailed { plugin: String, transport: bool },
    PluginDeactivated(String),
}

/// State shared by the reattach scenarios.
pub struct TestWorld {
    pub reporter: Arc<RecordingHealthReporter>,
    pub store: Arc<MemoryApi>,
    host: PluginHost,
    served: Option<ServedPlugin>,
    descriptor: Option<ReattachConfig>,
    previous: Option<Arc<PluginSession>>,
    result: Option<Result<(), AppError>>,
}

impl TestWorld {
    /// Builds a world whose host has plugins enabled.
    pub fn new() -> Self {
        let reporter = Arc::new(RecordingHealthReporter::default());
        let (environment, store) = environment_with_store(Arc::clone(&reporter));
        Self {
            reporter,
            store,
            host: PluginHost::with_environment(Arc::new(environment)),
            served: None,
            descriptor: None,
            previous: None,
            result: None,
        }
    }

    /// Switches plugins off.
    pub fn disable_plugins(&mut self) {
        self.host = PluginHost::disabled();
    }

    /// Serves `plugin` and remembers its descriptor.
    pub fn serve(&mut self, plugin: Recorder) {
        let served = ServedPlugin::start(plugin);
        self.descriptor = Some(served.descriptor.clone());
        self.served = Some(served);
    }

    /// Replaces the descriptor used by the next reattach.
    pub fn use_descriptor(&mut self, descriptor: ReattachConfig) {
        self.descriptor = Some(descriptor);
    }

    /// Edits the current descriptor in place.
    pub fn edit_descriptor(&mut self, edit: impl FnOnce(&mut ReattachConfig)) {
        let descriptor = self.descriptor.get_or_insert_with(unreachable_descriptor);
        edit(descriptor);
    }

    /// Runs the host-level reattach for `plugin_id`.
    pub fn reattach(&mut self, plugin_id: &str) {
        let descriptor = self
            .descriptor
            .clone()
            .unwrap_or_else(unreachable_descriptor);
        let manifest = PluginManifest::new(plugin_id, "0.1.0");
        self.result = Some(self.host.reattach_plugin(&manifest, &descriptor));
    }

    /// Keeps a handle on the current session of `plugin_id`.
    pub fn remember_session(&mut self, plugin_id: &str) {
        self.previous = self.environment().session(plugin_id);
    }

    pub fn environment(&self) -> &Environment {
        self.host.environment().expect("plugins enabled")
    }

    pub fn previous_session(&self) -> Option<&Arc<PluginSession>> {
        self.previous.as_ref()
    }

    pub fn plugin(&self) -> &Recorder {
        &self.served.as_ref().expect("plugin served").plugin
    }

    pub fn result(&self) -> &Result<(), AppError> {
        self.result.as_ref().expect("reattach attempted")
    }
}

impl Drop for TestWorld {
    fn drop(&mut self) {
        self.host.shutdown();
    }
}

/// Fixture entry point for behaviour tests.
pub fn world() -> std::cell::RefCell<TestWorld> {
    std::cell::RefCell::new(TestWorld::new())
}
