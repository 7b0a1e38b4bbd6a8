//! End-to-end reattach through the public host API.
//!
//! A plugin is served in-process with `serve_for_testing`, and the host
//! attaches to it using only the published descriptor.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, mpsc};
use std::thread;
use std::time::Duration;

use plexus_config::Config;
use plexus_host::{
    HostApi, HostServices, MemoryApi, PluginHost, PluginManifest, PluginState,
    StructuredHealthReporter,
};
use plexus_plugin::{
    CancelToken, CommandArgs, CommandResponse, HookError, HookId, HookSet, Hooks, Plugin,
    PluginBase, serve_for_testing,
};

const WAIT: Duration = Duration::from_secs(2);

#[derive(Default)]
struct Greeter {
    base: PluginBase,
    activated_with_api: AtomicBool,
}

impl Hooks for Greeter {
    fn implemented(&self) -> HookSet {
        [HookId::OnActivate, HookId::ExecuteCommand]
            .into_iter()
            .collect()
    }

    fn on_activate(&self) -> Result<(), HookError> {
        let api = self
            .api()
            .ok_or_else(|| HookError::new("api not injected"))?;
        let version = api
            .server_version()
            .map_err(|error| HookError::new(error.to_string()))?;
        api.kv_set("greeting", format!("hello from {version}").as_bytes())
            .map_err(|error| HookError::new(error.to_string()))?;
        self.activated_with_api.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn execute_command(&self, args: &CommandArgs) -> Result<CommandResponse, HookError> {
        Ok(CommandResponse::new(format!("hi, {}", args.rest())))
    }
}

impl Plugin for Greeter {
    fn base(&self) -> &PluginBase {
        &self.base
    }
}

#[test]
fn host_reattaches_to_a_served_plugin() {
    let plugin = Arc::new(Greeter::default());
    let cancel = CancelToken::new();
    let (reattach_tx, reattach_rx) = mpsc::channel();
    let (close_tx, close_rx) = mpsc::channel::<()>();
    let server = {
        let serve_cancel = cancel.clone();
        let served = Arc::clone(&plugin);
        thread::spawn(move || serve_for_testing(&serve_cancel, served, &reattach_tx, Some(close_tx)))
    };
    let descriptor = reattach_rx.recv_timeout(WAIT).expect("descriptor published");
    assert!(descriptor.test);
    assert_eq!(descriptor.pid, Some(std::process::id()));

    let store = Arc::new(MemoryApi::new());
    let api: Arc<dyn HostApi> = Arc::<MemoryApi>::clone(&store);
    let services = HostServices::new(api, Arc::new(plexus_host::DisabledDriver));
    let host = PluginHost::new(
        &Config::default(),
        services,
        Arc::new(StructuredHealthReporter::new()),
    );
    let manifest = PluginManifest::new("greeter", "1.0.0");

    host.reattach_plugin(&manifest, &descriptor)
        .expect("reattach should succeed");

    assert!(plugin.activated_with_api.load(Ordering::SeqCst));
    let greeting = store
        .kv_get("greeter", "greeting")
        .expect("kv read")
        .expect("greeting stored");
    assert!(greeting.starts_with(b"hello from "));

    let environment = host.environment().expect("plugins enabled");
    assert_eq!(environment.state("greeter"), Some(PluginState::Running));
    let reply = environment
        .execute_command("greeter", CommandArgs::new("/greet world"))
        .expect("command");
    assert_eq!(reply.text(), "hi, world");

    host.reattach_plugin(&manifest, &descriptor)
        .expect("reattach is repeatable");
    assert!(environment.is_active("greeter"));

    host.shutdown();
    assert_eq!(environment.state("greeter"), Some(PluginState::NotRunning));

    cancel.cancel();
    server
        .join()
        .expect("serve thread")
        .expect("serve result");
    assert!(
        close_rx.recv_timeout(WAIT).is_err(),
        "close channel should disconnect once serving stops"
    );
}
