//! Unit tests for host bootstrap and the start-up reattach.

use std::fs;
use std::io;
use std::sync::Arc;

use camino::Utf8PathBuf;
use rstest::{fixture, rstest};
use tempfile::TempDir;

use plexus_config::Config;

use crate::bootstrap::{BootstrapError, RunError, StartupError, bootstrap_with, run_host};
use crate::error::{ErrorClass, PLUGIN_DISABLED};
use crate::manifest::PluginManifest;
use crate::services::HostServices;
use crate::shutdown::{ShutdownError, ShutdownSignal};

use super::support::{
    FailingConfigLoader, HealthEvent, Recorder, RecordingHealthReporter, ServedPlugin,
    TestConfigLoader, unreachable_descriptor,
};

/// Shutdown signal that fires immediately.
struct Immediate;

impl ShutdownSignal for Immediate {
    fn wait(&self) -> Result<(), ShutdownError> {
        Ok(())
    }
}

/// Shutdown signal whose listener cannot be installed.
struct Broken;

impl ShutdownSignal for Broken {
    fn wait(&self) -> Result<(), ShutdownError> {
        Err(ShutdownError::Install {
            source: io::Error::other("no signal support"),
        })
    }
}

#[fixture]
fn reporter() -> Arc<RecordingHealthReporter> {
    Arc::new(RecordingHealthReporter::default())
}

#[fixture]
fn scratch() -> TempDir {
    TempDir::new().expect("temp dir")
}

fn write_json(dir: &TempDir, name: &str, value: &impl serde::Serialize) -> Utf8PathBuf {
    let path = Utf8PathBuf::from_path_buf(dir.path().join(name)).expect("utf8 temp path");
    fs::write(&path, serde_json::to_vec(value).expect("encode")).expect("write file");
    path
}

#[rstest]
fn bootstrap_reports_start_and_success(reporter: Arc<RecordingHealthReporter>) {
    let host = bootstrap_with(
        &TestConfigLoader::new(),
        reporter.clone(),
        HostServices::default(),
    )
    .expect("bootstrap should succeed");

    assert!(host.config().plugins_enabled());
    assert!(host.plugins().environment().is_some());
    let events = reporter.events();
    assert!(events.contains(&HealthEvent::BootstrapStarting));
    assert!(events.contains(&HealthEvent::BootstrapSucceeded));
}

#[rstest]
fn bootstrap_reports_configuration_failure(reporter: Arc<RecordingHealthReporter>) {
    let error = bootstrap_with(
        &FailingConfigLoader,
        reporter.clone(),
        HostServices::default(),
    )
    .expect_err("bootstrap should fail");

    assert!(matches!(error, BootstrapError::Configuration { .. }));
    let events = reporter.events();
    assert!(
        events
            .iter()
            .any(|event| matches!(event, HealthEvent::BootstrapFailed(_))),
        "bootstrap failure event missing: {events:?}"
    );
    assert!(!events.contains(&HealthEvent::BootstrapSucceeded));
}

#[rstest]
fn disabled_plugins_refuse_reattach_without_side_effects(
    reporter: Arc<RecordingHealthReporter>,
) {
    let host = bootstrap_with(
        &TestConfigLoader::new().with_plugins_disabled(),
        reporter.clone(),
        HostServices::default(),
    )
    .expect("bootstrap should succeed");
    assert!(host.plugins().environment().is_none());

    let error = host
        .plugins()
        .reattach_plugin(
            &PluginManifest::new("p1", "0.1.0"),
            &unreachable_descriptor(),
        )
        .expect_err("disabled host should refuse");

    assert_eq!(error.code(), PLUGIN_DISABLED);
    assert_eq!(error.class(), ErrorClass::NotImplemented);
    assert_eq!(error.status(), 501);
    assert!(error.plugin_error().is_none());
    assert!(
        !reporter
            .events()
            .iter()
            .any(|event| matches!(event, HealthEvent::PluginAttaching(_))),
        "no attach should have been attempted"
    );
}

#[rstest]
fn startup_reattach_is_skipped_when_unconfigured(reporter: Arc<RecordingHealthReporter>) {
    let host = bootstrap_with(&TestConfigLoader::new(), reporter, HostServices::default())
        .expect("bootstrap should succeed");

    assert_eq!(host.reattach_configured().expect("no-op"), None);
}

#[rstest]
fn startup_reattach_reads_manifest_and_descriptor(
    reporter: Arc<RecordingHealthReporter>,
    scratch: TempDir,
) {
    let mut served = ServedPlugin::start(Recorder::default());
    let manifest = write_json(&scratch, "plugin.json", &PluginManifest::new("p1", "0.1.0"));
    let descriptor = write_json(&scratch, "reattach.json", &served.descriptor);
    let loader = TestConfigLoader::new().with_startup_files(manifest, descriptor);
    let host = bootstrap_with(&loader, reporter, HostServices::default())
        .expect("bootstrap should succeed");

    let attached = host.reattach_configured().expect("start-up reattach");

    assert_eq!(attached.as_deref(), Some("p1"));
    let environment = host.plugins().environment().expect("plugins enabled");
    assert!(environment.is_active("p1"));
    assert_eq!(served.plugin.activations(), 1);

    host.shutdown();
    assert!(!environment.is_active("p1"));
    served.stop();
}

#[rstest]
fn startup_reattach_reports_missing_files(
    reporter: Arc<RecordingHealthReporter>,
    scratch: TempDir,
) {
    let manifest = write_json(&scratch, "plugin.json", &PluginManifest::new("p1", "0.1.0"));
    let missing = Utf8PathBuf::from_path_buf(scratch.path().join("absent.json"))
        .expect("utf8 temp path");
    let loader = TestConfigLoader::new().with_startup_files(manifest, missing.clone());
    let host = bootstrap_with(&loader, reporter, HostServices::default())
        .expect("bootstrap should succeed");

    let error = host.reattach_configured().expect_err("descriptor is missing");

    assert!(
        matches!(&error, StartupError::Read { path, .. } if *path == missing),
        "got {error:?}"
    );
}

#[rstest]
fn startup_reattach_reports_malformed_files(
    reporter: Arc<RecordingHealthReporter>,
    scratch: TempDir,
) {
    let manifest = write_json(&scratch, "plugin.json", &serde_json::json!({"version": "1"}));
    let descriptor = write_json(&scratch, "reattach.json", &unreachable_descriptor());
    let loader = TestConfigLoader::new().with_startup_files(manifest, descriptor);
    let host = bootstrap_with(&loader, reporter, HostServices::default())
        .expect("bootstrap should succeed");

    let error = host.reattach_configured().expect_err("manifest lacks an id");

    assert!(matches!(error, StartupError::Parse { .. }), "got {error:?}");
}

#[rstest]
fn run_host_attaches_then_deactivates_on_shutdown(
    reporter: Arc<RecordingHealthReporter>,
    scratch: TempDir,
) {
    let mut served = ServedPlugin::start(Recorder::default());
    let manifest = write_json(&scratch, "plugin.json", &PluginManifest::new("p1", "0.1.0"));
    let descriptor = write_json(&scratch, "reattach.json", &served.descriptor);
    let loader = TestConfigLoader::new().with_startup_files(manifest, descriptor);

    run_host(&loader, reporter.clone(), HostServices::default(), &Immediate)
        .expect("run should succeed");

    assert_eq!(served.plugin.activations(), 1);
    assert_eq!(served.plugin.deactivations(), 1);
    let events = reporter.events();
    assert!(events.contains(&HealthEvent::PluginAttached(String::from("p1"))));
    assert!(events.contains(&HealthEvent::PluginDeactivated(String::from("p1"))));
    served.stop();
}

#[rstest]
fn run_host_surfaces_startup_failures(
    reporter: Arc<RecordingHealthReporter>,
    scratch: TempDir,
) {
    let manifest = write_json(&scratch, "plugin.json", &PluginManifest::new("p1", "0.1.0"));
    let descriptor = write_json(&scratch, "reattach.json", &unreachable_descriptor());
    let loader = TestConfigLoader::new().with_startup_files(manifest, descriptor);

    let error = run_host(&loader, reporter.clone(), HostServices::default(), &Immediate)
        .expect_err("unreachable plugin should fail the run");

    let RunError::Startup(StartupError::Reattach(app)) = &error else {
        panic!("expected a reattach failure, got {error:?}");
    };
    assert!(app.is_transport());
    assert!(reporter.events().contains(&HealthEvent::PluginAttachFailed {
        plugin: String::from("p1"),
        transport: true,
    }));
}

#[rstest]
fn run_host_surfaces_shutdown_listener_failures(reporter: Arc<RecordingHealthReporter>) {
    let error = run_host(
        &TestConfigLoader::new(),
        reporter,
        HostServices::default(),
        &Broken,
    )
    .expect_err("listener failure should end the run");

    assert!(matches!(error, RunError::Shutdown(_)), "got {error:?}");
}

#[rstest]
fn static_loader_returns_its_configuration() {
    let config = Config {
        plugins_enabled: false,
        ..Config::default()
    };
    let loader = crate::StaticConfigLoader::new(config.clone());

    let loaded = crate::ConfigLoader::load(&loader).expect("static load");

    assert_eq!(loaded.plugins_enabled(), config.plugins_enabled());
}
