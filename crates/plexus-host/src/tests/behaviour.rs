//! Behavioural tests for plugin reattach.

use std::cell::RefCell;

use rstest::fixture;
use rstest_bdd_macros::{given, scenario, then, when};

use crate::environment::PluginState;
use crate::error::PLUGIN_REATTACH_FAILED;
use crate::services::HostApi;

use super::support::{self, ACTIVATIONS_KEY, HealthEvent, Recorder, TestWorld};

type StepResult = Result<(), String>;

#[fixture]
fn world() -> RefCell<TestWorld> {
    support::world()
}

#[given("a running plugin process")]
fn given_running_plugin(world: &RefCell<TestWorld>) {
    world.borrow_mut().serve(Recorder::default());
}

#[given("a plugin process that refuses activation")]
fn given_refusing_plugin(world: &RefCell<TestWorld>) {
    world.borrow_mut().serve(Recorder::refusing_activation());
}

#[given("a plugin descriptor for a closed port")]
fn given_closed_port(world: &RefCell<TestWorld>) {
    world
        .borrow_mut()
        .use_descriptor(support::unreachable_descriptor());
}

#[given("the descriptor advertises protocol version {version}")]
fn given_protocol_version(world: &RefCell<TestWorld>, version: String) -> StepResult {
    let parsed: u32 = version
        .parse()
        .map_err(|error| format!("invalid protocol version '{version}': {error}"))?;
    world
        .borrow_mut()
        .edit_descriptor(|descriptor| descriptor.protocol_version = parsed);
    Ok(())
}

#[given("plugins are disabled")]
fn given_plugins_disabled(world: &RefCell<TestWorld>) {
    world.borrow_mut().disable_plugins();
}

#[given("plugin {id} has been reattached")]
fn given_reattached(world: &RefCell<TestWorld>, id: String) -> StepResult {
    let mut borrow = world.borrow_mut();
    borrow.reattach(&id);
    borrow
        .result()
        .as_ref()
        .map_err(|error| format!("initial reattach failed: {error}"))?;
    borrow.remember_session(&id);
    Ok(())
}

#[when("the host reattaches plugin {id}")]
fn when_reattach(world: &RefCell<TestWorld>, id: String) {
    world.borrow_mut().reattach(&id);
}

#[then("the reattach succeeds")]
fn then_reattach_succeeds(world: &RefCell<TestWorld>) {
    let borrow = world.borrow();
    assert!(
        borrow.result().is_ok(),
        "reattach failed: {:?}",
        borrow.result()
    );
}

#[then("the reattach fails with a transport error")]
fn then_fails_transport(world: &RefCell<TestWorld>) {
    let borrow = world.borrow();
    let error = borrow.result().as_ref().expect_err("reattach succeeded");
    assert_eq!(error.code(), PLUGIN_REATTACH_FAILED);
    assert_eq!(error.status(), 500);
    assert!(error.is_transport(), "expected transport error, got {error}");
}

#[then("the reattach fails without a transport error")]
fn then_fails_other(world: &RefCell<TestWorld>) {
    let borrow = world.borrow();
    let error = borrow.result().as_ref().expect_err("reattach succeeded");
    assert_eq!(error.code(), PLUGIN_REATTACH_FAILED);
    assert!(!error.is_transport(), "unexpected transport error: {error}");
}

#[then("the reattach fails with status {status}")]
fn then_fails_status(world: &RefCell<TestWorld>, status: String) -> StepResult {
    let borrow = world.borrow();
    let error = borrow.result().as_ref().expect_err("reattach succeeded");
    let found = error.status().to_string();
    if found == status {
        Ok(())
    } else {
        Err(format!("expected status {status}, got {found} ({error})"))
    }
}

#[then("plugin {id} is active")]
fn then_active(world: &RefCell<TestWorld>, id: String) {
    let borrow = world.borrow();
    let environment = borrow.environment();
    assert!(environment.is_active(&id), "{id} should be active");
    assert_eq!(environment.state(&id), Some(PluginState::Running));
    assert_eq!(environment.active_plugin_ids(), vec![id]);
}

#[then("plugin {id} is not registered")]
fn then_not_registered(world: &RefCell<TestWorld>, id: String) {
    let borrow = world.borrow();
    let environment = borrow.environment();
    assert_eq!(environment.state(&id), None);
    assert!(environment.session(&id).is_none());
    assert!(environment.active_plugin_ids().is_empty());
}

#[then("the plugin saw the host API during activation for {id}")]
fn then_saw_api(world: &RefCell<TestWorld>, id: String) -> StepResult {
    let borrow = world.borrow();
    let stored = borrow
        .store
        .kv_get(&id, ACTIVATIONS_KEY)
        .map_err(|error| error.to_string())?;
    match stored.as_deref() {
        Some(b"1") => Ok(()),
        other => Err(format!("activation counter not written: {other:?}")),
    }
}

#[then("the previous session is closed")]
fn then_previous_closed(world: &RefCell<TestWorld>) {
    let borrow = world.borrow();
    let previous = borrow.previous_session().expect("session remembered");
    assert!(previous.is_closed(), "previous session still open");
}

#[then("the plugin was deactivated once")]
fn then_deactivated_once(world: &RefCell<TestWorld>) {
    let borrow = world.borrow();
    assert_eq!(borrow.plugin().deactivations(), 1);
    assert_eq!(borrow.plugin().activations(), 2);
}

#[then("the reporter recorded attachment of {id}")]
fn then_reporter_attached(world: &RefCell<TestWorld>, id: String) {
    let events = world.borrow().reporter.events();
    assert!(events.contains(&HealthEvent::PluginAttaching(id.clone())));
    assert!(
        events.contains(&HealthEvent::PluginAttached(id)),
        "attachment event missing: {events:?}"
    );
}

#[then("the reporter recorded a transport failure for {id}")]
fn then_reporter_transport_failure(world: &RefCell<TestWorld>, id: String) {
    let events = world.borrow().reporter.events();
    assert!(
        events.contains(&HealthEvent::PluginAttachFailed {
            plugin: id,
            transport: true,
        }),
        "transport failure event missing: {events:?}"
    );
}

#[scenario(
    path = "tests/features/plugin_reattach.feature",
    name = "Reattaching a running plugin activates it"
)]
fn reattach_activates_running_plugin(world: RefCell<TestWorld>) -> Result<(), String> {
    let _ = world;
    Ok(())
}

#[scenario(
    path = "tests/features/plugin_reattach.feature",
    name = "Reattaching again replaces the session"
)]
fn reattach_replaces_session(world: RefCell<TestWorld>) -> Result<(), String> {
    let _ = world;
    Ok(())
}

#[scenario(
    path = "tests/features/plugin_reattach.feature",
    name = "A protocol version mismatch is a transport error"
)]
fn protocol_mismatch_is_transport_error(world: RefCell<TestWorld>) -> Result<(), String> {
    let _ = world;
    Ok(())
}

#[scenario(
    path = "tests/features/plugin_reattach.feature",
    name = "An unreachable plugin is a transport error"
)]
fn unreachable_plugin_is_transport_error(world: RefCell<TestWorld>) -> Result<(), String> {
    let _ = world;
    Ok(())
}

#[scenario(
    path = "tests/features/plugin_reattach.feature",
    name = "A plugin that refuses activation is left detached"
)]
fn refused_activation_leaves_plugin_detached(world: RefCell<TestWorld>) -> Result<(), String> {
    let _ = world;
    Ok(())
}

#[scenario(
    path = "tests/features/plugin_reattach.feature",
    name = "Disabled plugins refuse to reattach"
)]
fn disabled_plugins_refuse_reattach(world: RefCell<TestWorld>) -> Result<(), String> {
    let _ = world;
    Ok(())
}
