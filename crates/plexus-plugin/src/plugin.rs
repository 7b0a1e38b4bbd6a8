//! Capability slots and the plugin-author trait.

use std::sync::{Arc, PoisonError, RwLock};

use serde_json::Value;

use crate::capability::{Api, CapabilityError, Driver, LogLevel, Row};
use crate::hooks::Hooks;

/// Storage for the capability handles of the current session.
///
/// Plugin types embed one `PluginBase` and return it from
/// [`Plugin::base`]. Both slots start empty and are filled when a host
/// session is established.
#[derive(Default)]
pub struct PluginBase {
    api: RwLock<Option<Arc<dyn Api>>>,
    driver: RwLock<Option<Arc<dyn Driver>>>,
}

impl std::fmt::Debug for PluginBase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginBase")
            .field("api", &self.api().is_some())
            .field("driver", &self.driver().is_some())
            .finish()
    }
}

impl PluginBase {
    /// Creates a base with both slots unset.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs the API handle.
    pub fn set_api(&self, api: Arc<dyn Api>) {
        *self.api.write().unwrap_or_else(PoisonError::into_inner) = Some(api);
    }

    /// Installs the driver handle.
    pub fn set_driver(&self, driver: Arc<dyn Driver>) {
        *self.driver.write().unwrap_or_else(PoisonError::into_inner) = Some(driver);
    }

    /// The current API handle, if a session has injected one.
    #[must_use]
    pub fn api(&self) -> Option<Arc<dyn Api>> {
        self.api
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// The current driver handle, if a session has injected one.
    #[must_use]
    pub fn driver(&self) -> Option<Arc<dyn Driver>> {
        self.driver
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Empties both slots.
    pub fn clear(&self) {
        *self.api.write().unwrap_or_else(PoisonError::into_inner) = None;
        *self.driver.write().unwrap_or_else(PoisonError::into_inner) = None;
    }
}

/// A servable plugin: hook implementations plus capability injection.
///
/// The provided injection methods delegate to [`Plugin::base`]. Overrides
/// must still make the injected handle readable through [`Plugin::api`] and
/// [`Plugin::driver`]; serving a plugin that breaks this panics.
pub trait Plugin: Hooks + 'static {
    /// The embedded capability storage.
    fn base(&self) -> &PluginBase;

    /// Receives the host API handle for the current session.
    fn set_api(&self, api: Arc<dyn Api>) {
        self.base().set_api(api);
    }

    /// Receives the driver handle for the current session.
    fn set_driver(&self, driver: Arc<dyn Driver>) {
        self.base().set_driver(driver);
    }

    /// The host API handle, unset until a session is established.
    fn api(&self) -> Option<Arc<dyn Api>> {
        self.base().api()
    }

    /// The driver handle, unset until a session is established.
    fn driver(&self) -> Option<Arc<dyn Driver>> {
        self.base().driver()
    }
}

/// Confirms that `plugin` accepts injected capabilities.
///
/// # Panics
///
/// Panics when a handle passed to [`Plugin::set_api`] or
/// [`Plugin::set_driver`] cannot be read back; this is a defect in the plugin
/// type and serving it would leave hooks without capabilities.
pub(crate) fn validate_injection(plugin: &dyn Plugin) {
    let api: Arc<dyn Api> = Arc::new(Probe);
    let driver: Arc<dyn Driver> = Arc::new(Probe);
    plugin.set_api(Arc::clone(&api));
    plugin.set_driver(Arc::clone(&driver));

    let api_ok = plugin.api().is_some_and(|found| Arc::ptr_eq(&found, &api));
    let driver_ok = plugin
        .driver()
        .is_some_and(|found| Arc::ptr_eq(&found, &driver));
    plugin.base().clear();

    assert!(
        api_ok,
        "plugin does not expose the API handle passed to set_api"
    );
    assert!(
        driver_ok,
        "plugin does not expose the driver handle passed to set_driver"
    );
}

/// Inert handle used only to probe the injection surface.
struct Probe;

fn probe_error() -> CapabilityError {
    CapabilityError::Remote(crate::wire::RemoteError::not_implemented(
        "capability probe",
    ))
}

impl Api for Probe {
    fn server_version(&self) -> Result<String, CapabilityError> {
        Err(probe_error())
    }

    fn log(&self, _level: LogLevel, _message: &str) -> Result<(), CapabilityError> {
        Err(probe_error())
    }

    fn kv_get(&self, _key: &str) -> Result<Option<Vec<u8>>, CapabilityError> {
        Err(probe_error())
    }

    fn kv_set(&self, _key: &str, _value: &[u8]) -> Result<(), CapabilityError> {
        Err(probe_error())
    }

    fn kv_delete(&self, _key: &str) -> Result<(), CapabilityError> {
        Err(probe_error())
    }

    fn kv_list(&self) -> Result<Vec<String>, CapabilityError> {
        Err(probe_error())
    }
}

impl Driver for Probe {
    fn exec(&self, _statement: &str, _params: &[Value]) -> Result<u64, CapabilityError> {
        Err(probe_error())
    }

    fn query(&self, _statement: &str, _params: &[Value]) -> Result<Vec<Row>, CapabilityError> {
        Err(probe_error())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::HookSet;

    #[derive(Default)]
    struct Wellbehaved {
        base: PluginBase,
    }

    impl Hooks for Wellbehaved {
        fn implemented(&self) -> HookSet {
            HookSet::new()
        }
    }

    impl Plugin for Wellbehaved {
        fn base(&self) -> &PluginBase {
            &self.base
        }
    }

    #[derive(Default)]
    struct DropsApi {
        base: PluginBase,
    }

    impl Hooks for DropsApi {
        fn implemented(&self) -> HookSet {
            HookSet::new()
        }
    }

    impl Plugin for DropsApi {
        fn base(&self) -> &PluginBase {
            &self.base
        }

        fn set_api(&self, _api: Arc<dyn Api>) {}
    }

    #[test]
    fn slots_start_unset() {
        let plugin = Wellbehaved::default();
        assert!(plugin.api().is_none());
        assert!(plugin.driver().is_none());
    }

    #[test]
    fn validation_leaves_slots_unset() {
        let plugin = Wellbehaved::default();
        validate_injection(&plugin);
        assert!(plugin.api().is_none());
        assert!(plugin.driver().is_none());
    }

    #[test]
    #[should_panic(expected = "set_api")]
    fn validation_rejects_broken_injection() {
        validate_injection(&DropsApi::default());
    }

    #[test]
    fn injected_handles_are_readable_until_cleared() {
        let plugin = Wellbehaved::default();
        plugin.set_api(Arc::new(Probe));
        plugin.set_driver(Arc::new(Probe));
        assert!(plugin.api().is_some());
        assert!(plugin.driver().is_some());

        plugin.base().clear();
        assert!(plugin.api().is_none());
        assert!(plugin.driver().is_none());
    }
}
