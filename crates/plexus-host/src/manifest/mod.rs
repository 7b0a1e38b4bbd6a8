//! Static identity of a plugin.
//!
//! A [`PluginManifest`] names the plugin and declares the hooks it claims to
//! implement. The host only trusts the hook set reported during the
//! handshake; the declared list is informational and used in logs.

use serde::{Deserialize, Serialize};

use plexus_plugin::HookId;

use crate::error::PluginError;

/// Declarative description of a plugin's identity.
///
/// # Example
///
/// ```
/// use plexus_host::PluginManifest;
///
/// let manifest: PluginManifest =
///     serde_json::from_str(r#"{"id": "echo", "version": "0.1.0"}"#).expect("parse");
/// assert_eq!(manifest.id(), "echo");
/// assert!(manifest.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginManifest {
    id: String,
    #[serde(default)]
    version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(default)]
    hooks: Vec<HookId>,
}

impl PluginManifest {
    /// Creates a manifest with no display name and no declared hooks.
    #[must_use]
    pub fn new(id: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            version: version.into(),
            name: None,
            hooks: Vec::new(),
        }
    }

    /// Sets the human-readable name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Declares the hooks the plugin claims to implement.
    #[must_use]
    pub fn with_hooks(mut self, hooks: impl IntoIterator<Item = HookId>) -> Self {
        self.hooks = hooks.into_iter().collect();
        self
    }

    /// Unique plugin identifier.
    #[must_use]
    pub const fn id(&self) -> &str {
        self.id.as_str()
    }

    /// Plugin version.
    #[must_use]
    pub const fn version(&self) -> &str {
        self.version.as_str()
    }

    /// Display name, falling back to the identifier.
    #[must_use]
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(self.id.as_str())
    }

    /// Hooks declared by the manifest.
    #[must_use]
    pub fn declared_hooks(&self) -> &[HookId] {
        &self.hooks
    }

    /// Rejects manifests without a usable identifier.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::Manifest`] when the identifier is blank.
    pub fn validate(&self) -> Result<(), PluginError> {
        if self.id.trim().is_empty() {
            return Err(PluginError::Manifest {
                message: String::from("plugin id must not be empty"),
            });
        }
        Ok(())
    }
}
