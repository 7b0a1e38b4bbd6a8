//! Protocol identity shared by the host and every plugin process.
//!
//! The handshake is the first exchange on a new connection. Both sides present
//! a [`HandshakeDescriptor`]; the session is only trusted when the magic cookie
//! key, cookie value, and protocol version all match. The cookie guards
//! against connecting to an unrelated process on the same address, and the
//! version guards against skew between host and plugin builds.
//!
//! Changing any field of [`HANDSHAKE`] is a wire-incompatible change and must
//! come with a protocol version bump.

use std::borrow::Cow;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Current wire protocol version.
pub const PROTOCOL_VERSION: u32 = 1;

/// Descriptor every Plexus host and plugin agree on.
pub const HANDSHAKE: HandshakeDescriptor = HandshakeDescriptor::from_static(
    "PLEXUS_PLUGIN_COOKIE",
    "3f1c3e2a9b6d4d58a1f0c7e5b2d94a6e",
    PROTOCOL_VERSION,
);

/// Magic cookie plus protocol version.
///
/// # Example
///
/// ```
/// use plexus_plugin::handshake::{HANDSHAKE, HandshakeDescriptor};
///
/// let peer = HandshakeDescriptor::new(
///     HANDSHAKE.cookie_key(),
///     HANDSHAKE.cookie_value(),
///     HANDSHAKE.protocol_version(),
/// );
/// assert!(HANDSHAKE.verify(&peer).is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandshakeDescriptor {
    cookie_key: Cow<'static, str>,
    cookie_value: Cow<'static, str>,
    protocol_version: u32,
}

impl HandshakeDescriptor {
    /// Builds a descriptor from owned or borrowed strings.
    #[must_use]
    pub fn new(
        cookie_key: impl Into<String>,
        cookie_value: impl Into<String>,
        protocol_version: u32,
    ) -> Self {
        Self {
            cookie_key: Cow::Owned(cookie_key.into()),
            cookie_value: Cow::Owned(cookie_value.into()),
            protocol_version,
        }
    }

    /// Builds a descriptor from static strings, usable in constants.
    #[must_use]
    pub const fn from_static(
        cookie_key: &'static str,
        cookie_value: &'static str,
        protocol_version: u32,
    ) -> Self {
        Self {
            cookie_key: Cow::Borrowed(cookie_key),
            cookie_value: Cow::Borrowed(cookie_value),
            protocol_version,
        }
    }

    /// Name of the magic cookie, also used as the environment variable a host
    /// sets when it launches a plugin binary.
    #[must_use]
    pub fn cookie_key(&self) -> &str {
        &self.cookie_key
    }

    /// Expected value of the magic cookie.
    #[must_use]
    pub fn cookie_value(&self) -> &str {
        &self.cookie_value
    }

    /// Protocol version spoken by this side.
    #[must_use]
    pub const fn protocol_version(&self) -> u32 {
        self.protocol_version
    }

    /// Returns a copy with a different protocol version.
    #[must_use]
    pub fn with_protocol_version(mut self, protocol_version: u32) -> Self {
        self.protocol_version = protocol_version;
        self
    }

    /// Returns a copy with a different cookie value.
    #[must_use]
    pub fn with_cookie_value(mut self, cookie_value: impl Into<String>) -> Self {
        self.cookie_value = Cow::Owned(cookie_value.into());
        self
    }

    /// Checks a peer's descriptor against this one.
    ///
    /// # Errors
    ///
    /// Returns the first mismatching field as a [`HandshakeError`].
    pub fn verify(&self, peer: &Self) -> Result<(), HandshakeError> {
        if self.cookie_key != peer.cookie_key {
            return Err(HandshakeError::CookieKeyMismatch {
                expected: self.cookie_key.to_string(),
                found: peer.cookie_key.to_string(),
            });
        }
        if self.cookie_value != peer.cookie_value {
            return Err(HandshakeError::CookieValueMismatch);
        }
        if self.protocol_version != peer.protocol_version {
            return Err(HandshakeError::VersionMismatch {
                expected: self.protocol_version,
                found: peer.protocol_version,
            });
        }
        Ok(())
    }
}

/// Ways a peer's descriptor can disagree with ours.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HandshakeError {
    /// The peer uses a different cookie name.
    #[error("magic cookie key mismatch: expected '{expected}', found '{found}'")]
    CookieKeyMismatch {
        /// Key this side expects.
        expected: String,
        /// Key the peer presented.
        found: String,
    },
    /// The peer presented the wrong cookie value. The values are not echoed.
    #[error("magic cookie value mismatch")]
    CookieValueMismatch,
    /// The peer speaks another protocol version.
    #[error("protocol version mismatch: expected {expected}, found {found}")]
    VersionMismatch {
        /// Version this side speaks.
        expected: u32,
        /// Version the peer presented.
        found: u32,
    },
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[test]
    fn identical_descriptors_match() {
        let peer = HANDSHAKE.clone();
        assert_eq!(HANDSHAKE.verify(&peer), Ok(()));
    }

    #[rstest]
    #[case::version(
        HANDSHAKE.clone().with_protocol_version(PROTOCOL_VERSION + 1),
        HandshakeError::VersionMismatch { expected: PROTOCOL_VERSION, found: PROTOCOL_VERSION + 1 }
    )]
    #[case::cookie_value(
        HANDSHAKE.clone().with_cookie_value("stale"),
        HandshakeError::CookieValueMismatch
    )]
    fn mismatches_are_reported(#[case] peer: HandshakeDescriptor, #[case] expected: HandshakeError) {
        assert_eq!(HANDSHAKE.verify(&peer), Err(expected));
    }

    #[test]
    fn cookie_key_mismatch_names_both_keys() {
        let peer = HandshakeDescriptor::new("OTHER_COOKIE", HANDSHAKE.cookie_value(), 1);
        let error = HANDSHAKE.verify(&peer).expect_err("keys differ");
        let message = error.to_string();
        assert!(message.contains("OTHER_COOKIE"), "message: {message}");
        assert!(message.contains(HANDSHAKE.cookie_key()), "message: {message}");
    }

    #[test]
    fn value_mismatch_does_not_leak_cookie() {
        let peer = HANDSHAKE.clone().with_cookie_value("guess");
        let message = HANDSHAKE.verify(&peer).expect_err("mismatch").to_string();
        assert!(!message.contains("guess"));
        assert!(!message.contains(HANDSHAKE.cookie_value()));
    }
}
