//! Test suites for the plugin host.

mod behaviour;
pub(crate) mod support;
mod unit;
