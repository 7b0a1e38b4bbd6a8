//! Unit tests for host error types.

use std::error::Error as _;

use plexus_plugin::RpcError;
use rstest::rstest;

use super::*;

#[rstest]
#[case::refused(PluginError::Rejected { id: "p".into(), reason: "no".into() }, true)]
#[case::timeout(
    PluginError::Timeout { id: "p".into(), operation: "handshake", timeout_ms: 5 },
    true
)]
#[case::dead_process(PluginError::ProcessNotRunning { id: "p".into(), pid: 1 }, true)]
#[case::already_attached(PluginError::AlreadyAttached { id: "p".into() }, false)]
#[case::hook(
    PluginError::Hook { id: "p".into(), hook: HookId::OnActivate, source: RpcError::Closed },
    false
)]
fn transport_classification(#[case] error: PluginError, #[case] expected: bool) {
    assert_eq!(error.is_transport(), expected, "{error}");
}

#[test]
fn activation_failure_is_not_transport() {
    let error = PluginError::Activation {
        id: "p".into(),
        source: Box::new(PluginError::Timeout {
            id: "p".into(),
            operation: "hook",
            timeout_ms: 1,
        }),
    };

    assert!(!error.is_transport());
    assert!(error.to_string().contains("failed to activate"));
}

#[test]
fn app_error_exposes_classification_and_cause() {
    let error = AppError::new(
        "reattach_plugin",
        PLUGIN_REATTACH_FAILED,
        ErrorClass::Internal,
        "plugin p",
    )
    .with_source(PluginError::Rejected {
        id: "p".into(),
        reason: "cookie".into(),
    });

    assert_eq!(error.status(), 500);
    assert_eq!(error.code(), PLUGIN_REATTACH_FAILED);
    assert!(error.is_transport());
    assert!(error.source().is_some());
    let message = error.to_string();
    assert!(message.contains("reattach_plugin"), "{message}");
    assert!(message.contains("500"), "{message}");
}

#[test]
fn disabled_error_has_no_cause() {
    let error = AppError::new(
        "reattach_plugin",
        PLUGIN_DISABLED,
        ErrorClass::NotImplemented,
        "plugins are disabled",
    );

    assert_eq!(error.status(), 501);
    assert!(error.plugin_error().is_none());
    assert!(!error.is_transport());
}
