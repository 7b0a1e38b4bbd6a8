//! Development host: reattaches one plugin from configuration and keeps the
//! session alive until a termination signal arrives.

use std::io::{self, Write};
use std::process::ExitCode;
use std::sync::Arc;

use plexus_host::{
    HostServices, StructuredHealthReporter, SystemConfigLoader, SystemShutdownSignal, run_host,
};

fn main() -> ExitCode {
    let result = run_host(
        &SystemConfigLoader,
        Arc::new(StructuredHealthReporter::new()),
        HostServices::default(),
        &SystemShutdownSignal,
    );
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            let mut stderr = io::stderr().lock();
            writeln!(stderr, "plexus-host: {error}").ok();
            ExitCode::FAILURE
        }
    }
}
