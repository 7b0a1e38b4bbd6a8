//! Binary entrypoint for the echo plugin.
//!
//! Launch it with the handshake cookie set; it prints its reattach
//! descriptor on stdout and serves host sessions until killed.

use std::io::{self, Write};
use std::process::ExitCode;
use std::sync::Arc;

use plexus_plugin::serve;
use plexus_plugin_echo::EchoPlugin;

fn main() -> ExitCode {
    if let Err(error) = serve(Arc::new(EchoPlugin::new())) {
        writeln!(io::stderr().lock(), "plexus-plugin-echo: {error}").ok();
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}
