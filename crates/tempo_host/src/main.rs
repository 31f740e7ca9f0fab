use std::process::ExitCode;

mod app;

use app::{bootstrap, loop_runner};

fn main() -> ExitCode {
    match bootstrap::build_host() {
        Ok(host) => loop_runner::run(host),
        Err(err) => {
            tracing::error!(error = %err, "startup_failed");
            ExitCode::FAILURE
        }
    }
}
