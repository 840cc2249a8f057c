//! External liveness check for a running entityd agent.
//!
//! Exits 0 when the agent has heartbeated since the previous check, 1
//! otherwise. Checking consumes the marker, so run it less often than the
//! agent's collection cycle.

use std::process::ExitCode;

use entityd_runtime::Health;

fn main() -> ExitCode {
    if Health::from_platform_dirs().check() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
