//! Log output for the CLI.
//!
//! Library code only emits `tracing` events. The binary installs a single
//! fmt subscriber writing to stderr, keeping stdout for reports. `RUST_LOG`
//! overrides the level chosen from `--verbose`.

use tracing_subscriber::EnvFilter;

pub fn init(verbose: bool) {
    let default = if verbose { "wpfleet=debug,info" } else { "wpfleet=info,warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(verbose)
        .try_init()
        .ok();
}
