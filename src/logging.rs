// Logging setup
//
// The layer lives inside someone else's process: if the host already installed
// a logger we keep it, otherwise env_logger is set up with the configured level
// and RUST_LOG still wins.

use crate::config::Config;

/// Initialize logging. Safe to call more than once.
pub fn init(config: &Config) {
    use env_logger::Builder;

    let mut builder = Builder::new();
    builder.filter_level(config.log_level_filter());
    builder.parse_default_env();

    if builder.try_init().is_err() {
        log::debug!("Logger already installed by the host, keeping it");
    }
}
