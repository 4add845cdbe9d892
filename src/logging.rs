//! Logger setup for the binary.

use env_logger::{Builder, Env, Target};

/// Install the global logger: info level unless `RUST_LOG` says otherwise, on stdout.
///
/// Calling it twice is harmless; the second logger is rejected and reported.
pub fn init() {
  let result = Builder::from_env(Env::default().default_filter_or("info"))
    .target(Target::Stdout)
    .format_timestamp_millis()
    .try_init();
  if let Err(e) = result {
    log::warn!("Logger already initialized: {}", e);
  }
}
