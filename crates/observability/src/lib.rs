//! Process-wide logging setup.

/// Tracing subscriber configuration.
pub mod tracing;

pub use self::tracing::LogFormat;

/// Initialize process-wide logging from the environment.
///
/// Safe to call more than once; later calls are no-ops.
pub fn init() {
    tracing::init();
}
