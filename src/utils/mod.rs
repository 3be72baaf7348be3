//! Shared utilities: lock helpers and logging setup

pub mod lock;
pub mod logging;

// Re-export commonly used items
pub use lock::{lock, read, with_lock, with_read_lock, with_write_lock, write};
#[cfg(feature = "json-logging")]
pub use logging::init_json_logging;
pub use logging::{init_logging, init_logging_from_config};
