pub mod logging;
pub mod urls;

// Re-export common functions
pub use logging::{init_logging, default_log_file};
