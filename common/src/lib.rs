//! Utilities shared by the registration crates: logging setup and bounded
//! parallel mapping.

pub mod log_setup;
pub mod parallel;

pub use log_setup::{setup_logging, LogConfig, LogSetupError};
pub use parallel::par_map_limited;
