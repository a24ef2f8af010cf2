//! Process bootstrap for config-management tooling: layered configuration
//! and logging initialisation.

pub mod config;
pub mod logging;

pub use config::*;
pub use logging::*;
