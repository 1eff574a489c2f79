//! Infrastructure layer module
//!
//! Process-wide concerns that sit outside the domain:
//! - Configuration loading (figment)
//! - Logging (tracing-subscriber)

pub mod config;
pub mod logging;
