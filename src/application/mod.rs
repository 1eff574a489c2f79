//! Application layer: assembles adapters and services into a runnable
//! process.

pub mod runtime;

pub use runtime::{build_sink, build_store, Runtime, RuntimeStats};
