#![recursion_limit = "256"]

pub mod config;
pub mod eval;
pub mod message;
pub mod metrics;
pub mod process;
pub mod tracking;

mod emit_warnings;
