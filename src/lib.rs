//! LOTTO: recurring pot-based Lightning raffle.
//!
//! Library crate exposing all modules for use by integration tests
//! and the binary entry point.

pub mod config;
pub mod types;
pub mod gateway;
pub mod engine;
pub mod server;
