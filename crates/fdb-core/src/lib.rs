//! Core domain + application logic for the Factorio → Discord bridge.
//!
//! This crate is intentionally framework-agnostic. Discord and the file follower
//! live behind ports (traits) implemented in adapter crates.

pub mod classifier;
pub mod config;
pub mod domain;
pub mod errors;
pub mod logging;
pub mod messaging;
pub mod ports;
pub mod relay;
pub mod responder;
pub mod session;

#[cfg(test)]
mod test_support;

pub use errors::{Error, Result};
