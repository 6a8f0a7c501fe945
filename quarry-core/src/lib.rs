//! Core shared library for the Quarry platform.
//!
//! This crate exposes reusable primitives that the services depend on:
//! common errors, configuration loading and logging setup.

pub mod config;
pub mod errors;
pub mod logging;

pub use config::{CoreConfig, Environment};
pub use errors::{QuarryError, Result as CoreResult};
