//! Core domain + application logic for the herald broadcast bot.
//!
//! This crate is intentionally framework-agnostic. The Telegram transport
//! lives behind ports (traits) implemented in the adapter crate.

pub mod audit;
pub mod broadcast;
pub mod config;
pub mod directory;
pub mod domain;
pub mod errors;
pub mod flood;
pub mod logging;
pub mod ports;
pub mod roles;

pub use errors::{Error, Result};
