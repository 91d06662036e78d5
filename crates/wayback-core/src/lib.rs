//! Core of the archiving bot: conversation polling, deduplicated dispatch and
//! result fan-out.
//!
//! This crate is platform-agnostic. Mastodon / GitHub / the archiving engine
//! live behind ports (traits) implemented in adapter crates.

pub mod config;
pub mod domain;
pub mod errors;
pub mod extract;
pub mod logging;
pub mod pool;
pub mod ports;
pub mod publish;
pub mod registry;
pub mod service;
pub mod stats;

pub use errors::{Error, Result};
