//! Common types and utilities for HemoStat
//!
//! This crate provides the shared domain model, broker message envelope,
//! keyed-store layout, and configuration used by all HemoStat agents.

pub mod backoff;
pub mod config;
pub mod envelope;
pub mod error;
pub mod keys;
pub mod types;

pub use backoff::BackoffConfig;
pub use config::Config;
pub use envelope::{channels, Envelope, MessageKind};
pub use error::{Error, Result};
pub use types::*;
