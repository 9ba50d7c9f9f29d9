//! # Core Runtime Module
//!
//! Foundational runtime infrastructure shared by every sync-core crate:
//! - Logging and tracing initialisation ([`logging`])
//! - Configuration and bridge injection ([`config`])
//! - Cross-component event bus ([`events`])

pub mod config;
pub mod error;
pub mod events;
pub mod logging;

pub use error::{Error, Result};
