//! # mixd Common Library
//!
//! Shared code for the mixd sound daemon and its tools:
//! - Configuration loading (TOML file, environment, built-in defaults)
//! - Event types broadcast by the daemon (DaemonEvent enum)
//! - Branch identifiers
//! - Frame/period timing helpers

pub mod config;
pub mod error;
pub mod events;
pub mod timing;

pub use config::DaemonConfig;
pub use error::{Error, Result};
pub use events::{BranchId, DaemonEvent};
