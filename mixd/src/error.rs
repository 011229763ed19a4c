//! Error types for mixd
//!
//! Defines daemon error types using thiserror for clear error propagation.
//!
//! Errors split into three classes:
//! - **Fatal at creation**: `NoDeviceAvailable`, `AudioOutput`, `Wiring`, `Config`
//! - **Recoverable, returned to the caller**: `NoFreeBranch`, `CannotOpenTarget`,
//!   `InvalidBranch`, `VirtualDeviceBusy`
//! - **Never surfaced**: failures on the real-time path become end-of-stream transitions

use thiserror::Error;

/// Main error type for the mixd daemon
#[derive(Error, Debug)]
pub enum Error {
    /// No playback device exists at all (requested name and default both missing)
    #[error("No playback device available")]
    NoDeviceAvailable,

    /// Every player branch is in use
    #[error("No free branch")]
    NoFreeBranch,

    /// The target could not be opened or decoded; the branch stays closed
    #[error("Cannot open target '{target}': {reason}")]
    CannotOpenTarget {
        /// Target as given by the caller
        target: String,
        /// Why opening failed
        reason: String,
    },

    /// Branch index outside the player range
    #[error("Invalid branch index: {0}")]
    InvalidBranch(usize),

    /// A writer is already open on the virtual device
    #[error("Virtual device already has an open writer")]
    VirtualDeviceBusy,

    /// Audio output device errors
    #[error("Audio output error: {0}")]
    AudioOutput(String),

    /// Audio decoding errors
    #[error("Audio decode error: {0}")]
    Decode(String),

    /// Stage construction or graph wiring failure
    #[error("Graph wiring error: {0}")]
    Wiring(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] mixd_common::Error),

    /// File I/O error
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience Result type using mixd Error
pub type Result<T> = std::result::Result<T, Error>;
