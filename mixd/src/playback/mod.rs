//! Playback graph and daemon
//!
//! Branch pool, mixer, ticker, virtual device bridge and the daemon facade
//! tying them together.

pub mod branch;
pub mod bridge;
pub mod daemon;
pub mod events;
pub mod graph;
pub mod mixer;
pub mod pool;
pub mod ticker;
pub mod virtual_device;

pub use branch::BranchState;
pub use daemon::{Daemon, DaemonStats};
pub use pool::{CompletionCallback, UserTag};
pub use virtual_device::{VirtualDevice, VirtualWriter};
