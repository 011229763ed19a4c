//! # mixd Sound Mixing Daemon Library
//!
//! Multiplexes independently controlled sound sources into one hardware output
//! stream.
//!
//! **Architecture:** a fixed pool of branches (file players plus one virtual
//! device bridge) feeding an N-input mixer, pulled by a dedicated real-time
//! ticker thread into a cpal output sink. Decoding uses symphonia, rate
//! conversion uses rubato.
//!
//! ```no_run
//! use mixd::{CpalRegistry, Daemon};
//! use mixd_common::DaemonConfig;
//!
//! # fn main() -> mixd::Result<()> {
//! let daemon = Daemon::create(&CpalRegistry::new(), None, &DaemonConfig::default())?;
//! let branch = daemon.allocate()?;
//! daemon.open(branch, "ring.wav")?;
//! daemon.play(branch)?;
//! # daemon.destroy();
//! # Ok(())
//! # }
//! ```

pub mod audio;
pub mod error;
pub mod playback;

pub use audio::{
    AudioFormat, CaptureDevice, CpalRegistry, DeviceRegistry, OutputSink, PlaybackDevice, StaticRegistry,
};
pub use error::{Error, Result};
pub use mixd_common::{BranchId, DaemonConfig, DaemonEvent};
pub use playback::{BranchState, Daemon, DaemonStats, VirtualDevice, VirtualWriter};
