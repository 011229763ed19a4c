//! Event types for the mixd event system
//!
//! These are the public events broadcast by the daemon's dispatcher thread.
//! The real-time thread never builds them directly: it posts compact
//! notifications which the dispatcher stamps and converts into [`DaemonEvent`].

use serde::{Deserialize, Serialize};
use std::fmt;

/// Index-based handle to one playback branch.
///
/// The index doubles as the branch's mixer input number and never changes for
/// the lifetime of the daemon. Index 0 is the virtual device bridge branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BranchId(usize);

impl BranchId {
    /// Branch fed by the virtual device bridge
    pub const BRIDGE: BranchId = BranchId(0);

    /// Wrap a raw branch index
    pub const fn new(index: usize) -> Self {
        Self(index)
    }

    /// Raw index (also the mixer input number)
    pub const fn index(self) -> usize {
        self.0
    }

    /// True for the virtual device bridge branch
    pub const fn is_bridge(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for BranchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "branch#{}", self.0)
    }
}

/// mixd event types
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum DaemonEvent {
    /// A branch's source reached end of stream and the branch closed
    BranchEnded {
        branch: BranchId,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A looping branch's source rewound to its start
    BranchRestarted {
        branch: BranchId,
        /// Number of restarts in the current session (1 for the first)
        restarts: u32,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A producer opened a writer on the virtual device
    VirtualWriterOpened {
        sample_rate: u32,
        channels: u16,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// The virtual device writer was closed
    VirtualWriterClosed {
        /// Samples dropped by the bridge during the writer's lifetime
        dropped_samples: u64,
        timestamp: chrono::DateTime<chrono::Utc>,
    },
}

impl DaemonEvent {
    /// Branch concerned by this event, if any
    pub fn branch(&self) -> Option<BranchId> {
        match self {
            DaemonEvent::BranchEnded { branch, .. } | DaemonEvent::BranchRestarted { branch, .. } => {
                Some(*branch)
            }
            DaemonEvent::VirtualWriterOpened { .. } | DaemonEvent::VirtualWriterClosed { .. } => {
                Some(BranchId::BRIDGE)
            }
        }
    }

    /// Event type name (matches the serialized `type` tag)
    pub fn event_type(&self) -> &'static str {
        match self {
            DaemonEvent::BranchEnded { .. } => "BranchEnded",
            DaemonEvent::BranchRestarted { .. } => "BranchRestarted",
            DaemonEvent::VirtualWriterOpened { .. } => "VirtualWriterOpened",
            DaemonEvent::VirtualWriterClosed { .. } => "VirtualWriterClosed",
        }
    }
}
