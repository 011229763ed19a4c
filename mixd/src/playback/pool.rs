//! Fixed branch pool: control-plane records and the allocator
//!
//! One record per branch, indexed by [`BranchId`]. Index 0 is the bridge
//! branch and is never handed out. The scan-and-reserve in
//! [`BranchPool::allocate`] runs under the pool mutex, so concurrent callers
//! always receive distinct branches.

use crate::playback::branch::{BranchCommand, BranchState, BranchStatus};
use mixd_common::BranchId;
use std::any::Any;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, warn};

/// Invoked on the dispatcher thread when a branch's source is exhausted
pub type CompletionCallback = Arc<dyn Fn(BranchId) + Send + Sync>;

/// Opaque caller data attached to a branch
pub type UserTag = Arc<dyn Any + Send + Sync>;

/// Mutable per-branch control data, guarded by the pool mutex
#[derive(Default)]
pub struct SlotControl {
    /// Handed out by `allocate`, not yet released
    pub reserved: bool,
    /// Session generation current when the reservation was made. Only
    /// sessions opened after it belong to the current owner.
    pub reserved_at: u32,
    pub callback: Option<CompletionCallback>,
    pub tag: Option<UserTag>,
}

/// Immutable per-branch wiring
struct BranchHandle {
    status: Arc<BranchStatus>,
    commands: UnboundedSender<BranchCommand>,
}

/// Real-time ends handed to the graph at construction
pub type BranchReceivers = Vec<(Arc<BranchStatus>, UnboundedReceiver<BranchCommand>)>;

/// All branches of one daemon
pub struct BranchPool {
    handles: Vec<BranchHandle>,
    slots: Mutex<Vec<SlotControl>>,
}

impl BranchPool {
    /// Create `capacity` player branches plus the bridge branch.
    pub fn new(capacity: usize) -> (Self, BranchReceivers) {
        let mut handles = Vec::with_capacity(capacity + 1);
        let mut receivers = Vec::with_capacity(capacity + 1);

        for _ in 0..=capacity {
            let status = Arc::new(BranchStatus::new());
            let (commands, rx) = mpsc::unbounded_channel();
            handles.push(BranchHandle {
                status: Arc::clone(&status),
                commands,
            });
            receivers.push((status, rx));
        }

        let slots = (0..=capacity).map(|_| SlotControl::default()).collect();
        (
            Self {
                handles,
                slots: Mutex::new(slots),
            },
            receivers,
        )
    }

    /// Number of allocatable branches
    pub fn capacity(&self) -> usize {
        self.handles.len() - 1
    }

    /// True for an allocatable branch index
    pub fn is_player(&self, id: BranchId) -> bool {
        !id.is_bridge() && id.index() < self.handles.len()
    }

    /// Lock the control records
    pub fn lock(&self) -> MutexGuard<'_, Vec<SlotControl>> {
        self.slots.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Reserve the first closed, unreserved player branch.
    ///
    /// Clears the previous session's callback, tag and reservation data. The
    /// caller resets gain and loop.
    pub fn allocate(&self) -> Option<BranchId> {
        let mut slots = self.lock();
        let index = (1..self.handles.len()).find(|&i| {
            !slots[i].reserved && self.handles[i].status.state() == BranchState::Closed
        })?;

        slots[index] = SlotControl {
            reserved: true,
            reserved_at: self.handles[index].status.generation(),
            callback: None,
            tag: None,
        };
        debug!("Allocated branch#{}", index);
        Some(BranchId::new(index))
    }

    /// Drop the reservation of `id`. Returns false if it was not reserved.
    pub fn unreserve(&self, id: BranchId) -> bool {
        let mut slots = self.lock();
        match slots.get_mut(id.index()) {
            Some(slot) => std::mem::replace(&mut slot.reserved, false),
            None => false,
        }
    }

    /// Shared status word of `id`
    pub fn status(&self, id: BranchId) -> Option<&BranchStatus> {
        self.handles.get(id.index()).map(|h| h.status.as_ref())
    }

    /// Queue a command for the real-time half of `id`
    pub fn send(&self, id: BranchId, command: BranchCommand) {
        let Some(handle) = self.handles.get(id.index()) else {
            warn!("Command {:?} for unknown {}", command, id);
            return;
        };
        if let Err(e) = handle.commands.send(command) {
            // Graph gone: the daemon is shutting down
            debug!("Dropping {:?} for {}: graph detached", e.0, id);
        }
    }

    /// Install or clear the completion callback of `id`
    pub fn set_callback(&self, id: BranchId, callback: Option<CompletionCallback>) {
        if let Some(slot) = self.lock().get_mut(id.index()) {
            slot.callback = callback;
        }
    }

    /// Handle an end-of-stream from the dispatcher.
    ///
    /// Ignored unless `generation` was opened under the current reservation.
    /// Releases the reservation when the branch is still closed in the ended
    /// session, and returns the callback to invoke outside the lock.
    pub fn on_ended(&self, id: BranchId, generation: u32) -> Option<CompletionCallback> {
        let mut slots = self.lock();
        let slot = slots.get_mut(id.index())?;
        if !slot.reserved || !opened_after(generation, slot.reserved_at) {
            debug!("Stale end of stream for {} (generation {})", id, generation);
            return None;
        }

        let still_ended = self
            .status(id)
            .map_or(false, |s| s.load() == (generation, BranchState::Closed));
        if still_ended {
            slot.reserved = false;
        }
        slot.callback.clone()
    }

    /// Every branch id, bridge first
    pub fn ids(&self) -> impl Iterator<Item = BranchId> + '_ {
        (0..self.handles.len()).map(BranchId::new)
    }
}

/// True when `generation` was started after `floor`, across wraparound
fn opened_after(generation: u32, floor: u32) -> bool {
    (generation.wrapping_sub(floor) as i32) > 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocate_skips_bridge_and_reserved() {
        let (pool, receivers) = BranchPool::new(3);
        assert_eq!(receivers.len(), 4);
        assert_eq!(pool.capacity(), 3);

        assert_eq!(pool.allocate(), Some(BranchId::new(1)));
        assert_eq!(pool.allocate(), Some(BranchId::new(2)));
        assert_eq!(pool.allocate(), Some(BranchId::new(3)));
        assert_eq!(pool.allocate(), None);

        assert!(pool.unreserve(BranchId::new(2)));
        assert!(!pool.unreserve(BranchId::new(2)));
        assert_eq!(pool.allocate(), Some(BranchId::new(2)));
    }

    #[test]
    fn test_allocate_skips_non_closed_branch() {
        let (pool, _receivers) = BranchPool::new(2);
        pool.status(BranchId::new(1)).unwrap().begin_session();
        assert_eq!(pool.allocate(), Some(BranchId::new(2)));
    }

    #[test]
    fn test_allocate_clears_previous_session_data() {
        let (pool, _receivers) = BranchPool::new(1);
        let id = pool.allocate().unwrap();
        pool.set_callback(id, Some(Arc::new(|_: BranchId| {})));
        pool.lock()[id.index()].tag = Some(Arc::new(5u32));
        pool.unreserve(id);

        let again = pool.allocate().unwrap();
        assert_eq!(again, id);
        let slots = pool.lock();
        assert!(slots[id.index()].callback.is_none());
        assert!(slots[id.index()].tag.is_none());
    }

    #[test]
    fn test_ended_frees_matching_session_only() {
        let (pool, _receivers) = BranchPool::new(1);
        let id = pool.allocate().unwrap();
        let status = pool.status(id).unwrap();
        let generation = status.begin_session();
        status.transition(&[BranchState::Open], BranchState::Playing).unwrap();

        // Reopened before the dispatcher ran: reservation must survive
        status.begin_session();
        pool.on_ended(id, generation);
        assert!(pool.lock()[id.index()].reserved);

        status.close();
        let current = status.generation();
        pool.on_ended(id, current);
        assert!(!pool.lock()[id.index()].reserved);
    }

    #[test]
    fn test_late_end_of_stream_does_not_touch_next_owner() {
        let (pool, _receivers) = BranchPool::new(1);
        let id = pool.allocate().unwrap();
        let status = pool.status(id).unwrap();
        let generation = status.begin_session();
        status.transition(&[BranchState::Open], BranchState::Playing).unwrap();
        assert!(status.finish(generation));

        // First owner releases before the dispatcher ran, a second owner takes over
        pool.unreserve(id);
        assert_eq!(pool.allocate(), Some(id));
        pool.set_callback(id, Some(Arc::new(|_: BranchId| {})));

        assert!(pool.on_ended(id, generation).is_none());
        assert!(pool.lock()[id.index()].reserved);
        assert_eq!(pool.allocate(), None);
    }

    #[test]
    fn test_end_of_stream_after_release_is_ignored() {
        let (pool, _receivers) = BranchPool::new(1);
        let id = pool.allocate().unwrap();
        pool.set_callback(id, Some(Arc::new(|_: BranchId| {})));
        let status = pool.status(id).unwrap();
        let generation = status.begin_session();
        status.close();
        pool.unreserve(id);

        assert!(pool.on_ended(id, generation).is_none());
    }

    #[test]
    fn test_generation_order_survives_wraparound() {
        assert!(opened_after(1, 0));
        assert!(opened_after(0, u32::MAX));
        assert!(!opened_after(5, 5));
        assert!(!opened_after(4, 5));
    }

    #[test]
    fn test_concurrent_allocate_is_distinct() {
        let (pool, _receivers) = BranchPool::new(16);
        let pool = Arc::new(pool);

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let pool = Arc::clone(&pool);
                std::thread::spawn(move || pool.allocate())
            })
            .collect();

        let mut ids: Vec<_> = handles
            .into_iter()
            .map(|h| h.join().unwrap().unwrap())
            .collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 16);
        assert_eq!(pool.allocate(), None);
    }
}
