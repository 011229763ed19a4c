//! Real-time notifications and the event dispatcher thread
//!
//! The ticker thread never runs callbacks, logs or frees memory. It posts
//! compact [`BranchEvent`]s and retired chains into preallocated rings
//! ([`Outbox`]). The dispatcher thread drains them ([`Inbox`]) once per tick
//! period: it runs completion callbacks, stamps and broadcasts public
//! [`DaemonEvent`]s, and drops retired chains.

use crate::error::{Error, Result};
use crate::playback::branch::Chain;
use crate::playback::pool::BranchPool;
use mixd_common::{BranchId, DaemonEvent};
use ringbuf::{traits::*, HeapCons, HeapProd, HeapRb};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, error, info, trace, warn};

/// Notification posted by the real-time thread
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BranchEvent {
    /// Source exhausted; the branch moved `Playing → Closed` for `generation`
    Ended { branch: BranchId, generation: u32 },

    /// Looping source rewound; `restarts` counts the session total
    Restarted { branch: BranchId, restarts: u32 },
}

/// Producer side, owned by the graph
pub struct Outbox {
    events: HeapProd<BranchEvent>,
    retired: HeapProd<Box<Chain>>,
    lost: Arc<AtomicU64>,
}

/// Consumer side, owned by the dispatcher
pub struct Inbox {
    events: HeapCons<BranchEvent>,
    retired: HeapCons<Box<Chain>>,
    lost: Arc<AtomicU64>,
}

/// Create a connected outbox/inbox pair, each ring holding `capacity` entries
pub fn outbox(capacity: usize) -> (Outbox, Inbox) {
    let (events_prod, events_cons) = HeapRb::new(capacity.max(1)).split();
    let (retired_prod, retired_cons) = HeapRb::new(capacity.max(1)).split();
    let lost = Arc::new(AtomicU64::new(0));
    (
        Outbox {
            events: events_prod,
            retired: retired_prod,
            lost: Arc::clone(&lost),
        },
        Inbox {
            events: events_cons,
            retired: retired_cons,
            lost,
        },
    )
}

impl Outbox {
    /// Post a notification. A full ring loses it and bumps a counter.
    pub fn notify(&mut self, event: BranchEvent) {
        if self.events.try_push(event).is_err() {
            self.lost.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Hand a chain over for freeing off the real-time thread.
    pub fn retire(&mut self, chain: Box<Chain>) {
        if let Err(chain) = self.retired.try_push(chain) {
            // Ring full: freeing here is the only option left
            self.lost.fetch_add(1, Ordering::Relaxed);
            drop(chain);
        }
    }
}

impl Inbox {
    /// Next pending notification
    pub fn next_event(&mut self) -> Option<BranchEvent> {
        self.events.try_pop()
    }

    /// Drop every retired chain. Returns how many were freed.
    pub fn drain_retired(&mut self) -> usize {
        let mut freed = 0;
        while let Some(chain) = self.retired.try_pop() {
            drop(chain);
            freed += 1;
        }
        freed
    }

    /// Notifications or chains that did not fit their ring
    pub fn lost(&self) -> u64 {
        self.lost.load(Ordering::Relaxed)
    }
}

/// Convert a real-time notification into a public event
pub fn to_daemon_event(event: BranchEvent) -> DaemonEvent {
    let timestamp = chrono::Utc::now();
    match event {
        BranchEvent::Ended { branch, .. } => DaemonEvent::BranchEnded { branch, timestamp },
        BranchEvent::Restarted { branch, restarts } => DaemonEvent::BranchRestarted {
            branch,
            restarts,
            timestamp,
        },
    }
}

/// Housekeeping thread draining an [`Inbox`]
pub struct EventDispatcher {
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<Inbox>>,
}

impl EventDispatcher {
    /// Spawn the dispatcher thread, polling every `period`.
    pub fn start(
        mut inbox: Inbox,
        pool: Arc<BranchPool>,
        events: broadcast::Sender<DaemonEvent>,
        period: Duration,
    ) -> Result<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = Arc::clone(&stop);

        let thread = std::thread::Builder::new()
            .name("mixd-events".to_string())
            .spawn(move || {
                debug!("Event dispatcher started");
                loop {
                    // Read the flag first so a final pass runs after stop
                    let stopping = stop_flag.load(Ordering::Acquire);
                    dispatch_pending(&mut inbox, &pool, &events);
                    if stopping {
                        break;
                    }
                    std::thread::sleep(period);
                }
                debug!("Event dispatcher stopped");
                inbox
            })
            .map_err(|e| Error::Wiring(format!("Failed to spawn event dispatcher: {}", e)))?;

        Ok(Self {
            stop,
            thread: Some(thread),
        })
    }

    /// Run a last pass, stop the thread and hand the inbox back.
    pub fn stop(mut self) -> Option<Inbox> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> Option<Inbox> {
        self.stop.store(true, Ordering::Release);
        let thread = self.thread.take()?;
        match thread.join() {
            Ok(inbox) => {
                let lost = inbox.lost();
                if lost > 0 {
                    warn!("{} real-time notifications did not fit the event ring", lost);
                }
                Some(inbox)
            }
            Err(_) => {
                error!("Event dispatcher thread panicked");
                None
            }
        }
    }
}

impl Drop for EventDispatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// One dispatcher pass
fn dispatch_pending(inbox: &mut Inbox, pool: &BranchPool, events: &broadcast::Sender<DaemonEvent>) {
    while let Some(event) = inbox.next_event() {
        match event {
            BranchEvent::Ended { branch, generation } => {
                info!("{} reached end of stream", branch);
                if let Some(callback) = pool.on_ended(branch, generation) {
                    // Outside the pool lock: callbacks may call back into the daemon
                    callback(branch);
                }
            }
            BranchEvent::Restarted { branch, restarts } => {
                trace!("{} restarted ({} total)", branch, restarts);
            }
        }

        // No subscribers is normal
        let _ = events.send(to_daemon_event(event));
    }

    let freed = inbox.drain_retired();
    if freed > 0 {
        trace!("Freed {} retired chains", freed);
    }
}
