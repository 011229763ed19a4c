//! Periodic real-time driver
//!
//! A dedicated thread calls [`Tick::tick`] once per period on absolute
//! deadlines, so sleep jitter does not accumulate into drift. The ticker owns
//! the graph while attached; [`Ticker::detach`] joins the thread and hands the
//! graph back, which guarantees no tick runs once teardown starts.

use crate::error::{Error, Result};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Periods behind schedule before the deadline is re-anchored to now
const MAX_LAG_PERIODS: u32 = 4;

/// Work performed once per period
pub trait Tick: Send + 'static {
    fn tick(&mut self);
}

/// Counters shared with the control plane
#[derive(Debug, Default)]
pub struct TickerStats {
    ticks: AtomicU64,
    late: AtomicU64,
}

impl TickerStats {
    /// Ticks executed since creation
    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::Relaxed)
    }

    /// Ticks that started after their deadline
    pub fn late_ticks(&self) -> u64 {
        self.late.load(Ordering::Relaxed)
    }
}

/// Owner of the real-time thread
pub struct Ticker<T: Tick> {
    period: Duration,
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<T>>,
    stats: Arc<TickerStats>,
}

impl<T: Tick> Ticker<T> {
    /// Create a detached ticker
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            stop: Arc::new(AtomicBool::new(false)),
            thread: None,
            stats: Arc::new(TickerStats::default()),
        }
    }

    /// Tick period
    pub fn period(&self) -> Duration {
        self.period
    }

    /// Shared counters
    pub fn stats(&self) -> Arc<TickerStats> {
        Arc::clone(&self.stats)
    }

    /// True while a graph is attached
    pub fn is_attached(&self) -> bool {
        self.thread.is_some()
    }

    /// Start ticking `graph` on a new thread.
    ///
    /// # Errors
    /// Already attached, or the thread could not be spawned. On error the
    /// graph is dropped.
    pub fn attach(&mut self, mut graph: T) -> Result<()> {
        if self.thread.is_some() {
            return Err(Error::Wiring("Ticker already attached".to_string()));
        }

        self.stop.store(false, Ordering::Release);
        let stop = Arc::clone(&self.stop);
        let stats = Arc::clone(&self.stats);
        let period = self.period;

        let thread = std::thread::Builder::new()
            .name("mixd-ticker".to_string())
            .spawn(move || {
                let mut deadline = Instant::now();
                while !stop.load(Ordering::Acquire) {
                    graph.tick();
                    stats.ticks.fetch_add(1, Ordering::Relaxed);

                    deadline += period;
                    let now = Instant::now();
                    if now < deadline {
                        std::thread::sleep(deadline - now);
                    } else {
                        stats.late.fetch_add(1, Ordering::Relaxed);
                        if now - deadline > period * MAX_LAG_PERIODS {
                            deadline = now;
                        }
                    }
                }
                graph
            })
            .map_err(|e| Error::Wiring(format!("Failed to spawn ticker thread: {}", e)))?;

        info!("Ticker attached ({:?} period)", self.period);
        self.thread = Some(thread);
        Ok(())
    }

    /// Stop ticking and return the graph once the thread has exited.
    ///
    /// Returns None if nothing was attached or the thread panicked.
    pub fn detach(&mut self) -> Option<T> {
        let thread = self.thread.take()?;
        self.stop.store(true, Ordering::Release);

        match thread.join() {
            Ok(graph) => {
                let late = self.stats.late_ticks();
                if late > 0 {
                    warn!("Ticker ran {} late ticks", late);
                }
                debug!(
                    "Ticker detached after {} ticks ({} late)",
                    self.stats.ticks(),
                    late
                );
                Some(graph)
            }
            Err(_) => {
                warn!("Ticker thread panicked");
                None
            }
        }
    }
}

impl<T: Tick> Drop for Ticker<T> {
    fn drop(&mut self) {
        self.detach();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Counter(u64);

    impl Tick for Counter {
        fn tick(&mut self) {
            self.0 += 1;
        }
    }

    #[test]
    fn test_attach_detach_returns_graph() {
        let mut ticker = Ticker::new(Duration::from_millis(1));
        ticker.attach(Counter(0)).unwrap();
        assert!(ticker.is_attached());

        std::thread::sleep(Duration::from_millis(30));
        let counter = ticker.detach().unwrap();
        assert!(!ticker.is_attached());
        assert!(counter.0 > 0);
        assert_eq!(counter.0, ticker.stats().ticks());
    }

    #[test]
    fn test_double_attach_rejected() {
        let mut ticker = Ticker::new(Duration::from_millis(5));
        ticker.attach(Counter(0)).unwrap();
        assert!(ticker.attach(Counter(0)).is_err());
        ticker.detach();
    }

    #[test]
    fn test_detach_without_attach() {
        let mut ticker: Ticker<Counter> = Ticker::new(Duration::from_millis(5));
        assert!(ticker.detach().is_none());
    }

    #[test]
    fn test_no_ticks_after_detach() {
        let mut ticker = Ticker::new(Duration::from_millis(1));
        ticker.attach(Counter(0)).unwrap();
        std::thread::sleep(Duration::from_millis(10));
        ticker.detach();

        let after = ticker.stats().ticks();
        std::thread::sleep(Duration::from_millis(10));
        assert_eq!(ticker.stats().ticks(), after);
    }

    #[test]
    fn test_reattach_after_detach() {
        let mut ticker = Ticker::new(Duration::from_millis(1));
        ticker.attach(Counter(0)).unwrap();
        let counter = ticker.detach().unwrap();
        ticker.attach(counter).unwrap();
        assert!(ticker.detach().is_some());
    }
}
