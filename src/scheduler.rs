//! **(added)** The `Scheduler` collaborator (§2, §4.7, §4.9): an
//! event-loop-agnostic "call me again later" facility the Async Connect
//! Engine and Handshake Driver use instead of owning a thread. Grounded in
//! `p2p_node.rs`'s `spawn()` poll loop (`Poll::new()`, `Events::with_capacity`,
//! a bounded `poll()` timeout driving periodic housekeeping) — production
//! callers are expected to supply their own adapter over whatever event loop
//! they already run, mirroring the source's `g_timeout_add`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use mio::{Events, Poll};

pub type TimerId = u64;

/// Arranges for `cb` to run after `after` has elapsed, without the caller
/// owning a thread or a timer of its own. `Send + Sync` so `Arc<dyn
/// Scheduler>` can be captured into the `Send` closures `connect_async`
/// schedules across its own retry callbacks.
pub trait Scheduler: Send + Sync {
    fn schedule_after(&self, after: Duration, cb: Box<dyn FnOnce() + Send>) -> TimerId;
    fn cancel(&self, id: TimerId);
}

struct PendingTimer {
    id: TimerId,
    deadline: Instant,
    cb: Option<Box<dyn FnOnce() + Send>>,
}

/// A minimal single-threaded `Scheduler` backed by `mio::Poll`. Holds no
/// registered I/O sources of its own; `Poll` exists only so `tick` can sleep
/// for a bounded interval the same way the teacher's event loop does, rather
/// than busy-spinning.
pub struct PollScheduler {
    poll: Mutex<Poll>,
    timers: Mutex<Vec<PendingTimer>>,
    next_id: AtomicU64,
}

impl PollScheduler {
    pub fn new() -> std::io::Result<Self> {
        Ok(PollScheduler {
            poll: Mutex::new(Poll::new()?),
            timers: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        })
    }

    /// Sleeps until the next timer deadline or `max_wait`, whichever comes
    /// first, then fires every timer whose deadline has passed. Callers
    /// drive their own loop by invoking this repeatedly (the single-threaded
    /// cooperative model of §5).
    pub fn tick(&self, max_wait: Duration) {
        let wait = self
            .next_deadline()
            .map(|d| d.saturating_duration_since(Instant::now()).min(max_wait))
            .unwrap_or(max_wait);

        let mut events = Events::with_capacity(16);
        if let Ok(mut poll) = self.poll.lock() {
            let _ = poll.poll(&mut events, Some(wait));
        }

        self.fire_due();
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.timers.lock().ok()?.iter().map(|t| t.deadline).min()
    }

    fn fire_due(&self) {
        let now = Instant::now();
        let due: Vec<PendingTimer> = {
            let Ok(mut timers) = self.timers.lock() else {
                return;
            };
            let mut due = Vec::new();
            let mut remaining = Vec::with_capacity(timers.len());
            for t in timers.drain(..) {
                if t.deadline <= now {
                    due.push(t);
                } else {
                    remaining.push(t);
                }
            }
            *timers = remaining;
            due
        };

        for mut timer in due {
            if let Some(cb) = timer.cb.take() {
                cb();
            }
        }
    }
}

impl Scheduler for PollScheduler {
    fn schedule_after(&self, after: Duration, cb: Box<dyn FnOnce() + Send>) -> TimerId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let deadline = Instant::now() + after;
        if let Ok(mut timers) = self.timers.lock() {
            timers.push(PendingTimer { id, deadline, cb: Some(cb) });
        }
        id
    }

    fn cancel(&self, id: TimerId) {
        if let Ok(mut timers) = self.timers.lock() {
            timers.retain(|t| t.id != id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;
    use std::sync::Arc;

    #[test]
    fn fires_callback_after_deadline() {
        let scheduler = PollScheduler::new().unwrap();
        let fired = Arc::new(AtomicBool::new(false));
        let fired_cb = fired.clone();
        scheduler.schedule_after(Duration::from_millis(10), Box::new(move || {
            fired_cb.store(true, Ordering::SeqCst);
        }));

        let deadline = Instant::now() + Duration::from_millis(500);
        while !fired.load(Ordering::SeqCst) && Instant::now() < deadline {
            scheduler.tick(Duration::from_millis(20));
        }
        assert!(fired.load(Ordering::SeqCst));
    }

    #[test]
    fn cancel_prevents_firing() {
        let scheduler = PollScheduler::new().unwrap();
        let fired = Arc::new(AtomicBool::new(false));
        let fired_cb = fired.clone();
        let id = scheduler.schedule_after(Duration::from_millis(10), Box::new(move || {
            fired_cb.store(true, Ordering::SeqCst);
        }));
        scheduler.cancel(id);

        for _ in 0..5 {
            scheduler.tick(Duration::from_millis(20));
        }
        assert!(!fired.load(Ordering::SeqCst));
    }
}
