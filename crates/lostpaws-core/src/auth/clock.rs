use std::sync::atomic::{AtomicI64, Ordering};

use chrono::Utc;

/// Source of "now" for expiry checks, in seconds since the Unix epoch.
pub trait Clock: Send + Sync {
    fn now(&self) -> i64;
}

/// Wall-clock time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> i64 {
        Utc::now().timestamp()
    }
}

/// A clock that only moves when told to. Used for simulations and tests.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    pub fn new(now: i64) -> Self {
        Self {
            now: AtomicI64::new(now),
        }
    }

    pub fn set(&self, now: i64) {
        self.now.store(now, Ordering::SeqCst);
    }

    pub fn advance(&self, secs: i64) {
        self.now.fetch_add(secs, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// A fixed clock that parks the first caller of `now()` until released.
///
/// Lets a test interleave another thread's write between a reader's snapshot
/// of the session and its decision.
#[cfg(test)]
pub(crate) struct GatedClock {
    now: i64,
    armed: std::sync::atomic::AtomicBool,
    entered: std::sync::Barrier,
    resume: std::sync::Barrier,
}

#[cfg(test)]
impl GatedClock {
    pub(crate) fn new(now: i64) -> Self {
        Self {
            now,
            armed: std::sync::atomic::AtomicBool::new(true),
            entered: std::sync::Barrier::new(2),
            resume: std::sync::Barrier::new(2),
        }
    }

    /// Block until the parked caller is inside `now()`.
    pub(crate) fn wait_entered(&self) {
        self.entered.wait();
    }

    /// Let the parked caller continue.
    pub(crate) fn release(&self) {
        self.resume.wait();
    }
}

#[cfg(test)]
impl Clock for GatedClock {
    fn now(&self) -> i64 {
        if self.armed.swap(false, Ordering::SeqCst) {
            self.entered.wait();
            self.resume.wait();
        }
        self.now
    }
}
