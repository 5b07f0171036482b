//! Time as a capability.
//!
//! All waiting in the harness goes through [`Clock`] so tests can run a ten second boot timeout
//! in microseconds with [`ManualClock`].

use std::cell::{Cell, RefCell};
use std::time::{Duration, Instant};

pub trait Clock {
    fn now(&self) -> Instant;

    /// Block the calling thread for `duration`.
    fn sleep(&self, duration: Duration);
}

impl<C: Clock + ?Sized> Clock for &C {
    fn now(&self) -> Instant {
        (**self).now()
    }

    fn sleep(&self, duration: Duration) {
        (**self).sleep(duration)
    }
}

/// Wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

type Action = Box<dyn FnOnce()>;

/// Simulated time that only moves when someone sleeps.
///
/// Actions registered with [`ManualClock::at`] run as soon as a `sleep` carries simulated time
/// to (or past) their offset, in offset order. This is how tests make "the guest prints `DavOS`
/// two seconds after launch" happen without a guest.
pub struct ManualClock {
    origin: Instant,
    elapsed: Cell<Duration>,
    sleeps: Cell<u64>,
    pending: RefCell<Vec<(Duration, Action)>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            elapsed: Cell::new(Duration::ZERO),
            sleeps: Cell::new(0),
            pending: RefCell::new(Vec::new()),
        }
    }

    /// Run `action` once simulated time reaches `offset` from the clock's creation.
    pub fn at(&self, offset: Duration, action: impl FnOnce() + 'static) {
        let mut pending = self.pending.borrow_mut();
        pending.push((offset, Box::new(action)));
        // Stable sort keeps registration order for equal offsets.
        pending.sort_by_key(|(at, _)| *at);
    }

    /// Simulated time since creation.
    pub fn elapsed(&self) -> Duration {
        self.elapsed.get()
    }

    /// Number of `sleep` calls observed.
    pub fn sleep_count(&self) -> u64 {
        self.sleeps.get()
    }

    fn fire_due(&self) {
        let now = self.elapsed.get();
        let due: Vec<Action> = {
            let mut pending = self.pending.borrow_mut();
            let split = pending.partition_point(|(at, _)| *at <= now);
            pending.drain(..split).map(|(_, action)| action).collect()
        };
        for action in due {
            action();
        }
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ManualClock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManualClock")
            .field("elapsed", &self.elapsed.get())
            .field("sleeps", &self.sleeps.get())
            .field("pending", &self.pending.borrow().len())
            .finish()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.origin + self.elapsed.get()
    }

    fn sleep(&self, duration: Duration) {
        self.sleeps.set(self.sleeps.get() + 1);
        self.elapsed.set(self.elapsed.get() + duration);
        self.fire_due();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::rc::Rc;

    #[test]
    fn manual_clock_advances_only_on_sleep() {
        let clock = ManualClock::new();
        let start = clock.now();
        assert_eq!(clock.now(), start);

        clock.sleep(Duration::from_millis(1500));
        assert_eq!(clock.now() - start, Duration::from_millis(1500));
        assert_eq!(clock.sleep_count(), 1);
    }

    #[test]
    fn scheduled_actions_fire_in_offset_order_once_due() {
        let clock = ManualClock::new();
        let log = Rc::new(RefCell::new(Vec::new()));

        let l = Rc::clone(&log);
        clock.at(Duration::from_secs(3), move || l.borrow_mut().push("late"));
        let l = Rc::clone(&log);
        clock.at(Duration::from_secs(1), move || l.borrow_mut().push("early"));

        clock.sleep(Duration::from_millis(500));
        assert!(log.borrow().is_empty());

        clock.sleep(Duration::from_millis(500));
        assert_eq!(*log.borrow(), vec!["early"]);

        clock.sleep(Duration::from_secs(5));
        assert_eq!(*log.borrow(), vec!["early", "late"]);
    }
}
