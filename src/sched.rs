//! Discrete-event substrate.
//!
//! Every in-flight computation in the simulator is an explicit state machine. A computation suspends
//! by asking the [`Scheduler`] to deliver a wake token at some future instant, and is resumed when that
//! token is popped. Tokens scheduled for the same instant are delivered in the order they were
//! scheduled, which is what makes zero-delay races deterministic.

use std::{
    cmp::{Ordering, Reverse},
    collections::BinaryHeap,
};

/// Virtual time, in clock cycles.
pub type Time = u64;

#[derive(Debug, Clone)]
struct Scheduled<W> {
    at: Time,
    seq: u64,
    wake: W,
}

impl<W> PartialEq for Scheduled<W> {
    fn eq(&self, other: &Self) -> bool {
        self.at == other.at && self.seq == other.seq
    }
}

impl<W> Eq for Scheduled<W> {}

impl<W> PartialOrd for Scheduled<W> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<W> Ord for Scheduled<W> {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.at, self.seq).cmp(&(other.at, other.seq))
    }
}

#[derive(Debug, Clone)]
pub struct Scheduler<W> {
    now: Time,
    seq: u64,
    queue: BinaryHeap<Reverse<Scheduled<W>>>,
}

impl<W> Default for Scheduler<W> {
    fn default() -> Self {
        Self {
            now: 0,
            seq: 0,
            queue: BinaryHeap::new(),
        }
    }
}

impl<W> Scheduler<W> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn now(&self) -> Time {
        self.now
    }

    /// Resume `wake` after `delay` cycles. The clock saturates instead of wrapping.
    pub fn timeout(&mut self, delay: Time, wake: W) {
        let at = self.now.saturating_add(delay);
        self.queue.push(Reverse(Scheduled {
            at,
            seq: self.seq,
            wake,
        }));
        self.seq += 1;
    }

    /// Resume `wake` at the current instant, after everything already scheduled for it.
    pub fn wake_now(&mut self, wake: W) {
        self.timeout(0, wake);
    }

    /// Pop the next wake token, advancing the clock to its instant.
    pub fn next_wake(&mut self) -> Option<W> {
        let Reverse(scheduled) = self.queue.pop()?;
        debug_assert!(scheduled.at >= self.now, "virtual clock went backwards");
        self.now = scheduled.at;
        Some(scheduled.wake)
    }

}

/// Outcome of racing an acquisition against a zero-length timeout.
///
/// `Won` means the resource was granted without the clock moving; `Lost` means the requester has been
/// queued and will be woken when the resource is handed to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Race<T> {
    Won(T),
    Lost,
}

impl<T> Race<T> {
    pub fn won(self) -> Option<T> {
        match self {
            Race::Won(t) => Some(t),
            Race::Lost => None,
        }
    }
}

/// Wait-for-all combinator: counts outstanding events.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AllOf {
    outstanding: u32,
}

impl AllOf {
    pub fn push(&mut self) {
        self.outstanding += 1;
    }

    /// Mark one event as fired. Returns true once nothing is outstanding.
    pub fn complete(&mut self) -> bool {
        debug_assert!(self.outstanding > 0, "completed more events than were awaited");
        self.outstanding = self.outstanding.saturating_sub(1);
        self.outstanding == 0
    }

    pub fn is_done(&self) -> bool {
        self.outstanding == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_instant_is_fifo() {
        let mut sched = Scheduler::new();
        sched.timeout(2, 'a');
        sched.timeout(1, 'b');
        sched.timeout(2, 'c');
        sched.wake_now('d');

        let order = std::iter::from_fn(|| sched.next_wake().map(|w| (sched.now(), w)))
            .collect::<Vec<_>>();
        assert_eq!(order, vec![(0, 'd'), (1, 'b'), (2, 'a'), (2, 'c')]);
    }

    #[test]
    fn wake_now_queues_behind_current_instant() {
        let mut sched = Scheduler::new();
        sched.timeout(3, 1);
        sched.timeout(3, 2);

        assert_eq!(sched.next_wake(), Some(1));
        sched.wake_now(3);
        assert_eq!(sched.next_wake(), Some(2));
        assert_eq!(sched.next_wake(), Some(3));
        assert_eq!(sched.now(), 3);
        assert_eq!(sched.next_wake(), None);
    }

    #[test]
    fn huge_delays_do_not_wrap() {
        let mut sched = Scheduler::new();
        sched.timeout(Time::MAX - 1, 'a');
        assert_eq!(sched.next_wake(), Some('a'));
        sched.timeout(5, 'b');
        sched.wake_now('c');
        assert_eq!(sched.next_wake(), Some('c'));
        assert_eq!(sched.next_wake(), Some('b'));
        assert_eq!(sched.now(), Time::MAX);
    }

    #[test]
    fn all_of_counts_down() {
        let mut all = AllOf::default();
        assert!(all.is_done());
        all.push();
        all.push();
        assert!(!all.complete());
        assert!(all.complete());
        assert!(all.is_done());
    }
}
