//! Memory disambiguation.
//!
//! Memory stations enter a bounded access queue in issue order. Only the head of the queue may
//! resolve its address; resolving moves it to the in-flight set. Before touching memory an access
//! waits for every older in-flight access it conflicts with: a load for older stores to the same
//! address, a store for any older access to the same address.

use std::collections::VecDeque;

use crate::{inst::Value, queue::Queue, reservation_station::StationId, sched::Race};

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
struct Access {
    station: StationId,
    /// Fetch sequence number, used for age comparison.
    seq: u64,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
struct InFlight {
    access: Access,
    address: Value,
    is_store: bool,
}

/// Wakes produced when the head of the queue resolves its address.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Resolution {
    /// A blocked enqueue that now has a slot.
    pub admitted: Option<StationId>,
    /// The new head, if it was already waiting for its turn.
    pub turn: Option<StationId>,
}

#[derive(Debug, Clone)]
pub struct AccessQueue {
    queue: Queue<Access>,
    blocked: VecDeque<Access>,
    turn_waiters: Vec<StationId>,
    in_flight: Vec<InFlight>,
    parked: Vec<StationId>,
    peak_depth: usize,
}

impl AccessQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: Queue::new(capacity),
            blocked: VecDeque::new(),
            turn_waiters: Vec::new(),
            in_flight: Vec::new(),
            parked: Vec::new(),
            peak_depth: 0,
        }
    }

    /// Reserve a slot for `station`. A lost race leaves it blocked until a head resolves.
    pub fn enqueue(&mut self, station: StationId, seq: u64) -> Race<()> {
        let access = Access { station, seq };
        if self.blocked.is_empty() && self.queue.try_push(access).is_none() {
            self.peak_depth = self.peak_depth.max(self.queue.len());
            return Race::Won(());
        }

        self.blocked.push_back(access);
        Race::Lost
    }

    pub fn is_head(&self, station: StationId) -> bool {
        self.queue.front().map_or(false, |a| a.station == station)
    }

    /// Returns true if `station` already holds the head; otherwise it is woken once it does.
    pub fn wait_turn(&mut self, station: StationId) -> bool {
        if self.is_head(station) {
            return true;
        }

        debug_assert!(self.queue.iter().any(|a| a.station == station));
        self.turn_waiters.push(station);
        false
    }

    /// Pop the head into the in-flight set with its resolved address.
    pub fn resolve(&mut self, station: StationId, address: Value, is_store: bool) -> Resolution {
        let access = self
            .queue
            .try_pop()
            .expect("address resolved with an empty access queue");
        assert_eq!(access.station, station, "address resolved out of order");

        self.in_flight.push(InFlight {
            access,
            address,
            is_store,
        });

        let mut resolution = Resolution::default();
        if let Some(next) = self.blocked.pop_front() {
            let rejected = self.queue.try_push(next);
            debug_assert!(rejected.is_none());
            self.peak_depth = self.peak_depth.max(self.queue.len());
            resolution.admitted = Some(next.station);
        }

        if let Some(head) = self.queue.front().map(|a| a.station) {
            if let Some(i) = self.turn_waiters.iter().position(|s| *s == head) {
                self.turn_waiters.swap_remove(i);
                resolution.turn = Some(head);
            }
        }

        resolution
    }

    /// Whether an older in-flight access to the same address must complete first.
    pub fn must_wait(&self, station: StationId) -> bool {
        let me = self
            .in_flight
            .iter()
            .find(|e| e.access.station == station)
            .expect("conflict check for an access that is not in flight");

        self.in_flight.iter().any(|other| {
            other.access.seq < me.access.seq
                && other.address == me.address
                && (me.is_store || other.is_store)
        })
    }

    /// Wait for the next completion before checking again.
    pub fn park(&mut self, station: StationId) {
        self.parked.push(station);
    }

    /// Remove a finished access. Every parked access is returned to re-check its conflicts.
    pub fn complete(&mut self, station: StationId) -> Vec<StationId> {
        let i = self
            .in_flight
            .iter()
            .position(|e| e.access.station == station)
            .expect("completed an access that is not in flight");
        self.in_flight.remove(i);

        std::mem::take(&mut self.parked)
    }

    pub fn depth(&self) -> usize {
        self.queue.len()
    }

    pub fn peak_depth(&self) -> usize {
        self.peak_depth
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    pub fn is_drained(&self) -> bool {
        self.queue.is_empty() && self.blocked.is_empty() && self.in_flight.is_empty()
    }
}
