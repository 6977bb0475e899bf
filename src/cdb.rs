use hashbrown::HashMap;

use crate::{
    inst::Reg,
    pool::Pool,
    reservation_station::{StationId, Tag},
    sched::{Race, Time},
};

/// Someone waiting for a producer's broadcast.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Snooper {
    /// The register cell renamed to the producer.
    Register(Reg),
    /// An operand slot of a station that read `reg` while it was pending.
    Operand {
        station: StationId,
        slot: usize,
        reg: Reg,
        since: Time,
    },
    /// Fetch, stalled on a control-flow instruction.
    Dispatch,
}

/// One of the `width` simultaneous writers the bus admits.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct BusLane(pub usize);

#[derive(Debug, Clone)]
pub struct Cdb {
    lanes: Pool<BusLane, StationId>,
    subscribers: HashMap<Tag, Vec<Snooper>>,
}

impl Cdb {
    pub fn new(width: usize) -> Self {
        Self {
            lanes: Pool::new((0..width).map(BusLane)),
            subscribers: HashMap::new(),
        }
    }

    /// Ask for a lane to broadcast on. A lost race queues `writer` behind earlier writers.
    pub fn request(&mut self, writer: StationId) -> Race<BusLane> {
        self.lanes.acquire(writer)
    }

    /// Give a lane back, possibly straight to the next queued writer.
    #[must_use]
    pub fn release(&mut self, lane: BusLane) -> Option<(StationId, BusLane)> {
        self.lanes.release(lane)
    }

    pub fn snoop(&mut self, tag: Tag, snooper: Snooper) {
        self.subscribers.entry(tag).or_default().push(snooper);
    }

    /// Take every snooper registered for `tag`, in subscription order.
    pub fn broadcast(&mut self, tag: Tag) -> Vec<Snooper> {
        self.subscribers.remove(&tag).unwrap_or_default()
    }

    pub fn writers(&self) -> usize {
        self.lanes.in_use()
    }

    pub fn peak_writers(&self) -> usize {
        self.lanes.peak_in_use()
    }

    pub fn subscriptions(&self) -> usize {
        self.subscribers.values().map(Vec::len).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution_unit::UnitClass;

    #[test]
    fn test_fan_out_clears_subscribers() {
        let mut cdb = Cdb::new(1);
        let tag = Tag {
            station: StationId::new(UnitClass::Alu, 0),
            generation: 1,
        };
        let reader = StationId::new(UnitClass::Mem, 0);

        cdb.snoop(tag, Snooper::Register(Reg::gp(1)));
        cdb.snoop(
            tag,
            Snooper::Operand {
                station: reader,
                slot: 0,
                reg: Reg::gp(1),
                since: 2,
            },
        );
        cdb.snoop(tag, Snooper::Dispatch);
        assert_eq!(cdb.subscriptions(), 3);

        let fired = cdb.broadcast(tag);
        assert_eq!(fired.len(), 3);
        assert_eq!(fired[0], Snooper::Register(Reg::gp(1)));
        assert_eq!(fired[2], Snooper::Dispatch);
        assert!(cdb.broadcast(tag).is_empty());
    }

    #[test]
    fn test_width_bounds_writers() {
        let mut cdb = Cdb::new(2);
        let a = StationId::new(UnitClass::Alu, 0);
        let b = StationId::new(UnitClass::Alu, 1);
        let c = StationId::new(UnitClass::Mem, 0);

        let la = cdb.request(a).won().unwrap();
        assert!(cdb.request(b).won().is_some());
        assert_eq!(cdb.writers(), 2);
        assert_eq!(cdb.request(c), Race::Lost);
        assert_eq!(cdb.release(la), Some((c, la)));
        assert_eq!(cdb.peak_writers(), 2);
    }
}
