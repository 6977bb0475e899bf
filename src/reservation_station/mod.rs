//! Reservation stations.
//!
//! A station holds one dynamic instruction from issue to retirement. Its lifecycle is driven by
//! [`Wake`] tokens delivered through the CPU's scheduler:
//!
//! `Free -> Decoding -> AwaitingDependencies -> Executing -> WritingBack -> Resetting -> Free`
//!
//! Issue, execution timing, writeback and retirement are common to every station. The ALU and
//! memory specialisations supply operand decoding, the extra dependencies a station waits on, and
//! the execute step itself.

mod alu;
mod mem;

use serde::{Serialize, Serializer};
use std::fmt;
use strum::Display;
use tracing::debug;

use crate::{
    cdb::{BusLane, Snooper},
    cpu::{Cpu, Wake},
    error::SimError,
    execution_unit::{FuId, StationKind, UnitClass},
    hazard::HazardKind,
    inst::{Instruction, Operand, Reg, Value},
    regs::Cell,
    sched::{AllOf, Race, Time},
    trace::TracedInstruction,
};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StationId {
    pub class: UnitClass,
    pub index: u16,
}

impl StationId {
    pub fn new(class: UnitClass, index: u16) -> Self {
        Self { class, index }
    }
}

impl fmt::Display for StationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.class.station_prefix(), self.index + 1)
    }
}

impl Serialize for StationId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Producer reference held by renamed registers and pending operands.
///
/// The generation is bumped on every issue, so a tag naming an earlier occupant of the same
/// station never matches the current one.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct Tag {
    pub station: StationId,
    pub generation: u32,
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.station, self.generation)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Display)]
pub enum StationState {
    Free,
    Decoding,
    AwaitingDependencies,
    Executing,
    WritingBack,
    Resetting,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub(crate) enum OperandSlot {
    #[default]
    Unused,
    Pending,
    Ready(Value),
}

impl OperandSlot {
    fn value(self) -> Value {
        match self {
            OperandSlot::Ready(v) => v,
            OperandSlot::Unused => 0,
            OperandSlot::Pending => unreachable!("operand consumed before it was ready"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Station {
    pub id: StationId,
    generation: u32,
    state: StationState,
    inst: Option<TracedInstruction>,
    operands: [OperandSlot; 2],
    deps: AllOf,
    fu: Option<FuId>,
    fu_wait_since: Option<Time>,
    lane: Option<BusLane>,
    bus_wait_since: Option<Time>,
    result: Option<Value>,
    address: Option<Value>,
}

impl Station {
    pub fn new(id: StationId) -> Self {
        Self {
            id,
            generation: 0,
            state: StationState::Free,
            inst: None,
            operands: Default::default(),
            deps: AllOf::default(),
            fu: None,
            fu_wait_since: None,
            lane: None,
            bus_wait_since: None,
            result: None,
            address: None,
        }
    }

    pub fn tag(&self) -> Tag {
        Tag {
            station: self.id,
            generation: self.generation,
        }
    }

    pub fn state(&self) -> StationState {
        self.state
    }

    pub fn is_busy(&self) -> bool {
        self.state != StationState::Free
    }

    pub fn instruction(&self) -> Option<&TracedInstruction> {
        self.inst.as_ref()
    }

    fn reset(&mut self) {
        *self = Station {
            generation: self.generation,
            ..Station::new(self.id)
        };
    }
}

impl Cpu {
    pub(crate) fn station(&self, id: StationId) -> &Station {
        &self.stations[id.class][id.index as usize]
    }

    pub(crate) fn station_mut(&mut self, id: StationId) -> &mut Station {
        &mut self.stations[id.class][id.index as usize]
    }

    fn traced_mut(&mut self, id: StationId) -> Result<&mut TracedInstruction, SimError> {
        self.station_mut(id)
            .inst
            .as_mut()
            .ok_or(SimError::StationIdle(id))
    }

    fn instruction_of(&self, id: StationId) -> Result<Instruction, SimError> {
        self.station(id)
            .inst
            .as_ref()
            .map(|t| t.inst.clone())
            .ok_or(SimError::StationIdle(id))
    }

    fn unsupported(id: StationId, inst: &Instruction) -> SimError {
        SimError::UnsupportedInstruction {
            station: id,
            inst: inst.to_string(),
        }
    }

    /// Attach `traced` to station `id`, decode its operands and rename its destination.
    ///
    /// Everything up to and including the rename happens before this returns, so the next issued
    /// instruction already sees this station as the producer.
    pub(crate) fn issue(
        &mut self,
        id: StationId,
        mut traced: TracedInstruction,
    ) -> Result<Tag, SimError> {
        let now = self.sched.now();
        if traced.inst.unit_class() != Some(id.class) {
            return Err(Self::unsupported(id, &traced.inst));
        }

        traced.trace.issued = Some(now);
        traced.trace.station = Some(id);

        let st = self.station_mut(id);
        debug_assert_eq!(st.state, StationState::Free);
        st.generation += 1;
        st.state = StationState::Decoding;
        st.inst = Some(traced);
        let tag = st.tag();

        match id.class.station_kind() {
            StationKind::Alu => self.decode_alu(id, tag)?,
            StationKind::Mem => self.decode_mem(id, tag)?,
        }

        self.station_mut(id).state = StationState::AwaitingDependencies;
        self.request_fu(id);
        if id.class.station_kind() == StationKind::Mem {
            self.request_queue_turn(id);
        }

        if self.station(id).deps.is_done() {
            self.dependencies_resolved(id)?;
        }
        Ok(tag)
    }

    /// Read `operand` into `slot`. Immediates and ready registers arrive after one decode cycle; a
    /// register with a pending producer is snooped on the CDB.
    fn read_operand(&mut self, id: StationId, slot: usize, operand: Operand) -> Result<(), SimError> {
        let now = self.sched.now();
        let ready = match operand {
            Operand::Imm(v) => Some(v),
            Operand::Reg(reg) => match self.regs.get(reg)? {
                Cell::Value(v) => Some(v),
                Cell::Producer(tag) => {
                    debug!(clk = now, unit = %id, "RAW hazard: {reg} is produced by {}", tag.station);
                    self.cdb.snoop(
                        tag,
                        Snooper::Operand {
                            station: id,
                            slot,
                            reg,
                            since: now,
                        },
                    );
                    None
                }
            },
        };

        let st = self.station_mut(id);
        st.operands[slot] = OperandSlot::Pending;
        st.deps.push();
        if let Some(value) = ready {
            self.sched.timeout(
                1,
                Wake::OperandReady {
                    station: id,
                    slot,
                    value,
                },
            );
        }
        Ok(())
    }

    pub(crate) fn on_operand_ready(
        &mut self,
        id: StationId,
        slot: usize,
        value: Value,
    ) -> Result<(), SimError> {
        self.station_mut(id).operands[slot] = OperandSlot::Ready(value);
        self.dependency_met(id)
    }

    pub(crate) fn on_operand_snooped(
        &mut self,
        id: StationId,
        slot: usize,
        value: Value,
        register: Reg,
        producer: StationId,
        since: Time,
    ) -> Result<(), SimError> {
        let now = self.sched.now();
        debug!(clk = now, unit = %id, "RAW hazard solved: {register} = {value} from {producer}");
        self.traced_mut(id)?
            .trace
            .log_hazard(HazardKind::Raw { register, producer }, since, now);
        self.on_operand_ready(id, slot, value)
    }

    fn request_fu(&mut self, id: StationId) {
        let now = self.sched.now();
        match self.fus[id.class].acquire(id) {
            Race::Won(fu) => self.station_mut(id).fu = Some(fu),
            Race::Lost => {
                debug!(clk = now, unit = %id, "Structural hazard: no {} FU available", id.class);
                let st = self.station_mut(id);
                st.fu_wait_since = Some(now);
                st.deps.push();
            }
        }
    }

    pub(crate) fn on_fu_granted(&mut self, id: StationId, fu: FuId) -> Result<(), SimError> {
        let now = self.sched.now();
        let st = self.station_mut(id);
        st.fu = Some(fu);
        let since = st.fu_wait_since.take().unwrap_or(now);
        debug!(clk = now, unit = %id, "Structural hazard solved: obtained {fu}");
        self.traced_mut(id)?
            .trace
            .log_hazard(HazardKind::FuUnavailable { assigned: fu }, since, now);
        self.dependency_met(id)
    }

    fn dependency_met(&mut self, id: StationId) -> Result<(), SimError> {
        if self.station_mut(id).deps.complete() {
            self.dependencies_resolved(id)?;
        }
        Ok(())
    }

    fn dependencies_resolved(&mut self, id: StationId) -> Result<(), SimError> {
        debug!(clk = self.sched.now(), unit = %id, "All dependencies are ready");
        match id.class.station_kind() {
            StationKind::Alu => self.begin_execute(id),
            StationKind::Mem => self.resolve_address(id),
        }
    }

    fn begin_execute(&mut self, id: StationId) -> Result<(), SimError> {
        let now = self.sched.now();
        let fu = self.station(id).fu;
        let traced = self.traced_mut(id)?;
        traced.trace.start_execution = Some(now);
        traced.trace.fu = fu;
        let mnemonic = traced.inst.mnemonic();
        debug!(clk = now, unit = %id, "Starting execution of {}", traced.inst);

        self.station_mut(id).state = StationState::Executing;
        let latency = self.config.latency(mnemonic, id.class);
        self.sched.timeout(latency, Wake::ExecDone(id));
        Ok(())
    }

    pub(crate) fn on_exec_done(&mut self, id: StationId) -> Result<(), SimError> {
        let result = match id.class.station_kind() {
            StationKind::Alu => self.execute_alu(id)?,
            StationKind::Mem => self.execute_mem(id)?,
        };
        self.station_mut(id).result = result;
        self.writeback(id)
    }

    fn writeback(&mut self, id: StationId) -> Result<(), SimError> {
        let now = self.sched.now();
        self.traced_mut(id)?.trace.write_result = Some(now);
        self.station_mut(id).state = StationState::WritingBack;

        if self.station(id).result.is_none() {
            self.sched.timeout(1, Wake::WritebackDone(id));
            return Ok(());
        }

        match self.cdb.request(id) {
            Race::Won(lane) => self.on_bus_granted(id, lane),
            Race::Lost => {
                debug!(clk = now, unit = %id, "CDB conflict: not immediately available");
                self.station_mut(id).bus_wait_since = Some(now);
                Ok(())
            }
        }
    }

    pub(crate) fn on_bus_granted(&mut self, id: StationId, lane: BusLane) -> Result<(), SimError> {
        let now = self.sched.now();
        let st = self.station_mut(id);
        st.lane = Some(lane);
        let (tag, since, result) = (st.tag(), st.bus_wait_since.take(), st.result);

        if let Some(since) = since {
            self.traced_mut(id)?
                .trace
                .log_hazard(HazardKind::CdbUnavailable, since, now);
        }
        debug!(clk = now, unit = "CDB", "Writing {tag}: {result:?}");
        self.sched.timeout(1, Wake::WritebackDone(id));
        Ok(())
    }

    pub(crate) fn on_writeback_done(&mut self, id: StationId) -> Result<(), SimError> {
        let now = self.sched.now();
        let st = self.station_mut(id);
        let (tag, lane, result) = (st.tag(), st.lane.take(), st.result);

        if let (Some(lane), Some(value)) = (lane, result) {
            self.broadcast(tag, value);
            if let Some((next, lane)) = self.cdb.release(lane) {
                self.sched.wake_now(Wake::BusGranted {
                    station: next,
                    lane,
                });
            }
        }

        self.traced_mut(id)?.trace.written_result = Some(now);
        self.station_mut(id).state = StationState::Resetting;
        // Snoopers woken by the broadcast run before the station is handed back.
        self.sched.wake_now(Wake::Retire(id));
        Ok(())
    }

    fn broadcast(&mut self, tag: Tag, value: Value) {
        let now = self.sched.now();
        for snooper in self.cdb.broadcast(tag) {
            match snooper {
                Snooper::Register(reg) => {
                    if self.regs.settle(reg, tag, value) {
                        debug!(clk = now, unit = "RF", "{reg} <- {value} from {}", tag.station);
                    } else {
                        debug!(
                            clk = now,
                            unit = "RF",
                            "Not writing back {value} to {reg}: renamed to a younger producer"
                        );
                    }
                }
                Snooper::Operand {
                    station,
                    slot,
                    reg,
                    since,
                } => self.sched.wake_now(Wake::OperandSnooped {
                    station,
                    slot,
                    value,
                    register: reg,
                    producer: tag.station,
                    since,
                }),
                Snooper::Dispatch => self.sched.wake_now(Wake::BranchResolved(value)),
            }
        }
    }

    /// Record the instruction as retired and give the FU and the station back to their pools.
    pub(crate) fn retire(&mut self, id: StationId) -> Result<(), SimError> {
        let now = self.sched.now();
        let st = self.station_mut(id);
        let traced = st.inst.take().ok_or(SimError::StationIdle(id))?;
        let fu = st.fu.take();
        st.reset();

        debug!(clk = now, unit = %id, "Retired {}", traced.inst);
        self.retired.push(traced);

        if let Some(fu) = fu {
            if let Some((next, fu)) = self.fus[id.class].release(fu) {
                self.sched.wake_now(Wake::FuGranted { station: next, fu });
            }
        }
        if let Some(((), station)) = self.rs_pools[id.class].release(id) {
            self.sched.wake_now(Wake::StationGranted(station));
        }
        Ok(())
    }
}
