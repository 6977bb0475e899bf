use std::{collections::HashMap, fmt, rc::Rc};

use tracing::{debug, info, warn};

use crate::{
    cdb::{BusLane, Cdb, Snooper},
    config::CpuConfig,
    error::SimError,
    execution_unit::{FuId, UnitClass},
    hazard::HazardKind,
    inst::{Instruction, Reg, Value},
    lsq::AccessQueue,
    mem::Memory,
    pool::{PerClass, Pool},
    program::Program,
    regs::RegisterFile,
    reservation_station::{Station, StationId},
    sched::{Race, Scheduler, Time},
    trace::TracedInstruction,
};

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum HaltReason {
    /// A `HLT` instruction was fetched.
    Halt,
    /// PC ran off the end of the program.
    FetchOutOfRange,
}

#[derive(Debug, Clone)]
pub struct ExecResult {
    pub regs: RegisterFile,
    pub mem: Memory,
    pub cycles_taken: Time,
    pub insts_retired: usize,
    pub halt: HaltReason,
}

/// Something that runs a program to completion.
pub trait Machine: Sized {
    fn new(
        prog: Program,
        config: CpuConfig,
        in_regs: HashMap<Reg, Value>,
        in_mem: Memory,
    ) -> Result<Self, SimError>;

    fn exec_all(self) -> Result<ExecResult, SimError>;
}

/// Called with the live CPU whenever a `BREAK` is fetched.
#[derive(Clone)]
pub struct BreakpointHandler(Rc<dyn Fn(&Cpu)>);

impl BreakpointHandler {
    pub fn new(f: impl Fn(&Cpu) + 'static) -> Self {
        Self(Rc::new(f))
    }

    pub fn call(&self, cpu: &Cpu) {
        (self.0)(cpu)
    }
}

impl Default for BreakpointHandler {
    fn default() -> Self {
        Self::new(|cpu| {
            info!(clk = cpu.now(), unit = "CPU", "Breakpoint\n{cpu}");
            debug!(clk = cpu.now(), unit = "MEM", "\n{}", cpu.memory());
        })
    }
}

impl fmt::Debug for BreakpointHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("BreakpointHandler(..)")
    }
}

impl PartialEq for BreakpointHandler {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

/// Resumption points. Each variant continues one suspended computation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Wake {
    Fetch,
    StationGranted(StationId),
    QueueSlotGranted,
    BranchResolved(Value),
    OperandReady {
        station: StationId,
        slot: usize,
        value: Value,
    },
    OperandSnooped {
        station: StationId,
        slot: usize,
        value: Value,
        register: Reg,
        producer: StationId,
        since: Time,
    },
    FuGranted {
        station: StationId,
        fu: FuId,
    },
    QueueTurn(StationId),
    AccessRetry(StationId),
    ExecDone(StationId),
    BusGranted {
        station: StationId,
        lane: BusLane,
    },
    WritebackDone(StationId),
    Retire(StationId),
}

#[derive(Debug, Clone)]
enum DispatchState {
    Fetching,
    AwaitingStation {
        inst: TracedInstruction,
        since: Time,
    },
    AwaitingQueueSlot {
        station: StationId,
        inst: TracedInstruction,
        since: Time,
    },
    AwaitingBranch,
    Halted(HaltReason),
}

/// Tomasulo out-of-order core.
#[derive(Debug)]
pub struct Cpu {
    pub(crate) config: CpuConfig,
    program: Program,
    pub(crate) sched: Scheduler<Wake>,
    pub(crate) regs: RegisterFile,
    pub(crate) cdb: Cdb,
    pub(crate) fus: PerClass<Pool<FuId, StationId>>,
    pub(crate) rs_pools: PerClass<Pool<StationId, ()>>,
    pub(crate) stations: PerClass<Vec<Station>>,
    pub(crate) memory: Memory,
    pub(crate) lsq: AccessQueue,
    pub(crate) retired: Vec<TracedInstruction>,
    dispatch: DispatchState,
    next_seq: u64,
    breakpoint_handler: BreakpointHandler,
}

impl Cpu {
    pub fn new(program: Program, config: CpuConfig) -> Result<Self, SimError> {
        config.validate()?;
        program.check_resolved()?;

        let units = |n: usize| 0..n as u16;
        let mut cpu = Self {
            sched: Scheduler::new(),
            regs: RegisterFile::new(config.gp_registers, config.fp_registers),
            cdb: Cdb::new(config.cdb_width),
            fus: PerClass::from_fn(|class| {
                Pool::new(units(config.fu_count(class)).map(|i| FuId::new(class, i)))
            }),
            rs_pools: PerClass::from_fn(|class| {
                Pool::new(units(config.rs_count(class)).map(|i| StationId::new(class, i)))
            }),
            stations: PerClass::from_fn(|class| {
                units(config.rs_count(class))
                    .map(|i| Station::new(StationId::new(class, i)))
                    .collect()
            }),
            memory: Memory::new(config.mem_size),
            lsq: AccessQueue::new(config.mem_access_queue_size),
            retired: Vec::new(),
            dispatch: DispatchState::Fetching,
            next_seq: 0,
            breakpoint_handler: BreakpointHandler::default(),
            program,
            config,
        };

        info!(clk = 0, unit = "CPU", "Starting instruction dispatch");
        cpu.schedule_fetch();
        Ok(cpu)
    }

    pub fn with_breakpoint_handler(mut self, handler: BreakpointHandler) -> Self {
        self.breakpoint_handler = handler;
        self
    }

    pub fn now(&self) -> Time {
        self.sched.now()
    }

    pub fn config(&self) -> &CpuConfig {
        &self.config
    }

    pub fn registers(&self) -> &RegisterFile {
        &self.regs
    }

    pub fn registers_mut(&mut self) -> &mut RegisterFile {
        &mut self.regs
    }

    pub fn memory(&self) -> &Memory {
        &self.memory
    }

    pub fn memory_mut(&mut self) -> &mut Memory {
        &mut self.memory
    }

    /// Instructions in the order their writeback completed.
    pub fn retired(&self) -> &[TracedInstruction] {
        &self.retired
    }

    pub fn halt_reason(&self) -> Option<HaltReason> {
        match self.dispatch {
            DispatchState::Halted(reason) => Some(reason),
            _ => None,
        }
    }

    pub fn stations(&self) -> impl Iterator<Item = &Station> {
        self.stations.iter().flat_map(|(_, s)| s.iter())
    }

    pub fn busy_stations(&self) -> Vec<StationId> {
        self.stations()
            .filter(|s| s.is_busy())
            .map(|s| s.id)
            .collect()
    }

    pub fn peak_stations_in_use(&self, class: UnitClass) -> usize {
        self.rs_pools[class].peak_in_use()
    }

    pub fn peak_fus_in_use(&self, class: UnitClass) -> usize {
        self.fus[class].peak_in_use()
    }

    pub fn peak_cdb_writers(&self) -> usize {
        self.cdb.peak_writers()
    }

    pub fn peak_queue_depth(&self) -> usize {
        self.lsq.peak_depth()
    }

    /// Resume one suspended computation. Returns false once nothing is left to run.
    pub fn step(&mut self) -> Result<bool, SimError> {
        let Some(wake) = self.sched.next_wake() else {
            return Ok(false);
        };
        self.resume(wake)?;
        Ok(true)
    }

    /// Run until no further events are scheduled.
    pub fn run(&mut self) -> Result<ExecResult, SimError> {
        while self.step()? {}

        let halt = match self.halt_reason() {
            Some(halt) if self.busy_stations().is_empty() => halt,
            _ => {
                return Err(SimError::Deadlock {
                    cycle: self.now(),
                    busy: self.stuck_units(),
                })
            }
        };

        info!(
            clk = self.now(),
            unit = "CPU",
            "Stopped instruction dispatch, {} instructions retired",
            self.retired.len()
        );
        Ok(ExecResult {
            regs: self.regs.clone(),
            mem: self.memory.clone(),
            cycles_taken: self.now(),
            insts_retired: self.retired.len(),
            halt,
        })
    }

    /// Everything still holding or waiting for a resource, for the deadlock report.
    pub(crate) fn stuck_units(&self) -> Vec<String> {
        let mut stuck = self
            .busy_stations()
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>();
        if self.halt_reason().is_none() {
            stuck.push("dispatch".to_owned());
        }
        for (class, fus) in self.fus.iter() {
            if fus.waiting() > 0 {
                stuck.push(format!("{} waiting for a {class} FU", fus.waiting()));
            }
        }
        if self.cdb.writers() > 0 || self.cdb.subscriptions() > 0 {
            stuck.push(format!(
                "CDB ({} writers, {} snoopers)",
                self.cdb.writers(),
                self.cdb.subscriptions()
            ));
        }
        if !self.lsq.is_drained() {
            stuck.push(format!(
                "memory queue ({} queued, {} in flight)",
                self.lsq.depth(),
                self.lsq.in_flight()
            ));
        }
        stuck
    }

    fn resume(&mut self, wake: Wake) -> Result<(), SimError> {
        match wake {
            Wake::Fetch => self.fetch(),
            Wake::StationGranted(station) => self.on_station_granted(station),
            Wake::QueueSlotGranted => self.on_queue_slot_granted(),
            Wake::BranchResolved(pc) => {
                debug!(clk = self.now(), unit = "CPU", "New PC is {pc}");
                self.regs.set_pc(pc as usize);
                self.schedule_fetch();
                Ok(())
            }
            Wake::OperandReady {
                station,
                slot,
                value,
            } => self.on_operand_ready(station, slot, value),
            Wake::OperandSnooped {
                station,
                slot,
                value,
                register,
                producer,
                since,
            } => self.on_operand_snooped(station, slot, value, register, producer, since),
            Wake::FuGranted { station, fu } => self.on_fu_granted(station, fu),
            Wake::QueueTurn(station) => self.on_queue_turn(station),
            Wake::AccessRetry(station) => self.try_access(station),
            Wake::ExecDone(station) => self.on_exec_done(station),
            Wake::BusGranted { station, lane } => self.on_bus_granted(station, lane),
            Wake::WritebackDone(station) => self.on_writeback_done(station),
            Wake::Retire(station) => self.retire(station),
        }
    }

    fn schedule_fetch(&mut self) {
        debug!(clk = self.now(), unit = "CPU", "Fetching instruction at PC {}", self.regs.pc());
        self.dispatch = DispatchState::Fetching;
        self.sched.timeout(self.config.fetch_latency, Wake::Fetch);
    }

    fn fetch(&mut self) -> Result<(), SimError> {
        let now = self.now();
        let pc = self.regs.pc();
        let Some(inst) = self.program.fetch(pc).cloned() else {
            warn!(clk = now, unit = "CPU", "PC {pc} is out of range, use HLT instructions");
            self.dispatch = DispatchState::Halted(HaltReason::FetchOutOfRange);
            return Ok(());
        };

        // Every fetch gets its own copy so loop iterations keep separate traces.
        let traced = TracedInstruction::new(self.next_seq, pc, inst);
        self.next_seq += 1;
        debug!(clk = now, unit = "CPU", "Fetched {}", traced.inst);
        self.regs.set_pc(pc + 1);

        if let Instruction::Halt = traced.inst {
            info!(clk = now, unit = "CPU", "Halted at PC {pc}");
            self.dispatch = DispatchState::Halted(HaltReason::Halt);
            return Ok(());
        }

        if let Instruction::Breakpoint { handler } = &traced.inst {
            if let Some(handler) = handler.clone() {
                handler.call(self);
            }
            self.breakpoint_handler.clone().call(self);
            self.schedule_fetch();
            return Ok(());
        }

        self.request_station(traced)
    }

    fn request_station(&mut self, traced: TracedInstruction) -> Result<(), SimError> {
        let now = self.now();
        let Some(class) = traced.inst.unit_class() else {
            unreachable!("{} has no reservation station class", traced.inst);
        };

        match self.rs_pools[class].acquire(()) {
            Race::Won(station) => self.station_granted(station, traced),
            Race::Lost => {
                debug!(clk = now, unit = "CPU", "Structural hazard: no RS available for {}", traced.inst);
                self.dispatch = DispatchState::AwaitingStation {
                    inst: traced,
                    since: now,
                };
                Ok(())
            }
        }
    }

    fn on_station_granted(&mut self, station: StationId) -> Result<(), SimError> {
        let now = self.now();
        let DispatchState::AwaitingStation { mut inst, since } =
            std::mem::replace(&mut self.dispatch, DispatchState::Fetching)
        else {
            unreachable!("station handed to a dispatcher that was not waiting for one");
        };

        debug!(clk = now, unit = "CPU", "Structural hazard solved: obtained {station} for {}", inst.inst);
        inst.trace
            .log_hazard(HazardKind::RsUnavailable { assigned: station }, since, now);
        self.station_granted(station, inst)
    }

    /// Memory instructions also need a slot in the access queue before they can be issued.
    fn station_granted(
        &mut self,
        station: StationId,
        traced: TracedInstruction,
    ) -> Result<(), SimError> {
        let now = self.now();
        if station.class == UnitClass::Mem {
            if let Race::Lost = self.lsq.enqueue(station, traced.seq) {
                debug!(clk = now, unit = "MEM", "Structural hazard: memory access queue is full for {}", traced.inst);
                self.dispatch = DispatchState::AwaitingQueueSlot {
                    station,
                    inst: traced,
                    since: now,
                };
                return Ok(());
            }
        }
        self.dispatch_to(station, traced)
    }

    fn on_queue_slot_granted(&mut self) -> Result<(), SimError> {
        let now = self.now();
        let DispatchState::AwaitingQueueSlot {
            station,
            mut inst,
            since,
        } = std::mem::replace(&mut self.dispatch, DispatchState::Fetching)
        else {
            unreachable!("queue slot handed to a dispatcher that was not waiting for one");
        };

        debug!(clk = now, unit = "MEM", "Structural hazard solved: found a slot in the access queue");
        inst.trace
            .log_hazard(HazardKind::MemQueueSlotUnavailable, since, now);
        self.dispatch_to(station, inst)
    }

    /// Issue to `station`. Fetch resumes next cycle, except after a control-flow instruction,
    /// which stalls fetch until its broadcast supplies the new PC.
    fn dispatch_to(&mut self, station: StationId, traced: TracedInstruction) -> Result<(), SimError> {
        info!(clk = self.now(), unit = "CPU", "Issuing {} to {station}", traced.inst);
        let control_flow = traced.inst.is_control_flow();
        let tag = self.issue(station, traced)?;

        if control_flow {
            debug!(clk = self.now(), unit = "CPU", "Stalling fetches until the new PC is available");
            self.cdb.snoop(tag, Snooper::Dispatch);
            self.dispatch = DispatchState::AwaitingBranch;
        } else {
            self.schedule_fetch();
        }
        Ok(())
    }
}

impl Machine for Cpu {
    fn new(
        prog: Program,
        config: CpuConfig,
        in_regs: HashMap<Reg, Value>,
        in_mem: Memory,
    ) -> Result<Self, SimError> {
        let mut cpu = Cpu::new(prog, config)?;
        for (reg, val) in in_regs {
            cpu.regs.write(reg, val)?;
        }
        cpu.memory = in_mem;
        Ok(cpu)
    }

    fn exec_all(mut self) -> Result<ExecResult, SimError> {
        self.run()
    }
}

impl fmt::Display for Cpu {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CLK {} | CPU Registers: {}", self.now(), self.regs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stuck_units_while_a_load_is_in_flight() {
        let prog = [Instruction::load(Reg::gp(1), Reg::ZERO, 4), Instruction::halt()]
            .into_iter()
            .collect::<Program>();
        let mut cpu = Cpu::new(prog, CpuConfig::default()).unwrap();

        // The load resolves its address at cycle 2, just before HLT is fetched.
        while cpu.halt_reason().is_none() {
            assert!(cpu.step().unwrap());
        }
        assert_eq!(cpu.now(), 2);
        assert_eq!(
            cpu.stuck_units(),
            vec![
                "MemRS1".to_owned(),
                "CDB (0 writers, 1 snoopers)".to_owned(),
                "memory queue (0 queued, 1 in flight)".to_owned(),
            ]
        );

        cpu.run().unwrap();
        assert!(cpu.stuck_units().is_empty());
    }
}
