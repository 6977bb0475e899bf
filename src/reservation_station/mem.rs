use tracing::debug;

use super::{StationId, Tag};
use crate::{
    cpu::{Cpu, Wake},
    error::SimError,
    inst::{Instruction, Operand, Value},
};

const OFFSET: usize = 0;
const SRC: usize = 1;

impl Cpu {
    pub(super) fn decode_mem(&mut self, id: StationId, tag: Tag) -> Result<(), SimError> {
        match self.instruction_of(id)? {
            Instruction::Load { dst, offset, .. } => {
                self.read_operand(id, OFFSET, Operand::Reg(offset))?;
                self.regs.rename(dst, tag, &mut self.cdb)?;
            }
            Instruction::Store { src, offset, .. } => {
                self.read_operand(id, SRC, Operand::Reg(src))?;
                self.read_operand(id, OFFSET, Operand::Reg(offset))?;
            }
            inst => return Err(Self::unsupported(id, &inst)),
        }
        Ok(())
    }

    /// Memory stations also wait to reach the head of the access queue.
    pub(super) fn request_queue_turn(&mut self, id: StationId) {
        if !self.lsq.wait_turn(id) {
            self.station_mut(id).deps.push();
        }
    }

    pub(crate) fn on_queue_turn(&mut self, id: StationId) -> Result<(), SimError> {
        self.dependency_met(id)
    }

    pub(super) fn resolve_address(&mut self, id: StationId) -> Result<(), SimError> {
        let now = self.sched.now();
        let (base, is_store) = match self.instruction_of(id)? {
            Instruction::Load { base, .. } => (base, false),
            Instruction::Store { base, .. } => (base, true),
            inst => return Err(Self::unsupported(id, &inst)),
        };

        let offset = self.station(id).operands[OFFSET].value();
        let address = self.memory.effective_address(offset, base)?;
        self.station_mut(id).address = Some(address);
        debug!(clk = now, unit = %id, "Resolved address {address}");

        let resolution = self.lsq.resolve(id, address, is_store);
        if resolution.admitted.is_some() {
            self.sched.wake_now(Wake::QueueSlotGranted);
        }
        if let Some(head) = resolution.turn {
            self.sched.wake_now(Wake::QueueTurn(head));
        }

        self.try_access(id)
    }

    /// Start the access unless an older in-flight access to the same address has to finish first.
    pub(crate) fn try_access(&mut self, id: StationId) -> Result<(), SimError> {
        if self.lsq.must_wait(id) {
            debug!(
                clk = self.sched.now(),
                unit = %id,
                "Waiting for an older access to {:?}",
                self.station(id).address
            );
            self.lsq.park(id);
            return Ok(());
        }
        self.begin_execute(id)
    }

    pub(super) fn execute_mem(&mut self, id: StationId) -> Result<Option<Value>, SimError> {
        let st = self.station(id);
        let address = st.address.ok_or(SimError::StationIdle(id))?;
        let src = st.operands[SRC];

        let result = match self.instruction_of(id)? {
            Instruction::Load { .. } => Some(self.memory.read(address)?),
            Instruction::Store { .. } => {
                self.memory.write(address, src.value())?;
                None
            }
            inst => return Err(Self::unsupported(id, &inst)),
        };
        debug!(clk = self.sched.now(), unit = "MEM", "Access to {address} by {id} complete");

        for parked in self.lsq.complete(id) {
            self.sched.wake_now(Wake::AccessRetry(parked));
        }
        Ok(result)
    }
}
