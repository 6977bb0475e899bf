use tracing::debug;

use super::{StationId, Tag};
use crate::{
    cpu::Cpu,
    error::SimError,
    inst::{Instruction, Target, Value},
};

const LHS: usize = 0;
const RHS: usize = 1;

fn resolved(target: &Target) -> Result<Value, SimError> {
    target
        .address
        .map(|a| a as Value)
        .ok_or_else(|| SimError::Assembly {
            label: target.label.to_string(),
        })
}

impl Cpu {
    /// Operands are read before the destination is renamed, so `ADD R1, R1, 1` reads the old R1.
    pub(super) fn decode_alu(&mut self, id: StationId, tag: Tag) -> Result<(), SimError> {
        let inst = self.instruction_of(id)?;
        match &inst {
            Instruction::Integer { lhs, rhs, .. }
            | Instruction::Logic { lhs, rhs, .. }
            | Instruction::Bitwise { lhs, rhs, .. }
            | Instruction::Floating { lhs, rhs, .. }
            | Instruction::Branch { lhs, rhs, .. } => {
                self.read_operand(id, LHS, *lhs)?;
                self.read_operand(id, RHS, *rhs)?;
            }
            Instruction::Jump { .. } => {}
            _ => return Err(Self::unsupported(id, &inst)),
        }

        if let Some(dst) = inst.dst() {
            self.regs.rename(dst, tag, &mut self.cdb)?;
        }
        Ok(())
    }

    /// Control-flow results are the next PC. A branch that is not taken falls through to the
    /// live PC, which fetch has already advanced past the branch.
    pub(super) fn execute_alu(&mut self, id: StationId) -> Result<Option<Value>, SimError> {
        let inst = self.instruction_of(id)?;
        let st = self.station(id);
        let (a, b) = (st.operands[LHS].value(), st.operands[RHS].value());

        let result = match &inst {
            Instruction::Jump { target } => resolved(target)?,
            Instruction::Branch { cond, target, .. } => {
                let taken = cond.holds(a, b);
                debug!(clk = self.sched.now(), unit = %id, "{inst}: taken = {taken}");
                if taken {
                    resolved(target)?
                } else {
                    self.regs.pc() as Value
                }
            }
            _ => inst
                .compute(a, b)
                .ok_or_else(|| Self::unsupported(id, &inst))?,
        };

        debug!(clk = self.sched.now(), unit = %id, "End execution of {inst}: {result}");
        Ok(Some(result))
    }
}
