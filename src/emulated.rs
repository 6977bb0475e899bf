use crate::{
    config::CpuConfig,
    cpu::{ExecResult, HaltReason, Machine},
    error::SimError,
    inst::{Instruction, Operand, Reg, Value},
    mem::Memory,
    program::Program,
    regs::RegisterFile,
};
use std::collections::HashMap;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum CpuState {
    Running,
    Stopped(HaltReason),
}

/// Executes one instruction at a time, in program order, with the same arithmetic as the
/// out-of-order core. Used as the golden model.
#[derive(Debug, Clone)]
pub struct Emulated {
    regs: RegisterFile,
    mem: Memory,
    prog: Program,
    cycles: u64,
    insts_retired: usize,
}

impl Machine for Emulated {
    fn new(
        prog: Program,
        config: CpuConfig,
        in_regs: HashMap<Reg, Value>,
        in_mem: Memory,
    ) -> Result<Self, SimError> {
        config.validate()?;
        prog.check_resolved()?;

        let mut regs = RegisterFile::new(config.gp_registers, config.fp_registers);
        for (reg, val) in in_regs {
            regs.write(reg, val)?;
        }

        Ok(Self {
            regs,
            mem: in_mem,
            prog,
            cycles: 0,
            insts_retired: 0,
        })
    }

    fn exec_all(mut self) -> Result<ExecResult, SimError> {
        let halt = loop {
            if let CpuState::Stopped(reason) = self.exec_one()? {
                break reason;
            }
        };

        Ok(ExecResult {
            regs: self.regs,
            mem: self.mem,
            cycles_taken: self.cycles,
            insts_retired: self.insts_retired,
            halt,
        })
    }
}

impl Emulated {
    fn operand(&self, op: Operand) -> Result<Value, SimError> {
        match op {
            Operand::Imm(v) => Ok(v),
            Operand::Reg(r) => Ok(self.regs.value(r)?.unwrap_or_default()),
        }
    }

    fn reg(&self, r: Reg) -> Result<Value, SimError> {
        self.operand(Operand::Reg(r))
    }

    fn exec_one(&mut self) -> Result<CpuState, SimError> {
        let pc = self.regs.pc();
        let next_inst = match self.prog.fetch(pc) {
            Some(i) => i.clone(),
            None => return Ok(CpuState::Stopped(HaltReason::FetchOutOfRange)),
        };

        self.cycles += 1;
        self.regs.set_pc(pc + 1);

        match &next_inst {
            Instruction::Halt => return Ok(CpuState::Stopped(HaltReason::Halt)),
            Instruction::Breakpoint { .. } => return Ok(CpuState::Running),
            Instruction::Jump { target } => {
                self.regs.set_pc(target.address.ok_or_else(|| SimError::Assembly {
                    label: target.label.to_string(),
                })?);
            }
            Instruction::Branch {
                cond,
                lhs,
                rhs,
                target,
            } => {
                if cond.holds(self.operand(*lhs)?, self.operand(*rhs)?) {
                    self.regs.set_pc(target.address.ok_or_else(|| SimError::Assembly {
                        label: target.label.to_string(),
                    })?);
                }
            }
            Instruction::Load { dst, offset, base } => {
                let addr = self.mem.effective_address(self.reg(*offset)?, *base)?;
                let val = self.mem.read(addr)?;
                self.regs.write(*dst, val)?;
            }
            Instruction::Store { src, offset, base } => {
                let addr = self.mem.effective_address(self.reg(*offset)?, *base)?;
                self.mem.write(addr, self.reg(*src)?)?;
            }
            Instruction::Integer { dst, lhs, rhs, .. }
            | Instruction::Logic { dst, lhs, rhs, .. }
            | Instruction::Bitwise { dst, lhs, rhs, .. }
            | Instruction::Floating { dst, lhs, rhs, .. } => {
                let (a, b) = (self.operand(*lhs)?, self.operand(*rhs)?);
                if let Some(val) = next_inst.compute(a, b) {
                    self.regs.write(*dst, val)?;
                }
            }
        }

        self.insts_retired += 1;
        Ok(CpuState::Running)
    }
}
