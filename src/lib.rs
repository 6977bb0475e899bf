pub mod cdb;
pub mod config;
pub mod cpu;
pub mod emulated;
pub mod error;
pub mod execution_unit;
pub mod hazard;
pub mod inst;
pub mod lsq;
pub mod mem;
pub mod pool;
pub mod program;
pub mod queue;
pub mod regs;
pub mod reservation_station;
pub mod sched;
pub mod trace;

pub use config::CpuConfig;
pub use cpu::{BreakpointHandler, Cpu, ExecResult, HaltReason, Machine};
pub use error::{ConfigError, SimError};
pub use inst::{Instruction, Reg};
pub use program::{Assembler, Program};

use std::collections::HashMap;

/// Run `prog` to completion on machine `M`, starting from the given registers and memory.
pub fn exec_with<M: Machine>(
    prog: Program,
    config: CpuConfig,
    regs: HashMap<Reg, inst::Value>,
    mem: mem::Memory,
) -> Result<ExecResult, SimError> {
    M::new(prog, config, regs, mem)?.exec_all()
}

/// Run `prog` on machine `M` from zeroed registers and memory.
pub fn exec<M: Machine>(prog: Program, config: CpuConfig) -> Result<ExecResult, SimError> {
    let mem = mem::Memory::new(config.mem_size);
    exec_with::<M>(prog, config, HashMap::new(), mem)
}
