use serde::{Serialize, Serializer};

use crate::{
    execution_unit::FuId,
    hazard::{Hazard, HazardKind},
    inst::Instruction,
    reservation_station::StationId,
    sched::Time,
};

/// Timestamps and hazard log of one dynamic instruction.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExecutionTrace {
    pub issued: Option<Time>,
    pub start_execution: Option<Time>,
    pub write_result: Option<Time>,
    pub written_result: Option<Time>,
    pub station: Option<StationId>,
    pub fu: Option<FuId>,
    pub hazards: Vec<Hazard>,
}

impl ExecutionTrace {
    pub fn log_hazard(&mut self, kind: HazardKind, detected_at: Time, resolved_at: Time) {
        self.hazards.push(Hazard::new(kind, detected_at, resolved_at));
    }

    /// All four timestamps are present and in order.
    pub fn is_complete(&self) -> bool {
        match (
            self.issued,
            self.start_execution,
            self.write_result,
            self.written_result,
        ) {
            (Some(i), Some(s), Some(w), Some(d)) => i <= s && s <= w && w <= d,
            _ => false,
        }
    }

    pub fn hazards_of<'a>(
        &'a self,
        pred: impl Fn(&HazardKind) -> bool + 'a,
    ) -> impl Iterator<Item = &'a Hazard> + 'a {
        self.hazards.iter().filter(move |h| pred(&h.kind))
    }
}

/// A fetched copy of a static instruction. Each fetch gets its own, so loop iterations keep
/// separate traces.
#[derive(Debug, Clone, Serialize)]
pub struct TracedInstruction {
    /// Dynamic fetch order.
    pub seq: u64,
    pub pc: usize,
    #[serde(serialize_with = "display")]
    pub inst: Instruction,
    pub trace: ExecutionTrace,
}

impl TracedInstruction {
    pub fn new(seq: u64, pc: usize, inst: Instruction) -> Self {
        Self {
            seq,
            pc,
            inst,
            trace: ExecutionTrace::default(),
        }
    }
}

fn display<S: Serializer>(inst: &Instruction, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(inst)
}
