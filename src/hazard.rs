use serde::Serialize;
use std::fmt;

use crate::{execution_unit::FuId, inst::Reg, reservation_station::StationId, sched::Time};

/// What an instruction was blocked on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind")]
pub enum HazardKind {
    /// No reservation station of the class was free. `assigned` is the one eventually granted.
    RsUnavailable { assigned: StationId },
    FuUnavailable { assigned: FuId },
    CdbUnavailable,
    MemQueueSlotUnavailable,
    /// Operand `register` was still being produced by `producer` at decode.
    Raw { register: Reg, producer: StationId },
}

impl HazardKind {
    pub fn is_structural(&self) -> bool {
        !matches!(self, HazardKind::Raw { .. })
    }
}

impl fmt::Display for HazardKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HazardKind::RsUnavailable { assigned } => write!(f, "RS unavailable ({assigned})"),
            HazardKind::FuUnavailable { assigned } => write!(f, "FU unavailable ({assigned})"),
            HazardKind::CdbUnavailable => write!(f, "CDB unavailable"),
            HazardKind::MemQueueSlotUnavailable => write!(f, "memory queue slot unavailable"),
            HazardKind::Raw { register, producer } => {
                write!(f, "RAW on {register} (waiting for {producer})")
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Hazard {
    #[serde(flatten)]
    pub kind: HazardKind,
    pub detected_at: Time,
    pub resolved_at: Time,
}

impl Hazard {
    pub fn new(kind: HazardKind, detected_at: Time, resolved_at: Time) -> Self {
        debug_assert!(detected_at <= resolved_at);
        Self {
            kind,
            detected_at,
            resolved_at,
        }
    }

    pub fn stall(&self) -> Time {
        self.resolved_at - self.detected_at
    }
}
