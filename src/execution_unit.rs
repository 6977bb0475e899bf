use serde::{Serialize, Serializer};
use std::fmt;
use strum::{Display, EnumIter};

/// Execution resource classes. Each class has its own reservation station pool and functional unit
/// pool.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Display, EnumIter)]
pub enum UnitClass {
    #[strum(serialize = "ALU")]
    Alu,
    #[strum(serialize = "FPALU")]
    FpAlu,
    #[strum(serialize = "MEM")]
    Mem,
}

/// Which reservation-station specialisation serves a class.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum StationKind {
    Alu,
    Mem,
}

impl UnitClass {
    pub fn station_kind(self) -> StationKind {
        match self {
            UnitClass::Alu | UnitClass::FpAlu => StationKind::Alu,
            UnitClass::Mem => StationKind::Mem,
        }
    }

    pub(crate) fn station_prefix(self) -> &'static str {
        match self {
            UnitClass::Alu => "AluRS",
            UnitClass::FpAlu => "FpAluRS",
            UnitClass::Mem => "MemRS",
        }
    }
}

/// A fungible functional unit token, checked out of its class pool for the execute phase.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FuId {
    pub class: UnitClass,
    pub index: u16,
}

impl FuId {
    pub fn new(class: UnitClass, index: u16) -> Self {
        Self { class, index }
    }
}

impl fmt::Display for FuId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.class, self.index + 1)
    }
}

impl Serialize for FuId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}
