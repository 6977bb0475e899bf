//! Machine configuration.
//!
//! A [`CpuConfig`] can be built from TOML or from `(directive, value)` pairs as they appear in an
//! assembly source preamble. Unknown knobs are rejected before anything is simulated.

use serde::Deserialize;
use std::{collections::BTreeMap, str::FromStr};

use crate::{error::ConfigError, execution_unit::UnitClass, inst::Mnemonic, sched::Time};

mod defaults {
    pub const GP_REGISTERS: usize = 16;
    pub const FP_REGISTERS: usize = 8;
    pub const CDB_WIDTH: usize = 1;

    pub const ALU_RS: usize = 1;
    pub const ALU_FU: usize = 1;
    pub const ALU_LATENCY: u64 = 1;

    pub const FPALU_RS: usize = 1;
    pub const FPALU_FU: usize = 1;
    pub const FPALU_LATENCY: u64 = 3;

    pub const MEM_RS: usize = 1;
    pub const MEM_FU: usize = 1;
    pub const MEM_LATENCY: u64 = 4;

    /// Depth of the in-order memory access queue.
    pub const MEM_ACCESS_QUEUE_SIZE: usize = 2;
    /// Number of memory cells.
    pub const MEM_SIZE: usize = 0x50;

    pub const FETCH_LATENCY: u64 = 1;

    /// Stations and functional units are numbered with a `u16`.
    pub const MAX_UNITS: usize = u16::MAX as usize;
    pub const MAX_LATENCY: u64 = u32::MAX as u64;
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CpuConfig {
    pub gp_registers: usize,
    pub fp_registers: usize,
    pub cdb_width: usize,
    pub alu_rs: usize,
    pub alu_fu: usize,
    pub alu_latency: Time,
    pub fpalu_rs: usize,
    pub fpalu_fu: usize,
    pub fpalu_latency: Time,
    pub mem_rs: usize,
    pub mem_fu: usize,
    pub mem_latency: Time,
    pub mem_access_queue_size: usize,
    pub mem_size: usize,
    pub fetch_latency: Time,
    /// Per-mnemonic execution latency, overriding the class default.
    pub latency: BTreeMap<Mnemonic, Time>,
}

impl Default for CpuConfig {
    fn default() -> Self {
        Self {
            gp_registers: defaults::GP_REGISTERS,
            fp_registers: defaults::FP_REGISTERS,
            cdb_width: defaults::CDB_WIDTH,
            alu_rs: defaults::ALU_RS,
            alu_fu: defaults::ALU_FU,
            alu_latency: defaults::ALU_LATENCY,
            fpalu_rs: defaults::FPALU_RS,
            fpalu_fu: defaults::FPALU_FU,
            fpalu_latency: defaults::FPALU_LATENCY,
            mem_rs: defaults::MEM_RS,
            mem_fu: defaults::MEM_FU,
            mem_latency: defaults::MEM_LATENCY,
            mem_access_queue_size: defaults::MEM_ACCESS_QUEUE_SIZE,
            mem_size: defaults::MEM_SIZE,
            fetch_latency: defaults::FETCH_LATENCY,
            latency: BTreeMap::new(),
        }
    }
}

fn invalid(name: &str, value: u64, reason: &'static str) -> ConfigError {
    ConfigError::InvalidValue {
        name: name.to_owned(),
        value: i64::try_from(value).unwrap_or(i64::MAX),
        reason,
    }
}

impl CpuConfig {
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: CpuConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_directives<'a>(
        directives: impl IntoIterator<Item = (&'a str, i64)>,
    ) -> Result<Self, ConfigError> {
        let mut config = CpuConfig::default();
        for (name, value) in directives {
            config.apply_directive(name, value)?;
        }
        config.validate()?;
        Ok(config)
    }

    /// Set one knob by name. Accepts every TOML key plus `<mnemonic>_latency`.
    pub fn apply_directive(&mut self, name: &str, value: i64) -> Result<(), ConfigError> {
        let key = name.trim().to_lowercase();
        let invalid = |reason| ConfigError::InvalidValue {
            name: key.clone(),
            value,
            reason,
        };
        let count = usize::try_from(value).map_err(|_| invalid("must not be negative"))?;
        let cycles = count as Time;

        match key.as_str() {
            "gp_registers" => self.gp_registers = count,
            "fp_registers" => self.fp_registers = count,
            "cdb_width" => self.cdb_width = count,
            "alu_rs" => self.alu_rs = count,
            "alu_fu" => self.alu_fu = count,
            "alu_latency" => self.alu_latency = cycles,
            "fpalu_rs" => self.fpalu_rs = count,
            "fpalu_fu" => self.fpalu_fu = count,
            "fpalu_latency" => self.fpalu_latency = cycles,
            "mem_rs" => self.mem_rs = count,
            "mem_fu" => self.mem_fu = count,
            "mem_latency" => self.mem_latency = cycles,
            "mem_access_queue_size" => self.mem_access_queue_size = count,
            "mem_size" => self.mem_size = count,
            "fetch_latency" => self.fetch_latency = cycles,
            _ => {
                let mnemonic = key
                    .strip_suffix("_latency")
                    .and_then(|m| Mnemonic::from_str(m).ok())
                    .ok_or_else(|| ConfigError::UnknownDirective(name.to_owned()))?;
                self.latency.insert(mnemonic, cycles);
            }
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let nonzero = [
            ("gp_registers", self.gp_registers),
            ("cdb_width", self.cdb_width),
            ("alu_rs", self.alu_rs),
            ("alu_fu", self.alu_fu),
            ("fpalu_rs", self.fpalu_rs),
            ("fpalu_fu", self.fpalu_fu),
            ("mem_rs", self.mem_rs),
            ("mem_fu", self.mem_fu),
            ("mem_access_queue_size", self.mem_access_queue_size),
            ("fetch_latency", self.fetch_latency.min(1) as usize),
        ];
        for (name, value) in nonzero {
            if value == 0 {
                return Err(invalid(name, 0, "must be at least 1"));
            }
        }

        let banks = [
            ("gp_registers", self.gp_registers),
            ("fp_registers", self.fp_registers),
        ];
        for (name, value) in banks {
            if value > u8::MAX as usize + 1 {
                return Err(invalid(name, value as u64, "at most 256 registers per bank"));
            }
        }

        let units = [
            ("alu_rs", self.alu_rs),
            ("alu_fu", self.alu_fu),
            ("fpalu_rs", self.fpalu_rs),
            ("fpalu_fu", self.fpalu_fu),
            ("mem_rs", self.mem_rs),
            ("mem_fu", self.mem_fu),
        ];
        for (name, value) in units {
            if value > defaults::MAX_UNITS {
                return Err(invalid(name, value as u64, "at most 65535 units per class"));
            }
        }

        let latencies = [
            ("alu_latency".to_owned(), self.alu_latency),
            ("fpalu_latency".to_owned(), self.fpalu_latency),
            ("mem_latency".to_owned(), self.mem_latency),
            ("fetch_latency".to_owned(), self.fetch_latency),
        ]
        .into_iter()
        .chain(
            self.latency
                .iter()
                .map(|(m, l)| (format!("{}_latency", m.to_string().to_lowercase()), *l)),
        );
        for (name, value) in latencies {
            if value > defaults::MAX_LATENCY {
                return Err(invalid(&name, value, "latency is capped at 2^32 - 1 cycles"));
            }
        }
        Ok(())
    }

    pub fn rs_count(&self, class: UnitClass) -> usize {
        match class {
            UnitClass::Alu => self.alu_rs,
            UnitClass::FpAlu => self.fpalu_rs,
            UnitClass::Mem => self.mem_rs,
        }
    }

    pub fn fu_count(&self, class: UnitClass) -> usize {
        match class {
            UnitClass::Alu => self.alu_fu,
            UnitClass::FpAlu => self.fpalu_fu,
            UnitClass::Mem => self.mem_fu,
        }
    }

    /// Execution latency of `mnemonic` on a unit of `class`.
    pub fn latency(&self, mnemonic: Mnemonic, class: UnitClass) -> Time {
        self.latency.get(&mnemonic).copied().unwrap_or(match class {
            UnitClass::Alu => self.alu_latency,
            UnitClass::FpAlu => self.fpalu_latency,
            UnitClass::Mem => self.mem_latency,
        })
    }
}
