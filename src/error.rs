use thiserror::Error;

use crate::{reservation_station::StationId, sched::Time};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("unknown directive: {0}")]
    UnknownDirective(String),
    #[error("directive {name} has invalid value {value}: {reason}")]
    InvalidValue {
        name: String,
        value: i64,
        reason: &'static str,
    },
    #[error("failed to parse configuration: {0}")]
    Parse(String),
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        ConfigError::Parse(e.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SimError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("label {label} is not declared")]
    Assembly { label: String },
    #[error("register {name} is not valid: {reason}")]
    InvalidRegister { name: String, reason: &'static str },
    #[error("{station} cannot execute {inst}")]
    UnsupportedInstruction { station: StationId, inst: String },
    #[error("memory address {address} is out of range (size {size})")]
    AddressOutOfRange { address: i64, size: usize },
    #[error("simulation deadlocked at cycle {cycle}, still busy: {}", .busy.join(", "))]
    Deadlock { cycle: Time, busy: Vec<String> },
    #[error("{0} was resumed while holding no instruction")]
    StationIdle(StationId),
}

impl SimError {
    pub(crate) fn invalid_register(name: impl ToString, reason: &'static str) -> Self {
        SimError::InvalidRegister {
            name: name.to_string(),
            reason,
        }
    }
}
