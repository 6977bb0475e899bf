use std::fmt;

use crate::{error::SimError, inst::Value};

/// Word-addressed data memory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Memory {
    mem: Vec<Value>,
}

impl Memory {
    pub fn new(size: usize) -> Self {
        Self { mem: vec![0; size] }
    }

    pub fn len(&self) -> usize {
        self.mem.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mem.is_empty()
    }

    fn index(&self, addr: Value) -> Result<usize, SimError> {
        usize::try_from(addr)
            .ok()
            .filter(|a| *a < self.mem.len())
            .ok_or(SimError::AddressOutOfRange {
                address: addr,
                size: self.mem.len(),
            })
    }

    /// `offset + base`, failing instead of overflowing.
    pub fn effective_address(&self, offset: Value, base: Value) -> Result<Value, SimError> {
        offset
            .checked_add(base)
            .ok_or(SimError::AddressOutOfRange {
                address: offset.saturating_add(base),
                size: self.mem.len(),
            })
    }

    pub fn read(&self, addr: Value) -> Result<Value, SimError> {
        Ok(self.mem[self.index(addr)?])
    }

    pub fn write(&mut self, addr: Value, val: Value) -> Result<(), SimError> {
        let a = self.index(addr)?;
        self.mem[a] = val;
        Ok(())
    }

    pub fn cells(&self) -> &[Value] {
        &self.mem
    }
}

impl fmt::Display for Memory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (row, cells) in self.mem.chunks(4).enumerate() {
            write!(f, "{:#06x}:", row * 4)?;
            for cell in cells {
                write!(f, " {cell:#04x}")?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bounds() {
        let mut mem = Memory::new(4);
        mem.write(3, 9).unwrap();
        assert_eq!(mem.read(3), Ok(9));
        assert_eq!(
            mem.read(4),
            Err(SimError::AddressOutOfRange {
                address: 4,
                size: 4
            })
        );
        assert!(mem.write(-1, 0).is_err());
    }

    #[test]
    fn test_effective_address_overflow() {
        let mem = Memory::new(4);
        assert_eq!(mem.effective_address(1, 2), Ok(3));
        assert_eq!(mem.effective_address(-1, 2), Ok(1));
        assert_eq!(
            mem.effective_address(Value::MAX, 1),
            Err(SimError::AddressOutOfRange {
                address: Value::MAX,
                size: 4
            })
        );
    }

    #[test]
    fn test_dump() {
        let mut mem = Memory::new(6);
        mem.write(1, 0xab).unwrap();
        assert_eq!(
            mem.to_string(),
            "0x0000: 0x00 0xab 0x00 0x00\n0x0004: 0x00 0x00\n"
        );
    }
}
