use hashbrown::HashMap;
use std::fmt;

use crate::{
    cdb::{Cdb, Snooper},
    error::SimError,
    inst::{Reg, Value},
    reservation_station::Tag,
};

/// A register either holds a value or names the station that will produce it.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Cell {
    Value(Value),
    Producer(Tag),
}

/// Architectural registers plus the renaming table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterFile {
    cells: HashMap<Reg, Cell>,
    gp: usize,
    fp: usize,
}

impl RegisterFile {
    pub fn new(gp: usize, fp: usize) -> Self {
        let cells = (0..gp)
            .map(|n| Reg::Gp(n as u8))
            .chain((0..fp).map(|n| Reg::Fp(n as u8)))
            .chain([Reg::Pc])
            .map(|r| (r, Cell::Value(0)))
            .collect();

        Self { cells, gp, fp }
    }

    fn check(&self, reg: Reg) -> Result<(), SimError> {
        let valid = match reg {
            Reg::Gp(n) => (n as usize) < self.gp,
            Reg::Fp(n) => (n as usize) < self.fp,
            Reg::Pc => true,
        };
        if valid {
            Ok(())
        } else {
            Err(SimError::invalid_register(reg, "not present in this register file"))
        }
    }

    fn check_writable(&self, reg: Reg) -> Result<(), SimError> {
        self.check(reg)?;
        match reg {
            Reg::ZERO => Err(SimError::invalid_register(reg, "R0 is hardwired to zero")),
            Reg::Pc => Err(SimError::invalid_register(
                reg,
                "PC is written only by fetch and control flow",
            )),
            _ => Ok(()),
        }
    }

    pub fn get(&self, reg: Reg) -> Result<Cell, SimError> {
        self.check(reg)?;
        Ok(self.cells[&reg])
    }

    /// The concrete value of `reg`, or `None` while it is being produced.
    pub fn value(&self, reg: Reg) -> Result<Option<Value>, SimError> {
        Ok(match self.get(reg)? {
            Cell::Value(v) => Some(v),
            Cell::Producer(_) => None,
        })
    }

    pub fn write(&mut self, reg: Reg, val: Value) -> Result<(), SimError> {
        self.check_writable(reg)?;
        self.cells.insert(reg, Cell::Value(val));
        Ok(())
    }

    /// Make `tag` the producer of `reg` and subscribe the register to its broadcast.
    ///
    /// Any earlier producer loses ownership; its result will be dropped by [`RegisterFile::settle`].
    pub fn rename(&mut self, reg: Reg, tag: Tag, cdb: &mut Cdb) -> Result<(), SimError> {
        self.check_writable(reg)?;
        self.cells.insert(reg, Cell::Producer(tag));
        cdb.snoop(tag, Snooper::Register(reg));
        Ok(())
    }

    /// Deliver a broadcast result. Returns false if `reg` was renamed to a younger producer since.
    pub fn settle(&mut self, reg: Reg, tag: Tag, val: Value) -> bool {
        match self.cells.get_mut(&reg) {
            Some(cell) if *cell == Cell::Producer(tag) => {
                *cell = Cell::Value(val);
                true
            }
            _ => false,
        }
    }

    pub fn pc(&self) -> usize {
        match self.cells[&Reg::Pc] {
            Cell::Value(v) => v as usize,
            Cell::Producer(_) => unreachable!("PC is never renamed"),
        }
    }

    pub fn set_pc(&mut self, pc: usize) {
        self.cells.insert(Reg::Pc, Cell::Value(pc as Value));
    }

    /// Registers still waiting on a producer.
    pub fn pending_producers(&self) -> Vec<(Reg, Tag)> {
        let mut pending = self
            .cells
            .iter()
            .filter_map(|(r, c)| match c {
                Cell::Producer(t) => Some((*r, *t)),
                Cell::Value(_) => None,
            })
            .collect::<Vec<_>>();
        pending.sort_by_key(|(r, _)| *r);
        pending
    }

    /// `(register, value)` pairs in canonical order (R*, F*, PC), skipping pending registers.
    pub fn values(&self) -> Vec<(Reg, Value)> {
        let mut values = self
            .cells
            .iter()
            .filter_map(|(r, c)| match c {
                Cell::Value(v) => Some((*r, *v)),
                Cell::Producer(_) => None,
            })
            .collect::<Vec<_>>();
        values.sort_by_key(|(r, _)| *r);
        values
    }
}

impl fmt::Display for RegisterFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut regs = self.cells.iter().collect::<Vec<_>>();
        regs.sort_by_key(|(r, _)| **r);

        for (i, (reg, cell)) in regs.into_iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            match cell {
                Cell::Value(v) => write!(f, "{reg}: {v}")?,
                Cell::Producer(t) => write!(f, "{reg}: {}", t.station)?,
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{execution_unit::UnitClass, reservation_station::StationId};

    fn tag(index: u16, generation: u32) -> Tag {
        Tag {
            station: StationId::new(UnitClass::Alu, index),
            generation,
        }
    }

    #[test]
    fn test_r0_is_constant() {
        let mut rf = RegisterFile::new(4, 2);
        let mut cdb = Cdb::new(1);
        assert!(matches!(
            rf.write(Reg::ZERO, 3),
            Err(SimError::InvalidRegister { .. })
        ));
        assert!(rf.rename(Reg::ZERO, tag(0, 1), &mut cdb).is_err());
        assert_eq!(rf.value(Reg::ZERO), Ok(Some(0)));
    }

    #[test]
    fn test_pc_is_not_renamable() {
        let mut rf = RegisterFile::new(4, 2);
        let mut cdb = Cdb::new(1);
        assert!(matches!(
            rf.rename(Reg::Pc, tag(0, 1), &mut cdb),
            Err(SimError::InvalidRegister { .. })
        ));
        assert!(rf.write(Reg::Pc, 2).is_err());
        assert_eq!(cdb.subscriptions(), 0);
        rf.set_pc(2);
        assert_eq!(rf.pc(), 2);
    }

    #[test]
    fn test_bounds() {
        let rf = RegisterFile::new(4, 2);
        assert!(rf.get(Reg::Gp(3)).is_ok());
        assert!(rf.get(Reg::Gp(4)).is_err());
        assert!(rf.get(Reg::Fp(1)).is_ok());
        assert!(rf.get(Reg::Fp(2)).is_err());
        assert!(rf.get(Reg::Pc).is_ok());
    }

    #[test]
    fn test_stale_producer_is_dropped() {
        let mut rf = RegisterFile::new(4, 0);
        let mut cdb = Cdb::new(1);
        let (old, new) = (tag(0, 1), tag(1, 1));

        rf.rename(Reg::gp(1), old, &mut cdb).unwrap();
        rf.rename(Reg::gp(1), new, &mut cdb).unwrap();
        assert!(!rf.settle(Reg::gp(1), old, 5));
        assert_eq!(rf.get(Reg::gp(1)), Ok(Cell::Producer(new)));
        assert!(rf.settle(Reg::gp(1), new, 7));
        assert_eq!(rf.value(Reg::gp(1)), Ok(Some(7)));
        assert!(rf.pending_producers().is_empty());
    }

    #[test]
    fn test_generation_distinguishes_reuse() {
        let mut rf = RegisterFile::new(4, 0);
        let mut cdb = Cdb::new(1);
        rf.rename(Reg::gp(2), tag(0, 2), &mut cdb).unwrap();
        assert!(!rf.settle(Reg::gp(2), tag(0, 1), 1));
        assert_eq!(rf.pending_producers(), vec![(Reg::gp(2), tag(0, 2))]);
    }

    #[test]
    fn test_display() {
        let mut rf = RegisterFile::new(2, 1);
        rf.write(Reg::gp(1), 4).unwrap();
        rf.set_pc(3);
        assert_eq!(rf.to_string(), "R0: 0, R1: 4, F0: 0, PC: 3");
    }
}
