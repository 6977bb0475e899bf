use std::{
    collections::VecDeque,
    ops::{Index, IndexMut},
};

use crate::{execution_unit::UnitClass, sched::Race};

/// A fixed inventory of interchangeable units with a FIFO queue of blocked requesters.
///
/// A released unit is handed straight to the oldest waiter, so a unit is never observable as free
/// while someone is queued for it.
#[derive(Debug, Clone)]
pub struct Pool<T, W> {
    free: VecDeque<T>,
    waiters: VecDeque<W>,
    capacity: usize,
    peak_in_use: usize,
}

impl<T: Copy + PartialEq, W> Pool<T, W> {
    pub fn new(units: impl IntoIterator<Item = T>) -> Self {
        let free = units.into_iter().collect::<VecDeque<_>>();
        Self {
            capacity: free.len(),
            free,
            waiters: VecDeque::new(),
            peak_in_use: 0,
        }
    }

    /// Try to check out a unit without waiting; on failure `waiter` is queued.
    pub fn acquire(&mut self, waiter: W) -> Race<T> {
        if self.waiters.is_empty() {
            if let Some(unit) = self.free.pop_front() {
                self.peak_in_use = self.peak_in_use.max(self.in_use());
                return Race::Won(unit);
            }
        }

        self.waiters.push_back(waiter);
        Race::Lost
    }

    /// Return a unit. If someone is waiting it is handed over and returned with its new owner.
    #[must_use]
    pub fn release(&mut self, unit: T) -> Option<(W, T)> {
        debug_assert!(!self.free.contains(&unit), "unit returned twice");
        debug_assert!(self.in_use() > 0, "released a unit nobody held");

        match self.waiters.pop_front() {
            Some(waiter) => Some((waiter, unit)),
            None => {
                self.free.push_back(unit);
                None
            }
        }
    }

    pub fn in_use(&self) -> usize {
        self.capacity - self.free.len()
    }

    pub fn waiting(&self) -> usize {
        self.waiters.len()
    }

    pub fn peak_in_use(&self) -> usize {
        self.peak_in_use
    }
}

/// One value per execution resource class.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PerClass<T> {
    pub alu: T,
    pub fp_alu: T,
    pub mem: T,
}

impl<T> PerClass<T> {
    pub fn from_fn(mut f: impl FnMut(UnitClass) -> T) -> Self {
        Self {
            alu: f(UnitClass::Alu),
            fp_alu: f(UnitClass::FpAlu),
            mem: f(UnitClass::Mem),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (UnitClass, &T)> {
        [
            (UnitClass::Alu, &self.alu),
            (UnitClass::FpAlu, &self.fp_alu),
            (UnitClass::Mem, &self.mem),
        ]
        .into_iter()
    }
}

impl<T> Index<UnitClass> for PerClass<T> {
    type Output = T;

    fn index(&self, class: UnitClass) -> &T {
        match class {
            UnitClass::Alu => &self.alu,
            UnitClass::FpAlu => &self.fp_alu,
            UnitClass::Mem => &self.mem,
        }
    }
}

impl<T> IndexMut<UnitClass> for PerClass<T> {
    fn index_mut(&mut self, class: UnitClass) -> &mut T {
        match class {
            UnitClass::Alu => &mut self.alu,
            UnitClass::FpAlu => &mut self.fp_alu,
            UnitClass::Mem => &mut self.mem,
        }
    }
}
