use crate::{
    error::SimError,
    inst::{Instruction, Label},
};
use std::collections::HashMap;

/// A flat instruction array whose jump targets have all been resolved to indices.
#[derive(Debug, Clone, Default)]
pub struct Program {
    pub insts: Vec<Instruction>,
    pub labels: HashMap<Label, usize>,
}

impl Program {
    pub fn fetch(&self, pc: usize) -> Option<&Instruction> {
        self.insts.get(pc)
    }

    pub fn len(&self) -> usize {
        self.insts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.insts.is_empty()
    }

    /// Fails on the first jump or branch whose target was never resolved to an index.
    pub fn check_resolved(&self) -> Result<(), SimError> {
        match self
            .insts
            .iter()
            .filter_map(Instruction::target)
            .find(|t| t.address.is_none())
        {
            Some(target) => Err(SimError::Assembly {
                label: target.label.to_string(),
            }),
            None => Ok(()),
        }
    }
}

/// Collects labels and instructions, then rewrites every jump target to a concrete index.
#[derive(Debug, Clone, Default)]
pub struct Assembler {
    insts: Vec<Instruction>,
    labels: HashMap<Label, usize>,
}

impl Assembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare `label` at the position of the next pushed instruction.
    pub fn label(&mut self, label: impl Into<Label>) -> &mut Self {
        self.labels.insert(label.into(), self.insts.len());
        self
    }

    pub fn push(&mut self, inst: Instruction) -> &mut Self {
        self.insts.push(inst);
        self
    }

    pub fn assemble(&self) -> Result<Program, SimError> {
        let mut insts = self.insts.clone();

        // Do another pass to fixup the labels.
        for inst in &mut insts {
            if let Some(target) = inst.target_mut() {
                let address = self
                    .labels
                    .get(&target.label)
                    .ok_or_else(|| SimError::Assembly {
                        label: target.label.to_string(),
                    })?;
                target.address = Some(*address);
            }
        }

        Ok(Program {
            insts,
            labels: self.labels.clone(),
        })
    }
}

impl FromIterator<Instruction> for Program {
    /// Straight-line programs with no labels.
    fn from_iter<I: IntoIterator<Item = Instruction>>(iter: I) -> Self {
        Program {
            insts: iter.into_iter().collect(),
            labels: HashMap::new(),
        }
    }
}
