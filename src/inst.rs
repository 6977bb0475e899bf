use serde::{Deserialize, Serialize, Serializer};
use std::{fmt, str::FromStr};
use strum::{Display, EnumIter, EnumString};

use crate::{cpu::BreakpointHandler, error::SimError, execution_unit::UnitClass};

/// Register and memory cell contents.
pub type Value = i64;

/// Integer results live on an 8-bit data path.
const WORD_MODULUS: Value = 0x100;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Reg {
    Gp(u8),
    Fp(u8),
    Pc,
}

impl Reg {
    pub const ZERO: Reg = Reg::Gp(0);

    pub fn gp(n: u8) -> Self {
        Reg::Gp(n)
    }

    pub fn fp(n: u8) -> Self {
        Reg::Fp(n)
    }
}

impl fmt::Display for Reg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reg::Gp(n) => write!(f, "R{n}"),
            Reg::Fp(n) => write!(f, "F{n}"),
            Reg::Pc => write!(f, "PC"),
        }
    }
}

impl FromStr for Reg {
    type Err = SimError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_uppercase();
        if upper == "PC" {
            return Ok(Reg::Pc);
        }

        let bad = || SimError::invalid_register(s, "unknown register name");
        let (bank, num) = upper.split_at(upper.char_indices().nth(1).map_or(0, |(i, _)| i));
        let num = num.parse::<u8>().map_err(|_| bad())?;
        match bank {
            "R" => Ok(Reg::Gp(num)),
            "F" => Ok(Reg::Fp(num)),
            _ => Err(bad()),
        }
    }
}

impl Serialize for Reg {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// An instruction operand: an immediate or a register to be read (possibly through renaming).
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Operand {
    Imm(Value),
    Reg(Reg),
}

impl From<Value> for Operand {
    fn from(v: Value) -> Self {
        Operand::Imm(v)
    }
}

impl From<Reg> for Operand {
    fn from(r: Reg) -> Self {
        Operand::Reg(r)
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Imm(v) => write!(f, "{v}"),
            Operand::Reg(r) => write!(f, "{r}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Label(pub String);

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Label {
    fn from(s: &str) -> Self {
        Label(s.to_owned())
    }
}

/// A jump/branch destination. `address` is filled in by the assembler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub label: Label,
    pub address: Option<usize>,
}

impl Target {
    pub fn new(label: impl Into<Label>) -> Self {
        Self {
            label: label.into(),
            address: None,
        }
    }

    pub fn resolved(label: impl Into<Label>, address: usize) -> Self {
        Self {
            label: label.into(),
            address: Some(address),
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.address {
            Some(a) => write!(f, "{}({})", self.label, a),
            None => write!(f, "{}(?)", self.label),
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum IntegerOp {
    Add,
    Sub,
}

impl IntegerOp {
    pub fn apply(self, a: Value, b: Value) -> Value {
        match self {
            IntegerOp::Add => a.wrapping_add(b).rem_euclid(WORD_MODULUS),
            IntegerOp::Sub => a.wrapping_sub(b).rem_euclid(WORD_MODULUS),
        }
    }
}

/// `ANDL`/`ORL`: truth value of the bitwise combination.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum LogicOp {
    And,
    Or,
}

impl LogicOp {
    pub fn apply(self, a: Value, b: Value) -> Value {
        let bits = match self {
            LogicOp::And => a & b,
            LogicOp::Or => a | b,
        };
        Value::from(bits != 0)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum BitwiseOp {
    And,
    Or,
}

impl BitwiseOp {
    pub fn apply(self, a: Value, b: Value) -> Value {
        match self {
            BitwiseOp::And => (a & b) & 0xff,
            BitwiseOp::Or => (a | b) & 0xff,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum FloatingOp {
    Add,
    Sub,
}

impl FloatingOp {
    pub fn apply(self, a: Value, b: Value) -> Value {
        match self {
            FloatingOp::Add => a.wrapping_add(b),
            FloatingOp::Sub => a.wrapping_sub(b),
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum BranchCond {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl BranchCond {
    pub fn holds(self, a: Value, b: Value) -> bool {
        match self {
            BranchCond::Eq => a == b,
            BranchCond::Ne => a != b,
            BranchCond::Lt => a < b,
            BranchCond::Le => a <= b,
            BranchCond::Gt => a > b,
            BranchCond::Ge => a >= b,
        }
    }
}

/// Mnemonics double as latency lookup keys (`[latency] add = 2`).
#[derive(
    Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Display, EnumString, EnumIter, Deserialize,
)]
#[strum(serialize_all = "UPPERCASE", ascii_case_insensitive)]
#[serde(rename_all = "lowercase")]
pub enum Mnemonic {
    Add,
    Sub,
    Andl,
    Orl,
    And,
    Or,
    Fadd,
    Fsub,
    Jmp,
    Beq,
    Bne,
    Blt,
    Ble,
    Bgt,
    Bge,
    Ld,
    St,
    Hlt,
    Break,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Instruction {
    Integer {
        op: IntegerOp,
        dst: Reg,
        lhs: Operand,
        rhs: Operand,
    },
    Logic {
        op: LogicOp,
        dst: Reg,
        lhs: Operand,
        rhs: Operand,
    },
    Bitwise {
        op: BitwiseOp,
        dst: Reg,
        lhs: Operand,
        rhs: Operand,
    },
    Floating {
        op: FloatingOp,
        dst: Reg,
        lhs: Operand,
        rhs: Operand,
    },
    Jump {
        target: Target,
    },
    Branch {
        cond: BranchCond,
        lhs: Operand,
        rhs: Operand,
        target: Target,
    },
    /// `dst <- mem[offset + base]`
    Load {
        dst: Reg,
        offset: Reg,
        base: Value,
    },
    /// `mem[offset + base] <- src`
    Store {
        src: Reg,
        offset: Reg,
        base: Value,
    },
    Halt,
    Breakpoint {
        handler: Option<BreakpointHandler>,
    },
}

impl Instruction {
    pub fn add(dst: Reg, lhs: impl Into<Operand>, rhs: impl Into<Operand>) -> Self {
        Self::integer(IntegerOp::Add, dst, lhs, rhs)
    }

    pub fn sub(dst: Reg, lhs: impl Into<Operand>, rhs: impl Into<Operand>) -> Self {
        Self::integer(IntegerOp::Sub, dst, lhs, rhs)
    }

    pub fn integer(op: IntegerOp, dst: Reg, lhs: impl Into<Operand>, rhs: impl Into<Operand>) -> Self {
        Instruction::Integer {
            op,
            dst,
            lhs: lhs.into(),
            rhs: rhs.into(),
        }
    }

    pub fn logic(op: LogicOp, dst: Reg, lhs: impl Into<Operand>, rhs: impl Into<Operand>) -> Self {
        Instruction::Logic {
            op,
            dst,
            lhs: lhs.into(),
            rhs: rhs.into(),
        }
    }

    pub fn bitwise(op: BitwiseOp, dst: Reg, lhs: impl Into<Operand>, rhs: impl Into<Operand>) -> Self {
        Instruction::Bitwise {
            op,
            dst,
            lhs: lhs.into(),
            rhs: rhs.into(),
        }
    }

    pub fn floating(
        op: FloatingOp,
        dst: Reg,
        lhs: impl Into<Operand>,
        rhs: impl Into<Operand>,
    ) -> Self {
        Instruction::Floating {
            op,
            dst,
            lhs: lhs.into(),
            rhs: rhs.into(),
        }
    }

    pub fn jmp(label: impl Into<Label>) -> Self {
        Instruction::Jump {
            target: Target::new(label),
        }
    }

    pub fn branch(
        cond: BranchCond,
        lhs: impl Into<Operand>,
        rhs: impl Into<Operand>,
        label: impl Into<Label>,
    ) -> Self {
        Instruction::Branch {
            cond,
            lhs: lhs.into(),
            rhs: rhs.into(),
            target: Target::new(label),
        }
    }

    pub fn load(dst: Reg, offset: Reg, base: Value) -> Self {
        Instruction::Load { dst, offset, base }
    }

    pub fn store(src: Reg, offset: Reg, base: Value) -> Self {
        Instruction::Store { src, offset, base }
    }

    pub fn halt() -> Self {
        Instruction::Halt
    }

    pub fn breakpoint() -> Self {
        Instruction::Breakpoint { handler: None }
    }

    pub fn breakpoint_with(handler: BreakpointHandler) -> Self {
        Instruction::Breakpoint {
            handler: Some(handler),
        }
    }

    pub fn mnemonic(&self) -> Mnemonic {
        match self {
            Instruction::Integer { op: IntegerOp::Add, .. } => Mnemonic::Add,
            Instruction::Integer { op: IntegerOp::Sub, .. } => Mnemonic::Sub,
            Instruction::Logic { op: LogicOp::And, .. } => Mnemonic::Andl,
            Instruction::Logic { op: LogicOp::Or, .. } => Mnemonic::Orl,
            Instruction::Bitwise { op: BitwiseOp::And, .. } => Mnemonic::And,
            Instruction::Bitwise { op: BitwiseOp::Or, .. } => Mnemonic::Or,
            Instruction::Floating { op: FloatingOp::Add, .. } => Mnemonic::Fadd,
            Instruction::Floating { op: FloatingOp::Sub, .. } => Mnemonic::Fsub,
            Instruction::Jump { .. } => Mnemonic::Jmp,
            Instruction::Branch { cond, .. } => match cond {
                BranchCond::Eq => Mnemonic::Beq,
                BranchCond::Ne => Mnemonic::Bne,
                BranchCond::Lt => Mnemonic::Blt,
                BranchCond::Le => Mnemonic::Ble,
                BranchCond::Gt => Mnemonic::Bgt,
                BranchCond::Ge => Mnemonic::Bge,
            },
            Instruction::Load { .. } => Mnemonic::Ld,
            Instruction::Store { .. } => Mnemonic::St,
            Instruction::Halt => Mnemonic::Hlt,
            Instruction::Breakpoint { .. } => Mnemonic::Break,
        }
    }

    /// The reservation station class an instruction is dispatched to. `None` for instructions the
    /// fetch unit handles itself.
    pub fn unit_class(&self) -> Option<UnitClass> {
        match self {
            Instruction::Integer { .. }
            | Instruction::Logic { .. }
            | Instruction::Bitwise { .. }
            | Instruction::Jump { .. }
            | Instruction::Branch { .. } => Some(UnitClass::Alu),
            Instruction::Floating { .. } => Some(UnitClass::FpAlu),
            Instruction::Load { .. } | Instruction::Store { .. } => Some(UnitClass::Mem),
            Instruction::Halt | Instruction::Breakpoint { .. } => None,
        }
    }

    pub fn is_control_flow(&self) -> bool {
        matches!(self, Instruction::Jump { .. } | Instruction::Branch { .. })
    }

    /// Register renamed to the producing station on issue.
    pub fn dst(&self) -> Option<Reg> {
        match self {
            Instruction::Integer { dst, .. }
            | Instruction::Logic { dst, .. }
            | Instruction::Bitwise { dst, .. }
            | Instruction::Floating { dst, .. }
            | Instruction::Load { dst, .. } => Some(*dst),
            _ => None,
        }
    }

    /// Pure two-operand computation for arithmetic, logic, bitwise and floating instructions.
    pub fn compute(&self, a: Value, b: Value) -> Option<Value> {
        match self {
            Instruction::Integer { op, .. } => Some(op.apply(a, b)),
            Instruction::Logic { op, .. } => Some(op.apply(a, b)),
            Instruction::Bitwise { op, .. } => Some(op.apply(a, b)),
            Instruction::Floating { op, .. } => Some(op.apply(a, b)),
            _ => None,
        }
    }

    pub fn target(&self) -> Option<&Target> {
        match self {
            Instruction::Jump { target } | Instruction::Branch { target, .. } => Some(target),
            _ => None,
        }
    }

    pub fn target_mut(&mut self) -> Option<&mut Target> {
        match self {
            Instruction::Jump { target } | Instruction::Branch { target, .. } => Some(target),
            _ => None,
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let m = self.mnemonic();
        match self {
            Instruction::Integer { dst, lhs, rhs, .. }
            | Instruction::Logic { dst, lhs, rhs, .. }
            | Instruction::Bitwise { dst, lhs, rhs, .. }
            | Instruction::Floating { dst, lhs, rhs, .. } => write!(f, "{m} {dst}, {lhs}, {rhs}"),
            Instruction::Jump { target } => write!(f, "{m} {target}"),
            Instruction::Branch {
                lhs, rhs, target, ..
            } => write!(f, "{m} {lhs}, {rhs}, {target}"),
            Instruction::Load { dst, offset, base } => write!(f, "{m} {dst}, [{offset}+{base}]"),
            Instruction::Store { src, offset, base } => write!(f, "{m} {src}, [{offset}+{base}]"),
            Instruction::Halt | Instruction::Breakpoint { .. } => write!(f, "{m}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reg() {
        assert_eq!(Reg::from_str("R0"), Ok(Reg::Gp(0)));
        assert_eq!(Reg::from_str("r15"), Ok(Reg::Gp(15)));
        assert_eq!(Reg::from_str("F3"), Ok(Reg::Fp(3)));
        assert_eq!(Reg::from_str("pc"), Ok(Reg::Pc));
        assert!(Reg::from_str("X1").is_err());
        assert!(Reg::from_str("R").is_err());
        assert!(Reg::from_str("R-1").is_err());
        assert!(Reg::from_str("").is_err());
        assert_eq!(
            Reg::from_str("Q7"),
            Err(SimError::InvalidRegister {
                name: "Q7".to_owned(),
                reason: "unknown register name"
            })
        );
    }

    #[test]
    fn test_integer_wraps_at_eight_bits() {
        assert_eq!(IntegerOp::Add.apply(250, 10), 4);
        assert_eq!(IntegerOp::Sub.apply(0, 1), 255);
        assert_eq!(IntegerOp::Sub.apply(3, 1), 2);
    }

    #[test]
    fn test_logic_and_bitwise() {
        assert_eq!(LogicOp::And.apply(1, 2), 0);
        assert_eq!(LogicOp::And.apply(3, 2), 1);
        assert_eq!(LogicOp::Or.apply(0, 0), 0);
        assert_eq!(LogicOp::Or.apply(0, 5), 1);
        assert_eq!(BitwiseOp::And.apply(0x1ff, 0xf0f), 0x0f);
        assert_eq!(BitwiseOp::Or.apply(0x100, 0x01), 0x01);
    }

    #[test]
    fn test_branch_conditions() {
        assert!(BranchCond::Le.holds(0, 0));
        assert!(!BranchCond::Lt.holds(0, 0));
        assert!(BranchCond::Ge.holds(3, 0));
        assert!(BranchCond::Ne.holds(3, 0));
        assert!(!BranchCond::Gt.holds(-1, 0));
    }

    #[test]
    fn test_display() {
        let r = Reg::gp;
        assert_eq!(Instruction::add(r(1), r(0), 3).to_string(), "ADD R1, R0, 3");
        assert_eq!(
            Instruction::branch(BranchCond::Le, r(1), 0, "END").to_string(),
            "BLE R1, 0, END(?)"
        );
        assert_eq!(Instruction::load(r(2), r(0), 4).to_string(), "LD R2, [R0+4]");
        assert_eq!(Instruction::store(r(2), r(3), 0).to_string(), "ST R2, [R3+0]");
        assert_eq!(Instruction::halt().to_string(), "HLT");
    }

    #[test]
    fn test_routing() {
        let r = Reg::gp;
        assert_eq!(Instruction::add(r(1), r(0), 3).unit_class(), Some(UnitClass::Alu));
        assert_eq!(
            Instruction::floating(FloatingOp::Add, Reg::fp(1), Reg::fp(0), 3).unit_class(),
            Some(UnitClass::FpAlu)
        );
        assert_eq!(Instruction::load(r(1), r(0), 0).unit_class(), Some(UnitClass::Mem));
        assert_eq!(Instruction::jmp("L").unit_class(), Some(UnitClass::Alu));
        assert_eq!(Instruction::halt().unit_class(), None);
        assert!(Instruction::jmp("L").is_control_flow());
        assert_eq!(Instruction::jmp("L").dst(), None);
        assert_eq!(Instruction::store(r(1), r(0), 0).dst(), None);
    }

    #[test]
    fn test_mnemonic_parse() {
        assert_eq!(Mnemonic::from_str("fadd"), Ok(Mnemonic::Fadd));
        assert_eq!(Mnemonic::from_str("BLE"), Ok(Mnemonic::Ble));
        assert_eq!(Mnemonic::Ld.to_string(), "LD");
    }
}
