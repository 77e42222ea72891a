//! Target program representation and textual rendering.
//!
//! The lowered product is a flat instruction list per function plus the
//! data segment; rendering is deterministic, one instruction per line, in
//! the dialect the MARS/SPIM simulators accept.

use std::fmt;

use crate::ir::{GlobalInit, PhysReg};

use super::regs;

/// Assembler opcodes the selector emits. `seq`/`sne`/`sle`/`sgt` and
/// `mul` are the usual simulator pseudo-instructions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MachOp {
    Li,
    La,
    Move,
    Addu,
    Addiu,
    Subu,
    Mul,
    Div,
    Mflo,
    Mfhi,
    Slt,
    Sle,
    Sgt,
    Sge,
    Seq,
    Sne,
    Andi,
    Sll,
    Lw,
    Sw,
    Lb,
    Sb,
    Bnez,
    J,
    Jal,
    Jr,
    Syscall,
}

impl MachOp {
    pub fn mnemonic(self) -> &'static str {
        match self {
            MachOp::Li => "li",
            MachOp::La => "la",
            MachOp::Move => "move",
            MachOp::Addu => "addu",
            MachOp::Addiu => "addiu",
            MachOp::Subu => "subu",
            MachOp::Mul => "mul",
            MachOp::Div => "div",
            MachOp::Mflo => "mflo",
            MachOp::Mfhi => "mfhi",
            MachOp::Slt => "slt",
            MachOp::Sle => "sle",
            MachOp::Sgt => "sgt",
            MachOp::Sge => "sge",
            MachOp::Seq => "seq",
            MachOp::Sne => "sne",
            MachOp::Andi => "andi",
            MachOp::Sll => "sll",
            MachOp::Lw => "lw",
            MachOp::Sw => "sw",
            MachOp::Lb => "lb",
            MachOp::Sb => "sb",
            MachOp::Bnez => "bnez",
            MachOp::J => "j",
            MachOp::Jal => "jal",
            MachOp::Jr => "jr",
            MachOp::Syscall => "syscall",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MachOperand {
    Reg(PhysReg),
    Imm(i32),
    Label(String),
    /// Base+offset memory reference, rendered `off(base)`.
    Mem { base: PhysReg, offset: i32 },
}

impl fmt::Display for MachOperand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MachOperand::Reg(r) => f.write_str(regs::name(*r)),
            MachOperand::Imm(n) => write!(f, "{n}"),
            MachOperand::Label(l) => f.write_str(l),
            MachOperand::Mem { base, offset } => write!(f, "{}({})", offset, regs::name(*base)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MachInst {
    Label(String),
    Op(MachOp, Vec<MachOperand>),
}

impl fmt::Display for MachInst {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MachInst::Label(l) => write!(f, "{l}:"),
            MachInst::Op(op, args) => {
                write!(f, "\t{}", op.mnemonic())?;
                for (i, a) in args.iter().enumerate() {
                    if i == 0 {
                        write!(f, " {a}")?;
                    } else {
                        write!(f, ", {a}")?;
                    }
                }
                Ok(())
            }
        }
    }
}

/// One `.data` entry.
#[derive(Debug, Clone)]
pub struct DataItem {
    pub name: String,
    pub size: u32,
    pub init: GlobalInit,
}

#[derive(Debug, Clone)]
pub struct TargetFunction {
    pub name: String,
    pub insts: Vec<MachInst>,
}

/// The complete lowered program.
#[derive(Debug, Clone, Default)]
pub struct TargetProgram {
    pub data: Vec<DataItem>,
    pub text: Vec<TargetFunction>,
}

impl fmt::Display for TargetProgram {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, ".data")?;
        for item in &self.data {
            match &item.init {
                GlobalInit::Zero => writeln!(f, "{}: .space {}", item.name, item.size)?,
                GlobalInit::Words(ws) => {
                    let words: Vec<String> = ws.iter().map(|w| w.to_string()).collect();
                    writeln!(f, "{}: .word {}", item.name, words.join(", "))?;
                }
                GlobalInit::Str(s) => writeln!(f, "{}: .asciiz {:?}", item.name, s)?,
            }
        }
        writeln!(f, "\n.text\n.globl main")?;
        for func in &self.text {
            writeln!(f, "{}:", func.name)?;
            for inst in &func.insts {
                writeln!(f, "{inst}")?;
            }
        }
        Ok(())
    }
}
