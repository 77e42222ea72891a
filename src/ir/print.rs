//! Textual IR dump, a debug/snapshot aid with no stability contract.

use std::fmt::Write;

use super::module::{Module, Op, ValueId, ValueKind};

impl Module {
    fn operand_str(&self, v: ValueId) -> String {
        match &self.value(v).kind {
            ValueKind::ConstInt(n) => n.to_string(),
            ValueKind::Global(g) => format!("@{}", self.global(*g).name),
            _ => format!("%{}", self.display_name(v)),
        }
    }

    /// Render the whole module, one instruction per line.
    pub fn print(&self) -> String {
        let mut out = String::new();
        for g in &self.globals {
            let _ = writeln!(out, "global @{}: {:?} x {} = {:?}", g.name, g.elem_ty, g.elems, g.init);
        }
        for func in &self.funcs {
            if func.is_decl {
                let _ = writeln!(out, "declare {}", func.name);
                continue;
            }
            let params: Vec<String> = func.params.iter().map(|&p| self.operand_str(p)).collect();
            let _ = writeln!(out, "func {}({}) {{", func.name, params.join(", "));
            for &b in &func.blocks {
                let block = self.block(b);
                let preds: Vec<&str> = block.preds.iter().map(|&p| self.block(p).name.as_str()).collect();
                let _ = writeln!(out, "{}:  ; preds: {}", block.name, preds.join(", "));
                for &v in &block.insts {
                    let _ = writeln!(out, "    {}", self.inst_str(v));
                }
            }
            let _ = writeln!(out, "}}");
        }
        out
    }

    fn inst_str(&self, v: ValueId) -> String {
        let Some(inst) = self.inst(v) else {
            return format!("%{} = <not an instruction>", self.display_name(v));
        };
        let ops: Vec<String> = inst.operands.iter().map(|&o| self.operand_str(o)).collect();
        let lhs = if self.value(v).ty.is_void() {
            String::new()
        } else {
            format!("%{} = ", self.display_name(v))
        };
        match &inst.op {
            Op::Phi { preds } => {
                let pairs: Vec<String> = ops
                    .iter()
                    .zip(preds.iter())
                    .map(|(o, &p)| format!("[{o}, {}]", self.block(p).name))
                    .collect();
                format!("{lhs}phi {}", pairs.join(", "))
            }
            Op::Br { target } => format!("br {}", self.block(*target).name),
            Op::CondBr { then_bb, else_bb } => format!(
                "condbr {}, {}, {}",
                ops[0],
                self.block(*then_bb).name,
                self.block(*else_bb).name
            ),
            Op::Call { callee } => {
                format!("{lhs}call {}({})", self.func(*callee).name, ops.join(", "))
            }
            Op::ParallelCopy { dsts } => {
                let pairs: Vec<String> = dsts
                    .iter()
                    .zip(ops.iter())
                    .map(|(&d, s)| format!("%{} <- {s}", self.display_name(d)))
                    .collect();
                format!("pcopy {}", pairs.join(", "))
            }
            Op::Move { dst } => format!("move %{} <- {}", self.display_name(*dst), ops[0]),
            op => format!("{lhs}{} {}", op.mnemonic(), ops.join(", ")),
        }
    }
}
