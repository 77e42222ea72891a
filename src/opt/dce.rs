//! Dead code elimination.
//!
//! Liveness is seeded from the instructions whose execution is observable
//! (stores, calls, branches, returns) and propagated backwards through
//! operands; everything unmarked is removed. Pure instructions survive
//! only by feeding a live one, directly or transitively.

use hashbrown::HashSet;

use crate::core::CompileResult;
use crate::ir::{FuncId, Module, ValueId};

/// Remove dead instructions from `f`. Returns the number removed.
pub fn run(m: &mut Module, f: FuncId) -> CompileResult<usize> {
    let mut live: HashSet<ValueId> = HashSet::new();
    let mut work: Vec<ValueId> = Vec::new();

    for &b in &m.func(f).blocks {
        for &v in &m.block(b).insts {
            let Some(inst) = m.inst(v) else { continue };
            if inst.op.has_side_effect() {
                live.insert(v);
                work.push(v);
            }
        }
    }

    while let Some(v) = work.pop() {
        let Some(inst) = m.inst(v) else { continue };
        for &operand in &inst.operands.clone() {
            if m.inst(operand).is_some() && live.insert(operand) {
                work.push(operand);
            }
        }
    }

    // Sweep in reverse instruction order so users die before operands and
    // the use lists drain cleanly.
    let mut dead: Vec<ValueId> = Vec::new();
    for &b in &m.func(f).blocks {
        for &v in &m.block(b).insts {
            if m.inst(v).is_some() && !live.contains(&v) {
                dead.push(v);
            }
        }
    }
    for &v in dead.iter().rev() {
        m.remove_inst(v);
    }

    if !dead.is_empty() {
        log::debug!("dce: removed {} instructions in {}", dead.len(), m.func(f).name);
    }
    Ok(dead.len())
}
