//! Block-granularity liveness analysis.
//!
//! Backward dataflow over one function: per-block def/use sets, then the
//! live-in/live-out fixpoint
//! `live_out(B) = U live_in(succ)`, `live_in(B) = use(B) U (live_out(B) - def(B))`.
//!
//! Only register candidates participate: constants, globals and stack
//! allocations never live in registers and are excluded from all sets.

use crate::ir::{FuncId, Module, Op, ValueId, ValueKind};

/// Can this value be register-resident?
pub fn is_reg_candidate(m: &Module, v: ValueId) -> bool {
    match &m.value(v).kind {
        ValueKind::ConstInt(_) | ValueKind::Global(_) | ValueKind::Removed => false,
        ValueKind::Param { .. } | ValueKind::Slot => true,
        ValueKind::Inst(inst) => {
            !matches!(inst.op, Op::Alloca { .. }) && !m.value(v).ty.is_void()
        }
    }
}

/// Recompute def/use/live-in/live-out for every block of `f`.
pub fn run(m: &mut Module, f: FuncId) {
    let blocks = m.func(f).blocks.clone();

    for &b in &blocks {
        let insts = m.block(b).insts.clone();
        {
            let block = m.block_mut(b);
            block.defs.clear();
            block.uses.clear();
            block.live_in.clear();
            block.live_out.clear();
        }

        for v in insts {
            let inst = m.inst(v).expect("block lists hold instructions").clone();
            for &operand in &inst.operands {
                if is_reg_candidate(m, operand) && !m.block(b).defs.contains(&operand) {
                    m.block_mut(b).uses.insert(operand);
                }
            }
            if is_reg_candidate(m, v) {
                m.block_mut(b).defs.insert(v);
            }
        }
    }

    // Backward fixpoint; iterate blocks in reverse order for fast settling.
    let mut changed = true;
    while changed {
        changed = false;
        for &b in blocks.iter().rev() {
            let mut live_out = hashbrown::HashSet::new();
            for &s in &m.block(b).succs {
                live_out.extend(m.block(s).live_in.iter().copied());
            }
            let block = m.block(b);
            let mut live_in = block.uses.clone();
            for &v in &live_out {
                if !block.defs.contains(&v) {
                    live_in.insert(v);
                }
            }
            let block = m.block_mut(b);
            if live_in != block.live_in || live_out != block.live_out {
                block.live_in = live_in;
                block.live_out = live_out;
                changed = true;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::cfg;
    use crate::ir::{BinOp, CmpOp, Type};

    #[test]
    fn straight_line_def_use() {
        let mut m = Module::new();
        let f = m.add_function("f", Type::I32, &[Type::I32, Type::I32]);
        let entry = m.add_block(f, "entry");
        let [a, b] = [m.func(f).params[0], m.func(f).params[1]];
        let sum = m.append_inst(entry, Op::Binary(BinOp::Add), Type::I32, vec![a, b], None);
        m.append_inst(entry, Op::Ret, Type::Void, vec![sum], None);
        cfg::analyze(&mut m, f).unwrap();
        run(&mut m, f);

        let block = m.block(entry);
        assert!(block.uses.contains(&a) && block.uses.contains(&b));
        assert!(block.defs.contains(&sum));
        // Defined before use in the same block: not a use.
        assert!(!block.uses.contains(&sum));
        assert!(block.live_out.is_empty());
    }

    #[test]
    fn value_live_across_loop() {
        let mut m = Module::new();
        let f = m.add_function("f", Type::I32, &[Type::I32]);
        let entry = m.add_block(f, "entry");
        let header = m.add_block(f, "header");
        let body = m.add_block(f, "body");
        let exit = m.add_block(f, "exit");
        let a = m.func(f).params[0];
        let zero = m.const_int(0);
        // base is defined in entry and used only in exit: it must be live
        // through the whole loop.
        let base = m.append_inst(entry, Op::Binary(BinOp::Add), Type::I32, vec![a, a], None);
        m.append_inst(entry, Op::Br { target: header }, Type::Void, vec![], None);
        let cond = m.append_inst(header, Op::Cmp(CmpOp::Gt), Type::I32, vec![a, zero], None);
        m.append_inst(
            header,
            Op::CondBr { then_bb: body, else_bb: exit },
            Type::Void,
            vec![cond],
            None,
        );
        m.append_inst(body, Op::Br { target: header }, Type::Void, vec![], None);
        m.append_inst(exit, Op::Ret, Type::Void, vec![base], None);
        cfg::analyze(&mut m, f).unwrap();
        run(&mut m, f);

        for b in [header, body] {
            assert!(m.block(b).live_in.contains(&base), "live through loop");
            assert!(m.block(b).live_out.contains(&base));
        }
        assert!(m.block(exit).live_in.contains(&base));
        assert!(m.block(exit).live_out.is_empty());
        // Constants never enter liveness sets.
        assert!(!m.block(header).uses.contains(&zero));
    }
}
