//! Global value numbering.
//!
//! A pre-order walk of the dominator tree carries a scoped hash table from
//! instruction signatures to value ids. A signature is the opcode plus the
//! operand ids, with commutative operations normalized by ordering the two
//! operands, so `a + b` and `b + a` collapse. Entries added inside a
//! subtree are retired when the walk leaves it; a surviving entry always
//! dominates every later lookup, which is what makes the replacement safe.
//!
//! Only pure instructions participate. Loads are not value-numbered: a
//! store between two identical loads would make the reuse wrong, and this
//! pass does no memory dependence reasoning.

use hashbrown::HashMap;

use crate::core::CompileResult;
use crate::ir::{BinOp, BlockId, CastOp, CmpOp, FuncId, Module, Op, ValueId};

#[derive(Clone, PartialEq, Eq, Hash)]
enum Sig {
    Binary(BinOp, ValueId, ValueId),
    Cmp(CmpOp, ValueId, ValueId),
    GetElem(u32, ValueId, ValueId),
    Cast(CastOp, ValueId),
}

fn signature(m: &Module, v: ValueId) -> Option<Sig> {
    let inst = m.inst(v)?;
    if !inst.op.is_pure() {
        return None;
    }
    let ops = &inst.operands;
    Some(match inst.op {
        Op::Binary(op) => {
            let (a, b) = (ops[0], ops[1]);
            let (a, b) = if op.is_commutative() && b.0 < a.0 { (b, a) } else { (a, b) };
            Sig::Binary(op, a, b)
        }
        Op::Cmp(op) => {
            let (a, b) = (ops[0], ops[1]);
            let (a, b) = if op.is_commutative() && b.0 < a.0 { (b, a) } else { (a, b) };
            Sig::Cmp(op, a, b)
        }
        Op::GetElem { elem_size } => Sig::GetElem(elem_size, ops[0], ops[1]),
        Op::Cast(op) => Sig::Cast(op, ops[0]),
        _ => return None,
    })
}

/// Value-number `f`, replacing dominated duplicates. Returns the number of
/// instructions removed. Requires a fresh dominator tree.
pub fn run(m: &mut Module, f: FuncId) -> CompileResult<usize> {
    enum Frame {
        Enter(BlockId),
        Exit(Vec<Sig>),
    }

    let mut table: HashMap<Sig, ValueId> = HashMap::new();
    let mut removed = 0usize;
    let mut walk = vec![Frame::Enter(m.func(f).entry())];

    while let Some(frame) = walk.pop() {
        let b = match frame {
            Frame::Enter(b) => b,
            Frame::Exit(added) => {
                for sig in added {
                    table.remove(&sig);
                }
                continue;
            }
        };

        let mut added = Vec::new();
        for v in m.block(b).insts.clone() {
            let Some(sig) = signature(m, v) else { continue };
            match table.get(&sig) {
                Some(&leader) => {
                    m.replace_all_uses(v, leader);
                    m.remove_inst(v);
                    removed += 1;
                }
                None => {
                    table.insert(sig.clone(), v);
                    added.push(sig);
                }
            }
        }

        walk.push(Frame::Exit(added));
        for &c in m.block(b).dom_children.iter().rev() {
            walk.push(Frame::Enter(c));
        }
    }

    if removed > 0 {
        log::debug!("gvn: removed {} duplicates in {}", removed, m.func(f).name);
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::cfg;
    use crate::ir::Type;

    #[test]
    fn commutative_duplicate_collapses() {
        let mut m = Module::new();
        let f = m.add_function("f", Type::I32, &[Type::I32, Type::I32]);
        let entry = m.add_block(f, "entry");
        let [a, b] = [m.func(f).params[0], m.func(f).params[1]];
        let s1 = m.append_inst(entry, Op::Binary(BinOp::Add), Type::I32, vec![a, b], None);
        let s2 = m.append_inst(entry, Op::Binary(BinOp::Add), Type::I32, vec![b, a], None);
        let sum = m.append_inst(entry, Op::Binary(BinOp::Mul), Type::I32, vec![s1, s2], None);
        m.append_inst(entry, Op::Ret, Type::Void, vec![sum], None);
        cfg::analyze(&mut m, f).unwrap();

        assert_eq!(run(&mut m, f).unwrap(), 1);
        assert!(m.inst(s2).is_none());
        assert_eq!(m.inst(sum).unwrap().operands, vec![s1, s1]);
    }

    #[test]
    fn subtraction_is_not_commuted() {
        let mut m = Module::new();
        let f = m.add_function("f", Type::I32, &[Type::I32, Type::I32]);
        let entry = m.add_block(f, "entry");
        let [a, b] = [m.func(f).params[0], m.func(f).params[1]];
        let d1 = m.append_inst(entry, Op::Binary(BinOp::Sub), Type::I32, vec![a, b], None);
        let d2 = m.append_inst(entry, Op::Binary(BinOp::Sub), Type::I32, vec![b, a], None);
        let sum = m.append_inst(entry, Op::Binary(BinOp::Add), Type::I32, vec![d1, d2], None);
        m.append_inst(entry, Op::Ret, Type::Void, vec![sum], None);
        cfg::analyze(&mut m, f).unwrap();

        assert_eq!(run(&mut m, f).unwrap(), 0);
        assert!(m.inst(d2).is_some());
    }

    #[test]
    fn sibling_branches_do_not_share() {
        // The same expression in two sibling branches has no dominating
        // leader; neither copy may be removed.
        let mut m = Module::new();
        let f = m.add_function("f", Type::I32, &[Type::I32]);
        let entry = m.add_block(f, "entry");
        let then_bb = m.add_block(f, "then");
        let else_bb = m.add_block(f, "else");
        let a = m.func(f).params[0];
        let zero = m.const_int(0);
        let cond = m.append_inst(entry, Op::Cmp(CmpOp::Ne), Type::I32, vec![a, zero], None);
        m.append_inst(entry, Op::CondBr { then_bb, else_bb }, Type::Void, vec![cond], None);
        let t1 = m.append_inst(then_bb, Op::Binary(BinOp::Mul), Type::I32, vec![a, a], None);
        m.append_inst(then_bb, Op::Ret, Type::Void, vec![t1], None);
        let t2 = m.append_inst(else_bb, Op::Binary(BinOp::Mul), Type::I32, vec![a, a], None);
        m.append_inst(else_bb, Op::Ret, Type::Void, vec![t2], None);
        cfg::analyze(&mut m, f).unwrap();

        assert_eq!(run(&mut m, f).unwrap(), 0);
        assert!(m.inst(t1).is_some() && m.inst(t2).is_some());
    }

    #[test]
    fn dominating_expression_reaches_both_branches() {
        let mut m = Module::new();
        let f = m.add_function("f", Type::I32, &[Type::I32]);
        let entry = m.add_block(f, "entry");
        let then_bb = m.add_block(f, "then");
        let else_bb = m.add_block(f, "else");
        let a = m.func(f).params[0];
        let zero = m.const_int(0);
        let lead = m.append_inst(entry, Op::Binary(BinOp::Mul), Type::I32, vec![a, a], None);
        let cond = m.append_inst(entry, Op::Cmp(CmpOp::Ne), Type::I32, vec![lead, zero], None);
        m.append_inst(entry, Op::CondBr { then_bb, else_bb }, Type::Void, vec![cond], None);
        let t1 = m.append_inst(then_bb, Op::Binary(BinOp::Mul), Type::I32, vec![a, a], None);
        m.append_inst(then_bb, Op::Ret, Type::Void, vec![t1], None);
        let t2 = m.append_inst(else_bb, Op::Binary(BinOp::Mul), Type::I32, vec![a, a], None);
        m.append_inst(else_bb, Op::Ret, Type::Void, vec![t2], None);
        cfg::analyze(&mut m, f).unwrap();

        assert_eq!(run(&mut m, f).unwrap(), 2);
        let then_ret = m.terminator(then_bb).unwrap();
        assert_eq!(m.inst(then_ret).unwrap().operands, vec![lead]);
        // Idempotence: a second run finds nothing.
        assert_eq!(run(&mut m, f).unwrap(), 0);
    }
}
