//! Global code motion.
//!
//! Pure instructions are unpinned from their blocks and rescheduled. For
//! each floating instruction the pass computes the earliest legal block
//! (the deepest dominator-tree block among its operands' placements) and
//! the latest useful block (the dominator-tree LCA of its users'
//! placements, a phi user counting as the predecessor block its operand
//! arrives from). The instruction then lands on the block of minimum loop
//! depth along the dominator path from latest up to earliest, preferring
//! the latest such block, so loop-invariant work migrates out of loops
//! without lengthening any path that never needs it.
//!
//! Users are scheduled before their operands; inside a block an operand is
//! re-inserted before its first user, so dependence order is preserved.
//!
//! Requires dominators and loop depths; liveness runs after this pass.

use hashbrown::{HashMap, HashSet};

use crate::core::{CompileError, CompileResult};
use crate::ir::{BlockId, FuncId, Module, Op, ValueId};

/// Reschedule the pure instructions of `f`. Returns how many changed block.
pub fn run(m: &mut Module, f: FuncId) -> CompileResult<usize> {
    let mut floating: HashSet<ValueId> = HashSet::new();
    for &b in &m.func(f).blocks {
        for &v in &m.block(b).insts {
            if let Some(inst) = m.inst(v) {
                if !inst.op.is_pinned() {
                    floating.insert(v);
                }
            }
        }
    }
    if floating.is_empty() {
        return Ok(0);
    }

    let earliest = schedule_early(m, f, &floating);
    let (place, order) = schedule_late(m, f, &floating, &earliest)?;

    // Users first: an operand re-inserted before its first in-block user
    // can only see users that already sit at their final position.
    let mut moved = 0usize;
    for v in order {
        let best = place[&v];
        let from = m.inst(v).map(|i| i.block);
        let index = insertion_index(m, best, v);
        m.move_inst(v, best, index);
        if from != Some(best) {
            moved += 1;
        }
    }

    if moved > 0 {
        log::debug!("gcm: moved {} instructions in {}", moved, m.func(f).name);
    }
    Ok(moved)
}

/// Earliest legal block per floating instruction: the operand placement of
/// greatest dominator depth, or the entry block when every operand is a
/// constant, global or parameter.
fn schedule_early(
    m: &Module,
    f: FuncId,
    floating: &HashSet<ValueId>,
) -> HashMap<ValueId, BlockId> {
    let entry = m.func(f).entry();
    let mut early: HashMap<ValueId, BlockId> = HashMap::new();

    for &start in floating {
        if early.contains_key(&start) {
            continue;
        }
        let mut stack = vec![start];
        while let Some(&v) = stack.last() {
            if early.contains_key(&v) {
                stack.pop();
                continue;
            }
            let operands = m.inst(v).map(|i| i.operands.clone()).unwrap_or_default();
            let pending: Vec<ValueId> = operands
                .iter()
                .copied()
                .filter(|o| floating.contains(o) && !early.contains_key(o))
                .collect();
            if !pending.is_empty() {
                stack.extend(pending);
                continue;
            }
            stack.pop();
            let mut best = entry;
            for o in operands {
                let ob = if floating.contains(&o) {
                    Some(early[&o])
                } else {
                    m.inst(o).map(|i| i.block)
                };
                if let Some(ob) = ob {
                    if m.block(ob).dom_depth > m.block(best).dom_depth {
                        best = ob;
                    }
                }
            }
            early.insert(v, best);
        }
    }
    early
}

/// Final placement per floating instruction, plus the completion order
/// (every instruction after all of its floating users).
fn schedule_late(
    m: &Module,
    f: FuncId,
    floating: &HashSet<ValueId>,
    earliest: &HashMap<ValueId, BlockId>,
) -> CompileResult<(HashMap<ValueId, BlockId>, Vec<ValueId>)> {
    let mut place: HashMap<ValueId, BlockId> = HashMap::new();
    let mut order: Vec<ValueId> = Vec::new();

    for &start in floating {
        if place.contains_key(&start) {
            continue;
        }
        let mut stack = vec![start];
        while let Some(&v) = stack.last() {
            if place.contains_key(&v) {
                stack.pop();
                continue;
            }
            let users = m.value(v).users.clone();
            let pending: Vec<ValueId> = users
                .iter()
                .copied()
                .filter(|u| floating.contains(u) && !place.contains_key(u))
                .collect();
            if !pending.is_empty() {
                stack.extend(pending);
                continue;
            }
            stack.pop();

            let mut latest: Option<BlockId> = None;
            for u in users {
                let Some(uinst) = m.inst(u) else { continue };
                if let Op::Phi { preds } = &uinst.op {
                    for (slot, &operand) in uinst.operands.iter().enumerate() {
                        if operand == v {
                            latest = Some(lca(m, latest, preds[slot]));
                        }
                    }
                } else if floating.contains(&u) {
                    latest = Some(lca(m, latest, place[&u]));
                } else {
                    latest = Some(lca(m, latest, uinst.block));
                }
            }

            let best = match latest {
                // Unused pure instruction; leave it where it stands.
                None => m.inst(v).map(|i| i.block).unwrap_or(earliest[&v]),
                Some(latest) => pick_block(m, f, v, earliest[&v], latest)?,
            };
            place.insert(v, best);
            order.push(v);
        }
    }
    Ok((place, order))
}

/// Minimum-loop-depth block on the dominator path latest → earliest,
/// preferring the block closest to latest.
fn pick_block(
    m: &Module,
    f: FuncId,
    v: ValueId,
    earliest: BlockId,
    latest: BlockId,
) -> CompileResult<BlockId> {
    let mut best = latest;
    let mut cur = latest;
    loop {
        if m.block(cur).loop_depth < m.block(best).loop_depth {
            best = cur;
        }
        if cur == earliest {
            return Ok(best);
        }
        cur = match m.block(cur).idom {
            Some(i) => i,
            None => {
                return Err(CompileError::BrokenSchedule {
                    func: m.func(f).name.clone(),
                    value: m.display_name(v),
                    earliest: m.block(earliest).name.clone(),
                    latest: m.block(latest).name.clone(),
                })
            }
        };
    }
}

/// Dominator-tree lowest common ancestor; `None` acts as the identity.
fn lca(m: &Module, a: Option<BlockId>, b: BlockId) -> BlockId {
    let Some(mut a) = a else { return b };
    let mut b = b;
    while m.block(a).dom_depth > m.block(b).dom_depth {
        a = m.block(a).idom.unwrap_or(a);
    }
    while m.block(b).dom_depth > m.block(a).dom_depth {
        b = m.block(b).idom.unwrap_or(b);
    }
    while a != b {
        a = m.block(a).idom.unwrap_or(a);
        b = m.block(b).idom.unwrap_or(b);
    }
    a
}

/// Index in `block` just before the first user of `v`, or before the
/// terminator when no user lives there. Positions are counted as if `v`
/// were already detached, which is how [`Module::move_inst`] inserts.
fn insertion_index(m: &Module, block: BlockId, v: ValueId) -> usize {
    let mut index = 0;
    for &u in &m.block(block).insts {
        if u == v {
            continue;
        }
        if let Some(inst) = m.inst(u) {
            // Phi operands are read on the incoming edge, not here.
            if !matches!(inst.op, Op::Phi { .. }) && inst.operands.contains(&v) {
                return index;
            }
        }
        index += 1;
    }
    index.saturating_sub(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::cfg;
    use crate::ir::{BinOp, CmpOp, Type};

    /// while (i < n) { s = s + a*b; i = i + 1 } with a*b computed in the
    /// body. Returns (f, body, mul).
    fn build_loop_with_invariant(m: &mut Module) -> (FuncId, BlockId, ValueId) {
        let f = m.add_function("f", Type::I32, &[Type::I32, Type::I32, Type::I32]);
        let entry = m.add_block(f, "entry");
        let header = m.add_block(f, "header");
        let body = m.add_block(f, "body");
        let exit = m.add_block(f, "exit");
        let [a, b, n] = [m.func(f).params[0], m.func(f).params[1], m.func(f).params[2]];
        let zero = m.const_int(0);
        let one = m.const_int(1);

        m.append_inst(entry, Op::Br { target: header }, Type::Void, vec![], None);

        let i_phi = m.insert_inst_at(header, 0, Op::Phi { preds: vec![] }, Type::I32, vec![], Some("i".into()));
        let s_phi = m.insert_inst_at(header, 1, Op::Phi { preds: vec![] }, Type::I32, vec![], Some("s".into()));
        let cond = m.append_inst(header, Op::Cmp(CmpOp::Lt), Type::I32, vec![i_phi, n], None);
        m.append_inst(header, Op::CondBr { then_bb: body, else_bb: exit }, Type::Void, vec![cond], None);

        let mul = m.append_inst(body, Op::Binary(BinOp::Mul), Type::I32, vec![a, b], Some("ab".into()));
        let s_next = m.append_inst(body, Op::Binary(BinOp::Add), Type::I32, vec![s_phi, mul], None);
        let i_next = m.append_inst(body, Op::Binary(BinOp::Add), Type::I32, vec![i_phi, one], None);
        m.append_inst(body, Op::Br { target: header }, Type::Void, vec![], None);

        m.add_phi_incoming(i_phi, zero, entry);
        m.add_phi_incoming(i_phi, i_next, body);
        m.add_phi_incoming(s_phi, zero, entry);
        m.add_phi_incoming(s_phi, s_next, body);

        m.append_inst(exit, Op::Ret, Type::Void, vec![s_phi], None);
        (f, body, mul)
    }

    #[test]
    fn loop_invariant_multiply_is_hoisted() {
        let mut m = Module::new();
        let (f, body, mul) = build_loop_with_invariant(&mut m);
        cfg::analyze(&mut m, f).unwrap();
        let moved = run(&mut m, f).unwrap();
        assert!(moved >= 1);

        let home = m.inst(mul).unwrap().block;
        assert_ne!(home, body, "invariant multiply left the loop body");
        assert_eq!(m.block(home).loop_depth, 0);

        // The iteration increment depends on the phi; it must stay inside.
        let incr = m.block(body).insts.iter().any(|&v| {
            matches!(m.inst(v).map(|i| &i.op), Some(Op::Binary(BinOp::Add)))
        });
        assert!(incr, "loop-variant adds stay in the body");
    }

    #[test]
    fn operand_stays_ahead_of_user_after_motion() {
        let mut m = Module::new();
        let (f, _, mul) = build_loop_with_invariant(&mut m);
        cfg::analyze(&mut m, f).unwrap();
        run(&mut m, f).unwrap();

        // Wherever anything landed, every operand defined in the same
        // block precedes its user.
        for &b in &m.func(f).blocks {
            let insts = &m.block(b).insts;
            for (i, &v) in insts.iter().enumerate() {
                let Some(inst) = m.inst(v) else { continue };
                if matches!(inst.op, Op::Phi { .. }) {
                    continue;
                }
                for &o in &inst.operands {
                    if let Some(pos) = insts.iter().position(|&x| x == o) {
                        assert!(pos < i, "operand defined after use");
                    }
                }
            }
        }
        assert!(m.inst(mul).is_some());
    }

    #[test]
    fn value_used_on_one_side_sinks_into_it() {
        // t = a*a is only used in the then-branch; GCM sinks it there.
        let mut m = Module::new();
        let f = m.add_function("f", Type::I32, &[Type::I32]);
        let entry = m.add_block(f, "entry");
        let then_bb = m.add_block(f, "then");
        let else_bb = m.add_block(f, "else");
        let a = m.func(f).params[0];
        let zero = m.const_int(0);
        let t = m.append_inst(entry, Op::Binary(BinOp::Mul), Type::I32, vec![a, a], None);
        let cond = m.append_inst(entry, Op::Cmp(CmpOp::Ne), Type::I32, vec![a, zero], None);
        m.append_inst(entry, Op::CondBr { then_bb, else_bb }, Type::Void, vec![cond], None);
        m.append_inst(then_bb, Op::Ret, Type::Void, vec![t], None);
        m.append_inst(else_bb, Op::Ret, Type::Void, vec![zero], None);
        cfg::analyze(&mut m, f).unwrap();

        run(&mut m, f).unwrap();
        assert_eq!(m.inst(t).unwrap().block, then_bb);
        // It sits before the return that reads it.
        assert_eq!(m.block(then_bb).insts[0], t);
    }
}
