//! Register allocation.
//!
//! A pre-order walk of the dominator tree hands out registers from a fixed
//! pool. In SSA form a value's live range is confined to the dominance
//! region of its definition, so carrying the register map down the tree
//! and restoring it for siblings keeps the map consistent: two values can
//! share a register only if their ranges are disjoint along every path.
//!
//! A register is released at the operand's last local use when the value
//! is not live out of the block, and on entry to a child whose live-in no
//! longer contains the value. When the pool is empty the value is marked
//! stack-resident for good; phi results are always stack-resident, which
//! lets the later copy sequentialization target a fixed home per phi.
//!
//! Requires dominators and liveness; parameters are treated as
//! definitions at the top of the entry block.

use hashbrown::HashMap;

use crate::analysis::liveness;
use crate::core::CompileResult;
use crate::ir::{BlockId, FuncId, Loc, Module, Op, PhysReg, ValueId};

struct Alloc {
    map: HashMap<ValueId, PhysReg>,
    free: Vec<PhysReg>,
}

impl Alloc {
    fn release(&mut self, v: ValueId) {
        if let Some(r) = self.map.remove(&v) {
            self.free.push(r);
        }
    }
}

/// Assign a location to every register candidate of `f`, drawing from
/// `pool` in order.
pub fn run(m: &mut Module, f: FuncId, pool: &[PhysReg]) -> CompileResult<()> {
    let mut state = Alloc {
        map: HashMap::new(),
        free: pool.iter().rev().copied().collect(),
    };

    // Parameters define their values before the entry block runs.
    let entry = m.func(f).entry();
    for p in m.func(f).params.clone() {
        define(m, f, &mut state, p, used_later(m, entry, p, 0));
    }

    enum Frame {
        Enter(BlockId),
        Exit(HashMap<ValueId, PhysReg>, Vec<PhysReg>),
    }
    let mut walk = vec![Frame::Enter(entry)];

    while let Some(frame) = walk.pop() {
        let b = match frame {
            Frame::Enter(b) => b,
            Frame::Exit(map, free) => {
                state.map = map;
                state.free = free;
                continue;
            }
        };
        walk.push(Frame::Exit(state.map.clone(), state.free.clone()));

        // Values live at a sibling but not here release their registers
        // for this subtree.
        let mut stale: Vec<ValueId> = state
            .map
            .keys()
            .copied()
            .filter(|v| !m.block(b).live_in.contains(v))
            .collect();
        stale.sort_by_key(|v| v.0);
        for v in stale {
            state.release(v);
        }

        let insts = m.block(b).insts.clone();
        let last_use = local_last_uses(m, &insts);
        for (i, &v) in insts.iter().enumerate() {
            let Some(inst) = m.inst(v) else { continue };
            let is_phi = matches!(inst.op, Op::Phi { .. });
            let operands = inst.operands.clone();

            // Phi operands are consumed on the incoming edges, not here.
            if !is_phi {
                for &o in &operands {
                    if last_use.get(&o) == Some(&i) && !m.block(b).live_out.contains(&o) {
                        state.release(o);
                    }
                }
            }

            if !liveness::is_reg_candidate(m, v) {
                continue;
            }
            if is_phi {
                m.func_mut(f).value_locs.insert(v, Loc::Stack);
                continue;
            }
            let lives_on = last_use.get(&v).is_some_and(|&u| u > i)
                || m.block(b).live_out.contains(&v);
            define(m, f, &mut state, v, lives_on);
        }

        for &c in m.block(b).dom_children.clone().iter().rev() {
            walk.push(Frame::Enter(c));
        }
    }

    let assigned = m.func(f).value_locs.len();
    log::debug!("regalloc: {} locations assigned in {}", assigned, m.func(f).name);
    Ok(())
}

/// Give `v` its permanent location. A definition nothing ever reads gets a
/// register and returns it immediately; the write still has a target.
fn define(m: &mut Module, f: FuncId, state: &mut Alloc, v: ValueId, lives_on: bool) {
    match state.free.pop() {
        Some(r) => {
            m.func_mut(f).value_locs.insert(v, Loc::Reg(r));
            if lives_on {
                state.map.insert(v, r);
            } else {
                state.free.push(r);
            }
        }
        None => {
            m.func_mut(f).value_locs.insert(v, Loc::Stack);
        }
    }
}

/// Last index in `insts` reading each value, phi operands excluded.
fn local_last_uses(m: &Module, insts: &[ValueId]) -> HashMap<ValueId, usize> {
    let mut last = HashMap::new();
    for (i, &v) in insts.iter().enumerate() {
        if let Some(inst) = m.inst(v) {
            if matches!(inst.op, Op::Phi { .. }) {
                continue;
            }
            for &o in &inst.operands {
                last.insert(o, i);
            }
        }
    }
    last
}

/// Does anything after the top of `block` (position `from`) read `v`, or
/// is it live beyond the block?
fn used_later(m: &Module, block: BlockId, v: ValueId, from: usize) -> bool {
    if m.block(block).live_out.contains(&v) {
        return true;
    }
    m.block(block).insts[from..].iter().any(|&u| {
        m.inst(u).is_some_and(|inst| {
            !matches!(inst.op, Op::Phi { .. }) && inst.operands.contains(&v)
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::{cfg, liveness};
    use crate::ir::{BinOp, CmpOp, Type};

    fn pool(n: u8) -> Vec<PhysReg> {
        (0..n).map(PhysReg).collect()
    }

    fn prep(m: &mut Module, f: FuncId) {
        cfg::analyze(m, f).unwrap();
        liveness::run(m, f);
    }

    fn loc(m: &Module, f: FuncId, v: ValueId) -> Loc {
        m.func(f).value_locs[&v]
    }

    #[test]
    fn registers_are_reused_after_last_use() {
        let mut m = Module::new();
        let f = m.add_function("f", Type::I32, &[Type::I32, Type::I32]);
        let entry = m.add_block(f, "entry");
        let [a, b] = [m.func(f).params[0], m.func(f).params[1]];
        let sum = m.append_inst(entry, Op::Binary(BinOp::Add), Type::I32, vec![a, b], None);
        m.append_inst(entry, Op::Ret, Type::Void, vec![sum], None);
        prep(&mut m, f);

        // Two registers suffice: both params die at the add.
        run(&mut m, f, &pool(2)).unwrap();
        assert!(matches!(loc(&m, f, a), Loc::Reg(_)));
        assert!(matches!(loc(&m, f, b), Loc::Reg(_)));
        assert!(matches!(loc(&m, f, sum), Loc::Reg(_)));
    }

    #[test]
    fn pool_exhaustion_spills() {
        let mut m = Module::new();
        let f = m.add_function("f", Type::I32, &[]);
        let entry = m.add_block(f, "entry");
        let one = m.const_int(1);
        // Chain of adds where every intermediate stays live to the end.
        let mut vals = Vec::new();
        let mut acc = m.append_inst(entry, Op::Binary(BinOp::Add), Type::I32, vec![one, one], None);
        vals.push(acc);
        for _ in 0..4 {
            acc = m.append_inst(entry, Op::Binary(BinOp::Add), Type::I32, vec![acc, one], None);
            vals.push(acc);
        }
        // A final sum over all intermediates keeps them alive.
        let mut total = vals[0];
        for &v in &vals[1..] {
            total = m.append_inst(entry, Op::Binary(BinOp::Add), Type::I32, vec![total, v], None);
        }
        m.append_inst(entry, Op::Ret, Type::Void, vec![total], None);
        prep(&mut m, f);

        run(&mut m, f, &pool(2)).unwrap();
        let spilled = m
            .func(f)
            .value_locs
            .values()
            .filter(|l| matches!(l, Loc::Stack))
            .count();
        assert!(spilled > 0, "two registers cannot hold this chain");
        // Everything got some location.
        for &v in &vals {
            assert!(m.func(f).value_locs.contains_key(&v));
        }
    }

    #[test]
    fn phi_results_always_live_on_the_stack() {
        let mut m = Module::new();
        let f = m.add_function("f", Type::I32, &[Type::I32]);
        let entry = m.add_block(f, "entry");
        let then_bb = m.add_block(f, "then");
        let else_bb = m.add_block(f, "else");
        let join = m.add_block(f, "join");
        let a = m.func(f).params[0];
        let zero = m.const_int(0);
        let cond = m.append_inst(entry, Op::Cmp(CmpOp::Ne), Type::I32, vec![a, zero], None);
        m.append_inst(entry, Op::CondBr { then_bb, else_bb }, Type::Void, vec![cond], None);
        let one = m.const_int(1);
        let two = m.const_int(2);
        let x1 = m.append_inst(then_bb, Op::Binary(BinOp::Add), Type::I32, vec![a, one], None);
        m.append_inst(then_bb, Op::Br { target: join }, Type::Void, vec![], None);
        let x2 = m.append_inst(else_bb, Op::Binary(BinOp::Add), Type::I32, vec![a, two], None);
        m.append_inst(else_bb, Op::Br { target: join }, Type::Void, vec![], None);
        let phi = m.insert_inst_at(join, 0, Op::Phi { preds: vec![] }, Type::I32, vec![], None);
        m.add_phi_incoming(phi, x1, then_bb);
        m.add_phi_incoming(phi, x2, else_bb);
        m.append_inst(join, Op::Ret, Type::Void, vec![phi], None);
        prep(&mut m, f);

        run(&mut m, f, &pool(8)).unwrap();
        assert!(matches!(loc(&m, f, phi), Loc::Stack));
        assert!(matches!(loc(&m, f, x1), Loc::Reg(_)));
        assert!(matches!(loc(&m, f, x2), Loc::Reg(_)));
    }

    #[test]
    fn sibling_branches_can_share_registers() {
        let mut m = Module::new();
        let f = m.add_function("f", Type::I32, &[Type::I32]);
        let entry = m.add_block(f, "entry");
        let then_bb = m.add_block(f, "then");
        let else_bb = m.add_block(f, "else");
        let a = m.func(f).params[0];
        let zero = m.const_int(0);
        let cond = m.append_inst(entry, Op::Cmp(CmpOp::Ne), Type::I32, vec![a, zero], None);
        m.append_inst(entry, Op::CondBr { then_bb, else_bb }, Type::Void, vec![cond], None);
        let t1 = m.append_inst(then_bb, Op::Binary(BinOp::Add), Type::I32, vec![a, a], None);
        m.append_inst(then_bb, Op::Ret, Type::Void, vec![t1], None);
        let t2 = m.append_inst(else_bb, Op::Binary(BinOp::Mul), Type::I32, vec![a, a], None);
        m.append_inst(else_bb, Op::Ret, Type::Void, vec![t2], None);
        prep(&mut m, f);

        // Pool of 3: a and cond take two; each branch value fits in the
        // third because the sibling's state is restored between them.
        run(&mut m, f, &pool(3)).unwrap();
        assert!(matches!(loc(&m, f, t1), Loc::Reg(_)));
        assert!(matches!(loc(&m, f, t2), Loc::Reg(_)));
    }

    #[test]
    fn value_live_through_a_loop_keeps_its_register() {
        let mut m = Module::new();
        let f = m.add_function("f", Type::I32, &[Type::I32]);
        let entry = m.add_block(f, "entry");
        let header = m.add_block(f, "header");
        let body = m.add_block(f, "body");
        let exit = m.add_block(f, "exit");
        let a = m.func(f).params[0];
        let zero = m.const_int(0);
        let base = m.append_inst(entry, Op::Binary(BinOp::Add), Type::I32, vec![a, a], None);
        m.append_inst(entry, Op::Br { target: header }, Type::Void, vec![], None);
        let cond = m.append_inst(header, Op::Cmp(CmpOp::Gt), Type::I32, vec![a, zero], None);
        m.append_inst(header, Op::CondBr { then_bb: body, else_bb: exit }, Type::Void, vec![cond], None);
        let inner = m.append_inst(body, Op::Binary(BinOp::Mul), Type::I32, vec![a, a], None);
        let _use_inner = m.append_inst(body, Op::Binary(BinOp::Add), Type::I32, vec![inner, inner], None);
        m.append_inst(body, Op::Br { target: header }, Type::Void, vec![], None);
        m.append_inst(exit, Op::Ret, Type::Void, vec![base], None);
        prep(&mut m, f);

        run(&mut m, f, &pool(4)).unwrap();
        let Loc::Reg(base_reg) = loc(&m, f, base) else { panic!("base spilled") };
        // Nothing inside the loop may reuse base's register.
        for v in [cond, inner] {
            if let Loc::Reg(r) = loc(&m, f, v) {
                assert_ne!(r, base_reg, "register clobbered while live");
            }
        }
    }
}
