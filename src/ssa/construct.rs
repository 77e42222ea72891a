//! SSA construction (mem2reg).
//!
//! Promotes scalar stack allocations to SSA values: phi nodes are inserted
//! at the iterated dominance frontier of the stores, then a pre-order walk
//! of the dominator tree renames loads and stores against per-allocation
//! definition stacks. Arrays stay memory-resident; a constant offset per
//! access is not guaranteed for them.
//!
//! Requires fresh dominance information on entry.

use hashbrown::{HashMap, HashSet};

use crate::core::CompileResult;
use crate::ir::{BlockId, FuncId, Module, Op, Type, ValueId};

/// Promote every promotable scalar alloca of `f`. Returns the number of
/// allocations promoted.
pub fn run(m: &mut Module, f: FuncId) -> CompileResult<usize> {
    let allocas = promotable_allocas(m, f);
    if allocas.is_empty() {
        return Ok(0);
    }

    // Phi insertion at iterated dominance frontiers, one worklist per
    // allocation. A frontier block that was not itself a definition block
    // becomes one once it holds a phi.
    let mut phi_owner: HashMap<ValueId, ValueId> = HashMap::new();
    for &a in &allocas {
        let def_blocks: HashSet<BlockId> = m
            .value(a)
            .users
            .clone()
            .into_iter()
            .filter(|&u| is_store_to(m, u, a))
            .filter_map(|u| m.inst_block(u))
            .collect();

        let mut phi_blocks: HashSet<BlockId> = HashSet::new();
        let mut work: Vec<BlockId> = def_blocks.iter().copied().collect();
        while let Some(b) = work.pop() {
            for d in m.block(b).frontier.clone() {
                if phi_blocks.insert(d) {
                    let base = phi_base_name(m, a);
                    let name = m.names.fresh(&base);
                    let ty = alloca_elem_ty(m, a);
                    let phi = m.insert_inst_at(
                        d,
                        0,
                        Op::Phi { preds: vec![] },
                        ty,
                        vec![],
                        Some(name),
                    );
                    phi_owner.insert(phi, a);
                    if !def_blocks.contains(&d) {
                        work.push(d);
                    }
                }
            }
        }
    }

    rename(m, f, &allocas, &phi_owner);

    // The loads were rewritten and the stores consumed; retire them and
    // then the allocations themselves.
    let mut dead = Vec::new();
    for &a in &allocas {
        dead.extend(m.value(a).users.clone());
    }
    for v in dead {
        m.remove_inst(v);
    }
    for &a in &allocas {
        debug_assert!(m.value(a).users.is_empty());
        m.remove_inst(a);
    }

    log::debug!(
        "mem2reg: promoted {} allocas, inserted {} phis in {}",
        allocas.len(),
        phi_owner.len(),
        m.func(f).name
    );
    Ok(allocas.len())
}

/// Element type of an alloca value (the promoted SSA value's type).
fn alloca_elem_ty(m: &Module, a: ValueId) -> Type {
    match m.inst(a).map(|i| &i.op) {
        Some(&Op::Alloca { elem_ty, .. }) => elem_ty,
        _ => Type::I32,
    }
}

/// Scalar allocas whose address never escapes: every use is a load from it
/// or a store that writes *to* it (not one that stores the address).
fn promotable_allocas(m: &Module, f: FuncId) -> Vec<ValueId> {
    let mut out = Vec::new();
    for &b in &m.func(f).blocks {
        for &v in &m.block(b).insts {
            let Some(inst) = m.inst(v) else { continue };
            let Op::Alloca { elems, .. } = inst.op else { continue };
            if elems != 1 {
                continue; // arrays are never promoted
            }
            let promotable = m.value(v).users.iter().all(|&u| {
                match m.inst(u) {
                    Some(user) => match user.op {
                        Op::Load => true,
                        Op::Store => is_store_to(m, u, v),
                        _ => false,
                    },
                    None => false,
                }
            });
            if promotable {
                out.push(v);
            }
        }
    }
    out
}

/// Is `u` a store whose *address* operand is `a` (and not its value)?
fn is_store_to(m: &Module, u: ValueId, a: ValueId) -> bool {
    match m.inst(u) {
        Some(inst) if matches!(inst.op, Op::Store) => inst.operands[1] == a && inst.operands[0] != a,
        _ => false,
    }
}

fn phi_base_name(m: &Module, a: ValueId) -> String {
    match &m.value(a).name {
        Some(n) => n.clone(),
        None => "promoted".to_string(),
    }
}

/// Pre-order dominator-tree walk carrying one definition stack per
/// allocation. Explicit work stack; enter frames process a block and
/// exit frames pop exactly what the block pushed.
fn rename(
    m: &mut Module,
    f: FuncId,
    allocas: &[ValueId],
    phi_owner: &HashMap<ValueId, ValueId>,
) {
    enum Frame {
        Enter(BlockId),
        Exit(Vec<(ValueId, usize)>),
    }

    let mut stacks: HashMap<ValueId, Vec<ValueId>> = allocas.iter().map(|&a| (a, vec![])).collect();
    let mut walk = vec![Frame::Enter(m.func(f).entry())];

    while let Some(frame) = walk.pop() {
        let b = match frame {
            Frame::Enter(b) => b,
            Frame::Exit(pushes) => {
                for (a, count) in pushes {
                    let stack = stacks.get_mut(&a).expect("stack exists for every alloca");
                    stack.truncate(stack.len() - count);
                }
                continue;
            }
        };

        let mut pushes: HashMap<ValueId, usize> = HashMap::new();
        for v in m.block(b).insts.clone() {
            let Some(inst) = m.inst(v) else { continue };
            let op = inst.op.clone();
            let operands = inst.operands.clone();
            match op {
                Op::Phi { .. } => {
                    if let Some(&a) = phi_owner.get(&v) {
                        stacks.get_mut(&a).expect("tracked alloca").push(v);
                        *pushes.entry(a).or_default() += 1;
                    }
                }
                Op::Store => {
                    let [value, addr] = [operands[0], operands[1]];
                    if stacks.contains_key(&addr) && is_store_to(m, v, addr) {
                        stacks.get_mut(&addr).expect("tracked alloca").push(value);
                        *pushes.entry(addr).or_default() += 1;
                    }
                }
                Op::Load => {
                    let addr = operands[0];
                    if stacks.contains_key(&addr) {
                        let current = match stacks[&addr].last() {
                            Some(&def) => def,
                            // Read along a path with no prior store; the
                            // front end guarantees initialization, so any
                            // value is acceptable here.
                            None => m.const_int(0),
                        };
                        m.replace_all_uses(v, current);
                    }
                }
                _ => {}
            }
        }

        // Fill successor phi operands from this edge.
        for s in m.block(b).succs.clone() {
            for v in m.block(s).insts.clone() {
                if !matches!(m.inst(v).map(|i| &i.op), Some(Op::Phi { .. })) {
                    continue;
                }
                if let Some(&a) = phi_owner.get(&v) {
                    let current = match stacks[&a].last() {
                        Some(&def) => def,
                        None => m.const_int(0),
                    };
                    m.add_phi_incoming(v, current, b);
                }
            }
        }

        walk.push(Frame::Exit(pushes.into_iter().collect()));
        for &c in m.block(b).dom_children.iter().rev() {
            walk.push(Frame::Enter(c));
        }
    }
}
