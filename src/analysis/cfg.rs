//! Control-flow and dominance analysis.
//!
//! Recomputes, for one function: predecessor/successor edges, dominator
//! sets (iterative intersection fixpoint), immediate dominators, dominance
//! frontiers, the dominator tree with per-block depth, and loop nesting
//! depth from natural loops of back-edges.
//!
//! Every CFG-mutating pass leaves these fields stale; callers re-run
//! [`analyze`] before the next dominance-dependent pass.

use hashbrown::{HashMap, HashSet};

use crate::core::{CompileError, CompileResult};
use crate::ir::{BlockId, FuncId, Module, Op};

/// Recompute all CFG and dominance fields of `f`.
pub fn analyze(m: &mut Module, f: FuncId) -> CompileResult<()> {
    rebuild_edges(m, f)?;
    let reachable = reachable_blocks(m, f);
    compute_dominators(m, f, &reachable);
    compute_idoms(m, f, &reachable);
    compute_frontiers(m, f, &reachable);
    build_dom_tree(m, f, &reachable);
    compute_loop_depth(m, f, &reachable);
    log::trace!(
        "cfg: analyzed {} ({} blocks, {} reachable)",
        m.func(f).name,
        m.func(f).blocks.len(),
        reachable.len()
    );
    Ok(())
}

/// Rebuild symmetric pred/succ edge sets from block terminators.
///
/// Checks the single-terminator invariant while walking: the terminator
/// must exist and must be the last instruction. A conditional branch
/// whose arms share a target contributes a single edge, so pred/succ
/// lists never carry duplicates.
fn rebuild_edges(m: &mut Module, f: FuncId) -> CompileResult<()> {
    let blocks = m.func(f).blocks.clone();
    for &b in &blocks {
        let block = m.block_mut(b);
        block.preds.clear();
        block.succs.clear();
    }
    for &b in &blocks {
        for (i, &v) in m.block(b).insts.iter().enumerate() {
            let inst = m.inst(v).expect("block lists hold instructions");
            if inst.op.is_terminator() && i + 1 != m.block(b).insts.len() {
                return Err(CompileError::MisplacedTerminator {
                    func: m.func(f).name.clone(),
                    block: m.block(b).name.clone(),
                    value: m.display_name(v),
                });
            }
        }
        let term = m.terminator(b).ok_or_else(|| CompileError::MissingTerminator {
            func: m.func(f).name.clone(),
            block: m.block(b).name.clone(),
        })?;
        let succs: Vec<BlockId> = match &m.inst(term).expect("terminator is an instruction").op {
            Op::Br { target } => vec![*target],
            Op::CondBr { then_bb, else_bb } if then_bb == else_bb => vec![*then_bb],
            Op::CondBr { then_bb, else_bb } => vec![*then_bb, *else_bb],
            Op::Ret => vec![],
            _ => unreachable!("is_terminator covers exactly the branch opcodes"),
        };
        for s in succs {
            m.block_mut(b).succs.push(s);
            m.block_mut(s).preds.push(b);
        }
    }
    Ok(())
}

fn reachable_blocks(m: &Module, f: FuncId) -> HashSet<BlockId> {
    let mut seen = HashSet::new();
    let mut work = vec![m.func(f).entry()];
    while let Some(b) = work.pop() {
        if !seen.insert(b) {
            continue;
        }
        work.extend(m.block(b).succs.iter().copied());
    }
    seen
}

/// Delete blocks the entry cannot reach, along with their instructions.
/// Phi inputs arriving over edges from deleted blocks are dropped so the
/// surviving graph stays consistent. Returns the number of blocks removed.
pub fn prune_unreachable(m: &mut Module, f: FuncId) -> CompileResult<usize> {
    rebuild_edges(m, f)?;
    let reachable = reachable_blocks(m, f);
    let doomed: Vec<BlockId> = m
        .func(f)
        .blocks
        .iter()
        .copied()
        .filter(|b| !reachable.contains(b))
        .collect();
    if doomed.is_empty() {
        return Ok(0);
    }

    let doomed_set: HashSet<BlockId> = doomed.iter().copied().collect();
    for &b in m.func(f).blocks.clone().iter().filter(|b| reachable.contains(*b)) {
        for v in m.block(b).insts.clone() {
            m.drop_phi_incoming_from(v, &doomed_set);
        }
    }
    for &b in &doomed {
        for v in m.block(b).insts.clone().into_iter().rev() {
            m.remove_inst(v);
        }
    }
    m.func_mut(f).blocks.retain(|b| reachable.contains(b));

    log::debug!(
        "cfg: pruned {} unreachable blocks in {}",
        doomed.len(),
        m.func(f).name
    );
    Ok(doomed.len())
}

/// Monotone fixpoint: dom(entry) = {entry}; other blocks start with the
/// full reachable set and shrink to the intersection of their
/// predecessors' sets plus themselves.
fn compute_dominators(m: &mut Module, f: FuncId, reachable: &HashSet<BlockId>) {
    let entry = m.func(f).entry();
    let blocks = m.func(f).blocks.clone();
    for &b in &blocks {
        let dom = if b == entry {
            std::iter::once(entry).collect()
        } else if reachable.contains(&b) {
            reachable.clone()
        } else {
            std::iter::once(b).collect()
        };
        m.block_mut(b).dom = dom;
    }

    let mut changed = true;
    while changed {
        changed = false;
        for &b in &blocks {
            if b == entry || !reachable.contains(&b) {
                continue;
            }
            let mut next: Option<HashSet<BlockId>> = None;
            for &p in &m.block(b).preds {
                if !reachable.contains(&p) {
                    continue;
                }
                let pdom = &m.block(p).dom;
                next = Some(match next {
                    None => pdom.clone(),
                    Some(acc) => acc.intersection(pdom).copied().collect(),
                });
            }
            let mut next = next.unwrap_or_default();
            next.insert(b);
            if next != m.block(b).dom {
                m.block_mut(b).dom = next;
                changed = true;
            }
        }
    }
}

/// The immediate dominator is the member of dom(B) \ {B} closest to B in
/// the partial order, i.e. the one with the largest dominator set.
fn compute_idoms(m: &mut Module, f: FuncId, reachable: &HashSet<BlockId>) {
    let blocks = m.func(f).blocks.clone();
    let entry = m.func(f).entry();
    for &b in &blocks {
        let idom = if b == entry || !reachable.contains(&b) {
            None
        } else {
            m.block(b)
                .dom
                .iter()
                .copied()
                .filter(|&d| d != b)
                .max_by_key(|&d| (m.block(d).dom.len(), std::cmp::Reverse(d)))
        };
        m.block_mut(b).idom = idom;
    }
}

/// Walk from each predecessor up the idom chain, adding B to every visited
/// block's frontier until (and excluding) B's immediate dominator.
fn compute_frontiers(m: &mut Module, f: FuncId, reachable: &HashSet<BlockId>) {
    let blocks = m.func(f).blocks.clone();
    for &b in &blocks {
        m.block_mut(b).frontier.clear();
    }
    for &b in &blocks {
        if !reachable.contains(&b) {
            continue;
        }
        let idom_b = m.block(b).idom;
        for p in m.block(b).preds.clone() {
            if !reachable.contains(&p) {
                continue;
            }
            let mut runner = p;
            loop {
                if Some(runner) == idom_b {
                    break;
                }
                m.block_mut(runner).frontier.insert(b);
                match m.block(runner).idom {
                    Some(next) => runner = next,
                    None => break,
                }
            }
        }
    }
}

/// Dominator-tree children (in block order) and DFS depth from the entry.
fn build_dom_tree(m: &mut Module, f: FuncId, reachable: &HashSet<BlockId>) {
    let blocks = m.func(f).blocks.clone();
    for &b in &blocks {
        let block = m.block_mut(b);
        block.dom_children.clear();
        block.dom_depth = 0;
    }
    for &b in &blocks {
        if let Some(idom) = m.block(b).idom {
            m.block_mut(idom).dom_children.push(b);
        }
    }
    // Depth via explicit stack; deep or skewed trees must not overflow.
    let entry = m.func(f).entry();
    if !reachable.contains(&entry) {
        return;
    }
    let mut stack = vec![(entry, 0u32)];
    while let Some((b, depth)) = stack.pop() {
        m.block_mut(b).dom_depth = depth;
        for &c in &m.block(b).dom_children {
            stack.push((c, depth + 1));
        }
    }
}

/// Loop nesting depth from back-edges: an edge S -> H where H dominates S
/// marks a natural loop with header H; the body is H plus everything that
/// reaches S backwards without passing H. Loops sharing a header count
/// once; each distinct loop containing a block adds one to its depth.
fn compute_loop_depth(m: &mut Module, f: FuncId, reachable: &HashSet<BlockId>) {
    let blocks = m.func(f).blocks.clone();
    for &b in &blocks {
        m.block_mut(b).loop_depth = 0;
    }

    let mut bodies: HashMap<BlockId, HashSet<BlockId>> = HashMap::new();
    for &s in &blocks {
        if !reachable.contains(&s) {
            continue;
        }
        for h in m.block(s).succs.clone() {
            if !m.block(s).dom.contains(&h) {
                continue;
            }
            // Back edge s -> h.
            let body = bodies.entry(h).or_insert_with(|| std::iter::once(h).collect());
            let mut work = vec![s];
            while let Some(b) = work.pop() {
                if !body.insert(b) {
                    continue;
                }
                work.extend(m.block(b).preds.iter().copied());
            }
        }
    }
    for body in bodies.values() {
        for &b in body {
            m.block_mut(b).loop_depth += 1;
        }
    }
}
