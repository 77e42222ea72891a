//! SSA destruction (phi elimination).
//!
//! For each block with phi nodes, every predecessor edge gets one
//! parallel-copy pseudo-instruction carrying a (destination, source) pair
//! per phi. Critical edges (predecessor with more than one successor) are
//! split first so the copies cannot leak into the predecessor's other
//! successors. Each parallel copy is then serialized into ordered moves,
//! breaking cycles through a fresh stack-resident temporary, and the phi
//! nodes are retired to location-only values.
//!
//! Runs after register allocation; phi results already carry stack
//! locations, and temporaries created here are given one too.

use crate::core::{CompileError, CompileResult};
use crate::ir::{BlockId, FuncId, Loc, Module, Op, ValueId, ValueKind};

/// Eliminate every phi in `f`.
pub fn run(m: &mut Module, f: FuncId) -> CompileResult<()> {
    let blocks = m.func(f).blocks.clone();
    let mut copies = 0usize;
    let mut splits = 0usize;

    for &b in &blocks {
        let phis: Vec<ValueId> = m
            .block(b)
            .insts
            .iter()
            .copied()
            .filter(|&v| matches!(m.inst(v).map(|i| &i.op), Some(Op::Phi { .. })))
            .collect();
        if phis.is_empty() {
            continue;
        }

        for p in m.block(b).preds.clone() {
            // Read the edge's sources before any split rewrites the phi
            // predecessor entries from `p` to the split block.
            let mut dsts = Vec::with_capacity(phis.len());
            let mut srcs = Vec::with_capacity(phis.len());
            for &phi in &phis {
                let src = m.phi_incoming_for(phi, p).ok_or_else(|| {
                    CompileError::MissingPhiOperand {
                        func: m.func(f).name.clone(),
                        block: m.block(b).name.clone(),
                        value: m.display_name(phi),
                        pred: m.block(p).name.clone(),
                    }
                })?;
                dsts.push(phi);
                srcs.push(src);
            }

            let edge_block = if m.block(p).succs.len() > 1 {
                splits += 1;
                split_edge(m, f, p, b)?
            } else {
                p
            };
            let pcopy = m.insert_before_terminator(
                edge_block,
                Op::ParallelCopy { dsts },
                crate::ir::Type::Void,
                srcs,
                None,
            );
            copies += serialize(m, f, pcopy)?;
        }

        // Retire the phis: detach their operand references, pull them out
        // of the block, and keep the value as a bare location.
        for phi in phis {
            detach_phi(m, phi);
        }
    }

    log::debug!(
        "ssa-destruct: {} moves, {} split edges in {}",
        copies,
        splits,
        m.func(f).name
    );
    Ok(())
}

/// Turn a retired phi into a location-only value.
fn detach_phi(m: &mut Module, phi: ValueId) {
    let operands = match m.inst(phi) {
        Some(inst) => inst.operands.clone(),
        None => return,
    };
    for operand in operands {
        remove_one_user_of(m, operand, phi);
    }
    m.detach_from_block(phi);
    m.value_mut(phi).kind = ValueKind::Slot;
}

fn remove_one_user_of(m: &mut Module, value: ValueId, user: ValueId) {
    let users = &mut m.value_mut(value).users;
    if let Some(pos) = users.iter().position(|&u| u == user) {
        users.swap_remove(pos);
    }
}

/// Split the edge `p -> b` with a fresh block that only branches to `b`.
/// The predecessor's terminator, both blocks' edge sets, and the phi
/// predecessor lists of `b` are all redirected to the new block.
fn split_edge(m: &mut Module, f: FuncId, p: BlockId, b: BlockId) -> CompileResult<BlockId> {
    let name = m.names.fresh("split");
    let nb = m.add_block(f, &name);
    m.append_inst(nb, Op::Br { target: b }, crate::ir::Type::Void, vec![], None);

    let term = m.terminator(p).ok_or_else(|| CompileError::MissingTerminator {
        func: m.func(f).name.clone(),
        block: m.block(p).name.clone(),
    })?;
    match &mut m.value_mut(term).kind {
        ValueKind::Inst(inst) => match &mut inst.op {
            Op::Br { target } if *target == b => *target = nb,
            Op::CondBr { then_bb, else_bb } => {
                if *then_bb == b {
                    *then_bb = nb;
                }
                if *else_bb == b {
                    *else_bb = nb;
                }
            }
            _ => {}
        },
        _ => {}
    }

    for s in m.block_mut(p).succs.iter_mut() {
        if *s == b {
            *s = nb;
        }
    }
    m.block_mut(nb).preds.push(p);
    m.block_mut(nb).succs.push(b);
    for pred in m.block_mut(b).preds.iter_mut() {
        if *pred == p {
            *pred = nb;
        }
    }

    // Keep phi incoming lists symmetric with the rewritten edge.
    for v in m.block(b).insts.clone() {
        if let ValueKind::Inst(inst) = &mut m.value_mut(v).kind {
            if let Op::Phi { preds } = &mut inst.op {
                for pred in preds.iter_mut() {
                    if *pred == p {
                        *pred = nb;
                    }
                }
            }
        }
    }
    Ok(nb)
}

/// Serialize one parallel copy into moves placed where it stood.
///
/// Repeatedly emits a pair whose destination is not read by any pending
/// pair; when only cycles remain, one source is saved into a fresh
/// temporary and that pair is repointed at it. Returns the number of
/// moves emitted.
fn serialize(m: &mut Module, f: FuncId, pcopy: ValueId) -> CompileResult<usize> {
    let inst = m.inst(pcopy).expect("parallel copy exists");
    let block = inst.block;
    let srcs = inst.operands.clone();
    let dsts = match &inst.op {
        Op::ParallelCopy { dsts } => dsts.clone(),
        _ => unreachable!("serialize is only called on parallel copies"),
    };
    m.remove_inst(pcopy);

    let mut pending: Vec<(ValueId, ValueId)> = dsts
        .into_iter()
        .zip(srcs)
        .filter(|(d, s)| d != s)
        .collect();

    let mut emitted = 0usize;
    let budget = pending.len() * 2 + 1;
    let mut steps = 0usize;
    while !pending.is_empty() {
        steps += 1;
        if steps > budget {
            return Err(CompileError::CopySerialization {
                func: m.func(f).name.clone(),
                block: m.block(block).name.clone(),
            });
        }
        let free = pending
            .iter()
            .position(|&(d, _)| !pending.iter().any(|&(_, s)| s == d));
        match free {
            Some(i) => {
                let (d, s) = pending.remove(i);
                emit_move(m, block, d, s);
                emitted += 1;
            }
            None => {
                // Every pending destination is still read: a cycle. Save
                // one source aside and repoint its pair at the copy.
                let (_, s0) = pending[0];
                let name = m.names.fresh("cyc");
                let tmp = m.new_slot(m.value(s0).ty, name);
                m.func_mut(f).value_locs.insert(tmp, Loc::Stack);
                emit_move(m, block, tmp, s0);
                emitted += 1;
                pending[0].1 = tmp;
            }
        }
    }
    Ok(emitted)
}

fn emit_move(m: &mut Module, block: BlockId, dst: ValueId, src: ValueId) {
    m.insert_before_terminator(block, Op::Move { dst }, crate::ir::Type::Void, vec![src], None);
}
