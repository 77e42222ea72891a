//! Stack frame layout.
//!
//! Layout from the frame top ($fp, which equals the caller's $sp) going
//! down: the allocatable registers the function actually uses, then the
//! allocas and spill slots, then the saved $fp and $ra, and at the very
//! bottom the outgoing argument area for calls with more than four
//! arguments. An outgoing argument `i` sits at `$sp + 4*(i-4)`, which the
//! callee reads back as `$fp + 4*(i-4)`.

use hashbrown::HashMap;

use crate::ir::{FuncId, Loc, Module, Op, PhysReg, Type, ValueId, ValueKind};

#[derive(Debug, Clone)]
pub struct FrameLayout {
    /// Total frame size in bytes.
    pub size: i32,
    /// Saved allocatable registers with their $fp-relative offsets.
    pub saved: Vec<(PhysReg, i32)>,
    /// $fp-relative offset of each alloca's first byte.
    pub alloca_off: HashMap<ValueId, i32>,
    /// $fp-relative offset of each stack-resident value.
    pub spill_off: HashMap<ValueId, i32>,
    pub fp_save: i32,
    pub ra_save: i32,
}

impl FrameLayout {
    pub fn build(m: &Module, f: FuncId) -> FrameLayout {
        let func = m.func(f);

        let mut used: Vec<PhysReg> = func
            .value_locs
            .values()
            .filter_map(|l| match l {
                Loc::Reg(r) => Some(*r),
                Loc::Stack => None,
            })
            .collect();
        used.sort_by_key(|r| r.0);
        used.dedup();

        let mut off = 0i32;
        let mut saved = Vec::with_capacity(used.len());
        for r in used {
            off -= 4;
            saved.push((r, off));
        }

        let mut alloca_off = HashMap::new();
        let mut max_extra_args = 0usize;
        for &b in &func.blocks {
            for &v in &m.block(b).insts {
                let Some(inst) = m.inst(v) else { continue };
                match inst.op {
                    Op::Alloca { elem_ty, elems } => {
                        let bytes = word_align(elem_ty.size() * elems);
                        off -= bytes as i32;
                        alloca_off.insert(v, off);
                    }
                    Op::Call { .. } => {
                        max_extra_args =
                            max_extra_args.max(inst.operands.len().saturating_sub(4));
                    }
                    _ => {}
                }
            }
        }

        // Stack-resident values in creation order so the layout is stable.
        let mut spilled: Vec<ValueId> = func
            .value_locs
            .iter()
            .filter(|(_, l)| matches!(l, Loc::Stack))
            .map(|(&v, _)| v)
            .filter(|&v| !matches!(m.value(v).kind, ValueKind::Removed))
            .collect();
        spilled.sort_by_key(|v| v.0);
        let mut spill_off = HashMap::new();
        for v in spilled {
            off -= 4;
            spill_off.insert(v, off);
        }

        off -= 4;
        let fp_save = off;
        off -= 4;
        let ra_save = off;

        let size = -off + 4 * max_extra_args as i32;
        FrameLayout { size, saved, alloca_off, spill_off, fp_save, ra_save }
    }
}

fn word_align(bytes: u32) -> u32 {
    (bytes + 3) & !3
}

/// Size in bytes of one element behind an address-producing value, used to
/// pick between word and byte memory instructions.
pub fn pointee_size(m: &Module, addr: ValueId) -> u32 {
    match &m.value(addr).kind {
        ValueKind::Global(g) => m.global(*g).elem_ty.size(),
        ValueKind::Inst(inst) => match inst.op {
            Op::Alloca { elem_ty, .. } => elem_ty.size(),
            Op::GetElem { elem_size } => elem_size,
            _ => Type::I32.size(),
        },
        _ => Type::I32.size(),
    }
}
