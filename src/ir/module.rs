//! Arena-based IR data model.
//!
//! All values, instructions, blocks and functions live in dense vectors
//! owned by the [`Module`] and are addressed by stable `u32` handles.
//! Operand and user lists are handle lists, never owning references, so
//! passes can rewrite the graph freely without reference cycles.
//!
//! Use-def bookkeeping is maintained continuously: if instruction U holds
//! value V in its operand list, V's user list contains one entry for that
//! slot. All mutation goes through the `Module` methods below, which keep
//! the two directions in sync.

use hashbrown::{HashMap, HashSet};

use crate::core::NameSupply;
use super::types::Type;

/// Handle of a value (constant, global address, parameter, instruction).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ValueId(pub u32);

/// Handle of a basic block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(pub u32);

/// Handle of a function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FuncId(pub u32);

/// Handle of a global variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GlobalId(pub u32);

impl ValueId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl BlockId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl FuncId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl GlobalId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Physical register number (MIPS numbering, 0-31).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PhysReg(pub u8);

/// Where a value lives after register allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Loc {
    Reg(PhysReg),
    /// Stack-resident; the concrete frame offset is chosen during lowering.
    Stack,
}

/// Binary arithmetic opcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

impl BinOp {
    /// Operand order does not matter for these.
    pub fn is_commutative(self) -> bool {
        matches!(self, BinOp::Add | BinOp::Mul)
    }
}

/// Comparison opcodes. Result is 0 or 1 as `I32`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CmpOp {
    pub fn is_commutative(self) -> bool {
        matches!(self, CmpOp::Eq | CmpOp::Ne)
    }
}

/// Integer width casts between `I8` and `I32`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CastOp {
    Zext,
    Trunc,
}

/// Instruction opcode with opcode-specific payload.
///
/// Operands that are values live in the uniform operand list of
/// [`InstData`]; the payload carries everything that is not a value
/// (branch targets, phi predecessor blocks, copy destinations).
#[derive(Debug, Clone, PartialEq)]
pub enum Op {
    /// Operands: `[lhs, rhs]`.
    Binary(BinOp),
    /// Operands: `[lhs, rhs]`.
    Cmp(CmpOp),
    /// Operands: `[addr]`.
    Load,
    /// Operands: `[value, addr]`.
    Store,
    /// Operands: the arguments, in order.
    Call { callee: FuncId },
    /// Stack allocation of `elems` objects of `elem_ty`. No operands.
    /// `elems > 1` marks an array, which is never promoted to SSA.
    Alloca { elem_ty: Type, elems: u32 },
    /// Address computation. Operands: `[base, index]`; scales `index` by
    /// `elem_size` bytes.
    GetElem { elem_size: u32 },
    /// Operands: `[value]`.
    Cast(CastOp),
    /// Operands: one incoming value per entry of `preds`, kept parallel.
    Phi { preds: Vec<BlockId> },
    /// Unconditional branch. No operands.
    Br { target: BlockId },
    /// Operands: `[cond]`; branches to `then_bb` when cond is non-zero.
    CondBr { then_bb: BlockId, else_bb: BlockId },
    /// Operands: `[value]` or empty for void returns.
    Ret,
    /// Simultaneous-assignment pseudo-instruction inserted by SSA
    /// destruction. Operands are the sources; `dsts` is parallel to them.
    ParallelCopy { dsts: Vec<ValueId> },
    /// Sequential copy of the single operand into `dst`'s location.
    Move { dst: ValueId },
}

impl Op {
    pub fn is_terminator(&self) -> bool {
        matches!(self, Op::Br { .. } | Op::CondBr { .. } | Op::Ret)
    }

    /// Instructions with an observable effect; DCE roots.
    pub fn has_side_effect(&self) -> bool {
        matches!(
            self,
            Op::Store
                | Op::Call { .. }
                | Op::Br { .. }
                | Op::CondBr { .. }
                | Op::Ret
                | Op::ParallelCopy { .. }
                | Op::Move { .. }
        )
    }

    /// Pinned instructions never move during code motion.
    pub fn is_pinned(&self) -> bool {
        matches!(
            self,
            Op::Load
                | Op::Store
                | Op::Call { .. }
                | Op::Alloca { .. }
                | Op::Phi { .. }
                | Op::Br { .. }
                | Op::CondBr { .. }
                | Op::Ret
                | Op::ParallelCopy { .. }
                | Op::Move { .. }
        )
    }

    /// Pure, operand-deterministic opcodes; the only GVN participants.
    pub fn is_pure(&self) -> bool {
        matches!(
            self,
            Op::Binary(_) | Op::Cmp(_) | Op::GetElem { .. } | Op::Cast(_)
        )
    }

    /// Short mnemonic for diagnostics and the debug printer.
    pub fn mnemonic(&self) -> &'static str {
        match self {
            Op::Binary(BinOp::Add) => "add",
            Op::Binary(BinOp::Sub) => "sub",
            Op::Binary(BinOp::Mul) => "mul",
            Op::Binary(BinOp::Div) => "div",
            Op::Binary(BinOp::Rem) => "rem",
            Op::Cmp(CmpOp::Eq) => "cmp.eq",
            Op::Cmp(CmpOp::Ne) => "cmp.ne",
            Op::Cmp(CmpOp::Lt) => "cmp.lt",
            Op::Cmp(CmpOp::Le) => "cmp.le",
            Op::Cmp(CmpOp::Gt) => "cmp.gt",
            Op::Cmp(CmpOp::Ge) => "cmp.ge",
            Op::Load => "load",
            Op::Store => "store",
            Op::Call { .. } => "call",
            Op::Alloca { .. } => "alloca",
            Op::GetElem { .. } => "getelem",
            Op::Cast(CastOp::Zext) => "zext",
            Op::Cast(CastOp::Trunc) => "trunc",
            Op::Phi { .. } => "phi",
            Op::Br { .. } => "br",
            Op::CondBr { .. } => "condbr",
            Op::Ret => "ret",
            Op::ParallelCopy { .. } => "pcopy",
            Op::Move { .. } => "move",
        }
    }
}

/// Payload of an instruction value.
#[derive(Debug, Clone)]
pub struct InstData {
    pub op: Op,
    pub block: BlockId,
    pub operands: Vec<ValueId>,
}

/// What a value is.
#[derive(Debug, Clone)]
pub enum ValueKind {
    ConstInt(i32),
    /// Address of a global variable.
    Global(GlobalId),
    Param { func: FuncId, index: usize },
    Inst(InstData),
    /// A location-only value: a retired phi result or a copy-cycle
    /// temporary. It has a `Loc` in its function but no defining
    /// instruction; only `Move` destinations reference it as `dst`.
    Slot,
    /// Tombstone of a deleted instruction. The arena slot is never reused.
    Removed,
}

/// One entry of the value arena.
#[derive(Debug, Clone)]
pub struct ValueData {
    pub ty: Type,
    pub name: Option<String>,
    /// One entry per referencing operand slot (a multiset).
    pub users: Vec<ValueId>,
    pub kind: ValueKind,
}

impl ValueData {
    pub fn inst(&self) -> Option<&InstData> {
        match &self.kind {
            ValueKind::Inst(inst) => Some(inst),
            _ => None,
        }
    }
}

/// One entry of the block arena.
///
/// Dominance fields are computed by [`crate::analysis::cfg::analyze`] and
/// become stale after any CFG mutation; liveness fields by
/// [`crate::analysis::liveness::run`].
#[derive(Debug, Clone)]
pub struct BlockData {
    pub name: String,
    pub func: FuncId,
    /// Ordered instruction list; the last instruction is the terminator.
    pub insts: Vec<ValueId>,
    pub preds: Vec<BlockId>,
    pub succs: Vec<BlockId>,

    // Dominance.
    pub dom: HashSet<BlockId>,
    pub idom: Option<BlockId>,
    pub frontier: HashSet<BlockId>,
    pub dom_children: Vec<BlockId>,
    pub dom_depth: u32,
    pub loop_depth: u32,

    // Liveness.
    pub defs: HashSet<ValueId>,
    pub uses: HashSet<ValueId>,
    pub live_in: HashSet<ValueId>,
    pub live_out: HashSet<ValueId>,
}

impl BlockData {
    fn new(name: String, func: FuncId) -> Self {
        Self {
            name,
            func,
            insts: Vec::new(),
            preds: Vec::new(),
            succs: Vec::new(),
            dom: HashSet::new(),
            idom: None,
            frontier: HashSet::new(),
            dom_children: Vec::new(),
            dom_depth: 0,
            loop_depth: 0,
            defs: HashSet::new(),
            uses: HashSet::new(),
            live_in: HashSet::new(),
            live_out: HashSet::new(),
        }
    }
}

/// Built-in I/O routines lowered to fixed syscall sequences.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Builtin {
    GetInt,
    GetCh,
    PutInt,
    PutCh,
    PutStr,
}

impl Builtin {
    pub fn name(self) -> &'static str {
        match self {
            Builtin::GetInt => "getint",
            Builtin::GetCh => "getch",
            Builtin::PutInt => "putint",
            Builtin::PutCh => "putch",
            Builtin::PutStr => "putstr",
        }
    }
}

/// One entry of the function arena.
#[derive(Debug, Clone)]
pub struct FunctionData {
    pub name: String,
    pub ret_ty: Type,
    pub params: Vec<ValueId>,
    /// Ordered blocks; the first is the entry block.
    pub blocks: Vec<BlockId>,
    pub is_decl: bool,
    pub builtin: Option<Builtin>,
    /// Per-value register/stack assignment, populated by allocation.
    pub value_locs: HashMap<ValueId, Loc>,
}

impl FunctionData {
    pub fn entry(&self) -> BlockId {
        self.blocks[0]
    }
}

/// Initializer of a global variable.
#[derive(Debug, Clone, PartialEq)]
pub enum GlobalInit {
    Zero,
    Words(Vec<i32>),
    Str(String),
}

/// One entry of the global arena.
#[derive(Debug, Clone)]
pub struct GlobalData {
    pub name: String,
    pub elem_ty: Type,
    pub elems: u32,
    pub init: GlobalInit,
    /// The address value other instructions reference.
    pub value: ValueId,
}

/// A whole compilation unit: functions and globals plus the value, block
/// and function arenas they index into. Built once by the front end and
/// mutated in place by every pass.
#[derive(Debug, Default)]
pub struct Module {
    pub values: Vec<ValueData>,
    pub blocks: Vec<BlockData>,
    pub funcs: Vec<FunctionData>,
    pub globals: Vec<GlobalData>,
    pub names: NameSupply,
    const_pool: HashMap<i32, ValueId>,
}

impl Module {
    pub fn new() -> Self {
        Self::default()
    }

    // ----- accessors -----

    pub fn value(&self, v: ValueId) -> &ValueData {
        &self.values[v.index()]
    }

    pub fn value_mut(&mut self, v: ValueId) -> &mut ValueData {
        &mut self.values[v.index()]
    }

    pub fn block(&self, b: BlockId) -> &BlockData {
        &self.blocks[b.index()]
    }

    pub fn block_mut(&mut self, b: BlockId) -> &mut BlockData {
        &mut self.blocks[b.index()]
    }

    pub fn func(&self, f: FuncId) -> &FunctionData {
        &self.funcs[f.index()]
    }

    pub fn func_mut(&mut self, f: FuncId) -> &mut FunctionData {
        &mut self.funcs[f.index()]
    }

    pub fn global(&self, g: GlobalId) -> &GlobalData {
        &self.globals[g.index()]
    }

    /// Instruction payload of `v`, or `None` for non-instruction values.
    pub fn inst(&self, v: ValueId) -> Option<&InstData> {
        self.value(v).inst()
    }

    /// Parent block of an instruction value.
    pub fn inst_block(&self, v: ValueId) -> Option<BlockId> {
        self.inst(v).map(|i| i.block)
    }

    /// Display name for diagnostics: the given name or `v<index>`.
    pub fn display_name(&self, v: ValueId) -> String {
        match &self.value(v).name {
            Some(name) => name.clone(),
            None => format!("v{}", v.0),
        }
    }

    /// The block's terminator, if its last instruction is one.
    pub fn terminator(&self, b: BlockId) -> Option<ValueId> {
        let last = *self.block(b).insts.last()?;
        let inst = self.inst(last)?;
        inst.op.is_terminator().then_some(last)
    }

    // ----- construction -----

    /// Interned `i32` constant.
    pub fn const_int(&mut self, n: i32) -> ValueId {
        if let Some(&v) = self.const_pool.get(&n) {
            return v;
        }
        let v = self.push_value(ValueData {
            ty: Type::I32,
            name: None,
            users: Vec::new(),
            kind: ValueKind::ConstInt(n),
        });
        self.const_pool.insert(n, v);
        v
    }

    pub fn add_global(&mut self, name: &str, elem_ty: Type, elems: u32, init: GlobalInit) -> GlobalId {
        let g = GlobalId(self.globals.len() as u32);
        let value = self.push_value(ValueData {
            ty: Type::Ptr,
            name: Some(name.to_string()),
            users: Vec::new(),
            kind: ValueKind::Global(g),
        });
        self.globals.push(GlobalData {
            name: name.to_string(),
            elem_ty,
            elems,
            init,
            value,
        });
        g
    }

    pub fn global_value(&self, g: GlobalId) -> ValueId {
        self.global(g).value
    }

    pub fn add_function(&mut self, name: &str, ret_ty: Type, param_tys: &[Type]) -> FuncId {
        let f = FuncId(self.funcs.len() as u32);
        let params = param_tys
            .iter()
            .enumerate()
            .map(|(index, &ty)| {
                self.push_value(ValueData {
                    ty,
                    name: Some(format!("{name}.arg{index}")),
                    users: Vec::new(),
                    kind: ValueKind::Param { func: f, index },
                })
            })
            .collect();
        self.funcs.push(FunctionData {
            name: name.to_string(),
            ret_ty,
            params,
            blocks: Vec::new(),
            is_decl: false,
            builtin: None,
            value_locs: HashMap::new(),
        });
        f
    }

    /// External declaration of a built-in I/O routine.
    pub fn add_builtin(&mut self, b: Builtin) -> FuncId {
        let (ret_ty, param_tys): (Type, &[Type]) = match b {
            Builtin::GetInt | Builtin::GetCh => (Type::I32, &[]),
            Builtin::PutInt | Builtin::PutCh => (Type::Void, &[Type::I32]),
            Builtin::PutStr => (Type::Void, &[Type::Ptr]),
        };
        let f = self.add_function(b.name(), ret_ty, param_tys);
        let data = self.func_mut(f);
        data.is_decl = true;
        data.builtin = Some(b);
        f
    }

    pub fn add_block(&mut self, f: FuncId, name: &str) -> BlockId {
        let b = BlockId(self.blocks.len() as u32);
        self.blocks.push(BlockData::new(name.to_string(), f));
        self.func_mut(f).blocks.push(b);
        b
    }

    fn push_value(&mut self, data: ValueData) -> ValueId {
        let v = ValueId(self.values.len() as u32);
        self.values.push(data);
        v
    }

    fn create_inst(
        &mut self,
        block: BlockId,
        op: Op,
        ty: Type,
        operands: Vec<ValueId>,
        name: Option<String>,
    ) -> ValueId {
        let v = self.push_value(ValueData {
            ty,
            name,
            users: Vec::new(),
            kind: ValueKind::Inst(InstData { op, block, operands }),
        });
        let operands = self.inst(v).expect("just created").operands.clone();
        for operand in operands {
            self.value_mut(operand).users.push(v);
        }
        v
    }

    /// Append an instruction at the end of `block`.
    pub fn append_inst(
        &mut self,
        block: BlockId,
        op: Op,
        ty: Type,
        operands: Vec<ValueId>,
        name: Option<String>,
    ) -> ValueId {
        let v = self.create_inst(block, op, ty, operands, name);
        self.block_mut(block).insts.push(v);
        v
    }

    /// Insert an instruction at position `index` of `block`.
    pub fn insert_inst_at(
        &mut self,
        block: BlockId,
        index: usize,
        op: Op,
        ty: Type,
        operands: Vec<ValueId>,
        name: Option<String>,
    ) -> ValueId {
        let v = self.create_inst(block, op, ty, operands, name);
        self.block_mut(block).insts.insert(index, v);
        v
    }

    /// Insert an instruction just before the terminator of `block`.
    pub fn insert_before_terminator(
        &mut self,
        block: BlockId,
        op: Op,
        ty: Type,
        operands: Vec<ValueId>,
        name: Option<String>,
    ) -> ValueId {
        let at = self.block(block).insts.len().saturating_sub(1);
        self.insert_inst_at(block, at, op, ty, operands, name)
    }

    /// Location-only value (see [`ValueKind::Slot`]).
    pub fn new_slot(&mut self, ty: Type, name: String) -> ValueId {
        self.push_value(ValueData {
            ty,
            name: Some(name),
            users: Vec::new(),
            kind: ValueKind::Slot,
        })
    }

    // ----- mutation -----

    /// Replace operand `index` of instruction `v`, keeping user lists exact.
    pub fn set_operand(&mut self, v: ValueId, index: usize, new: ValueId) {
        let old = match &mut self.value_mut(v).kind {
            ValueKind::Inst(inst) => {
                let old = inst.operands[index];
                inst.operands[index] = new;
                old
            }
            _ => panic!("set_operand on non-instruction value"),
        };
        if old != new {
            remove_one_user(&mut self.value_mut(old).users, v);
            self.value_mut(new).users.push(v);
        }
    }

    /// Rewrite every use of `old` to `new`. Copy destinations and phi
    /// predecessor lists are payload, not uses, and are untouched.
    pub fn replace_all_uses(&mut self, old: ValueId, new: ValueId) {
        let users = std::mem::take(&mut self.value_mut(old).users);
        for &user in &users {
            if let ValueKind::Inst(inst) = &mut self.value_mut(user).kind {
                for slot in inst.operands.iter_mut() {
                    if *slot == old {
                        *slot = new;
                    }
                }
            }
            self.value_mut(new).users.push(user);
        }
    }

    /// Detach and delete instruction `v`: its operand references are
    /// released, it is pulled out of its block, and its arena slot becomes
    /// a tombstone. Callers must ensure remaining users are themselves dead
    /// or rewritten first.
    pub fn remove_inst(&mut self, v: ValueId) {
        let (block, operands) = match self.value(v).inst() {
            Some(inst) => (inst.block, inst.operands.clone()),
            None => return,
        };
        for operand in operands {
            remove_one_user(&mut self.value_mut(operand).users, v);
        }
        self.block_mut(block).insts.retain(|&i| i != v);
        self.value_mut(v).kind = ValueKind::Removed;
    }

    /// Pull instruction `v` out of its block's list without deleting it;
    /// the caller re-inserts it elsewhere (code motion, phi retirement).
    pub fn detach_from_block(&mut self, v: ValueId) {
        if let Some(block) = self.inst_block(v) {
            self.block_mut(block).insts.retain(|&i| i != v);
        }
    }

    /// Relocate instruction `v` into `block` at position `index`.
    pub fn move_inst(&mut self, v: ValueId, block: BlockId, index: usize) {
        self.detach_from_block(v);
        if let ValueKind::Inst(inst) = &mut self.value_mut(v).kind {
            inst.block = block;
        }
        self.block_mut(block).insts.insert(index, v);
    }

    /// Add an incoming `(value, pred)` pair to phi `v`.
    pub fn add_phi_incoming(&mut self, v: ValueId, value: ValueId, pred: BlockId) {
        match &mut self.value_mut(v).kind {
            ValueKind::Inst(InstData { op: Op::Phi { preds }, operands, .. }) => {
                operands.push(value);
                preds.push(pred);
            }
            _ => panic!("add_phi_incoming on non-phi value"),
        }
        self.value_mut(value).users.push(v);
    }

    /// Drop every incoming pair of phi `v` whose predecessor is in `gone`.
    /// No-op on non-phi values.
    pub fn drop_phi_incoming_from(&mut self, v: ValueId, gone: &hashbrown::HashSet<BlockId>) {
        let mut dropped = Vec::new();
        if let ValueKind::Inst(InstData { op: Op::Phi { preds }, operands, .. }) =
            &mut self.value_mut(v).kind
        {
            let mut slot = 0;
            while slot < preds.len() {
                if gone.contains(&preds[slot]) {
                    preds.remove(slot);
                    dropped.push(operands.remove(slot));
                } else {
                    slot += 1;
                }
            }
        }
        for operand in dropped {
            remove_one_user(&mut self.value_mut(operand).users, v);
        }
    }

    /// Incoming value of phi `v` for predecessor `pred`.
    pub fn phi_incoming_for(&self, v: ValueId, pred: BlockId) -> Option<ValueId> {
        match self.inst(v) {
            Some(InstData { op: Op::Phi { preds }, operands, .. }) => preds
                .iter()
                .position(|&p| p == pred)
                .map(|slot| operands[slot]),
            _ => None,
        }
    }

    /// Functions with bodies, in module order.
    pub fn defined_funcs(&self) -> Vec<FuncId> {
        (0..self.funcs.len() as u32)
            .map(FuncId)
            .filter(|&f| !self.func(f).is_decl)
            .collect()
    }
}

fn remove_one_user(users: &mut Vec<ValueId>, user: ValueId) {
    if let Some(pos) = users.iter().position(|&u| u == user) {
        users.swap_remove(pos);
    }
}
