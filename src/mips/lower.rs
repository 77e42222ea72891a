//! Instruction selection and function lowering.
//!
//! Every value reads from and writes to the location the allocator gave
//! it; stack-resident values pass through the reserved scratch registers
//! $v1 and $k0, which are never live across an instruction. The prologue
//! saves $ra, the caller's $fp and every allocatable register the
//! function uses, then homes incoming parameters into their locations;
//! with the whole allocatable pool saved on entry, register values
//! survive calls without caller-side traffic.
//!
//! `main` does not return to a caller; its epilogue is the terminate
//! syscall. Built-in I/O routines are emitted as tiny functions wrapping
//! the simulator syscalls.

use crate::core::{CompileError, CompileResult};
use crate::ir::{
    Builtin, FuncId, Loc, Module, Op, PhysReg, ValueId, ValueKind,
};

use super::emit::{DataItem, MachInst, MachOp, MachOperand, TargetFunction, TargetProgram};
use super::frame::{pointee_size, FrameLayout};
use super::regs;

/// Lower every defined function and builtin of `m`. `main` is placed
/// first so execution starts there.
pub fn lower_module(m: &Module) -> CompileResult<TargetProgram> {
    let mut prog = TargetProgram::default();
    for g in &m.globals {
        prog.data.push(DataItem {
            name: g.name.clone(),
            size: g.elem_ty.size() * g.elems,
            init: g.init.clone(),
        });
    }

    for f in (0..m.funcs.len() as u32).map(FuncId) {
        let func = m.func(f);
        if let Some(b) = func.builtin {
            prog.text.push(lower_builtin(b));
        } else if !func.is_decl {
            prog.text.push(Lower::new(m, f).function()?);
        }
    }
    prog.text.sort_by_key(|t| t.name != "main");
    Ok(prog)
}

/// Syscall numbers: print int 1, print string 4, read int 5, print char
/// 11, read char 12. Arguments already sit in $a0; results land in $v0.
fn lower_builtin(b: Builtin) -> TargetFunction {
    let code = match b {
        Builtin::PutInt => 1,
        Builtin::PutStr => 4,
        Builtin::GetInt => 5,
        Builtin::PutCh => 11,
        Builtin::GetCh => 12,
    };
    let insts = vec![
        MachInst::Op(MachOp::Li, vec![MachOperand::Reg(regs::V0), MachOperand::Imm(code)]),
        MachInst::Op(MachOp::Syscall, vec![]),
        MachInst::Op(MachOp::Jr, vec![MachOperand::Reg(regs::RA)]),
    ];
    TargetFunction { name: b.name().to_string(), insts }
}

struct Lower<'m> {
    m: &'m Module,
    f: FuncId,
    frame: FrameLayout,
    out: Vec<MachInst>,
}

impl<'m> Lower<'m> {
    fn new(m: &'m Module, f: FuncId) -> Lower<'m> {
        let frame = FrameLayout::build(m, f);
        Lower { m, f, frame, out: Vec::new() }
    }

    fn function(mut self) -> CompileResult<TargetFunction> {
        self.prologue()?;
        for &b in &self.m.func(self.f).blocks {
            self.out.push(MachInst::Label(self.block_label(b)));
            for &v in &self.m.block(b).insts {
                self.lower_inst(v)?;
            }
        }
        log::trace!(
            "lower: {} -> {} instructions",
            self.m.func(self.f).name,
            self.out.len()
        );
        Ok(TargetFunction { name: self.m.func(self.f).name.clone(), insts: self.out })
    }

    // ----- emission helpers -----

    fn op(&mut self, op: MachOp, args: Vec<MachOperand>) {
        self.out.push(MachInst::Op(op, args));
    }

    fn rrr(&mut self, op: MachOp, d: PhysReg, a: PhysReg, b: PhysReg) {
        self.op(op, vec![MachOperand::Reg(d), MachOperand::Reg(a), MachOperand::Reg(b)]);
    }

    fn rri(&mut self, op: MachOp, d: PhysReg, a: PhysReg, imm: i32) {
        self.op(op, vec![MachOperand::Reg(d), MachOperand::Reg(a), MachOperand::Imm(imm)]);
    }

    fn rr(&mut self, op: MachOp, d: PhysReg, a: PhysReg) {
        self.op(op, vec![MachOperand::Reg(d), MachOperand::Reg(a)]);
    }

    fn mem(&mut self, op: MachOp, r: PhysReg, base: PhysReg, offset: i32) {
        self.op(op, vec![MachOperand::Reg(r), MachOperand::Mem { base, offset }]);
    }

    fn mv(&mut self, d: PhysReg, s: PhysReg) {
        if d != s {
            self.rr(MachOp::Move, d, s);
        }
    }

    fn block_label(&self, b: crate::ir::BlockId) -> String {
        let func = &self.m.func(self.f).name;
        format!("{}_{}", func, self.m.block(b).name.replace('.', "_"))
    }

    fn loc(&self, v: ValueId) -> CompileResult<Loc> {
        self.m.func(self.f).value_locs.get(&v).copied().ok_or_else(|| {
            CompileError::UnassignedValue {
                func: self.m.func(self.f).name.clone(),
                value: self.m.display_name(v),
            }
        })
    }

    fn spill_slot(&self, v: ValueId) -> i32 {
        self.frame.spill_off.get(&v).copied().unwrap_or(0)
    }

    fn const_of(&self, v: ValueId) -> Option<i32> {
        match self.m.value(v).kind {
            ValueKind::ConstInt(n) => Some(n),
            _ => None,
        }
    }

    /// Register holding `v`, materializing constants, addresses and
    /// spilled values into `scratch`.
    fn read(&mut self, v: ValueId, scratch: PhysReg) -> CompileResult<PhysReg> {
        match &self.m.value(v).kind {
            ValueKind::ConstInt(0) => return Ok(regs::ZERO),
            ValueKind::ConstInt(n) => {
                let n = *n;
                self.op(MachOp::Li, vec![MachOperand::Reg(scratch), MachOperand::Imm(n)]);
                return Ok(scratch);
            }
            ValueKind::Global(g) => {
                let label = self.m.global(*g).name.clone();
                self.op(MachOp::La, vec![MachOperand::Reg(scratch), MachOperand::Label(label)]);
                return Ok(scratch);
            }
            _ => {}
        }
        if let Some(&off) = self.frame.alloca_off.get(&v) {
            self.rri(MachOp::Addiu, scratch, regs::FP, off);
            return Ok(scratch);
        }
        match self.loc(v)? {
            Loc::Reg(r) => Ok(r),
            Loc::Stack => {
                let off = self.spill_slot(v);
                self.mem(MachOp::Lw, scratch, regs::FP, off);
                Ok(scratch)
            }
        }
    }

    /// Register a definition computes into; stack-resident results go
    /// through $v1 and [`Lower::finish_def`] stores them.
    fn def_reg(&self, v: ValueId) -> CompileResult<PhysReg> {
        Ok(match self.loc(v)? {
            Loc::Reg(r) => r,
            Loc::Stack => regs::V1,
        })
    }

    fn finish_def(&mut self, v: ValueId, r: PhysReg) -> CompileResult<()> {
        if let Loc::Stack = self.loc(v)? {
            let off = self.spill_slot(v);
            self.mem(MachOp::Sw, r, regs::FP, off);
        }
        Ok(())
    }

    // ----- prologue / epilogue -----

    fn prologue(&mut self) -> CompileResult<()> {
        let size = self.frame.size;
        self.rri(MachOp::Addiu, regs::SP, regs::SP, -size);
        self.mem(MachOp::Sw, regs::RA, regs::SP, self.frame.ra_save + size);
        self.mem(MachOp::Sw, regs::FP, regs::SP, self.frame.fp_save + size);
        self.rri(MachOp::Addiu, regs::FP, regs::SP, size);
        for (r, off) in self.frame.saved.clone() {
            self.mem(MachOp::Sw, r, regs::FP, off);
        }

        // Home incoming parameters. The fifth argument onwards sits in the
        // caller's outgoing area, which is exactly $fp + 4*(i-4) here.
        for (i, p) in self.m.func(self.f).params.clone().into_iter().enumerate() {
            let loc = match self.m.func(self.f).value_locs.get(&p) {
                Some(&l) => l,
                None => continue,
            };
            if i < 4 {
                let a = regs::ARG_REGS[i];
                match loc {
                    Loc::Reg(r) => self.mv(r, a),
                    Loc::Stack => {
                        let off = self.spill_slot(p);
                        self.mem(MachOp::Sw, a, regs::FP, off);
                    }
                }
            } else {
                let incoming = 4 * (i as i32 - 4);
                match loc {
                    Loc::Reg(r) => self.mem(MachOp::Lw, r, regs::FP, incoming),
                    Loc::Stack => {
                        let off = self.spill_slot(p);
                        self.mem(MachOp::Lw, regs::V1, regs::FP, incoming);
                        self.mem(MachOp::Sw, regs::V1, regs::FP, off);
                    }
                }
            }
        }
        Ok(())
    }

    fn epilogue(&mut self) {
        if self.m.func(self.f).name == "main" {
            self.op(MachOp::Li, vec![MachOperand::Reg(regs::V0), MachOperand::Imm(10)]);
            self.op(MachOp::Syscall, vec![]);
            return;
        }
        for (r, off) in self.frame.saved.clone() {
            self.mem(MachOp::Lw, r, regs::FP, off);
        }
        self.mem(MachOp::Lw, regs::RA, regs::FP, self.frame.ra_save);
        // $fp equals the frame top, so it doubles as the popped $sp; the
        // old base register is still readable for its own reload.
        self.rr(MachOp::Move, regs::SP, regs::FP);
        self.mem(MachOp::Lw, regs::FP, regs::FP, self.frame.fp_save);
        self.op(MachOp::Jr, vec![MachOperand::Reg(regs::RA)]);
    }

    // ----- selection -----

    fn lower_inst(&mut self, v: ValueId) -> CompileResult<()> {
        let Some(inst) = self.m.inst(v) else { return Ok(()) };
        let ops = inst.operands.clone();
        match inst.op.clone() {
            Op::Alloca { .. } => {}
            Op::Binary(op) => self.lower_binary(v, op, &ops)?,
            Op::Cmp(op) => {
                let dst = self.def_reg(v)?;
                let l = self.read(ops[0], regs::V1)?;
                let r = self.read(ops[1], regs::K0)?;
                let mach = match op {
                    crate::ir::CmpOp::Eq => MachOp::Seq,
                    crate::ir::CmpOp::Ne => MachOp::Sne,
                    crate::ir::CmpOp::Lt => MachOp::Slt,
                    crate::ir::CmpOp::Le => MachOp::Sle,
                    crate::ir::CmpOp::Gt => MachOp::Sgt,
                    crate::ir::CmpOp::Ge => MachOp::Sge,
                };
                self.rrr(mach, dst, l, r);
                self.finish_def(v, dst)?;
            }
            Op::Load => {
                let dst = self.def_reg(v)?;
                let word = pointee_size(self.m, ops[0]) == 4;
                let op = if word { MachOp::Lw } else { MachOp::Lb };
                if let Some(&off) = self.frame.alloca_off.get(&ops[0]) {
                    self.mem(op, dst, regs::FP, off);
                } else {
                    let base = self.read(ops[0], regs::K0)?;
                    self.mem(op, dst, base, 0);
                }
                self.finish_def(v, dst)?;
            }
            Op::Store => {
                let val = self.read(ops[0], regs::K0)?;
                let word = pointee_size(self.m, ops[1]) == 4;
                let op = if word { MachOp::Sw } else { MachOp::Sb };
                if let Some(&off) = self.frame.alloca_off.get(&ops[1]) {
                    self.mem(op, val, regs::FP, off);
                } else {
                    let base = self.read(ops[1], regs::V1)?;
                    self.mem(op, val, base, 0);
                }
            }
            Op::GetElem { elem_size } => self.lower_getelem(v, elem_size, &ops)?,
            Op::Cast(op) => {
                let dst = self.def_reg(v)?;
                let src = self.read(ops[0], regs::K0)?;
                match op {
                    crate::ir::CastOp::Zext => self.rri(MachOp::Andi, dst, src, 0xff),
                    crate::ir::CastOp::Trunc => self.mv(dst, src),
                }
                self.finish_def(v, dst)?;
            }
            Op::Call { callee } => self.lower_call(v, callee, &ops)?,
            Op::Br { target } => {
                let label = self.block_label(target);
                self.op(MachOp::J, vec![MachOperand::Label(label)]);
            }
            Op::CondBr { then_bb, else_bb } => {
                let cond = self.read(ops[0], regs::V1)?;
                let then_label = self.block_label(then_bb);
                let else_label = self.block_label(else_bb);
                self.op(MachOp::Bnez, vec![MachOperand::Reg(cond), MachOperand::Label(then_label)]);
                self.op(MachOp::J, vec![MachOperand::Label(else_label)]);
            }
            Op::Ret => {
                if let Some(&r) = ops.first() {
                    let src = self.read(r, regs::V0)?;
                    self.mv(regs::V0, src);
                }
                self.epilogue();
            }
            Op::Move { dst } => {
                match self.loc(dst)? {
                    Loc::Reg(rd) => {
                        let src = self.read(ops[0], rd)?;
                        self.mv(rd, src);
                    }
                    Loc::Stack => {
                        let src = self.read(ops[0], regs::V1)?;
                        let off = self.spill_slot(dst);
                        self.mem(MachOp::Sw, src, regs::FP, off);
                    }
                }
            }
            Op::Phi { .. } => return Err(self.unlowered(v, "phi")),
            Op::ParallelCopy { .. } => return Err(self.unlowered(v, "parallel copy")),
        }
        Ok(())
    }

    fn lower_binary(&mut self, v: ValueId, op: crate::ir::BinOp, ops: &[ValueId]) -> CompileResult<()> {
        use crate::ir::BinOp;
        let dst = self.def_reg(v)?;
        match op {
            BinOp::Add => {
                if let Some(n) = self.const_of(ops[1]) {
                    let l = self.read(ops[0], regs::V1)?;
                    self.rri(MachOp::Addiu, dst, l, n);
                } else if let Some(n) = self.const_of(ops[0]) {
                    let r = self.read(ops[1], regs::V1)?;
                    self.rri(MachOp::Addiu, dst, r, n);
                } else {
                    let l = self.read(ops[0], regs::V1)?;
                    let r = self.read(ops[1], regs::K0)?;
                    self.rrr(MachOp::Addu, dst, l, r);
                }
            }
            BinOp::Sub => {
                if let Some(n) = self.const_of(ops[1]) {
                    let l = self.read(ops[0], regs::V1)?;
                    self.rri(MachOp::Addiu, dst, l, n.wrapping_neg());
                } else {
                    let l = self.read(ops[0], regs::V1)?;
                    let r = self.read(ops[1], regs::K0)?;
                    self.rrr(MachOp::Subu, dst, l, r);
                }
            }
            BinOp::Mul => {
                let l = self.read(ops[0], regs::V1)?;
                let r = self.read(ops[1], regs::K0)?;
                self.rrr(MachOp::Mul, dst, l, r);
            }
            BinOp::Div | BinOp::Rem => {
                let l = self.read(ops[0], regs::V1)?;
                let r = self.read(ops[1], regs::K0)?;
                self.rr(MachOp::Div, l, r);
                let take = if matches!(op, BinOp::Div) { MachOp::Mflo } else { MachOp::Mfhi };
                self.op(take, vec![MachOperand::Reg(dst)]);
            }
        }
        self.finish_def(v, dst)
    }

    fn lower_getelem(&mut self, v: ValueId, elem_size: u32, ops: &[ValueId]) -> CompileResult<()> {
        let dst = self.def_reg(v)?;
        if let Some(n) = self.const_of(ops[1]) {
            let byte_off = n.wrapping_mul(elem_size as i32);
            if let Some(&off) = self.frame.alloca_off.get(&ops[0]) {
                self.rri(MachOp::Addiu, dst, regs::FP, off + byte_off);
            } else {
                let base = self.read(ops[0], regs::V1)?;
                self.rri(MachOp::Addiu, dst, base, byte_off);
            }
        } else {
            let idx = self.read(ops[1], regs::K0)?;
            let scaled = if elem_size == 4 {
                self.rri(MachOp::Sll, regs::K0, idx, 2);
                regs::K0
            } else {
                idx
            };
            let base = self.read(ops[0], regs::V1)?;
            self.rrr(MachOp::Addu, dst, base, scaled);
        }
        self.finish_def(v, dst)
    }

    fn lower_call(&mut self, v: ValueId, callee: FuncId, ops: &[ValueId]) -> CompileResult<()> {
        for (i, &arg) in ops.iter().enumerate() {
            if i < 4 {
                let a = regs::ARG_REGS[i];
                let src = self.read(arg, a)?;
                self.mv(a, src);
            } else {
                let src = self.read(arg, regs::V1)?;
                self.mem(MachOp::Sw, src, regs::SP, 4 * (i as i32 - 4));
            }
        }
        let label = self.m.func(callee).name.clone();
        self.op(MachOp::Jal, vec![MachOperand::Label(label)]);

        if !self.m.func(callee).ret_ty.is_void() {
            if let Some(&loc) = self.m.func(self.f).value_locs.get(&v) {
                match loc {
                    Loc::Reg(r) => self.mv(r, regs::V0),
                    Loc::Stack => {
                        let off = self.spill_slot(v);
                        self.mem(MachOp::Sw, regs::V0, regs::FP, off);
                    }
                }
            }
        }
        Ok(())
    }

    fn unlowered(&self, v: ValueId, what: &'static str) -> CompileError {
        CompileError::UnloweredPseudo {
            func: self.m.func(self.f).name.clone(),
            value: self.m.display_name(v),
            what,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::{cfg, liveness};
    use crate::ir::{BinOp, GlobalInit, Type};
    use crate::regalloc;

    fn prep(m: &mut Module, f: FuncId) {
        cfg::analyze(m, f).unwrap();
        liveness::run(m, f);
        regalloc::run(m, f, &regs::ALLOC_POOL).unwrap();
    }

    fn text_of(prog: &TargetProgram, name: &str) -> String {
        let func = prog.text.iter().find(|t| t.name == name).unwrap();
        func.insts.iter().map(|i| format!("{i}\n")).collect()
    }

    #[test]
    fn leaf_function_prologue_and_return() {
        let mut m = Module::new();
        let f = m.add_function("addone", Type::I32, &[Type::I32]);
        let entry = m.add_block(f, "entry");
        let a = m.func(f).params[0];
        let one = m.const_int(1);
        let sum = m.append_inst(entry, Op::Binary(BinOp::Add), Type::I32, vec![a, one], None);
        m.append_inst(entry, Op::Ret, Type::Void, vec![sum], None);
        prep(&mut m, f);

        let prog = lower_module(&m).unwrap();
        let text = text_of(&prog, "addone");
        assert!(text.contains("addiu $sp, $sp, -"));
        assert!(text.contains("move $t0, $a0"), "param homed into its register:\n{text}");
        // The param dies at the add, so the sum reuses its register.
        assert!(text.contains("addiu $t0, $t0, 1"), "immediate add selected:\n{text}");
        assert!(text.contains("move $v0, $t0"));
        assert!(text.contains("jr $ra"));
    }

    #[test]
    fn main_terminates_with_syscall_10() {
        let mut m = Module::new();
        let f = m.add_function("main", Type::I32, &[]);
        let entry = m.add_block(f, "entry");
        let zero = m.const_int(0);
        m.append_inst(entry, Op::Ret, Type::Void, vec![zero], None);
        prep(&mut m, f);

        let prog = lower_module(&m).unwrap();
        assert_eq!(prog.text[0].name, "main");
        let text = text_of(&prog, "main");
        assert!(text.contains("li $v0, 10"));
        assert!(text.contains("syscall"));
        assert!(!text.contains("jr $ra"));
    }

    #[test]
    fn six_argument_call_splits_across_regs_and_stack() {
        let mut m = Module::new();
        let callee = m.add_function("g", Type::I32, &[Type::I32; 6]);
        m.func_mut(callee).is_decl = true;
        let f = m.add_function("f", Type::I32, &[]);
        let entry = m.add_block(f, "entry");
        let args: Vec<ValueId> = (1..=6).map(|n| m.const_int(n)).collect();
        let call = m.append_inst(entry, Op::Call { callee }, Type::I32, args, None);
        m.append_inst(entry, Op::Ret, Type::Void, vec![call], None);
        prep(&mut m, f);

        let prog = lower_module(&m).unwrap();
        let text = text_of(&prog, "f");
        for (i, n) in (1..=4).enumerate() {
            assert!(text.contains(&format!("li $a{i}, {n}")), "arg {n} in register:\n{text}");
        }
        assert!(text.contains("sw $v1, 0($sp)"), "fifth arg in outgoing area:\n{text}");
        assert!(text.contains("sw $v1, 4($sp)"), "sixth arg in outgoing area:\n{text}");
        assert!(text.contains("jal g"));
    }

    #[test]
    fn used_temporaries_are_saved_and_restored() {
        let mut m = Module::new();
        let f = m.add_function("f", Type::I32, &[Type::I32]);
        let entry = m.add_block(f, "entry");
        let a = m.func(f).params[0];
        let sq = m.append_inst(entry, Op::Binary(BinOp::Mul), Type::I32, vec![a, a], None);
        m.append_inst(entry, Op::Ret, Type::Void, vec![sq], None);
        prep(&mut m, f);

        let prog = lower_module(&m).unwrap();
        let text = text_of(&prog, "f");
        assert!(text.contains("sw $t0, -4($fp)"), "used reg saved:\n{text}");
        assert!(text.contains("lw $t0, -4($fp)"), "used reg restored:\n{text}");
    }

    #[test]
    fn global_array_access_scales_the_index() {
        let mut m = Module::new();
        let g = m.add_global("table", Type::I32, 8, GlobalInit::Zero);
        let gv = m.global(g).value;
        let f = m.add_function("f", Type::I32, &[Type::I32]);
        let entry = m.add_block(f, "entry");
        let i = m.func(f).params[0];
        let addr = m.append_inst(entry, Op::GetElem { elem_size: 4 }, Type::Ptr, vec![gv, i], None);
        let val = m.append_inst(entry, Op::Load, Type::I32, vec![addr], None);
        m.append_inst(entry, Op::Ret, Type::Void, vec![val], None);
        prep(&mut m, f);

        let prog = lower_module(&m).unwrap();
        assert!(prog.data.iter().any(|d| d.name == "table" && d.size == 32));
        let text = text_of(&prog, "f");
        assert!(text.contains("sll $k0,"), "index scaled by 4:\n{text}");
        assert!(text.contains("la $v1, table"));
        assert!(text.contains("addu "));
    }

    #[test]
    fn builtins_wrap_the_syscalls() {
        let mut m = Module::new();
        let putint = m.add_builtin(Builtin::PutInt);
        let getint = m.add_builtin(Builtin::GetInt);
        let f = m.add_function("main", Type::I32, &[]);
        let entry = m.add_block(f, "entry");
        let n = m.append_inst(entry, Op::Call { callee: getint }, Type::I32, vec![], None);
        m.append_inst(entry, Op::Call { callee: putint }, Type::Void, vec![n], None);
        let zero = m.const_int(0);
        m.append_inst(entry, Op::Ret, Type::Void, vec![zero], None);
        prep(&mut m, f);

        let prog = lower_module(&m).unwrap();
        assert!(text_of(&prog, "getint").contains("li $v0, 5"));
        assert!(text_of(&prog, "putint").contains("li $v0, 1"));
        let main = text_of(&prog, "main");
        assert!(main.contains("jal getint"));
        assert!(main.contains("move $a0, $t0"), "call result forwarded:\n{main}");
        assert!(main.contains("jal putint"));
    }

    #[test]
    fn stray_phi_is_rejected() {
        let mut m = Module::new();
        let f = m.add_function("f", Type::I32, &[]);
        let entry = m.add_block(f, "entry");
        let phi = m.insert_inst_at(entry, 0, Op::Phi { preds: vec![] }, Type::I32, vec![], None);
        let zero = m.const_int(0);
        m.append_inst(entry, Op::Ret, Type::Void, vec![zero], None);
        m.func_mut(f).value_locs.insert(phi, Loc::Stack);
        cfg::analyze(&mut m, f).unwrap();

        let err = lower_module(&m).unwrap_err();
        assert!(matches!(err, CompileError::UnloweredPseudo { .. }));
    }
}
