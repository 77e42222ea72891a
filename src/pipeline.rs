//! The compilation pipeline.
//!
//! Per function: prune unreachable blocks, analyze the CFG, build SSA,
//! clean up with DCE, value-number, schedule with GCM, then liveness,
//! register allocation and SSA destruction. Lowering to the target runs
//! once over the whole module at the end.

use crate::analysis::{cfg, liveness};
use crate::core::CompileResult;
use crate::ir::{FuncId, Module};
use crate::mips::{self, TargetProgram};
use crate::{opt, regalloc, ssa};

/// Run the middle end on one function, leaving it phi-free with a
/// location assigned to every live value.
pub fn process_function(m: &mut Module, f: FuncId) -> CompileResult<()> {
    cfg::prune_unreachable(m, f)?;
    cfg::analyze(m, f)?;
    ssa::construct::run(m, f)?;
    opt::dce::run(m, f)?;
    cfg::analyze(m, f)?;
    opt::gvn::run(m, f)?;
    opt::gcm::run(m, f)?;
    liveness::run(m, f);
    regalloc::run(m, f, &mips::regs::ALLOC_POOL)?;
    ssa::destruct::run(m, f)?;
    Ok(())
}

/// Compile the whole module down to a target program.
pub fn compile(m: &mut Module) -> CompileResult<TargetProgram> {
    for f in m.defined_funcs() {
        log::debug!("compiling {}", m.func(f).name);
        process_function(m, f)?;
    }
    mips::lower_module(m)
}
