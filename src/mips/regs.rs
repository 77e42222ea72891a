//! MIPS register conventions.
//!
//! The allocator draws from the ten temporaries $t0–$t9 and this compiler
//! saves the used ones in every prologue, so allocated values survive
//! calls without caller-side spilling. $v1 and $k0 are reserved as spill
//! scratch; $a0–$a3 carry the first four arguments and $v0 the result.

use crate::ir::PhysReg;

pub const ZERO: PhysReg = PhysReg(0);
pub const V0: PhysReg = PhysReg(2);
pub const V1: PhysReg = PhysReg(3);
pub const A0: PhysReg = PhysReg(4);
pub const A1: PhysReg = PhysReg(5);
pub const A2: PhysReg = PhysReg(6);
pub const A3: PhysReg = PhysReg(7);
pub const T0: PhysReg = PhysReg(8);
pub const T1: PhysReg = PhysReg(9);
pub const T2: PhysReg = PhysReg(10);
pub const T3: PhysReg = PhysReg(11);
pub const T4: PhysReg = PhysReg(12);
pub const T5: PhysReg = PhysReg(13);
pub const T6: PhysReg = PhysReg(14);
pub const T7: PhysReg = PhysReg(15);
pub const T8: PhysReg = PhysReg(24);
pub const T9: PhysReg = PhysReg(25);
pub const K0: PhysReg = PhysReg(26);
pub const SP: PhysReg = PhysReg(29);
pub const FP: PhysReg = PhysReg(30);
pub const RA: PhysReg = PhysReg(31);

/// Registers the allocator may hand out, in preference order.
pub const ALLOC_POOL: [PhysReg; 10] = [T0, T1, T2, T3, T4, T5, T6, T7, T8, T9];

/// Argument registers, first four arguments in order.
pub const ARG_REGS: [PhysReg; 4] = [A0, A1, A2, A3];

/// First and second spill scratch. Never allocated, never live across an
/// instruction.
pub const SCRATCH: [PhysReg; 2] = [V1, K0];

const NAMES: [&str; 32] = [
    "$zero", "$at", "$v0", "$v1", "$a0", "$a1", "$a2", "$a3", "$t0", "$t1",
    "$t2", "$t3", "$t4", "$t5", "$t6", "$t7", "$s0", "$s1", "$s2", "$s3",
    "$s4", "$s5", "$s6", "$s7", "$t8", "$t9", "$k0", "$k1", "$gp", "$sp",
    "$fp", "$ra",
];

pub fn name(r: PhysReg) -> &'static str {
    NAMES[r.0 as usize]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_and_names_line_up() {
        assert_eq!(ALLOC_POOL.len(), 10);
        assert_eq!(name(T0), "$t0");
        assert_eq!(name(T9), "$t9");
        assert_eq!(name(SP), "$sp");
        assert!(!ALLOC_POOL.contains(&V1) && !ALLOC_POOL.contains(&K0));
        for r in ARG_REGS {
            assert!(!ALLOC_POOL.contains(&r));
        }
    }
}
