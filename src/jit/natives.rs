//! Syscall bridge helpers.
//!
//! Generic native dispatch is emitted by the translator: at a `sysreq` site
//! the AMX arguments and their byte count are already on the native stack,
//! so the call pushes `(esp, amx)` and invokes the registered
//! `cell (AMX*, cell*)` callback.
//!
//! The well-known floating-point natives are cheap enough that a call is
//! mostly overhead; when a `SYSREQ_C` target carries one of their names the
//! translator emits the x87 sequence inline instead. Each override reads its
//! arguments from the synthetic params frame (`[esp]` is the byte count,
//! `[esp + 4]` the first argument) and leaves the raw float bits in PRI.

use super::x86::{Asm, Reg};

/// Inline code generator replacing a native call.
pub type NativeOverride = fn(&mut Asm<'_>);

/// Look up the inline override for a native, by name.
pub fn override_for(name: &str) -> Option<NativeOverride> {
    Some(match name {
        "float" => native_float,
        "floatabs" => native_floatabs,
        "floatadd" => native_floatadd,
        "floatsub" => native_floatsub,
        "floatmul" => native_floatmul,
        "floatdiv" => native_floatdiv,
        "floatsqroot" => native_floatsqroot,
        "floatlog" => native_floatlog,
        _ => return None,
    })
}

/// Pop ST0 into PRI as raw float bits.
fn store_st0(asm: &mut Asm<'_>) {
    asm.sub_ri(Reg::Esp, 4);
    asm.fstp_m(Reg::Esp, 0);
    asm.pop_r(Reg::Eax);
}

/// float(value) — integer to float.
fn native_float(asm: &mut Asm<'_>) {
    asm.fild_m(Reg::Esp, 4);
    store_st0(asm);
}

fn native_floatabs(asm: &mut Asm<'_>) {
    asm.fld_m(Reg::Esp, 4);
    asm.fabs_();
    store_st0(asm);
}

fn native_floatadd(asm: &mut Asm<'_>) {
    asm.fld_m(Reg::Esp, 4);
    asm.fadd_m(Reg::Esp, 8);
    store_st0(asm);
}

fn native_floatsub(asm: &mut Asm<'_>) {
    asm.fld_m(Reg::Esp, 4);
    asm.fsub_m(Reg::Esp, 8);
    store_st0(asm);
}

fn native_floatmul(asm: &mut Asm<'_>) {
    asm.fld_m(Reg::Esp, 4);
    asm.fmul_m(Reg::Esp, 8);
    store_st0(asm);
}

fn native_floatdiv(asm: &mut Asm<'_>) {
    asm.fld_m(Reg::Esp, 4);
    asm.fdiv_m(Reg::Esp, 8);
    store_st0(asm);
}

fn native_floatsqroot(asm: &mut Asm<'_>) {
    asm.fld_m(Reg::Esp, 4);
    asm.fsqrt();
    store_st0(asm);
}

/// floatlog(value, base) = log2(value) / log2(base).
fn native_floatlog(asm: &mut Asm<'_>) {
    asm.fld1();
    asm.fld_m(Reg::Esp, 8); // base
    asm.fyl2x();
    asm.fld1();
    asm.fdivrp_st1(); // 1 / log2(base)
    asm.fld_m(Reg::Esp, 4); // value
    asm.fyl2x();
    store_st0(asm);
}
