//! The bytecode-to-x86 function assembler.
//!
//! [`assemble_function`] walks the decoded instruction stream for one AMX
//! function and emits 32-bit x86 implementing each opcode under the fixed
//! register binding PRI=EAX, ALT=ECX, FRM=EBP, STK=ESP, with EDX/EBX/ESI/EDI
//! as scratch. The native data-section base is folded into every effective
//! address as a 32-bit displacement.
//!
//! A function starts at its `PROC` opcode and ends at the next `PROC` or at
//! the end of the code section. Intra-function jumps go through labels bound
//! at each instruction's AMX address; inter-function calls are emitted as
//! `mov edx, imm32` placeholders and reported to the caller as relocations,
//! to be patched once the target is in the code cache. Runtime failures
//! (`HALT`, `BOUNDS`, zero divisors) store an error code into `amx.error`
//! and jump to a per-function epilogue that unwinds the frame.

use super::JitError;
use super::codebuf::{CodeBuffer, Label};
use super::natives;
use super::x86::{Asm, Cond, Reg};
use crate::amx::decoder::Decoder;
use crate::amx::opcode::Opcode;
use crate::amx::{AmxError, AmxImage, CELL_SIZE, Cell, Ucell};

/// A `mov edx, imm32` immediate awaiting the native address of the callee.
#[derive(Debug, Clone, Copy)]
pub struct CallReloc {
    /// Byte offset of the imm32 within the function's code.
    pub offset: usize,
    /// AMX entry address of the callee.
    pub target: Ucell,
}

/// One assembled function, not yet placed in executable memory.
#[derive(Debug)]
pub struct AssembledFunction {
    pub entry: Ucell,
    pub code: Vec<u8>,
    pub call_relocs: Vec<CallReloc>,
}

pub fn assemble_function(image: &AmxImage, entry: Ucell) -> Result<AssembledFunction, JitError> {
    let cells = image.code_cells();
    let data = image.data_disp();
    let epilogue = Label::tagged(entry, "epilogue");

    let mut buf = CodeBuffer::with_capacity(256);
    let mut relocs: Vec<CallReloc> = Vec::new();
    let mut seen_proc = false;

    for ins in Decoder::new(cells, entry) {
        let ins = ins?;
        let oper = ins.operand;

        if ins.opcode == Opcode::Proc {
            if seen_proc {
                // The next function begins here.
                break;
            }
        } else if !seen_proc {
            return Err(JitError::InvalidInstruction(entry));
        }

        buf.bind(Label::at(ins.address));
        let mut asm = Asm::new(&mut buf);

        match ins.opcode {
            Opcode::Proc => {
                // [STK] = FRM, FRM = STK
                asm.push_r(Reg::Ebp);
                asm.mov_rr(Reg::Ebp, Reg::Esp);
                seen_proc = true;
            }

            // ---- loads ----
            Opcode::LoadPri => {
                // PRI = [address]
                asm.mov_rm_abs(Reg::Eax, data.wrapping_add(oper));
            }
            Opcode::LoadAlt => {
                asm.mov_rm_abs(Reg::Ecx, data.wrapping_add(oper));
            }
            Opcode::LoadSPri => {
                // PRI = [FRM + offset]
                asm.mov_rm(Reg::Eax, Reg::Ebp, oper);
            }
            Opcode::LoadSAlt => {
                asm.mov_rm(Reg::Ecx, Reg::Ebp, oper);
            }
            Opcode::LrefPri => {
                // PRI = [[address]]
                asm.mov_rm_abs(Reg::Edx, data.wrapping_add(oper));
                asm.mov_rm(Reg::Eax, Reg::Edx, data);
            }
            Opcode::LrefAlt => {
                asm.mov_rm_abs(Reg::Edx, data.wrapping_add(oper));
                asm.mov_rm(Reg::Ecx, Reg::Edx, data);
            }
            Opcode::LrefSPri => {
                // PRI = [[FRM + offset]]
                asm.mov_rm(Reg::Edx, Reg::Ebp, oper);
                asm.mov_rm(Reg::Eax, Reg::Edx, data);
            }
            Opcode::LrefSAlt => {
                asm.mov_rm(Reg::Edx, Reg::Ebp, oper);
                asm.mov_rm(Reg::Ecx, Reg::Edx, data);
            }
            Opcode::LoadI => {
                // PRI = [PRI]
                asm.mov_rm(Reg::Eax, Reg::Eax, data);
            }
            Opcode::LodbI => match oper {
                // PRI = 1/2/4 bytes at [PRI], zero-extended
                1 => asm.movzx8_rm(Reg::Eax, Reg::Eax, data),
                2 => asm.movzx16_rm(Reg::Eax, Reg::Eax, data),
                _ => asm.mov_rm(Reg::Eax, Reg::Eax, data),
            },

            // ---- constants ----
            Opcode::ConstPri => asm.mov_ri(Reg::Eax, oper),
            Opcode::ConstAlt => asm.mov_ri(Reg::Ecx, oper),
            Opcode::AddrPri => {
                // PRI = FRM + offset
                asm.lea(Reg::Eax, Reg::Ebp, oper.wrapping_sub(data));
            }
            Opcode::AddrAlt => {
                asm.lea(Reg::Ecx, Reg::Ebp, oper.wrapping_sub(data));
            }

            // ---- stores ----
            Opcode::StorPri => asm.mov_abs_r(data.wrapping_add(oper), Reg::Eax),
            Opcode::StorAlt => asm.mov_abs_r(data.wrapping_add(oper), Reg::Ecx),
            Opcode::StorSPri => asm.mov_mr(Reg::Ebp, oper, Reg::Eax),
            Opcode::StorSAlt => asm.mov_mr(Reg::Ebp, oper, Reg::Ecx),
            Opcode::SrefPri => {
                // [[address]] = PRI
                asm.mov_rm_abs(Reg::Edx, data.wrapping_add(oper));
                asm.mov_mr(Reg::Edx, data, Reg::Eax);
            }
            Opcode::SrefAlt => {
                asm.mov_rm_abs(Reg::Edx, data.wrapping_add(oper));
                asm.mov_mr(Reg::Edx, data, Reg::Ecx);
            }
            Opcode::SrefSPri => {
                asm.mov_rm(Reg::Edx, Reg::Ebp, oper);
                asm.mov_mr(Reg::Edx, data, Reg::Eax);
            }
            Opcode::SrefSAlt => {
                asm.mov_rm(Reg::Edx, Reg::Ebp, oper);
                asm.mov_mr(Reg::Edx, data, Reg::Ecx);
            }
            Opcode::StorI => {
                // [ALT] = PRI
                asm.mov_mr(Reg::Ecx, data, Reg::Eax);
            }
            Opcode::StrbI => match oper {
                1 => asm.mov8_mr(Reg::Ecx, data, Reg::Eax),
                2 => asm.mov16_mr(Reg::Ecx, data, Reg::Eax),
                _ => asm.mov_mr(Reg::Ecx, data, Reg::Eax),
            },

            // ---- indexed addressing ----
            Opcode::Lidx => {
                // PRI = [ALT + PRI * cell]
                asm.mov_rm_index(Reg::Eax, Reg::Ecx, Reg::Eax, CELL_SIZE as u8, data);
            }
            Opcode::LidxB => {
                asm.mov_rr(Reg::Edx, Reg::Eax);
                asm.shl_ri(Reg::Edx, oper as u8);
                asm.mov_rm_index(Reg::Eax, Reg::Ecx, Reg::Edx, 1, data);
            }
            Opcode::Idxaddr => {
                // PRI = ALT + PRI * cell
                asm.lea_index(Reg::Eax, Reg::Ecx, Reg::Eax, CELL_SIZE as u8, 0);
            }
            Opcode::IdxaddrB => {
                asm.shl_ri(Reg::Eax, oper as u8);
                asm.lea_index(Reg::Eax, Reg::Ecx, Reg::Eax, 1, 0);
            }
            Opcode::AlignPri => {
                // little-endian byte swap for sub-cell access
                asm.xor_ri(Reg::Eax, (CELL_SIZE as i32).wrapping_sub(oper));
            }
            Opcode::AlignAlt => {
                asm.xor_ri(Reg::Ecx, (CELL_SIZE as i32).wrapping_sub(oper));
            }

            // ---- special registers ----
            Opcode::Lctrl => match oper {
                0 => asm.mov_rm_abs(Reg::Eax, image.hdr_cod_disp()),
                1 => asm.mov_rm_abs(Reg::Eax, image.hdr_dat_disp()),
                2 => asm.mov_rm_abs(Reg::Eax, image.hdr_hea_disp()),
                3 => asm.mov_rm_abs(Reg::Eax, image.stp_disp()),
                4 => asm.mov_rm_abs(Reg::Eax, image.stk_disp()),
                5 => asm.mov_rm_abs(Reg::Eax, image.frm_disp()),
                6 => asm.mov_rm_abs(Reg::Eax, image.hdr_cip_disp()),
                _ => {}
            },
            Opcode::Sctrl => match oper {
                2 => asm.mov_abs_r(image.hdr_hea_disp(), Reg::Eax),
                4 => asm.mov_abs_r(image.stk_disp(), Reg::Eax),
                5 => asm.mov_abs_r(image.frm_disp(), Reg::Eax),
                _ => {}
            },

            // ---- moves ----
            Opcode::MovePri => asm.mov_rr(Reg::Eax, Reg::Ecx),
            Opcode::MoveAlt => asm.mov_rr(Reg::Ecx, Reg::Eax),
            Opcode::Xchg => asm.xchg_rr(Reg::Eax, Reg::Ecx),

            // ---- stack ----
            Opcode::PushPri => asm.push_r(Reg::Eax),
            Opcode::PushAlt => asm.push_r(Reg::Ecx),
            Opcode::PushC => asm.push_i(oper),
            Opcode::Push => asm.push_abs(data.wrapping_add(oper)),
            Opcode::PushS => asm.push_m(Reg::Ebp, oper),
            Opcode::PushAdr => {
                asm.lea(Reg::Edx, Reg::Ebp, oper.wrapping_sub(data));
                asm.push_r(Reg::Edx);
            }
            Opcode::PopPri => asm.pop_r(Reg::Eax),
            Opcode::PopAlt => asm.pop_r(Reg::Ecx),
            Opcode::Stack => {
                // ALT = STK, STK += value
                asm.lea(Reg::Ecx, Reg::Esp, data.wrapping_neg());
                asm.add_ri(Reg::Esp, oper);
            }
            Opcode::Heap => {
                // ALT = HEA, HEA += value
                asm.mov_rm_abs(Reg::Ecx, image.hea_disp());
                asm.add_abs_i(image.hea_disp(), oper);
            }
            Opcode::SwapPri => asm.xchg_mr(Reg::Esp, 0, Reg::Eax),
            Opcode::SwapAlt => asm.xchg_mr(Reg::Esp, 0, Reg::Ecx),

            // ---- calls and returns ----
            Opcode::Ret | Opcode::Retn => {
                // Callee stack cleanup happens at the call site.
                asm.pop_r(Reg::Ebp);
                asm.ret();
            }
            Opcode::Call => {
                let target = image.resolve(oper);
                asm.mov_ri(Reg::Edx, 0); // native entry, patched by the cache
                relocs.push(CallReloc {
                    offset: asm.offset() - 4,
                    target,
                });
                asm.call_r(Reg::Edx);
                // Pop the pushed arguments plus the argument-byte count.
                asm.add_rm(Reg::Esp, Reg::Esp, 0);
                asm.add_ri(Reg::Esp, 4);
            }
            Opcode::SysreqC => {
                let address = ins.address;
                let native = image.native_address(oper);
                if native == 0 {
                    return Err(JitError::UnresolvedNative(address));
                }
                let inline = image
                    .native_name(oper)
                    .and_then(|n| n.to_str().ok())
                    .and_then(natives::override_for);
                if let Some(emit) = inline {
                    emit(&mut asm);
                } else {
                    asm.push_r(Reg::Esp);
                    asm.push_i(image.amx_disp());
                    asm.mov_ri(Reg::Edx, native as i32);
                    asm.call_r(Reg::Edx);
                    asm.add_ri(Reg::Esp, 8);
                }
            }
            Opcode::SysreqD => {
                asm.push_r(Reg::Esp);
                asm.push_i(image.amx_disp());
                asm.mov_ri(Reg::Edx, oper);
                asm.call_r(Reg::Edx);
                asm.add_ri(Reg::Esp, 8);
            }

            // ---- branches ----
            Opcode::Jump => asm.jmp(Label::at(image.resolve(oper))),
            Opcode::Jzer => {
                asm.cmp_ri(Reg::Eax, 0);
                asm.jcc(Cond::E, Label::at(image.resolve(oper)));
            }
            Opcode::Jnz => {
                asm.cmp_ri(Reg::Eax, 0);
                asm.jcc(Cond::Ne, Label::at(image.resolve(oper)));
            }
            Opcode::Jeq
            | Opcode::Jneq
            | Opcode::Jless
            | Opcode::Jleq
            | Opcode::Jgrtr
            | Opcode::Jgeq
            | Opcode::Jsless
            | Opcode::Jsleq
            | Opcode::Jsgrtr
            | Opcode::Jsgeq => {
                let cond = match ins.opcode {
                    Opcode::Jeq => Cond::E,
                    Opcode::Jneq => Cond::Ne,
                    Opcode::Jless => Cond::B,
                    Opcode::Jleq => Cond::Be,
                    Opcode::Jgrtr => Cond::A,
                    Opcode::Jgeq => Cond::Ae,
                    Opcode::Jsless => Cond::L,
                    Opcode::Jsleq => Cond::Le,
                    Opcode::Jsgrtr => Cond::G,
                    _ => Cond::Ge,
                };
                asm.cmp_rr(Reg::Eax, Reg::Ecx);
                asm.jcc(cond, Label::at(image.resolve(oper)));
            }

            // ---- shifts ----
            Opcode::Shl => asm.shl_cl(Reg::Eax),
            Opcode::Shr => asm.shr_cl(Reg::Eax),
            Opcode::Sshr => asm.sar_cl(Reg::Eax),
            Opcode::ShlCPri => asm.shl_ri(Reg::Eax, oper as u8),
            Opcode::ShlCAlt => asm.shl_ri(Reg::Ecx, oper as u8),
            Opcode::ShrCPri => asm.shr_ri(Reg::Eax, oper as u8),
            Opcode::ShrCAlt => asm.shr_ri(Reg::Ecx, oper as u8),

            // ---- arithmetic ----
            Opcode::Smul => {
                asm.xor_rr(Reg::Edx, Reg::Edx);
                asm.imul_r(Reg::Ecx);
            }
            Opcode::Umul => {
                asm.xor_rr(Reg::Edx, Reg::Edx);
                asm.mul_r(Reg::Ecx);
            }
            Opcode::Sdiv => {
                // PRI = PRI / ALT, ALT = PRI mod ALT
                emit_divide_guard(&mut asm, ins.address, image.error_disp(), epilogue);
                asm.xor_rr(Reg::Edx, Reg::Edx);
                asm.idiv_r(Reg::Ecx);
                asm.mov_rr(Reg::Ecx, Reg::Edx);
            }
            Opcode::SdivAlt => {
                asm.xchg_rr(Reg::Eax, Reg::Ecx);
                emit_divide_guard(&mut asm, ins.address, image.error_disp(), epilogue);
                asm.xor_rr(Reg::Edx, Reg::Edx);
                asm.idiv_r(Reg::Ecx);
                asm.mov_rr(Reg::Ecx, Reg::Edx);
            }
            Opcode::Udiv => {
                emit_divide_guard(&mut asm, ins.address, image.error_disp(), epilogue);
                asm.xor_rr(Reg::Edx, Reg::Edx);
                asm.div_r(Reg::Ecx);
                asm.mov_rr(Reg::Ecx, Reg::Edx);
            }
            Opcode::UdivAlt => {
                asm.xchg_rr(Reg::Eax, Reg::Ecx);
                emit_divide_guard(&mut asm, ins.address, image.error_disp(), epilogue);
                asm.xor_rr(Reg::Edx, Reg::Edx);
                asm.div_r(Reg::Ecx);
                asm.mov_rr(Reg::Ecx, Reg::Edx);
            }
            Opcode::Add => asm.add_rr(Reg::Eax, Reg::Ecx),
            Opcode::Sub => asm.sub_rr(Reg::Eax, Reg::Ecx),
            Opcode::SubAlt => {
                // PRI = -(PRI - ALT)
                asm.sub_rr(Reg::Eax, Reg::Ecx);
                asm.neg(Reg::Eax);
            }
            Opcode::And => asm.and_rr(Reg::Eax, Reg::Ecx),
            Opcode::Or => asm.or_rr(Reg::Eax, Reg::Ecx),
            Opcode::Xor => asm.xor_rr(Reg::Eax, Reg::Ecx),
            Opcode::Not => {
                asm.test_rr(Reg::Eax, Reg::Eax);
                asm.setcc(Cond::E, Reg::Ecx);
                asm.movzx8_rr(Reg::Eax, Reg::Ecx);
            }
            Opcode::Neg => asm.neg(Reg::Eax),
            Opcode::Invert => asm.not_(Reg::Eax),
            Opcode::AddC => asm.add_ri(Reg::Eax, oper),
            Opcode::SmulC => asm.imul_rri(Reg::Eax, Reg::Eax, oper),
            Opcode::ZeroPri => asm.xor_rr(Reg::Eax, Reg::Eax),
            Opcode::ZeroAlt => asm.xor_rr(Reg::Ecx, Reg::Ecx),
            Opcode::Zero => asm.mov_abs_i(data.wrapping_add(oper), 0),
            Opcode::ZeroS => asm.mov_mi(Reg::Ebp, oper, 0),
            Opcode::SignPri => asm.movsx8_rr(Reg::Eax, Reg::Eax),
            Opcode::SignAlt => asm.movsx8_rr(Reg::Ecx, Reg::Ecx),

            // ---- comparisons producing 0/1 ----
            Opcode::Eq
            | Opcode::Neq
            | Opcode::Less
            | Opcode::Leq
            | Opcode::Grtr
            | Opcode::Geq
            | Opcode::Sless
            | Opcode::Sleq
            | Opcode::Sgrtr
            | Opcode::Sgeq => {
                let cond = match ins.opcode {
                    Opcode::Eq => Cond::E,
                    Opcode::Neq => Cond::Ne,
                    Opcode::Less => Cond::B,
                    Opcode::Leq => Cond::Be,
                    Opcode::Grtr => Cond::A,
                    Opcode::Geq => Cond::Ae,
                    Opcode::Sless => Cond::L,
                    Opcode::Sleq => Cond::Le,
                    Opcode::Sgrtr => Cond::G,
                    _ => Cond::Ge,
                };
                asm.cmp_rr(Reg::Eax, Reg::Ecx);
                asm.setcc(cond, Reg::Eax);
                asm.movzx8_rr(Reg::Eax, Reg::Eax);
            }
            Opcode::EqCPri => {
                asm.cmp_ri(Reg::Eax, oper);
                asm.setcc(Cond::E, Reg::Eax);
                asm.movzx8_rr(Reg::Eax, Reg::Eax);
            }
            Opcode::EqCAlt => {
                asm.cmp_ri(Reg::Ecx, oper);
                asm.setcc(Cond::E, Reg::Eax);
                asm.movzx8_rr(Reg::Eax, Reg::Eax);
            }

            // ---- increments ----
            Opcode::IncPri => asm.inc_r(Reg::Eax),
            Opcode::IncAlt => asm.inc_r(Reg::Ecx),
            Opcode::Inc => asm.inc_abs(data.wrapping_add(oper)),
            Opcode::IncS => asm.inc_m(Reg::Ebp, oper),
            Opcode::IncI => asm.inc_m(Reg::Eax, data),
            Opcode::DecPri => asm.dec_r(Reg::Eax),
            Opcode::DecAlt => asm.dec_r(Reg::Ecx),
            Opcode::Dec => asm.dec_abs(data.wrapping_add(oper)),
            Opcode::DecS => asm.dec_m(Reg::Ebp, oper),
            Opcode::DecI => asm.dec_m(Reg::Eax, data),

            // ---- memory blocks ----
            Opcode::Movs => {
                // copy `oper` bytes from [PRI] to [ALT]
                asm.lea(Reg::Esi, Reg::Eax, data);
                asm.lea(Reg::Edi, Reg::Ecx, data);
                asm.push_r(Reg::Ecx);
                if oper % 4 == 0 {
                    asm.mov_ri(Reg::Ecx, oper / 4);
                    asm.rep_movsd();
                } else if oper % 2 == 0 {
                    asm.mov_ri(Reg::Ecx, oper / 2);
                    asm.rep_movsw();
                } else {
                    asm.mov_ri(Reg::Ecx, oper);
                    asm.rep_movsb();
                }
                asm.pop_r(Reg::Ecx);
            }
            Opcode::Cmps => {
                asm.lea(Reg::Esi, Reg::Eax, data);
                asm.lea(Reg::Edi, Reg::Ecx, data);
                asm.push_r(Reg::Ecx);
                asm.mov_ri(Reg::Ecx, oper);
                asm.repe_cmpsb();
                asm.pop_r(Reg::Ecx);
            }
            Opcode::Fill => {
                // memset(data + ALT, PRI, oper); PRI/ALT are caller-saved
                // in the C ABI, so keep them across the call.
                asm.push_r(Reg::Eax);
                asm.push_r(Reg::Ecx);
                asm.push_i(oper);
                asm.push_r(Reg::Eax);
                asm.lea(Reg::Edx, Reg::Ecx, data);
                asm.push_r(Reg::Edx);
                asm.mov_ri(Reg::Edx, libc::memset as usize as i32);
                asm.call_r(Reg::Edx);
                asm.add_ri(Reg::Esp, 12);
                asm.pop_r(Reg::Ecx);
                asm.pop_r(Reg::Eax);
            }

            // ---- runtime errors ----
            Opcode::Halt => {
                // exit value stays in PRI; the operand is the error code
                asm.mov_abs_i(image.error_disp(), oper);
                asm.jmp(epilogue);
            }
            Opcode::Bounds => {
                // abort when PRI > bound or PRI < 0 (one unsigned compare)
                let ok = Label::tagged(ins.address, "in_bounds");
                asm.cmp_ri(Reg::Eax, oper);
                asm.jcc(Cond::Be, ok);
                asm.mov_abs_i(image.error_disp(), AmxError::Bounds.code());
                asm.jmp(epilogue);
                asm.bind(ok);
            }

            // ---- switch ----
            Opcode::Switch => {
                emit_switch(&mut asm, image, cells, ins.address, oper)?;
            }
            Opcode::Casetbl => {
                // never reached at runtime; the decoder skipped its tail
            }

            Opcode::Nop | Opcode::Break => {}

            // obsolete, decoded for compatibility
            Opcode::File
            | Opcode::Line
            | Opcode::Symbol
            | Opcode::Srange
            | Opcode::JumpPri
            | Opcode::CallPri
            | Opcode::Jrel
            | Opcode::PushR
            | Opcode::Symtag => {}

            Opcode::SysreqPri => {
                return Err(JitError::UnsupportedInstruction(ins.address, ins.opcode));
            }
            Opcode::None => {
                return Err(JitError::InvalidInstruction(ins.address));
            }
        }
    }

    if !seen_proc {
        // The entry never produced a function body.
        return Err(JitError::InvalidInstruction(entry));
    }

    // Shared unwind path for emitted runtime errors.
    buf.bind(epilogue);
    let mut asm = Asm::new(&mut buf);
    asm.mov_rr(Reg::Esp, Reg::Ebp);
    asm.pop_r(Reg::Ebp);
    asm.ret();

    buf.patch_refs()?;
    Ok(AssembledFunction {
        entry,
        code: buf.into_code(),
        call_relocs: relocs,
    })
}

/// Zero-divisor check ahead of a division; the divisor is already in ECX.
fn emit_divide_guard(asm: &mut Asm<'_>, address: Ucell, error_disp: i32, epilogue: Label) {
    let ok = Label::tagged(address, "divisor_ok");
    asm.test_rr(Reg::Ecx, Reg::Ecx);
    asm.jcc(Cond::Ne, ok);
    asm.mov_abs_i(error_disp, AmxError::Divide.code());
    asm.jmp(epilogue);
    asm.bind(ok);
}

/// Emit the dispatch for `SWITCH`: a range check against the smallest and
/// largest case values, one compare per record in table order (first match
/// wins on duplicates), then the default jump.
fn emit_switch(
    asm: &mut Asm<'_>,
    image: &AmxImage,
    cells: &[Cell],
    address: Ucell,
    oper: Cell,
) -> Result<(), JitError> {
    let table = image.resolve(oper) as usize / CELL_SIZE;
    let invalid = || JitError::InvalidInstruction(address);

    let count = *cells.get(table + 1).ok_or_else(invalid)?;
    let count = usize::try_from(count).map_err(|_| invalid())?;
    let default = Label::at(image.resolve(*cells.get(table + 2).ok_or_else(invalid)?));

    if count == 0 {
        asm.jmp(default);
        return Ok(());
    }

    let mut cases = Vec::with_capacity(count);
    for i in 0..count {
        let value = *cells.get(table + 3 + 2 * i).ok_or_else(invalid)?;
        let target = *cells.get(table + 4 + 2 * i).ok_or_else(invalid)?;
        cases.push((value, Label::at(image.resolve(target))));
    }

    let min = cases.iter().map(|&(v, _)| v).min().unwrap_or(0);
    let max = cases.iter().map(|&(v, _)| v).max().unwrap_or(0);
    asm.cmp_ri(Reg::Eax, min);
    asm.jcc(Cond::L, default);
    asm.cmp_ri(Reg::Eax, max);
    asm.jcc(Cond::G, default);

    for (value, target) in cases {
        asm.cmp_ri(Reg::Eax, value);
        asm.jcc(Cond::E, target);
    }
    asm.jmp(default);
    Ok(())
}
