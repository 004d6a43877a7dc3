//! JIT compilation for one AMX image.
//!
//! A [`Jit`] is created when the host loads an image and dropped when the
//! image unloads, releasing every compiled buffer. Publics are compiled
//! lazily on first call; [`Jit::call_public`] is the replacement for the
//! host's `Exec`.

pub mod cache;
pub mod codebuf;
pub mod memory;
pub mod natives;
pub mod trampoline;
pub mod translator;
pub mod x86;

use crate::amx::opcode::Opcode;
use crate::amx::{AMX_EXEC_MAIN, Amx, AmxError, AmxImage, CELL_SIZE, Cell, Ucell};
use crate::config::JitOptions;
use cache::CodeCache;
use codebuf::UnboundLabel;
use memory::MemoryError;
use std::io::{self, Write};
use thiserror::Error;
use trampoline::{AltStack, EntryThunk};

#[derive(Debug, Error)]
pub enum JitError {
    #[error("invalid instruction at address {0:#010x}")]
    InvalidInstruction(Ucell),
    #[error("unsupported instruction {1:?} at address {0:#010x}")]
    UnsupportedInstruction(Ucell, Opcode),
    #[error("unresolved native function at address {0:#010x}")]
    UnresolvedNative(Ucell),
    #[error(transparent)]
    Label(#[from] UnboundLabel),
    #[error(transparent)]
    Memory(#[from] MemoryError),
}

impl From<crate::amx::decoder::DecodeError> for JitError {
    fn from(e: crate::amx::decoder::DecodeError) -> Self {
        JitError::InvalidInstruction(e.address)
    }
}

impl JitError {
    /// The AMX error code reported to the host.
    pub fn amx_error(&self) -> AmxError {
        match self {
            JitError::InvalidInstruction(_) | JitError::UnsupportedInstruction(..) => {
                AmxError::InvInstr
            }
            _ => AmxError::General,
        }
    }
}

/// A JIT instance bound to one loaded AMX image.
pub struct Jit {
    image: AmxImage,
    cache: CodeCache,
    thunk: EntryThunk,
    // Kept alive for the generated thunk; only read back by it.
    #[allow(dead_code)]
    alt_stack: Option<AltStack>,
}

impl Jit {
    /// Bind a new instance to a loaded image.
    ///
    /// # Safety
    /// `amx` must point to a live, relocated AMX that outlives the instance.
    pub unsafe fn new(amx: *mut Amx, options: &JitOptions) -> Result<Self, JitError> {
        let image = unsafe { AmxImage::new(amx) };
        let alt_stack = match options.stack_size {
            0 => None,
            size => Some(AltStack::new(size)),
        };
        let thunk = EntryThunk::generate(alt_stack.as_ref())?;
        Ok(Jit {
            image,
            cache: CodeCache::new(),
            thunk,
            alt_stack,
        })
    }

    pub fn image(&self) -> &AmxImage {
        &self.image
    }

    /// Number of functions compiled so far.
    pub fn compiled_functions(&self) -> usize {
        self.cache.len()
    }

    /// Execute a public function, compiling it (and everything it calls)
    /// on first use. Returns the AMX error code; the callee's PRI lands in
    /// `retval`.
    pub fn call_public(&mut self, index: i32, retval: &mut Cell) -> i32 {
        let amx = self.image.amx();
        unsafe {
            (*amx).error = AmxError::None.code();
        }

        let paramcount = unsafe { (*amx).paramcount };
        let parambytes = paramcount * CELL_SIZE as Cell;

        let address = self.image.public_address(index);
        if address == 0 && index != AMX_EXEC_MAIN {
            // Bad index: report it without touching the AMX stack.
            unsafe {
                (*amx).error = AmxError::Index.code();
                (*amx).paramcount = 0;
                return (*amx).error;
            }
        }

        let entry = match self.cache.entry(&self.image, address) {
            Ok(entry) => entry,
            Err(e) => {
                let name = self
                    .image
                    .public_name(index)
                    .and_then(|n| n.to_str().ok())
                    .unwrap_or("?");
                log::error!("cannot run public '{}': {}", name, e);
                unsafe {
                    (*amx).error = e.amx_error().code();
                    (*amx).paramcount = 0;
                    (*amx).stk += parambytes;
                    return (*amx).error;
                }
            }
        };

        unsafe {
            let args = self.image.data_base().add((*amx).stk as usize) as *const Cell;
            *retval = self.thunk.enter(entry, args, parambytes);
            (*amx).stk += parambytes;
            (*amx).paramcount = 0;
            (*amx).error
        }
    }

    /// Write every compiled function's native code to `sink`, in entry
    /// address order.
    pub fn dump_code<W: Write>(&self, sink: &mut W) -> io::Result<()> {
        let mut functions: Vec<_> = self.cache.functions().collect();
        functions.sort_by_key(|f| f.entry());
        for f in functions {
            sink.write_all(f.code_bytes())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::translator::tests::TestImage;
    use super::*;

    #[test]
    fn bad_public_index_reports_index_error() {
        let mut img = TestImage::new(
            &[Opcode::Proc as Cell, Opcode::ZeroPri as Cell, Opcode::Retn as Cell],
            0,
        );
        let image = img.image();
        let amx = image.amx();
        unsafe {
            (*amx).stk = 0;
            (*amx).paramcount = 2;
        }
        let mut jit = unsafe { Jit::new(amx, &JitOptions::default()) }.unwrap();
        let mut retval = 0;
        let rc = jit.call_public(9999, &mut retval);
        assert_eq!(rc, AmxError::Index.code());
        unsafe {
            assert_eq!((*amx).error, AmxError::Index.code());
            assert_eq!((*amx).stk, 0);
            assert_eq!((*amx).paramcount, 0);
        }
        assert_eq!(jit.compiled_functions(), 0);
    }

    #[test]
    fn dump_code_writes_compiled_functions() {
        let mut img = TestImage::new(
            &[Opcode::Proc as Cell, Opcode::ZeroPri as Cell, Opcode::Retn as Cell],
            0,
        );
        let image = img.image();
        let amx = image.amx();
        let mut jit = unsafe { Jit::new(amx, &JitOptions::default()) }.unwrap();
        jit.cache.entry(&jit.image, 0).unwrap();

        let mut out = Vec::new();
        jit.dump_code(&mut out).unwrap();
        assert!(out.starts_with(&[0x55, 0x89, 0xE5]));
    }

    #[test]
    fn translation_errors_map_to_amx_codes() {
        assert_eq!(
            JitError::InvalidInstruction(0).amx_error(),
            AmxError::InvInstr
        );
        assert_eq!(
            JitError::UnsupportedInstruction(0, Opcode::SysreqPri).amx_error(),
            AmxError::InvInstr
        );
        assert_eq!(JitError::UnresolvedNative(0).amx_error(), AmxError::General);
    }
}
