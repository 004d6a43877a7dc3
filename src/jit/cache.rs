//! The per-image code cache.
//!
//! Maps AMX function entry addresses to compiled native buffers. Lookup
//! compiles on miss, so at most one native copy exists per entry address
//! and every inter-function call resolves to it.
//!
//! Call-site relocation runs after the freshly assembled function has been
//! inserted, so resolving a callee that calls back (directly recursive
//! functions included) terminates by finding the in-progress entry in the
//! map. A function is sealed read+execute only once all of its call sites
//! are patched.

use super::JitError;
use super::memory::ExecutableMemory;
use super::translator::assemble_function;
use crate::amx::{AmxImage, Ucell};
use std::collections::HashMap;

/// One compiled function and the executable memory that backs it.
pub struct CompiledFunction {
    entry: Ucell,
    memory: ExecutableMemory,
    code_len: usize,
}

impl CompiledFunction {
    pub fn entry(&self) -> Ucell {
        self.entry
    }

    pub fn code_ptr(&self) -> *const u8 {
        self.memory.as_ptr()
    }

    /// The assembled bytes (without the page-alignment tail).
    pub fn code_bytes(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.memory.as_ptr(), self.code_len) }
    }
}

#[derive(Default)]
pub struct CodeCache {
    functions: HashMap<Ucell, CompiledFunction>,
}

impl CodeCache {
    pub fn new() -> Self {
        CodeCache {
            functions: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }

    pub fn functions(&self) -> impl Iterator<Item = &CompiledFunction> {
        self.functions.values()
    }

    /// Native entry point for the function at `address`, compiling on miss.
    pub fn entry(&mut self, image: &AmxImage, address: Ucell) -> Result<*const u8, JitError> {
        if let Some(f) = self.functions.get(&address) {
            return Ok(f.code_ptr());
        }
        self.compile(image, address)
    }

    fn compile(&mut self, image: &AmxImage, address: Ucell) -> Result<*const u8, JitError> {
        let assembled = assemble_function(image, address)?;
        log::debug!(
            "compiled function at {:#010x}: {} bytes, {} call sites",
            address,
            assembled.code.len(),
            assembled.call_relocs.len()
        );

        let memory = ExecutableMemory::from_code(&assembled.code)?;
        let ptr = memory.as_ptr();
        self.functions.insert(
            address,
            CompiledFunction {
                entry: address,
                memory,
                code_len: assembled.code.len(),
            },
        );

        // Resolve call targets now that this function is discoverable.
        for reloc in &assembled.call_relocs {
            let target = match self.entry(image, reloc.target) {
                Ok(target) => target,
                Err(e) => {
                    // Drop the half-patched function; a later call would
                    // otherwise find a buffer with a null callee.
                    self.functions.remove(&address);
                    return Err(e);
                }
            };
            unsafe {
                (ptr as *mut u8)
                    .add(reloc.offset)
                    .cast::<u32>()
                    .write_unaligned(target as usize as u32);
            }
        }

        if let Some(f) = self.functions.get_mut(&address) {
            f.memory.make_executable()?;
        }
        Ok(ptr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::amx::Cell;
    use crate::amx::opcode::Opcode;
    use crate::jit::translator::tests::TestImage;

    #[test]
    fn lookup_is_idempotent() {
        let mut img = TestImage::new(
            &[Opcode::Proc as Cell, Opcode::ZeroPri as Cell, Opcode::Retn as Cell],
            0,
        );
        let image = img.image();
        let mut cache = CodeCache::new();
        let first = cache.entry(&image, 0).unwrap();
        let second = cache.entry(&image, 0).unwrap();
        assert_eq!(first, second);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn self_recursion_patches_the_own_entry() {
        let mut img = TestImage::new(
            &[
                Opcode::Proc as Cell, // 0
                Opcode::Call as Cell, // 4
                0,                    // -> 0
                Opcode::Retn as Cell, // 12
            ],
            0,
        );
        let own = img.code_ref(0);
        img.patch_cell(2, own);
        let image = img.image();
        let mut cache = CodeCache::new();
        let entry = cache.entry(&image, 0).unwrap();
        assert_eq!(cache.len(), 1);

        // The call placeholder now holds this function's own address.
        let f = cache.functions().next().unwrap();
        let code = f.code_bytes();
        let at = code.iter().position(|&b| b == 0xBA).unwrap() + 1;
        let imm = u32::from_le_bytes(code[at..at + 4].try_into().unwrap());
        assert_eq!(imm, entry as usize as u32);
    }

    #[test]
    fn mutual_recursion_compiles_both_functions() {
        let mut img = TestImage::new(
            &[
                Opcode::Proc as Cell, // 0
                Opcode::Call as Cell, // 4
                0,                    // -> 16
                Opcode::Retn as Cell, // 12
                Opcode::Proc as Cell, // 16
                Opcode::Call as Cell, // 20
                0,                    // -> 0
                Opcode::Retn as Cell, // 28
            ],
            0,
        );
        let to_second = img.code_ref(16);
        let to_first = img.code_ref(0);
        img.patch_cell(2, to_second);
        img.patch_cell(6, to_first);
        let image = img.image();
        let mut cache = CodeCache::new();
        cache.entry(&image, 0).unwrap();
        assert_eq!(cache.len(), 2);
        for f in cache.functions() {
            assert!(f.code_bytes().starts_with(&[0x55, 0x89, 0xE5]));
        }
    }

    #[test]
    fn translation_failure_leaves_no_cache_entry() {
        let mut img = TestImage::new(
            &[
                Opcode::Proc as Cell, // 0
                Opcode::Call as Cell, // 4
                0,                    // -> 16, which is not a PROC
                Opcode::Retn as Cell, // 12
                Opcode::Nop as Cell,  // 16
            ],
            0,
        );
        let bad = img.code_ref(16);
        img.patch_cell(2, bad);
        let image = img.image();
        let mut cache = CodeCache::new();
        assert!(cache.entry(&image, 0).is_err());
        assert!(cache.is_empty());
    }
}
