//! Executable memory for compiled functions.
//!
//! Native buffers are mapped read+write, filled with the assembled bytes,
//! patched (call-site relocation happens after the owning function is
//! registered in the cache) and then flipped to read+execute. A buffer is
//! never written again once executable; it lives until the owning JIT
//! instance is dropped on image unload.

use std::ptr::NonNull;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MemoryError {
    #[error("executable memory allocation of {0} bytes failed")]
    Alloc(usize),
    #[error("memory protection change failed")]
    Protect,
    #[error("cannot map an empty code buffer")]
    Empty,
}

pub struct ExecutableMemory {
    ptr: NonNull<u8>,
    size: usize,
    executable: bool,
}

impl ExecutableMemory {
    /// Map a writable page-aligned region and copy `code` into it.
    pub fn from_code(code: &[u8]) -> Result<Self, MemoryError> {
        if code.is_empty() {
            return Err(MemoryError::Empty);
        }
        let page = page_size();
        let size = code.len().div_ceil(page) * page;
        let ptr = map_region(size)?;
        unsafe {
            std::ptr::copy_nonoverlapping(code.as_ptr(), ptr.as_ptr(), code.len());
        }
        Ok(ExecutableMemory {
            ptr,
            size,
            executable: false,
        })
    }

    pub fn as_ptr(&self) -> *const u8 {
        self.ptr.as_ptr()
    }

    /// Writable pointer, available only before the region is sealed.
    pub fn as_mut_ptr(&mut self) -> Option<*mut u8> {
        if self.executable {
            None
        } else {
            Some(self.ptr.as_ptr())
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn is_executable(&self) -> bool {
        self.executable
    }

    /// Seal the region: read+execute, no further writes.
    #[cfg(unix)]
    pub fn make_executable(&mut self) -> Result<(), MemoryError> {
        if self.executable {
            return Ok(());
        }
        let rc = unsafe {
            libc::mprotect(
                self.ptr.as_ptr() as *mut libc::c_void,
                self.size,
                libc::PROT_READ | libc::PROT_EXEC,
            )
        };
        if rc != 0 {
            return Err(MemoryError::Protect);
        }
        self.executable = true;
        Ok(())
    }

    #[cfg(not(unix))]
    pub fn make_executable(&mut self) -> Result<(), MemoryError> {
        self.executable = true;
        Ok(())
    }
}

impl Drop for ExecutableMemory {
    fn drop(&mut self) {
        #[cfg(unix)]
        unsafe {
            libc::munmap(self.ptr.as_ptr() as *mut libc::c_void, self.size);
        }
        #[cfg(not(unix))]
        unsafe {
            let layout = std::alloc::Layout::from_size_align_unchecked(self.size, page_size());
            std::alloc::dealloc(self.ptr.as_ptr(), layout);
        }
    }
}

// The region is exclusively owned and immutable once executable.
unsafe impl Send for ExecutableMemory {}
unsafe impl Sync for ExecutableMemory {}

#[cfg(unix)]
fn page_size() -> usize {
    unsafe { libc::sysconf(libc::_SC_PAGESIZE) as usize }
}

#[cfg(not(unix))]
fn page_size() -> usize {
    4096
}

#[cfg(unix)]
fn map_region(size: usize) -> Result<NonNull<u8>, MemoryError> {
    let ptr = unsafe {
        libc::mmap(
            std::ptr::null_mut(),
            size,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
            -1,
            0,
        )
    };
    if ptr == libc::MAP_FAILED {
        return Err(MemoryError::Alloc(size));
    }
    NonNull::new(ptr as *mut u8).ok_or(MemoryError::Alloc(size))
}

#[cfg(not(unix))]
fn map_region(size: usize) -> Result<NonNull<u8>, MemoryError> {
    let layout = std::alloc::Layout::from_size_align(size, page_size())
        .map_err(|_| MemoryError::Alloc(size))?;
    NonNull::new(unsafe { std::alloc::alloc(layout) }).ok_or(MemoryError::Alloc(size))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_and_copies_code() {
        let mem = ExecutableMemory::from_code(&[0x90, 0x90, 0xC3]).unwrap();
        assert!(mem.size() >= 3);
        assert!(!mem.is_executable());
        let bytes = unsafe { std::slice::from_raw_parts(mem.as_ptr(), 3) };
        assert_eq!(bytes, &[0x90, 0x90, 0xC3]);
    }

    #[test]
    fn rejects_empty_code() {
        assert!(ExecutableMemory::from_code(&[]).is_err());
    }

    #[test]
    fn sealing_revokes_write_access() {
        let mut mem = ExecutableMemory::from_code(&[0xC3]).unwrap();
        assert!(mem.as_mut_ptr().is_some());
        mem.make_executable().unwrap();
        assert!(mem.is_executable());
        assert!(mem.as_mut_ptr().is_none());
    }
}
