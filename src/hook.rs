//! Function-entry hooking.
//!
//! The plug-in diverts the host's `Exec` and `GetAddr` exports by patching
//! a 5-byte `jmp rel32` over the first instruction of the target. The
//! original bytes are saved so a hook can be removed at unload.

use thiserror::Error;

/// Length of the patch: one opcode byte plus a rel32 displacement.
pub const JUMP_LEN: usize = 5;

const JMP_REL32: u8 = 0xE9;

#[derive(Debug, Error)]
pub enum HookError {
    #[error("changing code page protection failed")]
    Protect,
    #[error("hook is already installed")]
    AlreadyInstalled,
}

/// A removable `jmp rel32` patch over a function entry point.
pub struct JumpHook {
    src: *mut u8,
    saved: [u8; JUMP_LEN],
    installed: bool,
}

impl Default for JumpHook {
    fn default() -> Self {
        JumpHook {
            src: std::ptr::null_mut(),
            saved: [0; JUMP_LEN],
            installed: false,
        }
    }
}

impl JumpHook {
    pub fn new() -> Self {
        JumpHook::default()
    }

    pub fn is_installed(&self) -> bool {
        self.installed
    }

    /// Redirect `src` to `dst`.
    ///
    /// # Safety
    /// `src` must point to at least [`JUMP_LEN`] bytes of patchable code
    /// that no thread is concurrently executing.
    pub unsafe fn install(&mut self, src: *mut u8, dst: *const u8) -> Result<(), HookError> {
        if self.installed {
            return Err(HookError::AlreadyInstalled);
        }
        unsafe {
            unprotect(src, JUMP_LEN)?;
            std::ptr::copy_nonoverlapping(src, self.saved.as_mut_ptr(), JUMP_LEN);
            let rel = (dst as usize as u32)
                .wrapping_sub(src as usize as u32)
                .wrapping_sub(JUMP_LEN as u32);
            src.write(JMP_REL32);
            src.add(1).cast::<u32>().write_unaligned(rel);
        }
        self.src = src;
        self.installed = true;
        Ok(())
    }

    /// Restore the original bytes.
    ///
    /// # Safety
    /// The patched function must not be executing.
    pub unsafe fn remove(&mut self) -> Result<(), HookError> {
        if !self.installed {
            return Ok(());
        }
        unsafe {
            unprotect(self.src, JUMP_LEN)?;
            std::ptr::copy_nonoverlapping(self.saved.as_ptr(), self.src, JUMP_LEN);
        }
        self.installed = false;
        Ok(())
    }

    /// Where an already-patched function jumps to, or null when the entry
    /// does not start with a `jmp rel32`. Used to detect a competing hook.
    ///
    /// # Safety
    /// `func` must point to at least [`JUMP_LEN`] readable bytes.
    pub unsafe fn target_of(func: *const u8) -> *const u8 {
        unsafe {
            if func.read() != JMP_REL32 {
                return std::ptr::null();
            }
            let rel = func.add(1).cast::<u32>().read_unaligned();
            ((func as usize as u32)
                .wrapping_add(JUMP_LEN as u32)
                .wrapping_add(rel)) as usize as *const u8
        }
    }
}

// The raw pointer names host code, which is process-global anyway.
unsafe impl Send for JumpHook {}

#[cfg(unix)]
unsafe fn unprotect(at: *mut u8, len: usize) -> Result<(), HookError> {
    let page = unsafe { libc::sysconf(libc::_SC_PAGESIZE) } as usize;
    let start = (at as usize) & !(page - 1);
    let end = (at as usize + len).div_ceil(page) * page;
    let rc = unsafe {
        libc::mprotect(
            start as *mut libc::c_void,
            end - start,
            libc::PROT_READ | libc::PROT_WRITE | libc::PROT_EXEC,
        )
    };
    if rc != 0 { Err(HookError::Protect) } else { Ok(()) }
}

#[cfg(not(unix))]
unsafe fn unprotect(_at: *mut u8, _len: usize) -> Result<(), HookError> {
    Ok(())
}
