//! The host plug-in surface.
//!
//! Exports the standard plug-in lifecycle (`Supports`, `Load`, `Unload`,
//! `AmxLoad`, `AmxUnload`). `Load` captures the host's `logprintf` and the
//! AMX export table, reads `server.cfg`, and refuses to start if another
//! module already hooked `Exec`. `AmxLoad` installs 5-byte jump hooks that
//! divert the host's `Exec` and `GetAddr` exports to the JIT and creates
//! one [`Jit`] instance per image; `AmxUnload`/`Unload` tear everything
//! down again.
//!
//! The host is single-threaded; the mutex around the plug-in state is a
//! container formality. It is never held while script code runs, so
//! natives are free to re-enter `Exec`.

#![allow(non_snake_case)]

use crate::amx::{AMX_FLAG_BROWSE, Amx, AmxError, AmxHeader, Cell};
use crate::config::{JitOptions, ServerConfig};
use crate::hook::JumpHook;
use crate::jit::Jit;
use std::collections::HashMap;
use std::ffi::{CString, c_char, c_int, c_void};
use std::sync::{Mutex, OnceLock};

pub const SUPPORTS_VERSION: u32 = 0x0200;
pub const SUPPORTS_AMX_NATIVES: u32 = 0x10000;

/// Indices into the host data table handed to `Load`.
pub const PLUGIN_DATA_LOGPRINTF: usize = 0x00;
pub const PLUGIN_DATA_AMX_EXPORTS: usize = 0x10;

/// Indices into the AMX export table.
pub const AMX_EXPORT_EXEC: usize = 7;
pub const AMX_EXPORT_GET_ADDR: usize = 13;

type LogPrintf = unsafe extern "C" fn(format: *const c_char, ...);
type AmxExecFn = unsafe extern "C" fn(*mut Amx, *mut Cell, c_int) -> c_int;

static LOGPRINTF: OnceLock<LogPrintf> = OnceLock::new();
static HOST: Mutex<Option<PluginHost>> = Mutex::new(None);

struct PluginHost {
    amx_exports: *mut *mut c_void,
    exec_hook: JumpHook,
    getaddr_hook: JumpHook,
    opcode_list: *mut Cell,
    options: JitOptions,
    jits: HashMap<usize, Box<Jit>>,
}

// Single-threaded host; the raw pointers name process-global host state.
unsafe impl Send for PluginHost {}

fn host_print(msg: &str) {
    if let Some(lp) = LOGPRINTF.get() {
        let line = CString::new(msg).unwrap_or_default();
        unsafe { lp(c"%s".as_ptr(), line.as_ptr()) }
    }
}

/// Routes `log` records into the server log.
struct HostLogger;

impl log::Log for HostLogger {
    fn enabled(&self, metadata: &log::Metadata) -> bool {
        metadata.level() <= log::Level::Info
    }

    fn log(&self, record: &log::Record) {
        if self.enabled(record.metadata()) {
            host_print(&format!("[jit] {}", record.args()));
        }
    }

    fn flush(&self) {}
}

static LOGGER: HostLogger = HostLogger;

#[cfg(unix)]
fn module_name(symbol: *const u8) -> String {
    let mut info: libc::Dl_info = unsafe { std::mem::zeroed() };
    let rc = unsafe { libc::dladdr(symbol as *const c_void, &mut info) };
    if rc != 0 && !info.dli_fname.is_null() {
        let path = unsafe { std::ffi::CStr::from_ptr(info.dli_fname) }.to_string_lossy();
        if let Some(file) = path.rsplit(['/', '\\']).next() {
            return file.to_string();
        }
    }
    "another module".to_string()
}

#[cfg(not(unix))]
fn module_name(_symbol: *const u8) -> String {
    "another module".to_string()
}

#[unsafe(no_mangle)]
pub extern "C" fn Supports() -> u32 {
    SUPPORTS_VERSION | SUPPORTS_AMX_NATIVES
}

/// Plug-in startup: capture host pointers, read the configuration, make
/// sure nobody hooked `Exec` before us.
///
/// # Safety
/// Called by the host with its plug-in data table.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn Load(pp_data: *mut *mut c_void) -> bool {
    let (logprintf, amx_exports) = unsafe {
        (
            std::mem::transmute::<*mut c_void, LogPrintf>(*pp_data.add(PLUGIN_DATA_LOGPRINTF)),
            *pp_data.add(PLUGIN_DATA_AMX_EXPORTS) as *mut *mut c_void,
        )
    };
    let _ = LOGPRINTF.set(logprintf);
    let _ = log::set_logger(&LOGGER).map(|()| log::set_max_level(log::LevelFilter::Info));

    let exec = unsafe { *amx_exports.add(AMX_EXPORT_EXEC) } as *const u8;
    let hooked_by = unsafe { JumpHook::target_of(exec) };
    if !hooked_by.is_null() {
        host_print(&format!(
            "  The JIT plugin must be loaded before {}",
            module_name(hooked_by)
        ));
        return false;
    }

    let options = JitOptions::from_server_cfg(&ServerConfig::load("server.cfg"));
    *HOST.lock().unwrap() = Some(PluginHost {
        amx_exports,
        exec_hook: JumpHook::new(),
        getaddr_hook: JumpHook::new(),
        opcode_list: std::ptr::null_mut(),
        options,
        jits: HashMap::new(),
    });

    host_print(&format!(
        "  JIT plugin v{} is OK.",
        env!("CARGO_PKG_VERSION")
    ));
    true
}

/// Plug-in shutdown: drop every JIT instance and unhook the exports.
///
/// # Safety
/// Called by the host after all images are unloaded.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn Unload() {
    if let Some(mut host) = HOST.lock().unwrap().take() {
        unsafe {
            let _ = host.exec_hook.remove();
            let _ = host.getaddr_hook.remove();
        }
        host.jits.clear();
    }
}

/// A new image: probe the opcode table if still needed, install the hooks,
/// create the per-image JIT instance.
///
/// # Safety
/// `amx` must be a live, relocated machine owned by the host.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn AmxLoad(amx: *mut Amx) -> c_int {
    let mut guard = HOST.lock().unwrap();
    let Some(host) = guard.as_mut() else {
        return AmxError::Init.code();
    };

    let exec = unsafe { *host.amx_exports.add(AMX_EXPORT_EXEC) };
    let get_addr = unsafe { *host.amx_exports.add(AMX_EXPORT_GET_ADDR) };

    // The relocation pass wants the interpreter's opcode dispatch table;
    // fetch it through the original Exec before it gets hooked.
    if host.opcode_list.is_null() {
        let exec_fn: AmxExecFn = unsafe { std::mem::transmute(exec) };
        unsafe {
            (*amx).flags |= AMX_FLAG_BROWSE;
            let mut table: Cell = 0;
            exec_fn(amx, &mut table, 0);
            (*amx).flags &= !AMX_FLAG_BROWSE;
            host.opcode_list = table as usize as *mut Cell;
        }
    }

    if !host.exec_hook.is_installed()
        && unsafe {
            host.exec_hook
                .install(exec as *mut u8, amx_exec_jit as usize as *const u8)
        }
        .is_err()
    {
        log::error!("failed to hook the Exec export");
        return AmxError::Init.code();
    }
    if !host.getaddr_hook.is_installed()
        && unsafe {
            host.getaddr_hook
                .install(get_addr as *mut u8, amx_get_addr_jit as usize as *const u8)
        }
        .is_err()
    {
        log::error!("failed to hook the GetAddr export");
        return AmxError::Init.code();
    }

    match unsafe { Jit::new(amx, &host.options) } {
        Ok(jit) => {
            host.jits.insert(amx as usize, Box::new(jit));
            AmxError::None.code()
        }
        Err(e) => {
            log::error!("cannot create a JIT for this image: {}", e);
            AmxError::InitJit.code()
        }
    }
}

/// Image teardown: drop the instance and its compiled code.
///
/// # Safety
/// `amx` must be the pointer previously passed to `AmxLoad`.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn AmxUnload(amx: *mut Amx) -> c_int {
    if let Some(host) = HOST.lock().unwrap().as_mut() {
        host.jits.remove(&(amx as usize));
    }
    AmxError::None.code()
}

/// The hooked `Exec`: serve the opcode table during browsing, otherwise
/// dispatch to the image's JIT.
unsafe extern "C" fn amx_exec_jit(amx: *mut Amx, retval: *mut Cell, index: c_int) -> c_int {
    if unsafe { (*amx).flags } & AMX_FLAG_BROWSE != 0 {
        let guard = HOST.lock().unwrap();
        if let (Some(host), false) = (guard.as_ref(), retval.is_null()) {
            unsafe { *retval = host.opcode_list as usize as Cell };
        }
        return AmxError::None.code();
    }

    // Boxed instances keep this pointer stable; the lock is released
    // before generated code runs so natives may re-enter.
    let jit: *mut Jit = {
        let mut guard = HOST.lock().unwrap();
        match guard.as_mut().and_then(|h| h.jits.get_mut(&(amx as usize))) {
            Some(jit) => &mut **jit,
            None => {
                log::error!("Exec on an image the JIT never saw");
                return AmxError::Init.code();
            }
        }
    };

    let mut value: Cell = 0;
    let rc = unsafe { (*jit).call_public(index, &mut value) };
    if !retval.is_null() {
        unsafe { *retval = value };
    }
    rc
}

/// The hooked `GetAddr`: plain pointer arithmetic, no bounds check, so
/// frames the JIT materialized on the native stack stay reachable.
unsafe extern "C" fn amx_get_addr_jit(
    amx: *mut Amx,
    amx_addr: Cell,
    phys_addr: *mut *mut Cell,
) -> c_int {
    unsafe {
        let hdr = (*amx).base as *const AmxHeader;
        *phys_addr = (*amx).base.offset((*hdr).dat as isize + amx_addr as isize) as *mut Cell;
    }
    AmxError::None.code()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::amx::AMX_MAGIC;

    #[test]
    fn supports_reports_version_and_natives() {
        let flags = Supports();
        assert_eq!(flags & SUPPORTS_VERSION, SUPPORTS_VERSION);
        assert_eq!(flags & SUPPORTS_AMX_NATIVES, SUPPORTS_AMX_NATIVES);
    }

    #[test]
    fn get_addr_is_unchecked_pointer_arithmetic() {
        let mut buf = vec![0u8; 4096];
        let hdr = AmxHeader {
            magic: AMX_MAGIC,
            dat: 1024,
            ..Default::default()
        };
        unsafe { (buf.as_mut_ptr() as *mut AmxHeader).write_unaligned(hdr) };
        let mut amx = Amx {
            base: buf.as_mut_ptr(),
            ..Default::default()
        };

        let mut phys: *mut Cell = std::ptr::null_mut();
        let rc = unsafe { amx_get_addr_jit(&mut amx, 64, &mut phys) };
        assert_eq!(rc, AmxError::None.code());
        assert_eq!(phys as usize, buf.as_ptr() as usize + 1024 + 64);

        // Deliberately out of the declared data section: still resolved.
        let rc = unsafe { amx_get_addr_jit(&mut amx, 1 << 20, &mut phys) };
        assert_eq!(rc, AmxError::None.code());
        assert_eq!(phys as usize, buf.as_ptr() as usize + 1024 + (1 << 20));
    }
}
