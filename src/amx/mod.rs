//! AMX virtual machine boundary types.
//!
//! The JIT consumes a pre-loaded, pre-relocated AMX image owned by the host.
//! This module mirrors the host's C layout for the machine structure, the
//! image header and the public/native stub tables, and provides [`AmxImage`],
//! a derived view holding the absolute code/data pointers the translator
//! folds into emitted instructions.

pub mod decoder;
pub mod opcode;

use std::ffi::CStr;

/// The AMX machine word: a signed 32-bit integer.
pub type Cell = i32;
/// Unsigned cell, used for code offsets and table addresses.
pub type Ucell = u32;

/// Size of one cell in bytes.
pub const CELL_SIZE: usize = 4;

/// Index passed to `Exec` to run the script's `main` entry point.
pub const AMX_EXEC_MAIN: i32 = -1;

/// Set on `amx.flags` while the host's relocation pass wants the opcode
/// dispatch table instead of actual execution.
pub const AMX_FLAG_BROWSE: i32 = 0x4000;

/// AMX error codes, as returned from `Exec`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum AmxError {
    None = 0,
    Exit = 1,
    Assert = 2,
    StackErr = 3,
    Bounds = 4,
    MemAccess = 5,
    InvInstr = 6,
    StackLow = 7,
    HeapLow = 8,
    Callback = 9,
    Native = 10,
    Divide = 11,
    Sleep = 12,
    Memory = 16,
    Format = 17,
    Version = 18,
    NotFound = 19,
    Index = 20,
    Debug = 21,
    Init = 22,
    UserData = 23,
    InitJit = 24,
    Params = 25,
    Domain = 26,
    General = 27,
}

impl AmxError {
    pub fn code(self) -> i32 {
        self as i32
    }
}

/// Callback invoked by the interpreter for `sysreq` instructions; the JIT
/// bypasses it and calls natives directly, but the field must stay in place.
pub type AmxCallback =
    unsafe extern "C" fn(amx: *mut Amx, index: Cell, result: *mut Cell, params: *mut Cell) -> i32;

/// Optional debug hook.
pub type AmxDebug = unsafe extern "C" fn(amx: *mut Amx) -> i32;

/// A host-provided native function: `cell fn(AMX *amx, cell *params)`.
pub type AmxNativeFn = unsafe extern "C" fn(amx: *mut Amx, params: *mut Cell) -> Cell;

/// The AMX machine structure, laid out exactly as the host's C definition.
#[repr(C)]
pub struct Amx {
    /// Points to the memory image (header + code + data).
    pub base: *mut u8,
    /// Separate data block, or null when the data section lives in `base`.
    pub data: *mut u8,
    pub callback: Option<AmxCallback>,
    pub debug: Option<AmxDebug>,
    pub cip: Cell,
    pub frm: Cell,
    pub hea: Cell,
    pub hlw: Cell,
    pub stk: Cell,
    pub stp: Cell,
    pub flags: i32,
    pub usertags: [libc::c_long; 4],
    pub userdata: [*mut libc::c_void; 4],
    pub error: i32,
    pub paramcount: i32,
    pub pri: Cell,
    pub alt: Cell,
    pub reset_stk: Cell,
    pub reset_hea: Cell,
    /// Relocated address of the `sysreq.d` dispatcher, when in use.
    pub sysreq_d: Cell,
}

impl Default for Amx {
    fn default() -> Self {
        Amx {
            base: std::ptr::null_mut(),
            data: std::ptr::null_mut(),
            callback: None,
            debug: None,
            cip: 0,
            frm: 0,
            hea: 0,
            hlw: 0,
            stk: 0,
            stp: 0,
            flags: 0,
            usertags: [0; 4],
            userdata: [std::ptr::null_mut(); 4],
            error: 0,
            paramcount: 0,
            pri: 0,
            alt: 0,
            reset_stk: 0,
            reset_hea: 0,
            sysreq_d: 0,
        }
    }
}

/// The image header at the start of `amx.base`.
#[repr(C, packed)]
#[derive(Debug, Clone, Copy, Default)]
pub struct AmxHeader {
    pub size: i32,
    pub magic: u16,
    pub file_version: u8,
    pub amx_version: u8,
    pub flags: i16,
    /// Size in bytes of one record in the public/native/library tables.
    pub defsize: i16,
    pub cod: i32,
    pub dat: i32,
    pub hea: i32,
    pub stp: i32,
    pub cip: i32,
    pub publics: i32,
    pub natives: i32,
    pub libraries: i32,
    pub pubvars: i32,
    pub tags: i32,
    pub nametable: i32,
}

pub const AMX_MAGIC: u16 = 0xF1E0;

/// One record of the public/native/library tables.
#[repr(C, packed)]
#[derive(Debug, Clone, Copy, Default)]
pub struct FuncStub {
    pub address: Ucell,
    pub nameofs: u32,
}

/// Derived view of one loaded AMX image.
///
/// Holds the absolute code and data pointers the translator folds into
/// effective addresses, plus accessors over the header tables. The image
/// itself stays owned by the host; the view is valid for as long as the
/// host keeps the image mapped.
pub struct AmxImage {
    amx: *mut Amx,
    code: *mut u8,
    data: *mut u8,
    code_size: u32,
}

impl AmxImage {
    /// Build the view from a loaded machine.
    ///
    /// # Safety
    /// `amx` must point to a live AMX whose `base` carries a valid header,
    /// and the image must outlive the returned view.
    pub unsafe fn new(amx: *mut Amx) -> Self {
        unsafe {
            let base = (*amx).base;
            let hdr = base as *const AmxHeader;
            let cod = (*hdr).cod;
            let dat = (*hdr).dat;
            let data = if (*amx).data.is_null() {
                base.add(dat as usize)
            } else {
                (*amx).data
            };
            AmxImage {
                amx,
                code: base.add(cod as usize),
                data,
                code_size: (dat - cod) as u32,
            }
        }
    }

    pub fn amx(&self) -> *mut Amx {
        self.amx
    }

    fn header(&self) -> *const AmxHeader {
        unsafe { (*self.amx).base as *const AmxHeader }
    }

    pub fn code_base(&self) -> *mut u8 {
        self.code
    }

    pub fn data_base(&self) -> *mut u8 {
        self.data
    }

    pub fn code_size(&self) -> u32 {
        self.code_size
    }

    /// The code section as a cell slice, for decoding.
    pub fn code_cells(&self) -> &[Cell] {
        unsafe {
            std::slice::from_raw_parts(self.code as *const Cell, self.code_size as usize / CELL_SIZE)
        }
    }

    /// Rebase an absolute (relocated) code reference to a code offset.
    ///
    /// Computed in wrapping `u32` arithmetic: emitted code only ever sees
    /// 32-bit addresses, and translation stays well-defined on 64-bit test
    /// hosts where the image base truncates.
    pub fn resolve(&self, reference: Cell) -> Ucell {
        (reference as u32).wrapping_sub(self.code as usize as u32)
    }

    /// Data base as a 32-bit displacement for emitted effective addresses.
    pub fn data_disp(&self) -> i32 {
        self.data as usize as i32
    }

    /// The machine pointer as a 32-bit immediate, pushed for native calls.
    pub fn amx_disp(&self) -> i32 {
        self.amx as usize as i32
    }

    fn table(&self, start: i32, end: i32) -> (usize, *const u8) {
        let hdr = self.header();
        let defsize = unsafe { (*hdr).defsize } as i32;
        let count = (end - start) / defsize;
        let ptr = unsafe { (*self.amx).base.add(start as usize) };
        (count as usize, ptr)
    }

    fn stub_at(&self, table: *const u8, defsize: i32, index: usize) -> FuncStub {
        unsafe {
            (table.add(index * defsize as usize) as *const FuncStub).read_unaligned()
        }
    }

    pub fn num_publics(&self) -> usize {
        let hdr = self.header();
        unsafe { self.table((*hdr).publics, (*hdr).natives).0 }
    }

    /// Entry address of a public, `0` when the index is out of range.
    /// Index `-1` names the main entry point (`header.cip`).
    pub fn public_address(&self, index: i32) -> Ucell {
        let hdr = self.header();
        if index == AMX_EXEC_MAIN {
            return unsafe { (*hdr).cip } as Ucell;
        }
        let (count, table) = unsafe { self.table((*hdr).publics, (*hdr).natives) };
        if index < 0 || index as usize >= count {
            return 0;
        }
        let defsize = unsafe { (*hdr).defsize } as i32;
        self.stub_at(table, defsize, index as usize).address
    }

    /// Name of a public, for log messages. Index `-1` is `main`.
    pub fn public_name(&self, index: i32) -> Option<&CStr> {
        if index == AMX_EXEC_MAIN {
            return Some(c"main");
        }
        let hdr = self.header();
        let (count, table) = unsafe { self.table((*hdr).publics, (*hdr).natives) };
        if index < 0 || index as usize >= count {
            return None;
        }
        let defsize = unsafe { (*hdr).defsize } as i32;
        let stub = self.stub_at(table, defsize, index as usize);
        unsafe { Some(CStr::from_ptr((*self.amx).base.add(stub.nameofs as usize) as *const _)) }
    }

    /// Address of a registered native function, `0` when unregistered
    /// or out of range.
    pub fn native_address(&self, index: Cell) -> Ucell {
        let hdr = self.header();
        let (count, table) = unsafe { self.table((*hdr).natives, (*hdr).libraries) };
        if index < 0 || index as usize >= count {
            return 0;
        }
        let defsize = unsafe { (*hdr).defsize } as i32;
        self.stub_at(table, defsize, index as usize).address
    }

    pub fn native_name(&self, index: Cell) -> Option<&CStr> {
        let hdr = self.header();
        let (count, table) = unsafe { self.table((*hdr).natives, (*hdr).libraries) };
        if index < 0 || index as usize >= count {
            return None;
        }
        let defsize = unsafe { (*hdr).defsize } as i32;
        let stub = self.stub_at(table, defsize, index as usize);
        unsafe { Some(CStr::from_ptr((*self.amx).base.add(stub.nameofs as usize) as *const _)) }
    }

    // Absolute field addresses folded into emitted code. All truncate to
    // 32 bits, which is exact on the only architecture the code runs on.

    pub fn error_disp(&self) -> i32 {
        unsafe { &raw mut (*self.amx).error as usize as i32 }
    }

    pub fn hea_disp(&self) -> i32 {
        unsafe { &raw mut (*self.amx).hea as usize as i32 }
    }

    pub fn stk_disp(&self) -> i32 {
        unsafe { &raw mut (*self.amx).stk as usize as i32 }
    }

    pub fn frm_disp(&self) -> i32 {
        unsafe { &raw mut (*self.amx).frm as usize as i32 }
    }

    pub fn stp_disp(&self) -> i32 {
        unsafe { &raw mut (*self.amx).stp as usize as i32 }
    }

    pub fn hdr_cod_disp(&self) -> i32 {
        unsafe { &raw const (*self.header()).cod as usize as i32 }
    }

    pub fn hdr_dat_disp(&self) -> i32 {
        unsafe { &raw const (*self.header()).dat as usize as i32 }
    }

    pub fn hdr_hea_disp(&self) -> i32 {
        unsafe { &raw const (*self.header()).hea as usize as i32 }
    }

    pub fn hdr_cip_disp(&self) -> i32 {
        unsafe { &raw const (*self.header()).cip as usize as i32 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::mem::offset_of;

    #[test]
    fn header_layout_matches_the_file_format() {
        assert_eq!(std::mem::size_of::<AmxHeader>(), 56);
        assert_eq!(offset_of!(AmxHeader, magic), 4);
        assert_eq!(offset_of!(AmxHeader, defsize), 10);
        assert_eq!(offset_of!(AmxHeader, cod), 12);
        assert_eq!(offset_of!(AmxHeader, dat), 16);
        assert_eq!(offset_of!(AmxHeader, cip), 28);
        assert_eq!(offset_of!(AmxHeader, publics), 32);
        assert_eq!(offset_of!(AmxHeader, natives), 36);
        assert_eq!(offset_of!(AmxHeader, libraries), 40);
    }

    #[test]
    fn stub_record_is_eight_bytes() {
        assert_eq!(std::mem::size_of::<FuncStub>(), 8);
    }

    #[test]
    fn public_lookup() {
        // Header + two publics + names + one code cell + data.
        let mut buf = vec![0u8; 256];
        let hdr = AmxHeader {
            magic: AMX_MAGIC,
            defsize: 8,
            cod: 128,
            dat: 132,
            cip: 96,
            publics: 56,
            natives: 72,
            libraries: 72,
            ..Default::default()
        };
        unsafe {
            (buf.as_mut_ptr() as *mut AmxHeader).write_unaligned(hdr);
            let publics = buf.as_mut_ptr().add(56) as *mut FuncStub;
            publics.write_unaligned(FuncStub { address: 0, nameofs: 80 });
            publics.add(1).write_unaligned(FuncStub { address: 32, nameofs: 84 });
        }
        buf[80..84].copy_from_slice(b"f0\0\0");
        buf[84..88].copy_from_slice(b"f1\0\0");

        let mut amx = Amx {
            base: buf.as_mut_ptr(),
            ..Default::default()
        };
        let image = unsafe { AmxImage::new(&mut amx) };

        assert_eq!(image.num_publics(), 2);
        assert_eq!(image.public_address(0), 0);
        assert_eq!(image.public_address(1), 32);
        assert_eq!(image.public_address(-1), 96);
        assert_eq!(image.public_address(2), 0);
        assert_eq!(image.public_name(1).unwrap().to_str().unwrap(), "f1");
        assert_eq!(image.public_name(-1).unwrap().to_str().unwrap(), "main");
        assert_eq!(image.code_size(), 4);
    }

    #[test]
    fn resolve_rebases_absolute_references() {
        let mut buf = vec![0u8; 64];
        let hdr = AmxHeader {
            cod: 56,
            dat: 60,
            ..Default::default()
        };
        unsafe { (buf.as_mut_ptr() as *mut AmxHeader).write_unaligned(hdr) };
        let mut amx = Amx {
            base: buf.as_mut_ptr(),
            ..Default::default()
        };
        let image = unsafe { AmxImage::new(&mut amx) };

        let absolute = (image.code_base() as usize as u32).wrapping_add(12);
        assert_eq!(image.resolve(absolute as Cell), 12);
    }
}
