//! The AMX opcode catalog.
//!
//! Opcodes appear in the canonical order of the reference interpreter's
//! dispatch list; the numeric value of each variant is the value stored in
//! the code stream. Besides the name, the catalog records how many operand
//! cells each opcode carries and whether it is still live, long obsolete,
//! or refused by the translator.

use super::Cell;

/// How many cells follow an opcode in the code stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operands {
    None,
    One,
    /// A `(count, default)` header followed by `count` two-cell records.
    CaseTable,
}

/// Catalog status of an opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Active,
    /// Decoded for compatibility, emits nothing.
    Obsolete,
    /// The translator refuses functions containing it.
    Unsupported,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum Opcode {
    None,
    LoadPri,
    LoadAlt,
    LoadSPri,
    LoadSAlt,
    LrefPri,
    LrefAlt,
    LrefSPri,
    LrefSAlt,
    LoadI,
    LodbI,
    ConstPri,
    ConstAlt,
    AddrPri,
    AddrAlt,
    StorPri,
    StorAlt,
    StorSPri,
    StorSAlt,
    SrefPri,
    SrefAlt,
    SrefSPri,
    SrefSAlt,
    StorI,
    StrbI,
    Lidx,
    LidxB,
    Idxaddr,
    IdxaddrB,
    AlignPri,
    AlignAlt,
    Lctrl,
    Sctrl,
    MovePri,
    MoveAlt,
    Xchg,
    PushPri,
    PushAlt,
    PushR,
    PushC,
    Push,
    PushS,
    PopPri,
    PopAlt,
    Stack,
    Heap,
    Proc,
    Ret,
    Retn,
    Call,
    CallPri,
    Jump,
    Jrel,
    Jzer,
    Jnz,
    Jeq,
    Jneq,
    Jless,
    Jleq,
    Jgrtr,
    Jgeq,
    Jsless,
    Jsleq,
    Jsgrtr,
    Jsgeq,
    Shl,
    Shr,
    Sshr,
    ShlCPri,
    ShlCAlt,
    ShrCPri,
    ShrCAlt,
    Smul,
    Sdiv,
    SdivAlt,
    Umul,
    Udiv,
    UdivAlt,
    Add,
    Sub,
    SubAlt,
    And,
    Or,
    Xor,
    Not,
    Neg,
    Invert,
    AddC,
    SmulC,
    ZeroPri,
    ZeroAlt,
    Zero,
    ZeroS,
    SignPri,
    SignAlt,
    Eq,
    Neq,
    Less,
    Leq,
    Grtr,
    Geq,
    Sless,
    Sleq,
    Sgrtr,
    Sgeq,
    EqCPri,
    EqCAlt,
    IncPri,
    IncAlt,
    Inc,
    IncS,
    IncI,
    DecPri,
    DecAlt,
    Dec,
    DecS,
    DecI,
    Movs,
    Cmps,
    Fill,
    Halt,
    Bounds,
    SysreqPri,
    SysreqC,
    File,
    Line,
    Symbol,
    Srange,
    JumpPri,
    Switch,
    Casetbl,
    SwapPri,
    SwapAlt,
    PushAdr,
    Nop,
    SysreqD,
    Symtag,
    Break,
}

/// Number of opcodes in the catalog.
pub const OPCODE_COUNT: usize = Opcode::Break as usize + 1;

// Kept in catalog order so `from_cell` is a plain table lookup.
static OPCODES: [Opcode; OPCODE_COUNT] = {
    use Opcode::*;
    [
        None, LoadPri, LoadAlt, LoadSPri, LoadSAlt, LrefPri, LrefAlt, LrefSPri,
        LrefSAlt, LoadI, LodbI, ConstPri, ConstAlt, AddrPri, AddrAlt, StorPri,
        StorAlt, StorSPri, StorSAlt, SrefPri, SrefAlt, SrefSPri, SrefSAlt, StorI,
        StrbI, Lidx, LidxB, Idxaddr, IdxaddrB, AlignPri, AlignAlt, Lctrl,
        Sctrl, MovePri, MoveAlt, Xchg, PushPri, PushAlt, PushR, PushC,
        Push, PushS, PopPri, PopAlt, Stack, Heap, Proc, Ret,
        Retn, Call, CallPri, Jump, Jrel, Jzer, Jnz, Jeq,
        Jneq, Jless, Jleq, Jgrtr, Jgeq, Jsless, Jsleq, Jsgrtr,
        Jsgeq, Shl, Shr, Sshr, ShlCPri, ShlCAlt, ShrCPri, ShrCAlt,
        Smul, Sdiv, SdivAlt, Umul, Udiv, UdivAlt, Add, Sub,
        SubAlt, And, Or, Xor, Not, Neg, Invert, AddC,
        SmulC, ZeroPri, ZeroAlt, Zero, ZeroS, SignPri, SignAlt, Eq,
        Neq, Less, Leq, Grtr, Geq, Sless, Sleq, Sgrtr,
        Sgeq, EqCPri, EqCAlt, IncPri, IncAlt, Inc, IncS, IncI,
        DecPri, DecAlt, Dec, DecS, DecI, Movs, Cmps, Fill,
        Halt, Bounds, SysreqPri, SysreqC, File, Line, Symbol, Srange,
        JumpPri, Switch, Casetbl, SwapPri, SwapAlt, PushAdr, Nop, SysreqD,
        Symtag, Break,
    ]
};

impl Opcode {
    /// Look up the opcode for a raw code cell.
    pub fn from_cell(cell: Cell) -> Option<Opcode> {
        usize::try_from(cell).ok().and_then(|i| OPCODES.get(i)).copied()
    }

    pub fn operands(self) -> Operands {
        use Opcode::*;
        match self {
            Casetbl => Operands::CaseTable,
            LoadPri | LoadAlt | LoadSPri | LoadSAlt | LrefPri | LrefAlt | LrefSPri
            | LrefSAlt | LodbI | ConstPri | ConstAlt | AddrPri | AddrAlt | StorPri
            | StorAlt | StorSPri | StorSAlt | SrefPri | SrefAlt | SrefSPri | SrefSAlt
            | StrbI | LidxB | IdxaddrB | AlignPri | AlignAlt | Lctrl | Sctrl | PushR
            | PushC | Push | PushS | Stack | Heap | Call | Jump | Jrel | Jzer | Jnz
            | Jeq | Jneq | Jless | Jleq | Jgrtr | Jgeq | Jsless | Jsleq | Jsgrtr
            | Jsgeq | ShlCPri | ShlCAlt | ShrCPri | ShrCAlt | AddC | SmulC | Zero
            | ZeroS | EqCPri | EqCAlt | Inc | IncS | Dec | DecS | Movs | Cmps | Fill
            | Halt | Bounds | SysreqC | Switch | PushAdr | SysreqD | Symtag => Operands::One,
            _ => Operands::None,
        }
    }

    pub fn status(self) -> Status {
        use Opcode::*;
        match self {
            File | Line | Symbol | Srange | JumpPri | CallPri | Jrel | PushR | Symtag => {
                Status::Obsolete
            }
            SysreqPri => Status::Unsupported,
            _ => Status::Active,
        }
    }
}
