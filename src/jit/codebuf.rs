//! Code buffer with tagged labels.
//!
//! Machine code is built incrementally in a byte vector. Jump targets are
//! named by [`Label`]: an AMX code offset plus a tag. The empty tag names
//! the instruction at that offset; non-empty tags name auxiliary points the
//! translator invents (error stubs, the per-function epilogue, loop heads
//! inside a single emitted sequence). Labels may be referenced before they
//! are bound; every rel32 reference is recorded and patched in one pass
//! once the function is fully emitted.

use crate::amx::Ucell;
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// An assembler-local symbol: `(amx code offset, tag)`, ordered
/// lexicographically so auxiliary labels at one address stay distinct.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Label {
    pub address: Ucell,
    pub tag: &'static str,
}

impl Label {
    /// The ordinary label for the instruction at `address`.
    pub fn at(address: Ucell) -> Self {
        Label { address, tag: "" }
    }

    pub fn tagged(address: Ucell, tag: &'static str) -> Self {
        Label { address, tag }
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}{}", self.address, self.tag)
    }
}

/// A rel32 reference to a label that was never bound.
#[derive(Debug, Clone, Copy, Error)]
#[error("jump to unbound label {0}")]
pub struct UnboundLabel(pub Label);

pub struct CodeBuffer {
    code: Vec<u8>,
    labels: BTreeMap<Label, usize>,
    /// Offsets of rel32 placeholders still waiting for their label.
    refs: Vec<(usize, Label)>,
}

impl CodeBuffer {
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        CodeBuffer {
            code: Vec::with_capacity(capacity),
            labels: BTreeMap::new(),
            refs: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.code.len()
    }

    pub fn is_empty(&self) -> bool {
        self.code.is_empty()
    }

    /// Current offset, i.e. where the next byte lands.
    pub fn offset(&self) -> usize {
        self.code.len()
    }

    pub fn emit_u8(&mut self, byte: u8) {
        self.code.push(byte);
    }

    pub fn emit_u16(&mut self, value: u16) {
        self.code.extend_from_slice(&value.to_le_bytes());
    }

    pub fn emit_u32(&mut self, value: u32) {
        self.code.extend_from_slice(&value.to_le_bytes());
    }

    /// Bind a label to the current offset.
    pub fn bind(&mut self, label: Label) {
        self.labels.insert(label, self.code.len());
    }

    pub fn label_offset(&self, label: Label) -> Option<usize> {
        self.labels.get(&label).copied()
    }

    /// Emit a rel32 placeholder referring to `label`; the displacement is
    /// filled in by [`patch_refs`](Self::patch_refs). The caller has already
    /// emitted the jump or call opcode bytes.
    pub fn emit_rel32_ref(&mut self, label: Label) {
        self.refs.push((self.code.len(), label));
        self.emit_u32(0);
    }

    /// Resolve every recorded rel32 reference.
    pub fn patch_refs(&mut self) -> Result<(), UnboundLabel> {
        for (offset, label) in self.refs.drain(..) {
            let target = *self.labels.get(&label).ok_or(UnboundLabel(label))?;
            // rel32 displacements count from the end of the placeholder.
            let rel = (target as i64 - (offset as i64 + 4)) as i32;
            self.code[offset..offset + 4].copy_from_slice(&rel.to_le_bytes());
        }
        Ok(())
    }

    pub fn code(&self) -> &[u8] {
        &self.code
    }

    /// Consume the buffer. All references must have been patched.
    pub fn into_code(self) -> Vec<u8> {
        debug_assert!(self.refs.is_empty(), "unpatched label references");
        self.code
    }
}

impl Default for CodeBuffer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emits_little_endian() {
        let mut buf = CodeBuffer::new();
        buf.emit_u8(0x90);
        buf.emit_u16(0x1234);
        buf.emit_u32(0xDEADBEEF);
        assert_eq!(buf.code(), &[0x90, 0x34, 0x12, 0xEF, 0xBE, 0xAD, 0xDE]);
    }

    #[test]
    fn patches_a_backward_reference() {
        let mut buf = CodeBuffer::new();
        buf.bind(Label::at(0));
        buf.emit_u8(0x90);
        buf.emit_u8(0xE9);
        buf.emit_rel32_ref(Label::at(0));
        buf.patch_refs().unwrap();
        // jmp back over the nop and the jmp itself: -7.
        assert_eq!(buf.code(), &[0x90, 0xE9, 0xF9, 0xFF, 0xFF, 0xFF]);
    }

    #[test]
    fn patches_a_forward_reference() {
        let mut buf = CodeBuffer::new();
        buf.emit_u8(0xE9);
        buf.emit_rel32_ref(Label::at(8));
        buf.emit_u8(0x90);
        buf.bind(Label::at(8));
        buf.patch_refs().unwrap();
        assert_eq!(buf.code(), &[0xE9, 0x01, 0x00, 0x00, 0x00, 0x90]);
    }

    #[test]
    fn tagged_labels_at_one_address_stay_distinct() {
        let mut buf = CodeBuffer::new();
        buf.bind(Label::at(4));
        buf.emit_u8(0x90);
        buf.bind(Label::tagged(4, "aux"));
        assert_eq!(buf.label_offset(Label::at(4)), Some(0));
        assert_eq!(buf.label_offset(Label::tagged(4, "aux")), Some(1));
        assert!(Label::at(4) < Label::tagged(4, "aux"));
        assert!(Label::tagged(4, "aux") < Label::at(5));
    }

    #[test]
    fn unbound_label_is_reported() {
        let mut buf = CodeBuffer::new();
        buf.emit_u8(0xE9);
        buf.emit_rel32_ref(Label::at(100));
        let err = buf.patch_refs().unwrap_err();
        assert_eq!(err.0, Label::at(100));
    }
}
