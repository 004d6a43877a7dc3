//! Walks a code section and yields one instruction record per opcode.
//!
//! The decoder is a lazy, non-restartable iterator. It knows nothing about
//! function boundaries; the translator stops it at the second `PROC` or at
//! the end of the section.

use super::opcode::{Opcode, Operands};
use super::{CELL_SIZE, Cell, Ucell};
use thiserror::Error;

/// A malformed or unknown cell in the code stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("invalid instruction at address {address:#010x}")]
pub struct DecodeError {
    pub address: Ucell,
}

/// One decoded instruction: the opcode, its first operand (zero when the
/// opcode takes none) and the code offset of the opcode cell itself.
#[derive(Debug, Clone, Copy)]
pub struct Instr {
    pub address: Ucell,
    pub opcode: Opcode,
    pub operand: Cell,
}

pub struct Decoder<'a> {
    code: &'a [Cell],
    pos: usize,
}

impl<'a> Decoder<'a> {
    /// Start decoding at a byte offset into the code section.
    pub fn new(code: &'a [Cell], start: Ucell) -> Self {
        Decoder {
            code,
            pos: start as usize / CELL_SIZE,
        }
    }

    fn fail(&mut self, address: Ucell) -> Option<Result<Instr, DecodeError>> {
        self.pos = self.code.len();
        Some(Err(DecodeError { address }))
    }
}

impl Iterator for Decoder<'_> {
    type Item = Result<Instr, DecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.pos >= self.code.len() {
            return None;
        }
        let address = (self.pos * CELL_SIZE) as Ucell;
        let Some(opcode) = Opcode::from_cell(self.code[self.pos]) else {
            return self.fail(address);
        };
        let operand = self.code.get(self.pos + 1).copied().unwrap_or(0);

        self.pos += match opcode.operands() {
            Operands::None => 1,
            Operands::One => {
                if self.pos + 1 >= self.code.len() {
                    return self.fail(address);
                }
                2
            }
            Operands::CaseTable => {
                // Opcode, count, default address, then `count` value/target
                // pairs.
                let Ok(count) = usize::try_from(operand) else {
                    return self.fail(address);
                };
                let tail = 3 + 2 * count;
                if self.pos + tail > self.code.len() {
                    return self.fail(address);
                }
                tail
            }
        };

        Some(Ok(Instr {
            address,
            opcode,
            operand,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ops(code: &[Cell]) -> Vec<(Ucell, Opcode)> {
        Decoder::new(code, 0)
            .map(|r| r.map(|i| (i.address, i.opcode)))
            .collect::<Result<_, _>>()
            .unwrap()
    }

    #[test]
    fn advances_one_cell_per_plain_opcode() {
        let code = [
            Opcode::Proc as Cell,
            Opcode::Add as Cell,
            Opcode::Retn as Cell,
        ];
        assert_eq!(
            ops(&code),
            vec![(0, Opcode::Proc), (4, Opcode::Add), (8, Opcode::Retn)]
        );
    }

    #[test]
    fn consumes_operand_cells() {
        let code = [
            Opcode::Proc as Cell,
            Opcode::ConstPri as Cell,
            42,
            Opcode::Retn as Cell,
        ];
        let decoded: Vec<_> = Decoder::new(&code, 0).collect::<Result<_, _>>().unwrap();
        assert_eq!(decoded.len(), 3);
        assert_eq!(decoded[1].opcode, Opcode::ConstPri);
        assert_eq!(decoded[1].operand, 42);
        assert_eq!(decoded[2].address, 12);
    }

    #[test]
    fn skips_case_table_tail() {
        let code = [
            Opcode::Casetbl as Cell,
            2,  // two cases
            0,  // default
            10, 0, 20, 0,
            Opcode::Nop as Cell,
        ];
        assert_eq!(ops(&code), vec![(0, Opcode::Casetbl), (28, Opcode::Nop)]);
    }

    #[test]
    fn starts_at_the_given_offset() {
        let code = [
            Opcode::Nop as Cell,
            Opcode::Proc as Cell,
            Opcode::Retn as Cell,
        ];
        assert_eq!(ops(&code[..]), vec![
            (0, Opcode::Nop),
            (4, Opcode::Proc),
            (8, Opcode::Retn)
        ]);
        let from4: Vec<_> = Decoder::new(&code, 4).collect::<Result<_, _>>().unwrap();
        assert_eq!(from4[0].address, 4);
        assert_eq!(from4[0].opcode, Opcode::Proc);
    }

    #[test]
    fn unknown_cell_is_an_error() {
        let code = [Opcode::Proc as Cell, 9999];
        let mut d = Decoder::new(&code, 0);
        assert!(d.next().unwrap().is_ok());
        let err = d.next().unwrap().unwrap_err();
        assert_eq!(err.address, 4);
        assert!(d.next().is_none());
    }

    #[test]
    fn truncated_operand_is_an_error() {
        let code = [Opcode::ConstPri as Cell];
        let mut d = Decoder::new(&code, 0);
        assert!(d.next().unwrap().is_err());
    }
}
