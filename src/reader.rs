//! Bytecode Reader: decodes an NCS byte stream into a flat, ordered
//! list of [Instruction]s.
//!
//! This stage never interprets *meaning* — it only turns bytes into typed
//! nodes. The NCS stream is a fixed-width big-endian binary format with no
//! need for backtracking or alternation, so a plain byte cursor is the
//! idiomatic tool here rather than a combinator parser.

use crate::consts::NCS_MAGIC;
use crate::error::ReaderError;
use crate::instruction::{Constant, Instruction, Offset, Opcode, Operand};

struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn offset(&self) -> Offset {
        self.pos as Offset
    }

    fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], ReaderError> {
        if self.remaining() < n {
            return Err(ReaderError::TruncatedBytecode(self.offset()));
        }
        let slice = &self.bytes[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8, ReaderError> {
        Ok(self.take(1)?[0])
    }

    fn i16(&mut self) -> Result<i16, ReaderError> {
        let b = self.take(2)?;
        Ok(i16::from_be_bytes([b[0], b[1]]))
    }

    fn u16(&mut self) -> Result<u16, ReaderError> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn i32(&mut self) -> Result<i32, ReaderError> {
        let b = self.take(4)?;
        Ok(i32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn f32(&mut self) -> Result<f32, ReaderError> {
        let b = self.take(4)?;
        Ok(f32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }
}

/// Decode a complete NCS byte stream. Validates the magic header, then reads
/// instructions until the stream is exhausted.
pub fn read(bytes: &[u8]) -> Result<Vec<Instruction>, ReaderError> {
    if bytes.len() < NCS_MAGIC.len() || &bytes[..NCS_MAGIC.len()] != NCS_MAGIC {
        return Err(ReaderError::BadMagic);
    }
    let mut cursor = Cursor::new(bytes);
    cursor.take(NCS_MAGIC.len())?;
    // Section length header: a 4-byte big-endian total-size field covering
    // the whole file (magic included). Recorded but not otherwise needed,
    // since we read until the stream is exhausted.
    let _section_length = cursor.i32()?;

    let mut instructions = Vec::new();
    while cursor.remaining() > 0 {
        instructions.push(read_instruction(&mut cursor)?);
    }
    Ok(instructions)
}

fn read_instruction(cursor: &mut Cursor<'_>) -> Result<Instruction, ReaderError> {
    let offset = cursor.offset();
    let opcode_byte = cursor.u8()?;
    let opcode = Opcode::from_byte(opcode_byte).ok_or(ReaderError::UnknownOpcode {
        opcode: opcode_byte,
        offset,
    })?;
    let type_byte = cursor.u8()?;
    let operand = read_operand(cursor, opcode, type_byte)?;
    Ok(Instruction {
        offset,
        opcode,
        type_byte,
        operand,
        next_offset: cursor.offset(),
    })
}

/// Type-byte tags for `CONST`, distinguishing which payload shape follows.
mod const_type {
    pub const INT: u8 = 0x03;
    pub const FLOAT: u8 = 0x04;
    pub const STRING: u8 = 0x05;
    pub const OBJECT: u8 = 0x06;
}

fn read_operand(
    cursor: &mut Cursor<'_>,
    opcode: Opcode,
    type_byte: u8,
) -> Result<Operand, ReaderError> {
    use Opcode::*;
    Ok(match opcode {
        Const => match type_byte {
            const_type::INT => Operand::Constant(Constant::Int(cursor.i32()?)),
            const_type::FLOAT => Operand::Constant(Constant::Float(cursor.f32()?)),
            const_type::STRING => {
                let len = cursor.u16()? as usize;
                let bytes = cursor.take(len)?;
                Operand::Constant(Constant::String(
                    String::from_utf8_lossy(bytes).into_owned(),
                ))
            }
            const_type::OBJECT => Operand::Constant(Constant::Object(cursor.i32()?)),
            _ => Operand::Constant(Constant::Int(cursor.i32()?)),
        },
        CpDownSp | CpTopSp | CpDownBp | CpTopBp => {
            let offset = cursor.i32()?;
            let size = cursor.u16()?;
            Operand::StackSlot { offset, size }
        }
        Action => {
            let index = cursor.u16()?;
            let arg_count = cursor.u8()?;
            Operand::Action { index, arg_count }
        }
        Movsp | Decisp | Incisp | Decibp | Incibp => Operand::Size(cursor.i32()?),
        Jmp | Jsr | Jz | Jnz => {
            let delta = cursor.i32()?;
            Operand::JumpOffset(delta)
        }
        Destruct => {
            let size = cursor.u16()?;
            let keep_offset = cursor.u16()?;
            let keep_size = cursor.u16()?;
            Operand::Destruct {
                size,
                keep_offset,
                keep_size,
            }
        }
        StoreState | StoreStateAll => {
            let bp_size = cursor.i32()?;
            let sp_size = cursor.i32()?;
            Operand::StoreState { bp_size, sp_size }
        }
        Rsadd | Retn | LogAnd | LogOr | IncOr | ExcOr | BoolAnd | Eq | Neq | Geq | Gt | Lt
        | Leq | Shleft | Shright | Ushright | Add | Sub | Mul | Div | Mod | Neg | Comp | Not
        | Savebp | Restorebp | Nop => Operand::None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ncs(body: &[u8]) -> Vec<u8> {
        let mut bytes = NCS_MAGIC.to_vec();
        let total = (bytes.len() + 4 + body.len()) as i32;
        bytes.extend_from_slice(&total.to_be_bytes());
        bytes.extend_from_slice(body);
        bytes
    }

    #[test]
    fn rejects_bad_magic() {
        let err = read(b"NOT NCS!").unwrap_err();
        assert_eq!(err, ReaderError::BadMagic);
    }

    #[test]
    fn rejects_truncated_stream() {
        let bytes = ncs(&[Opcode::Const as u8, const_type::INT, 0x00, 0x00]);
        let err = read(&bytes).unwrap_err();
        assert!(matches!(err, ReaderError::TruncatedBytecode(_)));
    }

    #[test]
    fn rejects_unknown_opcode() {
        let bytes = ncs(&[0xFF, 0x00]);
        let err = read(&bytes).unwrap_err();
        assert!(matches!(err, ReaderError::UnknownOpcode { opcode: 0xFF, .. }));
    }

    #[test]
    fn decodes_const_int_and_retn() {
        let mut body = vec![Opcode::Const as u8, const_type::INT];
        body.extend_from_slice(&7i32.to_be_bytes());
        body.push(Opcode::Retn as u8);
        body.push(0);
        let bytes = ncs(&body);

        let instructions = read(&bytes).unwrap();
        assert_eq!(instructions.len(), 2);
        assert_eq!(instructions[0].opcode, Opcode::Const);
        assert_eq!(
            instructions[0].operand,
            Operand::Constant(Constant::Int(7))
        );
        assert_eq!(instructions[1].opcode, Opcode::Retn);
        assert_eq!(instructions[1].operand, Operand::None);
    }

    #[test]
    fn decodes_relative_jump_target() {
        let mut body = vec![Opcode::Jmp as u8, 0x00];
        body.extend_from_slice(&(-5i32).to_be_bytes());
        let bytes = ncs(&body);
        let instructions = read(&bytes).unwrap();
        let jmp = &instructions[0];
        assert_eq!(jmp.relative_target(), Some(jmp.next_offset - 5));
    }
}
