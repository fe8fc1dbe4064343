use crate::classfile::ConstantPool;
use crate::error::{Error, Result};
use crate::ir::{CallKind, CallSite, FieldRead, Instruction, InstructionKind};
use crate::opcodes;

/// Decode the instructions of a method body, resolving the operands the
/// policy engine cares about against `pool`.
pub fn decode(code: &[u8], pool: &ConstantPool) -> Result<Vec<Instruction>> {
    let mut instructions = Vec::new();
    let mut offset = 0usize;
    while offset < code.len() {
        let opcode = code[offset];
        let length = opcode_length(code, offset)?;
        if offset + length > code.len() {
            return Err(Error::malformed(format!(
                "instruction 0x{opcode:02x} at offset {offset} overruns code"
            )));
        }
        let kind = match opcode {
            opcodes::INVOKEVIRTUAL
            | opcodes::INVOKESPECIAL
            | opcodes::INVOKESTATIC
            | opcodes::INVOKEINTERFACE => {
                let pool_index = read_u16(code, offset + 1)?;
                let member = pool.member_ref(pool_index)?;
                InstructionKind::Invoke(CallSite {
                    owner: member.owner,
                    name: member.name,
                    descriptor: member.descriptor,
                    kind: call_kind(opcode),
                    pool_index,
                })
            }
            opcodes::GETSTATIC => {
                let member = pool.member_ref(read_u16(code, offset + 1)?)?;
                InstructionKind::GetStatic(FieldRead {
                    owner: member.owner,
                    name: member.name,
                    descriptor: member.descriptor,
                })
            }
            opcodes::LDC => string_or_other(pool, code[offset + 1] as u16)?,
            opcodes::LDC_W => string_or_other(pool, read_u16(code, offset + 1)?)?,
            _ => InstructionKind::Other,
        };
        instructions.push(Instruction {
            offset: offset as u32,
            opcode,
            kind,
        });
        offset += length;
    }
    Ok(instructions)
}

fn string_or_other(pool: &ConstantPool, index: u16) -> Result<InstructionKind> {
    Ok(match pool.string_value(index)? {
        Some(value) => InstructionKind::ConstString(value),
        None => InstructionKind::Other,
    })
}

fn call_kind(opcode: u8) -> CallKind {
    match opcode {
        opcodes::INVOKEINTERFACE => CallKind::Interface,
        opcodes::INVOKESPECIAL => CallKind::Special,
        opcodes::INVOKESTATIC => CallKind::Static,
        _ => CallKind::Virtual,
    }
}

pub(crate) fn opcode_length(code: &[u8], offset: usize) -> Result<usize> {
    let opcode = code[offset];
    let length = match opcode {
        0x00..=0x0f => 1,
        0x10 => 2,
        0x11 => 3,
        opcodes::LDC => 2,
        opcodes::LDC_W | 0x14 => 3,
        0x15..=0x19 => 2,
        0x1a..=0x35 => 1,
        0x36..=0x3a => 2,
        0x3b..=0x83 => 1,
        opcodes::IINC => 3,
        0x85..=0x98 => 1,
        0x99..=0xa8 => 3,
        0xa9 => 2,
        opcodes::TABLESWITCH => {
            let base = offset + 1 + padding(offset);
            let low = read_u32(code, base + 4)? as i32;
            let high = read_u32(code, base + 8)? as i32;
            let count = (high as i64 - low as i64 + 1).max(0) as usize;
            1 + padding(offset) + 12 + count * 4
        }
        opcodes::LOOKUPSWITCH => {
            let base = offset + 1 + padding(offset);
            let npairs = (read_u32(code, base + 4)? as i32).max(0) as usize;
            1 + padding(offset) + 8 + npairs * 8
        }
        0xac..=0xb1 => 1,
        0xb2..=0xb8 => 3,
        opcodes::INVOKEINTERFACE | 0xba => 5,
        0xbb => 3,
        0xbc => 2,
        0xbd => 3,
        0xbe | 0xbf => 1,
        0xc0 | 0xc1 => 3,
        0xc2 | 0xc3 => 1,
        opcodes::WIDE => {
            let modified = *code
                .get(offset + 1)
                .ok_or_else(|| Error::malformed("truncated wide instruction"))?;
            if modified == opcodes::IINC { 6 } else { 4 }
        }
        0xc5 => 4,
        0xc6 | 0xc7 => 3,
        0xc8 | 0xc9 => 5,
        other => {
            return Err(Error::malformed(format!(
                "unknown opcode 0x{other:02x} at offset {offset}"
            )));
        }
    };
    Ok(length)
}

/// Alignment padding after a switch opcode at `offset`.
pub(crate) fn padding(offset: usize) -> usize {
    (4 - ((offset + 1) % 4)) % 4
}

pub(crate) fn read_u16(code: &[u8], offset: usize) -> Result<u16> {
    match code.get(offset..offset + 2) {
        Some(raw) => Ok(u16::from_be_bytes([raw[0], raw[1]])),
        None => Err(Error::malformed(format!("truncated operand at {offset}"))),
    }
}

pub(crate) fn read_u32(code: &[u8], offset: usize) -> Result<u32> {
    match code.get(offset..offset + 4) {
        Some(raw) => Ok(u32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]])),
        None => Err(Error::malformed(format!("truncated operand at {offset}"))),
    }
}
