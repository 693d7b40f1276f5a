//! Decoder for classic class-file bytecode.
//!
//! Source methods arrive as the raw big-endian `code[]` array produced by the
//! class-file parser. The decoder turns that array into a list of
//! `(offset, Instruction)` pairs; branch operands are converted from
//! pc-relative to absolute method offsets at decode time so the scanner and
//! translator never deal with relative addressing.

use crate::Error::{MalformedBytecode, UnsupportedInstruction};
use crate::Result;
use byteorder::{BigEndian, ReadBytesExt};
use indexmap::IndexMap;
use std::io::Cursor;

/// Separate structure for the `tableswitch` instruction to limit the size of
/// the `Instruction` enum. Offsets are absolute method offsets.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) struct TableSwitch {
    pub default: u16,
    pub low: i32,
    pub high: i32,
    pub offsets: Vec<u16>,
}

/// Separate structure for the `lookupswitch` instruction. Offsets are
/// absolute method offsets; pairs preserve their source order.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) struct LookupSwitch {
    pub default: u16,
    pub pairs: IndexMap<i32, u16>,
}

/// A decoded source instruction.
///
/// Indexed load/store forms absorb their `_<n>` shorthand variants and `ldc`
/// absorbs `ldc_w`; the distinction is an encoding detail with no semantic
/// content past decoding.
#[expect(non_camel_case_types)]
#[derive(Clone, Debug, PartialEq)]
pub(crate) enum Instruction {
    Nop,
    Aconst_null,
    Iconst(i32),
    Lconst(i64),
    Fconst(f32),
    Dconst(f64),
    Bipush(i8),
    Sipush(i16),
    Ldc(u16),
    Ldc2_w(u16),
    Iload(u16),
    Lload(u16),
    Fload(u16),
    Dload(u16),
    Aload(u16),
    Iaload,
    Laload,
    Faload,
    Daload,
    Aaload,
    Baload,
    Caload,
    Saload,
    Istore(u16),
    Lstore(u16),
    Fstore(u16),
    Dstore(u16),
    Astore(u16),
    Iastore,
    Lastore,
    Fastore,
    Dastore,
    Aastore,
    Bastore,
    Castore,
    Sastore,
    Pop,
    Pop2,
    Dup,
    Dup_x1,
    Dup_x2,
    Dup2,
    Dup2_x1,
    Dup2_x2,
    Swap,
    Iadd,
    Ladd,
    Fadd,
    Dadd,
    Isub,
    Lsub,
    Fsub,
    Dsub,
    Imul,
    Lmul,
    Fmul,
    Dmul,
    Idiv,
    Ldiv,
    Fdiv,
    Ddiv,
    Irem,
    Lrem,
    Frem,
    Drem,
    Ineg,
    Lneg,
    Fneg,
    Dneg,
    Ishl,
    Lshl,
    Ishr,
    Lshr,
    Iushr,
    Lushr,
    Iand,
    Land,
    Ior,
    Lor,
    Ixor,
    Lxor,
    Iinc(u16, i32),
    I2l,
    I2f,
    I2d,
    L2i,
    L2f,
    L2d,
    F2i,
    F2l,
    F2d,
    D2i,
    D2l,
    D2f,
    I2b,
    I2c,
    I2s,
    Lcmp,
    Fcmpl,
    Fcmpg,
    Dcmpl,
    Dcmpg,
    Ifeq(u16),
    Ifne(u16),
    Iflt(u16),
    Ifge(u16),
    Ifgt(u16),
    Ifle(u16),
    If_icmpeq(u16),
    If_icmpne(u16),
    If_icmplt(u16),
    If_icmpge(u16),
    If_icmpgt(u16),
    If_icmple(u16),
    If_acmpeq(u16),
    If_acmpne(u16),
    Goto(u16),
    Tableswitch(TableSwitch),
    Lookupswitch(LookupSwitch),
    Ireturn,
    Lreturn,
    Freturn,
    Dreturn,
    Areturn,
    Return,
    Getstatic(u16),
    Putstatic(u16),
    Getfield(u16),
    Putfield(u16),
    Invokevirtual(u16),
    Invokespecial(u16),
    Invokestatic(u16),
    Invokeinterface(u16),
    New(u16),
    Newarray(u8),
    Anewarray(u16),
    Arraylength,
    Athrow,
    Checkcast(u16),
    Instanceof(u16),
    Monitorenter,
    Monitorexit,
    Multianewarray(u16, u8),
    Ifnull(u16),
    Ifnonnull(u16),
}

/// Decode a method's raw bytecode into `(offset, instruction)` pairs.
///
/// # Errors
///
/// [`MalformedBytecode`] for unknown opcodes, truncated operands, or branch
/// targets outside the 16-bit method offset space;
/// [`UnsupportedInstruction`] for known opcodes that are out of scope
/// (`wide` variants, `jsr`/`ret` subroutines, `invokedynamic`).
pub(crate) fn decode(code: &[u8]) -> Result<Vec<(u16, Instruction)>> {
    if code.len() > usize::from(u16::MAX) {
        return Err(MalformedBytecode(format!(
            "method body of {} bytes exceeds the 16-bit offset space",
            code.len()
        )));
    }
    let mut bytes = Cursor::new(code);
    let mut instructions = Vec::new();
    while (bytes.position() as usize) < code.len() {
        let offset = bytes.position() as u16;
        let instruction = Instruction::from_bytes(&mut bytes, offset)?;
        instructions.push((offset, instruction));
    }
    Ok(instructions)
}

impl Instruction {
    /// Decode a single instruction starting at `offset`.
    pub(crate) fn from_bytes(bytes: &mut Cursor<&[u8]>, offset: u16) -> Result<Instruction> {
        let opcode = read_u8(bytes)?;
        let instruction = match opcode {
            0x00 => Instruction::Nop,
            0x01 => Instruction::Aconst_null,
            0x02 => Instruction::Iconst(-1),
            0x03..=0x08 => Instruction::Iconst(i32::from(opcode) - 0x03),
            0x09 => Instruction::Lconst(0),
            0x0a => Instruction::Lconst(1),
            0x0b => Instruction::Fconst(0.0),
            0x0c => Instruction::Fconst(1.0),
            0x0d => Instruction::Fconst(2.0),
            0x0e => Instruction::Dconst(0.0),
            0x0f => Instruction::Dconst(1.0),
            0x10 => Instruction::Bipush(read_i8(bytes)?),
            0x11 => Instruction::Sipush(read_i16(bytes)?),
            0x12 => Instruction::Ldc(u16::from(read_u8(bytes)?)),
            0x13 => Instruction::Ldc(read_u16(bytes)?),
            0x14 => Instruction::Ldc2_w(read_u16(bytes)?),
            0x15 => Instruction::Iload(u16::from(read_u8(bytes)?)),
            0x16 => Instruction::Lload(u16::from(read_u8(bytes)?)),
            0x17 => Instruction::Fload(u16::from(read_u8(bytes)?)),
            0x18 => Instruction::Dload(u16::from(read_u8(bytes)?)),
            0x19 => Instruction::Aload(u16::from(read_u8(bytes)?)),
            0x1a..=0x1d => Instruction::Iload(u16::from(opcode) - 0x1a),
            0x1e..=0x21 => Instruction::Lload(u16::from(opcode) - 0x1e),
            0x22..=0x25 => Instruction::Fload(u16::from(opcode) - 0x22),
            0x26..=0x29 => Instruction::Dload(u16::from(opcode) - 0x26),
            0x2a..=0x2d => Instruction::Aload(u16::from(opcode) - 0x2a),
            0x2e => Instruction::Iaload,
            0x2f => Instruction::Laload,
            0x30 => Instruction::Faload,
            0x31 => Instruction::Daload,
            0x32 => Instruction::Aaload,
            0x33 => Instruction::Baload,
            0x34 => Instruction::Caload,
            0x35 => Instruction::Saload,
            0x36 => Instruction::Istore(u16::from(read_u8(bytes)?)),
            0x37 => Instruction::Lstore(u16::from(read_u8(bytes)?)),
            0x38 => Instruction::Fstore(u16::from(read_u8(bytes)?)),
            0x39 => Instruction::Dstore(u16::from(read_u8(bytes)?)),
            0x3a => Instruction::Astore(u16::from(read_u8(bytes)?)),
            0x3b..=0x3e => Instruction::Istore(u16::from(opcode) - 0x3b),
            0x3f..=0x42 => Instruction::Lstore(u16::from(opcode) - 0x3f),
            0x43..=0x46 => Instruction::Fstore(u16::from(opcode) - 0x43),
            0x47..=0x4a => Instruction::Dstore(u16::from(opcode) - 0x47),
            0x4b..=0x4e => Instruction::Astore(u16::from(opcode) - 0x4b),
            0x4f => Instruction::Iastore,
            0x50 => Instruction::Lastore,
            0x51 => Instruction::Fastore,
            0x52 => Instruction::Dastore,
            0x53 => Instruction::Aastore,
            0x54 => Instruction::Bastore,
            0x55 => Instruction::Castore,
            0x56 => Instruction::Sastore,
            0x57 => Instruction::Pop,
            0x58 => Instruction::Pop2,
            0x59 => Instruction::Dup,
            0x5a => Instruction::Dup_x1,
            0x5b => Instruction::Dup_x2,
            0x5c => Instruction::Dup2,
            0x5d => Instruction::Dup2_x1,
            0x5e => Instruction::Dup2_x2,
            0x5f => Instruction::Swap,
            0x60 => Instruction::Iadd,
            0x61 => Instruction::Ladd,
            0x62 => Instruction::Fadd,
            0x63 => Instruction::Dadd,
            0x64 => Instruction::Isub,
            0x65 => Instruction::Lsub,
            0x66 => Instruction::Fsub,
            0x67 => Instruction::Dsub,
            0x68 => Instruction::Imul,
            0x69 => Instruction::Lmul,
            0x6a => Instruction::Fmul,
            0x6b => Instruction::Dmul,
            0x6c => Instruction::Idiv,
            0x6d => Instruction::Ldiv,
            0x6e => Instruction::Fdiv,
            0x6f => Instruction::Ddiv,
            0x70 => Instruction::Irem,
            0x71 => Instruction::Lrem,
            0x72 => Instruction::Frem,
            0x73 => Instruction::Drem,
            0x74 => Instruction::Ineg,
            0x75 => Instruction::Lneg,
            0x76 => Instruction::Fneg,
            0x77 => Instruction::Dneg,
            0x78 => Instruction::Ishl,
            0x79 => Instruction::Lshl,
            0x7a => Instruction::Ishr,
            0x7b => Instruction::Lshr,
            0x7c => Instruction::Iushr,
            0x7d => Instruction::Lushr,
            0x7e => Instruction::Iand,
            0x7f => Instruction::Land,
            0x80 => Instruction::Ior,
            0x81 => Instruction::Lor,
            0x82 => Instruction::Ixor,
            0x83 => Instruction::Lxor,
            0x84 => {
                let index = u16::from(read_u8(bytes)?);
                let constant = i32::from(read_i8(bytes)?);
                Instruction::Iinc(index, constant)
            }
            0x85 => Instruction::I2l,
            0x86 => Instruction::I2f,
            0x87 => Instruction::I2d,
            0x88 => Instruction::L2i,
            0x89 => Instruction::L2f,
            0x8a => Instruction::L2d,
            0x8b => Instruction::F2i,
            0x8c => Instruction::F2l,
            0x8d => Instruction::F2d,
            0x8e => Instruction::D2i,
            0x8f => Instruction::D2l,
            0x90 => Instruction::D2f,
            0x91 => Instruction::I2b,
            0x92 => Instruction::I2c,
            0x93 => Instruction::I2s,
            0x94 => Instruction::Lcmp,
            0x95 => Instruction::Fcmpl,
            0x96 => Instruction::Fcmpg,
            0x97 => Instruction::Dcmpl,
            0x98 => Instruction::Dcmpg,
            0x99 => Instruction::Ifeq(read_branch_offset(bytes, offset)?),
            0x9a => Instruction::Ifne(read_branch_offset(bytes, offset)?),
            0x9b => Instruction::Iflt(read_branch_offset(bytes, offset)?),
            0x9c => Instruction::Ifge(read_branch_offset(bytes, offset)?),
            0x9d => Instruction::Ifgt(read_branch_offset(bytes, offset)?),
            0x9e => Instruction::Ifle(read_branch_offset(bytes, offset)?),
            0x9f => Instruction::If_icmpeq(read_branch_offset(bytes, offset)?),
            0xa0 => Instruction::If_icmpne(read_branch_offset(bytes, offset)?),
            0xa1 => Instruction::If_icmplt(read_branch_offset(bytes, offset)?),
            0xa2 => Instruction::If_icmpge(read_branch_offset(bytes, offset)?),
            0xa3 => Instruction::If_icmpgt(read_branch_offset(bytes, offset)?),
            0xa4 => Instruction::If_icmple(read_branch_offset(bytes, offset)?),
            0xa5 => Instruction::If_acmpeq(read_branch_offset(bytes, offset)?),
            0xa6 => Instruction::If_acmpne(read_branch_offset(bytes, offset)?),
            0xa7 => Instruction::Goto(read_branch_offset(bytes, offset)?),
            0xa8 => return Err(UnsupportedInstruction("jsr".to_string())),
            0xa9 => return Err(UnsupportedInstruction("ret".to_string())),
            0xaa => Instruction::Tableswitch(read_table_switch(bytes, offset)?),
            0xab => Instruction::Lookupswitch(read_lookup_switch(bytes, offset)?),
            0xac => Instruction::Ireturn,
            0xad => Instruction::Lreturn,
            0xae => Instruction::Freturn,
            0xaf => Instruction::Dreturn,
            0xb0 => Instruction::Areturn,
            0xb1 => Instruction::Return,
            0xb2 => Instruction::Getstatic(read_u16(bytes)?),
            0xb3 => Instruction::Putstatic(read_u16(bytes)?),
            0xb4 => Instruction::Getfield(read_u16(bytes)?),
            0xb5 => Instruction::Putfield(read_u16(bytes)?),
            0xb6 => Instruction::Invokevirtual(read_u16(bytes)?),
            0xb7 => Instruction::Invokespecial(read_u16(bytes)?),
            0xb8 => Instruction::Invokestatic(read_u16(bytes)?),
            0xb9 => {
                let index = read_u16(bytes)?;
                // The historical count and zero operands carry no information.
                let _count = read_u8(bytes)?;
                let _zero = read_u8(bytes)?;
                Instruction::Invokeinterface(index)
            }
            0xba => return Err(UnsupportedInstruction("invokedynamic".to_string())),
            0xbb => Instruction::New(read_u16(bytes)?),
            0xbc => Instruction::Newarray(read_u8(bytes)?),
            0xbd => Instruction::Anewarray(read_u16(bytes)?),
            0xbe => Instruction::Arraylength,
            0xbf => Instruction::Athrow,
            0xc0 => Instruction::Checkcast(read_u16(bytes)?),
            0xc1 => Instruction::Instanceof(read_u16(bytes)?),
            0xc2 => Instruction::Monitorenter,
            0xc3 => Instruction::Monitorexit,
            0xc4 => return Err(UnsupportedInstruction("wide".to_string())),
            0xc5 => {
                let index = read_u16(bytes)?;
                let dimensions = read_u8(bytes)?;
                Instruction::Multianewarray(index, dimensions)
            }
            0xc6 => Instruction::Ifnull(read_branch_offset(bytes, offset)?),
            0xc7 => Instruction::Ifnonnull(read_branch_offset(bytes, offset)?),
            0xc8 => return Err(UnsupportedInstruction("goto_w".to_string())),
            0xc9 => return Err(UnsupportedInstruction("jsr_w".to_string())),
            _ => {
                return Err(MalformedBytecode(format!(
                    "unknown opcode {opcode:#04x} at offset {offset}"
                )));
            }
        };
        Ok(instruction)
    }
}

fn read_u8(bytes: &mut Cursor<&[u8]>) -> Result<u8> {
    bytes
        .read_u8()
        .map_err(|_| MalformedBytecode("truncated instruction".to_string()))
}

fn read_i8(bytes: &mut Cursor<&[u8]>) -> Result<i8> {
    bytes
        .read_i8()
        .map_err(|_| MalformedBytecode("truncated instruction".to_string()))
}

fn read_u16(bytes: &mut Cursor<&[u8]>) -> Result<u16> {
    bytes
        .read_u16::<BigEndian>()
        .map_err(|_| MalformedBytecode("truncated instruction".to_string()))
}

fn read_i16(bytes: &mut Cursor<&[u8]>) -> Result<i16> {
    bytes
        .read_i16::<BigEndian>()
        .map_err(|_| MalformedBytecode("truncated instruction".to_string()))
}

fn read_i32(bytes: &mut Cursor<&[u8]>) -> Result<i32> {
    bytes
        .read_i32::<BigEndian>()
        .map_err(|_| MalformedBytecode("truncated instruction".to_string()))
}

/// Convert a pc-relative branch operand to an absolute method offset.
fn absolute_offset(base: u16, relative: i32) -> Result<u16> {
    let target = i32::from(base) + relative;
    u16::try_from(target)
        .map_err(|_| MalformedBytecode(format!("branch target {target} out of range")))
}

fn read_branch_offset(bytes: &mut Cursor<&[u8]>, offset: u16) -> Result<u16> {
    let relative = i32::from(read_i16(bytes)?);
    absolute_offset(offset, relative)
}

fn skip_switch_padding(bytes: &mut Cursor<&[u8]>) -> Result<()> {
    while bytes.position() % 4 != 0 {
        read_u8(bytes)?;
    }
    Ok(())
}

fn read_table_switch(bytes: &mut Cursor<&[u8]>, offset: u16) -> Result<TableSwitch> {
    skip_switch_padding(bytes)?;
    let default = absolute_offset(offset, read_i32(bytes)?)?;
    let low = read_i32(bytes)?;
    let high = read_i32(bytes)?;
    if low > high {
        return Err(MalformedBytecode(format!(
            "tableswitch bounds are inverted: low {low} > high {high}"
        )));
    }
    let count = usize::try_from(i64::from(high) - i64::from(low) + 1)
        .map_err(|_| MalformedBytecode("tableswitch size overflow".to_string()))?;
    if count > usize::from(u16::MAX) {
        return Err(MalformedBytecode(format!(
            "tableswitch with {count} cases exceeds the method offset space"
        )));
    }
    let mut offsets = Vec::with_capacity(count);
    for _ in 0..count {
        offsets.push(absolute_offset(offset, read_i32(bytes)?)?);
    }
    Ok(TableSwitch {
        default,
        low,
        high,
        offsets,
    })
}

fn read_lookup_switch(bytes: &mut Cursor<&[u8]>, offset: u16) -> Result<LookupSwitch> {
    skip_switch_padding(bytes)?;
    let default = absolute_offset(offset, read_i32(bytes)?)?;
    let pairs_count = read_i32(bytes)?;
    if pairs_count < 0 {
        return Err(MalformedBytecode(format!(
            "lookupswitch with negative pair count {pairs_count}"
        )));
    }
    let mut pairs = IndexMap::new();
    for _ in 0..pairs_count {
        let match_value = read_i32(bytes)?;
        let target = absolute_offset(offset, read_i32(bytes)?)?;
        pairs.insert(match_value, target);
    }
    Ok(LookupSwitch { default, pairs })
}
