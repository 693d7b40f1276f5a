//! The internal instruction stream and its emitter.
//!
//! A trampoline is the dense, lowered form of one method: a byte buffer of
//! one-byte opcode tags with fixed-width little-endian operands, plus side
//! tables holding the class / field / method handles the stream references by
//! `u32` index. Branch operands are 16-bit absolute offsets into the same
//! buffer, backpatched once every block's position is known.

use crate::Error::{InternalError, InvalidTrampoline, MalformedBytecode};
use crate::Result;
use crate::control_flow::BlockId;
use crate::translator::{BinaryOp, CompareOp, Emitter, UnaryOp};
use ahash::AHashMap;
use lungo_runtime::{Field, JvmType, Klass, Method, Value};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

macro_rules! opcodes {
    ($($name:ident),* $(,)?) => {
        /// Instruction opcodes of the interpreter.
        ///
        /// The dispatch table is indexed by the opcode tag, so the ordering is
        /// part of the trampoline format and must stay stable.
        #[derive(Clone, Copy, Debug, Eq, PartialEq)]
        #[repr(u8)]
        pub enum Opcode {
            $($name),*
        }

        impl Opcode {
            const ALL: &'static [Opcode] = &[$(Opcode::$name),*];

            /// Decode an opcode tag.
            #[must_use]
            pub fn from_u8(value: u8) -> Option<Opcode> {
                Opcode::ALL.get(usize::from(value)).copied()
            }

            /// The opcode mnemonic.
            #[must_use]
            pub fn name(self) -> &'static str {
                match self {
                    $(Opcode::$name => stringify!($name)),*
                }
            }
        }
    };
}

opcodes!(
    Iconst, Lconst, Fconst, Dconst, Aconst, Load, Store, Barrayload, Sarrayload, Iarrayload,
    Larrayload, Carrayload, Farrayload, Darrayload, Aarrayload, Barraystore, Sarraystore,
    Iarraystore, Larraystore, Carraystore, Farraystore, Darraystore, Aarraystore, Pop, Pop2, Dup,
    DupX1, DupX2, Dup2, Dup2X1, Dup2X2, Swap, Iadd, Isub, Imul, Idiv, Irem, Ineg, Ishl, Ishr,
    Iushr, Iand, Ior, Ixor, Ladd, Lsub, Lmul, Ldiv, Lrem, Lneg, Lshl, Lshr, Lushr, Land, Lor,
    Lxor, Fadd, Fsub, Fmul, Fdiv, Frem, Fneg, Dadd, Dsub, Dmul, Ddiv, Drem, Dneg, Iinc, I2l, I2f,
    I2d, L2i, L2f, L2d, F2i, F2l, F2d, D2i, D2l, D2f, I2b, I2c, I2s, Lcmp, Fcmpl, Fcmpg, Dcmpl,
    Dcmpg, Ifeq, Ifne, Iflt, Ifge, Ifgt, Ifle, IfIcmpeq, IfIcmpne, IfIcmplt, IfIcmpge, IfIcmpgt,
    IfIcmple, IfAcmpeq, IfAcmpne, Goto, Tableswitch, Ret, RetVoid, Getstatic, Putstatic, Getfield,
    Putfield, Invokevirtual, Invokespecial, Invokestatic, Invokeinterface, New, Newarray,
    Anewarray, Multianewarray, Arraylength, Athrow, Checkcast, Instanceof, Monitorenter,
    Monitorexit, Ifnull, Ifnonnull,
);

/// The lowered form of one method.
#[derive(Debug, Default)]
pub struct Trampoline {
    code: Vec<u8>,
    classes: Vec<Arc<Klass>>,
    fields: Vec<Arc<Field>>,
    methods: Vec<Arc<Method>>,
}

impl Trampoline {
    /// The instruction stream bytes.
    #[must_use]
    pub fn code(&self) -> &[u8] {
        &self.code
    }

    pub(crate) fn klass_at(&self, index: u32) -> Result<&Arc<Klass>> {
        self.classes
            .get(index as usize)
            .ok_or_else(|| InvalidTrampoline(format!("class table index {index} out of range")))
    }

    pub(crate) fn field_at(&self, index: u32) -> Result<&Arc<Field>> {
        self.fields
            .get(index as usize)
            .ok_or_else(|| InvalidTrampoline(format!("field table index {index} out of range")))
    }

    pub(crate) fn method_at(&self, index: u32) -> Result<&Arc<Method>> {
        self.methods
            .get(index as usize)
            .ok_or_else(|| InvalidTrampoline(format!("method table index {index} out of range")))
    }

    /// Render the instruction stream as `(offset, text)` lines.
    ///
    /// # Errors
    ///
    /// if the stream is truncated or contains an invalid opcode tag.
    pub fn disassemble(&self) -> Result<Vec<(u16, String)>> {
        let mut lines = Vec::new();
        let mut pc = 0;
        while pc < self.code.len() {
            let offset = u16::try_from(pc)
                .map_err(|_| InvalidTrampoline("instruction stream too large".to_string()))?;
            let opcode = next_opcode(&self.code, &mut pc)?;
            let operands = self.read_operands(opcode, &mut pc)?;
            let text = if operands.text.is_empty() {
                opcode.name().to_string()
            } else {
                format!("{} {}", opcode.name(), operands.text)
            };
            lines.push((offset, text));
        }
        Ok(lines)
    }

    /// The offsets of all instruction tags in the stream.
    ///
    /// # Errors
    ///
    /// if the stream is truncated or contains an invalid opcode tag.
    pub fn instruction_offsets(&self) -> Result<Vec<u16>> {
        let mut offsets = Vec::new();
        let mut pc = 0;
        while pc < self.code.len() {
            offsets.push(
                u16::try_from(pc)
                    .map_err(|_| InvalidTrampoline("instruction stream too large".to_string()))?,
            );
            let opcode = next_opcode(&self.code, &mut pc)?;
            self.read_operands(opcode, &mut pc)?;
        }
        Ok(offsets)
    }

    /// Every branch target embedded in the stream, after backpatching.
    ///
    /// # Errors
    ///
    /// if the stream is truncated or contains an invalid opcode tag.
    pub fn branch_targets(&self) -> Result<Vec<u16>> {
        let mut targets = Vec::new();
        let mut pc = 0;
        while pc < self.code.len() {
            let opcode = next_opcode(&self.code, &mut pc)?;
            let operands = self.read_operands(opcode, &mut pc)?;
            targets.extend(operands.targets);
        }
        Ok(targets)
    }

    fn read_operands(&self, opcode: Opcode, pc: &mut usize) -> Result<DecodedOperands> {
        let mut operands = DecodedOperands::default();
        match opcode {
            Opcode::Iconst => {
                operands.text = read_i32(&self.code, pc)?.to_string();
            }
            Opcode::Lconst => {
                operands.text = read_i64(&self.code, pc)?.to_string();
            }
            Opcode::Fconst => {
                let value = f32::from_bits(read_u32(&self.code, pc)?);
                operands.text = format!("{value:?}");
            }
            Opcode::Dconst => {
                let value = f64::from_bits(read_u64(&self.code, pc)?);
                operands.text = format!("{value:?}");
            }
            Opcode::Aconst => {
                let value = Value::from_bits(read_u64(&self.code, pc)?);
                operands.text = value.as_reference().to_string();
            }
            Opcode::Load | Opcode::Store => {
                operands.text = read_u16(&self.code, pc)?.to_string();
            }
            Opcode::Iinc => {
                let index = read_u8(&self.code, pc)?;
                let delta = read_i32(&self.code, pc)?;
                operands.text = format!("{index}, {delta}");
            }
            Opcode::Ifeq
            | Opcode::Ifne
            | Opcode::Iflt
            | Opcode::Ifge
            | Opcode::Ifgt
            | Opcode::Ifle
            | Opcode::IfIcmpeq
            | Opcode::IfIcmpne
            | Opcode::IfIcmplt
            | Opcode::IfIcmpge
            | Opcode::IfIcmpgt
            | Opcode::IfIcmple
            | Opcode::IfAcmpeq
            | Opcode::IfAcmpne
            | Opcode::Ifnull
            | Opcode::Ifnonnull
            | Opcode::Goto => {
                let target = read_u16(&self.code, pc)?;
                operands.targets.push(target);
                operands.text = format!("-> {target}");
            }
            Opcode::Tableswitch => {
                let high = read_i32(&self.code, pc)?;
                let low = read_i32(&self.code, pc)?;
                let default = read_u16(&self.code, pc)?;
                operands.targets.push(default);
                let size = read_u32(&self.code, pc)?;
                let mut cases = Vec::new();
                for _ in 0..size {
                    let target = read_u16(&self.code, pc)?;
                    operands.targets.push(target);
                    cases.push(format!("{target}"));
                }
                operands.text =
                    format!("{low}..={high} default -> {default} [{}]", cases.join(", "));
            }
            Opcode::Getstatic | Opcode::Putstatic | Opcode::Getfield | Opcode::Putfield => {
                let field = self.field_at(read_u32(&self.code, pc)?)?;
                operands.text = field.name().to_string();
            }
            Opcode::Invokevirtual
            | Opcode::Invokespecial
            | Opcode::Invokestatic
            | Opcode::Invokeinterface => {
                let method = self.method_at(read_u32(&self.code, pc)?)?;
                operands.text = method.to_string();
            }
            Opcode::New | Opcode::Anewarray | Opcode::Checkcast | Opcode::Instanceof => {
                let klass = self.klass_at(read_u32(&self.code, pc)?)?;
                operands.text = klass.name().to_string();
            }
            Opcode::Multianewarray => {
                let klass = self.klass_at(read_u32(&self.code, pc)?)?;
                let dimensions = read_u8(&self.code, pc)?;
                operands.text = format!("{} dimensions {dimensions}", klass.name());
            }
            Opcode::Newarray => {
                operands.text = read_u8(&self.code, pc)?.to_string();
            }
            _ => {}
        }
        Ok(operands)
    }
}

impl fmt::Display for Trampoline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.disassemble() {
            Ok(lines) => {
                for (offset, text) in lines {
                    writeln!(f, "{offset:5}: {text}")?;
                }
                Ok(())
            }
            Err(_) => write!(f, "<invalid trampoline>"),
        }
    }
}

#[derive(Debug, Default)]
struct DecodedOperands {
    text: String,
    targets: Vec<u16>,
}

fn truncated() -> crate::Error {
    InvalidTrampoline("truncated instruction stream".to_string())
}

pub(crate) fn next_opcode(code: &[u8], pc: &mut usize) -> Result<Opcode> {
    let tag = read_u8(code, pc)?;
    Opcode::from_u8(tag).ok_or_else(|| InvalidTrampoline(format!("invalid opcode tag {tag:#04x}")))
}

pub(crate) fn read_u8(code: &[u8], pc: &mut usize) -> Result<u8> {
    let value = *code.get(*pc).ok_or_else(truncated)?;
    *pc += 1;
    Ok(value)
}

pub(crate) fn read_u16(code: &[u8], pc: &mut usize) -> Result<u16> {
    let bytes = code.get(*pc..*pc + 2).ok_or_else(truncated)?;
    *pc += 2;
    let bytes = <[u8; 2]>::try_from(bytes).map_err(|_| truncated())?;
    Ok(u16::from_le_bytes(bytes))
}

pub(crate) fn read_u32(code: &[u8], pc: &mut usize) -> Result<u32> {
    let bytes = code.get(*pc..*pc + 4).ok_or_else(truncated)?;
    *pc += 4;
    let bytes = <[u8; 4]>::try_from(bytes).map_err(|_| truncated())?;
    Ok(u32::from_le_bytes(bytes))
}

pub(crate) fn read_i32(code: &[u8], pc: &mut usize) -> Result<i32> {
    Ok(read_u32(code, pc)? as i32)
}

pub(crate) fn read_u64(code: &[u8], pc: &mut usize) -> Result<u64> {
    let bytes = code.get(*pc..*pc + 8).ok_or_else(truncated)?;
    *pc += 8;
    let bytes = <[u8; 8]>::try_from(bytes).map_err(|_| truncated())?;
    Ok(u64::from_le_bytes(bytes))
}

pub(crate) fn read_i64(code: &[u8], pc: &mut usize) -> Result<i64> {
    Ok(read_u64(code, pc)? as i64)
}

/// A branch operand slot pending backpatch: the position of the 16-bit offset
/// in the emitted code, and the block it must point at.
#[derive(Debug)]
struct Label {
    pc: u16,
    target: BlockId,
}

/// The concrete emitter targeting the interpreter: writes the trampoline byte
/// stream, records the start offset of every block, and resolves branch
/// labels in the backpatch pass.
#[derive(Debug, Default)]
pub(crate) struct TrampolineEmitter {
    code: Vec<u8>,
    classes: Vec<Arc<Klass>>,
    fields: Vec<Arc<Field>>,
    methods: Vec<Arc<Method>>,
    block_offsets: AHashMap<BlockId, u16>,
    labels: Vec<Label>,
}

impl TrampolineEmitter {
    pub(crate) fn new() -> Self {
        TrampolineEmitter::default()
    }

    /// Consume the emitter, yielding the finished trampoline.
    pub(crate) fn into_trampoline(self) -> Trampoline {
        Trampoline {
            code: self.code,
            classes: self.classes,
            fields: self.fields,
            methods: self.methods,
        }
    }

    fn offset(&self) -> Result<u16> {
        u16::try_from(self.code.len()).map_err(|_| {
            MalformedBytecode(
                "translated method exceeds the 16-bit program counter space".to_string(),
            )
        })
    }

    fn put_opcode(&mut self, opcode: Opcode) -> Result<()> {
        self.offset()?;
        self.code.push(opcode as u8);
        Ok(())
    }

    fn put_u8(&mut self, value: u8) {
        self.code.push(value);
    }

    fn put_u16(&mut self, value: u16) {
        self.code.extend_from_slice(&value.to_le_bytes());
    }

    fn put_u32(&mut self, value: u32) {
        self.code.extend_from_slice(&value.to_le_bytes());
    }

    fn put_i32(&mut self, value: i32) {
        self.code.extend_from_slice(&value.to_le_bytes());
    }

    fn put_u64(&mut self, value: u64) {
        self.code.extend_from_slice(&value.to_le_bytes());
    }

    fn put_i64(&mut self, value: i64) {
        self.code.extend_from_slice(&value.to_le_bytes());
    }

    /// Write a zero offset and register the slot for backpatching.
    fn put_label(&mut self, target: BlockId) -> Result<()> {
        let pc = self.offset()?;
        self.labels.push(Label { pc, target });
        self.put_u16(0);
        Ok(())
    }

    fn put_klass(&mut self, klass: &Arc<Klass>) -> Result<()> {
        let index = u32::try_from(self.classes.len())
            .map_err(|_| InternalError("class table overflow".to_string()))?;
        self.classes.push(klass.clone());
        self.put_u32(index);
        Ok(())
    }

    fn put_field(&mut self, field: &Arc<Field>) -> Result<()> {
        let index = u32::try_from(self.fields.len())
            .map_err(|_| InternalError("field table overflow".to_string()))?;
        self.fields.push(field.clone());
        self.put_u32(index);
        Ok(())
    }

    fn put_method(&mut self, method: &Arc<Method>) -> Result<()> {
        let index = u32::try_from(self.methods.len())
            .map_err(|_| InternalError("method table overflow".to_string()))?;
        self.methods.push(method.clone());
        self.put_u32(index);
        Ok(())
    }

    fn backpatch(&mut self) -> Result<()> {
        for label in &self.labels {
            let offset = self
                .block_offsets
                .get(&label.target)
                .copied()
                .ok_or_else(|| {
                    InternalError(format!("label targets unemitted block {:?}", label.target))
                })?;
            let slot = usize::from(label.pc);
            self.code[slot..slot + 2].copy_from_slice(&offset.to_le_bytes());
        }
        Ok(())
    }
}

impl Emitter for TrampolineEmitter {
    fn prologue(&mut self, _method: &Method) -> Result<()> {
        Ok(())
    }

    fn begin(&mut self, block: BlockId) -> Result<()> {
        let offset = self.offset()?;
        self.block_offsets.insert(block, offset);
        Ok(())
    }

    fn op_const(&mut self, jvm_type: JvmType, value: Value) -> Result<()> {
        match jvm_type {
            JvmType::Int => {
                self.put_opcode(Opcode::Iconst)?;
                self.put_i32(value.as_int());
            }
            JvmType::Long => {
                self.put_opcode(Opcode::Lconst)?;
                self.put_i64(value.as_long());
            }
            JvmType::Float => {
                self.put_opcode(Opcode::Fconst)?;
                self.put_u32(value.as_float().to_bits());
            }
            JvmType::Double => {
                self.put_opcode(Opcode::Dconst)?;
                self.put_u64(value.as_double().to_bits());
            }
            JvmType::Reference => {
                self.put_opcode(Opcode::Aconst)?;
                self.put_u64(value.bits());
            }
            _ => return Err(InternalError(format!("constant of type {jvm_type}"))),
        }
        Ok(())
    }

    fn op_load(&mut self, _jvm_type: JvmType, index: u16) -> Result<()> {
        self.put_opcode(Opcode::Load)?;
        self.put_u16(index);
        Ok(())
    }

    fn op_store(&mut self, _jvm_type: JvmType, index: u16) -> Result<()> {
        self.put_opcode(Opcode::Store)?;
        self.put_u16(index);
        Ok(())
    }

    fn op_arrayload(&mut self, jvm_type: JvmType) -> Result<()> {
        let opcode = match jvm_type {
            JvmType::Boolean | JvmType::Byte => Opcode::Barrayload,
            JvmType::Short => Opcode::Sarrayload,
            JvmType::Int => Opcode::Iarrayload,
            JvmType::Long => Opcode::Larrayload,
            JvmType::Char => Opcode::Carrayload,
            JvmType::Float => Opcode::Farrayload,
            JvmType::Double => Opcode::Darrayload,
            JvmType::Reference => Opcode::Aarrayload,
        };
        self.put_opcode(opcode)
    }

    fn op_arraystore(&mut self, jvm_type: JvmType) -> Result<()> {
        let opcode = match jvm_type {
            JvmType::Boolean | JvmType::Byte => Opcode::Barraystore,
            JvmType::Short => Opcode::Sarraystore,
            JvmType::Int => Opcode::Iarraystore,
            JvmType::Long => Opcode::Larraystore,
            JvmType::Char => Opcode::Carraystore,
            JvmType::Float => Opcode::Farraystore,
            JvmType::Double => Opcode::Darraystore,
            JvmType::Reference => Opcode::Aarraystore,
        };
        self.put_opcode(opcode)
    }

    fn op_convert(&mut self, from: JvmType, to: JvmType) -> Result<()> {
        let opcode = match (from, to) {
            (JvmType::Int, JvmType::Long) => Opcode::I2l,
            (JvmType::Int, JvmType::Float) => Opcode::I2f,
            (JvmType::Int, JvmType::Double) => Opcode::I2d,
            (JvmType::Int, JvmType::Byte) => Opcode::I2b,
            (JvmType::Int, JvmType::Char) => Opcode::I2c,
            (JvmType::Int, JvmType::Short) => Opcode::I2s,
            (JvmType::Long, JvmType::Int) => Opcode::L2i,
            (JvmType::Long, JvmType::Float) => Opcode::L2f,
            (JvmType::Long, JvmType::Double) => Opcode::L2d,
            (JvmType::Float, JvmType::Int) => Opcode::F2i,
            (JvmType::Float, JvmType::Long) => Opcode::F2l,
            (JvmType::Float, JvmType::Double) => Opcode::F2d,
            (JvmType::Double, JvmType::Int) => Opcode::D2i,
            (JvmType::Double, JvmType::Long) => Opcode::D2l,
            (JvmType::Double, JvmType::Float) => Opcode::D2f,
            _ => return Err(InternalError(format!("conversion from {from} to {to}"))),
        };
        self.put_opcode(opcode)
    }

    fn op_pop(&mut self) -> Result<()> {
        self.put_opcode(Opcode::Pop)
    }

    fn op_pop2(&mut self) -> Result<()> {
        self.put_opcode(Opcode::Pop2)
    }

    fn op_dup(&mut self) -> Result<()> {
        self.put_opcode(Opcode::Dup)
    }

    fn op_dup_x1(&mut self) -> Result<()> {
        self.put_opcode(Opcode::DupX1)
    }

    fn op_dup_x2(&mut self) -> Result<()> {
        self.put_opcode(Opcode::DupX2)
    }

    fn op_dup2(&mut self) -> Result<()> {
        self.put_opcode(Opcode::Dup2)
    }

    fn op_dup2_x1(&mut self) -> Result<()> {
        self.put_opcode(Opcode::Dup2X1)
    }

    fn op_dup2_x2(&mut self) -> Result<()> {
        self.put_opcode(Opcode::Dup2X2)
    }

    fn op_swap(&mut self) -> Result<()> {
        self.put_opcode(Opcode::Swap)
    }

    fn op_unary(&mut self, jvm_type: JvmType, op: UnaryOp) -> Result<()> {
        let UnaryOp::Neg = op;
        let opcode = match jvm_type {
            JvmType::Int => Opcode::Ineg,
            JvmType::Long => Opcode::Lneg,
            JvmType::Float => Opcode::Fneg,
            JvmType::Double => Opcode::Dneg,
            _ => return Err(InternalError(format!("negation of type {jvm_type}"))),
        };
        self.put_opcode(opcode)
    }

    fn op_binary(&mut self, jvm_type: JvmType, op: BinaryOp) -> Result<()> {
        let opcode = match jvm_type {
            JvmType::Int => match op {
                BinaryOp::Add => Opcode::Iadd,
                BinaryOp::Sub => Opcode::Isub,
                BinaryOp::Mul => Opcode::Imul,
                BinaryOp::Div => Opcode::Idiv,
                BinaryOp::Rem => Opcode::Irem,
                BinaryOp::Shl => Opcode::Ishl,
                BinaryOp::Shr => Opcode::Ishr,
                BinaryOp::Ushr => Opcode::Iushr,
                BinaryOp::And => Opcode::Iand,
                BinaryOp::Or => Opcode::Ior,
                BinaryOp::Xor => Opcode::Ixor,
            },
            JvmType::Long => match op {
                BinaryOp::Add => Opcode::Ladd,
                BinaryOp::Sub => Opcode::Lsub,
                BinaryOp::Mul => Opcode::Lmul,
                BinaryOp::Div => Opcode::Ldiv,
                BinaryOp::Rem => Opcode::Lrem,
                BinaryOp::Shl => Opcode::Lshl,
                BinaryOp::Shr => Opcode::Lshr,
                BinaryOp::Ushr => Opcode::Lushr,
                BinaryOp::And => Opcode::Land,
                BinaryOp::Or => Opcode::Lor,
                BinaryOp::Xor => Opcode::Lxor,
            },
            JvmType::Float => match op {
                BinaryOp::Add => Opcode::Fadd,
                BinaryOp::Sub => Opcode::Fsub,
                BinaryOp::Mul => Opcode::Fmul,
                BinaryOp::Div => Opcode::Fdiv,
                BinaryOp::Rem => Opcode::Frem,
                _ => return Err(InternalError(format!("float operation {op:?}"))),
            },
            JvmType::Double => match op {
                BinaryOp::Add => Opcode::Dadd,
                BinaryOp::Sub => Opcode::Dsub,
                BinaryOp::Mul => Opcode::Dmul,
                BinaryOp::Div => Opcode::Ddiv,
                BinaryOp::Rem => Opcode::Drem,
                _ => return Err(InternalError(format!("double operation {op:?}"))),
            },
            _ => return Err(InternalError(format!("binary operation on {jvm_type}"))),
        };
        self.put_opcode(opcode)
    }

    fn op_iinc(&mut self, index: u16, delta: i32) -> Result<()> {
        let index = u8::try_from(index)
            .map_err(|_| MalformedBytecode(format!("iinc index {index} out of range")))?;
        self.put_opcode(Opcode::Iinc)?;
        self.put_u8(index);
        self.put_i32(delta);
        Ok(())
    }

    fn op_lcmp(&mut self) -> Result<()> {
        self.put_opcode(Opcode::Lcmp)
    }

    fn op_cmp(&mut self, jvm_type: JvmType, op: CompareOp) -> Result<()> {
        let opcode = match (jvm_type, op) {
            (JvmType::Float, CompareOp::Lt) => Opcode::Fcmpl,
            (JvmType::Float, CompareOp::Gt) => Opcode::Fcmpg,
            (JvmType::Double, CompareOp::Lt) => Opcode::Dcmpl,
            (JvmType::Double, CompareOp::Gt) => Opcode::Dcmpg,
            _ => return Err(InternalError(format!("comparison {op:?} on {jvm_type}"))),
        };
        self.put_opcode(opcode)
    }

    fn op_if(&mut self, jvm_type: JvmType, op: CompareOp, target: BlockId) -> Result<()> {
        let opcode = match jvm_type {
            JvmType::Int => match op {
                CompareOp::Eq => Opcode::Ifeq,
                CompareOp::Ne => Opcode::Ifne,
                CompareOp::Lt => Opcode::Iflt,
                CompareOp::Ge => Opcode::Ifge,
                CompareOp::Gt => Opcode::Ifgt,
                CompareOp::Le => Opcode::Ifle,
            },
            JvmType::Reference => match op {
                CompareOp::Eq => Opcode::Ifnull,
                CompareOp::Ne => Opcode::Ifnonnull,
                _ => return Err(InternalError(format!("reference branch {op:?}"))),
            },
            _ => return Err(InternalError(format!("branch on {jvm_type}"))),
        };
        self.put_opcode(opcode)?;
        self.put_label(target)
    }

    fn op_if_cmp(&mut self, jvm_type: JvmType, op: CompareOp, target: BlockId) -> Result<()> {
        let opcode = match jvm_type {
            JvmType::Int => match op {
                CompareOp::Eq => Opcode::IfIcmpeq,
                CompareOp::Ne => Opcode::IfIcmpne,
                CompareOp::Lt => Opcode::IfIcmplt,
                CompareOp::Ge => Opcode::IfIcmpge,
                CompareOp::Gt => Opcode::IfIcmpgt,
                CompareOp::Le => Opcode::IfIcmple,
            },
            JvmType::Reference => match op {
                CompareOp::Eq => Opcode::IfAcmpeq,
                CompareOp::Ne => Opcode::IfAcmpne,
                _ => return Err(InternalError(format!("reference comparison {op:?}"))),
            },
            _ => return Err(InternalError(format!("pairwise branch on {jvm_type}"))),
        };
        self.put_opcode(opcode)?;
        self.put_label(target)
    }

    fn op_goto(&mut self, target: BlockId) -> Result<()> {
        self.put_opcode(Opcode::Goto)?;
        self.put_label(target)
    }

    fn op_tableswitch(
        &mut self,
        low: i32,
        high: i32,
        default: BlockId,
        table: &[BlockId],
    ) -> Result<()> {
        self.put_opcode(Opcode::Tableswitch)?;
        self.put_i32(high);
        self.put_i32(low);
        self.put_label(default)?;
        let size = u32::try_from(table.len())
            .map_err(|_| InternalError("tableswitch table overflow".to_string()))?;
        self.put_u32(size);
        for target in table {
            self.put_label(*target)?;
        }
        Ok(())
    }

    fn op_ret(&mut self) -> Result<()> {
        self.put_opcode(Opcode::Ret)
    }

    fn op_ret_void(&mut self) -> Result<()> {
        self.put_opcode(Opcode::RetVoid)
    }

    fn op_getstatic(&mut self, field: &Arc<Field>) -> Result<()> {
        self.put_opcode(Opcode::Getstatic)?;
        self.put_field(field)
    }

    fn op_putstatic(&mut self, field: &Arc<Field>) -> Result<()> {
        self.put_opcode(Opcode::Putstatic)?;
        self.put_field(field)
    }

    fn op_getfield(&mut self, field: &Arc<Field>) -> Result<()> {
        self.put_opcode(Opcode::Getfield)?;
        self.put_field(field)
    }

    fn op_putfield(&mut self, field: &Arc<Field>) -> Result<()> {
        self.put_opcode(Opcode::Putfield)?;
        self.put_field(field)
    }

    fn op_invokevirtual(&mut self, method: &Arc<Method>) -> Result<()> {
        self.put_opcode(Opcode::Invokevirtual)?;
        self.put_method(method)
    }

    fn op_invokespecial(&mut self, method: &Arc<Method>) -> Result<()> {
        self.put_opcode(Opcode::Invokespecial)?;
        self.put_method(method)
    }

    fn op_invokestatic(&mut self, method: &Arc<Method>) -> Result<()> {
        self.put_opcode(Opcode::Invokestatic)?;
        self.put_method(method)
    }

    fn op_invokeinterface(&mut self, method: &Arc<Method>) -> Result<()> {
        self.put_opcode(Opcode::Invokeinterface)?;
        self.put_method(method)
    }

    fn op_new(&mut self, klass: &Arc<Klass>) -> Result<()> {
        self.put_opcode(Opcode::New)?;
        self.put_klass(klass)
    }

    fn op_newarray(&mut self, atype: u8) -> Result<()> {
        self.put_opcode(Opcode::Newarray)?;
        self.put_u8(atype);
        Ok(())
    }

    fn op_anewarray(&mut self, klass: &Arc<Klass>) -> Result<()> {
        self.put_opcode(Opcode::Anewarray)?;
        self.put_klass(klass)
    }

    fn op_multianewarray(&mut self, klass: &Arc<Klass>, dimensions: u8) -> Result<()> {
        self.put_opcode(Opcode::Multianewarray)?;
        self.put_klass(klass)?;
        self.put_u8(dimensions);
        Ok(())
    }

    fn op_arraylength(&mut self) -> Result<()> {
        self.put_opcode(Opcode::Arraylength)
    }

    fn op_athrow(&mut self) -> Result<()> {
        self.put_opcode(Opcode::Athrow)
    }

    fn op_checkcast(&mut self, klass: &Arc<Klass>) -> Result<()> {
        self.put_opcode(Opcode::Checkcast)?;
        self.put_klass(klass)
    }

    fn op_instanceof(&mut self, klass: &Arc<Klass>) -> Result<()> {
        self.put_opcode(Opcode::Instanceof)?;
        self.put_klass(klass)
    }

    fn op_monitorenter(&mut self) -> Result<()> {
        self.put_opcode(Opcode::Monitorenter)
    }

    fn op_monitorexit(&mut self) -> Result<()> {
        self.put_opcode(Opcode::Monitorexit)
    }

    fn epilogue(&mut self) -> Result<()> {
        self.backpatch()?;
        debug!(
            "emitted {} bytes, {} labels, {} blocks",
            self.code.len(),
            self.labels.len(),
            self.block_offsets.len()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opcode_tags_are_stable() {
        assert_eq!(0, Opcode::Iconst as u8);
        assert_eq!(4, Opcode::Aconst as u8);
        assert_eq!(Some(Opcode::Iconst), Opcode::from_u8(0));
        let last = u8::try_from(Opcode::ALL.len() - 1).expect("tag");
        assert_eq!(Some(Opcode::Ifnonnull), Opcode::from_u8(last));
        assert_eq!(None, Opcode::from_u8(last + 1));
    }

    #[test]
    fn test_opcode_round_trip() {
        for (tag, opcode) in Opcode::ALL.iter().enumerate() {
            let tag = u8::try_from(tag).expect("tag");
            assert_eq!(Some(*opcode), Opcode::from_u8(tag));
            assert_eq!(tag, *opcode as u8);
        }
    }

    #[test]
    fn test_const_encoding() -> crate::Result<()> {
        let mut emitter = TrampolineEmitter::new();
        emitter.op_const(JvmType::Int, Value::from_int(7))?;
        emitter.op_const(JvmType::Long, Value::from_long(-1))?;
        let trampoline = emitter.into_trampoline();
        let mut expected = vec![Opcode::Iconst as u8];
        expected.extend_from_slice(&7i32.to_le_bytes());
        expected.push(Opcode::Lconst as u8);
        expected.extend_from_slice(&(-1i64).to_le_bytes());
        assert_eq!(expected, trampoline.code());
        Ok(())
    }

    #[test]
    fn test_labels_are_backpatched() -> crate::Result<()> {
        let mut emitter = TrampolineEmitter::new();
        emitter.begin(BlockId(0))?;
        emitter.op_goto(BlockId(1))?;
        emitter.begin(BlockId(1))?;
        emitter.op_ret_void()?;
        emitter.epilogue()?;
        let trampoline = emitter.into_trampoline();
        // goto is followed by the 16-bit offset of block 1, which starts
        // right after it.
        assert_eq!(
            vec![Opcode::Goto as u8, 3, 0, Opcode::RetVoid as u8],
            trampoline.code()
        );
        assert_eq!(vec![3], trampoline.branch_targets()?);
        assert_eq!(vec![0, 3], trampoline.instruction_offsets()?);
        Ok(())
    }

    #[test]
    fn test_backward_label() -> crate::Result<()> {
        let mut emitter = TrampolineEmitter::new();
        emitter.begin(BlockId(0))?;
        emitter.op_ret_void()?;
        emitter.begin(BlockId(1))?;
        emitter.op_goto(BlockId(0))?;
        emitter.epilogue()?;
        let trampoline = emitter.into_trampoline();
        assert_eq!(
            vec![Opcode::RetVoid as u8, Opcode::Goto as u8, 0, 0],
            trampoline.code()
        );
        Ok(())
    }

    #[test]
    fn test_invalid_conversion_is_rejected() {
        let mut emitter = TrampolineEmitter::new();
        assert!(emitter.op_convert(JvmType::Int, JvmType::Int).is_err());
        assert!(
            emitter
                .op_convert(JvmType::Byte, JvmType::Double)
                .is_err()
        );
    }

    #[test]
    fn test_float_bitwise_ops_are_rejected() {
        let mut emitter = TrampolineEmitter::new();
        assert!(emitter.op_binary(JvmType::Float, BinaryOp::And).is_err());
        assert!(emitter.op_binary(JvmType::Double, BinaryOp::Shl).is_err());
    }

    #[test]
    fn test_oversized_stream_is_rejected() {
        let mut emitter = TrampolineEmitter::new();
        let mut result = Ok(());
        for _ in 0..=u16::MAX {
            result = emitter.op_const(JvmType::Int, Value::from_int(0));
            if result.is_err() {
                break;
            }
        }
        assert!(matches!(result, Err(crate::Error::MalformedBytecode(_))));
    }

    #[test]
    fn test_disassemble() -> crate::Result<()> {
        let mut emitter = TrampolineEmitter::new();
        emitter.begin(BlockId(0))?;
        emitter.op_const(JvmType::Int, Value::from_int(3))?;
        emitter.op_iinc(2, 1)?;
        emitter.op_ret()?;
        emitter.epilogue()?;
        let trampoline = emitter.into_trampoline();
        let lines = trampoline.disassemble()?;
        assert_eq!(
            vec![
                (0, "Iconst 3".to_string()),
                (5, "Iinc 2, 1".to_string()),
                (11, "Ret".to_string()),
            ],
            lines
        );
        Ok(())
    }
}
