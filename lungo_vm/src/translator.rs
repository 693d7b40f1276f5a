//! Second pass over a method: lowering decoded instructions to the internal
//! instruction stream.
//!
//! The translator walks the basic blocks discovered by the scanner in source
//! order and decomposes each source instruction into typed abstract
//! operations on an [`Emitter`]. Constant-pool indices are resolved to direct
//! class / field / method handles here, so the emitted stream carries no
//! symbolic references.

use crate::Error::{InvalidConstant, MalformedBytecode, UnsupportedInstruction};
use crate::Result;
use crate::bytecode::{Instruction, decode};
use crate::control_flow::{BlockId, ControlFlow};
use lungo_runtime::{Field, Heap, JvmType, Klass, Method, PoolEntry, RuntimeConstantPool, Value};
use std::sync::Arc;
use tracing::debug;

/// Unary arithmetic operators.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum UnaryOp {
    Neg,
}

/// Binary arithmetic, logic, and shift operators.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Shl,
    Shr,
    Ushr,
    And,
    Or,
    Xor,
}

/// Comparison operators for branches and floating-point compares.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum CompareOp {
    Eq,
    Ne,
    Lt,
    Ge,
    Gt,
    Le,
}

/// The typed abstract operations the translator decomposes source
/// instructions into.
///
/// A concrete emitter chooses the encoding; the interpreter's emitter writes
/// the trampoline byte stream, monomorphizing each typed operation to a
/// per-type internal opcode. Branch operations receive target blocks rather
/// than offsets; the emitter records them and backpatches concrete offsets in
/// `epilogue` once every block's position is known.
pub(crate) trait Emitter {
    fn prologue(&mut self, method: &Method) -> Result<()>;
    fn begin(&mut self, block: BlockId) -> Result<()>;
    fn op_const(&mut self, jvm_type: JvmType, value: Value) -> Result<()>;
    fn op_load(&mut self, jvm_type: JvmType, index: u16) -> Result<()>;
    fn op_store(&mut self, jvm_type: JvmType, index: u16) -> Result<()>;
    fn op_arrayload(&mut self, jvm_type: JvmType) -> Result<()>;
    fn op_arraystore(&mut self, jvm_type: JvmType) -> Result<()>;
    fn op_convert(&mut self, from: JvmType, to: JvmType) -> Result<()>;
    fn op_pop(&mut self) -> Result<()>;
    fn op_pop2(&mut self) -> Result<()>;
    fn op_dup(&mut self) -> Result<()>;
    fn op_dup_x1(&mut self) -> Result<()>;
    fn op_dup_x2(&mut self) -> Result<()>;
    fn op_dup2(&mut self) -> Result<()>;
    fn op_dup2_x1(&mut self) -> Result<()>;
    fn op_dup2_x2(&mut self) -> Result<()>;
    fn op_swap(&mut self) -> Result<()>;
    fn op_unary(&mut self, jvm_type: JvmType, op: UnaryOp) -> Result<()>;
    fn op_binary(&mut self, jvm_type: JvmType, op: BinaryOp) -> Result<()>;
    fn op_iinc(&mut self, index: u16, delta: i32) -> Result<()>;
    fn op_lcmp(&mut self) -> Result<()>;
    fn op_cmp(&mut self, jvm_type: JvmType, op: CompareOp) -> Result<()>;
    fn op_if(&mut self, jvm_type: JvmType, op: CompareOp, target: BlockId) -> Result<()>;
    fn op_if_cmp(&mut self, jvm_type: JvmType, op: CompareOp, target: BlockId) -> Result<()>;
    fn op_goto(&mut self, target: BlockId) -> Result<()>;
    fn op_tableswitch(
        &mut self,
        low: i32,
        high: i32,
        default: BlockId,
        table: &[BlockId],
    ) -> Result<()>;
    fn op_ret(&mut self) -> Result<()>;
    fn op_ret_void(&mut self) -> Result<()>;
    fn op_getstatic(&mut self, field: &Arc<Field>) -> Result<()>;
    fn op_putstatic(&mut self, field: &Arc<Field>) -> Result<()>;
    fn op_getfield(&mut self, field: &Arc<Field>) -> Result<()>;
    fn op_putfield(&mut self, field: &Arc<Field>) -> Result<()>;
    fn op_invokevirtual(&mut self, method: &Arc<Method>) -> Result<()>;
    fn op_invokespecial(&mut self, method: &Arc<Method>) -> Result<()>;
    fn op_invokestatic(&mut self, method: &Arc<Method>) -> Result<()>;
    fn op_invokeinterface(&mut self, method: &Arc<Method>) -> Result<()>;
    fn op_new(&mut self, klass: &Arc<Klass>) -> Result<()>;
    fn op_newarray(&mut self, atype: u8) -> Result<()>;
    fn op_anewarray(&mut self, klass: &Arc<Klass>) -> Result<()>;
    fn op_multianewarray(&mut self, klass: &Arc<Klass>, dimensions: u8) -> Result<()>;
    fn op_arraylength(&mut self) -> Result<()>;
    fn op_athrow(&mut self) -> Result<()>;
    fn op_checkcast(&mut self, klass: &Arc<Klass>) -> Result<()>;
    fn op_instanceof(&mut self, klass: &Arc<Klass>) -> Result<()>;
    fn op_monitorenter(&mut self) -> Result<()>;
    fn op_monitorexit(&mut self) -> Result<()>;
    fn epilogue(&mut self) -> Result<()>;
}

/// Lowers one method. The constant pool belongs to the method's declaring
/// class; the heap is needed to intern string constants at translation time.
pub(crate) struct Translator<'a> {
    method: &'a Arc<Method>,
    constant_pool: &'a RuntimeConstantPool,
    heap: &'a Heap,
}

impl<'a> Translator<'a> {
    pub(crate) fn new(
        method: &'a Arc<Method>,
        constant_pool: &'a RuntimeConstantPool,
        heap: &'a Heap,
    ) -> Self {
        Translator {
            method,
            constant_pool,
            heap,
        }
    }

    /// Scan the method, then lower every block in source order.
    ///
    /// # Errors
    ///
    /// if the bytecode cannot be decoded, a branch target is invalid, a
    /// constant-pool reference does not resolve, or an instruction is
    /// unsupported.
    pub(crate) fn translate<E: Emitter>(&self, emitter: &mut E) -> Result<()> {
        let code = self.method.code();
        if code.is_empty() {
            return Err(MalformedBytecode(format!(
                "method {} has no code",
                self.method
            )));
        }
        let instructions = decode(code)?;
        let code_length = u16::try_from(code.len())
            .map_err(|_| MalformedBytecode("method body exceeds 16-bit offsets".to_string()))?;
        let control_flow = ControlFlow::scan(&instructions, code_length)?;
        debug!(
            "translating {}: {} bytes, {} blocks",
            self.method,
            code.len(),
            control_flow.len()
        );

        emitter.prologue(self.method)?;
        let mut index = 0;
        for block_id in control_flow.order() {
            let block = *control_flow.block(*block_id);
            emitter.begin(*block_id)?;
            while index < instructions.len() && instructions[index].0 < block.end {
                let (_, instruction) = &instructions[index];
                self.lower(instruction, &control_flow, emitter)?;
                index += 1;
            }
        }
        emitter.epilogue()
    }

    fn lower<E: Emitter>(
        &self,
        instruction: &Instruction,
        control_flow: &ControlFlow,
        emitter: &mut E,
    ) -> Result<()> {
        match instruction {
            Instruction::Nop => Ok(()),
            Instruction::Aconst_null => emitter.op_const(JvmType::Reference, Value::NULL),
            Instruction::Iconst(value) => emitter.op_const(JvmType::Int, Value::from_int(*value)),
            Instruction::Lconst(value) => emitter.op_const(JvmType::Long, Value::from_long(*value)),
            Instruction::Fconst(value) => {
                emitter.op_const(JvmType::Float, Value::from_float(*value))
            }
            Instruction::Dconst(value) => {
                emitter.op_const(JvmType::Double, Value::from_double(*value))
            }
            Instruction::Bipush(value) => {
                emitter.op_const(JvmType::Int, Value::from_int(i32::from(*value)))
            }
            Instruction::Sipush(value) => {
                emitter.op_const(JvmType::Int, Value::from_int(i32::from(*value)))
            }
            Instruction::Ldc(index) => self.load_constant(*index, emitter),
            Instruction::Ldc2_w(index) => self.load_wide_constant(*index, emitter),
            Instruction::Iload(index) => emitter.op_load(JvmType::Int, *index),
            Instruction::Lload(index) => emitter.op_load(JvmType::Long, *index),
            Instruction::Fload(index) => emitter.op_load(JvmType::Float, *index),
            Instruction::Dload(index) => emitter.op_load(JvmType::Double, *index),
            Instruction::Aload(index) => emitter.op_load(JvmType::Reference, *index),
            Instruction::Iaload => emitter.op_arrayload(JvmType::Int),
            Instruction::Laload => emitter.op_arrayload(JvmType::Long),
            Instruction::Faload => emitter.op_arrayload(JvmType::Float),
            Instruction::Daload => emitter.op_arrayload(JvmType::Double),
            Instruction::Aaload => emitter.op_arrayload(JvmType::Reference),
            Instruction::Baload => emitter.op_arrayload(JvmType::Byte),
            Instruction::Caload => emitter.op_arrayload(JvmType::Char),
            Instruction::Saload => emitter.op_arrayload(JvmType::Short),
            Instruction::Istore(index) => emitter.op_store(JvmType::Int, *index),
            Instruction::Lstore(index) => emitter.op_store(JvmType::Long, *index),
            Instruction::Fstore(index) => emitter.op_store(JvmType::Float, *index),
            Instruction::Dstore(index) => emitter.op_store(JvmType::Double, *index),
            Instruction::Astore(index) => emitter.op_store(JvmType::Reference, *index),
            Instruction::Iastore => emitter.op_arraystore(JvmType::Int),
            Instruction::Lastore => emitter.op_arraystore(JvmType::Long),
            Instruction::Fastore => emitter.op_arraystore(JvmType::Float),
            Instruction::Dastore => emitter.op_arraystore(JvmType::Double),
            Instruction::Aastore => emitter.op_arraystore(JvmType::Reference),
            Instruction::Bastore => emitter.op_arraystore(JvmType::Byte),
            Instruction::Castore => emitter.op_arraystore(JvmType::Char),
            Instruction::Sastore => emitter.op_arraystore(JvmType::Short),
            Instruction::Pop => emitter.op_pop(),
            Instruction::Pop2 => emitter.op_pop2(),
            Instruction::Dup => emitter.op_dup(),
            Instruction::Dup_x1 => emitter.op_dup_x1(),
            Instruction::Dup_x2 => emitter.op_dup_x2(),
            Instruction::Dup2 => emitter.op_dup2(),
            Instruction::Dup2_x1 => emitter.op_dup2_x1(),
            Instruction::Dup2_x2 => emitter.op_dup2_x2(),
            Instruction::Swap => emitter.op_swap(),
            Instruction::Iadd => emitter.op_binary(JvmType::Int, BinaryOp::Add),
            Instruction::Ladd => emitter.op_binary(JvmType::Long, BinaryOp::Add),
            Instruction::Fadd => emitter.op_binary(JvmType::Float, BinaryOp::Add),
            Instruction::Dadd => emitter.op_binary(JvmType::Double, BinaryOp::Add),
            Instruction::Isub => emitter.op_binary(JvmType::Int, BinaryOp::Sub),
            Instruction::Lsub => emitter.op_binary(JvmType::Long, BinaryOp::Sub),
            Instruction::Fsub => emitter.op_binary(JvmType::Float, BinaryOp::Sub),
            Instruction::Dsub => emitter.op_binary(JvmType::Double, BinaryOp::Sub),
            Instruction::Imul => emitter.op_binary(JvmType::Int, BinaryOp::Mul),
            Instruction::Lmul => emitter.op_binary(JvmType::Long, BinaryOp::Mul),
            Instruction::Fmul => emitter.op_binary(JvmType::Float, BinaryOp::Mul),
            Instruction::Dmul => emitter.op_binary(JvmType::Double, BinaryOp::Mul),
            Instruction::Idiv => emitter.op_binary(JvmType::Int, BinaryOp::Div),
            Instruction::Ldiv => emitter.op_binary(JvmType::Long, BinaryOp::Div),
            Instruction::Fdiv => emitter.op_binary(JvmType::Float, BinaryOp::Div),
            Instruction::Ddiv => emitter.op_binary(JvmType::Double, BinaryOp::Div),
            Instruction::Irem => emitter.op_binary(JvmType::Int, BinaryOp::Rem),
            Instruction::Lrem => emitter.op_binary(JvmType::Long, BinaryOp::Rem),
            Instruction::Frem => emitter.op_binary(JvmType::Float, BinaryOp::Rem),
            Instruction::Drem => emitter.op_binary(JvmType::Double, BinaryOp::Rem),
            Instruction::Ineg => emitter.op_unary(JvmType::Int, UnaryOp::Neg),
            Instruction::Lneg => emitter.op_unary(JvmType::Long, UnaryOp::Neg),
            Instruction::Fneg => emitter.op_unary(JvmType::Float, UnaryOp::Neg),
            Instruction::Dneg => emitter.op_unary(JvmType::Double, UnaryOp::Neg),
            Instruction::Ishl => emitter.op_binary(JvmType::Int, BinaryOp::Shl),
            Instruction::Lshl => emitter.op_binary(JvmType::Long, BinaryOp::Shl),
            Instruction::Ishr => emitter.op_binary(JvmType::Int, BinaryOp::Shr),
            Instruction::Lshr => emitter.op_binary(JvmType::Long, BinaryOp::Shr),
            Instruction::Iushr => emitter.op_binary(JvmType::Int, BinaryOp::Ushr),
            Instruction::Lushr => emitter.op_binary(JvmType::Long, BinaryOp::Ushr),
            Instruction::Iand => emitter.op_binary(JvmType::Int, BinaryOp::And),
            Instruction::Land => emitter.op_binary(JvmType::Long, BinaryOp::And),
            Instruction::Ior => emitter.op_binary(JvmType::Int, BinaryOp::Or),
            Instruction::Lor => emitter.op_binary(JvmType::Long, BinaryOp::Or),
            Instruction::Ixor => emitter.op_binary(JvmType::Int, BinaryOp::Xor),
            Instruction::Lxor => emitter.op_binary(JvmType::Long, BinaryOp::Xor),
            Instruction::Iinc(index, delta) => emitter.op_iinc(*index, *delta),
            Instruction::I2l => emitter.op_convert(JvmType::Int, JvmType::Long),
            Instruction::I2f => emitter.op_convert(JvmType::Int, JvmType::Float),
            Instruction::I2d => emitter.op_convert(JvmType::Int, JvmType::Double),
            Instruction::L2i => emitter.op_convert(JvmType::Long, JvmType::Int),
            Instruction::L2f => emitter.op_convert(JvmType::Long, JvmType::Float),
            Instruction::L2d => emitter.op_convert(JvmType::Long, JvmType::Double),
            Instruction::F2i => emitter.op_convert(JvmType::Float, JvmType::Int),
            Instruction::F2l => emitter.op_convert(JvmType::Float, JvmType::Long),
            Instruction::F2d => emitter.op_convert(JvmType::Float, JvmType::Double),
            Instruction::D2i => emitter.op_convert(JvmType::Double, JvmType::Int),
            Instruction::D2l => emitter.op_convert(JvmType::Double, JvmType::Long),
            Instruction::D2f => emitter.op_convert(JvmType::Double, JvmType::Float),
            Instruction::I2b => emitter.op_convert(JvmType::Int, JvmType::Byte),
            Instruction::I2c => emitter.op_convert(JvmType::Int, JvmType::Char),
            Instruction::I2s => emitter.op_convert(JvmType::Int, JvmType::Short),
            Instruction::Lcmp => emitter.op_lcmp(),
            Instruction::Fcmpl => emitter.op_cmp(JvmType::Float, CompareOp::Lt),
            Instruction::Fcmpg => emitter.op_cmp(JvmType::Float, CompareOp::Gt),
            Instruction::Dcmpl => emitter.op_cmp(JvmType::Double, CompareOp::Lt),
            Instruction::Dcmpg => emitter.op_cmp(JvmType::Double, CompareOp::Gt),
            Instruction::Ifeq(target) => {
                emitter.op_if(JvmType::Int, CompareOp::Eq, control_flow.block_at(*target)?)
            }
            Instruction::Ifne(target) => {
                emitter.op_if(JvmType::Int, CompareOp::Ne, control_flow.block_at(*target)?)
            }
            Instruction::Iflt(target) => {
                emitter.op_if(JvmType::Int, CompareOp::Lt, control_flow.block_at(*target)?)
            }
            Instruction::Ifge(target) => {
                emitter.op_if(JvmType::Int, CompareOp::Ge, control_flow.block_at(*target)?)
            }
            Instruction::Ifgt(target) => {
                emitter.op_if(JvmType::Int, CompareOp::Gt, control_flow.block_at(*target)?)
            }
            Instruction::Ifle(target) => {
                emitter.op_if(JvmType::Int, CompareOp::Le, control_flow.block_at(*target)?)
            }
            Instruction::If_icmpeq(target) => {
                emitter.op_if_cmp(JvmType::Int, CompareOp::Eq, control_flow.block_at(*target)?)
            }
            Instruction::If_icmpne(target) => {
                emitter.op_if_cmp(JvmType::Int, CompareOp::Ne, control_flow.block_at(*target)?)
            }
            Instruction::If_icmplt(target) => {
                emitter.op_if_cmp(JvmType::Int, CompareOp::Lt, control_flow.block_at(*target)?)
            }
            Instruction::If_icmpge(target) => {
                emitter.op_if_cmp(JvmType::Int, CompareOp::Ge, control_flow.block_at(*target)?)
            }
            Instruction::If_icmpgt(target) => {
                emitter.op_if_cmp(JvmType::Int, CompareOp::Gt, control_flow.block_at(*target)?)
            }
            Instruction::If_icmple(target) => {
                emitter.op_if_cmp(JvmType::Int, CompareOp::Le, control_flow.block_at(*target)?)
            }
            Instruction::If_acmpeq(target) => emitter.op_if_cmp(
                JvmType::Reference,
                CompareOp::Eq,
                control_flow.block_at(*target)?,
            ),
            Instruction::If_acmpne(target) => emitter.op_if_cmp(
                JvmType::Reference,
                CompareOp::Ne,
                control_flow.block_at(*target)?,
            ),
            Instruction::Ifnull(target) => emitter.op_if(
                JvmType::Reference,
                CompareOp::Eq,
                control_flow.block_at(*target)?,
            ),
            Instruction::Ifnonnull(target) => emitter.op_if(
                JvmType::Reference,
                CompareOp::Ne,
                control_flow.block_at(*target)?,
            ),
            Instruction::Goto(target) => emitter.op_goto(control_flow.block_at(*target)?),
            Instruction::Tableswitch(table_switch) => {
                let default = control_flow.block_at(table_switch.default)?;
                let mut table = Vec::with_capacity(table_switch.offsets.len());
                for target in &table_switch.offsets {
                    table.push(control_flow.block_at(*target)?);
                }
                emitter.op_tableswitch(table_switch.low, table_switch.high, default, &table)
            }
            Instruction::Lookupswitch(_) => {
                Err(UnsupportedInstruction("lookupswitch".to_string()))
            }
            Instruction::Ireturn
            | Instruction::Lreturn
            | Instruction::Freturn
            | Instruction::Dreturn
            | Instruction::Areturn => emitter.op_ret(),
            Instruction::Return => emitter.op_ret_void(),
            Instruction::Getstatic(index) => {
                emitter.op_getstatic(self.constant_pool.try_get_field(*index)?)
            }
            Instruction::Putstatic(index) => {
                emitter.op_putstatic(self.constant_pool.try_get_field(*index)?)
            }
            Instruction::Getfield(index) => {
                emitter.op_getfield(self.constant_pool.try_get_field(*index)?)
            }
            Instruction::Putfield(index) => {
                emitter.op_putfield(self.constant_pool.try_get_field(*index)?)
            }
            Instruction::Invokevirtual(index) => {
                emitter.op_invokevirtual(self.constant_pool.try_get_method(*index)?)
            }
            Instruction::Invokespecial(index) => {
                emitter.op_invokespecial(self.constant_pool.try_get_method(*index)?)
            }
            Instruction::Invokestatic(index) => {
                emitter.op_invokestatic(self.constant_pool.try_get_method(*index)?)
            }
            Instruction::Invokeinterface(index) => {
                emitter.op_invokeinterface(self.constant_pool.try_get_method(*index)?)
            }
            Instruction::New(index) => emitter.op_new(self.constant_pool.try_get_class(*index)?),
            Instruction::Newarray(atype) => {
                if !(4..=11).contains(atype) {
                    return Err(MalformedBytecode(format!(
                        "invalid newarray type tag {atype}"
                    )));
                }
                emitter.op_newarray(*atype)
            }
            Instruction::Anewarray(index) => {
                emitter.op_anewarray(self.constant_pool.try_get_class(*index)?)
            }
            Instruction::Multianewarray(index, dimensions) => emitter
                .op_multianewarray(self.constant_pool.try_get_class(*index)?, *dimensions),
            Instruction::Arraylength => emitter.op_arraylength(),
            Instruction::Athrow => emitter.op_athrow(),
            Instruction::Checkcast(index) => {
                emitter.op_checkcast(self.constant_pool.try_get_class(*index)?)
            }
            Instruction::Instanceof(index) => {
                emitter.op_instanceof(self.constant_pool.try_get_class(*index)?)
            }
            Instruction::Monitorenter => emitter.op_monitorenter(),
            Instruction::Monitorexit => emitter.op_monitorexit(),
        }
    }

    /// Lower `ldc`: category-1 constants only.
    fn load_constant<E: Emitter>(&self, index: u16, emitter: &mut E) -> Result<()> {
        match self.constant_pool.try_get(index)? {
            PoolEntry::Integer(value) => {
                emitter.op_const(JvmType::Int, Value::from_int(*value))
            }
            PoolEntry::Float(value) => emitter.op_const(JvmType::Float, Value::from_float(*value)),
            PoolEntry::String(value) => {
                let reference = self.heap.intern_string(value)?;
                emitter.op_const(JvmType::Reference, Value::from_reference(reference))
            }
            entry => Err(InvalidConstant {
                expected: "Integer, Float, or String".to_string(),
                actual: entry.to_string(),
            }),
        }
    }

    /// Lower `ldc2_w`: category-2 constants only.
    fn load_wide_constant<E: Emitter>(&self, index: u16, emitter: &mut E) -> Result<()> {
        match self.constant_pool.try_get(index)? {
            PoolEntry::Long(value) => emitter.op_const(JvmType::Long, Value::from_long(*value)),
            PoolEntry::Double(value) => {
                emitter.op_const(JvmType::Double, Value::from_double(*value))
            }
            entry => Err(InvalidConstant {
                expected: "Long or Double".to_string(),
                actual: entry.to_string(),
            }),
        }
    }
}
