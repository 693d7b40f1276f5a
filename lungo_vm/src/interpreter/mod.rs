//! The interpreter: a single dispatch loop over the trampoline instruction
//! stream.
//!
//! Dispatch is a dense match keyed by the one-byte opcode tag; the mapping
//! from tag to handler is fixed at build time. The loop manipulates the
//! current frame only; method invocation re-enters [`Vm::execute`] with a
//! fresh frame drawn from the thread's pool.

mod invoke;
mod object;

use crate::Error::{InvalidProgramCounter, UnsupportedInstruction};
use crate::Result;
use crate::java_error::JavaError::ArithmeticException;
use crate::trampoline::{
    Opcode, Trampoline, next_opcode, read_i32, read_i64, read_u8, read_u16, read_u32, read_u64,
};
use crate::vm::Vm;
use lungo_runtime::{Frame, Value};
use tracing::{Level, event_enabled, trace};

/// Run a prepared frame against a method's trampoline until it returns.
///
/// On entry the frame's locals hold the arguments and the operand stack is
/// empty; on a value return the result is the cell the method left on its
/// stack, and a `void` return yields the null cell.
///
/// # Errors
///
/// Divide by zero, null dereference, failed casts, heap exhaustion, and
/// unsupported instructions abort the invocation.
pub(crate) fn interpret(vm: &Vm, frame: &mut Frame, trampoline: &Trampoline) -> Result<Value> {
    let code = trampoline.code();
    frame.set_pc(0);
    loop {
        let mut pc = usize::from(frame.pc());
        if pc >= code.len() {
            return Err(InvalidProgramCounter(frame.pc()));
        }
        let opcode = next_opcode(code, &mut pc)?;
        if event_enabled!(Level::TRACE) {
            trace!(
                "  {}: {} (stack depth {})",
                pc - 1,
                opcode.name(),
                frame.stack_depth()
            );
        }
        match opcode {
            Opcode::Iconst => {
                let value = read_i32(code, &mut pc)?;
                frame.push(Value::from_int(value));
            }
            Opcode::Lconst => {
                let value = read_i64(code, &mut pc)?;
                frame.push(Value::from_long(value));
            }
            Opcode::Fconst => {
                let value = f32::from_bits(read_u32(code, &mut pc)?);
                frame.push(Value::from_float(value));
            }
            Opcode::Dconst => {
                let value = f64::from_bits(read_u64(code, &mut pc)?);
                frame.push(Value::from_double(value));
            }
            Opcode::Aconst => {
                let value = Value::from_bits(read_u64(code, &mut pc)?);
                frame.push(value);
            }
            Opcode::Load => {
                let index = read_u16(code, &mut pc)?;
                let value = frame.local(usize::from(index))?;
                frame.push(value);
            }
            Opcode::Store => {
                let index = read_u16(code, &mut pc)?;
                let value = frame.pop()?;
                frame.set_local(usize::from(index), value)?;
            }
            Opcode::Barrayload
            | Opcode::Sarrayload
            | Opcode::Iarrayload
            | Opcode::Larrayload
            | Opcode::Carrayload
            | Opcode::Farrayload
            | Opcode::Darrayload
            | Opcode::Aarrayload => object::array_load(vm, frame)?,
            Opcode::Aarraystore => object::reference_array_store(vm, frame)?,
            Opcode::Barraystore
            | Opcode::Sarraystore
            | Opcode::Iarraystore
            | Opcode::Larraystore
            | Opcode::Carraystore
            | Opcode::Farraystore
            | Opcode::Darraystore => object::array_store(vm, frame)?,
            Opcode::Pop => {
                frame.pop()?;
            }
            Opcode::Pop2 => {
                frame.pop()?;
                frame.pop()?;
            }
            Opcode::Dup => {
                let value = frame.top()?;
                frame.push(value);
            }
            Opcode::DupX1 => {
                let value1 = frame.pop()?;
                let value2 = frame.pop()?;
                frame.push(value1);
                frame.push(value2);
                frame.push(value1);
            }
            Opcode::DupX2 => {
                let value1 = frame.pop()?;
                let value2 = frame.pop()?;
                let value3 = frame.pop()?;
                frame.push(value1);
                frame.push(value3);
                frame.push(value2);
                frame.push(value1);
            }
            Opcode::Dup2 => {
                let value1 = frame.pop()?;
                let value2 = frame.pop()?;
                frame.push(value2);
                frame.push(value1);
                frame.push(value2);
                frame.push(value1);
            }
            Opcode::Dup2X1 => {
                let value1 = frame.pop()?;
                let value2 = frame.pop()?;
                let value3 = frame.pop()?;
                frame.push(value2);
                frame.push(value1);
                frame.push(value3);
                frame.push(value2);
                frame.push(value1);
            }
            Opcode::Dup2X2 => {
                let value1 = frame.pop()?;
                let value2 = frame.pop()?;
                let value3 = frame.pop()?;
                let value4 = frame.pop()?;
                frame.push(value2);
                frame.push(value1);
                frame.push(value4);
                frame.push(value3);
                frame.push(value2);
                frame.push(value1);
            }
            Opcode::Swap => {
                let value1 = frame.pop()?;
                let value2 = frame.pop()?;
                frame.push(value1);
                frame.push(value2);
            }
            Opcode::Iadd => binary_int(frame, |a, b| Ok(a.wrapping_add(b)))?,
            Opcode::Isub => binary_int(frame, |a, b| Ok(a.wrapping_sub(b)))?,
            Opcode::Imul => binary_int(frame, |a, b| Ok(a.wrapping_mul(b)))?,
            Opcode::Idiv => binary_int(frame, |a, b| {
                if b == 0 {
                    Err(ArithmeticException("/ by zero".to_string()).into())
                } else {
                    Ok(a.wrapping_div(b))
                }
            })?,
            Opcode::Irem => binary_int(frame, |a, b| {
                if b == 0 {
                    Err(ArithmeticException("/ by zero".to_string()).into())
                } else {
                    Ok(a.wrapping_rem(b))
                }
            })?,
            Opcode::Ineg => {
                let value = frame.pop()?.as_int();
                frame.push(Value::from_int(value.wrapping_neg()));
            }
            Opcode::Ishl => shift_int(frame, i32::wrapping_shl)?,
            Opcode::Ishr => shift_int(frame, i32::wrapping_shr)?,
            Opcode::Iushr => shift_int(frame, |value, count| ((value as u32) >> count) as i32)?,
            Opcode::Iand => binary_int(frame, |a, b| Ok(a & b))?,
            Opcode::Ior => binary_int(frame, |a, b| Ok(a | b))?,
            Opcode::Ixor => binary_int(frame, |a, b| Ok(a ^ b))?,
            Opcode::Ladd => binary_long(frame, |a, b| Ok(a.wrapping_add(b)))?,
            Opcode::Lsub => binary_long(frame, |a, b| Ok(a.wrapping_sub(b)))?,
            Opcode::Lmul => binary_long(frame, |a, b| Ok(a.wrapping_mul(b)))?,
            Opcode::Ldiv => binary_long(frame, |a, b| {
                if b == 0 {
                    Err(ArithmeticException("/ by zero".to_string()).into())
                } else {
                    Ok(a.wrapping_div(b))
                }
            })?,
            Opcode::Lrem => binary_long(frame, |a, b| {
                if b == 0 {
                    Err(ArithmeticException("/ by zero".to_string()).into())
                } else {
                    Ok(a.wrapping_rem(b))
                }
            })?,
            Opcode::Lneg => {
                let value = frame.pop()?.as_long();
                frame.push(Value::from_long(value.wrapping_neg()));
            }
            Opcode::Lshl => shift_long(frame, i64::wrapping_shl)?,
            Opcode::Lshr => shift_long(frame, i64::wrapping_shr)?,
            Opcode::Lushr => shift_long(frame, |value, count| ((value as u64) >> count) as i64)?,
            Opcode::Land => binary_long(frame, |a, b| Ok(a & b))?,
            Opcode::Lor => binary_long(frame, |a, b| Ok(a | b))?,
            Opcode::Lxor => binary_long(frame, |a, b| Ok(a ^ b))?,
            Opcode::Fadd => binary_float(frame, |a, b| a + b)?,
            Opcode::Fsub => binary_float(frame, |a, b| a - b)?,
            Opcode::Fmul => binary_float(frame, |a, b| a * b)?,
            Opcode::Fdiv => binary_float(frame, |a, b| a / b)?,
            Opcode::Frem => binary_float(frame, |a, b| a % b)?,
            Opcode::Fneg => {
                let value = frame.pop()?.as_float();
                frame.push(Value::from_float(-value));
            }
            Opcode::Dadd => binary_double(frame, |a, b| a + b)?,
            Opcode::Dsub => binary_double(frame, |a, b| a - b)?,
            Opcode::Dmul => binary_double(frame, |a, b| a * b)?,
            Opcode::Ddiv => binary_double(frame, |a, b| a / b)?,
            Opcode::Drem => binary_double(frame, |a, b| a % b)?,
            Opcode::Dneg => {
                let value = frame.pop()?.as_double();
                frame.push(Value::from_double(-value));
            }
            Opcode::Iinc => {
                let index = usize::from(read_u8(code, &mut pc)?);
                let delta = read_i32(code, &mut pc)?;
                let value = frame.local(index)?.as_int();
                frame.set_local(index, Value::from_int(value.wrapping_add(delta)))?;
            }
            Opcode::I2l => {
                let value = frame.pop()?.as_int();
                frame.push(Value::from_long(i64::from(value)));
            }
            Opcode::I2f => {
                let value = frame.pop()?.as_int();
                frame.push(Value::from_float(value as f32));
            }
            Opcode::I2d => {
                let value = frame.pop()?.as_int();
                frame.push(Value::from_double(f64::from(value)));
            }
            Opcode::L2i => {
                let value = frame.pop()?.as_long();
                frame.push(Value::from_int(value as i32));
            }
            Opcode::L2f => {
                let value = frame.pop()?.as_long();
                frame.push(Value::from_float(value as f32));
            }
            Opcode::L2d => {
                let value = frame.pop()?.as_long();
                frame.push(Value::from_double(value as f64));
            }
            Opcode::F2i => {
                let value = frame.pop()?.as_float();
                frame.push(Value::from_int(value as i32));
            }
            Opcode::F2l => {
                let value = frame.pop()?.as_float();
                frame.push(Value::from_long(value as i64));
            }
            Opcode::F2d => {
                let value = frame.pop()?.as_float();
                frame.push(Value::from_double(f64::from(value)));
            }
            Opcode::D2i => {
                let value = frame.pop()?.as_double();
                frame.push(Value::from_int(value as i32));
            }
            Opcode::D2l => {
                let value = frame.pop()?.as_double();
                frame.push(Value::from_long(value as i64));
            }
            Opcode::D2f => {
                let value = frame.pop()?.as_double();
                frame.push(Value::from_float(value as f32));
            }
            Opcode::I2b => {
                let value = frame.pop()?.as_int();
                frame.push(Value::from_int(i32::from(value as i8)));
            }
            Opcode::I2c => {
                let value = frame.pop()?.as_int();
                frame.push(Value::from_int(i32::from(value as u16)));
            }
            Opcode::I2s => {
                let value = frame.pop()?.as_int();
                frame.push(Value::from_int(i32::from(value as i16)));
            }
            Opcode::Lcmp => {
                let value2 = frame.pop()?.as_long();
                let value1 = frame.pop()?.as_long();
                let result = match value1.cmp(&value2) {
                    std::cmp::Ordering::Less => -1,
                    std::cmp::Ordering::Equal => 0,
                    std::cmp::Ordering::Greater => 1,
                };
                frame.push(Value::from_int(result));
            }
            Opcode::Fcmpl => fcmp(frame, -1)?,
            Opcode::Fcmpg => fcmp(frame, 1)?,
            Opcode::Dcmpl => dcmp(frame, -1)?,
            Opcode::Dcmpg => dcmp(frame, 1)?,
            Opcode::Ifeq
            | Opcode::Ifne
            | Opcode::Iflt
            | Opcode::Ifge
            | Opcode::Ifgt
            | Opcode::Ifle => {
                let target = read_u16(code, &mut pc)?;
                let value = frame.pop()?.as_int();
                let jump = match opcode {
                    Opcode::Ifeq => value == 0,
                    Opcode::Ifne => value != 0,
                    Opcode::Iflt => value < 0,
                    Opcode::Ifge => value >= 0,
                    Opcode::Ifgt => value > 0,
                    _ => value <= 0,
                };
                if jump {
                    pc = usize::from(target);
                }
            }
            Opcode::IfIcmpeq
            | Opcode::IfIcmpne
            | Opcode::IfIcmplt
            | Opcode::IfIcmpge
            | Opcode::IfIcmpgt
            | Opcode::IfIcmple => {
                let target = read_u16(code, &mut pc)?;
                let value2 = frame.pop()?.as_int();
                let value1 = frame.pop()?.as_int();
                let jump = match opcode {
                    Opcode::IfIcmpeq => value1 == value2,
                    Opcode::IfIcmpne => value1 != value2,
                    Opcode::IfIcmplt => value1 < value2,
                    Opcode::IfIcmpge => value1 >= value2,
                    Opcode::IfIcmpgt => value1 > value2,
                    _ => value1 <= value2,
                };
                if jump {
                    pc = usize::from(target);
                }
            }
            Opcode::IfAcmpeq | Opcode::IfAcmpne => {
                let target = read_u16(code, &mut pc)?;
                let value2 = frame.pop()?.as_reference();
                let value1 = frame.pop()?.as_reference();
                let jump = if opcode == Opcode::IfAcmpeq {
                    value1 == value2
                } else {
                    value1 != value2
                };
                if jump {
                    pc = usize::from(target);
                }
            }
            Opcode::Ifnull | Opcode::Ifnonnull => {
                let target = read_u16(code, &mut pc)?;
                let reference = frame.pop()?.as_reference();
                let jump = if opcode == Opcode::Ifnull {
                    reference.is_null()
                } else {
                    !reference.is_null()
                };
                if jump {
                    pc = usize::from(target);
                }
            }
            Opcode::Goto => {
                let target = read_u16(code, &mut pc)?;
                pc = usize::from(target);
            }
            Opcode::Tableswitch => {
                let high = read_i32(code, &mut pc)?;
                let low = read_i32(code, &mut pc)?;
                let default = read_u16(code, &mut pc)?;
                let size = read_u32(code, &mut pc)?;
                let table_start = pc;
                pc += size as usize * 2;
                let index = frame.pop()?.as_int();
                if index < low || index > high {
                    pc = usize::from(default);
                } else {
                    let mut slot = table_start
                        + usize::try_from(index - low).map_err(|_| {
                            crate::Error::InvalidTrampoline("switch index underflow".to_string())
                        })? * 2;
                    let target = read_u16(code, &mut slot)?;
                    pc = usize::from(target);
                }
            }
            Opcode::Ret => return Ok(frame.pop()?),
            Opcode::RetVoid => return Ok(Value::NULL),
            Opcode::Getstatic => {
                let field = trampoline.field_at(read_u32(code, &mut pc)?)?;
                object::getstatic(vm, frame, field)?;
            }
            Opcode::Putstatic => {
                let field = trampoline.field_at(read_u32(code, &mut pc)?)?;
                object::putstatic(vm, frame, field)?;
            }
            Opcode::Getfield => {
                let field = trampoline.field_at(read_u32(code, &mut pc)?)?;
                object::getfield(vm, frame, field)?;
            }
            Opcode::Putfield => {
                let field = trampoline.field_at(read_u32(code, &mut pc)?)?;
                object::putfield(vm, frame, field)?;
            }
            Opcode::Invokevirtual | Opcode::Invokeinterface => {
                let method = trampoline.method_at(read_u32(code, &mut pc)?)?.clone();
                invoke::invokevirtual(vm, frame, &method)?;
            }
            Opcode::Invokespecial => {
                let method = trampoline.method_at(read_u32(code, &mut pc)?)?.clone();
                invoke::invokespecial(vm, frame, &method)?;
            }
            Opcode::Invokestatic => {
                let method = trampoline.method_at(read_u32(code, &mut pc)?)?.clone();
                invoke::invokestatic(vm, frame, &method)?;
            }
            Opcode::New => {
                let klass = trampoline.klass_at(read_u32(code, &mut pc)?)?.clone();
                object::new(vm, frame, &klass)?;
            }
            Opcode::Newarray => {
                let atype = read_u8(code, &mut pc)?;
                object::newarray(vm, frame, atype)?;
            }
            Opcode::Anewarray => {
                let klass = trampoline.klass_at(read_u32(code, &mut pc)?)?.clone();
                object::anewarray(vm, frame, &klass)?;
            }
            Opcode::Multianewarray => {
                let _klass = trampoline.klass_at(read_u32(code, &mut pc)?)?;
                let _dimensions = read_u8(code, &mut pc)?;
                return Err(UnsupportedInstruction("multianewarray".to_string()));
            }
            Opcode::Arraylength => object::arraylength(vm, frame)?,
            Opcode::Athrow => return Err(UnsupportedInstruction("athrow".to_string())),
            Opcode::Checkcast => {
                let klass = trampoline.klass_at(read_u32(code, &mut pc)?)?.clone();
                object::checkcast(vm, frame, &klass)?;
            }
            Opcode::Instanceof => {
                let klass = trampoline.klass_at(read_u32(code, &mut pc)?)?.clone();
                object::instanceof(vm, frame, &klass)?;
            }
            Opcode::Monitorenter => object::monitorenter(vm, frame)?,
            Opcode::Monitorexit => object::monitorexit(vm, frame)?,
        }
        frame.set_pc(
            u16::try_from(pc).map_err(|_| InvalidProgramCounter(u16::MAX))?,
        );
    }
}

fn binary_int(frame: &mut Frame, op: impl FnOnce(i32, i32) -> Result<i32>) -> Result<()> {
    let value2 = frame.pop()?.as_int();
    let value1 = frame.pop()?.as_int();
    frame.push(Value::from_int(op(value1, value2)?));
    Ok(())
}

fn binary_long(frame: &mut Frame, op: impl FnOnce(i64, i64) -> Result<i64>) -> Result<()> {
    let value2 = frame.pop()?.as_long();
    let value1 = frame.pop()?.as_long();
    frame.push(Value::from_long(op(value1, value2)?));
    Ok(())
}

fn binary_float(frame: &mut Frame, op: impl FnOnce(f32, f32) -> f32) -> Result<()> {
    let value2 = frame.pop()?.as_float();
    let value1 = frame.pop()?.as_float();
    frame.push(Value::from_float(op(value1, value2)));
    Ok(())
}

fn binary_double(frame: &mut Frame, op: impl FnOnce(f64, f64) -> f64) -> Result<()> {
    let value2 = frame.pop()?.as_double();
    let value1 = frame.pop()?.as_double();
    frame.push(Value::from_double(op(value1, value2)));
    Ok(())
}

/// Shift counts use only the low 5 bits for 32-bit shifts.
fn shift_int(frame: &mut Frame, op: impl FnOnce(i32, u32) -> i32) -> Result<()> {
    let count = frame.pop()?.as_int() as u32 & 0x1f;
    let value = frame.pop()?.as_int();
    frame.push(Value::from_int(op(value, count)));
    Ok(())
}

/// Shift counts use only the low 6 bits for 64-bit shifts.
fn shift_long(frame: &mut Frame, op: impl FnOnce(i64, u32) -> i64) -> Result<()> {
    let count = frame.pop()?.as_int() as u32 & 0x3f;
    let value = frame.pop()?.as_long();
    frame.push(Value::from_long(op(value, count)));
    Ok(())
}

/// The unordered case is decided before the ordered comparisons so NaN
/// operands always yield the opcode's NaN result.
fn fcmp(frame: &mut Frame, nan_result: i32) -> Result<()> {
    let value2 = frame.pop()?.as_float();
    let value1 = frame.pop()?.as_float();
    let result = if value1.is_nan() || value2.is_nan() {
        nan_result
    } else if value1 > value2 {
        1
    } else if value1 < value2 {
        -1
    } else {
        0
    };
    frame.push(Value::from_int(result));
    Ok(())
}

fn dcmp(frame: &mut Frame, nan_result: i32) -> Result<()> {
    let value2 = frame.pop()?.as_double();
    let value1 = frame.pop()?.as_double();
    let result = if value1.is_nan() || value2.is_nan() {
        nan_result
    } else if value1 > value2 {
        1
    } else if value1 < value2 {
        -1
    } else {
        0
    };
    frame.push(Value::from_int(result));
    Ok(())
}
