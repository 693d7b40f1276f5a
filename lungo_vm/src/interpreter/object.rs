//! Reference-typed instruction handlers: field access, allocation, arrays,
//! casts, and monitors.

use crate::Result;
use crate::java_error::JavaError::{
    ArrayIndexOutOfBoundsException, ClassCastException, IllegalMonitorStateException,
    NegativeArraySizeException, NullPointerException, OutOfMemoryError,
};
use crate::vm::Vm;
use lungo_runtime::{
    ArrayComponent, Error as RuntimeError, Field, Frame, HeapEntry, Klass, Reference, Thread,
    Value,
};
use std::sync::Arc;

fn non_null(reference: Reference, context: &str) -> Result<Reference> {
    if reference.is_null() {
        return Err(NullPointerException(context.to_string()).into());
    }
    Ok(reference)
}

fn check_bounds(index: i32, length: usize) -> Result<usize> {
    usize::try_from(index)
        .ok()
        .filter(|index| *index < length)
        .ok_or_else(|| ArrayIndexOutOfBoundsException { index, length }.into())
}

/// Allocation failures surface as the out-of-memory throwable.
fn allocation_error(error: RuntimeError) -> crate::Error {
    match error {
        RuntimeError::OutOfMemory(message) => OutOfMemoryError(message).into(),
        error => error.into(),
    }
}

fn class_name_of(entry: &HeapEntry) -> String {
    match entry.klass() {
        Some(klass) => klass.name().to_string(),
        None if entry.array_component().is_some() => "array".to_string(),
        None => "string".to_string(),
    }
}

pub(super) fn array_load(vm: &Vm, frame: &mut Frame) -> Result<()> {
    let index = frame.pop()?.as_int();
    let reference = non_null(frame.pop()?.as_reference(), "array load on null reference")?;
    let entry = vm.heap().entry(reference)?;
    let length = entry.array_length()?;
    let index = check_bounds(index, length)?;
    frame.push(entry.array_get(index)?);
    Ok(())
}

pub(super) fn array_store(vm: &Vm, frame: &mut Frame) -> Result<()> {
    let value = frame.pop()?;
    let index = frame.pop()?.as_int();
    let reference = non_null(
        frame.pop()?.as_reference(),
        "array store on null reference",
    )?;
    let entry = vm.heap().entry(reference)?;
    let length = entry.array_length()?;
    let index = check_bounds(index, length)?;
    entry.array_set(index, value)?;
    Ok(())
}

/// `aastore` additionally checks the stored reference against the array's
/// component class.
pub(super) fn reference_array_store(vm: &Vm, frame: &mut Frame) -> Result<()> {
    let value = frame.pop()?;
    let index = frame.pop()?.as_int();
    let reference = non_null(
        frame.pop()?.as_reference(),
        "array store on null reference",
    )?;
    let entry = vm.heap().entry(reference)?;
    let length = entry.array_length()?;
    let index = check_bounds(index, length)?;

    let stored = value.as_reference();
    if !stored.is_null()
        && let Some(ArrayComponent::Reference(component)) = entry.array_component()
    {
        let stored_entry = vm.heap().entry(stored)?;
        let assignable = stored_entry
            .klass()
            .is_some_and(|klass| klass.is_subclass_of(component));
        if !assignable {
            return Err(ClassCastException {
                source_class_name: class_name_of(&stored_entry),
                target_class_name: component.name().to_string(),
            }
            .into());
        }
    }
    entry.array_set(index, value)?;
    Ok(())
}

pub(super) fn arraylength(vm: &Vm, frame: &mut Frame) -> Result<()> {
    let reference = non_null(frame.pop()?.as_reference(), "arraylength of null reference")?;
    let entry = vm.heap().entry(reference)?;
    let length = i32::try_from(entry.array_length()?)
        .map_err(|_| crate::Error::InternalError("array length overflow".to_string()))?;
    frame.push(Value::from_int(length));
    Ok(())
}

pub(super) fn getstatic(vm: &Vm, frame: &mut Frame, field: &Arc<Field>) -> Result<()> {
    let klass = field.klass()?;
    vm.initialize_class(&klass)?;
    frame.push(klass.static_value(field.offset())?);
    Ok(())
}

pub(super) fn putstatic(vm: &Vm, frame: &mut Frame, field: &Arc<Field>) -> Result<()> {
    let klass = field.klass()?;
    vm.initialize_class(&klass)?;
    let value = frame.pop()?;
    klass.set_static_value(field.offset(), value)?;
    Ok(())
}

pub(super) fn getfield(vm: &Vm, frame: &mut Frame, field: &Arc<Field>) -> Result<()> {
    let reference = non_null(
        frame.pop()?.as_reference(),
        &format!("cannot read field {}", field.name()),
    )?;
    let entry = vm.heap().entry(reference)?;
    frame.push(entry.field(field.offset())?);
    Ok(())
}

pub(super) fn putfield(vm: &Vm, frame: &mut Frame, field: &Arc<Field>) -> Result<()> {
    let value = frame.pop()?;
    let reference = non_null(
        frame.pop()?.as_reference(),
        &format!("cannot assign field {}", field.name()),
    )?;
    let entry = vm.heap().entry(reference)?;
    entry.set_field(field.offset(), value)?;
    Ok(())
}

pub(super) fn new(vm: &Vm, frame: &mut Frame, klass: &Arc<Klass>) -> Result<()> {
    vm.initialize_class(klass)?;
    let reference = vm.heap().new_object(klass).map_err(allocation_error)?;
    frame.push(Value::from_reference(reference));
    Ok(())
}

pub(super) fn newarray(vm: &Vm, frame: &mut Frame, atype: u8) -> Result<()> {
    let count = frame.pop()?.as_int();
    if count < 0 {
        return Err(NegativeArraySizeException(count).into());
    }
    let component = ArrayComponent::from_atype(atype)?;
    let reference = vm
        .heap()
        .new_array(component, count.unsigned_abs() as usize)
        .map_err(allocation_error)?;
    frame.push(Value::from_reference(reference));
    Ok(())
}

pub(super) fn anewarray(vm: &Vm, frame: &mut Frame, klass: &Arc<Klass>) -> Result<()> {
    let count = frame.pop()?.as_int();
    if count < 0 {
        return Err(NegativeArraySizeException(count).into());
    }
    let component = ArrayComponent::Reference(klass.clone());
    let reference = vm
        .heap()
        .new_array(component, count.unsigned_abs() as usize)
        .map_err(allocation_error)?;
    frame.push(Value::from_reference(reference));
    Ok(())
}

/// The reference under test stays on the operand stack; a null reference
/// passes any cast.
pub(super) fn checkcast(vm: &Vm, frame: &mut Frame, klass: &Arc<Klass>) -> Result<()> {
    let reference = frame.top()?.as_reference();
    if reference.is_null() {
        return Ok(());
    }
    let entry = vm.heap().entry(reference)?;
    let assignable = entry
        .klass()
        .is_some_and(|source| source.is_subclass_of(klass));
    if !assignable {
        return Err(ClassCastException {
            source_class_name: class_name_of(&entry),
            target_class_name: klass.name().to_string(),
        }
        .into());
    }
    Ok(())
}

pub(super) fn instanceof(vm: &Vm, frame: &mut Frame, klass: &Arc<Klass>) -> Result<()> {
    let reference = frame.pop()?.as_reference();
    let result = if reference.is_null() {
        0
    } else {
        let entry = vm.heap().entry(reference)?;
        i32::from(
            entry
                .klass()
                .is_some_and(|source| source.is_subclass_of(klass)),
        )
    };
    frame.push(Value::from_int(result));
    Ok(())
}

pub(super) fn monitorenter(vm: &Vm, frame: &mut Frame) -> Result<()> {
    let reference = non_null(frame.pop()?.as_reference(), "monitorenter on null reference")?;
    let entry = vm.heap().entry(reference)?;
    entry.monitor().enter(Thread::current_id());
    Ok(())
}

pub(super) fn monitorexit(vm: &Vm, frame: &mut Frame) -> Result<()> {
    let reference = non_null(frame.pop()?.as_reference(), "monitorexit on null reference")?;
    let entry = vm.heap().entry(reference)?;
    entry.monitor().exit(Thread::current_id()).map_err(|_| {
        IllegalMonitorStateException("current thread does not own the monitor".to_string())
    })?;
    Ok(())
}
