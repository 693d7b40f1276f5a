//! Method invocation handlers.
//!
//! Each invocation transfers the declared arguments from the caller's operand
//! stack into a fresh frame's locals in reverse pop order, re-enters the
//! backend `execute` for the target, and pushes the result iff the target's
//! return type is non-void. Frames come from and return to the calling
//! thread's pool.

use crate::Error::UnsupportedInstruction;
use crate::Result;
use crate::java_error::JavaError::NullPointerException;
use crate::native::invoke_native;
use crate::vm::Vm;
use lungo_runtime::{Error as RuntimeError, Frame, Method, Thread, Value};
use std::sync::Arc;

/// `invokevirtual` / `invokeinterface`: the immediate is a method
/// description; the concrete target is resolved by `(name, descriptor)` on
/// the runtime class of the receiver.
pub(super) fn invokevirtual(vm: &Vm, frame: &mut Frame, description: &Arc<Method>) -> Result<()> {
    let mut callee = Thread::with_current(|thread| {
        thread.make_frame(description.args_count() + 1)
    });
    let result = virtual_call(vm, frame, description, &mut callee);
    Thread::with_current(|thread| thread.free_frame(callee));
    let value = result?;
    if description.return_type().is_some() {
        frame.push(value);
    }
    Ok(())
}

fn virtual_call(
    vm: &Vm,
    frame: &mut Frame,
    description: &Arc<Method>,
    callee: &mut Frame,
) -> Result<Value> {
    let args_count = description.args_count();
    for index in (1..=args_count).rev() {
        callee.set_local(index, frame.pop()?)?;
    }
    let receiver = frame.pop()?.as_reference();
    if receiver.is_null() {
        return Err(NullPointerException(format!(
            "cannot invoke {} on a null receiver",
            description.name()
        ))
        .into());
    }
    callee.set_local(0, Value::from_reference(receiver))?;

    let klass = vm.heap().entry(receiver)?.klass().ok_or_else(|| {
        RuntimeError::MethodNotFound {
            class_name: "<no class>".to_string(),
            method_name: description.name().to_string(),
            method_descriptor: description.descriptor().to_string(),
        }
    })?;
    let target = klass
        .lookup_method(description.name(), description.descriptor())
        .ok_or_else(|| RuntimeError::MethodNotFound {
            class_name: klass.name().to_string(),
            method_name: description.name().to_string(),
            method_descriptor: description.descriptor().to_string(),
        })?;
    if target.is_native() {
        return Err(UnsupportedInstruction(format!(
            "native instance method {target}"
        )));
    }
    callee.reserve_locals(target.max_locals());
    vm.execute(&target, callee)
}

/// `invokespecial`: the target comes directly from the immediate with no
/// dynamic lookup; constructors, private methods, and super calls.
pub(super) fn invokespecial(vm: &Vm, frame: &mut Frame, target: &Arc<Method>) -> Result<()> {
    let args_count = target.args_count();
    let mut callee = Thread::with_current(|thread| {
        thread.make_frame(target.max_locals().max(args_count + 1))
    });
    let result = special_call(vm, frame, target, &mut callee);
    Thread::with_current(|thread| thread.free_frame(callee));
    let value = result?;
    if target.return_type().is_some() {
        frame.push(value);
    }
    Ok(())
}

fn special_call(
    vm: &Vm,
    frame: &mut Frame,
    target: &Arc<Method>,
    callee: &mut Frame,
) -> Result<Value> {
    if target.is_native() {
        return Err(UnsupportedInstruction(format!(
            "native instance method {target}"
        )));
    }
    let args_count = target.args_count();
    for index in (1..=args_count).rev() {
        callee.set_local(index, frame.pop()?)?;
    }
    let receiver = frame.pop()?.as_reference();
    if receiver.is_null() {
        return Err(NullPointerException(format!(
            "cannot invoke {} on a null receiver",
            target.name()
        ))
        .into());
    }
    callee.set_local(0, Value::from_reference(receiver))?;
    vm.execute(target, callee)
}

/// `invokestatic`: the declaring class is initialized first; targets carrying
/// `ACC_NATIVE` dispatch through the native-call adapter instead of the
/// interpreter.
pub(super) fn invokestatic(vm: &Vm, frame: &mut Frame, target: &Arc<Method>) -> Result<()> {
    let klass = target.klass()?;
    vm.initialize_class(&klass)?;

    if target.is_native() {
        return invoke_native(vm, frame, target);
    }

    let args_count = target.args_count();
    let mut callee = Thread::with_current(|thread| {
        thread.make_frame(target.max_locals().max(args_count))
    });
    let result = static_call(vm, frame, target, &mut callee);
    Thread::with_current(|thread| thread.free_frame(callee));
    let value = result?;
    if target.return_type().is_some() {
        frame.push(value);
    }
    Ok(())
}

fn static_call(
    vm: &Vm,
    frame: &mut Frame,
    target: &Arc<Method>,
    callee: &mut Frame,
) -> Result<Value> {
    for index in (0..target.args_count()).rev() {
        callee.set_local(index, frame.pop()?)?;
    }
    vm.execute(target, callee)
}
