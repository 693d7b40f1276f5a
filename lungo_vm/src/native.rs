//! The native-call adapter.
//!
//! Static methods carrying `ACC_NATIVE` are implemented outside the bytecode
//! interpreter. Entry points are Rust functions registered under the
//! method's JNI-mangled symbol name; the adapter resolves the symbol, pops
//! the declared arguments from the caller's operand stack into declaration
//! order, invokes the entry point with a context standing in for the JNI
//! environment pointer and the owning class, and pushes the returned cell
//! iff the declared return type is non-void.

use crate::Error::InternalError;
use crate::Result;
use crate::java_error::JavaError::UnsatisfiedLinkError;
use crate::vm::Vm;
use dashmap::DashMap;
use lungo_runtime::{Frame, Heap, Klass, Method, Value};
use std::sync::Arc;
use tracing::debug;

/// The view of the virtual machine handed to native entry points, standing
/// in for the JNI environment pointer.
#[derive(Debug)]
pub struct NativeContext<'a> {
    vm: &'a Vm,
}

impl<'a> NativeContext<'a> {
    pub(crate) fn new(vm: &'a Vm) -> Self {
        NativeContext { vm }
    }

    /// The virtual machine serving this call.
    #[must_use]
    pub fn vm(&self) -> &Vm {
        self.vm
    }

    /// The heap serving this call.
    #[must_use]
    pub fn heap(&self) -> &Heap {
        self.vm.heap()
    }
}

/// A native method entry point. Arguments arrive in declaration order;
/// the return value is pushed onto the caller's operand stack when the
/// method's declared return type is non-void.
pub type NativeMethod =
    fn(context: &NativeContext<'_>, klass: &Arc<Klass>, arguments: &[Value]) -> Result<Option<Value>>;

/// Registry of native entry points keyed by JNI-mangled symbol name.
#[derive(Debug, Default)]
pub struct NativeRegistry {
    methods: DashMap<String, NativeMethod>,
}

impl NativeRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        NativeRegistry::default()
    }

    /// Register an entry point under a symbol, replacing any previous
    /// registration.
    pub fn register<S: Into<String>>(&self, symbol: S, method: NativeMethod) {
        self.methods.insert(symbol.into(), method);
    }

    /// Look up an entry point.
    #[must_use]
    pub fn get(&self, symbol: &str) -> Option<NativeMethod> {
        self.methods.get(symbol).map(|entry| *entry.value())
    }

    /// The number of registered entry points.
    #[must_use]
    pub fn len(&self) -> usize {
        self.methods.len()
    }

    /// Check if the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }
}

/// The JNI short symbol name for a method: `Java_<class>_<method>` with `/`
/// mapped to `_` and the JNI escape sequences applied.
///
/// # Errors
///
/// if the method is not bound to a class.
pub fn jni_symbol(method: &Method) -> Result<String> {
    let klass = method.klass()?;
    Ok(format!(
        "Java_{}_{}",
        mangle(klass.name()),
        mangle(method.name())
    ))
}

fn mangle(name: &str) -> String {
    let mut mangled = String::with_capacity(name.len());
    for character in name.chars() {
        match character {
            '/' => mangled.push('_'),
            '_' => mangled.push_str("_1"),
            ';' => mangled.push_str("_2"),
            '[' => mangled.push_str("_3"),
            character if character.is_ascii_alphanumeric() => mangled.push(character),
            character => {
                mangled.push_str(&format!("_0{:04x}", u32::from(character)));
            }
        }
    }
    mangled
}

/// Dispatch an `ACC_NATIVE` static method through the registry.
pub(crate) fn invoke_native(vm: &Vm, frame: &mut Frame, target: &Arc<Method>) -> Result<()> {
    let symbol = jni_symbol(target)?;
    let Some(native_method) = vm.natives().get(&symbol) else {
        return Err(UnsatisfiedLinkError(symbol).into());
    };

    let args_count = target.args_count();
    let mut arguments = vec![Value::NULL; args_count];
    for index in (0..args_count).rev() {
        arguments[index] = frame.pop()?;
    }

    let klass = target.klass()?;
    debug!("native call {symbol}");
    let context = NativeContext::new(vm);
    let result = native_method(&context, &klass, &arguments)?;
    if target.return_type().is_some() {
        let value = result
            .ok_or_else(|| InternalError(format!("native method {symbol} returned no value")))?;
        frame.push(value);
    }
    Ok(())
}
