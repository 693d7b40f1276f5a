//! # Lungo VM
//!
//! The execution core of the Lungo virtual machine for Java-style class
//! files.
//!
//! A method's stack-oriented source bytecode is lowered once, on first
//! invocation, into a compact internal instruction stream (the *trampoline*)
//! with constant-pool references resolved to direct handles; the interpreter
//! then runs that stream against per-invocation activation frames drawn from
//! a per-thread pool. Lowering is a two-pass affair: a control-flow scan
//! discovers basic blocks, and a translator walks the blocks emitting
//! type-specialized internal opcodes, backpatching branch offsets once every
//! block's position is known.
//!
//! ## Getting Started
//!
//! ```rust
//! use lungo_vm::{Klass, Method, MethodAccessFlags, Value, Vm};
//!
//! fn main() -> lungo_vm::Result<()> {
//!     // static int add() { return 3 + 4; }
//!     let method = Method::new(
//!         MethodAccessFlags::PUBLIC | MethodAccessFlags::STATIC,
//!         "add",
//!         "()I",
//!         0,
//!         vec![0x06, 0x07, 0x60, 0xac],
//!     )?;
//!     let _klass = Klass::builder("Example").method(&method).build()?;
//!     let vm = Vm::default();
//!     let result = vm.invoke(&method, Vec::new())?;
//!     assert_eq!(7, result.as_int());
//!     Ok(())
//! }
//! ```

mod bytecode;
mod control_flow;
mod error;
mod interpreter;
mod java_error;
mod native;
mod translator;
mod trampoline;
mod vm;

pub use error::{Error, Result};
pub use java_error::JavaError;
pub use native::{NativeContext, NativeMethod, NativeRegistry, jni_symbol};
pub use trampoline::{Opcode, Trampoline};
pub use vm::{Configuration, ConfigurationBuilder, Vm};

pub use lungo_runtime::{
    ArrayComponent, ClassAccessFlags, Field, FieldAccessFlags, Frame, Heap, HeapData, HeapEntry,
    JvmType, Klass, KlassBuilder, Method, MethodAccessFlags, Monitor, PoolEntry, Reference,
    RuntimeConstantPool, Thread, Value,
};
