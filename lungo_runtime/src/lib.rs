//! # Lungo Runtime
//!
//! Runtime object model for the Lungo virtual machine: the uniform value
//! cell, resolved class / method / field handles, the heap allocation
//! facade, object monitors, and per-thread activation frames.
//!
//! The types in this crate are produced by the class-file parsing and
//! loading collaborators and consumed by the execution core in `lungo_vm`.

mod access_flags;
mod constant_pool;
mod descriptor;
mod error;
mod field;
mod frame;
mod heap;
mod klass;
mod method;
mod monitor;
mod thread;
mod value;

pub use access_flags::{ClassAccessFlags, FieldAccessFlags, MethodAccessFlags};
pub use constant_pool::{PoolEntry, RuntimeConstantPool};
pub use descriptor::JvmType;
pub use error::{Error, Result};
pub use field::Field;
pub use frame::Frame;
pub use heap::{ArrayComponent, Heap, HeapData, HeapEntry};
pub use klass::{Klass, KlassBuilder};
pub use method::Method;
pub use monitor::Monitor;
pub use thread::Thread;
pub use value::{Reference, Value};
