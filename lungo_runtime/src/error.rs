//! Error handling for the Lungo runtime object model.

/// Lungo runtime result type
///
/// This is a type alias for the standard library's [`Result`](core::result::Result) type with the
/// error type defaulting to [`Error`].
pub type Result<T, E = Error> = core::result::Result<T, E>;

/// Errors surfaced by the runtime object model.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A class initializer failed; later initialization attempts observe this state
    #[error("Class initialization failed: {0}")]
    ClassInitializationFailed(String),
    /// Internal error
    #[error("Internal error: {0}")]
    InternalError(String),
    /// Invalid constant pool entry kind
    #[error("Invalid constant; expected {expected}, found {actual}")]
    InvalidConstant { expected: String, actual: String },
    /// Invalid constant pool index
    #[error("Invalid constant index: {0}")]
    InvalidConstantIndex(u16),
    /// An array index was out of bounds
    #[error("Index {index} out of bounds for length {length}")]
    InvalidArrayIndex { index: i32, length: usize },
    /// Invalid field offset for the storage it indexes
    #[error("Invalid field offset: {0}")]
    InvalidFieldOffset(u16),
    /// Invalid local variable index
    #[error("Invalid local variable index: {0}")]
    InvalidLocalVariableIndex(usize),
    /// A method descriptor could not be parsed
    #[error("Invalid method descriptor: {0}")]
    InvalidMethodDescriptor(String),
    /// A heap reference did not resolve to a live entry
    #[error("Invalid heap reference: {0}")]
    InvalidReference(u32),
    /// A method was not found on a class or any of its superclasses
    #[error("Method not found: {class_name}.{method_name}{method_descriptor}")]
    MethodNotFound {
        class_name: String,
        method_name: String,
        method_descriptor: String,
    },
    /// A monitor operation was attempted by a thread that does not own the monitor
    #[error("Monitor not owned by thread {0}")]
    MonitorNotOwned(u64),
    /// The operand stack underflow
    #[error("Operand stack underflow")]
    OperandStackUnderflow,
    /// The heap budget was exhausted
    #[error("Out of memory: {0}")]
    OutOfMemory(String),
}
