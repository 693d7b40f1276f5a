//! Error handling for the Lungo execution core.
//!
//! The central type is [`Error`]; the module also provides the [`Result`]
//! alias used throughout the crate. Errors are not locally recoverable by the
//! interpreter: each aborts the current invocation and propagates outward as
//! a failed `execute`.

use crate::java_error::JavaError;

/// Lungo VM result type
///
/// This is a type alias for the standard library's [`Result`](core::result::Result) type with the
/// error type defaulting to [`Error`].
pub type Result<T, E = Error> = core::result::Result<T, E>;

/// Errors surfaced by the execution core.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Internal error
    #[error("Internal error: {0}")]
    InternalError(String),
    /// Invalid constant pool entry for the instruction consuming it
    #[error("Invalid constant; expected {expected}, found {actual}")]
    InvalidConstant { expected: String, actual: String },
    /// The program counter does not address an instruction
    #[error("Invalid program counter: {0}")]
    InvalidProgramCounter(u16),
    /// The translated instruction stream is inconsistent
    #[error("Invalid trampoline: {0}")]
    InvalidTrampoline(String),
    /// An error that a full implementation would deliver as a throwable
    #[error(transparent)]
    JavaError(#[from] JavaError),
    /// The scanner or translator cannot decode the source bytecode
    #[error("Malformed bytecode: {0}")]
    MalformedBytecode(String),
    /// An error surfaced by the runtime object model
    #[error(transparent)]
    RuntimeError(#[from] lungo_runtime::Error),
    /// A known instruction that this core does not implement
    #[error("Unsupported instruction: {0}")]
    UnsupportedInstruction(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_runtime_error_conversion() {
        let error = Error::from(lungo_runtime::Error::OperandStackUnderflow);
        assert_eq!("Operand stack underflow", error.to_string());
    }

    #[test]
    fn test_java_error_conversion() {
        let error = Error::from(JavaError::ArithmeticException("/ by zero".to_string()));
        assert_eq!("/ by zero", error.to_string());
    }
}
