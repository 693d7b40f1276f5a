/// Error conditions that a full implementation would deliver as throwable
/// objects on an exception register. Exception tables are out of scope for
/// this core, so these abort the current invocation instead and propagate
/// outward as a failed `execute`.
#[derive(Debug, thiserror::Error)]
pub enum JavaError {
    /// `ArithmeticException`
    ///
    /// # References
    /// - [ArithmeticException](https://docs.oracle.com/en/java/javase/21/docs/api/java.base/java/lang/ArithmeticException.html)
    #[error("{0}")]
    ArithmeticException(String),
    /// `ArrayIndexOutOfBoundsException`
    ///
    /// # References
    /// - [ArrayIndexOutOfBoundsException](https://docs.oracle.com/en/java/javase/21/docs/api/java.base/java/lang/ArrayIndexOutOfBoundsException.html)
    #[error("Index {index} out of bounds for length {length}")]
    ArrayIndexOutOfBoundsException { index: i32, length: usize },
    /// `ClassCastException`
    ///
    /// # References
    /// - [ClassCastException](https://docs.oracle.com/en/java/javase/21/docs/api/java.base/java/lang/ClassCastException.html)
    #[error("class {source_class_name} cannot be cast to class {target_class_name}")]
    ClassCastException {
        source_class_name: String,
        target_class_name: String,
    },
    /// `IllegalMonitorStateException`
    ///
    /// # References
    /// - [IllegalMonitorStateException](https://docs.oracle.com/en/java/javase/21/docs/api/java.base/java/lang/IllegalMonitorStateException.html)
    #[error("{0}")]
    IllegalMonitorStateException(String),
    /// `NegativeArraySizeException`
    ///
    /// # References
    /// - [NegativeArraySizeException](https://docs.oracle.com/en/java/javase/21/docs/api/java.base/java/lang/NegativeArraySizeException.html)
    #[error("{0}")]
    NegativeArraySizeException(i32),
    /// `NullPointerException`
    ///
    /// # References
    /// - [NullPointerException](https://docs.oracle.com/en/java/javase/21/docs/api/java.base/java/lang/NullPointerException.html)
    #[error("{0}")]
    NullPointerException(String),
    /// `OutOfMemoryError`
    ///
    /// # References
    /// - [OutOfMemoryError](https://docs.oracle.com/en/java/javase/21/docs/api/java.base/java/lang/OutOfMemoryError.html)
    #[error("{0}")]
    OutOfMemoryError(String),
    /// `UnsatisfiedLinkError`
    ///
    /// # References
    /// - [UnsatisfiedLinkError](https://docs.oracle.com/en/java/javase/21/docs/api/java.base/java/lang/UnsatisfiedLinkError.html)
    #[error("{0}")]
    UnsatisfiedLinkError(String),
}

impl JavaError {
    /// The class name of the throwable this error maps to.
    #[must_use]
    pub fn class_name(&self) -> &'static str {
        match self {
            JavaError::ArithmeticException(_) => "java/lang/ArithmeticException",
            JavaError::ArrayIndexOutOfBoundsException { .. } => {
                "java/lang/ArrayIndexOutOfBoundsException"
            }
            JavaError::ClassCastException { .. } => "java/lang/ClassCastException",
            JavaError::IllegalMonitorStateException(_) => "java/lang/IllegalMonitorStateException",
            JavaError::NegativeArraySizeException(_) => "java/lang/NegativeArraySizeException",
            JavaError::NullPointerException(_) => "java/lang/NullPointerException",
            JavaError::OutOfMemoryError(_) => "java/lang/OutOfMemoryError",
            JavaError::UnsatisfiedLinkError(_) => "java/lang/UnsatisfiedLinkError",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages() {
        let error = JavaError::ArrayIndexOutOfBoundsException {
            index: 4,
            length: 3,
        };
        assert_eq!("Index 4 out of bounds for length 3", error.to_string());
        assert_eq!(
            "java/lang/ArrayIndexOutOfBoundsException",
            error.class_name()
        );
    }

    #[test]
    fn test_class_cast_message() {
        let error = JavaError::ClassCastException {
            source_class_name: "A".to_string(),
            target_class_name: "B".to_string(),
        };
        assert_eq!("class A cannot be cast to class B", error.to_string());
    }
}
