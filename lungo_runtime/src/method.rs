use crate::Error::InternalError;
use crate::descriptor::parse_method_descriptor;
use crate::{JvmType, Klass, MethodAccessFlags, Result};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, Weak};

static NEXT_METHOD_ID: AtomicU64 = AtomicU64::new(1);

/// A resolved method handle.
///
/// Methods are immutable after class loading. The raw source bytecode is the
/// classic big-endian stack-machine encoding produced by the class-file
/// parser; the execution core lowers it on first invocation and caches the
/// lowered form keyed by [`Method::id`].
pub struct Method {
    id: u64,
    access_flags: MethodAccessFlags,
    name: String,
    descriptor: String,
    arg_types: Vec<JvmType>,
    return_type: Option<JvmType>,
    max_locals: usize,
    code: Vec<u8>,
    owner: OnceLock<Weak<Klass>>,
}

impl Method {
    /// Create a new method handle.
    ///
    /// # Errors
    ///
    /// if the method descriptor cannot be parsed.
    pub fn new<S: AsRef<str>>(
        access_flags: MethodAccessFlags,
        name: S,
        descriptor: S,
        max_locals: usize,
        code: Vec<u8>,
    ) -> Result<Arc<Self>> {
        let descriptor = descriptor.as_ref();
        let (arg_types, return_type) = parse_method_descriptor(descriptor)?;
        Ok(Arc::new(Self {
            id: NEXT_METHOD_ID.fetch_add(1, Ordering::Relaxed),
            access_flags,
            name: name.as_ref().to_string(),
            descriptor: descriptor.to_string(),
            arg_types,
            return_type,
            max_locals,
            code,
            owner: OnceLock::new(),
        }))
    }

    /// A process-unique identifier, used to key per-method caches.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Get the method access flags.
    #[must_use]
    pub fn access_flags(&self) -> &MethodAccessFlags {
        &self.access_flags
    }

    /// Check if the method is native.
    #[must_use]
    pub fn is_native(&self) -> bool {
        self.access_flags.contains(MethodAccessFlags::NATIVE)
    }

    /// Check if the method is static.
    #[must_use]
    pub fn is_static(&self) -> bool {
        self.access_flags.contains(MethodAccessFlags::STATIC)
    }

    /// Get the method name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the method descriptor.
    #[must_use]
    pub fn descriptor(&self) -> &str {
        &self.descriptor
    }

    /// The declared argument types, in declaration order. The receiver of an
    /// instance method is not part of the descriptor and is not included.
    #[must_use]
    pub fn arg_types(&self) -> &[JvmType] {
        &self.arg_types
    }

    /// The number of declared arguments.
    #[must_use]
    pub fn args_count(&self) -> usize {
        self.arg_types.len()
    }

    /// The declared return type; `None` for `void`.
    #[must_use]
    pub fn return_type(&self) -> Option<JvmType> {
        self.return_type
    }

    /// The number of local variable slots the method requires.
    #[must_use]
    pub fn max_locals(&self) -> usize {
        self.max_locals
    }

    /// The raw source bytecode.
    #[must_use]
    pub fn code(&self) -> &[u8] {
        &self.code
    }

    pub(crate) fn bind(&self, owner: Weak<Klass>) {
        let _ = self.owner.set(owner);
    }

    /// Get the class that declares this method.
    ///
    /// # Errors
    ///
    /// if the method has not been bound to a class or the class was dropped.
    pub fn klass(&self) -> Result<Arc<Klass>> {
        self.owner
            .get()
            .and_then(Weak::upgrade)
            .ok_or_else(|| InternalError(format!("method {} is not bound to a class", self.name)))
    }

    /// The class and method name with descriptor (e.g. `Foo.bar(I)V`).
    #[must_use]
    pub fn identifier(&self) -> String {
        let class_name = self
            .owner
            .get()
            .and_then(Weak::upgrade)
            .map(|klass| klass.name().to_string())
            .unwrap_or_default();
        format!("{class_name}.{}{}", self.name, self.descriptor)
    }
}

impl fmt::Debug for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Method")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("descriptor", &self.descriptor)
            .field("access_flags", &self.access_flags)
            .field("max_locals", &self.max_locals)
            .finish_non_exhaustive()
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.identifier())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new() -> Result<()> {
        let method = Method::new(
            MethodAccessFlags::PUBLIC | MethodAccessFlags::STATIC,
            "add",
            "(II)I",
            2,
            vec![0x1a, 0x1b, 0x60, 0xac],
        )?;
        assert_eq!("add", method.name());
        assert_eq!("(II)I", method.descriptor());
        assert_eq!(2, method.args_count());
        assert_eq!(Some(JvmType::Int), method.return_type());
        assert!(method.is_static());
        assert!(!method.is_native());
        assert_eq!(4, method.code().len());
        Ok(())
    }

    #[test]
    fn test_ids_are_unique() -> Result<()> {
        let first = Method::new(MethodAccessFlags::STATIC, "a", "()V", 0, Vec::new())?;
        let second = Method::new(MethodAccessFlags::STATIC, "b", "()V", 0, Vec::new())?;
        assert_ne!(first.id(), second.id());
        Ok(())
    }

    #[test]
    fn test_unbound_method_has_no_class() -> Result<()> {
        let method = Method::new(MethodAccessFlags::STATIC, "a", "()V", 0, Vec::new())?;
        assert!(method.klass().is_err());
        Ok(())
    }
}
