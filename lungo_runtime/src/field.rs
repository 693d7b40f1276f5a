use crate::Error::InternalError;
use crate::{FieldAccessFlags, JvmType, Klass, Result};
use std::fmt;
use std::sync::{Arc, OnceLock, Weak};

/// A resolved field handle.
///
/// The `offset` indexes either the declaring class's static value storage
/// (static fields) or the per-object slot storage (instance fields).
pub struct Field {
    name: String,
    field_type: JvmType,
    access_flags: FieldAccessFlags,
    offset: u16,
    owner: OnceLock<Weak<Klass>>,
}

impl Field {
    pub(crate) fn new(
        name: String,
        field_type: JvmType,
        access_flags: FieldAccessFlags,
        offset: u16,
    ) -> Self {
        Self {
            name,
            field_type,
            access_flags,
            offset,
            owner: OnceLock::new(),
        }
    }

    /// Get the field name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the field type.
    #[must_use]
    pub fn field_type(&self) -> JvmType {
        self.field_type
    }

    /// Get the field access flags.
    #[must_use]
    pub fn access_flags(&self) -> &FieldAccessFlags {
        &self.access_flags
    }

    /// Check if the field is static.
    #[must_use]
    pub fn is_static(&self) -> bool {
        self.access_flags.contains(FieldAccessFlags::STATIC)
    }

    /// The slot this field occupies in its storage.
    #[must_use]
    pub fn offset(&self) -> u16 {
        self.offset
    }

    pub(crate) fn bind(&self, owner: Weak<Klass>) {
        let _ = self.owner.set(owner);
    }

    /// Get the class that declares this field.
    ///
    /// # Errors
    ///
    /// if the field has not been bound to a class or the class was dropped.
    pub fn klass(&self) -> Result<Arc<Klass>> {
        self.owner
            .get()
            .and_then(Weak::upgrade)
            .ok_or_else(|| InternalError(format!("field {} is not bound to a class", self.name)))
    }
}

impl fmt::Debug for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Field")
            .field("name", &self.name)
            .field("field_type", &self.field_type)
            .field("access_flags", &self.access_flags)
            .field("offset", &self.offset)
            .finish_non_exhaustive()
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.field_type, self.name)
    }
}
