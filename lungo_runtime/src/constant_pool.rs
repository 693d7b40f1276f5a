use crate::Error::{InvalidConstant, InvalidConstantIndex};
use crate::{Field, Klass, Method, Result};
use std::fmt;
use std::sync::Arc;

/// A single resolved constant pool entry.
///
/// Symbolic references have already been resolved to direct handles by the
/// class loading collaborator; the translator embeds the handles into the
/// lowered instruction stream without further lookups.
#[derive(Clone, Debug)]
pub enum PoolEntry {
    Integer(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    String(String),
    Class(Arc<Klass>),
    Field(Arc<Field>),
    Method(Arc<Method>),
}

impl fmt::Display for PoolEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PoolEntry::Integer(value) => write!(f, "Integer {value}"),
            PoolEntry::Long(value) => write!(f, "Long {value}"),
            PoolEntry::Float(value) => write!(f, "Float {value}"),
            PoolEntry::Double(value) => write!(f, "Double {value}"),
            PoolEntry::String(value) => write!(f, "String {value:?}"),
            PoolEntry::Class(klass) => write!(f, "Class {}", klass.name()),
            PoolEntry::Field(field) => write!(f, "Field {field}"),
            PoolEntry::Method(method) => write!(f, "Method {method}"),
        }
    }
}

impl PoolEntry {
    fn kind(&self) -> &'static str {
        match self {
            PoolEntry::Integer(_) => "Integer",
            PoolEntry::Long(_) => "Long",
            PoolEntry::Float(_) => "Float",
            PoolEntry::Double(_) => "Double",
            PoolEntry::String(_) => "String",
            PoolEntry::Class(_) => "Class",
            PoolEntry::Field(_) => "Field",
            PoolEntry::Method(_) => "Method",
        }
    }
}

/// A per-class table of resolved constants, indexed by the one-based `u16`
/// indices that appear in source bytecode.
#[derive(Clone, Debug, Default)]
pub struct RuntimeConstantPool {
    entries: Vec<PoolEntry>,
}

impl RuntimeConstantPool {
    /// Create an empty constant pool.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an entry, returning its one-based index.
    pub fn add(&mut self, entry: PoolEntry) -> u16 {
        self.entries.push(entry);
        u16::try_from(self.entries.len()).unwrap_or(u16::MAX)
    }

    /// The number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the pool is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Get an entry by its one-based index.
    ///
    /// # Errors
    ///
    /// if the index is zero or past the end of the pool.
    pub fn try_get(&self, index: u16) -> Result<&PoolEntry> {
        index
            .checked_sub(1)
            .and_then(|index| self.entries.get(usize::from(index)))
            .ok_or(InvalidConstantIndex(index))
    }

    /// Get a class entry.
    ///
    /// # Errors
    ///
    /// if the index is invalid or the entry is not a class.
    pub fn try_get_class(&self, index: u16) -> Result<&Arc<Klass>> {
        match self.try_get(index)? {
            PoolEntry::Class(klass) => Ok(klass),
            entry => Err(InvalidConstant {
                expected: "Class".to_string(),
                actual: entry.kind().to_string(),
            }),
        }
    }

    /// Get a field entry.
    ///
    /// # Errors
    ///
    /// if the index is invalid or the entry is not a field.
    pub fn try_get_field(&self, index: u16) -> Result<&Arc<Field>> {
        match self.try_get(index)? {
            PoolEntry::Field(field) => Ok(field),
            entry => Err(InvalidConstant {
                expected: "Field".to_string(),
                actual: entry.kind().to_string(),
            }),
        }
    }

    /// Get a method entry.
    ///
    /// # Errors
    ///
    /// if the index is invalid or the entry is not a method.
    pub fn try_get_method(&self, index: u16) -> Result<&Arc<Method>> {
        match self.try_get(index)? {
            PoolEntry::Method(method) => Ok(method),
            entry => Err(InvalidConstant {
                expected: "Method".to_string(),
                actual: entry.kind().to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_and_get() -> Result<()> {
        let mut pool = RuntimeConstantPool::new();
        let index = pool.add(PoolEntry::Integer(42));
        assert_eq!(1, index);
        assert!(matches!(pool.try_get(index)?, PoolEntry::Integer(42)));
        Ok(())
    }

    #[test]
    fn test_index_zero_is_invalid() {
        let pool = RuntimeConstantPool::new();
        assert!(pool.try_get(0).is_err());
    }

    #[test]
    fn test_index_past_end_is_invalid() {
        let mut pool = RuntimeConstantPool::new();
        pool.add(PoolEntry::Integer(1));
        assert!(pool.try_get(2).is_err());
    }

    #[test]
    fn test_kind_mismatch() {
        let mut pool = RuntimeConstantPool::new();
        let index = pool.add(PoolEntry::Integer(1));
        assert!(pool.try_get_class(index).is_err());
        assert!(pool.try_get_field(index).is_err());
        assert!(pool.try_get_method(index).is_err());
    }
}
