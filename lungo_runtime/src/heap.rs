use crate::Error::{InternalError, InvalidReference, OutOfMemory};
use crate::{Error, Klass, Monitor, Reference, Result, Value};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// The element kind of an array.
///
/// Primitive kinds carry the `newarray` type tag semantics; reference arrays
/// carry their component class for store checks.
#[derive(Clone, Debug)]
pub enum ArrayComponent {
    Boolean,
    Char,
    Float,
    Double,
    Byte,
    Short,
    Int,
    Long,
    Reference(Arc<Klass>),
}

impl ArrayComponent {
    /// Map a `newarray` primitive type tag to a component kind.
    ///
    /// # Errors
    ///
    /// if the tag is not one of the defined primitive array types.
    pub fn from_atype(atype: u8) -> Result<Self> {
        match atype {
            4 => Ok(ArrayComponent::Boolean),
            5 => Ok(ArrayComponent::Char),
            6 => Ok(ArrayComponent::Float),
            7 => Ok(ArrayComponent::Double),
            8 => Ok(ArrayComponent::Byte),
            9 => Ok(ArrayComponent::Short),
            10 => Ok(ArrayComponent::Int),
            11 => Ok(ArrayComponent::Long),
            _ => Err(InternalError(format!("invalid array type tag {atype}"))),
        }
    }

    /// Narrow a cell to the component kind before it is stored, so that
    /// reads observe the element type's range.
    fn coerce(&self, value: Value) -> Value {
        match self {
            ArrayComponent::Boolean => Value::from_int(value.as_int() & 1),
            ArrayComponent::Byte => Value::from_int(i32::from(value.as_int() as i8)),
            ArrayComponent::Char => Value::from_int(i32::from(value.as_int() as u16)),
            ArrayComponent::Short => Value::from_int(i32::from(value.as_int() as i16)),
            ArrayComponent::Int
            | ArrayComponent::Long
            | ArrayComponent::Float
            | ArrayComponent::Double
            | ArrayComponent::Reference(_) => value,
        }
    }

    /// The component class of a reference array.
    #[must_use]
    pub fn klass(&self) -> Option<&Arc<Klass>> {
        match self {
            ArrayComponent::Reference(klass) => Some(klass),
            _ => None,
        }
    }
}

/// The payload of a heap entry.
#[derive(Debug)]
pub enum HeapData {
    /// A class instance with one cell per instance field slot.
    Object {
        klass: Arc<Klass>,
        fields: RwLock<Vec<Value>>,
    },
    /// A primitive or reference array.
    Array {
        component: ArrayComponent,
        elements: RwLock<Vec<Value>>,
    },
    /// An interned string constant.
    String(String),
}

/// A single allocated object, array, or interned string, together with its
/// monitor.
#[derive(Debug)]
pub struct HeapEntry {
    reference: Reference,
    monitor: Monitor,
    data: HeapData,
}

impl HeapEntry {
    /// The reference this entry was allocated under.
    #[must_use]
    pub fn reference(&self) -> Reference {
        self.reference
    }

    /// The monitor guarding this entry.
    #[must_use]
    pub fn monitor(&self) -> &Monitor {
        &self.monitor
    }

    /// The entry payload.
    #[must_use]
    pub fn data(&self) -> &HeapData {
        &self.data
    }

    /// The class of a class instance; arrays and strings have none.
    #[must_use]
    pub fn klass(&self) -> Option<Arc<Klass>> {
        match &self.data {
            HeapData::Object { klass, .. } => Some(klass.clone()),
            HeapData::Array { .. } | HeapData::String(_) => None,
        }
    }

    /// Read an instance field slot.
    ///
    /// # Errors
    ///
    /// if the entry is not an object or the offset is out of range.
    pub fn field(&self, offset: u16) -> Result<Value> {
        match &self.data {
            HeapData::Object { fields, .. } => fields
                .read()
                .get(usize::from(offset))
                .copied()
                .ok_or(Error::InvalidFieldOffset(offset)),
            _ => Err(InternalError(format!(
                "{} is not an object",
                self.reference
            ))),
        }
    }

    /// Write an instance field slot.
    ///
    /// # Errors
    ///
    /// if the entry is not an object or the offset is out of range.
    pub fn set_field(&self, offset: u16, value: Value) -> Result<()> {
        match &self.data {
            HeapData::Object { fields, .. } => {
                let mut fields = fields.write();
                let slot = fields
                    .get_mut(usize::from(offset))
                    .ok_or(Error::InvalidFieldOffset(offset))?;
                *slot = value;
                Ok(())
            }
            _ => Err(InternalError(format!(
                "{} is not an object",
                self.reference
            ))),
        }
    }

    /// The array length.
    ///
    /// # Errors
    ///
    /// if the entry is not an array.
    pub fn array_length(&self) -> Result<usize> {
        match &self.data {
            HeapData::Array { elements, .. } => Ok(elements.read().len()),
            _ => Err(InternalError(format!("{} is not an array", self.reference))),
        }
    }

    /// The array component kind.
    #[must_use]
    pub fn array_component(&self) -> Option<&ArrayComponent> {
        match &self.data {
            HeapData::Array { component, .. } => Some(component),
            _ => None,
        }
    }

    /// Read an array element.
    ///
    /// # Errors
    ///
    /// if the entry is not an array or the index is out of bounds.
    pub fn array_get(&self, index: usize) -> Result<Value> {
        match &self.data {
            HeapData::Array { elements, .. } => {
                let elements = elements.read();
                elements
                    .get(index)
                    .copied()
                    .ok_or_else(|| Error::InvalidArrayIndex {
                        index: i32::try_from(index).unwrap_or(i32::MAX),
                        length: elements.len(),
                    })
            }
            _ => Err(InternalError(format!("{} is not an array", self.reference))),
        }
    }

    /// Write an array element, narrowing the cell to the component kind.
    ///
    /// # Errors
    ///
    /// if the entry is not an array or the index is out of bounds.
    pub fn array_set(&self, index: usize, value: Value) -> Result<()> {
        match &self.data {
            HeapData::Array {
                component,
                elements,
            } => {
                let mut elements = elements.write();
                let length = elements.len();
                let slot = elements
                    .get_mut(index)
                    .ok_or_else(|| Error::InvalidArrayIndex {
                        index: i32::try_from(index).unwrap_or(i32::MAX),
                        length,
                    })?;
                *slot = component.coerce(value);
                Ok(())
            }
            _ => Err(InternalError(format!("{} is not an array", self.reference))),
        }
    }

    /// The interned string value, if this entry is a string.
    #[must_use]
    pub fn string(&self) -> Option<&str> {
        match &self.data {
            HeapData::String(value) => Some(value),
            _ => None,
        }
    }
}

/// The allocation facade over the garbage-collected heap collaborator.
///
/// Entries are arena-allocated and addressed by stable [`Reference`] handles;
/// collection is out of scope here, so the arena only grows, bounded by the
/// configured entry budget.
#[derive(Debug)]
pub struct Heap {
    entries: RwLock<Vec<Arc<HeapEntry>>>,
    strings: Mutex<HashMap<String, Reference>>,
    max_entries: usize,
}

impl Default for Heap {
    fn default() -> Self {
        Heap::new(Heap::DEFAULT_MAX_ENTRIES)
    }
}

impl Heap {
    /// The default heap entry budget.
    pub const DEFAULT_MAX_ENTRIES: usize = 1 << 20;

    /// Create a heap with the given entry budget.
    #[must_use]
    pub fn new(max_entries: usize) -> Self {
        Heap {
            entries: RwLock::new(Vec::new()),
            strings: Mutex::new(HashMap::new()),
            max_entries,
        }
    }

    /// The number of live entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Check if the heap is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    fn allocate(&self, data: HeapData) -> Result<Reference> {
        let mut entries = self.entries.write();
        if entries.len() >= self.max_entries {
            return Err(OutOfMemory(format!(
                "heap budget of {} entries exhausted",
                self.max_entries
            )));
        }
        let raw = u32::try_from(entries.len() + 1)
            .map_err(|_| OutOfMemory("heap reference space exhausted".to_string()))?;
        let reference = Reference::new(raw);
        entries.push(Arc::new(HeapEntry {
            reference,
            monitor: Monitor::new(),
            data,
        }));
        Ok(reference)
    }

    /// Allocate a zeroed instance of the given class.
    ///
    /// # Errors
    ///
    /// if the heap budget is exhausted.
    pub fn new_object(&self, klass: &Arc<Klass>) -> Result<Reference> {
        let fields = vec![Value::NULL; klass.instance_slots()];
        self.allocate(HeapData::Object {
            klass: klass.clone(),
            fields: RwLock::new(fields),
        })
    }

    /// Allocate a zeroed array with the given component kind and length.
    ///
    /// # Errors
    ///
    /// if the heap budget is exhausted.
    pub fn new_array(&self, component: ArrayComponent, length: usize) -> Result<Reference> {
        self.allocate(HeapData::Array {
            component,
            elements: RwLock::new(vec![Value::NULL; length]),
        })
    }

    /// Return the canonical reference for a string constant, allocating it on
    /// first use.
    ///
    /// # Errors
    ///
    /// if the heap budget is exhausted.
    pub fn intern_string(&self, value: &str) -> Result<Reference> {
        let mut strings = self.strings.lock();
        if let Some(reference) = strings.get(value) {
            return Ok(*reference);
        }
        let reference = self.allocate(HeapData::String(value.to_string()))?;
        strings.insert(value.to_string(), reference);
        Ok(reference)
    }

    /// Resolve a reference to its heap entry.
    ///
    /// # Errors
    ///
    /// if the reference is null or does not address a live entry.
    pub fn entry(&self, reference: Reference) -> Result<Arc<HeapEntry>> {
        let index = reference
            .as_u32()
            .checked_sub(1)
            .ok_or(InvalidReference(reference.as_u32()))?;
        self.entries
            .read()
            .get(index as usize)
            .cloned()
            .ok_or(InvalidReference(reference.as_u32()))
    }

    /// Read back an interned string.
    ///
    /// # Errors
    ///
    /// if the reference does not address a string entry.
    pub fn string_value(&self, reference: Reference) -> Result<String> {
        let entry = self.entry(reference)?;
        entry
            .string()
            .map(ToString::to_string)
            .ok_or_else(|| InternalError(format!("{reference} is not a string")))
    }
}

impl fmt::Display for Heap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "heap({} entries)", self.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{FieldAccessFlags, JvmType};

    #[test]
    fn test_new_object() -> Result<()> {
        let klass = Klass::builder("Point")
            .field("x", JvmType::Int, FieldAccessFlags::default())
            .field("y", JvmType::Int, FieldAccessFlags::default())
            .build()?;
        let heap = Heap::default();
        let reference = heap.new_object(&klass)?;
        let entry = heap.entry(reference)?;
        assert_eq!("Point", entry.klass().expect("klass").name());
        assert_eq!(0, entry.field(0)?.as_int());
        entry.set_field(1, Value::from_int(7))?;
        assert_eq!(7, entry.field(1)?.as_int());
        assert!(entry.field(2).is_err());
        Ok(())
    }

    #[test]
    fn test_new_array() -> Result<()> {
        let heap = Heap::default();
        let reference = heap.new_array(ArrayComponent::Int, 3)?;
        let entry = heap.entry(reference)?;
        assert_eq!(3, entry.array_length()?);
        entry.array_set(2, Value::from_int(42))?;
        assert_eq!(42, entry.array_get(2)?.as_int());
        assert!(entry.array_get(3).is_err());
        assert!(entry.array_set(3, Value::NULL).is_err());
        Ok(())
    }

    #[test]
    fn test_byte_array_narrowing() -> Result<()> {
        let heap = Heap::default();
        let reference = heap.new_array(ArrayComponent::Byte, 1)?;
        let entry = heap.entry(reference)?;
        entry.array_set(0, Value::from_int(0x1ff))?;
        assert_eq!(-1, entry.array_get(0)?.as_int());
        Ok(())
    }

    #[test]
    fn test_char_array_narrowing() -> Result<()> {
        let heap = Heap::default();
        let reference = heap.new_array(ArrayComponent::Char, 1)?;
        let entry = heap.entry(reference)?;
        entry.array_set(0, Value::from_int(-1))?;
        assert_eq!(0xffff, entry.array_get(0)?.as_int());
        Ok(())
    }

    #[test]
    fn test_atype_mapping() -> Result<()> {
        assert!(matches!(
            ArrayComponent::from_atype(10)?,
            ArrayComponent::Int
        ));
        assert!(matches!(
            ArrayComponent::from_atype(4)?,
            ArrayComponent::Boolean
        ));
        assert!(ArrayComponent::from_atype(3).is_err());
        assert!(ArrayComponent::from_atype(12).is_err());
        Ok(())
    }

    #[test]
    fn test_budget_exhaustion() -> Result<()> {
        let heap = Heap::new(1);
        heap.new_array(ArrayComponent::Int, 0)?;
        let result = heap.new_array(ArrayComponent::Int, 0);
        assert!(matches!(result, Err(OutOfMemory(_))));
        Ok(())
    }

    #[test]
    fn test_intern_string() -> Result<()> {
        let heap = Heap::default();
        let first = heap.intern_string("hello")?;
        let second = heap.intern_string("hello")?;
        let other = heap.intern_string("world")?;
        assert_eq!(first, second);
        assert_ne!(first, other);
        assert_eq!("hello", heap.string_value(first)?);
        Ok(())
    }

    #[test]
    fn test_null_reference_is_invalid() {
        let heap = Heap::default();
        assert!(heap.entry(Reference::NULL).is_err());
    }
}
