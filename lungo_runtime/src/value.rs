use std::fmt;

/// An interned heap handle. The zero handle is the null reference; any other
/// value indexes an entry in the [`Heap`](crate::Heap) that produced it.
///
/// Handles are stable for the lifetime of the heap, so they can be embedded
/// directly in translated instruction streams.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub struct Reference(u32);

impl Reference {
    /// The null reference.
    pub const NULL: Reference = Reference(0);

    pub(crate) fn new(raw: u32) -> Self {
        Reference(raw)
    }

    /// Returns true for the null reference.
    #[must_use]
    pub fn is_null(self) -> bool {
        self.0 == 0
    }

    /// The raw handle bits.
    #[must_use]
    pub fn as_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            write!(f, "null")
        } else {
            write!(f, "ref#{}", self.0)
        }
    }
}

/// A uniform 64-bit value cell.
///
/// A cell can hold a 32-bit integer, a 64-bit integer, a 32-bit or 64-bit
/// IEEE-754 float, or a heap [`Reference`]; conversion is by bit-level
/// reinterpretation. Category-2 values (`long`, `double`) occupy a single
/// cell. The cell carries no type tag; the bytecode verifier collaborator
/// guarantees that reads agree with the type of the preceding write.
#[derive(Clone, Copy, Default, Eq, PartialEq)]
#[repr(transparent)]
pub struct Value(u64);

impl Value {
    /// The null reference cell; also the return value of `void` methods.
    pub const NULL: Value = Value(0);

    /// Reconstructs a cell from raw bits, e.g. an immediate read back out of
    /// a translated instruction stream.
    #[must_use]
    pub fn from_bits(bits: u64) -> Self {
        Value(bits)
    }

    /// The raw cell bits.
    #[must_use]
    pub fn bits(self) -> u64 {
        self.0
    }

    #[must_use]
    pub fn from_int(value: i32) -> Self {
        Value(u64::from(value as u32))
    }

    #[must_use]
    pub fn as_int(self) -> i32 {
        self.0 as u32 as i32
    }

    #[must_use]
    pub fn from_long(value: i64) -> Self {
        Value(value as u64)
    }

    #[must_use]
    pub fn as_long(self) -> i64 {
        self.0 as i64
    }

    #[must_use]
    pub fn from_float(value: f32) -> Self {
        Value(u64::from(value.to_bits()))
    }

    #[must_use]
    pub fn as_float(self) -> f32 {
        f32::from_bits(self.0 as u32)
    }

    #[must_use]
    pub fn from_double(value: f64) -> Self {
        Value(value.to_bits())
    }

    #[must_use]
    pub fn as_double(self) -> f64 {
        f64::from_bits(self.0)
    }

    #[must_use]
    pub fn from_reference(reference: Reference) -> Self {
        Value(u64::from(reference.as_u32()))
    }

    #[must_use]
    pub fn as_reference(self) -> Reference {
        Reference::new(self.0 as u32)
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Value({:#018x})", self.0)
    }
}
