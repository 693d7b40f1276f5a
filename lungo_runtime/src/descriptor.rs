use crate::Error::InvalidMethodDescriptor;
use crate::Result;
use std::fmt;
use std::iter::Peekable;
use std::str::Chars;

/// The primitive and reference kinds a value cell can carry.
///
/// Category-2 kinds (`long`, `double`) occupy a single cell in this
/// implementation, so the type carries no width information beyond its kind.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum JvmType {
    Boolean,
    Byte,
    Char,
    Short,
    Int,
    Long,
    Float,
    Double,
    Reference,
}

impl fmt::Display for JvmType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            JvmType::Boolean => "boolean",
            JvmType::Byte => "byte",
            JvmType::Char => "char",
            JvmType::Short => "short",
            JvmType::Int => "int",
            JvmType::Long => "long",
            JvmType::Float => "float",
            JvmType::Double => "double",
            JvmType::Reference => "reference",
        };
        write!(f, "{name}")
    }
}

/// Parses a method descriptor (e.g. `(I[JLjava/lang/String;)V`) into the
/// declared argument types and the return type (`None` for `void`).
///
/// # Errors
///
/// if the descriptor is not a well-formed method descriptor.
pub(crate) fn parse_method_descriptor(descriptor: &str) -> Result<(Vec<JvmType>, Option<JvmType>)> {
    let mut characters = descriptor.chars().peekable();
    if characters.next() != Some('(') {
        return Err(InvalidMethodDescriptor(descriptor.to_string()));
    }

    let mut arg_types = Vec::new();
    loop {
        match characters.peek() {
            Some(')') => {
                characters.next();
                break;
            }
            Some(_) => arg_types.push(parse_type(descriptor, &mut characters)?),
            None => return Err(InvalidMethodDescriptor(descriptor.to_string())),
        }
    }

    let return_type = match characters.peek() {
        Some('V') => {
            characters.next();
            None
        }
        Some(_) => Some(parse_type(descriptor, &mut characters)?),
        None => return Err(InvalidMethodDescriptor(descriptor.to_string())),
    };

    if characters.next().is_some() {
        return Err(InvalidMethodDescriptor(descriptor.to_string()));
    }
    Ok((arg_types, return_type))
}

fn parse_type(descriptor: &str, characters: &mut Peekable<Chars<'_>>) -> Result<JvmType> {
    match characters.next() {
        Some('B') => Ok(JvmType::Byte),
        Some('C') => Ok(JvmType::Char),
        Some('D') => Ok(JvmType::Double),
        Some('F') => Ok(JvmType::Float),
        Some('I') => Ok(JvmType::Int),
        Some('J') => Ok(JvmType::Long),
        Some('S') => Ok(JvmType::Short),
        Some('Z') => Ok(JvmType::Boolean),
        Some('L') => {
            for character in characters.by_ref() {
                if character == ';' {
                    return Ok(JvmType::Reference);
                }
            }
            Err(InvalidMethodDescriptor(descriptor.to_string()))
        }
        Some('[') => {
            // The element type is validated but an array is just a reference.
            parse_type(descriptor, characters)?;
            Ok(JvmType::Reference)
        }
        _ => Err(InvalidMethodDescriptor(descriptor.to_string())),
    }
}
