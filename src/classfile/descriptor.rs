//! Field and method descriptors, plus name form conversions.

use std::fmt;

use crate::error::{Error, Result};

/// Dot separated binary name from an internal (slash separated) name.
pub fn binary_name(internal_name: &str) -> String {
    internal_name.replace('/', ".")
}

/// Binary name from a reference type descriptor (`Lcom/example/Foo;`).
/// Other descriptors are returned unchanged.
pub fn descriptor_binary_name(descriptor: &str) -> String {
    descriptor
        .strip_prefix('L')
        .and_then(|rest| rest.strip_suffix(';'))
        .map(binary_name)
        .unwrap_or_else(|| descriptor.to_string())
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum FieldType {
    /// One of `B C D F I J S Z`.
    Base(char),
    /// Internal class name.
    Object(String),
    Array(Box<FieldType>),
}

impl FieldType {
    pub fn object(internal_name: impl Into<String>) -> Self {
        FieldType::Object(internal_name.into())
    }

    /// Local variable slots the value occupies.
    pub fn slots(&self) -> u16 {
        match self {
            FieldType::Base('J') | FieldType::Base('D') => 2,
            _ => 1,
        }
    }

    /// `xload` opcode for a value of this type.
    pub(crate) fn load_opcode(&self) -> u8 {
        match self {
            FieldType::Base('J') => crate::opcodes::LLOAD,
            FieldType::Base('F') => crate::opcodes::FLOAD,
            FieldType::Base('D') => crate::opcodes::DLOAD,
            FieldType::Base(_) => crate::opcodes::ILOAD,
            FieldType::Object(_) | FieldType::Array(_) => crate::opcodes::ALOAD,
        }
    }

    /// `xreturn` opcode for a value of this type.
    pub(crate) fn return_opcode(&self) -> u8 {
        match self {
            FieldType::Base('J') => crate::opcodes::LRETURN,
            FieldType::Base('F') => crate::opcodes::FRETURN,
            FieldType::Base('D') => crate::opcodes::DRETURN,
            FieldType::Base(_) => crate::opcodes::IRETURN,
            FieldType::Object(_) | FieldType::Array(_) => crate::opcodes::ARETURN,
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldType::Base(tag) => write!(f, "{tag}"),
            FieldType::Object(name) => write!(f, "L{name};"),
            FieldType::Array(component) => write!(f, "[{component}"),
        }
    }
}

/// Parsed method descriptor. A `None` return type is `void`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct MethodDescriptor {
    pub parameters: Vec<FieldType>,
    pub return_type: Option<FieldType>,
}

impl MethodDescriptor {
    pub fn parse(descriptor: &str) -> Result<Self> {
        let invalid = || Error::malformed(format!("invalid method descriptor {descriptor:?}"));
        let rest = descriptor.strip_prefix('(').ok_or_else(invalid)?;
        let (params, ret) = rest.split_once(')').ok_or_else(invalid)?;

        let mut parameters = Vec::new();
        let mut remaining = params;
        while !remaining.is_empty() {
            let (field, tail) = parse_field_type(remaining).ok_or_else(invalid)?;
            parameters.push(field);
            remaining = tail;
        }

        let return_type = if ret == "V" {
            None
        } else {
            match parse_field_type(ret) {
                Some((field, "")) => Some(field),
                _ => return Err(invalid()),
            }
        };
        Ok(Self {
            parameters,
            return_type,
        })
    }

    /// Total argument slots, excluding any receiver.
    pub fn parameter_slots(&self) -> u16 {
        self.parameters.iter().map(FieldType::slots).sum()
    }

    /// Same shape with `receiver` prepended as the first parameter.
    pub fn with_receiver(&self, receiver: FieldType) -> Self {
        let mut parameters = Vec::with_capacity(self.parameters.len() + 1);
        parameters.push(receiver);
        parameters.extend(self.parameters.iter().cloned());
        Self {
            parameters,
            return_type: self.return_type.clone(),
        }
    }
}

impl fmt::Display for MethodDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for parameter in &self.parameters {
            write!(f, "{parameter}")?;
        }
        write!(f, ")")?;
        match &self.return_type {
            Some(field) => write!(f, "{field}"),
            None => write!(f, "V"),
        }
    }
}

fn parse_field_type(input: &str) -> Option<(FieldType, &str)> {
    let mut chars = input.chars();
    let tag = chars.next()?;
    match tag {
        'B' | 'C' | 'D' | 'F' | 'I' | 'J' | 'S' | 'Z' => Some((FieldType::Base(tag), chars.as_str())),
        'L' => {
            let rest = chars.as_str();
            let end = rest.find(';')?;
            if end == 0 {
                return None;
            }
            Some((FieldType::Object(rest[..end].to_string()), &rest[end + 1..]))
        }
        '[' => {
            let (component, rest) = parse_field_type(chars.as_str())?;
            Some((FieldType::Array(Box::new(component)), rest))
        }
        _ => None,
    }
}
