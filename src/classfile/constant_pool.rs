use crate::classfile::bytes::{
    ByteReader, decode_modified_utf8, encode_modified_utf8, put_u8, put_u16, put_u32, put_u64,
};
use crate::error::{Error, Result};

const TAG_UTF8: u8 = 1;
const TAG_INTEGER: u8 = 3;
const TAG_FLOAT: u8 = 4;
const TAG_LONG: u8 = 5;
const TAG_DOUBLE: u8 = 6;
const TAG_CLASS: u8 = 7;
const TAG_STRING: u8 = 8;
const TAG_FIELD_REF: u8 = 9;
const TAG_METHOD_REF: u8 = 10;
const TAG_INTERFACE_METHOD_REF: u8 = 11;
const TAG_NAME_AND_TYPE: u8 = 12;
const TAG_METHOD_HANDLE: u8 = 15;
const TAG_METHOD_TYPE: u8 = 16;
const TAG_DYNAMIC: u8 = 17;
const TAG_INVOKE_DYNAMIC: u8 = 18;
const TAG_MODULE: u8 = 19;
const TAG_PACKAGE: u8 = 20;

/// Constant pool entry. Indices refer to other pool slots.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Constant {
    /// Raw modified UTF-8 bytes, kept verbatim for lossless writes.
    Utf8(Vec<u8>),
    Integer(u32),
    Float(u32),
    Long(u64),
    Double(u64),
    Class(u16),
    String(u16),
    FieldRef { class: u16, name_and_type: u16 },
    MethodRef { class: u16, name_and_type: u16 },
    InterfaceMethodRef { class: u16, name_and_type: u16 },
    NameAndType { name: u16, descriptor: u16 },
    MethodHandle { kind: u8, reference: u16 },
    MethodType(u16),
    Dynamic { bootstrap: u16, name_and_type: u16 },
    InvokeDynamic { bootstrap: u16, name_and_type: u16 },
    Module(u16),
    Package(u16),
    /// Shadow slot following a Long or Double.
    Unusable,
}

impl Constant {
    fn is_wide(&self) -> bool {
        matches!(self, Constant::Long(_) | Constant::Double(_))
    }
}

/// Resolved field or method reference.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct MemberRef {
    pub owner: String,
    pub name: String,
    pub descriptor: String,
}

/// Constant pool of one class file. Slot 0 is implicit.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ConstantPool {
    entries: Vec<Constant>,
}

impl ConstantPool {
    pub(crate) fn read(reader: &mut ByteReader<'_>) -> Result<Self> {
        let count = reader.u16()?;
        if count == 0 {
            return Err(Error::malformed("constant pool count is zero"));
        }
        let mut entries = Vec::with_capacity(count as usize);
        let mut index = 1u16;
        while index < count {
            let tag = reader.u8()?;
            let constant = match tag {
                TAG_UTF8 => {
                    let len = reader.u16()? as usize;
                    Constant::Utf8(reader.bytes(len)?.to_vec())
                }
                TAG_INTEGER => Constant::Integer(reader.u32()?),
                TAG_FLOAT => Constant::Float(reader.u32()?),
                TAG_LONG => Constant::Long(reader.u64()?),
                TAG_DOUBLE => Constant::Double(reader.u64()?),
                TAG_CLASS => Constant::Class(reader.u16()?),
                TAG_STRING => Constant::String(reader.u16()?),
                TAG_FIELD_REF => Constant::FieldRef {
                    class: reader.u16()?,
                    name_and_type: reader.u16()?,
                },
                TAG_METHOD_REF => Constant::MethodRef {
                    class: reader.u16()?,
                    name_and_type: reader.u16()?,
                },
                TAG_INTERFACE_METHOD_REF => Constant::InterfaceMethodRef {
                    class: reader.u16()?,
                    name_and_type: reader.u16()?,
                },
                TAG_NAME_AND_TYPE => Constant::NameAndType {
                    name: reader.u16()?,
                    descriptor: reader.u16()?,
                },
                TAG_METHOD_HANDLE => Constant::MethodHandle {
                    kind: reader.u8()?,
                    reference: reader.u16()?,
                },
                TAG_METHOD_TYPE => Constant::MethodType(reader.u16()?),
                TAG_DYNAMIC => Constant::Dynamic {
                    bootstrap: reader.u16()?,
                    name_and_type: reader.u16()?,
                },
                TAG_INVOKE_DYNAMIC => Constant::InvokeDynamic {
                    bootstrap: reader.u16()?,
                    name_and_type: reader.u16()?,
                },
                TAG_MODULE => Constant::Module(reader.u16()?),
                TAG_PACKAGE => Constant::Package(reader.u16()?),
                other => {
                    return Err(Error::malformed(format!(
                        "unknown constant tag {other} at pool index {index}"
                    )));
                }
            };
            let wide = constant.is_wide();
            entries.push(constant);
            index += 1;
            if wide {
                if index >= count {
                    return Err(Error::malformed("wide constant overruns pool count"));
                }
                entries.push(Constant::Unusable);
                index += 1;
            }
        }
        Ok(Self { entries })
    }

    pub(crate) fn write(&self, out: &mut Vec<u8>) -> Result<()> {
        let count = u16::try_from(self.entries.len() + 1)
            .map_err(|_| Error::malformed("constant pool exceeds 65535 entries"))?;
        put_u16(out, count);
        for constant in &self.entries {
            match constant {
                Constant::Utf8(raw) => {
                    put_u8(out, TAG_UTF8);
                    let len = u16::try_from(raw.len())
                        .map_err(|_| Error::malformed("utf8 constant exceeds 65535 bytes"))?;
                    put_u16(out, len);
                    out.extend_from_slice(raw);
                }
                Constant::Integer(value) => {
                    put_u8(out, TAG_INTEGER);
                    put_u32(out, *value);
                }
                Constant::Float(value) => {
                    put_u8(out, TAG_FLOAT);
                    put_u32(out, *value);
                }
                Constant::Long(value) => {
                    put_u8(out, TAG_LONG);
                    put_u64(out, *value);
                }
                Constant::Double(value) => {
                    put_u8(out, TAG_DOUBLE);
                    put_u64(out, *value);
                }
                Constant::Class(name) => {
                    put_u8(out, TAG_CLASS);
                    put_u16(out, *name);
                }
                Constant::String(value) => {
                    put_u8(out, TAG_STRING);
                    put_u16(out, *value);
                }
                Constant::FieldRef {
                    class,
                    name_and_type,
                } => write_pair(out, TAG_FIELD_REF, *class, *name_and_type),
                Constant::MethodRef {
                    class,
                    name_and_type,
                } => write_pair(out, TAG_METHOD_REF, *class, *name_and_type),
                Constant::InterfaceMethodRef {
                    class,
                    name_and_type,
                } => write_pair(out, TAG_INTERFACE_METHOD_REF, *class, *name_and_type),
                Constant::NameAndType { name, descriptor } => {
                    write_pair(out, TAG_NAME_AND_TYPE, *name, *descriptor)
                }
                Constant::MethodHandle { kind, reference } => {
                    put_u8(out, TAG_METHOD_HANDLE);
                    put_u8(out, *kind);
                    put_u16(out, *reference);
                }
                Constant::MethodType(descriptor) => {
                    put_u8(out, TAG_METHOD_TYPE);
                    put_u16(out, *descriptor);
                }
                Constant::Dynamic {
                    bootstrap,
                    name_and_type,
                } => write_pair(out, TAG_DYNAMIC, *bootstrap, *name_and_type),
                Constant::InvokeDynamic {
                    bootstrap,
                    name_and_type,
                } => write_pair(out, TAG_INVOKE_DYNAMIC, *bootstrap, *name_and_type),
                Constant::Module(name) => {
                    put_u8(out, TAG_MODULE);
                    put_u16(out, *name);
                }
                Constant::Package(name) => {
                    put_u8(out, TAG_PACKAGE);
                    put_u16(out, *name);
                }
                Constant::Unusable => {}
            }
        }
        Ok(())
    }

    /// Number of slots including the implicit slot 0, as written in the header.
    pub fn count(&self) -> usize {
        self.entries.len() + 1
    }

    pub fn get(&self, index: u16) -> Result<&Constant> {
        index
            .checked_sub(1)
            .and_then(|slot| self.entries.get(slot as usize))
            .filter(|constant| **constant != Constant::Unusable)
            .ok_or_else(|| Error::malformed(format!("invalid constant pool index {index}")))
    }

    pub fn utf8(&self, index: u16) -> Result<String> {
        match self.get(index)? {
            Constant::Utf8(raw) => Ok(decode_modified_utf8(raw)),
            other => Err(Error::malformed(format!(
                "expected utf8 at index {index}, found {other:?}"
            ))),
        }
    }

    /// Internal (slash separated) name of a Class entry.
    pub fn class_name(&self, index: u16) -> Result<String> {
        match self.get(index)? {
            Constant::Class(name) => self.utf8(*name),
            other => Err(Error::malformed(format!(
                "expected class at index {index}, found {other:?}"
            ))),
        }
    }

    /// Resolves a Fieldref, Methodref, or InterfaceMethodref.
    pub fn member_ref(&self, index: u16) -> Result<MemberRef> {
        let (class, name_and_type) = match self.get(index)? {
            Constant::FieldRef {
                class,
                name_and_type,
            }
            | Constant::MethodRef {
                class,
                name_and_type,
            }
            | Constant::InterfaceMethodRef {
                class,
                name_and_type,
            } => (*class, *name_and_type),
            other => {
                return Err(Error::malformed(format!(
                    "expected member reference at index {index}, found {other:?}"
                )));
            }
        };
        let (name, descriptor) = match self.get(name_and_type)? {
            Constant::NameAndType { name, descriptor } => (*name, *descriptor),
            other => {
                return Err(Error::malformed(format!(
                    "expected name and type at index {name_and_type}, found {other:?}"
                )));
            }
        };
        Ok(MemberRef {
            owner: self.class_name(class)?,
            name: self.utf8(name)?,
            descriptor: self.utf8(descriptor)?,
        })
    }

    /// Value of a String entry, or `None` when the slot holds another constant kind.
    pub fn string_value(&self, index: u16) -> Result<Option<String>> {
        match self.get(index)? {
            Constant::String(value) => self.utf8(*value).map(Some),
            _ => Ok(None),
        }
    }

    /// Returns the index of an equal entry, appending one when none exists.
    pub fn intern(&mut self, constant: Constant) -> Result<u16> {
        if let Some(slot) = self.entries.iter().position(|entry| *entry == constant) {
            return Ok(slot as u16 + 1);
        }
        let wide = constant.is_wide();
        let needed = self.entries.len() + 1 + if wide { 2 } else { 1 };
        if needed > u16::MAX as usize {
            return Err(Error::malformed("constant pool is full"));
        }
        let index = self.entries.len() as u16 + 1;
        self.entries.push(constant);
        if wide {
            self.entries.push(Constant::Unusable);
        }
        Ok(index)
    }

    pub fn intern_utf8(&mut self, value: &str) -> Result<u16> {
        self.intern(Constant::Utf8(encode_modified_utf8(value)))
    }

    pub fn intern_class(&mut self, internal_name: &str) -> Result<u16> {
        let name = self.intern_utf8(internal_name)?;
        self.intern(Constant::Class(name))
    }

    pub fn intern_string(&mut self, value: &str) -> Result<u16> {
        let utf8 = self.intern_utf8(value)?;
        self.intern(Constant::String(utf8))
    }

    pub fn intern_name_and_type(&mut self, name: &str, descriptor: &str) -> Result<u16> {
        let name = self.intern_utf8(name)?;
        let descriptor = self.intern_utf8(descriptor)?;
        self.intern(Constant::NameAndType { name, descriptor })
    }

    pub fn intern_method_ref(&mut self, owner: &str, name: &str, descriptor: &str) -> Result<u16> {
        let class = self.intern_class(owner)?;
        let name_and_type = self.intern_name_and_type(name, descriptor)?;
        self.intern(Constant::MethodRef {
            class,
            name_and_type,
        })
    }

    pub fn intern_interface_method_ref(
        &mut self,
        owner: &str,
        name: &str,
        descriptor: &str,
    ) -> Result<u16> {
        let class = self.intern_class(owner)?;
        let name_and_type = self.intern_name_and_type(name, descriptor)?;
        self.intern(Constant::InterfaceMethodRef {
            class,
            name_and_type,
        })
    }

    pub fn intern_field_ref(&mut self, owner: &str, name: &str, descriptor: &str) -> Result<u16> {
        let class = self.intern_class(owner)?;
        let name_and_type = self.intern_name_and_type(name, descriptor)?;
        self.intern(Constant::FieldRef {
            class,
            name_and_type,
        })
    }
}

fn write_pair(out: &mut Vec<u8>, tag: u8, first: u16, second: u16) {
    put_u8(out, tag);
    put_u16(out, first);
    put_u16(out, second);
}
