use std::io;
use std::path::{Path, PathBuf};

use crate::classfile::descriptor::{FieldType, MethodDescriptor};
use crate::classfile::{self, Attribute, CODE, Code, ConstantPool, Member, Module};
use crate::error::{Error, Result};
use crate::ir::CallKind;
use crate::opcodes;

const ACC_PUBLIC: u16 = 0x0001;
const ACC_STATIC: u16 = 0x0008;
const ACC_FINAL: u16 = 0x0010;
const ACC_SUPER: u16 = 0x0020;
const SHIM_MAJOR_VERSION: u16 = 52;

/// Static shim method that replaced call sites now invoke.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub struct ShimMethod {
    pub name: String,
    pub descriptor: String,
    /// Internal name of the original call target.
    pub target_owner: String,
    pub target_name: String,
    pub target_descriptor: String,
    pub target_kind: CallKind,
    /// The original reference is an interface method reference.
    pub target_is_interface: bool,
}

/// Supplies class file bytes for shim modules.
pub trait ShimSource: Send + Sync {
    /// Bytes of the shim named `internal_name` providing `methods`. Fails
    /// with `MissingShim` when no such module can be located.
    fn shim_bytes(&self, internal_name: &str, methods: &[ShimMethod]) -> Result<Vec<u8>>;
}

/// Prebuilt shim modules stored as `<root>/<internal name>.class`.
#[derive(Clone, Debug)]
pub struct ShimDirectory {
    root: PathBuf,
}

impl ShimDirectory {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl ShimSource for ShimDirectory {
    fn shim_bytes(&self, internal_name: &str, _methods: &[ShimMethod]) -> Result<Vec<u8>> {
        let path = self.root.join(format!("{internal_name}.class"));
        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Err(Error::MissingShim {
                    name: internal_name.to_string(),
                });
            }
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "cannot read shim");
                return Err(Error::MissingShim {
                    name: internal_name.to_string(),
                });
            }
        };
        let module = Module::parse(&bytes)?;
        if module.internal_name()? != internal_name {
            return Err(Error::MissingShim {
                name: internal_name.to_string(),
            });
        }
        Ok(bytes)
    }
}

/// Synthesizes shims whose methods forward straight to the original target.
#[derive(Clone, Copy, Debug, Default)]
pub struct ForwardingShims;

impl ShimSource for ForwardingShims {
    fn shim_bytes(&self, internal_name: &str, methods: &[ShimMethod]) -> Result<Vec<u8>> {
        let mut pool = ConstantPool::default();
        let this_class = pool.intern_class(internal_name)?;
        let super_class = pool.intern_class("java/lang/Object")?;
        let code_name = pool.intern_utf8(CODE)?;

        let mut members = Vec::with_capacity(methods.len());
        for method in methods {
            members.push(forwarding_method(&mut pool, code_name, method)?);
        }

        let bytes = Module {
            minor_version: 0,
            major_version: SHIM_MAJOR_VERSION,
            constant_pool: pool,
            access_flags: ACC_PUBLIC | ACC_FINAL | ACC_SUPER,
            this_class,
            super_class,
            interfaces: Vec::new(),
            fields: Vec::new(),
            methods: members,
            attributes: Vec::new(),
        }
        .to_bytes()?;
        classfile::validate(&bytes)?;
        Ok(bytes)
    }
}

/// `xload` every argument, invoke the target, `xreturn` its result.
fn forwarding_method(pool: &mut ConstantPool, code_name: u16, method: &ShimMethod) -> Result<Member> {
    let shape = MethodDescriptor::parse(&method.descriptor)?;
    let target = if method.target_is_interface {
        pool.intern_interface_method_ref(
            &method.target_owner,
            &method.target_name,
            &method.target_descriptor,
        )?
    } else {
        pool.intern_method_ref(&method.target_owner, &method.target_name, &method.target_descriptor)?
    };

    let mut bytecode = Vec::new();
    let mut slot: u16 = 0;
    for parameter in &shape.parameters {
        let slot_byte = u8::try_from(slot)
            .map_err(|_| Error::malformed(format!("shim {} has too many arguments", method.name)))?;
        bytecode.extend_from_slice(&[parameter.load_opcode(), slot_byte]);
        slot += parameter.slots();
    }

    let [high, low] = target.to_be_bytes();
    match method.target_kind {
        CallKind::Interface => {
            let count = u8::try_from(slot)
                .map_err(|_| Error::malformed(format!("shim {} has too many arguments", method.name)))?;
            bytecode.extend_from_slice(&[opcodes::INVOKEINTERFACE, high, low, count, 0]);
        }
        CallKind::Virtual | CallKind::Special => {
            bytecode.extend_from_slice(&[opcodes::INVOKEVIRTUAL, high, low]);
        }
        CallKind::Static => bytecode.extend_from_slice(&[opcodes::INVOKESTATIC, high, low]),
    }
    bytecode.push(
        shape
            .return_type
            .as_ref()
            .map_or(opcodes::RETURN, FieldType::return_opcode),
    );

    let return_slots = shape.return_type.as_ref().map_or(0, FieldType::slots);
    Ok(Member {
        access_flags: ACC_PUBLIC | ACC_STATIC,
        name: pool.intern_utf8(&method.name)?,
        descriptor: pool.intern_utf8(&method.descriptor)?,
        attributes: vec![Attribute::Code {
            name: code_name,
            code: Code {
                max_stack: slot.max(return_slots),
                max_locals: slot,
                bytecode,
                exception_table: Vec::new(),
                attributes: Vec::new(),
            },
        }],
    })
}
