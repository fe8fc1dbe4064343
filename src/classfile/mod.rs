//! In-memory model of a JVM class file.
//!
//! Every string in the model is a constant pool index; the pool is owned by
//! the [`Module`]. Parsing is strict about structure and lenient about
//! content: unknown attributes round-trip as opaque bytes. Serialization
//! recomputes every count and length from the (possibly reduced) child lists.

pub(crate) mod bytes;
pub mod constant_pool;
pub mod descriptor;
mod parse;
mod write;

pub use constant_pool::{Constant, ConstantPool, MemberRef};

use crate::error::{Error, Result};

pub const MAGIC: u32 = 0xCAFE_BABE;

pub(crate) const RUNTIME_VISIBLE_ANNOTATIONS: &str = "RuntimeVisibleAnnotations";
pub(crate) const RUNTIME_INVISIBLE_ANNOTATIONS: &str = "RuntimeInvisibleAnnotations";
pub(crate) const RUNTIME_VISIBLE_PARAMETER_ANNOTATIONS: &str = "RuntimeVisibleParameterAnnotations";
pub(crate) const RUNTIME_INVISIBLE_PARAMETER_ANNOTATIONS: &str =
    "RuntimeInvisibleParameterAnnotations";
pub(crate) const ANNOTATION_DEFAULT: &str = "AnnotationDefault";
pub(crate) const CODE: &str = "Code";

/// One parsed class file.
#[derive(Clone, Debug, PartialEq)]
pub struct Module {
    pub minor_version: u16,
    pub major_version: u16,
    pub constant_pool: ConstantPool,
    pub access_flags: u16,
    pub this_class: u16,
    /// Zero for `java/lang/Object` and module descriptors.
    pub super_class: u16,
    pub interfaces: Vec<u16>,
    pub fields: Vec<Member>,
    pub methods: Vec<Member>,
    pub attributes: Vec<Attribute>,
}

/// Field or method table entry.
#[derive(Clone, Debug, PartialEq)]
pub struct Member {
    pub access_flags: u16,
    pub name: u16,
    pub descriptor: u16,
    pub attributes: Vec<Attribute>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Attribute {
    /// `RuntimeVisibleAnnotations` or `RuntimeInvisibleAnnotations`; `name`
    /// tells them apart.
    Annotations {
        name: u16,
        annotations: Vec<Annotation>,
    },
    /// Per-parameter annotation lists, visible or invisible.
    ParameterAnnotations {
        name: u16,
        parameters: Vec<Vec<Annotation>>,
    },
    /// Default value of an annotation type element. The node is named after
    /// the owning method.
    AnnotationDefault { name: u16, value: AnnotationNode },
    Code { name: u16, code: Code },
    Other { name: u16, info: Vec<u8> },
}

/// Body of a `Code` attribute.
#[derive(Clone, Debug, PartialEq)]
pub struct Code {
    pub max_stack: u16,
    pub max_locals: u16,
    pub bytecode: Vec<u8>,
    pub exception_table: Vec<ExceptionHandler>,
    pub attributes: Vec<Attribute>,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ExceptionHandler {
    pub start_pc: u16,
    pub end_pc: u16,
    pub handler_pc: u16,
    pub catch_type: u16,
}

/// Annotation occurrence: a type descriptor plus its element values.
#[derive(Clone, Debug, PartialEq)]
pub struct Annotation {
    pub type_descriptor: u16,
    pub elements: Vec<AnnotationNode>,
}

/// Element value tree. `name` is the element name; children of an array
/// share the array's name since the binary format gives them none.
#[derive(Clone, Debug, PartialEq)]
pub enum AnnotationNode {
    /// Constant tags `B C D F I J S Z s` and class literals `c`.
    Primitive { name: u16, tag: u8, value: u16 },
    EnumRef {
        name: u16,
        enum_type: u16,
        constant: u16,
    },
    Nested { name: u16, annotation: Annotation },
    Array {
        name: u16,
        children: Vec<AnnotationNode>,
    },
}

impl AnnotationNode {
    pub fn name(&self) -> u16 {
        match self {
            AnnotationNode::Primitive { name, .. }
            | AnnotationNode::EnumRef { name, .. }
            | AnnotationNode::Nested { name, .. }
            | AnnotationNode::Array { name, .. } => *name,
        }
    }
}

impl Module {
    /// Parses class file bytes, failing with `MalformedModule` on any
    /// structural inconsistency or trailing data.
    pub fn parse(data: &[u8]) -> Result<Self> {
        parse::parse_module(data)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        write::write_module(self)
    }

    /// Internal (slash separated) class name.
    pub fn internal_name(&self) -> Result<String> {
        self.constant_pool.class_name(self.this_class)
    }

    /// Binary (dot separated) class name used in findings and reports.
    pub fn binary_name(&self) -> Result<String> {
        Ok(descriptor::binary_name(&self.internal_name()?))
    }

    pub fn member_name(&self, member: &Member) -> Result<String> {
        self.constant_pool.utf8(member.name)
    }

    pub fn member_descriptor(&self, member: &Member) -> Result<String> {
        self.constant_pool.utf8(member.descriptor)
    }
}

/// Cross-checks rewritten bytes with an independent class file parser.
pub fn validate(data: &[u8]) -> Result<()> {
    jclassfile::class_file::parse(data)
        .map(|_| ())
        .map_err(|err| Error::malformed(format!("rewritten module failed validation: {err}")))
}

impl Member {
    pub fn code(&self) -> Option<&Code> {
        self.attributes.iter().find_map(|attribute| match attribute {
            Attribute::Code { code, .. } => Some(code),
            _ => None,
        })
    }

    pub fn code_mut(&mut self) -> Option<&mut Code> {
        self.attributes.iter_mut().find_map(|attribute| match attribute {
            Attribute::Code { code, .. } => Some(code),
            _ => None,
        })
    }

    /// Member-level annotations from both visible and invisible attributes.
    pub fn annotations(&self) -> impl Iterator<Item = &Annotation> {
        self.attributes
            .iter()
            .filter_map(|attribute| match attribute {
                Attribute::Annotations { annotations, .. } => Some(annotations.iter()),
                _ => None,
            })
            .flatten()
    }

    pub fn annotation_default(&self) -> Option<&AnnotationNode> {
        self.attributes.iter().find_map(|attribute| match attribute {
            Attribute::AnnotationDefault { value, .. } => Some(value),
            _ => None,
        })
    }
}
