//! Test-only builder that emits real class file bytes.

use crate::classfile::{
    ANNOTATION_DEFAULT, Annotation, AnnotationNode, Attribute, CODE, Code, ConstantPool, Member,
    Module, RUNTIME_VISIBLE_ANNOTATIONS, RUNTIME_VISIBLE_PARAMETER_ANNOTATIONS,
};
use crate::opcodes;

const ACC_PUBLIC: u16 = 0x0001;
const ACC_STATIC: u16 = 0x0008;
const ACC_ABSTRACT: u16 = 0x0400;

struct MethodSpec {
    name: String,
    descriptor: String,
    access: u16,
    code: Option<Vec<u8>>,
    annotations: Vec<Annotation>,
    parameters: Vec<Vec<Annotation>>,
    default: Option<(String, String)>,
}

pub(crate) struct ClassBuilder {
    pool: ConstantPool,
    name: String,
    fields: Vec<(String, String, Vec<Annotation>)>,
    class_annotations: Vec<Annotation>,
    methods: Vec<MethodSpec>,
}

impl ClassBuilder {
    pub(crate) fn new(internal_name: &str) -> Self {
        Self {
            pool: ConstantPool::default(),
            name: internal_name.to_string(),
            fields: Vec::new(),
            class_annotations: Vec::new(),
            methods: Vec::new(),
        }
    }

    pub(crate) fn field(mut self, name: &str, descriptor: &str) -> Self {
        self.fields
            .push((name.to_string(), descriptor.to_string(), Vec::new()));
        self
    }

    /// Annotates field `field`, declaring it as an `int` when absent.
    pub(crate) fn field_annotation(
        mut self,
        field: &str,
        type_descriptor: &str,
        elements: &[(&str, &str, &str)],
    ) -> Self {
        let annotation = self.enum_annotation(type_descriptor, elements);
        match self.fields.iter_mut().find(|(name, _, _)| name == field) {
            Some((_, _, annotations)) => annotations.push(annotation),
            None => self
                .fields
                .push((field.to_string(), "I".to_string(), vec![annotation])),
        }
        self
    }

    pub(crate) fn class_annotation(mut self, type_descriptor: &str, elements: &[(&str, &str, &str)]) -> Self {
        let annotation = self.enum_annotation(type_descriptor, elements);
        self.class_annotations.push(annotation);
        self
    }

    /// Annotation whose elements are enum values: `(element, enum type, constant)`.
    pub(crate) fn method_annotation(
        mut self,
        method: &str,
        type_descriptor: &str,
        elements: &[(&str, &str, &str)],
    ) -> Self {
        let annotation = self.enum_annotation(type_descriptor, elements);
        self.method(method).annotations.push(annotation);
        self
    }

    pub(crate) fn method_annotation_array(
        mut self,
        method: &str,
        type_descriptor: &str,
        element: &str,
        enum_type: &str,
        constants: &[&str],
    ) -> Self {
        let name = self.utf8(element);
        let children = constants
            .iter()
            .map(|constant| self.enum_node(name, enum_type, constant))
            .collect();
        let annotation = Annotation {
            type_descriptor: self.utf8(type_descriptor),
            elements: vec![AnnotationNode::Array { name, children }],
        };
        self.method(method).annotations.push(annotation);
        self
    }

    /// `@Outer(element = @Inner(elements...))` on `method`.
    pub(crate) fn method_annotation_nested(
        mut self,
        method: &str,
        outer_type: &str,
        element: &str,
        inner_type: &str,
        inner_elements: &[(&str, &str, &str)],
    ) -> Self {
        let name = self.utf8(element);
        let inner = self.enum_annotation(inner_type, inner_elements);
        let annotation = Annotation {
            type_descriptor: self.utf8(outer_type),
            elements: vec![AnnotationNode::Nested {
                name,
                annotation: inner,
            }],
        };
        self.method(method).annotations.push(annotation);
        self
    }

    pub(crate) fn parameter_annotation(
        mut self,
        method: &str,
        index: usize,
        type_descriptor: &str,
        elements: &[(&str, &str, &str)],
    ) -> Self {
        let annotation = self.enum_annotation(type_descriptor, elements);
        let spec = self.method(method);
        spec.descriptor = format!("({})V", "Ljava/lang/String;".repeat(index + 1));
        if spec.parameters.len() <= index {
            spec.parameters.resize_with(index + 1, Vec::new);
        }
        spec.parameters[index].push(annotation);
        self
    }

    /// Abstract element method with an enum default value.
    pub(crate) fn annotation_default(mut self, method: &str, enum_type: &str, constant: &str) -> Self {
        self.methods.push(MethodSpec {
            name: method.to_string(),
            descriptor: format!("(){enum_type}"),
            access: ACC_PUBLIC | ACC_ABSTRACT,
            code: None,
            annotations: Vec::new(),
            parameters: Vec::new(),
            default: Some((enum_type.to_string(), constant.to_string())),
        });
        self
    }

    pub(crate) fn invoke_static(self, method: &str, owner: &str, name: &str, descriptor: &str) -> Self {
        self.invoke(method, opcodes::INVOKESTATIC, owner, name, descriptor)
    }

    pub(crate) fn invoke_virtual(self, method: &str, owner: &str, name: &str, descriptor: &str) -> Self {
        self.invoke(method, opcodes::INVOKEVIRTUAL, owner, name, descriptor)
    }

    pub(crate) fn invoke_interface(self, method: &str, owner: &str, name: &str, descriptor: &str) -> Self {
        self.invoke(method, opcodes::INVOKEINTERFACE, owner, name, descriptor)
    }

    pub(crate) fn get_static(mut self, method: &str, owner: &str, name: &str, descriptor: &str) -> Self {
        let index = self
            .pool
            .intern_field_ref(owner, name, descriptor)
            .expect("intern field");
        let [high, low] = index.to_be_bytes();
        self.code(method).extend_from_slice(&[opcodes::GETSTATIC, high, low]);
        self
    }

    pub(crate) fn ldc_string(mut self, method: &str, value: &str) -> Self {
        let index = self.pool.intern_string(value).expect("intern string");
        let [high, low] = index.to_be_bytes();
        self.code(method).extend_from_slice(&[opcodes::LDC_W, high, low]);
        self
    }

    pub(crate) fn build(mut self) -> Vec<u8> {
        self.module().to_bytes().expect("write module")
    }

    pub(crate) fn module(&mut self) -> Module {
        let this_class = self.pool.intern_class(&self.name.clone()).expect("intern class");
        let super_class = self.pool.intern_class("java/lang/Object").expect("intern class");

        let fields = std::mem::take(&mut self.fields)
            .into_iter()
            .map(|(name, descriptor, annotations)| {
                let mut attributes = Vec::new();
                if !annotations.is_empty() {
                    attributes.push(Attribute::Annotations {
                        name: self.utf8(RUNTIME_VISIBLE_ANNOTATIONS),
                        annotations,
                    });
                }
                Member {
                    access_flags: ACC_PUBLIC,
                    name: self.utf8(&name),
                    descriptor: self.utf8(&descriptor),
                    attributes,
                }
            })
            .collect();

        let mut methods = Vec::new();
        for spec in std::mem::take(&mut self.methods) {
            let mut attributes = Vec::new();
            if let Some(mut bytecode) = spec.code {
                bytecode.push(opcodes::RETURN);
                attributes.push(Attribute::Code {
                    name: self.utf8(CODE),
                    code: Code {
                        max_stack: 8,
                        max_locals: 8,
                        bytecode,
                        exception_table: Vec::new(),
                        attributes: Vec::new(),
                    },
                });
            }
            if !spec.annotations.is_empty() {
                attributes.push(Attribute::Annotations {
                    name: self.utf8(RUNTIME_VISIBLE_ANNOTATIONS),
                    annotations: spec.annotations,
                });
            }
            if !spec.parameters.is_empty() {
                attributes.push(Attribute::ParameterAnnotations {
                    name: self.utf8(RUNTIME_VISIBLE_PARAMETER_ANNOTATIONS),
                    parameters: spec.parameters,
                });
            }
            let name = self.utf8(&spec.name);
            if let Some((enum_type, constant)) = spec.default {
                let value = self.enum_node(name, &enum_type, &constant);
                attributes.push(Attribute::AnnotationDefault {
                    name: self.utf8(ANNOTATION_DEFAULT),
                    value,
                });
            }
            methods.push(Member {
                access_flags: spec.access,
                name,
                descriptor: self.utf8(&spec.descriptor),
                attributes,
            });
        }

        let mut attributes = Vec::new();
        if !self.class_annotations.is_empty() {
            attributes.push(Attribute::Annotations {
                name: self.utf8(RUNTIME_VISIBLE_ANNOTATIONS),
                annotations: std::mem::take(&mut self.class_annotations),
            });
        }

        Module {
            minor_version: 0,
            major_version: 52,
            constant_pool: self.pool.clone(),
            access_flags: ACC_PUBLIC,
            this_class,
            super_class,
            interfaces: Vec::new(),
            fields,
            methods,
            attributes,
        }
    }

    fn invoke(mut self, method: &str, opcode: u8, owner: &str, name: &str, descriptor: &str) -> Self {
        let index = if opcode == opcodes::INVOKEINTERFACE {
            self.pool.intern_interface_method_ref(owner, name, descriptor)
        } else {
            self.pool.intern_method_ref(owner, name, descriptor)
        }
        .expect("intern method");
        let [high, low] = index.to_be_bytes();
        let code = self.code(method);
        code.extend_from_slice(&[opcode, high, low]);
        if opcode == opcodes::INVOKEINTERFACE {
            code.extend_from_slice(&[1, 0]);
        }
        self
    }

    fn method(&mut self, name: &str) -> &mut MethodSpec {
        let position = match self.methods.iter().position(|spec| spec.name == name) {
            Some(position) => position,
            None => {
                self.methods.push(MethodSpec {
                    name: name.to_string(),
                    descriptor: "()V".to_string(),
                    access: ACC_PUBLIC | ACC_STATIC,
                    code: Some(Vec::new()),
                    annotations: Vec::new(),
                    parameters: Vec::new(),
                    default: None,
                });
                self.methods.len() - 1
            }
        };
        &mut self.methods[position]
    }

    fn code(&mut self, method: &str) -> &mut Vec<u8> {
        self.method(method).code.get_or_insert_with(Vec::new)
    }

    fn utf8(&mut self, value: &str) -> u16 {
        self.pool.intern_utf8(value).expect("intern utf8")
    }

    fn enum_node(&mut self, name: u16, enum_type: &str, constant: &str) -> AnnotationNode {
        AnnotationNode::EnumRef {
            name,
            enum_type: self.utf8(enum_type),
            constant: self.utf8(constant),
        }
    }

    fn enum_annotation(&mut self, type_descriptor: &str, elements: &[(&str, &str, &str)]) -> Annotation {
        let type_descriptor = self.utf8(type_descriptor);
        let elements = elements
            .iter()
            .map(|(element, enum_type, constant)| {
                let name = self.utf8(element);
                self.enum_node(name, enum_type, constant)
            })
            .collect();
        Annotation {
            type_descriptor,
            elements,
        }
    }
}
