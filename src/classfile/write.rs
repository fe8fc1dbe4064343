use crate::classfile::bytes::{put_count, put_length_prefixed, put_u8, put_u16, put_u32};
use crate::classfile::{Annotation, AnnotationNode, Attribute, Code, MAGIC, Member, Module};
use crate::error::{Error, Result};

pub(super) fn write_module(module: &Module) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    put_u32(&mut out, MAGIC);
    put_u16(&mut out, module.minor_version);
    put_u16(&mut out, module.major_version);
    module.constant_pool.write(&mut out)?;
    put_u16(&mut out, module.access_flags);
    put_u16(&mut out, module.this_class);
    put_u16(&mut out, module.super_class);
    put_count(&mut out, module.interfaces.len(), "interface")?;
    for interface in &module.interfaces {
        put_u16(&mut out, *interface);
    }
    write_members(&mut out, &module.fields)?;
    write_members(&mut out, &module.methods)?;
    write_attributes(&mut out, &module.attributes)?;
    Ok(out)
}

fn write_members(out: &mut Vec<u8>, members: &[Member]) -> Result<()> {
    put_count(out, members.len(), "member")?;
    for member in members {
        put_u16(out, member.access_flags);
        put_u16(out, member.name);
        put_u16(out, member.descriptor);
        write_attributes(out, &member.attributes)?;
    }
    Ok(())
}

fn write_attributes(out: &mut Vec<u8>, attributes: &[Attribute]) -> Result<()> {
    put_count(out, attributes.len(), "attribute")?;
    for attribute in attributes {
        let mut body = Vec::new();
        let name = match attribute {
            Attribute::Annotations { name, annotations } => {
                write_annotation_list(&mut body, annotations)?;
                *name
            }
            Attribute::ParameterAnnotations { name, parameters } => {
                let count = u8::try_from(parameters.len())
                    .map_err(|_| Error::malformed("more than 255 annotated parameters"))?;
                put_u8(&mut body, count);
                for annotations in parameters {
                    write_annotation_list(&mut body, annotations)?;
                }
                *name
            }
            Attribute::AnnotationDefault { name, value } => {
                write_element_value(&mut body, value)?;
                *name
            }
            Attribute::Code { name, code } => {
                write_code(&mut body, code)?;
                *name
            }
            Attribute::Other { name, info } => {
                body.extend_from_slice(info);
                *name
            }
        };
        put_u16(out, name);
        put_length_prefixed(out, &body)?;
    }
    Ok(())
}

fn write_code(out: &mut Vec<u8>, code: &Code) -> Result<()> {
    put_u16(out, code.max_stack);
    put_u16(out, code.max_locals);
    put_length_prefixed(out, &code.bytecode)?;
    put_count(out, code.exception_table.len(), "exception handler")?;
    for handler in &code.exception_table {
        put_u16(out, handler.start_pc);
        put_u16(out, handler.end_pc);
        put_u16(out, handler.handler_pc);
        put_u16(out, handler.catch_type);
    }
    write_attributes(out, &code.attributes)
}

fn write_annotation_list(out: &mut Vec<u8>, annotations: &[Annotation]) -> Result<()> {
    put_count(out, annotations.len(), "annotation")?;
    for annotation in annotations {
        write_annotation(out, annotation)?;
    }
    Ok(())
}

fn write_annotation(out: &mut Vec<u8>, annotation: &Annotation) -> Result<()> {
    put_u16(out, annotation.type_descriptor);
    put_count(out, annotation.elements.len(), "element value pair")?;
    for element in &annotation.elements {
        put_u16(out, element.name());
        write_element_value(out, element)?;
    }
    Ok(())
}

/// Writes the value part only; pair names are written by the caller.
fn write_element_value(out: &mut Vec<u8>, node: &AnnotationNode) -> Result<()> {
    match node {
        AnnotationNode::Primitive { tag, value, .. } => {
            put_u8(out, *tag);
            put_u16(out, *value);
        }
        AnnotationNode::EnumRef {
            enum_type,
            constant,
            ..
        } => {
            put_u8(out, b'e');
            put_u16(out, *enum_type);
            put_u16(out, *constant);
        }
        AnnotationNode::Nested { annotation, .. } => {
            put_u8(out, b'@');
            write_annotation(out, annotation)?;
        }
        AnnotationNode::Array { children, .. } => {
            put_u8(out, b'[');
            put_count(out, children.len(), "array element")?;
            for child in children {
                write_element_value(out, child)?;
            }
        }
    }
    Ok(())
}
