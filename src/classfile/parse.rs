use crate::classfile::bytes::ByteReader;
use crate::classfile::{
    ANNOTATION_DEFAULT, Annotation, AnnotationNode, Attribute, CODE, Code, ConstantPool,
    ExceptionHandler, MAGIC, Member, Module, RUNTIME_INVISIBLE_ANNOTATIONS,
    RUNTIME_INVISIBLE_PARAMETER_ANNOTATIONS, RUNTIME_VISIBLE_ANNOTATIONS,
    RUNTIME_VISIBLE_PARAMETER_ANNOTATIONS,
};
use crate::error::{Error, Result};

/// Annotations nest through `@` values; anything deeper is hostile input.
const MAX_ANNOTATION_DEPTH: usize = 64;

pub(super) fn parse_module(data: &[u8]) -> Result<Module> {
    let mut reader = ByteReader::new(data);
    let magic = reader.u32()?;
    if magic != MAGIC {
        return Err(Error::malformed(format!("bad magic 0x{magic:08x}")));
    }
    let minor_version = reader.u16()?;
    let major_version = reader.u16()?;
    let constant_pool = ConstantPool::read(&mut reader)?;
    let access_flags = reader.u16()?;
    let this_class = reader.u16()?;
    constant_pool.class_name(this_class)?;
    let super_class = reader.u16()?;
    if super_class != 0 {
        constant_pool.class_name(super_class)?;
    }

    let interface_count = reader.u16()?;
    let mut interfaces = Vec::with_capacity(interface_count as usize);
    for _ in 0..interface_count {
        interfaces.push(reader.u16()?);
    }

    let fields = read_members(&mut reader, &constant_pool)?;
    let methods = read_members(&mut reader, &constant_pool)?;
    let attributes = read_attributes(&mut reader, &constant_pool, None)?;

    if !reader.is_empty() {
        return Err(Error::malformed(format!(
            "{} trailing bytes after class structure",
            data.len() - reader.position()
        )));
    }

    Ok(Module {
        minor_version,
        major_version,
        constant_pool,
        access_flags,
        this_class,
        super_class,
        interfaces,
        fields,
        methods,
        attributes,
    })
}

fn read_members(reader: &mut ByteReader<'_>, pool: &ConstantPool) -> Result<Vec<Member>> {
    let count = reader.u16()?;
    let mut members = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let access_flags = reader.u16()?;
        let name = reader.u16()?;
        pool.utf8(name)?;
        let descriptor = reader.u16()?;
        pool.utf8(descriptor)?;
        let attributes = read_attributes(reader, pool, Some(name))?;
        members.push(Member {
            access_flags,
            name,
            descriptor,
            attributes,
        });
    }
    Ok(members)
}

/// `owner_name` is the enclosing member's name index, used to label an
/// `AnnotationDefault` value.
fn read_attributes(
    reader: &mut ByteReader<'_>,
    pool: &ConstantPool,
    owner_name: Option<u16>,
) -> Result<Vec<Attribute>> {
    let count = reader.u16()?;
    let mut attributes = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let name = reader.u16()?;
        let length = reader.u32()? as usize;
        let info = reader.bytes(length)?;
        let kind = pool.utf8(name)?;
        let mut body = ByteReader::new(info);
        let attribute = match (kind.as_str(), owner_name) {
            (RUNTIME_VISIBLE_ANNOTATIONS | RUNTIME_INVISIBLE_ANNOTATIONS, _) => {
                Attribute::Annotations {
                    name,
                    annotations: read_annotation_list(&mut body, pool)?,
                }
            }
            (RUNTIME_VISIBLE_PARAMETER_ANNOTATIONS | RUNTIME_INVISIBLE_PARAMETER_ANNOTATIONS, _) => {
                let parameter_count = body.u8()?;
                let mut parameters = Vec::with_capacity(parameter_count as usize);
                for _ in 0..parameter_count {
                    parameters.push(read_annotation_list(&mut body, pool)?);
                }
                Attribute::ParameterAnnotations { name, parameters }
            }
            (ANNOTATION_DEFAULT, Some(member)) => Attribute::AnnotationDefault {
                name,
                value: read_element_value(&mut body, pool, member, 0)?,
            },
            (CODE, Some(_)) => Attribute::Code {
                name,
                code: read_code(&mut body, pool)?,
            },
            _ => {
                attributes.push(Attribute::Other {
                    name,
                    info: info.to_vec(),
                });
                continue;
            }
        };
        if !body.is_empty() {
            return Err(Error::malformed(format!(
                "attribute {kind} declares {length} bytes but uses {}",
                body.position()
            )));
        }
        attributes.push(attribute);
    }
    Ok(attributes)
}

fn read_code(reader: &mut ByteReader<'_>, pool: &ConstantPool) -> Result<Code> {
    let max_stack = reader.u16()?;
    let max_locals = reader.u16()?;
    let code_length = reader.u32()? as usize;
    let bytecode = reader.bytes(code_length)?.to_vec();
    let handler_count = reader.u16()?;
    let mut exception_table = Vec::with_capacity(handler_count as usize);
    for _ in 0..handler_count {
        exception_table.push(ExceptionHandler {
            start_pc: reader.u16()?,
            end_pc: reader.u16()?,
            handler_pc: reader.u16()?,
            catch_type: reader.u16()?,
        });
    }
    // Code-level attributes (line numbers, stack maps, type annotations) stay opaque.
    let attributes = read_attributes(reader, pool, None)?;
    Ok(Code {
        max_stack,
        max_locals,
        bytecode,
        exception_table,
        attributes,
    })
}

fn read_annotation_list(
    reader: &mut ByteReader<'_>,
    pool: &ConstantPool,
) -> Result<Vec<Annotation>> {
    let count = reader.u16()?;
    let mut annotations = Vec::with_capacity(count as usize);
    for _ in 0..count {
        annotations.push(read_annotation(reader, pool, 0)?);
    }
    Ok(annotations)
}

fn read_annotation(
    reader: &mut ByteReader<'_>,
    pool: &ConstantPool,
    depth: usize,
) -> Result<Annotation> {
    if depth > MAX_ANNOTATION_DEPTH {
        return Err(Error::malformed("annotation nesting too deep"));
    }
    let type_descriptor = reader.u16()?;
    pool.utf8(type_descriptor)?;
    let pair_count = reader.u16()?;
    let mut elements = Vec::with_capacity(pair_count as usize);
    for _ in 0..pair_count {
        let name = reader.u16()?;
        pool.utf8(name)?;
        elements.push(read_element_value(reader, pool, name, depth)?);
    }
    Ok(Annotation {
        type_descriptor,
        elements,
    })
}

fn read_element_value(
    reader: &mut ByteReader<'_>,
    pool: &ConstantPool,
    name: u16,
    depth: usize,
) -> Result<AnnotationNode> {
    let tag = reader.u8()?;
    let node = match tag {
        b'B' | b'C' | b'D' | b'F' | b'I' | b'J' | b'S' | b'Z' | b's' | b'c' => {
            let value = reader.u16()?;
            pool.get(value)?;
            AnnotationNode::Primitive { name, tag, value }
        }
        b'e' => {
            let enum_type = reader.u16()?;
            let constant = reader.u16()?;
            pool.utf8(enum_type)?;
            pool.utf8(constant)?;
            AnnotationNode::EnumRef {
                name,
                enum_type,
                constant,
            }
        }
        b'@' => AnnotationNode::Nested {
            name,
            annotation: read_annotation(reader, pool, depth + 1)?,
        },
        b'[' => {
            if depth > MAX_ANNOTATION_DEPTH {
                return Err(Error::malformed("annotation nesting too deep"));
            }
            let count = reader.u16()?;
            let mut children = Vec::with_capacity(count as usize);
            for _ in 0..count {
                children.push(read_element_value(reader, pool, name, depth + 1)?);
            }
            AnnotationNode::Array { name, children }
        }
        other => {
            return Err(Error::malformed(format!(
                "unknown element value tag 0x{other:02x}"
            )));
        }
    };
    Ok(node)
}
