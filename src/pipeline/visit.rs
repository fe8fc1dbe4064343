//! Recursive annotation walk with per-node drop decisions.
//!
//! The walk rebuilds every annotation list from the nodes it keeps. A node a
//! rule flags is always reported; it is left out of the rebuilt list only in
//! [`Mode::Sanitize`]. Children are visited before the parent's drop takes
//! effect, so findings below a dropped node are still reported.

use crate::classfile::descriptor::descriptor_binary_name;
use crate::classfile::{Annotation, AnnotationNode, Attribute, ConstantPool, Module};
use crate::error::Result;
use crate::pipeline::{Finding, Location, Mode};

/// A rule decision for one visited node.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Hit {
    pub rule_id: String,
    pub message: String,
}

/// Decisions consulted during the walk. Both hooks default to keeping the node.
pub trait AnnotationRule {
    /// Called for every annotation, top-level or nested, with its binary type name.
    fn visit_annotation(&self, _annotation_type: &str) -> Option<Hit> {
        None
    }

    /// Called for every enum reference with the enclosing annotation's type.
    fn visit_enum(
        &self,
        _annotation_type: &str,
        _element_name: &str,
        _enum_type: &str,
        _constant: &str,
    ) -> Option<Hit> {
        None
    }
}

/// Walks class, field, and method annotations of `module`, appending to
/// `findings`. Returns whether anything was dropped.
pub fn walk_module(
    module: &mut Module,
    rule: &dyn AnnotationRule,
    mode: Mode,
    findings: &mut Vec<Finding>,
) -> Result<bool> {
    let module_name = module.binary_name()?;
    let Module {
        constant_pool,
        fields,
        methods,
        attributes,
        ..
    } = module;
    let mut walker = Walker {
        pool: constant_pool,
        rule,
        mode,
        module_name: &module_name,
        findings,
        modified: false,
    };

    walker.attributes(attributes, &Location::ClassAnnotation, &module_name)?;
    for field in fields.iter_mut() {
        let location = Location::Field(walker.pool.utf8(field.name)?);
        walker.attributes(&mut field.attributes, &location, &module_name)?;
    }
    for method in methods.iter_mut() {
        let name = walker.pool.utf8(method.name)?;
        walker.attributes(&mut method.attributes, &Location::Method(name), &module_name)?;
    }
    Ok(walker.modified)
}

struct Walker<'a> {
    pool: &'a ConstantPool,
    rule: &'a dyn AnnotationRule,
    mode: Mode,
    module_name: &'a str,
    findings: &'a mut Vec<Finding>,
    modified: bool,
}

impl Walker<'_> {
    /// `location` is the member-level location; parameter and default
    /// locations are derived from it. `module_type` names the enclosing
    /// class, which is the annotation type for `AnnotationDefault` values.
    fn attributes(
        &mut self,
        attributes: &mut Vec<Attribute>,
        location: &Location,
        module_type: &str,
    ) -> Result<()> {
        let mut kept = Vec::with_capacity(attributes.len());
        for attribute in std::mem::take(attributes) {
            match attribute {
                Attribute::Annotations { name, annotations } => {
                    let annotations = self.annotation_list(annotations, location)?;
                    kept.push(Attribute::Annotations { name, annotations });
                }
                Attribute::ParameterAnnotations { name, parameters } => {
                    let method = match location {
                        Location::Method(method) => method.clone(),
                        other => other.to_string(),
                    };
                    let mut rebuilt = Vec::with_capacity(parameters.len());
                    for (index, annotations) in parameters.into_iter().enumerate() {
                        let location = Location::Parameter {
                            index,
                            method: method.clone(),
                        };
                        rebuilt.push(self.annotation_list(annotations, &location)?);
                    }
                    kept.push(Attribute::ParameterAnnotations {
                        name,
                        parameters: rebuilt,
                    });
                }
                Attribute::AnnotationDefault { name, value } => {
                    let location = Location::AnnotationDefault {
                        method: match location {
                            Location::Method(method) => method.clone(),
                            other => other.to_string(),
                        },
                    };
                    // A default without a value is invalid, so a dropped value
                    // drops the attribute.
                    if let Some(value) = self.node(value, module_type, &location)? {
                        kept.push(Attribute::AnnotationDefault { name, value });
                    }
                }
                other => kept.push(other),
            }
        }
        *attributes = kept;
        Ok(())
    }

    fn annotation_list(
        &mut self,
        annotations: Vec<Annotation>,
        location: &Location,
    ) -> Result<Vec<Annotation>> {
        let mut kept = Vec::with_capacity(annotations.len());
        for annotation in annotations {
            if let Some(annotation) = self.annotation(annotation, location)? {
                kept.push(annotation);
            }
        }
        Ok(kept)
    }

    fn annotation(
        &mut self,
        annotation: Annotation,
        location: &Location,
    ) -> Result<Option<Annotation>> {
        let annotation_type = descriptor_binary_name(&self.pool.utf8(annotation.type_descriptor)?);
        let hit = self.rule.visit_annotation(&annotation_type);
        let drop = self.record(hit, location);

        let mut elements = Vec::with_capacity(annotation.elements.len());
        for element in annotation.elements {
            if let Some(element) = self.node(element, &annotation_type, location)? {
                elements.push(element);
            }
        }
        if drop {
            return Ok(None);
        }
        Ok(Some(Annotation {
            type_descriptor: annotation.type_descriptor,
            elements,
        }))
    }

    fn node(
        &mut self,
        node: AnnotationNode,
        annotation_type: &str,
        location: &Location,
    ) -> Result<Option<AnnotationNode>> {
        match node {
            AnnotationNode::Primitive { .. } => Ok(Some(node)),
            AnnotationNode::EnumRef {
                name,
                enum_type,
                constant,
            } => {
                let element_name = self.pool.utf8(name)?;
                let enum_type_name = descriptor_binary_name(&self.pool.utf8(enum_type)?);
                let constant_name = self.pool.utf8(constant)?;
                let hit = self.rule.visit_enum(
                    annotation_type,
                    &element_name,
                    &enum_type_name,
                    &constant_name,
                );
                if self.record(hit, location) {
                    return Ok(None);
                }
                Ok(Some(AnnotationNode::EnumRef {
                    name,
                    enum_type,
                    constant,
                }))
            }
            AnnotationNode::Nested { name, annotation } => Ok(self
                .annotation(annotation, location)?
                .map(|annotation| AnnotationNode::Nested { name, annotation })),
            AnnotationNode::Array { name, children } => {
                let mut kept = Vec::with_capacity(children.len());
                for child in children {
                    if let Some(child) = self.node(child, annotation_type, location)? {
                        kept.push(child);
                    }
                }
                Ok(Some(AnnotationNode::Array {
                    name,
                    children: kept,
                }))
            }
        }
    }

    /// Records a hit as a finding; returns whether the node is dropped.
    fn record(&mut self, hit: Option<Hit>, location: &Location) -> bool {
        let Some(hit) = hit else {
            return false;
        };
        self.findings.push(Finding {
            rule_id: hit.rule_id,
            module_name: self.module_name.to_string(),
            location: location.clone(),
            message: hit.message,
        });
        if self.mode.mutates() {
            self.modified = true;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ClassBuilder;

    struct DropEnum(&'static str);

    impl AnnotationRule for DropEnum {
        fn visit_enum(
            &self,
            _annotation_type: &str,
            _element_name: &str,
            _enum_type: &str,
            constant: &str,
        ) -> Option<Hit> {
            (constant == self.0).then(|| Hit {
                rule_id: "drop".to_string(),
                message: format!("dropped {constant}"),
            })
        }
    }

    struct DropAnnotation(&'static str);

    impl AnnotationRule for DropAnnotation {
        fn visit_annotation(&self, annotation_type: &str) -> Option<Hit> {
            (annotation_type == self.0).then(|| Hit {
                rule_id: "drop-annotation".to_string(),
                message: annotation_type.to_string(),
            })
        }

        fn visit_enum(
            &self,
            _annotation_type: &str,
            _element_name: &str,
            _enum_type: &str,
            constant: &str,
        ) -> Option<Hit> {
            (constant == "HIGH").then(|| Hit {
                rule_id: "drop".to_string(),
                message: constant.to_string(),
            })
        }
    }

    fn enum_constants(module: &Module, node: &AnnotationNode) -> Vec<String> {
        match node {
            AnnotationNode::Array { children, .. } => children
                .iter()
                .flat_map(|child| enum_constants(module, child))
                .collect(),
            AnnotationNode::EnumRef { constant, .. } => {
                vec![module.constant_pool.utf8(*constant).expect("utf8")]
            }
            _ => Vec::new(),
        }
    }

    #[test]
    fn middle_array_element_is_removed_in_order() {
        let bytes = ClassBuilder::new("com/example/Listener")
            .method_annotation_array(
                "onJoin",
                "Lcom/example/Phases;",
                "value",
                "Lcom/example/Phase;",
                &["EARLY", "HIGH", "LATE"],
            )
            .build();
        let mut module = Module::parse(&bytes).expect("parse");
        let mut findings = Vec::new();

        let modified =
            walk_module(&mut module, &DropEnum("HIGH"), Mode::Sanitize, &mut findings).expect("walk");

        assert!(modified);
        assert_eq!(1, findings.len());
        let rebuilt = Module::parse(&module.to_bytes().expect("write")).expect("reparse");
        let method = rebuilt
            .methods
            .iter()
            .find(|method| rebuilt.member_name(method).expect("name") == "onJoin")
            .expect("method");
        let annotation = method.annotations().next().expect("annotation");
        assert_eq!(1, annotation.elements.len());
        assert_eq!(
            vec!["EARLY".to_string(), "LATE".to_string()],
            enum_constants(&rebuilt, &annotation.elements[0])
        );
    }

    #[test]
    fn scan_mode_reports_without_dropping() {
        let bytes = ClassBuilder::new("com/example/Listener")
            .method_annotation_array(
                "onJoin",
                "Lcom/example/Phases;",
                "value",
                "Lcom/example/Phase;",
                &["EARLY", "HIGH", "LATE"],
            )
            .build();
        let mut module = Module::parse(&bytes).expect("parse");
        let mut findings = Vec::new();

        let modified =
            walk_module(&mut module, &DropEnum("HIGH"), Mode::Scan, &mut findings).expect("walk");

        assert!(!modified);
        assert_eq!(1, findings.len());
        assert_eq!(bytes, module.to_bytes().expect("write"));
    }

    #[test]
    fn children_of_dropped_annotation_are_still_reported() {
        let bytes = ClassBuilder::new("com/example/Listener")
            .class_annotation(
                "Lcom/example/Marker;",
                &[("level", "Lcom/example/Level;", "HIGH")],
            )
            .build();
        let mut module = Module::parse(&bytes).expect("parse");
        let mut findings = Vec::new();

        walk_module(
            &mut module,
            &DropAnnotation("com.example.Marker"),
            Mode::Sanitize,
            &mut findings,
        )
        .expect("walk");

        assert_eq!(2, findings.len());
        assert_eq!("drop-annotation", findings[0].rule_id);
        assert_eq!("drop", findings[1].rule_id);
        assert!(findings.iter().all(|f| f.location == Location::ClassAnnotation));
        let annotations = module.attributes.iter().find_map(|attribute| match attribute {
            Attribute::Annotations { annotations, .. } => Some(annotations),
            _ => None,
        });
        assert!(annotations.expect("attribute kept").is_empty());
    }

    #[test]
    fn parameter_and_default_locations_are_labelled() {
        let bytes = ClassBuilder::new("com/example/Settings")
            .parameter_annotation(
                "configure",
                0,
                "Lcom/example/Marker;",
                &[("level", "Lcom/example/Level;", "HIGH")],
            )
            .annotation_default("level", "Lcom/example/Level;", "HIGH")
            .build();
        let mut module = Module::parse(&bytes).expect("parse");
        let mut findings = Vec::new();

        walk_module(&mut module, &DropEnum("HIGH"), Mode::Sanitize, &mut findings).expect("walk");

        let locations: Vec<String> = findings.iter().map(|f| f.location.to_string()).collect();
        assert_eq!(
            vec!["param:0:method:configure".to_string(), "annotation-default".to_string()],
            locations
        );
        let settings = Module::parse(&module.to_bytes().expect("write")).expect("reparse");
        assert!(settings.methods.iter().all(|method| method.annotation_default().is_none()));
    }

    #[test]
    fn nested_enum_is_dropped_and_outer_annotation_kept() {
        let bytes = ClassBuilder::new("com/example/Listener")
            .method_annotation_nested(
                "onJoin",
                "Lcom/example/Outer;",
                "inner",
                "Lcom/example/Inner;",
                &[("level", "Lcom/example/Level;", "HIGH")],
            )
            .build();
        let mut module = Module::parse(&bytes).expect("parse");
        let mut findings = Vec::new();

        let modified =
            walk_module(&mut module, &DropEnum("HIGH"), Mode::Sanitize, &mut findings).expect("walk");

        assert!(modified);
        assert_eq!(1, findings.len());
        assert_eq!("method:onJoin", findings[0].location.to_string());
        let rebuilt = Module::parse(&module.to_bytes().expect("write")).expect("reparse");
        let method = rebuilt
            .methods
            .iter()
            .find(|method| rebuilt.member_name(method).expect("name") == "onJoin")
            .expect("method");
        let outer = method.annotations().next().expect("outer annotation");
        assert_eq!(
            "Lcom/example/Outer;",
            rebuilt.constant_pool.utf8(outer.type_descriptor).expect("utf8")
        );
        match outer.elements.as_slice() {
            [AnnotationNode::Nested { name, annotation }] => {
                assert_eq!("inner", rebuilt.constant_pool.utf8(*name).expect("utf8"));
                assert_eq!(
                    "Lcom/example/Inner;",
                    rebuilt
                        .constant_pool
                        .utf8(annotation.type_descriptor)
                        .expect("utf8")
                );
                assert!(annotation.elements.is_empty());
            }
            other => panic!("unexpected elements {other:?}"),
        }
    }

    #[test]
    fn field_annotations_are_reported_at_the_field() {
        let bytes = ClassBuilder::new("com/example/Listener")
            .field("count", "I")
            .field_annotation(
                "count",
                "Lcom/example/Marker;",
                &[("level", "Lcom/example/Level;", "HIGH")],
            )
            .build();
        let mut module = Module::parse(&bytes).expect("parse");
        let mut findings = Vec::new();

        walk_module(&mut module, &DropEnum("HIGH"), Mode::Sanitize, &mut findings).expect("walk");

        assert_eq!(1, findings.len());
        assert_eq!(Location::Field("count".to_string()), findings[0].location);
        assert_eq!("field:count", findings[0].location.to_string());
        let rebuilt = Module::parse(&module.to_bytes().expect("write")).expect("reparse");
        let marker = rebuilt.fields[0].annotations().next().expect("annotation kept");
        assert!(marker.elements.is_empty());
    }
}
