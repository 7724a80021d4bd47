//! Compiled, immutable view of a [`Schema`] used by the check engine.
//!
//! Every permit expression is resolved once into an [`Expr`] tree keyed by
//! `(type, permit)`. Names that are neither relations nor permits, traversals
//! into types that do not define the target permit, and permits that call
//! each other in a loop are all rejected here, before any check can run.

use std::collections::{HashMap, HashSet};

use crate::engine::CheckError;
use crate::tuple::TupleWrite;

use super::types::{PermitDef, PermitRule, RelationDef, Schema, SubjectTypeRef, TypeDefinition};

/// A compiled permit expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expr {
    /// Subject is in any of these relations of the current object.
    Direct(Vec<String>),
    /// Another permit on the current object.
    Permit(String),
    /// Some object related via `relation` satisfies `permit`.
    Traverse { relation: String, permit: String },
    Union(Vec<Expr>),
    Intersection(Vec<Expr>),
    Exclusion(Box<Expr>, Box<Expr>),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchemaError {
    #[error("relation '{type_name}#{relation}' allows unknown subject type '{subject_type}'")]
    UnknownSubjectType {
        type_name: String,
        relation: String,
        subject_type: String,
    },
    #[error(
        "relation '{type_name}#{relation}' allows '{subject_type}#{subject_relation}', which '{subject_type}' does not define"
    )]
    UnknownSubjectRelation {
        type_name: String,
        relation: String,
        subject_type: String,
        subject_relation: String,
    },
    #[error("permit '{type_name}.{permit}' references unknown name '{name}'")]
    UnknownName {
        type_name: String,
        permit: String,
        name: String,
    },
    #[error("permit '{type_name}.{permit}' traverses '{name}', which is not a relation")]
    TraverseFromPermit {
        type_name: String,
        permit: String,
        name: String,
    },
    #[error(
        "permit '{type_name}.{permit}' traverses to '{target_type}', which does not define '{target}'"
    )]
    UnknownTraversalTarget {
        type_name: String,
        permit: String,
        target_type: String,
        target: String,
    },
    #[error("permits of '{type_name}' form a cycle: {}", .cycle.join(" -> "))]
    CyclicPermit {
        type_name: String,
        cycle: Vec<String>,
    },
}

/// Why a relationship write does not fit the schema.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TupleViolation {
    #[error("unknown object type '{0}'")]
    UnknownType(String),
    #[error("type '{type_name}' declares no relation '{relation}'")]
    UnknownRelation { type_name: String, relation: String },
    #[error("relation '{type_name}#{relation}' does not accept subject '{subject}'")]
    SubjectNotAllowed {
        type_name: String,
        relation: String,
        subject: String,
    },
}

#[derive(Debug, Clone)]
pub struct CompiledType {
    name: String,
    relations: HashMap<String, RelationDef>,
    permits: HashMap<String, Expr>,
    relation_rules: HashMap<String, Expr>,
}

impl CompiledType {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn relations(&self) -> &HashMap<String, RelationDef> {
        &self.relations
    }

    pub fn permits(&self) -> &HashMap<String, Expr> {
        &self.permits
    }

    pub fn relation(&self, name: &str) -> Option<&RelationDef> {
        self.relations.get(name)
    }

    pub fn permit(&self, name: &str) -> Option<&Expr> {
        self.permits.get(name)
    }

    /// The expression a check for `name` evaluates: the permit itself, or for
    /// a plain relation the direct membership test on it. Relations are
    /// checkable so subject sets such as `group:eng#members` resolve.
    pub fn rule(&self, name: &str) -> Option<&Expr> {
        self.permits
            .get(name)
            .or_else(|| self.relation_rules.get(name))
    }
}

#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    types: HashMap<String, CompiledType>,
    source: Option<Schema>,
}

impl SchemaRegistry {
    pub fn compile(schema: &Schema) -> Result<Self, SchemaError> {
        for type_def in &schema.types {
            for relation in &type_def.relations {
                for allowed in &relation.subject_types {
                    check_subject_type(schema, type_def, relation, allowed)?;
                }
            }
        }

        let mut types = HashMap::with_capacity(schema.types.len());
        for type_def in &schema.types {
            let compiled = compile_type(schema, type_def)?;
            types.insert(type_def.name.clone(), compiled);
        }

        Ok(Self {
            types,
            source: Some(schema.clone()),
        })
    }

    pub fn resolve(&self, object_type: &str) -> Result<&CompiledType, CheckError> {
        self.types
            .get(object_type)
            .ok_or_else(|| CheckError::UnknownType(object_type.to_string()))
    }

    /// The schema this registry was compiled from, if any.
    pub fn schema(&self) -> Option<&Schema> {
        self.source.as_ref()
    }

    pub fn validate_tuple(&self, write: &TupleWrite) -> Result<(), TupleViolation> {
        let object_type = &write.object.object_type;
        let compiled = self
            .types
            .get(object_type)
            .ok_or_else(|| TupleViolation::UnknownType(object_type.clone()))?;
        let relation =
            compiled
                .relation(&write.relation)
                .ok_or_else(|| TupleViolation::UnknownRelation {
                    type_name: object_type.clone(),
                    relation: write.relation.clone(),
                })?;

        let accepted = relation.subject_types.iter().any(|allowed| {
            allowed.type_name == write.subject.subject_type
                && allowed.relation == write.subject.subject_relation
        });
        if accepted {
            Ok(())
        } else {
            Err(TupleViolation::SubjectNotAllowed {
                type_name: object_type.clone(),
                relation: write.relation.clone(),
                subject: write.subject.to_string(),
            })
        }
    }
}

fn check_subject_type(
    schema: &Schema,
    type_def: &TypeDefinition,
    relation: &RelationDef,
    allowed: &SubjectTypeRef,
) -> Result<(), SchemaError> {
    let target =
        schema
            .get_type(&allowed.type_name)
            .ok_or_else(|| SchemaError::UnknownSubjectType {
                type_name: type_def.name.clone(),
                relation: relation.name.clone(),
                subject_type: allowed.type_name.clone(),
            })?;

    if let Some(ref subject_relation) = allowed.relation
        && target.get_relation(subject_relation).is_none()
        && target.get_permit(subject_relation).is_none()
    {
        return Err(SchemaError::UnknownSubjectRelation {
            type_name: type_def.name.clone(),
            relation: relation.name.clone(),
            subject_type: allowed.type_name.clone(),
            subject_relation: subject_relation.clone(),
        });
    }
    Ok(())
}

fn compile_type(schema: &Schema, type_def: &TypeDefinition) -> Result<CompiledType, SchemaError> {
    let mut permits = HashMap::with_capacity(type_def.permits.len());
    for permit in &type_def.permits {
        let compiler = RuleCompiler {
            schema,
            type_def,
            permit: &permit.name,
        };
        permits.insert(permit.name.clone(), compiler.compile(&permit.rule)?);
    }

    detect_permit_cycle(&type_def.name, &type_def.permits, &permits)?;

    let relations = type_def
        .relations
        .iter()
        .map(|r| (r.name.clone(), r.clone()))
        .collect();
    let relation_rules = type_def
        .relations
        .iter()
        .map(|r| (r.name.clone(), Expr::Direct(vec![r.name.clone()])))
        .collect();

    Ok(CompiledType {
        name: type_def.name.clone(),
        relations,
        permits,
        relation_rules,
    })
}

struct RuleCompiler<'a> {
    schema: &'a Schema,
    type_def: &'a TypeDefinition,
    permit: &'a str,
}

impl RuleCompiler<'_> {
    fn compile(&self, rule: &PermitRule) -> Result<Expr, SchemaError> {
        match rule {
            PermitRule::Name(name) => self.compile_name(name),
            PermitRule::Traverse(relation, permit) => self.compile_traverse(relation, permit),
            PermitRule::Union(children) => {
                let compiled = children
                    .iter()
                    .map(|c| self.compile(c))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(merge_union(compiled))
            }
            PermitRule::Intersection(children) => Ok(Expr::Intersection(
                children
                    .iter()
                    .map(|c| self.compile(c))
                    .collect::<Result<Vec<_>, _>>()?,
            )),
            PermitRule::Exclusion(base, excluded) => Ok(Expr::Exclusion(
                Box::new(self.compile(base)?),
                Box::new(self.compile(excluded)?),
            )),
        }
    }

    fn compile_name(&self, name: &str) -> Result<Expr, SchemaError> {
        if self.type_def.get_relation(name).is_some() {
            Ok(Expr::Direct(vec![name.to_string()]))
        } else if self.type_def.get_permit(name).is_some() {
            Ok(Expr::Permit(name.to_string()))
        } else {
            Err(SchemaError::UnknownName {
                type_name: self.type_def.name.clone(),
                permit: self.permit.to_string(),
                name: name.to_string(),
            })
        }
    }

    fn compile_traverse(&self, relation: &str, permit: &str) -> Result<Expr, SchemaError> {
        let Some(relation_def) = self.type_def.get_relation(relation) else {
            return Err(if self.type_def.get_permit(relation).is_some() {
                SchemaError::TraverseFromPermit {
                    type_name: self.type_def.name.clone(),
                    permit: self.permit.to_string(),
                    name: relation.to_string(),
                }
            } else {
                SchemaError::UnknownName {
                    type_name: self.type_def.name.clone(),
                    permit: self.permit.to_string(),
                    name: relation.to_string(),
                }
            });
        };

        for allowed in &relation_def.subject_types {
            let defines_target = self.schema.get_type(&allowed.type_name).is_some_and(|t| {
                t.get_permit(permit).is_some() || t.get_relation(permit).is_some()
            });
            if !defines_target {
                return Err(SchemaError::UnknownTraversalTarget {
                    type_name: self.type_def.name.clone(),
                    permit: self.permit.to_string(),
                    target_type: allowed.type_name.clone(),
                    target: permit.to_string(),
                });
            }
        }

        Ok(Expr::Traverse {
            relation: relation.to_string(),
            permit: permit.to_string(),
        })
    }
}

/// Folds adjacent direct terms of a union into one multi-relation term and
/// unwraps single-child unions.
fn merge_union(children: Vec<Expr>) -> Expr {
    let mut merged: Vec<Expr> = Vec::with_capacity(children.len());
    for child in children {
        match (merged.last_mut(), child) {
            (Some(Expr::Direct(relations)), Expr::Direct(more)) => {
                for relation in more {
                    if !relations.contains(&relation) {
                        relations.push(relation);
                    }
                }
            }
            (_, child) => merged.push(child),
        }
    }

    if merged.len() == 1 {
        merged.remove(0)
    } else {
        Expr::Union(merged)
    }
}

fn collect_permit_refs<'e>(expr: &'e Expr, out: &mut Vec<&'e str>) {
    match expr {
        Expr::Permit(name) => out.push(name),
        Expr::Direct(_) | Expr::Traverse { .. } => {}
        Expr::Union(children) | Expr::Intersection(children) => {
            for child in children {
                collect_permit_refs(child, out);
            }
        }
        Expr::Exclusion(base, excluded) => {
            collect_permit_refs(base, out);
            collect_permit_refs(excluded, out);
        }
    }
}

/// Permits that reach themselves through same-object permit references never
/// consult a tuple on the way round, so the loop can only ever be cut.
fn detect_permit_cycle(
    type_name: &str,
    declared: &[PermitDef],
    permits: &HashMap<String, Expr>,
) -> Result<(), SchemaError> {
    let mut done: HashSet<&str> = HashSet::new();

    for root in declared {
        if done.contains(root.name.as_str()) {
            continue;
        }
        let mut stack: Vec<&str> = Vec::new();
        visit_permit(&root.name, permits, &mut stack, &mut done).map_err(|cycle| {
            SchemaError::CyclicPermit {
                type_name: type_name.to_string(),
                cycle,
            }
        })?;
    }
    Ok(())
}

fn visit_permit<'p>(
    name: &'p str,
    permits: &'p HashMap<String, Expr>,
    stack: &mut Vec<&'p str>,
    done: &mut HashSet<&'p str>,
) -> Result<(), Vec<String>> {
    if let Some(start) = stack.iter().position(|n| *n == name) {
        let mut cycle: Vec<String> = stack[start..].iter().map(|n| n.to_string()).collect();
        cycle.push(name.to_string());
        return Err(cycle);
    }
    if done.contains(name) {
        return Ok(());
    }
    let Some(expr) = permits.get(name) else {
        return Ok(());
    };

    stack.push(name);
    let mut refs = Vec::new();
    collect_permit_refs(expr, &mut refs);
    for next in refs {
        visit_permit(next, permits, stack, done)?;
    }
    stack.pop();
    done.insert(name);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::parse_schema;
    use crate::tuple::{ObjectRef, SubjectRef};

    fn compile(input: &str) -> Result<SchemaRegistry, SchemaError> {
        SchemaRegistry::compile(&parse_schema(input).unwrap())
    }

    const ORG: &str = r#"
        definition user {}
        definition global_role {
            relation members: user
            permit is_admin = members
        }
        definition role {
            relation org: organization
            relation members: user | group#members
            permit has = members
            permit manage_members = org->manage_roles
        }
        definition group {
            relation org: organization
            relation members: user
        }
        definition organization {
            relation owners: user
            relation admins: user
            relation manage_roles_roles: role
            relation global_admins: global_role
            permit is_org_admin = owners + admins + global_admins->is_admin
            permit manage_roles = is_org_admin + manage_roles_roles->has
        }
    "#;

    #[test]
    fn resolve_exposes_relations_and_permits() {
        let registry = compile(ORG).unwrap();

        let org = registry.resolve("organization").unwrap();
        assert_eq!(org.name(), "organization");
        assert_eq!(org.relations().len(), 4);
        assert!(org.relation("owners").is_some());
        assert_eq!(org.permits().len(), 2);
    }

    #[test]
    fn resolve_unknown_type_fails() {
        let registry = compile(ORG).unwrap();

        let err = registry.resolve("tenant").unwrap_err();

        assert!(matches!(err, CheckError::UnknownType(ref t) if t == "tenant"));
    }

    #[test]
    fn adjacent_direct_terms_merge() {
        let registry = compile(ORG).unwrap();

        let org = registry.resolve("organization").unwrap();
        assert_eq!(
            org.permit("is_org_admin").unwrap(),
            &Expr::Union(vec![
                Expr::Direct(vec!["owners".to_string(), "admins".to_string()]),
                Expr::Traverse {
                    relation: "global_admins".to_string(),
                    permit: "is_admin".to_string(),
                },
            ])
        );
    }

    #[test]
    fn permit_names_compile_to_permit_terms() {
        let registry = compile(ORG).unwrap();

        let org = registry.resolve("organization").unwrap();
        assert_eq!(
            org.permit("manage_roles").unwrap(),
            &Expr::Union(vec![
                Expr::Permit("is_org_admin".to_string()),
                Expr::Traverse {
                    relation: "manage_roles_roles".to_string(),
                    permit: "has".to_string(),
                },
            ])
        );
    }

    #[test]
    fn rule_falls_back_to_relation_membership() {
        let registry = compile(ORG).unwrap();

        let group = registry.resolve("group").unwrap();
        assert_eq!(
            group.rule("members"),
            Some(&Expr::Direct(vec!["members".to_string()]))
        );
        assert_eq!(group.rule("manage"), None);
    }

    #[test]
    fn permit_without_terms_compiles_to_empty_union() {
        let registry = compile("definition user {} definition doc { relation owners: user permit archive = }").unwrap();

        let doc = registry.resolve("doc").unwrap();
        assert_eq!(doc.permit("archive"), Some(&Expr::Union(vec![])));
    }

    #[test]
    fn reject_unknown_subject_type() {
        let err = compile("definition org { relation owners: person }").unwrap_err();

        assert_eq!(
            err,
            SchemaError::UnknownSubjectType {
                type_name: "org".to_string(),
                relation: "owners".to_string(),
                subject_type: "person".to_string(),
            }
        );
    }

    #[test]
    fn reject_unknown_subject_set_relation() {
        let err = compile(
            "definition user {} definition group { relation members: user } definition role { relation members: group#owners }",
        )
        .unwrap_err();

        assert!(matches!(
            err,
            SchemaError::UnknownSubjectRelation { ref subject_relation, .. } if subject_relation == "owners"
        ));
    }

    #[test]
    fn reject_unknown_name_in_expression() {
        let err =
            compile("definition user {} definition org { relation owners: user permit manage = admins }")
                .unwrap_err();

        assert_eq!(
            err,
            SchemaError::UnknownName {
                type_name: "org".to_string(),
                permit: "manage".to_string(),
                name: "admins".to_string(),
            }
        );
    }

    #[test]
    fn reject_traversal_from_permit() {
        let err = compile(
            "definition user {} definition org { relation owners: user permit admin = owners permit manage = admin->x }",
        )
        .unwrap_err();

        assert!(matches!(err, SchemaError::TraverseFromPermit { ref name, .. } if name == "admin"));
    }

    #[test]
    fn reject_traversal_to_undefined_permit() {
        let err = compile(
            r#"
            definition user {}
            definition org { relation owners: user }
            definition group {
                relation org: org
                permit view = org->is_member
            }
        "#,
        )
        .unwrap_err();

        assert_eq!(
            err,
            SchemaError::UnknownTraversalTarget {
                type_name: "group".to_string(),
                permit: "view".to_string(),
                target_type: "org".to_string(),
                target: "is_member".to_string(),
            }
        );
    }

    #[test]
    fn reject_permit_cycle() {
        let err = compile(
            "definition user {} definition org { relation owners: user permit a = owners + b permit b = a }",
        )
        .unwrap_err();

        assert_eq!(
            err,
            SchemaError::CyclicPermit {
                type_name: "org".to_string(),
                cycle: vec!["a".to_string(), "b".to_string(), "a".to_string()],
            }
        );
    }

    #[test]
    fn traversal_cycles_between_objects_are_allowed() {
        let registry = compile(
            "definition user {} definition group { relation parent: group relation members: user permit view = members + parent->view }",
        );

        assert!(registry.is_ok());
    }

    #[test]
    fn validate_tuple_accepts_declared_subject() {
        let registry = compile(ORG).unwrap();
        let write = TupleWrite::new(
            ObjectRef::new("role", "r1"),
            "members",
            SubjectRef::subject_set("group", "eng", "members"),
        );

        assert!(registry.validate_tuple(&write).is_ok());
    }

    #[test]
    fn validate_tuple_rejects_undeclared_relation() {
        let registry = compile(ORG).unwrap();
        let write = TupleWrite::new(
            ObjectRef::new("organization", "org1"),
            "members",
            SubjectRef::direct("user", "alice"),
        );

        assert_eq!(
            registry.validate_tuple(&write).unwrap_err(),
            TupleViolation::UnknownRelation {
                type_name: "organization".to_string(),
                relation: "members".to_string(),
            }
        );
    }

    #[test]
    fn validate_tuple_rejects_wrong_subject_type() {
        let registry = compile(ORG).unwrap();
        let write = TupleWrite::new(
            ObjectRef::new("organization", "org1"),
            "owners",
            SubjectRef::subject_set("group", "eng", "members"),
        );

        assert!(matches!(
            registry.validate_tuple(&write).unwrap_err(),
            TupleViolation::SubjectNotAllowed { .. }
        ));
    }
}
