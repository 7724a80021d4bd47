use super::types::Schema;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaLimits {
    pub max_types: usize,
    pub max_relations_per_type: usize,
    pub max_permits_per_type: usize,
}

impl Default for SchemaLimits {
    fn default() -> Self {
        Self {
            max_types: 50,
            max_relations_per_type: 30,
            max_permits_per_type: 30,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("too many types: {count} exceeds limit of {limit}")]
    TooManyTypes { count: usize, limit: usize },
    #[error("too many relations in type '{type_name}': {count} exceeds limit of {limit}")]
    TooManyRelations {
        type_name: String,
        count: usize,
        limit: usize,
    },
    #[error("too many permits in type '{type_name}': {count} exceeds limit of {limit}")]
    TooManyPermits {
        type_name: String,
        count: usize,
        limit: usize,
    },
}

/// A schema change that would strand stored tuples or callers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BreakingChange {
    TypeRemoved { type_name: String },
    RelationRemoved { type_name: String, relation: String },
    SubjectTypeRemoved {
        type_name: String,
        relation: String,
        subject_type: String,
    },
    PermitRemoved { type_name: String, permit: String },
}

impl std::fmt::Display for BreakingChange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TypeRemoved { type_name } => write!(f, "type '{type_name}' removed"),
            Self::RelationRemoved {
                type_name,
                relation,
            } => write!(f, "relation '{type_name}#{relation}' removed"),
            Self::SubjectTypeRemoved {
                type_name,
                relation,
                subject_type,
            } => write!(
                f,
                "relation '{type_name}#{relation}' no longer accepts '{subject_type}'"
            ),
            Self::PermitRemoved { type_name, permit } => {
                write!(f, "permit '{type_name}.{permit}' removed")
            }
        }
    }
}

pub fn validate_schema_limits(
    schema: &Schema,
    limits: &SchemaLimits,
) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if schema.types.len() > limits.max_types {
        errors.push(ValidationError::TooManyTypes {
            count: schema.types.len(),
            limit: limits.max_types,
        });
    }

    for type_def in &schema.types {
        if type_def.relations.len() > limits.max_relations_per_type {
            errors.push(ValidationError::TooManyRelations {
                type_name: type_def.name.clone(),
                count: type_def.relations.len(),
                limit: limits.max_relations_per_type,
            });
        }
        if type_def.permits.len() > limits.max_permits_per_type {
            errors.push(ValidationError::TooManyPermits {
                type_name: type_def.name.clone(),
                count: type_def.permits.len(),
                limit: limits.max_permits_per_type,
            });
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Lists what `new` drops relative to `old`. Additions, including newly
/// accepted subject types, and rewritten permit expressions are never
/// breaking. Removing a permit is: callers checking it would start failing
/// with an unknown-permit error.
pub fn detect_breaking_changes(old: &Schema, new: &Schema) -> Vec<BreakingChange> {
    let mut changes = Vec::new();

    for old_type in &old.types {
        let Some(new_type) = new.get_type(&old_type.name) else {
            changes.push(BreakingChange::TypeRemoved {
                type_name: old_type.name.clone(),
            });
            continue;
        };

        for old_rel in &old_type.relations {
            let Some(new_rel) = new_type.get_relation(&old_rel.name) else {
                changes.push(BreakingChange::RelationRemoved {
                    type_name: old_type.name.clone(),
                    relation: old_rel.name.clone(),
                });
                continue;
            };
            changes.extend(
                old_rel
                    .subject_types
                    .iter()
                    .filter(|allowed| !new_rel.subject_types.contains(allowed))
                    .map(|allowed| BreakingChange::SubjectTypeRemoved {
                        type_name: old_type.name.clone(),
                        relation: old_rel.name.clone(),
                        subject_type: allowed.to_string(),
                    }),
            );
        }

        changes.extend(
            old_type
                .permits
                .iter()
                .filter(|p| new_type.get_permit(&p.name).is_none())
                .map(|p| BreakingChange::PermitRemoved {
                    type_name: old_type.name.clone(),
                    permit: p.name.clone(),
                }),
        );
    }

    changes
}
