//! Parsed (uncompiled) schema as written in the DSL.

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schema {
    pub types: Vec<TypeDefinition>,
}

impl Schema {
    pub fn get_type(&self, name: &str) -> Option<&TypeDefinition> {
        self.types.iter().find(|t| t.name == name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeDefinition {
    pub name: String,
    pub relations: Vec<RelationDef>,
    pub permits: Vec<PermitDef>,
}

impl TypeDefinition {
    pub fn get_relation(&self, name: &str) -> Option<&RelationDef> {
        self.relations.iter().find(|r| r.name == name)
    }

    pub fn get_permit(&self, name: &str) -> Option<&PermitDef> {
        self.permits.iter().find(|p| p.name == name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationDef {
    pub name: String,
    pub subject_types: Vec<SubjectTypeRef>,
}

/// An allowed subject of a relation: `user` or `group#members`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubjectTypeRef {
    pub type_name: String,
    pub relation: Option<String>,
}

impl std::fmt::Display for SubjectTypeRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.relation {
            Some(relation) => write!(f, "{}#{relation}", self.type_name),
            None => f.write_str(&self.type_name),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermitDef {
    pub name: String,
    pub rule: PermitRule,
}

/// Permit expression as parsed. Bare names are not yet known to be relations
/// or permits; [`super::registry::SchemaRegistry::compile`] resolves them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PermitRule {
    Name(String),
    Union(Vec<PermitRule>),
    Intersection(Vec<PermitRule>),
    Exclusion(Box<PermitRule>, Box<PermitRule>),
    Traverse(String, String),
}
