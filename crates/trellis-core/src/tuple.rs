use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectRef {
    pub object_type: String,
    pub object_id: String,
}

impl ObjectRef {
    pub fn new(object_type: impl Into<String>, object_id: impl Into<String>) -> Self {
        Self {
            object_type: object_type.into(),
            object_id: object_id.into(),
        }
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.object_type, self.object_id)
    }
}

/// Either a concrete principal (`user:alice`) or a subject set
/// (`group:eng#members`, every subject holding `members` on `group:eng`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubjectRef {
    pub subject_type: String,
    pub subject_id: String,
    pub subject_relation: Option<String>,
}

impl SubjectRef {
    pub fn direct(subject_type: impl Into<String>, subject_id: impl Into<String>) -> Self {
        Self {
            subject_type: subject_type.into(),
            subject_id: subject_id.into(),
            subject_relation: None,
        }
    }

    pub fn subject_set(
        subject_type: impl Into<String>,
        subject_id: impl Into<String>,
        relation: impl Into<String>,
    ) -> Self {
        Self {
            subject_type: subject_type.into(),
            subject_id: subject_id.into(),
            subject_relation: Some(relation.into()),
        }
    }

    pub fn is_subject_set(&self) -> bool {
        self.subject_relation.is_some()
    }

    /// The object half of the reference, ignoring any relation.
    pub fn as_object(&self) -> ObjectRef {
        ObjectRef::new(&self.subject_type, &self.subject_id)
    }
}

impl fmt::Display for SubjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.subject_type, self.subject_id)?;
        if let Some(ref rel) = self.subject_relation {
            write!(f, "#{rel}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Tuple {
    pub object: ObjectRef,
    pub relation: String,
    pub subject: SubjectRef,
}

impl Tuple {
    pub fn new(object: ObjectRef, relation: impl Into<String>, subject: SubjectRef) -> Self {
        Self {
            object,
            relation: relation.into(),
            subject,
        }
    }
}

impl fmt::Display for Tuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}@{}", self.object, self.relation, self.subject)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TupleWrite {
    pub object: ObjectRef,
    pub relation: String,
    pub subject: SubjectRef,
}

impl TupleWrite {
    pub fn new(object: ObjectRef, relation: impl Into<String>, subject: SubjectRef) -> Self {
        Self {
            object,
            relation: relation.into(),
            subject,
        }
    }
}

impl From<TupleWrite> for Tuple {
    fn from(write: TupleWrite) -> Self {
        Self {
            object: write.object,
            relation: write.relation,
            subject: write.subject,
        }
    }
}

/// Field-wise tuple filter; `None` matches anything.
///
/// `subject_relation` is doubly optional: `None` matches any subject,
/// `Some(None)` only concrete subjects, `Some(Some(rel))` only subject sets
/// over `rel`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TupleFilter {
    pub object_type: Option<String>,
    pub object_id: Option<String>,
    pub relation: Option<String>,
    pub subject_type: Option<String>,
    pub subject_id: Option<String>,
    pub subject_relation: Option<Option<String>>,
}

impl TupleFilter {
    /// Filter for every subject of `relation` on `object`.
    pub fn relation_of(object: &ObjectRef, relation: &str) -> Self {
        Self {
            object_type: Some(object.object_type.clone()),
            object_id: Some(object.object_id.clone()),
            relation: Some(relation.to_string()),
            ..Default::default()
        }
    }

    /// Filter matching exactly one tuple.
    pub fn exact(object: &ObjectRef, relation: &str, subject: &SubjectRef) -> Self {
        Self {
            subject_type: Some(subject.subject_type.clone()),
            subject_id: Some(subject.subject_id.clone()),
            subject_relation: Some(subject.subject_relation.clone()),
            ..Self::relation_of(object, relation)
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    pub fn matches(&self, tuple: &Tuple) -> bool {
        if let Some(ref ot) = self.object_type
            && ot != &tuple.object.object_type
        {
            return false;
        }
        if let Some(ref oi) = self.object_id
            && oi != &tuple.object.object_id
        {
            return false;
        }
        if let Some(ref r) = self.relation
            && r != &tuple.relation
        {
            return false;
        }
        if let Some(ref st) = self.subject_type
            && st != &tuple.subject.subject_type
        {
            return false;
        }
        if let Some(ref si) = self.subject_id
            && si != &tuple.subject.subject_id
        {
            return false;
        }
        if let Some(ref sr) = self.subject_relation
            && sr != &tuple.subject.subject_relation
        {
            return false;
        }
        true
    }
}

/// Opaque name of a consistent read snapshot, issued by the store.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SnapshotToken(String);

impl SnapshotToken {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for SnapshotToken {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for SnapshotToken {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for SnapshotToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // --- ObjectRef ---

    #[test]
    fn object_ref_display() {
        let obj = ObjectRef::new("organization", "org1");

        assert_eq!(obj.to_string(), "organization:org1");
    }

    // --- SubjectRef ---

    #[test]
    fn direct_subject_display() {
        let subject = SubjectRef::direct("user", "alice");

        assert_eq!(subject.to_string(), "user:alice");
        assert!(!subject.is_subject_set());
    }

    #[test]
    fn subject_set_display() {
        let subject = SubjectRef::subject_set("group", "eng", "members");

        assert_eq!(subject.to_string(), "group:eng#members");
        assert!(subject.is_subject_set());
    }

    #[test]
    fn subject_set_as_object_drops_relation() {
        let subject = SubjectRef::subject_set("role", "r1", "members");

        assert_eq!(subject.as_object(), ObjectRef::new("role", "r1"));
    }

    #[test]
    fn direct_and_subject_set_are_distinct() {
        let direct = SubjectRef::direct("group", "eng");
        let set = SubjectRef::subject_set("group", "eng", "members");

        assert_ne!(direct, set);
    }

    // --- Tuple ---

    #[test]
    fn tuple_display_subject_set() {
        let tuple = Tuple::new(
            ObjectRef::new("role", "r1"),
            "members",
            SubjectRef::subject_set("group", "eng", "members"),
        );

        assert_eq!(tuple.to_string(), "role:r1#members@group:eng#members");
    }

    #[test]
    fn tuple_from_tuple_write() {
        let write = TupleWrite::new(
            ObjectRef::new("organization", "org1"),
            "owners",
            SubjectRef::direct("user", "alice"),
        );

        let tuple: Tuple = write.into();

        assert_eq!(tuple.object, ObjectRef::new("organization", "org1"));
        assert_eq!(tuple.relation, "owners");
        assert_eq!(tuple.subject, SubjectRef::direct("user", "alice"));
    }

    // --- TupleFilter ---

    #[test]
    fn empty_filter_matches_everything() {
        let filter = TupleFilter::default();
        let tuple = Tuple::new(
            ObjectRef::new("organization", "org1"),
            "owners",
            SubjectRef::direct("user", "alice"),
        );

        assert!(filter.is_empty());
        assert!(filter.matches(&tuple));
    }

    #[test]
    fn relation_of_filter_ignores_subject() {
        let object = ObjectRef::new("organization", "org1");
        let filter = TupleFilter::relation_of(&object, "owners");

        assert!(filter.matches(&Tuple::new(
            object.clone(),
            "owners",
            SubjectRef::direct("user", "alice"),
        )));
        assert!(filter.matches(&Tuple::new(
            object.clone(),
            "owners",
            SubjectRef::subject_set("group", "g1", "members"),
        )));
        assert!(!filter.matches(&Tuple::new(
            object,
            "admins",
            SubjectRef::direct("user", "alice"),
        )));
    }

    #[test]
    fn exact_filter_distinguishes_subject_sets() {
        let object = ObjectRef::new("role", "r1");
        let filter = TupleFilter::exact(&object, "members", &SubjectRef::direct("group", "eng"));

        assert!(filter.matches(&Tuple::new(
            object.clone(),
            "members",
            SubjectRef::direct("group", "eng"),
        )));
        assert!(!filter.matches(&Tuple::new(
            object,
            "members",
            SubjectRef::subject_set("group", "eng", "members"),
        )));
    }

    #[test]
    fn filter_by_subject_relation_none_matches_direct_only() {
        let filter = TupleFilter {
            subject_relation: Some(None),
            ..Default::default()
        };
        let direct = Tuple::new(
            ObjectRef::new("group", "g1"),
            "members",
            SubjectRef::direct("user", "alice"),
        );
        let set = Tuple::new(
            ObjectRef::new("group", "g1"),
            "members",
            SubjectRef::subject_set("group", "eng", "members"),
        );

        assert!(filter.matches(&direct));
        assert!(!filter.matches(&set));
    }

    // --- SnapshotToken ---

    #[test]
    fn snapshot_token_is_opaque_text() {
        let token = SnapshotToken::from("r42");

        assert_eq!(token.as_str(), "r42");
        assert_eq!(token.to_string(), "r42");
        assert_eq!(token, SnapshotToken::new("r42".to_string()));
    }
}
