use std::sync::Arc;

use criterion::{Criterion, criterion_group, criterion_main};
use futures::stream;

use trellis_core::engine::{
    CheckEngine, CheckError, CheckRequest, EngineConfig, SubjectStream, TupleReader,
};
use trellis_core::schema::{SchemaRegistry, parse_schema};
use trellis_core::tuple::{ObjectRef, SnapshotToken, SubjectRef, Tuple};

const SCHEMA: &str = r#"
    definition user {}

    definition organization {
        relation owners: user
        relation admins: user
        relation members: user
        permit is_org_admin = owners + admins
        permit is_member = members + is_org_admin
    }

    definition group {
        relation org: organization
        relation members: user | group#members
        permit view = org->is_member + members
    }

    definition role {
        relation org: organization
        relation members: user | group#members
        permit has = members
        permit manage_members = org->is_org_admin
    }
"#;

struct BenchStore {
    tuples: Vec<Tuple>,
}

impl TupleReader for BenchStore {
    async fn list_subjects(
        &self,
        object: &ObjectRef,
        relation: &str,
        _snapshot: Option<&SnapshotToken>,
    ) -> Result<SubjectStream, CheckError> {
        let subjects: Vec<_> = self
            .tuples
            .iter()
            .filter(|t| &t.object == object && t.relation == relation)
            .map(|t| Ok(t.subject.clone()))
            .collect();
        Ok(Box::pin(stream::iter(subjects)))
    }

    async fn has_subject(
        &self,
        object: &ObjectRef,
        relation: &str,
        subject: &SubjectRef,
        _snapshot: Option<&SnapshotToken>,
    ) -> Result<bool, CheckError> {
        Ok(self
            .tuples
            .iter()
            .any(|t| &t.object == object && t.relation == relation && &t.subject == subject))
    }
}

fn make_engine(tuples: Vec<Tuple>) -> CheckEngine<BenchStore> {
    let registry = SchemaRegistry::compile(&parse_schema(SCHEMA).unwrap()).unwrap();
    CheckEngine::new(
        Arc::new(BenchStore { tuples }),
        Arc::new(registry),
        EngineConfig::default(),
    )
}

fn user_tuple(object: ObjectRef, relation: &str, user: &str) -> Tuple {
    Tuple::new(object, relation, SubjectRef::direct("user", user))
}

fn nested_groups(depth: usize) -> Vec<Tuple> {
    let mut tuples: Vec<Tuple> = (0..depth)
        .map(|i| {
            Tuple::new(
                ObjectRef::new("group", format!("g{i}")),
                "members",
                SubjectRef::subject_set("group", format!("g{}", i + 1), "members"),
            )
        })
        .collect();
    tuples.push(user_tuple(
        ObjectRef::new("group", format!("g{depth}")),
        "members",
        "alice",
    ));
    tuples
}

fn role_with_groups(count: usize) -> Vec<Tuple> {
    let mut tuples = Vec::with_capacity(count * 2);
    for i in 0..count {
        tuples.push(Tuple::new(
            ObjectRef::new("role", "r1"),
            "members",
            SubjectRef::subject_set("group", format!("g{i}"), "members"),
        ));
        tuples.push(user_tuple(
            ObjectRef::new("group", format!("g{i}")),
            "members",
            &format!("user{i}"),
        ));
    }
    tuples
}

fn bench_check(c: &mut Criterion, name: &str, tuples: Vec<Tuple>, request: CheckRequest) {
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();
    let engine = make_engine(tuples);

    c.bench_function(name, |b| {
        b.to_async(&rt)
            .iter(|| async { engine.check(&request).await.unwrap() });
    });
}

fn alice(permission: &str, object: ObjectRef) -> CheckRequest {
    CheckRequest::new(SubjectRef::direct("user", "alice"), permission, object)
}

fn bench_check_direct_relation(c: &mut Criterion) {
    bench_check(
        c,
        "check_direct_relation",
        vec![user_tuple(ObjectRef::new("role", "r1"), "members", "alice")],
        alice("has", ObjectRef::new("role", "r1")),
    );
}

fn bench_check_traversal(c: &mut Criterion) {
    bench_check(
        c,
        "check_traversal",
        vec![
            user_tuple(ObjectRef::new("organization", "org1"), "admins", "alice"),
            Tuple::new(
                ObjectRef::new("role", "r1"),
                "org",
                SubjectRef::direct("organization", "org1"),
            ),
        ],
        alice("manage_members", ObjectRef::new("role", "r1")),
    );
}

fn bench_check_nested_groups_5(c: &mut Criterion) {
    bench_check(
        c,
        "check_nested_groups_5",
        nested_groups(5),
        alice("view", ObjectRef::new("group", "g0")),
    );
}

fn bench_check_nested_groups_20(c: &mut Criterion) {
    bench_check(
        c,
        "check_nested_groups_20",
        nested_groups(20),
        alice("view", ObjectRef::new("group", "g0")),
    );
}

fn bench_check_fan_out_100_denied(c: &mut Criterion) {
    bench_check(
        c,
        "check_fan_out_100_denied",
        role_with_groups(100),
        alice("has", ObjectRef::new("role", "r1")),
    );
}

fn bench_check_group_cycle(c: &mut Criterion) {
    let tuples = vec![
        Tuple::new(
            ObjectRef::new("group", "a"),
            "members",
            SubjectRef::subject_set("group", "b", "members"),
        ),
        Tuple::new(
            ObjectRef::new("group", "b"),
            "members",
            SubjectRef::subject_set("group", "a", "members"),
        ),
    ];
    bench_check(
        c,
        "check_group_cycle",
        tuples,
        alice("view", ObjectRef::new("group", "a")),
    );
}

criterion_group!(
    benches,
    bench_check_direct_relation,
    bench_check_traversal,
    bench_check_nested_groups_5,
    bench_check_nested_groups_20,
    bench_check_fan_out_100_denied,
    bench_check_group_cycle,
);
criterion_main!(benches);
