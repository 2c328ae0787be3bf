// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Reducer-level behavior: upsert idempotence, identity sharing, cascades,
//! no-op deletes and batch ordering.

#![allow(clippy::unwrap_used)]

use std::sync::Arc;

use refgraph_core::{reduce, EntityKey, Operation, RelationDecl, SchemaDecl, State};
use serde_json::{json, Value};

fn blog() -> Arc<State> {
    Arc::new(
        State::from_decls([
            SchemaDecl::new("user"),
            SchemaDecl::new("post").with_relation(RelationDecl::one("author", "user")),
            SchemaDecl::new("group").with_relation(RelationDecl::many("members", "user")),
        ])
        .unwrap(),
    )
}

fn apply(state: &Arc<State>, ops: &[Operation]) -> Arc<State> {
    ops.iter()
        .fold(Arc::clone(state), |s, op| reduce(&s, op).unwrap())
}

fn field(state: &State, schema: &str, id: &str, field: &str) -> Option<Value> {
    state
        .entity(schema, &id.into())
        .and_then(|e| e.get(field).cloned())
}

// =============================================================================
// Upsert
// =============================================================================

#[test]
fn upserting_the_same_payload_twice_is_idempotent() {
    let op = Operation::upsert_one(
        "post",
        json!({"id": "p1", "title": "t", "author": {"id": "u1", "name": "ada"}}),
    );
    let once = apply(&blog(), std::slice::from_ref(&op));
    let twice = reduce(&once, &op).unwrap();

    assert_eq!(once.schema_entities(), twice.schema_entities());
    assert_eq!(once.entity_references(), twice.entity_references());
}

#[test]
fn upserting_one_entity_keeps_others_shared() {
    let state = apply(
        &blog(),
        &[
            Operation::upsert_many("user", vec![json!({"id": "u1"}), json!({"id": "u2"})]),
            Operation::upsert_one("post", json!({"id": "p1", "author": "u2"})),
        ],
    );
    let next = reduce(
        &state,
        &Operation::upsert_one("user", json!({"id": "u1", "name": "ada"})),
    )
    .unwrap();

    let u2 = "u2".into();
    assert!(Arc::ptr_eq(
        state.entity("user", &u2).unwrap(),
        next.entity("user", &u2).unwrap()
    ));
    assert!(Arc::ptr_eq(
        state.schema_entities().table("post").unwrap(),
        next.schema_entities().table("post").unwrap()
    ));
    // The previous snapshot still reads the old value.
    assert_eq!(field(&state, "user", "u1", "name"), None);
    assert_eq!(field(&next, "user", "u1", "name"), Some(json!("ada")));
}

#[test]
fn upsert_merges_fields_into_existing_entity() {
    let state = apply(
        &blog(),
        &[
            Operation::upsert_one("post", json!({"id": "p1", "title": "t", "author": "u1"})),
            Operation::upsert_one("post", json!({"id": "p1", "author": "u2"})),
        ],
    );
    assert_eq!(field(&state, "post", "p1", "title"), Some(json!("t")));
    assert_eq!(field(&state, "post", "p1", "author"), Some(json!("u2")));
    assert!(state
        .entity_references()
        .references_to(&EntityKey::new("user", "u1"))
        .is_empty());
    assert_eq!(state.check_integrity(), Ok(()));
}

#[test]
fn batch_upsert_applies_in_order() {
    let a = json!({"id": "u1", "name": "first", "age": 1});
    let b = json!({"id": "u1", "name": "second"});

    let batched = apply(&blog(), &[Operation::upsert_many("user", vec![a.clone(), b.clone()])]);
    let sequential = apply(
        &blog(),
        &[
            Operation::upsert_one("user", a.clone()),
            Operation::upsert_one("user", b.clone()),
        ],
    );
    let reversed = apply(
        &blog(),
        &[Operation::upsert_one("user", b), Operation::upsert_one("user", a)],
    );

    assert_eq!(batched.schema_entities(), sequential.schema_entities());
    assert_eq!(field(&batched, "user", "u1", "name"), Some(json!("second")));
    assert_ne!(batched.schema_entities(), reversed.schema_entities());
}

// =============================================================================
// Delete
// =============================================================================

#[test]
fn deleting_a_user_nulls_single_references() {
    let state = apply(
        &blog(),
        &[
            Operation::upsert_one("user", json!({"id": "u1"})),
            Operation::upsert_one("post", json!({"id": "p1", "author": "u1"})),
        ],
    );
    let state = reduce(&state, &Operation::delete_one("user", "u1")).unwrap();

    assert_eq!(field(&state, "post", "p1", "author"), Some(Value::Null));
    assert!(state.entity("user", &"u1".into()).is_none());
    assert!(state.entity_references().is_empty());
    assert_eq!(state.check_integrity(), Ok(()));
}

#[test]
fn deleting_a_user_prunes_collection_references() {
    let state = apply(
        &blog(),
        &[
            Operation::upsert_many("user", vec![json!({"id": "u1"}), json!({"id": "u2"}), json!({"id": "u3"})]),
            Operation::upsert_one("group", json!({"id": "g1", "members": ["u1", "u2"]})),
        ],
    );

    let state = reduce(&state, &Operation::delete_one("user", "u1")).unwrap();
    assert_eq!(field(&state, "group", "g1", "members"), Some(json!(["u2"])));

    // u3 is not a member; the group is untouched by its deletion.
    let group_before = Arc::clone(state.entity("group", &"g1".into()).unwrap());
    let state = reduce(&state, &Operation::delete_one("user", "u3")).unwrap();
    assert!(Arc::ptr_eq(
        &group_before,
        state.entity("group", &"g1".into()).unwrap()
    ));
    assert_eq!(state.check_integrity(), Ok(()));
}

#[test]
fn emptied_collections_are_not_deleted() {
    let state = apply(
        &blog(),
        &[
            Operation::upsert_one("group", json!({"id": "g1", "members": [{"id": "u1"}]})),
            Operation::delete_one("user", "u1"),
        ],
    );
    assert_eq!(field(&state, "group", "g1", "members"), Some(json!([])));
    assert!(state.entity("group", &"g1".into()).is_some());
}

#[test]
fn deleting_a_missing_entity_returns_the_same_state() {
    let state = apply(
        &blog(),
        &[
            Operation::upsert_one("user", json!({"id": "u1"})),
            Operation::upsert_one("post", json!({"id": "p1", "author": "u1"})),
        ],
    );
    let next = reduce(&state, &Operation::delete_one("user", "does-not-exist")).unwrap();
    assert!(Arc::ptr_eq(&state, &next));
    assert_eq!(state.schema_entities(), next.schema_entities());
}

#[test]
fn deleting_a_referrer_drops_its_outgoing_references() {
    let state = apply(
        &blog(),
        &[
            Operation::upsert_one("post", json!({"id": "p1", "author": {"id": "u1"}})),
            Operation::upsert_one("group", json!({"id": "g1", "members": ["u1"]})),
            Operation::delete_one("post", "p1"),
        ],
    );
    let into_u1 = state
        .entity_references()
        .references_to(&EntityKey::new("user", "u1"));
    assert_eq!(into_u1.len(), 1);
    assert_eq!(into_u1.values().next().unwrap().from_schema, "group");
    assert!(state.entity("user", &"u1".into()).is_some());
    assert_eq!(state.check_integrity(), Ok(()));
}

#[test]
fn numeric_ids_cascade_through_string_references() {
    let state = apply(
        &blog(),
        &[
            Operation::upsert_one("user", json!({"id": 7})),
            Operation::upsert_one("group", json!({"id": 1, "members": [7, "8"]})),
            Operation::delete_one("user", 7u64),
        ],
    );
    assert_eq!(field(&state, "group", "1", "members"), Some(json!(["8"])));
}

#[test]
fn float_spelled_ids_address_the_same_entity() {
    let state = apply(
        &blog(),
        &[
            Operation::upsert_one("user", json!({"id": 1.0})),
            Operation::upsert_one("post", json!({"id": "p1", "author": 1})),
            Operation::upsert_one("group", json!({"id": "g1", "members": [1.0, "2"]})),
        ],
    );
    assert_eq!(
        state
            .entity_references()
            .references_to(&EntityKey::new("user", "1"))
            .len(),
        2
    );

    let state = reduce(&state, &Operation::delete_one("user", 1u64)).unwrap();
    assert!(state.schema_entities().table("user").unwrap().is_empty());
    assert_eq!(field(&state, "post", "p1", "author"), Some(Value::Null));
    assert_eq!(field(&state, "group", "g1", "members"), Some(json!(["2"])));
    assert_eq!(state.check_integrity(), Ok(()));
}
