// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Flattening of nested payloads into per-schema entity records.
use std::sync::Arc;

use serde_json::{Map, Value};
use thiserror::Error;

use crate::entity::{Entity, EntityStore};
use crate::ident::EntityId;
use crate::schema::{Cardinality, RelationDecl, SchemaDecl, SchemaRegistry};

/// Errors raised while flattening a payload.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NormalizeError {
    /// A payload (or nested payload) is not a JSON object.
    #[error("`{schema}` payload must be a JSON object")]
    NotAnObject {
        /// Schema the payload was normalized against.
        schema: String,
    },
    /// A payload (or nested payload) has no string/number primary key.
    #[error("`{schema}` payload has no usable primary key `{primary_key}`")]
    MissingPrimaryKey {
        /// Schema the payload was normalized against.
        schema: String,
        /// Expected primary-key field.
        primary_key: String,
    },
    /// A relation names a schema the registry does not know.
    #[error("unknown schema `{0}`")]
    UnknownSchema(String),
}

/// Turns one nested payload into a partial entity store.
///
/// Implementations must be deterministic and free of side effects; the
/// reducer calls them once per upserted payload.
pub trait Normalizer {
    /// Flattens `data` against `schema`.
    fn normalize(
        &self,
        schemas: &SchemaRegistry,
        schema: &SchemaDecl,
        data: &Value,
    ) -> Result<EntityStore, NormalizeError>;
}

/// Default normalizer following declared relations into nested objects.
///
/// A relation value that is an object (`One`) or an array containing objects
/// (`Many`) is normalized recursively against the target schema and replaced
/// by the nested entity's id. Plain ids and `null` pass through. An entity
/// met twice in one payload is shallow-merged, later occurrences winning.
#[derive(Clone, Copy, Debug, Default)]
pub struct NestedNormalizer;

impl Normalizer for NestedNormalizer {
    fn normalize(
        &self,
        schemas: &SchemaRegistry,
        schema: &SchemaDecl,
        data: &Value,
    ) -> Result<EntityStore, NormalizeError> {
        let mut out = EntityStore::new();
        visit(schemas, schema, data, &mut out)?;
        Ok(out)
    }
}

// Flattens one object into `out` and returns its primary-key value.
fn visit(
    schemas: &SchemaRegistry,
    decl: &SchemaDecl,
    data: &Value,
    out: &mut EntityStore,
) -> Result<Value, NormalizeError> {
    let Value::Object(fields) = data else {
        return Err(NormalizeError::NotAnObject {
            schema: decl.name.clone(),
        });
    };
    let (id_value, id) = fields
        .get(&decl.primary_key)
        .and_then(|v| EntityId::from_value(v).map(|id| (v.clone(), id)))
        .ok_or_else(|| NormalizeError::MissingPrimaryKey {
            schema: decl.name.clone(),
            primary_key: decl.primary_key.clone(),
        })?;

    let mut flat = Map::new();
    for (field, value) in fields {
        let value = match decl.relation(field) {
            Some(relation) => flatten_relation(schemas, relation, value, out)?,
            None => value.clone(),
        };
        flat.insert(field.clone(), value);
    }

    let entity = Entity::from(flat);
    let entity = match out.get(&decl.name, &id) {
        Some(seen) => seen.merged_with(&entity),
        None => entity,
    };
    out.insert(&decl.name, id, Arc::new(entity));
    Ok(id_value)
}

fn flatten_relation(
    schemas: &SchemaRegistry,
    relation: &RelationDecl,
    value: &Value,
    out: &mut EntityStore,
) -> Result<Value, NormalizeError> {
    let target = move || {
        schemas
            .get(&relation.target)
            .ok_or_else(|| NormalizeError::UnknownSchema(relation.target.clone()))
    };
    match (relation.cardinality, value) {
        (Cardinality::One, Value::Object(_)) => visit(schemas, target()?, value, out),
        (Cardinality::Many, Value::Array(items)) if items.iter().any(Value::is_object) => {
            let target = target()?;
            items
                .iter()
                .map(|item| {
                    if item.is_object() {
                        visit(schemas, target, item, out)
                    } else {
                        Ok(item.clone())
                    }
                })
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array)
        }
        _ => Ok(value.clone()),
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use serde_json::json;

    fn registry() -> SchemaRegistry {
        SchemaRegistry::new([
            SchemaDecl::new("user"),
            SchemaDecl::new("comment").with_relation(RelationDecl::one("author", "user")),
            SchemaDecl::new("post")
                .with_relation(RelationDecl::one("author", "user"))
                .with_relation(RelationDecl::many("comments", "comment")),
        ])
        .unwrap()
    }

    fn normalize(schema: &str, data: Value) -> Result<EntityStore, NormalizeError> {
        let registry = registry();
        let decl = registry.get(schema).unwrap().clone();
        NestedNormalizer.normalize(&registry, &decl, &data)
    }

    #[test]
    fn flattens_nested_one_and_many() {
        let out = normalize(
            "post",
            json!({
                "id": "p1",
                "title": "hello",
                "author": {"id": "u1", "name": "ada"},
                "comments": [
                    {"id": 7, "text": "hi", "author": {"id": "u2"}},
                    "c9"
                ]
            }),
        )
        .unwrap();

        let post = out.get("post", &"p1".into()).unwrap();
        assert_eq!(post.get("author"), Some(&json!("u1")));
        assert_eq!(post.get("comments"), Some(&json!([7, "c9"])));
        assert_eq!(post.get("title"), Some(&json!("hello")));

        let comment = out.get("comment", &"7".into()).unwrap();
        assert_eq!(comment.get("author"), Some(&json!("u2")));
        assert_eq!(out.get("user", &"u1".into()).unwrap().get("name"), Some(&json!("ada")));
        assert!(out.contains("user", &"u2".into()));
        assert_eq!(out.len(), 4);
    }

    #[test]
    fn repeated_entities_merge_in_visit_order() {
        let out = normalize(
            "post",
            json!({
                "id": "p1",
                "author": {"id": "u1", "name": "first", "age": 3},
                "comments": [{"id": "c1", "author": {"id": "u1", "name": "second"}}]
            }),
        )
        .unwrap();
        let user = out.get("user", &"u1".into()).unwrap();
        assert_eq!(user.get("name"), Some(&json!("second")));
        assert_eq!(user.get("age"), Some(&json!(3)));
    }

    #[test]
    fn nested_payload_without_key_is_rejected() {
        let err = normalize("post", json!({"id": "p1", "author": {"name": "anon"}})).unwrap_err();
        assert_eq!(
            err,
            NormalizeError::MissingPrimaryKey {
                schema: "user".into(),
                primary_key: "id".into(),
            }
        );
        assert_eq!(
            normalize("post", json!([1, 2])).unwrap_err(),
            NormalizeError::NotAnObject {
                schema: "post".into()
            }
        );
    }

    #[test]
    fn plain_ids_and_nulls_pass_through() {
        let out = normalize("post", json!({"id": "p1", "author": null, "comments": ["c1"]})).unwrap();
        assert_eq!(out.len(), 1);
        let post = out.get("post", &"p1".into()).unwrap();
        assert_eq!(post.get("author"), Some(&Value::Null));
        assert_eq!(post.get("comments"), Some(&json!(["c1"])));
    }
}
