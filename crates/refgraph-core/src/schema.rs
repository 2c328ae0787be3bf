// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Schema declarations and the validated registry built from them.
use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// How many targets a reference field holds.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Cardinality {
    /// A single target id (or `null`).
    One,
    /// An unordered collection of target ids.
    Many,
}

/// Declaration of one reference field.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct RelationDecl {
    /// Field on the declaring schema that holds the reference.
    pub field: String,
    /// Name of the referenced schema.
    pub target: String,
    /// Whether the field holds one id or many.
    pub cardinality: Cardinality,
}

impl RelationDecl {
    /// Declares a single-valued reference.
    pub fn one(field: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            target: target.into(),
            cardinality: Cardinality::One,
        }
    }

    /// Declares a collection-valued reference.
    pub fn many(field: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            target: target.into(),
            cardinality: Cardinality::Many,
        }
    }
}

fn default_primary_key() -> String {
    "id".to_owned()
}

/// Declaration of one entity schema.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct SchemaDecl {
    /// Schema name; unique across the registry.
    pub name: String,
    /// Field holding the entity id. Defaults to `id`.
    #[serde(default = "default_primary_key")]
    pub primary_key: String,
    /// Declared reference fields.
    #[serde(default)]
    pub relations: Vec<RelationDecl>,
}

impl SchemaDecl {
    /// Declares a schema keyed by `id` with no relations.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            primary_key: default_primary_key(),
            relations: Vec::new(),
        }
    }

    /// Overrides the primary-key field.
    pub fn with_primary_key(mut self, field: impl Into<String>) -> Self {
        self.primary_key = field.into();
        self
    }

    /// Appends a relation declaration.
    pub fn with_relation(mut self, relation: RelationDecl) -> Self {
        self.relations.push(relation);
        self
    }

    /// Returns the relation declared on `field`, if any.
    pub fn relation(&self, field: &str) -> Option<&RelationDecl> {
        self.relations.iter().find(|r| r.field == field)
    }
}

/// Malformed schema declarations, detected before any operation runs.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaError {
    /// A schema was declared with an empty name.
    #[error("schema name must not be empty")]
    EmptyName,
    /// Two schemas share a name.
    #[error("schema `{0}` declared more than once")]
    DuplicateSchema(String),
    /// A schema has an empty primary-key field name.
    #[error("schema `{0}` has an empty primary key")]
    EmptyPrimaryKey(String),
    /// A relation has an empty field name.
    #[error("schema `{0}` declares a relation with an empty field name")]
    EmptyRelationField(String),
    /// The same field carries two relation declarations.
    #[error("schema `{schema}` declares relation field `{field}` more than once")]
    DuplicateRelation {
        /// Declaring schema.
        schema: String,
        /// Repeated field.
        field: String,
    },
    /// A relation is declared on the primary-key field.
    #[error("schema `{schema}` declares a relation on its primary key `{field}`")]
    RelationOnPrimaryKey {
        /// Declaring schema.
        schema: String,
        /// Primary-key field.
        field: String,
    },
    /// A relation points at a schema that was never declared.
    #[error("schema `{schema}` field `{field}` targets unknown schema `{target}`")]
    UnknownTarget {
        /// Declaring schema.
        schema: String,
        /// Relation field.
        field: String,
        /// Missing target schema.
        target: String,
    },
}

/// Validated, immutable set of schema declarations keyed by name.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SchemaRegistry {
    schemas: BTreeMap<String, SchemaDecl>,
}

impl SchemaRegistry {
    /// Validates `decls` and builds the registry.
    ///
    /// # Errors
    ///
    /// Returns the first [`SchemaError`] found; declarations are checked in
    /// the order given.
    pub fn new(decls: impl IntoIterator<Item = SchemaDecl>) -> Result<Self, SchemaError> {
        let mut schemas = BTreeMap::new();
        for decl in decls {
            if decl.name.is_empty() {
                return Err(SchemaError::EmptyName);
            }
            if decl.primary_key.is_empty() {
                return Err(SchemaError::EmptyPrimaryKey(decl.name));
            }
            let mut fields = BTreeSet::new();
            for relation in &decl.relations {
                if relation.field.is_empty() {
                    return Err(SchemaError::EmptyRelationField(decl.name.clone()));
                }
                if relation.field == decl.primary_key {
                    return Err(SchemaError::RelationOnPrimaryKey {
                        schema: decl.name.clone(),
                        field: relation.field.clone(),
                    });
                }
                if !fields.insert(relation.field.as_str()) {
                    return Err(SchemaError::DuplicateRelation {
                        schema: decl.name.clone(),
                        field: relation.field.clone(),
                    });
                }
            }
            if schemas.contains_key(&decl.name) {
                return Err(SchemaError::DuplicateSchema(decl.name));
            }
            schemas.insert(decl.name.clone(), decl);
        }

        // Targets resolve against the full name set; order and cycles are fine.
        for decl in schemas.values() {
            for relation in &decl.relations {
                if !schemas.contains_key(&relation.target) {
                    return Err(SchemaError::UnknownTarget {
                        schema: decl.name.clone(),
                        field: relation.field.clone(),
                        target: relation.target.clone(),
                    });
                }
            }
        }

        Ok(Self { schemas })
    }

    /// Returns the declaration for `name`.
    pub fn get(&self, name: &str) -> Option<&SchemaDecl> {
        self.schemas.get(name)
    }

    /// Iterates declarations in name order.
    pub fn iter(&self) -> impl Iterator<Item = &SchemaDecl> {
        self.schemas.values()
    }

    /// Number of declared schemas.
    #[must_use]
    pub fn len(&self) -> usize {
        self.schemas.len()
    }

    /// Returns `true` when no schema is declared.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    fn blog() -> Vec<SchemaDecl> {
        vec![
            SchemaDecl::new("post")
                .with_relation(RelationDecl::one("author", "user"))
                .with_relation(RelationDecl::many("tags", "tag")),
            SchemaDecl::new("user").with_relation(RelationDecl::one("best_friend", "user")),
            SchemaDecl::new("tag").with_primary_key("slug"),
        ]
    }

    #[test]
    fn accepts_forward_and_self_references() {
        let registry = SchemaRegistry::new(blog()).unwrap();
        assert_eq!(registry.len(), 3);
        assert_eq!(registry.get("tag").unwrap().primary_key, "slug");
        let names: Vec<_> = registry.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, ["post", "tag", "user"]);
    }

    #[test]
    fn rejects_unknown_target() {
        let err = SchemaRegistry::new([
            SchemaDecl::new("post").with_relation(RelationDecl::one("author", "person"))
        ])
        .unwrap_err();
        assert_eq!(
            err,
            SchemaError::UnknownTarget {
                schema: "post".into(),
                field: "author".into(),
                target: "person".into(),
            }
        );
    }

    #[test]
    fn rejects_duplicates_and_relation_on_primary_key() {
        let mut decls = blog();
        decls.push(SchemaDecl::new("user"));
        assert_eq!(
            SchemaRegistry::new(decls).unwrap_err(),
            SchemaError::DuplicateSchema("user".into())
        );

        let err = SchemaRegistry::new([SchemaDecl::new("user")
            .with_relation(RelationDecl::one("friend", "user"))
            .with_relation(RelationDecl::many("friend", "user"))])
        .unwrap_err();
        assert!(matches!(err, SchemaError::DuplicateRelation { .. }));

        let err = SchemaRegistry::new([
            SchemaDecl::new("user").with_relation(RelationDecl::one("id", "user"))
        ])
        .unwrap_err();
        assert!(matches!(err, SchemaError::RelationOnPrimaryKey { .. }));
    }

    #[test]
    fn rejects_empty_names() {
        assert_eq!(
            SchemaRegistry::new([SchemaDecl::new("")]).unwrap_err(),
            SchemaError::EmptyName
        );
        assert_eq!(
            SchemaRegistry::new([SchemaDecl::new("user").with_primary_key("")]).unwrap_err(),
            SchemaError::EmptyPrimaryKey("user".into())
        );
    }

    #[test]
    fn decl_deserializes_with_defaults() {
        let decl: SchemaDecl = serde_json::from_str(
            r#"{"name":"group","relations":[{"field":"members","target":"user","cardinality":"many"}]}"#,
        )
        .unwrap();
        assert_eq!(decl.primary_key, "id");
        assert_eq!(decl.relation("members"), Some(&RelationDecl::many("members", "user")));
    }
}
