// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Immutable state snapshots produced by the reducer.
use std::sync::Arc;

use thiserror::Error;

use crate::entity::{Entity, EntityStore};
use crate::ident::{EntityId, EntityKey, ReferenceKey};
use crate::reference::ReferenceIndex;
use crate::schema::{SchemaDecl, SchemaError, SchemaRegistry};
use crate::schema_refs::SchemaReferenceMap;

/// Consistency violations reported by [`State::check_integrity`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IntegrityError {
    /// The store holds a table for a schema that was never declared.
    #[error("entity table `{0}` has no schema declaration")]
    UndeclaredSchema(String),
    /// An entity is stored under a key that differs from its primary key.
    #[error("`{schema}` entity stored under `{key}` carries id {found:?}")]
    KeyMismatch {
        /// Schema of the entity.
        schema: String,
        /// Key it is stored under.
        key: EntityId,
        /// Id read from its primary-key field.
        found: Option<EntityId>,
    },
    /// A reference present in an entity field has no index fact.
    #[error("reference {slot} -> {target} is missing from the index")]
    MissingReference {
        /// Referencing slot.
        slot: ReferenceKey,
        /// Referenced entity.
        target: EntityKey,
    },
    /// The index holds a fact no entity field backs.
    #[error("index holds orphaned reference {slot} -> {target}")]
    OrphanedReference {
        /// Referencing slot.
        slot: ReferenceKey,
        /// Referenced entity.
        target: EntityKey,
    },
    /// Facts agree but the index's source-side table does not.
    #[error("reference index source table is out of sync with its facts")]
    IndexDesync,
}

/// One immutable snapshot of the entity graph.
///
/// Every part sits behind an `Arc`: the reducer builds a new `State` per
/// operation and shares whatever it did not change with the previous one.
/// A snapshot held by a reader stays valid after the reducer moves on.
#[derive(Clone, Debug, PartialEq)]
pub struct State {
    schemas: Arc<SchemaRegistry>,
    schema_references: Arc<SchemaReferenceMap>,
    entity_references: Arc<ReferenceIndex>,
    schema_entities: Arc<EntityStore>,
}

impl State {
    /// Creates the initial state: an empty table per schema and an empty index.
    pub fn new(registry: SchemaRegistry) -> Self {
        let schema_references = SchemaReferenceMap::from_registry(&registry);
        let schema_entities = EntityStore::with_schemas(registry.iter().map(|d| d.name.as_str()));
        Self {
            schemas: Arc::new(registry),
            schema_references: Arc::new(schema_references),
            entity_references: Arc::new(ReferenceIndex::new()),
            schema_entities: Arc::new(schema_entities),
        }
    }

    /// Validates `decls` and creates the initial state.
    pub fn from_decls(decls: impl IntoIterator<Item = SchemaDecl>) -> Result<Self, SchemaError> {
        SchemaRegistry::new(decls).map(Self::new)
    }

    /// Schema declarations.
    pub fn schemas(&self) -> &SchemaRegistry {
        &self.schemas
    }

    /// Reference fields per schema.
    pub fn schema_references(&self) -> &SchemaReferenceMap {
        &self.schema_references
    }

    /// The reference index.
    pub fn entity_references(&self) -> &ReferenceIndex {
        &self.entity_references
    }

    /// The entity store.
    pub fn schema_entities(&self) -> &EntityStore {
        &self.schema_entities
    }

    /// Looks up one entity.
    pub fn entity(&self, schema: &str, id: &EntityId) -> Option<&Arc<Entity>> {
        self.schema_entities.get(schema, id)
    }

    /// Successor snapshot sharing the static parts with `self`.
    pub(crate) fn with_parts(&self, index: ReferenceIndex, entities: EntityStore) -> Self {
        Self {
            schemas: Arc::clone(&self.schemas),
            schema_references: Arc::clone(&self.schema_references),
            entity_references: Arc::new(index),
            schema_entities: Arc::new(entities),
        }
    }

    /// Verifies the store key invariant and that the reference index exactly
    /// matches the reference fields present in the store.
    ///
    /// Cost is a full rebuild of the index; meant for tests and tooling.
    pub fn check_integrity(&self) -> Result<(), IntegrityError> {
        for (schema, table) in self.schema_entities.tables() {
            let Some(decl) = self.schemas.get(schema) else {
                return Err(IntegrityError::UndeclaredSchema(schema.to_owned()));
            };
            for (key, entity) in table.iter() {
                let found = entity.id(&decl.primary_key);
                if found.as_ref() != Some(key) {
                    return Err(IntegrityError::KeyMismatch {
                        schema: schema.to_owned(),
                        key: key.clone(),
                        found,
                    });
                }
            }
        }

        let rebuilt = ReferenceIndex::rebuild(&self.schema_references, &self.schema_entities);
        for fact in rebuilt.iter() {
            let indexed = self.entity_references.references_to(&fact.target());
            if indexed.get(&fact.key()) != Some(fact) {
                return Err(IntegrityError::MissingReference {
                    slot: fact.key(),
                    target: fact.target(),
                });
            }
        }
        for fact in self.entity_references.iter() {
            if rebuilt.references_to(&fact.target()).get(&fact.key()) != Some(fact) {
                return Err(IntegrityError::OrphanedReference {
                    slot: fact.key(),
                    target: fact.target(),
                });
            }
        }
        if *self.entity_references != rebuilt {
            return Err(IntegrityError::IndexDesync);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use crate::schema::RelationDecl;
    use serde_json::json;

    #[test]
    fn initial_state_is_empty_and_consistent() {
        let state = State::from_decls([
            SchemaDecl::new("user"),
            SchemaDecl::new("post").with_relation(RelationDecl::one("author", "user")),
        ])
        .unwrap();
        assert!(state.schema_entities().is_empty());
        assert!(state.schema_entities().table("post").is_some());
        assert!(state.entity_references().is_empty());
        assert_eq!(state.schema_references().fields("post").len(), 1);
        assert_eq!(state.check_integrity(), Ok(()));
    }

    #[test]
    fn integrity_check_reports_unindexed_reference() {
        let state = State::from_decls([
            SchemaDecl::new("user"),
            SchemaDecl::new("post").with_relation(RelationDecl::one("author", "user")),
        ])
        .unwrap();
        let mut entities = state.schema_entities().clone();
        let post = Entity::from_value(json!({"id": "p1", "author": "u1"})).unwrap();
        entities.insert("post", "p1".into(), Arc::new(post));
        let broken = state.with_parts(ReferenceIndex::new(), entities);

        assert_eq!(
            broken.check_integrity(),
            Err(IntegrityError::MissingReference {
                slot: ReferenceKey {
                    source: EntityKey::new("post", "p1"),
                    field: "author".into(),
                },
                target: EntityKey::new("user", "u1"),
            })
        );
    }

    #[test]
    fn integrity_check_reports_key_mismatch() {
        let state = State::from_decls([SchemaDecl::new("user")]).unwrap();
        let mut entities = state.schema_entities().clone();
        let user = Entity::from_value(json!({"id": "u2"})).unwrap();
        entities.insert("user", "u1".into(), Arc::new(user));
        let broken = state.with_parts(ReferenceIndex::new(), entities);

        assert!(matches!(
            broken.check_integrity(),
            Err(IntegrityError::KeyMismatch { .. })
        ));
    }
}
