// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Operation surface and the state reducer.
//!
//! Every call is atomic: it either returns a complete successor snapshot or
//! an error, and never modifies the snapshot it was given.
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, instrument};

use crate::cascade::entities_after_deletion;
use crate::entity::EntityStore;
use crate::ident::EntityId;
use crate::merge::merge;
use crate::normalize::{NestedNormalizer, NormalizeError, Normalizer};
use crate::state::State;

/// Operations accepted by [`reduce`].
///
/// The JSON form is tagged by `"type"`; unknown tags decode to
/// [`Operation::Unrecognized`], which the reducer passes through.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Operation {
    /// Insert or update one entity (plus any nested entities).
    UpsertOne {
        /// Target schema.
        schema: String,
        /// Payload; must carry the schema's primary key.
        data: Value,
    },
    /// Sequential upsert of several payloads.
    UpsertMany {
        /// Target schema.
        schema: String,
        /// Payloads, applied in order.
        data: Vec<Value>,
    },
    /// Delete one entity and clear references to it.
    DeleteOne {
        /// Target schema.
        schema: String,
        /// Id of the entity to delete.
        id: EntityId,
    },
    /// Any operation this reducer does not handle.
    #[serde(other)]
    Unrecognized,
}

impl Operation {
    /// Builds an upsert-one operation.
    pub fn upsert_one(schema: impl Into<String>, data: Value) -> Self {
        Self::UpsertOne {
            schema: schema.into(),
            data,
        }
    }

    /// Builds an upsert-many operation.
    pub fn upsert_many(schema: impl Into<String>, data: Vec<Value>) -> Self {
        Self::UpsertMany {
            schema: schema.into(),
            data,
        }
    }

    /// Builds a delete-one operation.
    pub fn delete_one(schema: impl Into<String>, id: impl Into<EntityId>) -> Self {
        Self::DeleteOne {
            schema: schema.into(),
            id: id.into(),
        }
    }

    /// Short name used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::UpsertOne { .. } => "upsert_one",
            Self::UpsertMany { .. } => "upsert_many",
            Self::DeleteOne { .. } => "delete_one",
            Self::Unrecognized => "unrecognized",
        }
    }
}

/// Reasons an operation is rejected. The input state is never affected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReduceError {
    /// The operation names a schema that was never declared.
    #[error("unknown schema `{0}`")]
    UnknownSchema(String),
    /// The payload is not a JSON object.
    #[error("`{schema}` payload must be a JSON object")]
    NotAnObject {
        /// Target schema.
        schema: String,
    },
    /// The payload lacks a string/number value for the primary key.
    #[error("`{schema}` payload has no usable primary key `{primary_key}`")]
    MissingPrimaryKey {
        /// Target schema.
        schema: String,
        /// Expected primary-key field.
        primary_key: String,
    },
    /// The normalizer rejected the payload (typically a nested entity).
    #[error("normalization failed: {0}")]
    Normalize(#[from] NormalizeError),
    /// The normalizer emitted entities for a schema that was never declared.
    #[error("normalizer emitted entities for undeclared schema `{0}`")]
    UndeclaredOutput(String),
    /// The normalizer keyed an entity by something other than its primary key.
    #[error("normalizer stored `{schema}` entity under `{key}` but its primary key reads {found:?}")]
    MisKeyedOutput {
        /// Schema of the entity.
        schema: String,
        /// Key the normalizer used.
        key: EntityId,
        /// Id read from the entity's primary-key field.
        found: Option<EntityId>,
    },
    /// The normalizer dropped the entity being upserted.
    #[error("normalizer output lacks the upserted `{schema}` entity `{id}`")]
    MissingRoot {
        /// Target schema.
        schema: String,
        /// Id of the payload.
        id: EntityId,
    },
}

/// Applies `op` to `state` using the [`NestedNormalizer`].
pub fn reduce(state: &Arc<State>, op: &Operation) -> Result<Arc<State>, ReduceError> {
    reduce_with(&NestedNormalizer, state, op)
}

/// Applies `op` to `state` using `normalizer` for upserts.
///
/// Unrecognized operations and deletes of absent entities return `state`
/// itself (`Arc::ptr_eq` holds).
#[instrument(level = "debug", skip_all, fields(op = op.kind()))]
pub fn reduce_with<N>(
    normalizer: &N,
    state: &Arc<State>,
    op: &Operation,
) -> Result<Arc<State>, ReduceError>
where
    N: Normalizer + ?Sized,
{
    match op {
        Operation::UpsertOne { schema, data } => {
            upsert_one(normalizer, state, schema, data).map(Arc::new)
        }
        Operation::UpsertMany { schema, data } => {
            let mut next = Arc::clone(state);
            for item in data {
                next = Arc::new(upsert_one(normalizer, &next, schema, item)?);
            }
            Ok(next)
        }
        Operation::DeleteOne { schema, id } => delete_one(state, schema, id),
        Operation::Unrecognized => Ok(Arc::clone(state)),
    }
}

// Normalizer output must uphold the store's key invariant before it is merged.
fn check_normalized(
    state: &State,
    schema: &str,
    id: &EntityId,
    partial: &EntityStore,
) -> Result<(), ReduceError> {
    for (table_schema, table) in partial.tables() {
        let decl = state
            .schemas()
            .get(table_schema)
            .ok_or_else(|| ReduceError::UndeclaredOutput(table_schema.to_owned()))?;
        for (key, entity) in table.iter() {
            let found = entity.id(&decl.primary_key);
            if found.as_ref() != Some(key) {
                return Err(ReduceError::MisKeyedOutput {
                    schema: table_schema.to_owned(),
                    key: key.clone(),
                    found,
                });
            }
        }
    }
    if !partial.contains(schema, id) {
        return Err(ReduceError::MissingRoot {
            schema: schema.to_owned(),
            id: id.clone(),
        });
    }
    Ok(())
}

fn upsert_one<N>(
    normalizer: &N,
    state: &State,
    schema: &str,
    data: &Value,
) -> Result<State, ReduceError>
where
    N: Normalizer + ?Sized,
{
    let decl = state
        .schemas()
        .get(schema)
        .ok_or_else(|| ReduceError::UnknownSchema(schema.to_owned()))?;
    let Value::Object(fields) = data else {
        return Err(ReduceError::NotAnObject {
            schema: schema.to_owned(),
        });
    };
    let Some(id) = fields.get(&decl.primary_key).and_then(EntityId::from_value) else {
        return Err(ReduceError::MissingPrimaryKey {
            schema: schema.to_owned(),
            primary_key: decl.primary_key.clone(),
        });
    };

    let partial = normalizer.normalize(state.schemas(), decl, data)?;
    check_normalized(state, schema, &id, &partial)?;
    let entities = merge(state.schema_entities(), &partial);
    let touched = entities.restrict_to(&partial);
    let mut index = state.entity_references().clone();
    index.upsert_references_for_entities(state.schema_references(), &touched);

    debug!(
        schema,
        id = %id,
        touched = touched.len(),
        references = index.len(),
        "upserted entity"
    );
    Ok(state.with_parts(index, entities))
}

fn delete_one(
    state: &Arc<State>,
    schema: &str,
    id: &EntityId,
) -> Result<Arc<State>, ReduceError> {
    if state.schemas().get(schema).is_none() {
        return Err(ReduceError::UnknownSchema(schema.to_owned()));
    }
    if !state.schema_entities().contains(schema, id) {
        debug!(schema, id = %id, "delete of absent entity is a no-op");
        return Ok(Arc::clone(state));
    }

    let cascaded = entities_after_deletion(state, schema, id);
    let mut entities = merge(state.schema_entities(), &cascaded);
    let mut index = state.entity_references().clone();
    // Re-deriving the rewritten referrers drops every fact aimed at `id`.
    let rewritten = entities.restrict_to(&cascaded);
    index.upsert_references_for_entities(state.schema_references(), &rewritten);
    let outgoing = index.remove_references_from_entity(schema, id);
    entities.remove(schema, id);

    debug!(
        schema,
        id = %id,
        referrers = cascaded.len(),
        outgoing,
        "deleted entity"
    );
    Ok(Arc::new(state.with_parts(index, entities)))
}
