// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Entity values and the per-schema entity store.
use std::collections::BTreeMap;
use std::sync::Arc;

use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::ident::EntityId;

/// Canonical 256-bit digest.
pub type Hash = [u8; 32];

/// One record: a flat mapping from field name to JSON value.
///
/// Entities are shared behind `Arc` inside an [`EntityStore`]; a changed
/// entity is always a new value, never an in-place edit of a shared one.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Entity {
    fields: Map<String, Value>,
}

impl Entity {
    /// Creates an entity with no fields.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Wraps a JSON object; returns `None` for any other JSON shape.
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Object(fields) => Some(Self { fields }),
            _ => None,
        }
    }

    /// Returns the value stored under `field`.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// Stores `value` under `field`, returning the previous value.
    pub fn insert(&mut self, field: impl Into<String>, value: Value) -> Option<Value> {
        self.fields.insert(field.into(), value)
    }

    /// Borrows every field.
    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    /// Reads the entity id out of `primary_key`.
    pub fn id(&self, primary_key: &str) -> Option<EntityId> {
        self.fields.get(primary_key).and_then(EntityId::from_value)
    }

    /// Shallow field union with `update` taking precedence.
    ///
    /// Explicit `null`s in `update` overwrite; absent fields keep the prior
    /// value.
    #[must_use]
    pub fn merged_with(&self, update: &Self) -> Self {
        let mut fields = self.fields.clone();
        for (field, value) in &update.fields {
            fields.insert(field.clone(), value.clone());
        }
        Self { fields }
    }

    /// Converts back into a JSON object value.
    pub fn into_value(self) -> Value {
        Value::Object(self.fields)
    }
}

impl From<Map<String, Value>> for Entity {
    fn from(fields: Map<String, Value>) -> Self {
        Self { fields }
    }
}

/// Entities of one schema keyed by id.
pub type SchemaTable = BTreeMap<EntityId, Arc<Entity>>;

/// Mapping schema → id → entity.
///
/// Tables and entities are `Arc`-shared, so cloning a store is cheap and a
/// clone keeps pointing at the same entity values until one side writes.
/// Writes go through `Arc::make_mut`, copying a table only when it is shared.
/// The same type doubles as a *partial* store (normalizer output, cascade
/// output) holding only the entities an operation touches.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct EntityStore {
    tables: BTreeMap<String, Arc<SchemaTable>>,
}

impl EntityStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store with an empty table for each schema name.
    pub fn with_schemas<'a>(schemas: impl IntoIterator<Item = &'a str>) -> Self {
        Self {
            tables: schemas
                .into_iter()
                .map(|s| (s.to_owned(), Arc::new(SchemaTable::new())))
                .collect(),
        }
    }

    /// Returns the table for `schema`.
    pub fn table(&self, schema: &str) -> Option<&Arc<SchemaTable>> {
        self.tables.get(schema)
    }

    /// Returns the entity `id` of `schema`.
    pub fn get(&self, schema: &str, id: &EntityId) -> Option<&Arc<Entity>> {
        self.tables.get(schema).and_then(|t| t.get(id))
    }

    /// Returns `true` if the entity exists.
    pub fn contains(&self, schema: &str, id: &EntityId) -> bool {
        self.get(schema, id).is_some()
    }

    /// Inserts or replaces an entity, creating the table if needed.
    pub fn insert(
        &mut self,
        schema: &str,
        id: EntityId,
        entity: Arc<Entity>,
    ) -> Option<Arc<Entity>> {
        let table = self.tables.entry(schema.to_owned()).or_default();
        Arc::make_mut(table).insert(id, entity)
    }

    /// Removes an entity. The (possibly emptied) table stays in place.
    pub fn remove(&mut self, schema: &str, id: &EntityId) -> Option<Arc<Entity>> {
        let table = self.tables.get_mut(schema)?;
        if !table.contains_key(id) {
            return None;
        }
        Arc::make_mut(table).remove(id)
    }

    /// Iterates `(schema, table)` in schema-name order.
    pub fn tables(&self) -> impl Iterator<Item = (&str, &Arc<SchemaTable>)> {
        self.tables.iter().map(|(s, t)| (s.as_str(), t))
    }

    /// Iterates every entity as `(schema, id, entity)` in deterministic order.
    pub fn entities(&self) -> impl Iterator<Item = (&str, &EntityId, &Arc<Entity>)> {
        self.tables
            .iter()
            .flat_map(|(s, t)| t.iter().map(move |(id, e)| (s.as_str(), id, e)))
    }

    /// Total number of entities across all tables.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tables.values().map(|t| t.len()).sum()
    }

    /// Returns `true` when no table holds an entity.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tables.values().all(|t| t.is_empty())
    }

    /// Mutable access to the table map for the merge engine.
    pub(crate) fn tables_mut(&mut self) -> &mut BTreeMap<String, Arc<SchemaTable>> {
        &mut self.tables
    }

    /// Returns this store's current entities for every `(schema, id)` present
    /// in `keys`. Entries absent here are skipped.
    #[must_use]
    pub fn restrict_to(&self, keys: &Self) -> Self {
        let mut out = Self::new();
        for (schema, id, _) in keys.entities() {
            if let Some(entity) = self.get(schema, id) {
                out.insert(schema, id.clone(), Arc::clone(entity));
            }
        }
        out
    }

    /// Computes a canonical hash of the entire store.
    ///
    /// Layout:
    /// 1. Header: `b"REFGRAPH_STORE_HASH_V1\0"`
    /// 2. Table count (u64 LE)
    /// 3. Tables (sorted by name): `b"S\0"` + name length (u64 LE) + name +
    ///    entity count (u64 LE)
    /// 4. Entities (sorted by id): `b"E\0"` + id length + id + JSON length +
    ///    canonical JSON bytes (fields in sorted order)
    ///
    /// Empty tables contribute their header, so a store that declared a
    /// schema hashes differently from one that never saw it.
    pub fn canonical_hash(&self) -> Result<Hash, serde_json::Error> {
        let mut hasher = blake3::Hasher::new();
        hasher.update(b"REFGRAPH_STORE_HASH_V1\0");
        hasher.update(&(self.tables.len() as u64).to_le_bytes());
        for (schema, table) in &self.tables {
            hasher.update(b"S\0");
            update_len_prefixed(&mut hasher, schema.as_bytes());
            hasher.update(&(table.len() as u64).to_le_bytes());
            for (id, entity) in table.iter() {
                hasher.update(b"E\0");
                update_len_prefixed(&mut hasher, id.as_str().as_bytes());
                let bytes = serde_json::to_vec(entity.fields())?;
                update_len_prefixed(&mut hasher, &bytes);
            }
        }
        Ok(*hasher.finalize().as_bytes())
    }
}

fn update_len_prefixed(hasher: &mut blake3::Hasher, bytes: &[u8]) {
    hasher.update(&(bytes.len() as u64).to_le_bytes());
    hasher.update(bytes);
}

struct TableView<'a>(&'a SchemaTable);

impl Serialize for TableView<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (id, entity) in self.0 {
            map.serialize_entry(id, &**entity)?;
        }
        map.end()
    }
}

impl Serialize for EntityStore {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.tables.len()))?;
        for (schema, table) in &self.tables {
            map.serialize_entry(schema, &TableView(table))?;
        }
        map.end()
    }
}
