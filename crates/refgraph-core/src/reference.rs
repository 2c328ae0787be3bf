// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Reference index: every directed `source.field -> target` fact in the store.
use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use serde_json::Value;

use crate::entity::EntityStore;
use crate::ident::{EntityId, EntityKey, ReferenceKey};
use crate::schema::Cardinality;
use crate::schema_refs::{FieldReference, SchemaReferenceMap};

/// One derived fact: `(from_schema, from_id).via_field` points at
/// `(to_schema, to_id)`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Reference {
    /// Schema of the referencing entity.
    pub from_schema: String,
    /// Id of the referencing entity.
    pub from_id: EntityId,
    /// Field holding the reference.
    pub via_field: String,
    /// Schema of the referenced entity.
    pub to_schema: String,
    /// Id of the referenced entity.
    pub to_id: EntityId,
    /// Cardinality of `via_field`.
    pub relation: Cardinality,
}

impl Reference {
    /// Identity of the referencing slot.
    pub fn key(&self) -> ReferenceKey {
        ReferenceKey {
            source: self.source(),
            field: self.via_field.clone(),
        }
    }

    /// Identity of the referencing entity.
    pub fn source(&self) -> EntityKey {
        EntityKey::new(self.from_schema.clone(), self.from_id.clone())
    }

    /// Identity of the referenced entity.
    pub fn target(&self) -> EntityKey {
        EntityKey::new(self.to_schema.clone(), self.to_id.clone())
    }
}

static NO_REFERENCES: BTreeMap<ReferenceKey, Reference> = BTreeMap::new();

/// Secondary index of reference facts, keyed by target.
///
/// Lookup by target runs in `O(log targets + referrers)`, which keeps
/// deletion cascades proportional to the actual referrers instead of the
/// whole store. A forward table (`source -> field -> targets`) makes removal
/// by source `O(outgoing facts)` without scanning target buckets.
///
/// Both tables drop emptied buckets, so an index maintained incrementally
/// compares equal to one rebuilt from the same store.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ReferenceIndex {
    /// Target entity → referencing slots.
    incoming: BTreeMap<EntityKey, BTreeMap<ReferenceKey, Reference>>,
    /// Source entity → reference field → targets currently listed there.
    outgoing: BTreeMap<EntityKey, BTreeMap<String, BTreeSet<EntityKey>>>,
}

impl ReferenceIndex {
    /// Creates an empty index.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Derives the index for `store` from scratch.
    pub fn rebuild(map: &SchemaReferenceMap, store: &EntityStore) -> Self {
        let mut index = Self::new();
        index.upsert_references_for_entities(map, store);
        index
    }

    /// All references pointing at `target`; empty when nothing does.
    pub fn references_to(&self, target: &EntityKey) -> &BTreeMap<ReferenceKey, Reference> {
        self.incoming.get(target).unwrap_or(&NO_REFERENCES)
    }

    /// All references held by `source`, in field then target order.
    pub fn references_from<'a>(
        &'a self,
        source: &'a EntityKey,
    ) -> impl Iterator<Item = &'a Reference> + 'a {
        self.outgoing
            .get(source)
            .into_iter()
            .flatten()
            .flat_map(move |(field, targets)| {
                targets.iter().filter_map(move |target| {
                    let key = ReferenceKey {
                        source: source.clone(),
                        field: field.clone(),
                    };
                    self.incoming.get(target).and_then(|slots| slots.get(&key))
                })
            })
    }

    /// Iterates every fact, grouped by target.
    pub fn iter(&self) -> impl Iterator<Item = &Reference> {
        self.incoming.values().flat_map(BTreeMap::values)
    }

    /// Number of facts.
    #[must_use]
    pub fn len(&self) -> usize {
        self.incoming.values().map(BTreeMap::len).sum()
    }

    /// Returns `true` when no fact is indexed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.incoming.is_empty()
    }

    /// Re-derives the facts of every reference field on every entity in
    /// `updated` from the entity's current values.
    ///
    /// Facts no longer backed by a value are removed; new ones are added.
    /// Schemas without reference fields are skipped.
    pub fn upsert_references_for_entities(
        &mut self,
        map: &SchemaReferenceMap,
        updated: &EntityStore,
    ) {
        for (schema, id, entity) in updated.entities() {
            let fields = map.fields(schema);
            if fields.is_empty() {
                continue;
            }
            let source = EntityKey::new(schema, id.clone());
            for field in fields {
                self.replace_field(&source, field, entity.get(&field.field));
            }
        }
    }

    /// Removes every fact whose source is `(from_schema, from_id)`.
    ///
    /// Returns the number of facts removed.
    pub fn remove_references_from_entity(&mut self, from_schema: &str, from_id: &EntityId) -> usize {
        let source = EntityKey::new(from_schema, from_id.clone());
        let Some(fields) = self.outgoing.remove(&source) else {
            return 0;
        };
        let mut removed = 0usize;
        for (field, targets) in fields {
            let key = ReferenceKey {
                source: source.clone(),
                field,
            };
            for target in targets {
                let found = self.remove_incoming(&target, &key);
                debug_assert!(found, "outgoing table listed {key} -> {target} without a fact");
                removed = removed.saturating_add(usize::from(found));
            }
        }
        removed
    }

    fn replace_field(&mut self, source: &EntityKey, field: &FieldReference, value: Option<&Value>) {
        let next: BTreeSet<EntityKey> = target_ids(field.cardinality, value)
            .map(|id| EntityKey::new(field.target.clone(), id))
            .collect();
        let prev = self
            .outgoing
            .get(source)
            .and_then(|fields| fields.get(&field.field))
            .cloned()
            .unwrap_or_default();
        if prev == next {
            return;
        }

        let key = ReferenceKey {
            source: source.clone(),
            field: field.field.clone(),
        };
        for stale in prev.difference(&next) {
            let removed = self.remove_incoming(stale, &key);
            debug_assert!(removed, "outgoing table listed {key} -> {stale} without a fact");
        }
        for target in next.difference(&prev) {
            let fact = Reference {
                from_schema: source.schema.clone(),
                from_id: source.id.clone(),
                via_field: field.field.clone(),
                to_schema: target.schema.clone(),
                to_id: target.id.clone(),
                relation: field.cardinality,
            };
            self.incoming
                .entry(target.clone())
                .or_default()
                .insert(key.clone(), fact);
        }

        if next.is_empty() {
            let source_is_empty = self.outgoing.get_mut(source).is_some_and(|fields| {
                fields.remove(&field.field);
                fields.is_empty()
            });
            if source_is_empty {
                self.outgoing.remove(source);
            }
        } else {
            self.outgoing
                .entry(source.clone())
                .or_default()
                .insert(field.field.clone(), next);
        }
    }

    fn remove_incoming(&mut self, target: &EntityKey, key: &ReferenceKey) -> bool {
        let Some(slots) = self.incoming.get_mut(target) else {
            return false;
        };
        let removed = slots.remove(key).is_some();
        if slots.is_empty() {
            self.incoming.remove(target);
        }
        removed
    }
}

/// Target ids listed by a reference field value.
///
/// `null`, absent values and non-id shapes yield nothing; for `Many` only
/// the id elements of an array count.
pub(crate) fn target_ids(
    cardinality: Cardinality,
    value: Option<&Value>,
) -> impl Iterator<Item = EntityId> + '_ {
    let (single, list) = match (cardinality, value) {
        (Cardinality::One, Some(v)) => (EntityId::from_value(v), None),
        (Cardinality::Many, Some(Value::Array(items))) => (None, Some(items)),
        _ => (None, None),
    };
    single
        .into_iter()
        .chain(list.into_iter().flatten().filter_map(EntityId::from_value))
}
