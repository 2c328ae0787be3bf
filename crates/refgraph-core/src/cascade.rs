// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Rewrites of referencing entities required by a deletion.
use std::sync::Arc;

use serde_json::Value;
use tracing::trace;

use crate::entity::EntityStore;
use crate::ident::{EntityId, EntityKey};
use crate::schema::Cardinality;
use crate::state::State;

/// Computes the referrers of `(deleted_schema, deleted_id)` with the dangling
/// reference removed.
///
/// The result is a partial store holding only entities that change:
/// `Cardinality::One` fields become `null`, `Cardinality::Many` fields drop
/// every occurrence of the deleted id. A referrer pointing at the deleted
/// entity through several fields appears once with all of them rewritten.
///
/// The cascade is single-level: a referrer whose field becomes empty or
/// `null` is rewritten, never deleted. Referrers missing from the store are
/// skipped. Cost is `O(referrers)`; nothing else in the store is visited.
pub fn entities_after_deletion(
    state: &State,
    deleted_schema: &str,
    deleted_id: &EntityId,
) -> EntityStore {
    let target = EntityKey::new(deleted_schema, deleted_id.clone());
    let mut rewritten = EntityStore::new();

    for reference in state.entity_references().references_to(&target).values() {
        let current = rewritten
            .get(&reference.from_schema, &reference.from_id)
            .or_else(|| {
                state
                    .schema_entities()
                    .get(&reference.from_schema, &reference.from_id)
            })
            .cloned();
        let Some(current) = current else {
            trace!(referrer = %reference.key(), "referrer already gone; skipping");
            continue;
        };

        let next_value = match reference.relation {
            Cardinality::One => Value::Null,
            Cardinality::Many => match current.get(&reference.via_field) {
                Some(Value::Array(items)) => Value::Array(
                    items
                        .iter()
                        .filter(|item| !deleted_id.matches(item))
                        .cloned()
                        .collect(),
                ),
                _ => {
                    trace!(referrer = %reference.key(), "collection field is not a list; skipping");
                    continue;
                }
            },
        };

        trace!(referrer = %reference.key(), target = %target, "clearing dangling reference");
        let mut next = (*current).clone();
        next.insert(reference.via_field.clone(), next_value);
        rewritten.insert(
            &reference.from_schema,
            reference.from_id.clone(),
            Arc::new(next),
        );
    }

    rewritten
}
