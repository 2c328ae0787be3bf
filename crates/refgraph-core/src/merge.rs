// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Identity-preserving merge of a partial entity store into a full one.
use std::sync::Arc;

use crate::entity::{EntityStore, SchemaTable};

/// Folds `updated` into `before` for a single schema table.
///
/// Each updated entity becomes the shallow union of its prior value and the
/// update. Entities whose union equals the prior value keep the prior `Arc`,
/// and untouched ids are carried over by reference. If nothing changed the
/// returned table is `before` itself (`Arc::ptr_eq` holds).
pub fn merge_table(before: &Arc<SchemaTable>, updated: &SchemaTable) -> Arc<SchemaTable> {
    let mut merged = Arc::clone(before);
    for (id, update) in updated {
        let next = match before.get(id) {
            Some(prior) if Arc::ptr_eq(prior, update) => continue,
            Some(prior) => {
                let union = prior.merged_with(update);
                if union == **prior {
                    continue;
                }
                Arc::new(union)
            }
            None => Arc::clone(update),
        };
        Arc::make_mut(&mut merged).insert(id.clone(), next);
    }
    merged
}

/// Folds every table of `updated` into `before`.
///
/// Tables `updated` does not mention are shared with `before` unchanged.
pub fn merge(before: &EntityStore, updated: &EntityStore) -> EntityStore {
    let mut merged = before.clone();
    let tables = merged.tables_mut();
    for (schema, table) in updated.tables() {
        let next = match tables.get(schema) {
            Some(prior) => merge_table(prior, table),
            None => Arc::clone(table),
        };
        tables.insert(schema.to_owned(), next);
    }
    merged
}
