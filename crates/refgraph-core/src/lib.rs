// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! refgraph-core: normalized entity graph with a reference index.
//!
//! State is a set of immutable snapshots. Each [`reduce`] call folds one
//! operation (upsert-one, upsert-many, delete-one) into the previous snapshot:
//! payloads are normalized into per-schema records, merged without disturbing
//! untouched entities, and the reference index is kept in step so deletions
//! can clear dangling references in every referrer.
#![forbid(unsafe_code)]
#![deny(missing_docs, rust_2018_idioms, unused_must_use)]

mod cascade;
/// Schema declarations persisted through a storage port.
pub mod config;
mod dispatcher;
mod entity;
mod ident;
mod merge;
mod normalize;
mod record;
mod reducer;
mod reference;
mod schema;
mod schema_refs;
mod state;

/// Deletion cascade over the reference index.
pub use cascade::entities_after_deletion;
/// Snapshot holder applying operations in order.
pub use dispatcher::Dispatcher;
/// Entity values, the entity store and its canonical digest.
pub use entity::{Entity, EntityStore, Hash, SchemaTable};
/// Identifiers and composite index keys.
pub use ident::{EntityId, EntityKey, ParseEntityKeyError, ReferenceKey};
/// Identity-preserving merge.
pub use merge::{merge, merge_table};
/// Normalization seam and its default implementation.
pub use normalize::{NestedNormalizer, NormalizeError, Normalizer};
/// Typed records.
pub use record::{Record, RecordError};
/// Operation surface and reducer.
pub use reducer::{reduce, reduce_with, Operation, ReduceError};
/// Reference facts and their index.
pub use reference::{Reference, ReferenceIndex};
/// Schema declarations.
pub use schema::{Cardinality, RelationDecl, SchemaDecl, SchemaError, SchemaRegistry};
/// Per-schema reference fields.
pub use schema_refs::{FieldReference, SchemaReferenceMap};
/// Snapshots and integrity checking.
pub use state::{IntegrityError, State};
