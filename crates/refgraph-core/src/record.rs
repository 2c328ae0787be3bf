// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Typed views over generic entities.
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

use crate::ident::EntityId;
use crate::reducer::Operation;
use crate::state::State;

/// A Rust type stored as entities of one schema.
///
/// Conversion goes through `serde_json`; reference fields are plain ids
/// (`Option<String>` for `One`, `Vec<String>` for `Many`), which is also what
/// the cascade leaves behind (`null` maps to `None`).
pub trait Record: Serialize + DeserializeOwned {
    /// Schema name the record belongs to.
    const SCHEMA: &'static str;
}

/// Conversion failures between records and entities.
#[derive(Debug, Error)]
pub enum RecordError {
    /// The record did not serialize to a JSON object.
    #[error("record for `{0}` does not serialize to a JSON object")]
    NotAnObject(&'static str),
    /// serde_json failed in either direction.
    #[error("record conversion failed: {0}")]
    Json(#[from] serde_json::Error),
}

fn record_value<R: Record>(record: &R) -> Result<serde_json::Value, RecordError> {
    let value = serde_json::to_value(record)?;
    if value.is_object() {
        Ok(value)
    } else {
        Err(RecordError::NotAnObject(R::SCHEMA))
    }
}

impl Operation {
    /// Upsert-one for a typed record.
    pub fn upsert_record<R: Record>(record: &R) -> Result<Self, RecordError> {
        Ok(Self::upsert_one(R::SCHEMA, record_value(record)?))
    }

    /// Upsert-many for typed records, preserving order.
    pub fn upsert_records<'a, R: Record + 'a>(
        records: impl IntoIterator<Item = &'a R>,
    ) -> Result<Self, RecordError> {
        let data = records
            .into_iter()
            .map(record_value)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::upsert_many(R::SCHEMA, data))
    }

    /// Delete-one for a typed record's schema.
    pub fn delete_record<R: Record>(id: impl Into<EntityId>) -> Self {
        Self::delete_one(R::SCHEMA, id)
    }
}

impl State {
    /// Reads entity `id` of `R::SCHEMA` as `R`.
    pub fn record<R: Record>(&self, id: &EntityId) -> Result<Option<R>, RecordError> {
        self.entity(R::SCHEMA, id)
            .map(|entity| serde_json::from_value((**entity).clone().into_value()))
            .transpose()
            .map_err(RecordError::from)
    }

    /// Reads every entity of `R::SCHEMA` as `R`, in id order.
    pub fn records<R: Record>(&self) -> Result<Vec<R>, RecordError> {
        self.schema_entities()
            .table(R::SCHEMA)
            .into_iter()
            .flat_map(|table| table.values())
            .map(|entity| serde_json::from_value((**entity).clone().into_value()))
            .collect::<Result<Vec<_>, _>>()
            .map_err(RecordError::from)
    }
}
