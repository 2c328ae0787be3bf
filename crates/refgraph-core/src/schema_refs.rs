// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Per-schema table of reference fields, derived once from the registry.
use std::collections::BTreeMap;

use serde::Serialize;

use crate::schema::{Cardinality, SchemaRegistry};

/// One reference field of a schema.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct FieldReference {
    /// Field on the owning schema.
    pub field: String,
    /// Referenced schema.
    pub target: String,
    /// One id or many.
    pub cardinality: Cardinality,
}

/// Side table answering "which fields of schema S are references, and to what".
///
/// Every declared schema has an entry, possibly empty.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct SchemaReferenceMap {
    by_schema: BTreeMap<String, Vec<FieldReference>>,
}

impl SchemaReferenceMap {
    /// Derives the map from validated declarations.
    pub fn from_registry(registry: &SchemaRegistry) -> Self {
        let by_schema = registry
            .iter()
            .map(|decl| {
                let fields = decl
                    .relations
                    .iter()
                    .map(|r| FieldReference {
                        field: r.field.clone(),
                        target: r.target.clone(),
                        cardinality: r.cardinality,
                    })
                    .collect();
                (decl.name.clone(), fields)
            })
            .collect();
        Self { by_schema }
    }

    /// Reference fields of `schema`; empty for unknown schemas.
    pub fn fields(&self, schema: &str) -> &[FieldReference] {
        self.by_schema.get(schema).map_or(&[], Vec::as_slice)
    }

    /// Iterates `(schema, fields)` in schema-name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[FieldReference])> {
        self.by_schema
            .iter()
            .map(|(schema, fields)| (schema.as_str(), fields.as_slice()))
    }

    /// Iterates every `(schema, field)` whose references land on `target`.
    pub fn fields_targeting<'a>(
        &'a self,
        target: &'a str,
    ) -> impl Iterator<Item = (&'a str, &'a FieldReference)> + 'a {
        self.iter().flat_map(move |(schema, fields)| {
            fields
                .iter()
                .filter(move |f| f.target == target)
                .map(move |f| (schema, f))
        })
    }
}
