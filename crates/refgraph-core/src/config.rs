// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Persisted schema declarations.
//!
//! [`ConfigStore`] is the storage port (raw JSON blobs by logical key);
//! [`ConfigService`] reads and writes [`GraphConfig`] through it and turns
//! stored declarations into an initial [`State`].

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::schema::{SchemaDecl, SchemaError, SchemaRegistry};
use crate::state::State;

/// Storage port for config blobs.
pub trait ConfigStore {
    /// Returns the blob under `key`, or [`ConfigError::NotFound`].
    fn load_raw(&self, key: &str) -> Result<Vec<u8>, ConfigError>;
    /// Replaces the blob under `key`.
    fn save_raw(&self, key: &str, data: &[u8]) -> Result<(), ConfigError>;
}

/// Failures loading or storing declarations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Nothing is stored under the key.
    #[error("no config stored under `{0}`")]
    NotFound(String),
    /// Backing storage failed.
    #[error("config io error: {0}")]
    Io(#[from] std::io::Error),
    /// The blob is not valid JSON for the expected type.
    #[error("config is not valid JSON: {0}")]
    Serde(#[from] serde_json::Error),
    /// The stored declarations do not form a valid registry.
    #[error("stored schemas are invalid: {0}")]
    Schema(#[from] SchemaError),
    /// Store-specific failure.
    #[error("{0}")]
    Other(String),
}

/// Declarations as stored under [`GraphConfig::KEY`].
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphConfig {
    /// Every schema of the graph.
    pub schemas: Vec<SchemaDecl>,
}

impl GraphConfig {
    /// Store key.
    pub const KEY: &'static str = "schemas";

    /// Validates the declarations.
    pub fn registry(&self) -> Result<SchemaRegistry, SchemaError> {
        SchemaRegistry::new(self.schemas.iter().cloned())
    }
}

/// Reads and writes [`GraphConfig`] through a [`ConfigStore`].
#[derive(Debug)]
pub struct ConfigService<S> {
    store: S,
}

impl<S: ConfigStore> ConfigService<S> {
    /// Wraps `store`.
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Loads the stored declarations.
    ///
    /// An empty blob counts as missing.
    pub fn load_graph_config(&self) -> Result<GraphConfig, ConfigError> {
        let bytes = self.store.load_raw(GraphConfig::KEY)?;
        if bytes.is_empty() {
            return Err(ConfigError::NotFound(GraphConfig::KEY.to_owned()));
        }
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Validates `config` and stores it; invalid declarations are not written.
    pub fn save_graph_config(&self, config: &GraphConfig) -> Result<(), ConfigError> {
        config.registry()?;
        let data = serde_json::to_vec_pretty(config)?;
        self.store.save_raw(GraphConfig::KEY, &data)
    }

    /// Loads and validates the declarations, returning the initial state.
    pub fn load_initial_state(&self) -> Result<State, ConfigError> {
        let registry = self.load_graph_config()?.registry()?;
        Ok(State::new(registry))
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use std::cell::RefCell;
    use std::collections::BTreeMap;

    use super::*;
    use crate::schema::RelationDecl;

    #[derive(Default)]
    struct MemStore(RefCell<BTreeMap<String, Vec<u8>>>);

    impl ConfigStore for MemStore {
        fn load_raw(&self, key: &str) -> Result<Vec<u8>, ConfigError> {
            self.0
                .borrow()
                .get(key)
                .cloned()
                .ok_or_else(|| ConfigError::NotFound(key.to_owned()))
        }

        fn save_raw(&self, key: &str, data: &[u8]) -> Result<(), ConfigError> {
            self.0.borrow_mut().insert(key.to_owned(), data.to_vec());
            Ok(())
        }
    }

    #[test]
    fn stored_declarations_become_the_initial_state() {
        let service = ConfigService::new(MemStore::default());
        assert!(matches!(service.load_graph_config(), Err(ConfigError::NotFound(_))));

        let config = GraphConfig {
            schemas: vec![
                SchemaDecl::new("user"),
                SchemaDecl::new("post").with_relation(RelationDecl::one("author", "user")),
            ],
        };
        service.save_graph_config(&config).unwrap();
        assert_eq!(service.load_graph_config().unwrap(), config);

        let state = service.load_initial_state().unwrap();
        assert_eq!(state.schemas().len(), 2);
    }

    #[test]
    fn invalid_declarations_are_never_written() {
        let service = ConfigService::new(MemStore::default());
        let config = GraphConfig {
            schemas: vec![SchemaDecl::new("post").with_relation(RelationDecl::one("author", "user"))],
        };
        assert!(matches!(
            service.save_graph_config(&config),
            Err(ConfigError::Schema(SchemaError::UnknownTarget { .. }))
        ));
        assert!(matches!(service.load_graph_config(), Err(ConfigError::NotFound(_))));
    }

    #[test]
    fn hand_edited_invalid_declarations_surface_on_load() {
        let store = MemStore::default();
        store
            .save_raw(GraphConfig::KEY, br#"{"schemas":[{"name":"a"},{"name":"a"}]}"#)
            .unwrap();
        let service = ConfigService::new(store);
        assert!(matches!(
            service.load_initial_state(),
            Err(ConfigError::Schema(SchemaError::DuplicateSchema(_)))
        ));
    }

    #[test]
    fn empty_blob_reads_as_missing() {
        let store = MemStore::default();
        store.save_raw(GraphConfig::KEY, b"").unwrap();
        let service = ConfigService::new(store);
        assert!(matches!(service.load_graph_config(), Err(ConfigError::NotFound(_))));
    }
}
