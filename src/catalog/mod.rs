//! Replica catalog access.
//!
//! This module owns the boundary to the data-catalog service. Everything the
//! rest of the crate needs from the catalog goes through [`CatalogClient`],
//! so the aggregation logic never sees HTTP, tokens, or wire formats.
//!
//! - [`rucio`]: the Rucio REST implementation used by the CLI.
//! - [`memory`]: an in-memory implementation for tests and benchmarks.

pub mod memory;
pub mod rucio;

use std::collections::BTreeMap;

use serde::Deserialize;

use crate::error::OndiskError;

pub use memory::MemoryCatalog;
pub use rucio::RucioClient;

/// Reference to one content block of a dataset.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize)]
pub struct Block {
    pub name: String,
}

impl Block {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

/// Replication state of a single file replica at one site.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(from = "String")]
pub enum ReplicaState {
    Available,
    Unavailable,
    Copying,
    BeingDeleted,
    Bad,
    TemporaryUnavailable,
    /// Any state name this crate does not know about.
    Other(String),
}

impl ReplicaState {
    pub fn is_available(&self) -> bool {
        matches!(self, ReplicaState::Available)
    }
}

impl From<String> for ReplicaState {
    fn from(value: String) -> Self {
        match value.as_str() {
            "AVAILABLE" => ReplicaState::Available,
            "UNAVAILABLE" => ReplicaState::Unavailable,
            "COPYING" => ReplicaState::Copying,
            "BEING_DELETED" => ReplicaState::BeingDeleted,
            "BAD" => ReplicaState::Bad,
            "TEMPORARY_UNAVAILABLE" => ReplicaState::TemporaryUnavailable,
            _ => ReplicaState::Other(value),
        }
    }
}

impl From<&str> for ReplicaState {
    fn from(value: &str) -> Self {
        ReplicaState::from(value.to_string())
    }
}

/// One file's replication state across all sites that know about it.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct FileReplica {
    /// Catalog-assigned logical file name.
    pub name: String,
    /// Site name to replica state.
    #[serde(default)]
    pub states: BTreeMap<String, ReplicaState>,
}

impl FileReplica {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            states: BTreeMap::new(),
        }
    }

    /// Add a site state (builder pattern).
    pub fn with_state(mut self, site: impl Into<String>, state: impl Into<ReplicaState>) -> Self {
        self.states.insert(site.into(), state.into());
        self
    }
}

/// Read-only view of a replica catalog.
///
/// Implementations report failures as [`OndiskError`] and never retry; a
/// failed call ends the run.
pub trait CatalogClient {
    /// List the blocks making up `dataset` within `scope`, in catalog order.
    fn list_blocks(&self, scope: &str, dataset: &str) -> Result<Vec<Block>, OndiskError>;

    /// List one replica record per file contained in any of `blocks`.
    fn list_replicas(&self, scope: &str, blocks: &[Block])
        -> Result<Vec<FileReplica>, OndiskError>;
}
