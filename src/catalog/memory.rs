use std::cell::Cell;
use std::collections::BTreeMap;

use crate::error::OndiskError;

use super::{Block, CatalogClient, FileReplica};

/// In-memory catalog holding a fixed set of datasets.
///
/// Counts the replica requests it serves so callers can check batching.
#[derive(Debug, Default)]
pub struct MemoryCatalog {
    datasets: BTreeMap<String, Vec<Block>>,
    block_files: BTreeMap<String, Vec<FileReplica>>,
    replica_requests: Cell<usize>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a block with its file records to `dataset` (builder pattern).
    pub fn with_block(
        mut self,
        dataset: &str,
        block: &str,
        files: impl IntoIterator<Item = FileReplica>,
    ) -> Self {
        self.datasets
            .entry(dataset.to_string())
            .or_default()
            .push(Block::new(block));
        self.block_files
            .entry(block.to_string())
            .or_default()
            .extend(files);
        self
    }

    /// Number of `list_replicas` calls served so far.
    pub fn replica_requests(&self) -> usize {
        self.replica_requests.get()
    }
}

impl CatalogClient for MemoryCatalog {
    fn list_blocks(&self, scope: &str, dataset: &str) -> Result<Vec<Block>, OndiskError> {
        self.datasets
            .get(dataset)
            .cloned()
            .ok_or_else(|| OndiskError::CatalogStatus {
                url: format!("memory://{scope}/{dataset}"),
                status: 404,
                message: format!("DataIdentifierNotFound: Data identifier '{scope}:{dataset}' not found"),
            })
    }

    fn list_replicas(
        &self,
        _scope: &str,
        blocks: &[Block],
    ) -> Result<Vec<FileReplica>, OndiskError> {
        self.replica_requests.set(self.replica_requests.get() + 1);
        Ok(blocks
            .iter()
            .filter_map(|block| self.block_files.get(&block.name))
            .flatten()
            .cloned()
            .collect())
    }
}
