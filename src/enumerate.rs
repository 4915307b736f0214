//! Dataset enumeration.

use tracing::info;

use crate::catalog::{Block, CatalogClient};
use crate::error::OndiskError;

/// Resolve `dataset` to its blocks, in the order the catalog lists them.
///
/// Catalog errors (unknown dataset, auth, transport) are returned unchanged.
/// A dataset without blocks is not an error.
pub fn list_dataset_blocks<C>(
    client: &C,
    scope: &str,
    dataset: &str,
) -> Result<Vec<Block>, OndiskError>
where
    C: CatalogClient + ?Sized,
{
    let blocks = client.list_blocks(scope, dataset)?;
    info!(dataset, blocks = blocks.len(), "enumerated dataset blocks");
    Ok(blocks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{FileReplica, MemoryCatalog};

    #[test]
    fn preserves_catalog_order() {
        let catalog = MemoryCatalog::new()
            .with_block("/D/R/RAW", "/D/R/RAW#b", [FileReplica::new("/store/b.root")])
            .with_block("/D/R/RAW", "/D/R/RAW#a", [FileReplica::new("/store/a.root")]);

        let blocks = list_dataset_blocks(&catalog, "cms", "/D/R/RAW").expect("blocks");
        let names: Vec<_> = blocks.iter().map(|b| b.name.as_str()).collect();
        assert_eq!(names, ["/D/R/RAW#b", "/D/R/RAW#a"]);
    }

    #[test]
    fn unknown_dataset_propagates() {
        let catalog = MemoryCatalog::new();
        let err = list_dataset_blocks(&catalog, "cms", "/Nope/Nope/RAW").expect_err("should fail");
        assert!(matches!(err, OndiskError::CatalogStatus { status: 404, .. }));
    }
}
