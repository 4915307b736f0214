#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet};

use ondisk::aggregate::{is_tape, SiteFilter};
use ondisk::catalog::{FileReplica, MemoryCatalog, ReplicaState};
use proptest::prelude::*;
use proptest::strategy::BoxedStrategy;
use proptest::test_runner::{Config as ProptestConfig, FileFailurePersistence};

pub const DATASET: &str = "/Prop/Run-v1/AOD";

/// Small site pool so files share sites, with tape endpoints mixed in.
pub const SITES: &[&str] = &[
    "T1_US_FNAL_Disk",
    "T1_US_FNAL_Tape",
    "T2_CH_CERN",
    "T2_DE_DESY",
    "T0_CH_CERN_Tape",
    "T3_US_Tape_Like",
];

pub fn proptest_config() -> ProptestConfig {
    let cases = std::env::var("PROPTEST_CASES")
        .ok()
        .and_then(|v| v.parse::<u32>().ok())
        .unwrap_or(64);

    let mut config = ProptestConfig::with_failure_persistence(FileFailurePersistence::WithSource(
        "proptest-regressions",
    ));
    config.cases = cases;
    config.max_shrink_iters = 1024;
    config
}

/// One block of a generated dataset: (block name, file records).
pub type GenBlock = (String, Vec<FileReplica>);

pub fn arb_state() -> BoxedStrategy<ReplicaState> {
    prop_oneof![
        3 => Just(ReplicaState::Available),
        1 => Just(ReplicaState::Unavailable),
        1 => Just(ReplicaState::Copying),
        1 => Just(ReplicaState::Other("SUSPICIOUS".to_string())),
    ]
    .boxed()
}

pub fn arb_replica(max_files: usize) -> BoxedStrategy<FileReplica> {
    (
        0..max_files,
        prop::collection::btree_map(prop::sample::select(SITES), arb_state(), 0..4),
    )
        .prop_map(|(file, states)| FileReplica {
            // File names repeat across blocks on purpose.
            name: format!("/store/prop/f{file}.root"),
            states: states
                .into_iter()
                .map(|(site, state)| (site.to_string(), state))
                .collect(),
        })
        .boxed()
}

pub fn arb_blocks(max_blocks: usize, max_files: usize) -> BoxedStrategy<Vec<GenBlock>> {
    prop::collection::vec(prop::collection::vec(arb_replica(max_files), 0..6), 1..max_blocks)
        .prop_map(|blocks| {
            blocks
                .into_iter()
                .enumerate()
                .map(|(i, files)| (format!("{DATASET}#{i}"), files))
                .collect()
        })
        .boxed()
}

pub fn arb_filter() -> BoxedStrategy<SiteFilter> {
    let sites = || prop::collection::btree_set(prop::sample::select(SITES).prop_map(str::to_string), 0..4);
    prop_oneof![
        Just(SiteFilter::All),
        sites().prop_map(SiteFilter::Allow),
        sites().prop_map(SiteFilter::Block),
    ]
    .boxed()
}

pub fn catalog_from(blocks: &[GenBlock]) -> MemoryCatalog {
    blocks
        .iter()
        .fold(MemoryCatalog::new(), |catalog, (block, files)| {
            catalog.with_block(DATASET, block, files.iter().cloned())
        })
}

/// Straightforward reference computation of the expected result.
pub fn expected(blocks: &[GenBlock], filter: &SiteFilter) -> (BTreeSet<String>, BTreeMap<String, usize>) {
    let mut files = BTreeSet::new();
    let mut pairs = BTreeSet::new();

    for (_, replicas) in blocks {
        for replica in replicas {
            for (site, state) in &replica.states {
                if *state == ReplicaState::Available && !is_tape(site) && filter.admits(site) {
                    files.insert(replica.name.clone());
                    pairs.insert((site.clone(), replica.name.clone()));
                }
            }
        }
    }

    let mut counts = BTreeMap::new();
    for (site, _) in pairs {
        *counts.entry(site).or_insert(0) += 1;
    }
    (files, counts)
}
