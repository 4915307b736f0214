//! Fuzz target for replica response parsing.
//!
//! Feeds arbitrary bytes to the newline-delimited JSON parser that reads
//! catalog replica listings.
//!
//! Run with:
//!   cargo +nightly fuzz run replica_stream_parse

#![no_main]

use libfuzzer_sys::fuzz_target;
use ondisk::aggregate::{ReplicaFold, SiteFilter};
use ondisk::catalog::rucio::parse_json_stream;
use ondisk::catalog::FileReplica;

fuzz_target!(|data: &[u8]| {
    // 10MB is generous for one batch of replica records.
    if data.len() > 10 * 1024 * 1024 {
        return;
    }

    if let Ok(records) = parse_json_stream::<FileReplica, _>(data, "fuzz") {
        let filter = SiteFilter::All;
        let mut fold = ReplicaFold::new(&filter);
        for record in &records {
            fold.absorb(record);
        }
        let hosted = fold.finish();
        assert!(hosted.files.len() <= records.len());
    }
});
