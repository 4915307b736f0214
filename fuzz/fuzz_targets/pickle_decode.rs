//! Fuzz target for pickle file list decoding.
//!
//! Feeds arbitrary bytes to the pickle reader used for saved file lists,
//! checking for panics, overflows in length handling, or hangs.
//!
//! Run with:
//!   cargo +nightly fuzz run pickle_decode

#![no_main]

use libfuzzer_sys::fuzz_target;
use ondisk::output::pickle::{decode_bytes_list, encode_bytes_list};

fuzz_target!(|data: &[u8]| {
    if data.len() > 1024 * 1024 {
        return;
    }

    // Anything that decodes must encode and decode to the same items.
    if let Ok(items) = decode_bytes_list(data) {
        let again = decode_bytes_list(&encode_bytes_list(&items)).expect("re-decode");
        assert_eq!(again, items);
    }
});
