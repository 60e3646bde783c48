//! Fuzz target for version snapshot parsing.
//!
//! Feeds arbitrary bytes through the same strict parse and schema check a
//! snapshot read goes through, checking for panics or hangs.

#![no_main]

use annostore::model::VersionSnapshot;
use annostore::storage::fuzz_parse_document;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if data.len() > 10 * 1024 * 1024 {
        return;
    }

    let _ = fuzz_parse_document::<VersionSnapshot>(data);
});
