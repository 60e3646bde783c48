//! Fuzz target for workspace index parsing.

#![no_main]

use annostore::model::IndexDocument;
use annostore::storage::fuzz_parse_document;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if data.len() > 10 * 1024 * 1024 {
        return;
    }

    let _ = fuzz_parse_document::<IndexDocument>(data);
});
