//! Fuzz target for the legacy `cache.json` reader.
//!
//! Parsed caches are also run through key migration, which must never drop
//! an image or a rotation.

#![no_main]

use annostore::migration::legacy_cache::from_legacy_slice;
use annostore::migration::migrate_with_transforms;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if data.len() > 10 * 1024 * 1024 {
        return;
    }

    if let Ok(cache) = from_legacy_slice(data) {
        let images = cache.annotations.len();
        let rotations = cache.rotations.len();
        let outcome = migrate_with_transforms(cache.annotations, cache.rotations);
        assert_eq!(outcome.annotations.len(), images);
        assert_eq!(outcome.transforms.len(), rotations);
    }
});
