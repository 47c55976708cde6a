#![no_main]

use elfsweep::{has_elf_magic, BinaryClassifier};
use libfuzzer_sys::fuzz_target;
use std::path::Path;

fuzz_target!(|data: &[u8]| {
    let _ = has_elf_magic(data);

    if let Ok(name) = std::str::from_utf8(data) {
        let classifier = BinaryClassifier::default();
        if let Some(verdict) = classifier.classify_by_name(Path::new(name)) {
            assert!(!verdict.is_binary);
        }
    }
});
