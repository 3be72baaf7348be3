#![no_main]
use libfuzzer_sys::fuzz_target;
use std::cmp::Ordering;
use using_core::module::registry::{compare_ids, matches, rank_ids_descending};

fuzz_target!(|data: &[u8]| {
    // Matching and ranking must never panic on arbitrary ids

    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };

    // Split into an id list; the first entry doubles as a pattern
    let ids: Vec<&str> = text.split('\n').take(64).collect();
    let pattern = ids[0];

    for id in &ids {
        let _ = matches(id, pattern);
        let _ = matches(pattern, id);
        let forward = compare_ids(pattern, id);
        let backward = compare_ids(id, pattern);
        assert_eq!(forward, backward.reverse());
    }

    let mut ranked = ids.clone();
    rank_ids_descending(&mut ranked);
    assert_eq!(ranked.len(), ids.len());

    if !pattern.contains('*') {
        assert!(matches(pattern, pattern));
    }
    assert_eq!(compare_ids(pattern, pattern), Ordering::Equal);
    assert!(matches(pattern, "*"));
});
