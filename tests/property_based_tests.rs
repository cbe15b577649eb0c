//! Property-based tests for hashing, observation counting and report bounds

use callpath::frame_capture::CallFrame;
use callpath::path_hash::{hash_path, Fingerprint};
use callpath::registry::{CallerSlots, PathRegistry, Registry};
use callpath::report::{format_frames, strip_annotation, TRUNCATION_MARKER};
use proptest::prelude::*;
use std::collections::HashMap;

fn frames(ips: &[u64]) -> Vec<CallFrame> {
    ips.iter().copied().map(CallFrame::new).collect()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    #[test]
    fn prop_hash_path_deterministic(ips in prop::collection::vec(any::<u64>(), 1..16)) {
        let path = frames(&ips);
        prop_assert_eq!(hash_path(&path).unwrap(), hash_path(&path).unwrap());
    }

    #[test]
    fn prop_hash_path_detects_changed_caller(
        ips in prop::collection::vec(any::<u64>(), 2..12),
        index in 0usize..12,
        replacement in any::<u64>(),
    ) {
        let index = index % ips.len();
        prop_assume!(ips[index] != replacement);

        let mut changed = ips.clone();
        changed[index] = replacement;
        prop_assert_ne!(hash_path(&frames(&ips)).unwrap(), hash_path(&frames(&changed)).unwrap());
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    #[test]
    fn prop_path_registry_counts_every_visit(keys in prop::collection::vec(0u64..20, 0..200)) {
        let registry = PathRegistry::new();
        let mut expected: HashMap<u64, u64> = HashMap::new();

        for key in &keys {
            let first = registry.observe(Fingerprint(*key));
            let count = expected.entry(*key).or_insert(0);
            *count += 1;
            prop_assert_eq!(first, *count == 1);
        }

        let snapshot = registry.snapshot();
        prop_assert_eq!(snapshot.len(), expected.len());
        for record in snapshot {
            prop_assert_eq!(record.visits, expected[&record.fingerprint.as_u64()]);
        }
    }

    #[test]
    fn prop_caller_slots_never_exceed_capacity(
        capacity in 0usize..16,
        keys in prop::collection::vec(0u64..40, 0..100),
    ) {
        let slots = CallerSlots::with_capacity(capacity);
        let firsts = keys.iter().filter(|k| slots.observe(Fingerprint(**k))).count();

        prop_assert!(slots.len() <= capacity);
        prop_assert_eq!(firsts, slots.len());
    }

    #[test]
    fn prop_format_frames_never_exceeds_capacity(
        lines in prop::collection::vec("[a-zA-Z0-9_:<> ]{0,40}( \\[0x[0-9a-f]{1,12}\\])?", 0..10),
        max_bytes in 0usize..256,
    ) {
        let text = format_frames(&lines, max_bytes);
        prop_assert!(text.len() <= max_bytes);

        let full: usize = lines.iter().map(|l| strip_annotation(l).len() + 1).sum();
        if full <= max_bytes {
            prop_assert!(!text.contains(TRUNCATION_MARKER));
            prop_assert_eq!(text.len(), full);
        } else {
            prop_assert!(text.ends_with(&TRUNCATION_MARKER[..TRUNCATION_MARKER.len().min(max_bytes)]));
        }
    }

    #[test]
    fn prop_strip_annotation_removes_load_address(
        name in "[a-z_]{1,20}\\+0x[0-9a-f]{1,4}",
        address in any::<u64>(),
    ) {
        let frame = format!("{} [0x{:x}]", name, address);
        prop_assert_eq!(strip_annotation(&frame), name.as_str());
    }
}
