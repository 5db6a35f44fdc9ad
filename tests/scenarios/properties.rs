//! Whole-engine properties checked over randomized workloads: timeline
//! monotonicity, full-vs-single query equivalence, reopen round-trips and
//! write-path ordering rules.

use crate::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;
use tracehist::{StateError, StateSystem, StateValue, Timestamp};

const NB_ATTRS: i32 = 20;
const NB_EVENTS: usize = 3_000;
const TRACE_END: Timestamp = 100_000;

/// Drive a randomized but reproducible workload over `NB_ATTRS`
/// attributes, with small blocks so the tree splits many times.
fn build_random_history(seed: u64) -> (tempfile::TempDir, std::path::PathBuf, Arc<StateSystem>) {
    let (dir, path, ss) = create_small_block_system(0);
    let mut rng = StdRng::seed_from_u64(seed);
    let quarks: Vec<i32> = (0..NB_ATTRS)
        .map(|i| {
            ss.get_quark_absolute_and_add(&["attrs", &i.to_string()])
                .unwrap()
        })
        .collect();

    let mut t: Timestamp = 1;
    for _ in 0..NB_EVENTS {
        t += rng.gen_range(0..30);
        let q = quarks[rng.gen_range(0..quarks.len())];
        let value = match rng.gen_range(0..4) {
            0 => StateValue::Int32(rng.gen_range(-100..100)),
            1 => StateValue::Int64(rng.gen::<i64>() >> 16),
            2 => StateValue::Null,
            _ => StateValue::from(format!("s{}", rng.gen_range(0..50))),
        };
        ss.modify_attribute(t, value, q).unwrap();
    }
    ss.close_history(TRACE_END).unwrap();
    (dir, path, ss)
}

#[test]
fn test_path_quark_bijection() {
    let ss = StateSystem::without_history(0);
    let paths = [
        vec!["CPUs", "0", "Status"],
        vec!["CPUs", "1", "Status"],
        vec!["CPUs", "0", "Current_thread"],
        vec!["Threads", "42"],
    ];
    let quarks: Vec<i32> = paths
        .iter()
        .map(|p| ss.get_quark_absolute_and_add(p).unwrap())
        .collect();

    // Distinct paths, distinct quarks.
    for (i, a) in quarks.iter().enumerate() {
        for b in &quarks[i + 1..] {
            assert_ne!(a, b);
        }
    }
    // Repeated lookups are stable, with or without add.
    for (p, q) in paths.iter().zip(&quarks) {
        assert_eq!(ss.get_quark_absolute_and_add(p).unwrap(), *q);
        assert_eq!(ss.get_quark_absolute(p).unwrap(), *q);
        assert_eq!(ss.get_full_attribute_path(*q).unwrap(), p.join("/"));
    }
}

#[test]
fn test_monotonic_timeline_per_quark() {
    let (_dir, _path, ss) = build_random_history(0xA11CE);
    for q in 0..ss.get_nb_attributes() as i32 {
        let intervals = ss.query_history_range(q, 0, TRACE_END).unwrap();
        // Sorted, pairwise disjoint: adjacent or separated by a gap in
        // which the attribute had no value.
        for pair in intervals.windows(2) {
            assert!(pair[0].end < pair[1].start, "overlap on quark {q}");
        }
        for iv in &intervals {
            assert!(iv.start <= iv.end);
        }
    }
}

#[test]
fn test_full_vs_single_equivalence() {
    let (_dir, _path, ss) = build_random_history(0xBEEF);
    let mut rng = StdRng::seed_from_u64(7);
    for _ in 0..50 {
        let t = rng.gen_range(0..=TRACE_END);
        let full = ss.query_full_state(t).unwrap();
        assert_eq!(full.len(), ss.get_nb_attributes());
        for (q, from_full) in full.iter().enumerate() {
            let single = ss.query_single_state(t, q as i32).unwrap();
            assert_eq!(&single, from_full, "mismatch at t={t} quark={q}");
        }
    }
}

#[test]
fn test_reopen_round_trip_random_queries() {
    let (_dir, path, ss) = build_random_history(0xD15C);
    let reopened = reopen(&path);
    assert_eq!(reopened.get_current_end_time(), TRACE_END);

    let nb = ss.get_nb_attributes() as i32;
    let mut rng = StdRng::seed_from_u64(99);
    for _ in 0..1_000 {
        let t = rng.gen_range(0..=TRACE_END);
        let q = rng.gen_range(0..nb);
        let before = ss.query_single_state(t, q).unwrap();
        let after = reopened.query_single_state(t, q).unwrap();
        assert_eq!(before, after, "divergence at t={t} quark={q}");
    }
}

#[test]
fn test_stack_discipline_random_depths() {
    let ss = StateSystem::without_history(0);
    let q = ss.get_quark_absolute_and_add(&["stack"]).unwrap();
    let mut rng = StdRng::seed_from_u64(3);
    let mut depth = 0;
    let mut t = 0;
    for _ in 0..500 {
        t += 1;
        if depth < 10 && (depth == 0 || rng.gen_bool(0.5)) {
            ss.push_attribute(t, StateValue::Int32(t as i32), q).unwrap();
            depth += 1;
        } else {
            ss.pop_attribute(t, q).unwrap();
            depth -= 1;
        }
        assert_eq!(ss.query_ongoing_value(q).unwrap(), StateValue::Int32(depth));
        // Everything above the current depth is null.
        for d in (depth + 1)..=10 {
            if let Ok(sub) = ss.get_quark_relative(q, &[&d.to_string()]) {
                assert_eq!(ss.query_ongoing_value(sub).unwrap(), StateValue::Null);
            }
        }
    }
}

#[test]
fn test_out_of_order_insert_fails_and_leaves_state() {
    let (_dir, _path, ss) = create_disk_system(0);
    let q = ss.get_quark_absolute_and_add(&["x"]).unwrap();
    ss.modify_attribute(100, StateValue::Int32(1), q).unwrap();

    let err = ss.modify_attribute(50, StateValue::Int32(2), q).unwrap_err();
    assert!(matches!(err, StateError::TimeRange { .. }));
    assert_eq!(ss.query_ongoing_value(q).unwrap(), StateValue::Int32(1));
    assert_eq!(ss.get_current_end_time(), 100);

    // The engine keeps working after the rejected change.
    ss.modify_attribute(150, StateValue::Int32(3), q).unwrap();
    ss.close_history(200).unwrap();
    assert_eq!(value_at(&ss, 120, q), StateValue::Int32(1));
    assert_eq!(value_at(&ss, 160, q), StateValue::Int32(3));
}

#[test]
fn test_unknown_version_refused() {
    use std::io::{Seek, SeekFrom, Write};

    let (_dir, path, ss) = create_disk_system(0);
    let q = ss.get_quark_absolute_and_add(&["x"]).unwrap();
    ss.modify_attribute(10, StateValue::Int32(1), q).unwrap();
    ss.close_history(20).unwrap();
    drop(ss);

    // The version field sits right after the 4-byte magic.
    let mut f = std::fs::OpenOptions::new().write(true).open(&path).unwrap();
    f.seek(SeekFrom::Start(4)).unwrap();
    f.write_all(&999u32.to_le_bytes()).unwrap();
    drop(f);

    let err = tracehist::HistoryTree::open(&path).unwrap_err();
    assert!(matches!(err, StateError::Format(_)));
}
