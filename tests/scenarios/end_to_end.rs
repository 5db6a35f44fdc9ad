//! End-to-end scenarios: build a history through the façade, close it,
//! and check the user-visible interval boundaries, on disk and after a
//! reopen.

use crate::*;
use tracehist::{StateError, StateValue};

#[test]
fn test_open_modify_close() {
    let (_dir, _path, ss) = create_disk_system(0);
    let q = ss.get_quark_absolute_and_add(&["CPUs", "0", "Status"]).unwrap();
    ss.modify_attribute(10, StateValue::Int32(1), q).unwrap();
    ss.modify_attribute(25, StateValue::Int32(2), q).unwrap();
    ss.close_history(30).unwrap();

    let first = ss.query_single_state(15, q).unwrap().unwrap();
    assert_eq!((first.start, first.end), (10, 24));
    assert_eq!(first.value, StateValue::Int32(1));

    let second = ss.query_single_state(25, q).unwrap().unwrap();
    assert_eq!((second.start, second.end), (25, 30));
    assert_eq!(second.value, StateValue::Int32(2));

    // Before the first write the attribute has no value.
    assert_eq!(ss.query_single_state(5, q).unwrap(), None);
}

#[test]
fn test_push_pop_stack() {
    let (_dir, _path, ss) = create_disk_system(0);
    let q = ss.get_quark_absolute_and_add(&["Threads", "7", "CallStack"]).unwrap();
    ss.push_attribute(10, StateValue::from("a"), q).unwrap();
    ss.push_attribute(20, StateValue::from("b"), q).unwrap();
    ss.pop_attribute(30, q).unwrap();
    ss.pop_attribute(40, q).unwrap();
    ss.close_history(50).unwrap();

    let q1 = ss.get_quark_relative(q, &["1"]).unwrap();
    let q2 = ss.get_quark_relative(q, &["2"]).unwrap();

    // Both frames live at t=25.
    assert_eq!(value_at(&ss, 25, q), StateValue::Int32(2));
    assert_eq!(value_at(&ss, 25, q1), StateValue::from("a"));
    assert_eq!(value_at(&ss, 25, q2), StateValue::from("b"));

    // After the first pop only frame 1 remains.
    assert_eq!(value_at(&ss, 35, q), StateValue::Int32(1));
    assert_eq!(value_at(&ss, 35, q1), StateValue::from("a"));
    assert_eq!(value_at(&ss, 35, q2), StateValue::Null);

    // After the second pop the stack is empty.
    assert_eq!(value_at(&ss, 45, q), StateValue::Int32(0));
    assert_eq!(value_at(&ss, 45, q1), StateValue::Null);
    assert_eq!(value_at(&ss, 45, q2), StateValue::Null);
}

#[test]
fn test_coalescing_identical_values() {
    let (_dir, _path, ss) = create_disk_system(0);
    let q = ss.get_quark_absolute_and_add(&["counter"]).unwrap();
    ss.modify_attribute(10, StateValue::Int64(7), q).unwrap();
    ss.modify_attribute(20, StateValue::Int64(7), q).unwrap();
    ss.modify_attribute(30, StateValue::Int64(8), q).unwrap();
    ss.close_history(40).unwrap();

    let intervals = ss.query_history_range(q, 0, 40).unwrap();
    assert_eq!(intervals.len(), 2);
    assert_eq!((intervals[0].start, intervals[0].end), (10, 29));
    assert_eq!(intervals[0].value, StateValue::Int64(7));
    assert_eq!((intervals[1].start, intervals[1].end), (30, 40));
    assert_eq!(intervals[1].value, StateValue::Int64(8));
}

#[test]
fn test_remove_recursive() {
    let (_dir, _path, ss) = create_disk_system(0);
    let a = ss.get_quark_absolute_and_add(&["a"]).unwrap();
    let abc = ss.get_quark_absolute_and_add(&["a", "b", "c"]).unwrap();
    ss.modify_attribute(5, StateValue::Int32(1), abc).unwrap();
    ss.remove_attribute(10, a).unwrap();
    ss.close_history(20).unwrap();

    assert_eq!(value_at(&ss, 15, abc), StateValue::Null);
    assert_eq!(value_at(&ss, 15, a), StateValue::Null);
    // The value before the removal is intact.
    assert_eq!(value_at(&ss, 7, abc), StateValue::Int32(1));
}

#[test]
fn test_persist_and_reopen() {
    let (_dir, path, ss) = create_disk_system(0);
    let q = ss.get_quark_absolute_and_add(&["CPUs", "0", "Status"]).unwrap();
    ss.modify_attribute(10, StateValue::Int32(1), q).unwrap();
    ss.modify_attribute(25, StateValue::Int32(2), q).unwrap();
    ss.close_history(30).unwrap();

    let reopened = reopen(&path);
    assert_eq!(reopened.get_start_time(), 0);
    assert_eq!(reopened.get_current_end_time(), 30);

    let first = reopened.query_single_state(15, q).unwrap().unwrap();
    assert_eq!((first.start, first.end), (10, 24));
    assert_eq!(first.value, StateValue::Int32(1));
    let second = reopened.query_single_state(25, q).unwrap().unwrap();
    assert_eq!((second.start, second.end), (25, 30));
    assert_eq!(second.value, StateValue::Int32(2));
    assert_eq!(reopened.query_single_state(5, q).unwrap(), None);
}

#[test]
fn test_type_mismatch_leaves_state_unchanged() {
    let (_dir, _path, ss) = create_disk_system(0);
    let q = ss.get_quark_absolute_and_add(&["x"]).unwrap();
    ss.modify_attribute(5, StateValue::from("x"), q).unwrap();

    let err = ss.increment_attribute(6, q).unwrap_err();
    assert!(matches!(err, StateError::ValueType { .. }));

    assert_eq!(ss.query_ongoing_value(q).unwrap(), StateValue::from("x"));
    assert_eq!(ss.get_current_end_time(), 5);
    ss.close_history(10).unwrap();
    assert_eq!(value_at(&ss, 7, q), StateValue::from("x"));
}

#[test]
fn test_string_values_survive_reopen() {
    let (_dir, path, ss) = create_disk_system(0);
    let q = ss.get_quark_absolute_and_add(&["proc", "name"]).unwrap();
    ss.modify_attribute(10, StateValue::from("swapper/0"), q).unwrap();
    ss.modify_attribute(50, StateValue::from("firefox"), q).unwrap();
    ss.close_history(100).unwrap();

    let reopened = reopen(&path);
    assert_eq!(value_at(&reopened, 30, q), StateValue::from("swapper/0"));
    assert_eq!(value_at(&reopened, 99, q), StateValue::from("firefox"));
}

#[test]
fn test_mixed_value_types_roundtrip() {
    let (_dir, path, ss) = create_disk_system(0);
    let qi = ss.get_quark_absolute_and_add(&["int"]).unwrap();
    let ql = ss.get_quark_absolute_and_add(&["long"]).unwrap();
    let qd = ss.get_quark_absolute_and_add(&["double"]).unwrap();
    let qs = ss.get_quark_absolute_and_add(&["str"]).unwrap();
    ss.modify_attribute(10, StateValue::Int32(-5), qi).unwrap();
    ss.modify_attribute(10, StateValue::Int64(1 << 40), ql).unwrap();
    ss.modify_attribute(10, StateValue::Double(0.25), qd).unwrap();
    ss.modify_attribute(10, StateValue::from(""), qs).unwrap();
    ss.close_history(20).unwrap();

    let reopened = reopen(&path);
    assert_eq!(value_at(&reopened, 15, qi), StateValue::Int32(-5));
    assert_eq!(value_at(&reopened, 15, ql), StateValue::Int64(1 << 40));
    assert_eq!(value_at(&reopened, 15, qd), StateValue::Double(0.25));
    assert_eq!(value_at(&reopened, 15, qs), StateValue::from(""));
}
