// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use std::collections::HashMap;

// --- define_id! macro tests ---

crate::define_id! {
    /// Test ID type for macro verification.
    pub struct TestId("test-");
}

#[test]
fn define_id_generates_prefixed_ids() {
    let id = TestId::new();
    assert!(id.as_str().starts_with("test-"));
    assert_eq!(id.as_str().len(), "test-".len() + 19);
}

#[test]
fn define_id_ids_are_unique() {
    let a = TestId::new();
    let b = TestId::new();
    assert_ne!(a, b);
}

#[test]
fn define_id_suffix_strips_prefix() {
    let id = TestId::from_string("test-abc");
    assert_eq!(id.suffix(), "abc");
}

#[test]
fn define_id_suffix_tolerates_foreign_prefix() {
    let id = TestId::from_string("other-abc");
    assert_eq!(id.suffix(), "other-abc");
}

#[test]
fn define_id_hash_map_lookup_by_str() {
    let mut map = HashMap::new();
    map.insert(TestId::from_string("test-k"), 42);
    assert_eq!(map.get("test-k"), Some(&42));
}

#[test]
fn define_id_serde_is_transparent() {
    let id = TestId::from_string("test-xyz");
    let json = serde_json::to_string(&id).unwrap();
    assert_eq!(json, "\"test-xyz\"");
    let back: TestId = serde_json::from_str(&json).unwrap();
    assert_eq!(back, id);
}

// --- short() tests ---

#[test]
fn short_fn_on_str() {
    let s = "abcdefghijklmnop";
    assert_eq!(short(s, 8), "abcdefgh");
    assert_eq!(short(s, 100), s);
    assert_eq!(short("abc", 8), "abc");
}
