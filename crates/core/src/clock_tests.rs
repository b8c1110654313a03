// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use std::time::Duration;

#[test]
fn system_clock_advances() {
    let clock = SystemClock;
    let a = clock.now();
    let b = clock.now();
    assert!(b >= a);
}

#[test]
fn fake_clock_advance_moves_both_scales() {
    let clock = FakeClock::new();
    let i0 = clock.now();
    let t0 = clock.now_utc();
    clock.advance(Duration::from_secs(90));
    assert_eq!(clock.now().duration_since(i0), Duration::from_secs(90));
    assert_eq!((clock.now_utc() - t0).num_seconds(), 90);
}

#[test]
fn fake_clock_clones_share_time() {
    let a = FakeClock::new();
    let b = a.clone();
    a.advance(Duration::from_secs(5));
    assert_eq!(a.now(), b.now());
}
