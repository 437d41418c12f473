// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use isle_core::{Clock, FakeClock};

fn ms(n: u64) -> Duration {
    Duration::from_millis(n)
}

#[test]
fn scheduler_timer_lifecycle() {
    let clock = FakeClock::new();
    let mut scheduler = Scheduler::new();

    scheduler.arm(TimerId(1), clock.now() + ms(10_000), None);
    assert!(scheduler.has_timers());
    assert!(scheduler.next_deadline().is_some());

    // Timer hasn't fired yet
    clock.advance(ms(5_000));
    assert!(scheduler.fired(clock.now()).is_empty());
    assert!(scheduler.has_timers());

    // Timer fires
    clock.advance(ms(10_000));
    let fired = scheduler.fired(clock.now());
    assert_eq!(fired, vec![TimerId(1)]);
    assert!(!scheduler.has_timers());
}

#[test]
fn scheduler_cancel_timer() {
    let clock = FakeClock::new();
    let mut scheduler = Scheduler::new();

    scheduler.arm(TimerId(1), clock.now() + ms(10_000), None);
    scheduler.cancel(TimerId(1));
    scheduler.cancel(TimerId(1));

    clock.advance(ms(15_000));
    assert!(scheduler.fired(clock.now()).is_empty());
}

#[test]
fn scheduler_multiple_timers_fire_independently() {
    let clock = FakeClock::new();
    let mut scheduler = Scheduler::new();

    scheduler.arm(TimerId(1), clock.now() + ms(5_000), None);
    scheduler.arm(TimerId(2), clock.now() + ms(20_000), None);

    // Only the fast timer fires at 6s
    clock.advance(ms(6_000));
    assert_eq!(scheduler.fired(clock.now()), vec![TimerId(1)]);
    assert!(scheduler.has_timers(), "slow timer should still be pending");

    // The slow timer fires at 21s
    clock.advance(ms(15_000));
    assert_eq!(scheduler.fired(clock.now()), vec![TimerId(2)]);
    assert!(!scheduler.has_timers());
}

#[test]
fn scheduler_fired_orders_by_deadline() {
    let clock = FakeClock::new();
    let mut scheduler = Scheduler::new();

    scheduler.arm(TimerId(9), clock.now() + ms(100), None);
    scheduler.arm(TimerId(3), clock.now() + ms(50), None);
    scheduler.arm(TimerId(7), clock.now() + ms(75), None);

    clock.advance(ms(200));
    assert_eq!(
        scheduler.fired(clock.now()),
        vec![TimerId(3), TimerId(7), TimerId(9)]
    );
}

#[test]
fn scheduler_next_deadline_returns_earliest() {
    let clock = FakeClock::new();
    let mut scheduler = Scheduler::new();

    scheduler.arm(TimerId(1), clock.now() + ms(30_000), None);
    scheduler.arm(TimerId(2), clock.now() + ms(10_000), None);

    let deadline = scheduler.next_deadline();
    assert_eq!(deadline, Some(clock.now() + ms(10_000)));
}

#[test]
fn scheduler_rearm_resets_deadline() {
    let clock = FakeClock::new();
    let mut scheduler = Scheduler::new();

    scheduler.arm(TimerId(1), clock.now() + ms(10_000), None);

    // Overwrite with a longer deadline
    clock.advance(ms(2_000));
    scheduler.arm(TimerId(1), clock.now() + ms(20_000), None);

    // Original deadline (10s) should not fire
    clock.advance(ms(9_000));
    assert!(
        scheduler.fired(clock.now()).is_empty(),
        "old deadline should be overwritten"
    );

    // New deadline fires
    clock.advance(ms(12_000));
    assert_eq!(scheduler.fired(clock.now()), vec![TimerId(1)]);
}

#[test]
fn scheduler_repeating_timer_rearms() {
    let clock = FakeClock::new();
    let mut scheduler = Scheduler::new();

    scheduler.arm(TimerId(1), clock.now() + ms(100), Some(ms(100)));

    clock.advance(ms(150));
    assert_eq!(scheduler.fired(clock.now()), vec![TimerId(1)]);
    assert!(scheduler.has_timers(), "repeating timer stays armed");

    // Re-armed one period past delivery, not past the original deadline
    clock.advance(ms(99));
    assert!(scheduler.fired(clock.now()).is_empty());
    clock.advance(ms(1));
    assert_eq!(scheduler.fired(clock.now()), vec![TimerId(1)]);

    scheduler.cancel(TimerId(1));
    clock.advance(ms(1_000));
    assert!(scheduler.fired(clock.now()).is_empty());
}

#[test]
fn scheduler_empty_has_no_deadline() {
    let scheduler = Scheduler::new();
    assert!(!scheduler.has_timers());
    assert!(scheduler.next_deadline().is_none());
}

#[test]
fn scheduler_fired_removes_only_expired() {
    let clock = FakeClock::new();
    let mut scheduler = Scheduler::new();

    scheduler.arm(TimerId(1), clock.now() + ms(5_000), None);
    scheduler.arm(TimerId(2), clock.now() + ms(10_000), None);
    scheduler.arm(TimerId(3), clock.now() + ms(15_000), None);

    // Advance to 11s: 1 and 2 fire, 3 remains
    clock.advance(ms(11_000));
    assert_eq!(scheduler.fired(clock.now()), vec![TimerId(1), TimerId(2)]);
    assert!(scheduler.has_timers(), "timer 3 should still be pending");

    clock.advance(ms(5_000));
    assert_eq!(scheduler.fired(clock.now()), vec![TimerId(3)]);
}
