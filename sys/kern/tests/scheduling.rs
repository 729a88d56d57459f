// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

mod common;

use abi::{BlockReason, LockId, Sysnum, ThreadState};
use common::Harness;
use kern::{Dispatch, Phase};
use proptest::prelude::*;

#[test]
fn yield_rotates_within_a_level() {
    let mut h = Harness::boot();
    h.request(3, 0);
    for n in 0..3 {
        h.define(n, 2);
    }
    h.start(1000);
    assert_eq!(h.current(), 1);
    h.ok(Sysnum::ThreadYield, &[]);
    assert_eq!(h.current(), 2);
    h.ok(Sysnum::ThreadYield, &[]);
    assert_eq!(h.current(), 3);
    h.ok(Sysnum::ThreadYield, &[]);
    assert_eq!(h.current(), 1);
}

#[test]
fn sleep_zero_is_a_yield() {
    let mut h = Harness::boot();
    h.request(2, 0);
    h.define(0, 1);
    h.define(1, 1);
    h.start(1000);
    assert_eq!(h.current(), 1);
    let (status, _) = h.call(Sysnum::SleepMs, &[0]);
    assert_eq!(status, 0);
    assert_eq!(h.current(), 2);
    assert_eq!(h.k.thread(1).state(), ThreadState::Ready);
}

#[test]
fn woken_equal_priority_thread_waits_its_turn() {
    let mut h = Harness::boot();
    h.request(2, 0);
    h.define(0, 1);
    h.define(1, 1);
    h.start(1000);

    h.ok(Sysnum::SleepMs, &[1]);
    assert_eq!(h.current(), 2);
    // Thread 1 wakes on this tick, but doesn't bump its peer.
    assert_eq!(h.tick(), Dispatch::Resume(2));
    assert_eq!(h.k.thread(1).state(), ThreadState::Ready);
    // On the next tick it has been waiting, so round robin applies.
    assert_eq!(h.tick(), Dispatch::Resume(1));
}

#[test]
fn more_important_sleeper_preempts_on_wake() {
    let mut h = Harness::boot();
    h.request(2, 0);
    h.define(0, 0);
    h.define(1, 5);
    h.start(1000);

    assert_eq!(h.current(), 1);
    h.ok(Sysnum::SleepMs, &[2]);
    assert_eq!(h.current(), 2);
    assert_eq!(h.tick(), Dispatch::Resume(2));
    assert_eq!(h.tick(), Dispatch::Resume(1));
}

#[test]
fn non_preemptive_ticks_never_switch() {
    let mut h = Harness::boot();
    h.request(2, 0);
    h.define(0, 3);
    h.define(1, 3);
    h.start(0);
    for _ in 0..10 {
        assert_eq!(h.tick(), Dispatch::Resume(1));
    }
    assert_eq!(h.k.thread(1).run_ticks(), 10);
    assert_eq!(h.ok(Sysnum::ThreadTime, &[]), 10);
    assert_eq!(h.ok(Sysnum::GetTime, &[]), 10);
}

#[test]
fn all_sleeping_means_idle() {
    let mut h = Harness::boot();
    h.request(1, 0);
    h.define(0, 1);
    h.start(1000);
    h.ok(Sysnum::SleepMs, &[3]);
    assert_eq!(h.k.current(), None);
    assert_eq!(h.tick(), Dispatch::Idle);
    assert_eq!(h.tick(), Dispatch::Idle);
    assert_eq!(h.tick(), Dispatch::Resume(1));
}

#[test]
fn main_joins_then_starts_a_new_batch() {
    let mut h = Harness::boot();
    h.request(1, 0);
    let first = h.define(0, 1);
    h.start(1000);
    assert_eq!(
        h.k.thread(0).state(),
        ThreadState::Blocked(BlockReason::Join)
    );
    h.call(Sysnum::ThreadEnd, &[]);

    // Back in main, with multitask_start reporting success.
    assert_eq!(h.current(), 0);
    assert_eq!(h.k.thread(0).save().rets()[0], 0);
    assert_eq!(h.k.phase(), Phase::Requested { threads: 1 });

    // The slot is reused under a new identity.
    let second = h.define(0, 1);
    assert_eq!(second.index(), first.index());
    assert_ne!(second, first);
    h.start(0);
    assert_eq!(h.current(), 1);
    assert_eq!(h.ok(Sysnum::ThreadId, &[]), u32::from(second.0));
}

#[test]
fn threads_can_define_threads() {
    let mut h = Harness::boot();
    h.request(2, 0);
    h.define(0, 2);
    h.start(1000);
    assert_eq!(h.current(), 1);
    let child = h.define(1, 2);
    assert_eq!(child.index(), 2);
    assert_eq!(h.current(), 1);

    h.call(Sysnum::ThreadEnd, &[]);
    assert_eq!(h.current(), 2);
    // The spawner's slot and stack are free again, and the child can refill
    // them.
    let again = h.define(0, 2);
    assert_eq!(again.index(), 1);
    h.call(Sysnum::ThreadEnd, &[]);
    assert_eq!(h.current(), 1);
    h.call(Sysnum::ThreadEnd, &[]);
    assert_eq!(h.current(), 0);
    assert_eq!(h.k.phase(), Phase::Requested { threads: 2 });
}

#[test]
fn preemptive_define_of_more_important_thread_switches_at_once() {
    let mut h = Harness::boot();
    h.request(3, 0);
    h.define(0, 3);
    h.start(1000);
    assert_eq!(h.current(), 1);

    // Less important: the definer keeps the CPU.
    h.define(1, 5);
    assert_eq!(h.current(), 1);

    // More important: it runs straight away, and the definer still gets
    // its reply.
    let high = h.define(2, 1);
    assert_eq!(h.current(), high.index());
    assert_eq!(h.k.thread(1).state(), ThreadState::Ready);
    assert_eq!(h.k.thread(1).save().rets(), [0, u32::from(high.0)]);
}

#[test]
fn cooperative_define_never_switches() {
    let mut h = Harness::boot();
    h.request(2, 0);
    h.define(0, 3);
    h.start(0);
    assert_eq!(h.current(), 1);

    let high = h.define(1, 0);
    assert_eq!(h.current(), 1);
    assert_eq!(h.k.thread(high.index()).state(), ThreadState::Ready);
    assert_eq!(h.tick(), Dispatch::Resume(1));

    // It gets the CPU at the next voluntary switch.
    h.ok(Sysnum::ThreadYield, &[]);
    assert_eq!(h.current(), high.index());
}

#[test]
fn cooperative_unlock_hands_over_without_switching() {
    let mut h = Harness::boot();
    h.request(2, 1);
    assert_eq!(h.ok(Sysnum::LockInit, &[]), 0);
    let low = h.define(0, 3).index();
    let high = h.define(1, 1).index();
    h.start(0);

    assert_eq!(h.current(), high);
    h.ok(Sysnum::SleepMs, &[1]);
    assert_eq!(h.current(), low);
    h.ok(Sysnum::Lock, &[0]);
    // High wakes, but nothing preempts.
    assert_eq!(h.tick(), Dispatch::Resume(low));
    h.ok(Sysnum::ThreadYield, &[]);

    assert_eq!(h.current(), high);
    h.call(Sysnum::Lock, &[0]);
    assert_eq!(h.current(), low);

    // The lock goes to high, but low carries on until it gives way.
    h.ok(Sysnum::Unlock, &[0]);
    assert_eq!(h.current(), low);
    assert_eq!(h.k.locks().owner(LockId(0)), Ok(Some(high)));
    assert_eq!(h.k.thread(high).state(), ThreadState::Ready);
    assert_eq!(h.k.thread(low).priority().0, 3);

    h.ok(Sysnum::ThreadYield, &[]);
    assert_eq!(h.current(), high);
    assert_eq!(h.k.thread(high).save().rets()[0], 0);
}

proptest! {
    /// Threads run in priority order, and in definition order within a
    /// priority, as each one ends.
    #[test]
    fn most_important_longest_waiting_runs(
        priorities in proptest::collection::vec(0u8..4, 1..8),
    ) {
        let mut h = Harness::boot();
        h.request(priorities.len() as u32, 0);
        for (n, &p) in priorities.iter().enumerate() {
            h.define(n, p);
        }
        h.start(1000);

        let mut expected: Vec<usize> = (1..=priorities.len()).collect();
        expected.sort_by_key(|&slot| (priorities[slot - 1], slot));

        let mut seen = Vec::new();
        while h.current() != 0 {
            let running = h.current();
            seen.push(running);
            prop_assert_eq!(
                h.ok(Sysnum::ThreadPriority, &[]),
                u32::from(priorities[running - 1])
            );
            h.call(Sysnum::ThreadEnd, &[]);
        }
        prop_assert_eq!(seen, expected);
    }
}
