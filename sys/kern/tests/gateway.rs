// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

mod common;

use abi::{ResponseCode, Sysnum, ThreadId};
use common::{code, define_args, stack, Harness};
use kern::mpu::{self, Posture};
use kern::startup::MAX_THREADS;
use proptest::prelude::*;

#[test]
fn defining_past_capacity_is_refused() {
    let mut h = Harness::boot();
    h.request(MAX_THREADS as u32, 0);
    let ids: Vec<ThreadId> = (0..MAX_THREADS).map(|n| h.define(n, 4)).collect();
    for (i, a) in ids.iter().enumerate() {
        for b in &ids[i + 1..] {
            assert_ne!(a, b);
        }
    }
    let args = define_args(MAX_THREADS, 4);
    let (status, _) = h.call(Sysnum::ThreadDefine, &args);
    assert_eq!(status, code(ResponseCode::OutOfThreadSlots));
}

#[test]
fn defining_before_request_has_no_slots() {
    let mut h = Harness::boot();
    let (status, _) = h.call(Sysnum::ThreadDefine, &define_args(0, 4));
    assert_eq!(status, code(ResponseCode::OutOfThreadSlots));
}

#[test]
fn main_cannot_reach_thread_stacks() {
    let mut h = Harness::boot();
    h.request(1, 0);
    h.define(0, 1);
    // The stack is the thread's, not main's, even though main defined it.
    h.k.memory_mut().poke(stack(0) as usize, b"secret");
    let (status, _) = h.call(Sysnum::Write, &[stack(0), 6]);
    assert_eq!(status, code(ResponseCode::MemoryViolation));
    let (status, _) = h.call(Sysnum::Read, &[stack(0), 6]);
    assert_eq!(status, code(ResponseCode::MemoryViolation));
    assert!(h.k.devices().console.is_empty());

    // Nor can it give main's own memory away as a stack.
    let args = [0x0800_1001, common::RAM.base, 0x400, 1, 0, 0];
    let (status, _) = h.call(Sysnum::ThreadDefine, &args);
    assert_eq!(status, code(ResponseCode::InvalidStackRegion));
}

#[test]
fn only_main_moves_the_heap() {
    let mut h = Harness::boot();
    assert_eq!(h.ok(Sysnum::Sbrk, &[64]), common::HEAP.start);
    h.request(1, 0);
    h.define(0, 1);
    h.start(1000);
    let (status, _) = h.call(Sysnum::Sbrk, &[64]);
    assert_eq!(status, code(ResponseCode::NotPermitted));
}

#[test]
fn only_main_controls_multitasking() {
    let mut h = Harness::boot();
    h.request(1, 0);
    h.define(0, 1);
    h.start(1000);
    let (status, _) = h.call(Sysnum::MultitaskStart, &[0]);
    assert_eq!(status, code(ResponseCode::NotPermitted));
    let (status, _) = h.call(Sysnum::MultitaskRequest, &[1, 0]);
    assert_eq!(status, code(ResponseCode::NotPermitted));
}

#[test]
fn threads_only_see_their_stack_and_shared_regions() {
    let mut h = Harness::boot();
    h.request(1, 0);
    h.define(3, 1);
    h.start(1000);
    assert_eq!(h.k.mpu().posture(), Posture::Thread(1));

    // The thread can't hand the kernel main's memory.
    let (status, _) = h.call(Sysnum::Write, &[common::RAM.base, 8]);
    assert_eq!(status, code(ResponseCode::MemoryViolation));
    assert_eq!(h.k.memory().reads(), 0);

    // Its own stack is fine.
    h.k.memory_mut().poke(stack(3) as usize, b"hi");
    assert_eq!(h.ok(Sysnum::Write, &[stack(3), 2]), 2);
    assert_eq!(h.k.devices().console, b"hi");

    // The last thing programmed was the thread's table: flash and its stack,
    // then the MPU turned back on.
    let writes = h.k.mpu().registers().writes();
    let tail = &writes[writes.len() - 1..];
    assert_eq!(tail, &[(mpu::CTRL, 0b101)]);
    let rbars: Vec<u32> = writes
        .iter()
        .rev()
        .filter(|(reg, _)| *reg == mpu::RBAR)
        .take(8)
        .map(|&(_, v)| v)
        .collect();
    assert_eq!(rbars[7] & !0x1F, common::FLASH.base);
    assert_eq!(rbars[6] & !0x1F, stack(3));
    assert!(rbars[..6].iter().all(|&v| v == 0));
}

proptest! {
    #[test]
    fn unknown_syscalls_are_reported(nr in 54u32..) {
        let mut h = Harness::boot();
        let (status, _) = h.call_raw(nr, &[1, 2, 3]);
        prop_assert_eq!(status, code(ResponseCode::InvalidSyscall));
        prop_assert_eq!(h.current(), 0);
    }

    /// Buffers outside everything main owns or shares are refused without
    /// being read.
    #[test]
    fn foreign_buffers_are_never_read(
        base in 0x3000_0000u32..0x4000_0000,
        len in 1u32..512,
    ) {
        let mut h = Harness::boot();
        let (status, _) = h.call(Sysnum::Write, &[base, len]);
        prop_assert_eq!(status, code(ResponseCode::MemoryViolation));
        // Whole pixels, and no more than a strip holds.
        let pixels = (len % 64 + 1) * 3;
        let (status, _) = h.call(Sysnum::NeopixelLoad, &[base, pixels]);
        prop_assert_eq!(status, code(ResponseCode::MemoryViolation));
        prop_assert_eq!(h.k.memory().reads(), 0);
    }
}
