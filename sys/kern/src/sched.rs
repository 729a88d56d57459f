// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Scheduling.
//!
//! Strict priority, with the longest-waiting thread first among equals.
//! "Longest waiting" is tracked with a stamp taken from a kernel-wide counter
//! each time a thread becomes Ready, so a thread that yields or gets
//! preempted goes to the back of its priority level.
//!
//! Until multitasking starts only main is scheduled; threads defined in the
//! meantime sit in Ready.

use core::cmp::Reverse;

use abi::{BlockReason, RegionAttributes, ResponseCode, ThreadId, ThreadState};
use arrayvec::ArrayVec;

use crate::arch;
use crate::descs::RegionDesc;
use crate::err::{Fatal, UserError};
use crate::kernel::{Dispatch, Kernel, Phase};
use crate::platform::Platform;
use crate::startup::{
    build_table, CORE_CLOCK_HZ, DEFAULT_TICK_HZ, MAIN, THREAD_SLOTS,
};
use crate::thread::{DefineArgs, NextThread, Thread, ThreadStart};
use crate::time::Timestamp;
use crate::timer::TickDivisor;
use crate::trace::Trace;
use crate::umem::USlice;

impl<P: Platform> Kernel<P> {
    fn stamp(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }

    /// Puts `index` at the back of its priority level.
    pub(crate) fn make_ready(&mut self, index: usize) {
        let seq = self.stamp();
        let t = &mut self.threads[index];
        t.set_state(ThreadState::Ready);
        t.set_wake_at(None);
        t.set_ready_seq(seq);
    }

    /// Slots the scheduler may pick from.
    fn eligible(&self) -> core::ops::Range<usize> {
        match self.phase {
            Phase::Multitasking { .. } => 0..THREAD_SLOTS,
            Phase::Boot | Phase::Requested { .. } => MAIN..MAIN + 1,
        }
    }

    fn ready(&self) -> impl Iterator<Item = usize> + '_ {
        self.eligible().filter(|&i| self.threads[i].is_ready())
    }

    /// Puts the most important Ready thread on the CPU, or goes idle.
    pub(crate) fn select(&mut self) -> Dispatch {
        let chosen = self.ready().min_by_key(|&i| {
            let t = &self.threads[i];
            (t.priority().0, t.ready_seq())
        });
        match chosen {
            Some(i) => {
                self.threads[i].set_state(ThreadState::Running);
                self.current = Some(i);
                ktrace!(self.trace, Trace::Switch(i as u8));
                Dispatch::Resume(i)
            }
            None => {
                self.current = None;
                ktrace!(self.trace, Trace::Idle);
                Dispatch::Idle
            }
        }
    }

    /// Acts on a handler's scheduling hint.
    pub(crate) fn apply(&mut self, hint: NextThread) -> Dispatch {
        if let Some(c) = self.current {
            if self.threads[c].is_running() {
                if hint == NextThread::Same {
                    return Dispatch::Resume(c);
                }
                self.make_ready(c);
            }
        }
        self.select()
    }

    /// Whether `other` should take the CPU from `caller` right away. Only
    /// preemptive scheduling switches on anything but a blocking call.
    pub(crate) fn outranks(&self, other: usize, caller: usize) -> NextThread {
        let preemptive =
            matches!(self.phase, Phase::Multitasking { preemptive: true, .. });
        if preemptive
            && self.threads[other]
                .priority()
                .is_more_important_than(self.threads[caller].priority())
        {
            NextThread::Other
        } else {
            NextThread::Same
        }
    }

    /// Registers a new Ready thread in a free slot, on a stack inside the
    /// kernel's stack arena. Any thread may define one.
    pub(crate) fn define_thread(
        &mut self,
        args: DefineArgs,
    ) -> Result<ThreadId, ResponseCode> {
        let priority =
            args.priority.map_err(|_| ResponseCode::InvalidArgument)?;
        let slot = (1..=self.phase.capacity())
            .find(|&i| !self.threads[i].state().is_live())
            .ok_or(ResponseCode::OutOfThreadSlots)?;

        let stack = RegionDesc::stack(args.stack_base, args.stack_size)?;
        let in_arena = self.stacks.contains(stack.base as usize)
            && stack.end_addr() <= self.stacks.end_addr();
        let clash = self
            .threads
            .iter()
            .filter_map(Thread::stack)
            .any(|s| kerncore::overlaps(s, &stack));
        if !in_arena || clash {
            return Err(ResponseCode::InvalidStackRegion);
        }
        let regions = build_table(&self.shared, [stack])
            .ok_or(ResponseCode::InvalidStackRegion)?;

        self.threads[slot].define(priority, Some(stack), regions);
        let start = ThreadStart {
            entry: args.entry,
            argument: args.argument,
            exit: args.exit,
            stack,
        };
        if let Err(e) = self.prepare(slot, start) {
            self.threads[slot].terminate();
            return Err(e);
        }
        self.make_ready(slot);
        ktrace!(
            self.trace,
            Trace::Define {
                thread: slot as u8,
                priority: priority.0
            }
        );
        Ok(self.threads[slot].id(slot))
    }

    /// Builds the first frame at the top of the thread's stack.
    pub(crate) fn prepare(
        &mut self,
        slot: usize,
        start: ThreadStart,
    ) -> Result<(), ResponseCode> {
        let size = arch::INITIAL_FRAME_SIZE;
        let base = (start.stack.top() as usize).saturating_sub(size);
        let frame = USlice::<u8>::from_raw(base, size)?.validate(
            self.threads[slot].region_table(),
            RegionAttributes::WRITE,
        )?;
        arch::reinitialize(
            self.threads[slot].save_mut(),
            &start,
            frame,
            &mut self.memory,
        )
        .map_err(|e| {
            klog!("kernel: writing initial frame for {}: {:?}", slot, e);
            ResponseCode::HardwareFault
        })
    }

    /// Starts scheduling the defined threads and parks main until they have
    /// all ended. `tick_hz` of zero means no preemption.
    pub(crate) fn start_multitasking(
        &mut self,
        caller: usize,
        tick_hz: u32,
    ) -> Result<NextThread, UserError> {
        if caller != MAIN {
            return Err(ResponseCode::NotPermitted.into());
        }
        let Phase::Requested { threads } = self.phase else {
            return Err(ResponseCode::NotRequested.into());
        };
        if tick_hz > CORE_CLOCK_HZ {
            return Err(ResponseCode::InvalidArgument.into());
        }
        if !self.any_live(threads) {
            return Err(ResponseCode::NoThreads.into());
        }

        let rate = if tick_hz == 0 { DEFAULT_TICK_HZ } else { tick_hz };
        let divisor = TickDivisor::for_rate(CORE_CLOCK_HZ, rate)
            .ok_or(ResponseCode::InvalidArgument)?;
        self.clock.restart(rate);
        self.timer.configure(divisor);
        self.phase = Phase::Multitasking {
            threads,
            preemptive: tick_hz != 0,
        };
        self.threads[MAIN].set_state(ThreadState::Blocked(BlockReason::Join));
        Ok(NextThread::Other)
    }

    fn any_live(&self, threads: usize) -> bool {
        self.threads[1..=threads].iter().any(|t| t.state().is_live())
    }

    /// Gives up the CPU to the rest of the caller's priority level.
    pub(crate) fn request_switch(&mut self, caller: usize) -> NextThread {
        self.make_ready(caller);
        NextThread::Other
    }

    pub(crate) fn sleep(&mut self, caller: usize, ms: u32) -> NextThread {
        if ms == 0 {
            return self.request_switch(caller);
        }
        let deadline = self.clock.deadline_after_ms(ms);
        let t = &mut self.threads[caller];
        t.set_state(ThreadState::Sleeping);
        t.set_wake_at(Some(deadline));
        NextThread::Other
    }

    /// Handles a timer interrupt: advances time, wakes sleepers, and decides
    /// on preemption.
    pub(crate) fn tick(&mut self) -> NextThread {
        if !self.timer.on_interrupt() {
            // Part way through a prescaled tick.
            return NextThread::Same;
        }
        let now = self.clock.advance();
        if let Some(c) = self.current {
            self.threads[c].charge_tick();
        }

        // Threads that were Ready before this tick have stamps below `mark`.
        let mark = self.next_seq;
        self.wake_sleepers(now);
        self.preemption(mark)
    }

    /// Readies every sleeper whose deadline has come, most overdue first.
    fn wake_sleepers(&mut self, now: Timestamp) {
        let mut due: ArrayVec<(i32, usize), THREAD_SLOTS> = self
            .threads
            .iter()
            .enumerate()
            .filter(|(_, t)| t.state() == ThreadState::Sleeping)
            .filter_map(|(i, t)| {
                let at = t.wake_at()?;
                now.has_reached(at).then(|| (now.ticks_since(at), i))
            })
            .collect();
        due.sort_unstable_by_key(|&(overdue, i)| (Reverse(overdue), i));
        for (_, i) in due {
            self.make_ready(i);
            ktrace!(self.trace, Trace::Wake(i as u8));
        }
    }

    fn preemption(&self, mark: u64) -> NextThread {
        let Some(c) = self.current else {
            return NextThread::Other;
        };
        if !matches!(self.phase, Phase::Multitasking { preemptive: true, .. }) {
            return NextThread::Same;
        }
        let running = self.threads[c].priority();
        let contender = self.ready().any(|i| {
            let t = &self.threads[i];
            t.priority().is_more_important_than(running)
                || (t.priority() == running && t.ready_seq() < mark)
        });
        if contender {
            NextThread::Other
        } else {
            NextThread::Same
        }
    }

    /// Ends `caller`, handing its locks on. The last thread to end wakes
    /// main.
    pub(crate) fn end_thread(
        &mut self,
        caller: usize,
    ) -> Result<NextThread, UserError> {
        if caller == MAIN {
            return Err(ResponseCode::NotPermitted.into());
        }
        if self.locks.holds_any(caller) {
            klog!("kernel: thread {} ended holding a lock", caller);
        }
        let woken = self.locks.release_all(&mut self.threads, caller)?;
        for w in woken {
            self.make_ready(w);
        }
        self.threads[caller].terminate();
        ktrace!(self.trace, Trace::End(caller as u8));

        if let Phase::Multitasking { threads, .. } = self.phase {
            if !self.any_live(threads) {
                self.join(threads)?;
            }
        }
        Ok(NextThread::Other)
    }

    /// Returns to the single-threaded world once every thread has ended.
    fn join(&mut self, threads: usize) -> Result<(), UserError> {
        let divisor = TickDivisor::for_rate(CORE_CLOCK_HZ, DEFAULT_TICK_HZ)
            .ok_or(Fatal::Inconsistent("default tick rate"))?;
        self.timer.configure(divisor);
        self.clock.restart(DEFAULT_TICK_HZ);
        self.phase = Phase::Requested { threads };
        self.make_ready(MAIN);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::tests::boot;
    use crate::kernel::Event;
    use crate::thread::ArchState;
    use abi::Priority;

    fn define(
        k: &mut Kernel<crate::arch::Sim>,
        base: u32,
        priority: u8,
    ) -> usize {
        let args = DefineArgs {
            entry: 0x0800_1001,
            stack_base: base,
            stack_size: 0x400,
            priority: Ok(Priority(priority)),
            argument: 0,
            exit: 0,
        };
        k.define_thread(args).unwrap().index()
    }

    fn requested(threads: usize) -> Kernel<crate::arch::Sim> {
        let mut k = boot();
        k.phase = Phase::Requested { threads };
        k
    }

    #[test]
    fn defined_threads_wait_for_start() {
        let mut k = requested(2);
        let a = define(&mut k, 0x2000_4000, 1);
        assert_eq!(k.thread(a).state(), ThreadState::Ready);
        // Main yields but is the only one eligible.
        let hint = k.request_switch(MAIN);
        assert_eq!(k.apply(hint), Dispatch::Resume(MAIN));
    }

    #[test]
    fn stack_checks() {
        let mut k = requested(3);
        define(&mut k, 0x2000_4000, 1);
        let mut args = DefineArgs {
            entry: 0,
            stack_base: 0x2000_4600,
            stack_size: 0x400,
            priority: Ok(Priority(1)),
            argument: 0,
            exit: 0,
        };
        // Misaligned.
        assert_eq!(
            k.define_thread(args.clone()),
            Err(ResponseCode::InvalidStackRegion)
        );
        // Taken.
        args.stack_base = 0x2000_4000;
        assert_eq!(
            k.define_thread(args.clone()),
            Err(ResponseCode::InvalidStackRegion)
        );
        // Outside the arena: main's data, main's stack, and nowhere at all.
        for base in [0x2000_0000, 0x2000_8000, 0x3000_0000] {
            args.stack_base = base;
            assert_eq!(
                k.define_thread(args.clone()),
                Err(ResponseCode::InvalidStackRegion)
            );
        }
        args.stack_base = 0x2000_4400;
        args.priority = u8::try_from(300u32).map(Priority);
        assert_eq!(
            k.define_thread(args),
            Err(ResponseCode::InvalidArgument)
        );
        assert_eq!(k.memory().writes(), 2);
    }

    #[test]
    fn start_needs_request_and_threads() {
        let mut k = boot();
        assert!(matches!(
            k.start_multitasking(MAIN, 0),
            Err(UserError::Recoverable(ResponseCode::NotRequested, _))
        ));
        k.phase = Phase::Requested { threads: 1 };
        assert!(matches!(
            k.start_multitasking(MAIN, 0),
            Err(UserError::Recoverable(ResponseCode::NoThreads, _))
        ));
        define(&mut k, 0x2000_4000, 1);
        assert!(matches!(
            k.start_multitasking(MAIN, CORE_CLOCK_HZ + 1),
            Err(UserError::Recoverable(ResponseCode::InvalidArgument, _))
        ));
        assert_eq!(k.start_multitasking(MAIN, 100).unwrap(), NextThread::Other);
        assert_eq!(k.apply(NextThread::Other), Dispatch::Resume(1));
        assert_eq!(
            k.thread(MAIN).state(),
            ThreadState::Blocked(BlockReason::Join)
        );
    }

    #[test]
    fn sleepers_wake_most_overdue_first() {
        let mut k = requested(3);
        let a = define(&mut k, 0x2000_4000, 2);
        let b = define(&mut k, 0x2000_4400, 2);
        for (i, at) in [(a, 3u32), (b, 1u32)] {
            k.threads[i].set_state(ThreadState::Sleeping);
            k.threads[i].set_wake_at(Some(Timestamp::from(at)));
        }
        k.wake_sleepers(Timestamp::from(5));
        assert!(k.thread(b).ready_seq() < k.thread(a).ready_seq());
        assert_eq!(k.thread(a).wake_at(), None);
    }

    #[test]
    fn prescaled_ticks_only_count_when_complete() {
        let mut k = boot();
        k.timer.configure(TickDivisor { reload: 0, bins: 3 });
        let before = k.now();
        for _ in 0..2 {
            k.handle(Event::Tick).unwrap();
        }
        assert_eq!(k.now(), before);
        k.handle(Event::Tick).unwrap();
        assert_eq!(k.now().ticks_since(before), 1);
        assert_eq!(k.thread(MAIN).run_ticks(), 1);
    }

    #[test]
    fn last_end_wakes_main() {
        let mut k = requested(1);
        let a = define(&mut k, 0x2000_4000, 1);
        k.threads[MAIN].save_mut().set_ok(0);
        let hint = k.start_multitasking(MAIN, 0).unwrap();
        assert_eq!(k.apply(hint), Dispatch::Resume(a));
        let hint = k.end_thread(a).unwrap();
        assert_eq!(k.apply(hint), Dispatch::Resume(MAIN));
        assert_eq!(k.phase(), Phase::Requested { threads: 1 });
        assert!(!k.thread(a).state().is_live());
    }
}
