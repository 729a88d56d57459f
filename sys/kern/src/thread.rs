// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Implementation of threads.

use abi::{
    Generation, LockId, Priority, ResponseCode, ThreadId, ThreadState,
    MPU_REGION_COUNT,
};
use arrayvec::ArrayVec;

use crate::arch::SavedState;
use crate::descs::RegionDesc;
use crate::time::Timestamp;
use crate::umem::USlice;

/// Internal representation of a thread.
#[derive(Debug, Default)]
pub struct Thread {
    /// Saved machine state of the user program.
    save: SavedState,
    /// Priority the thread was defined with.
    base_priority: Priority,
    /// Priority the scheduler uses, which may have been raised by a more
    /// important thread waiting on a lock this one holds.
    priority: Priority,
    /// State used to make status and scheduling decisions.
    state: ThreadState,
    /// Generation number of this thread's current incarnation. This begins at
    /// zero and gets incremented whenever the slot is reused, so that
    /// identities from before the reuse can be told apart.
    generation: Generation,
    /// The thread's own stack region. `None` for empty slots.
    stack: Option<RegionDesc>,
    /// Everything the thread can touch, sorted by base address.
    regions: ArrayVec<RegionDesc, MPU_REGION_COUNT>,
    /// Deadline for a Sleeping thread.
    wake_at: Option<Timestamp>,
    /// Ticks this thread has been charged for while Running.
    run_ticks: u32,
    /// Stamp taken when the thread last became Ready; lower is longer
    /// waiting.
    ready_seq: u64,
}

impl Thread {
    /// Sets up an empty slot for a fresh incarnation.
    pub(crate) fn define(
        &mut self,
        priority: Priority,
        stack: Option<RegionDesc>,
        regions: ArrayVec<RegionDesc, MPU_REGION_COUNT>,
    ) {
        let generation = self.generation;
        *self = Thread {
            base_priority: priority,
            priority,
            state: ThreadState::Unstarted,
            generation,
            stack,
            regions,
            ..Thread::default()
        };
    }

    /// Returns this thread's current identity.
    pub fn id(&self, index: usize) -> ThreadId {
        ThreadId::for_index_and_gen(index, self.generation)
    }

    pub fn state(&self) -> ThreadState {
        self.state
    }

    pub(crate) fn set_state(&mut self, state: ThreadState) {
        self.state = state;
    }

    pub fn is_ready(&self) -> bool {
        self.state == ThreadState::Ready
    }

    pub fn is_running(&self) -> bool {
        self.state == ThreadState::Running
    }

    /// The lock this thread is queued on, if any.
    pub fn waiting_on(&self) -> Option<LockId> {
        match self.state {
            ThreadState::Blocked(abi::BlockReason::Lock(l)) => Some(l),
            _ => None,
        }
    }

    /// Effective priority.
    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub fn base_priority(&self) -> Priority {
        self.base_priority
    }

    pub(crate) fn set_priority(&mut self, p: Priority) {
        self.priority = p;
    }

    pub fn generation(&self) -> Generation {
        self.generation
    }

    /// Retires the current incarnation. The next `define` gets a new
    /// identity.
    pub(crate) fn terminate(&mut self) {
        *self = Thread {
            generation: self.generation.next(),
            ..Thread::default()
        };
    }

    pub fn stack(&self) -> Option<&RegionDesc> {
        self.stack.as_ref()
    }

    pub fn region_table(&self) -> &[RegionDesc] {
        &self.regions
    }

    pub fn wake_at(&self) -> Option<Timestamp> {
        self.wake_at
    }

    pub(crate) fn set_wake_at(&mut self, t: Option<Timestamp>) {
        self.wake_at = t;
    }

    pub fn run_ticks(&self) -> u32 {
        self.run_ticks
    }

    pub(crate) fn charge_tick(&mut self) {
        self.run_ticks = self.run_ticks.wrapping_add(1);
    }

    pub fn ready_seq(&self) -> u64 {
        self.ready_seq
    }

    pub(crate) fn set_ready_seq(&mut self, seq: u64) {
        self.ready_seq = seq;
    }

    /// Returns a reference to the saved machine state for the thread.
    pub fn save(&self) -> &SavedState {
        &self.save
    }

    /// Returns a mutable reference to the saved machine state for the thread.
    pub fn save_mut(&mut self) -> &mut SavedState {
        &mut self.save
    }
}

/// Interface that must be implemented by the `arch::SavedState` type. This
/// gives architecture-independent access to thread state for the rest of the
/// kernel.
///
/// Architectures need to implement the `argX` and `retX` functions plus
/// `syscall_descriptor`, and the rest of the trait (such as the argument
/// proxy types) will just work.
pub trait ArchState: Default {
    fn stack_pointer(&self) -> u32;

    /// Reads syscall argument register 0.
    fn arg0(&self) -> u32;
    fn arg1(&self) -> u32;
    fn arg2(&self) -> u32;
    fn arg3(&self) -> u32;
    fn arg4(&self) -> u32;
    fn arg5(&self) -> u32;

    /// Reads the syscall descriptor (number).
    fn syscall_descriptor(&self) -> u32;

    /// Writes syscall return argument 0.
    fn ret0(&mut self, _: u32);
    fn ret1(&mut self, _: u32);

    /// Interprets arguments as for the `thread_define` syscall.
    fn as_define_args(&self) -> DefineArgs {
        DefineArgs {
            entry: self.arg0(),
            stack_base: self.arg1(),
            stack_size: self.arg2(),
            priority: u8::try_from(self.arg3()).map(Priority),
            argument: self.arg4(),
            exit: self.arg5(),
        }
    }

    /// Interprets arguments as for syscalls taking one user buffer.
    fn as_buffer_args(&self) -> Result<USlice<u8>, ResponseCode> {
        USlice::from_raw(self.arg0() as usize, self.arg1() as usize)
    }

    fn as_lock_args(&self) -> LockId {
        LockId(self.arg0())
    }

    fn as_request_args(&self) -> RequestArgs {
        RequestArgs {
            threads: self.arg0() as usize,
            locks: self.arg1() as usize,
        }
    }

    /// Sets a successful return with `value` in the second register.
    fn set_ok(&mut self, value: u32) {
        self.ret0(0);
        self.ret1(value);
    }

    /// Sets a recoverable error code using the architecture's ABI.
    fn set_error_response(&mut self, resp: ResponseCode) {
        self.ret0(resp.into());
        self.ret1(0);
    }
}

/// Decoded arguments for `thread_define`.
#[derive(Clone, Debug)]
pub struct DefineArgs {
    pub entry: u32,
    pub stack_base: u32,
    pub stack_size: u32,
    /// Priorities above 255 can't be represented and are rejected.
    pub priority: Result<Priority, core::num::TryFromIntError>,
    pub argument: u32,
    /// Where the thread returns to if its entry function returns.
    pub exit: u32,
}

/// Decoded arguments for `multitask_request`.
#[derive(Clone, Debug)]
pub struct RequestArgs {
    pub threads: usize,
    pub locks: usize,
}

/// What an architecture needs to build a thread's first frame.
#[derive(Copy, Clone, Debug)]
pub struct ThreadStart {
    pub entry: u32,
    pub argument: u32,
    pub exit: u32,
    pub stack: RegionDesc,
}

/// Return value for operations that can have scheduling implications. This
/// is marked `must_use` because forgetting to actually update the scheduler
/// after performing an operation that requires it would be Bad.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[must_use]
pub enum NextThread {
    /// It's fine to keep running whatever thread we were just running.
    Same,
    /// The running thread can't or shouldn't continue; the scheduler needs
    /// to pick again.
    Other,
}
