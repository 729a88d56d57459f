// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Kernel locks.
//!
//! A lock has at most one owner and a wait set of Blocked threads, ordered by
//! effective priority with FIFO order among equals. Releasing a lock with
//! waiters hands it straight to the head waiter: the waiter becomes the owner
//! before it is even made Ready, so no other thread can slip in between.
//!
//! While a thread waits, the owner inherits the waiter's priority if that is
//! more important, and so on along any chain of owners that are themselves
//! waiting. Effective priority is recomputed from what is still held whenever
//! a lock changes hands.
//!
//! The functions here move threads between Running/Blocked and record who
//! owns what. Making a woken thread Ready is the scheduler's job; they return
//! the slot of any thread that needs it.

use abi::{BlockReason, LockId, Priority, ResponseCode, ThreadState};
use arrayvec::ArrayVec;

use crate::err::{Fatal, UserError};
use crate::startup::{MAX_LOCKS, THREAD_SLOTS};
use crate::thread::{ArchState, Thread};

#[derive(Debug, Default)]
struct Lock {
    owner: Option<usize>,
    /// Thread slots, most important first.
    waiters: ArrayVec<u8, THREAD_SLOTS>,
}

impl Lock {
    /// Queues `thread` behind every waiter at least as important.
    fn enqueue(&mut self, threads: &[Thread], thread: usize) {
        let p = threads[thread].priority();
        let at = self
            .waiters
            .iter()
            .position(|&w| {
                p.is_more_important_than(threads[usize::from(w)].priority())
            })
            .unwrap_or(self.waiters.len());
        // The wait set can't overflow: a thread waits on at most one lock.
        self.waiters.insert(at, thread as u8);
    }

    fn remove(&mut self, thread: usize) {
        self.waiters.retain(|w| usize::from(*w) != thread);
    }

    fn most_important_waiter(&self, threads: &[Thread]) -> Option<Priority> {
        self.waiters
            .iter()
            .map(|&w| threads[usize::from(w)].priority())
            .reduce(Priority::most_important)
    }
}

/// Outcome of a `lock` call that didn't fail.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Acquire {
    /// The caller owns the lock and keeps running.
    Taken,
    /// The caller is Blocked in the wait set.
    Queued,
}

/// All of the kernel's locks.
#[derive(Debug)]
pub struct LockTable {
    locks: [Lock; MAX_LOCKS],
    /// How many locks the application asked for.
    capacity: usize,
    /// How many have been handed out; ids are `0..defined`.
    defined: usize,
}

impl Default for LockTable {
    fn default() -> Self {
        Self {
            locks: core::array::from_fn(|_| Lock::default()),
            capacity: 0,
            defined: 0,
        }
    }
}

impl LockTable {
    pub fn reserve(&mut self, capacity: usize) {
        self.capacity = capacity.min(MAX_LOCKS);
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn defined(&self) -> usize {
        self.defined
    }

    /// Hands out the next unused lock, unowned and with no waiters.
    pub fn init(&mut self) -> Result<LockId, ResponseCode> {
        if self.defined >= self.capacity {
            return Err(ResponseCode::OutOfLocks);
        }
        let id = self.defined;
        self.locks[id] = Lock::default();
        self.defined += 1;
        Ok(LockId(id as u32))
    }

    fn get(&self, id: LockId) -> Result<&Lock, ResponseCode> {
        if id.index() < self.defined {
            Ok(&self.locks[id.index()])
        } else {
            Err(ResponseCode::NoSuchLock)
        }
    }

    pub fn owner(&self, id: LockId) -> Result<Option<usize>, ResponseCode> {
        self.get(id).map(|l| l.owner)
    }

    /// Slots waiting on `id`, in the order they would be handed the lock.
    pub fn waiters(
        &self,
        id: LockId,
    ) -> Result<impl Iterator<Item = usize> + '_, ResponseCode> {
        self.get(id).map(|l| l.waiters.iter().map(|&w| usize::from(w)))
    }

    /// Checks whether `thread` owns any lock.
    pub fn holds_any(&self, thread: usize) -> bool {
        self.locks[..self.defined]
            .iter()
            .any(|l| l.owner == Some(thread))
    }

    /// Takes `id` for `caller`, or queues it.
    pub fn lock(
        &mut self,
        threads: &mut [Thread],
        caller: usize,
        id: LockId,
    ) -> Result<Acquire, ResponseCode> {
        let owner = self.get(id)?.owner;
        match owner {
            None => {
                self.locks[id.index()].owner = Some(caller);
                Ok(Acquire::Taken)
            }
            Some(o) if o == caller => Err(ResponseCode::ReentrantLock),
            Some(_) => {
                threads[caller]
                    .set_state(ThreadState::Blocked(BlockReason::Lock(id)));
                self.locks[id.index()].enqueue(threads, caller);
                self.inherit(threads, id);
                Ok(Acquire::Queued)
            }
        }
    }

    /// Releases `id` on behalf of `caller`. Returns the waiter that now owns
    /// it, if there was one.
    pub fn unlock(
        &mut self,
        threads: &mut [Thread],
        caller: usize,
        id: LockId,
    ) -> Result<Option<usize>, UserError> {
        if self.get(id)?.owner != Some(caller) {
            return Err(ResponseCode::NotOwner.into());
        }
        let next = self.hand_off(threads, id)?;
        self.recompute(threads, caller);
        Ok(next)
    }

    /// Releases every lock `thread` holds, as if it had unlocked each one.
    /// Returns the waiters that became owners.
    pub fn release_all(
        &mut self,
        threads: &mut [Thread],
        thread: usize,
    ) -> Result<ArrayVec<usize, THREAD_SLOTS>, Fatal> {
        let mut woken = ArrayVec::new();
        for index in 0..self.defined {
            if self.locks[index].owner == Some(thread) {
                if let Some(w) = self.hand_off(threads, LockId(index as u32))? {
                    woken
                        .try_push(w)
                        .map_err(|_| Fatal::Inconsistent("lock wake list"))?;
                }
            }
        }
        self.recompute(threads, thread);
        Ok(woken)
    }

    /// Moves ownership of `id` to its head waiter, or clears it.
    fn hand_off(
        &mut self,
        threads: &mut [Thread],
        id: LockId,
    ) -> Result<Option<usize>, Fatal> {
        let lock = &mut self.locks[id.index()];
        if lock.waiters.is_empty() {
            lock.owner = None;
            return Ok(None);
        }
        let next = usize::from(lock.waiters.remove(0));
        if threads[next].waiting_on() != Some(id) {
            return Err(Fatal::Inconsistent("lock wait set"));
        }
        lock.owner = Some(next);
        // The waiter's `lock` call completes now.
        threads[next].save_mut().set_ok(0);
        self.recompute(threads, next);
        Ok(Some(next))
    }

    /// Raises owners' priorities along the chain starting at `id`.
    fn inherit(&mut self, threads: &mut [Thread], id: LockId) {
        let mut lock = id;
        // Each step moves to a different thread, so the chain can't be longer
        // than the thread table.
        for _ in 0..THREAD_SLOTS {
            let l = &self.locks[lock.index()];
            let (Some(owner), Some(wanted)) =
                (l.owner, l.most_important_waiter(threads))
            else {
                return;
            };
            if !wanted.is_more_important_than(threads[owner].priority()) {
                return;
            }
            threads[owner].set_priority(wanted);
            match threads[owner].waiting_on() {
                Some(next) => {
                    // Keep the next wait set in priority order.
                    let l = &mut self.locks[next.index()];
                    l.remove(owner);
                    l.enqueue(threads, owner);
                    lock = next;
                }
                None => return,
            }
        }
    }

    /// Sets `thread`'s effective priority from its base priority and the
    /// waiters on every lock it still owns.
    fn recompute(&self, threads: &mut [Thread], thread: usize) {
        let inherited = self.locks[..self.defined]
            .iter()
            .filter(|l| l.owner == Some(thread))
            .filter_map(|l| l.most_important_waiter(threads))
            .fold(threads[thread].base_priority(), Priority::most_important);
        threads[thread].set_priority(inherited);
    }
}
