// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Kernel ABI definitions, shared between kernel and threads.

#![no_std]

use num_derive::FromPrimitive;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

/// Number of protection regions the MPU can hold at once. A thread's region
/// table can't be larger than this.
pub const MPU_REGION_COUNT: usize = 8;

/// Names a particular incarnation of a thread.
///
/// A `ThreadId` combines two fields, a slot index in the kernel's thread table
/// and a generation number. The generation number is bumped each time a slot
/// is reused by `thread_define`, so an identity handed out to one thread is
/// never handed out again while the generation counter has room.
///
/// The slot index is in the lower `ThreadId::INDEX_BITS` bits, while the
/// generation is in the top bits.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ThreadId(pub u16);

impl ThreadId {
    /// Number of bits in a `ThreadId` used to represent the slot index.
    pub const INDEX_BITS: u32 = 8;

    /// Derived mask of the index bits portion.
    pub const INDEX_MASK: u16 = (1 << Self::INDEX_BITS) - 1;

    /// The boot thread always lives in slot zero.
    pub const MAIN: Self = Self(0);

    /// Fabricates a `ThreadId` for a known index and generation number.
    pub const fn for_index_and_gen(index: usize, gen: Generation) -> Self {
        ThreadId(
            (index as u16 & Self::INDEX_MASK)
                | (gen.0 as u16) << Self::INDEX_BITS,
        )
    }

    /// Extracts the index part of this ID.
    pub fn index(&self) -> usize {
        usize::from(self.0 & Self::INDEX_MASK)
    }

    /// Extracts the generation part of this ID.
    pub fn generation(&self) -> Generation {
        Generation((self.0 >> Self::INDEX_BITS) as u8)
    }
}

/// Type used to track generation numbers.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Default)]
#[repr(transparent)]
pub struct Generation(u8);

impl Generation {
    pub const ZERO: Self = Self(0);

    pub fn next(self) -> Self {
        Generation(self.0.wrapping_add(1))
    }
}

impl From<u8> for Generation {
    fn from(x: u8) -> Self {
        Self(x)
    }
}

/// Indicates priority of a thread.
///
/// Priorities are small numbers starting from zero. Numerically lower
/// priorities are more important, so Priority 0 is the most likely to be
/// scheduled, followed by 1, and so forth.
///
/// Note that this type *deliberately* does not implement `PartialOrd`/`Ord`, to
/// keep us from confusing ourselves on whether `>` means numerically greater /
/// less important, or more important / numerically smaller.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Default)]
#[repr(transparent)]
pub struct Priority(pub u8);

impl Priority {
    /// The least important priority. The boot thread runs here.
    pub const LOWEST: Self = Self(u8::MAX);

    /// Checks if `self` is strictly more important than `other`.
    ///
    /// This is easier to read than comparing the numeric values of the
    /// priorities, since lower numbers are more important.
    pub fn is_more_important_than(self, other: Self) -> bool {
        self.0 < other.0
    }

    /// Returns whichever of `self` and `other` is more important.
    pub fn most_important(self, other: Self) -> Self {
        if other.is_more_important_than(self) {
            other
        } else {
            self
        }
    }
}

/// Handle naming one of the kernel's locks, as returned by `lock_init`.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[repr(transparent)]
pub struct LockId(pub u32);

impl LockId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Scheduling state of a thread.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Default)]
pub enum ThreadState {
    /// The slot is being set up and the thread has not been made ready yet.
    Unstarted,
    /// The thread could be put on the CPU.
    Ready,
    /// The thread is on the CPU.
    Running,
    /// The thread is waiting for something other than time.
    Blocked(BlockReason),
    /// The thread is waiting for its wake time to arrive.
    Sleeping,
    /// The thread has ended. Its slot may be reused by a later definition.
    #[default]
    Terminated,
}

impl ThreadState {
    pub fn is_live(&self) -> bool {
        !matches!(self, ThreadState::Terminated)
    }
}

/// Reason a thread is in `ThreadState::Blocked`.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum BlockReason {
    /// Waiting in the wait set of a lock.
    Lock(LockId),
    /// The boot thread waiting for every defined thread to end.
    Join,
}

/// Status codes returned in the first return register of every syscall.
///
/// Zero means success and is not represented here.
#[derive(Copy, Clone, Debug, Eq, PartialEq, FromPrimitive)]
#[repr(u32)]
pub enum ResponseCode {
    /// No free slot in the thread table, or no capacity has been requested.
    OutOfThreadSlots = 1,
    /// Stack region is misaligned, not a power of two, outside the thread
    /// stack arena, or overlaps another thread's stack.
    InvalidStackRegion = 2,
    /// The syscall number is not in the dispatch table.
    InvalidSyscall = 3,
    /// A pointer argument does not lie in the caller's own memory.
    MemoryViolation = 4,
    /// The caller tried to release a lock it does not hold.
    NotOwner = 5,
    /// The caller tried to take a lock it already holds.
    ReentrantLock = 6,
    /// A device driver reported failure.
    HardwareFault = 7,
    /// An argument was outside the range the call accepts.
    InvalidArgument = 8,
    /// `multitask_request` has already been called.
    AlreadyRequested = 9,
    /// The call needs `multitask_request` to have been called first.
    NotRequested = 10,
    /// `multitask_start` was called without any live thread defined.
    NoThreads = 11,
    /// Every lock the application asked for has been handed out.
    OutOfLocks = 12,
    /// The lock handle does not name an initialized lock.
    NoSuchLock = 13,
    /// The caller is not allowed to make this call (e.g. only the boot thread
    /// may start multitasking).
    NotPermitted = 14,
    /// Growing the heap would take the break past the heap limit.
    OutOfMemory = 15,
}

impl From<ResponseCode> for u32 {
    fn from(rc: ResponseCode) -> Self {
        rc as u32
    }
}

bitflags::bitflags! {
    /// Flags describing what a thread may do with a memory region.
    #[derive(Copy, Clone, Debug, Eq, PartialEq)]
    #[repr(transparent)]
    pub struct RegionAttributes: u32 {
        /// Region can be read by threads that include it.
        const READ = 1 << 0;
        /// Region can be written by threads that include it.
        const WRITE = 1 << 1;
        /// Region can contain executable code for threads that include it.
        const EXECUTE = 1 << 2;
        /// Region contains memory mapped registers. The kernel will not copy
        /// from it on a thread's behalf.
        const DEVICE = 1 << 3;
    }
}

/// One pixel of an addressable LED strip.
#[derive(
    Copy,
    Clone,
    Debug,
    Default,
    Eq,
    PartialEq,
    FromBytes,
    IntoBytes,
    Immutable,
    KnownLayout,
    Unaligned,
)]
#[repr(C)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    /// Unpacks the `0x00RRGGBB` register encoding used by `neopixel_set`.
    pub fn from_packed(word: u32) -> Self {
        Self {
            r: (word >> 16) as u8,
            g: (word >> 8) as u8,
            b: word as u8,
        }
    }

    pub fn packed(self) -> u32 {
        u32::from(self.r) << 16 | u32::from(self.g) << 8 | u32::from(self.b)
    }
}

/// Enumeration of syscall numbers.
///
/// The numbering is sparse and must stay stable: applications built against
/// an older kernel still trap with these values.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[repr(u32)]
pub enum Sysnum {
    Sbrk = 0,
    Write = 1,
    Read = 2,
    Exit = 3,
    SleepMs = 22,
    LuxRead = 23,
    NeopixelSet = 24,
    NeopixelLoad = 25,
    MultitaskRequest = 31,
    ThreadDefine = 32,
    MultitaskStart = 33,
    ThreadId = 34,
    ThreadYield = 35,
    ThreadEnd = 36,
    GetTime = 37,
    ThreadTime = 38,
    ThreadPriority = 39,
    LockInit = 41,
    Lock = 42,
    Unlock = 43,
    StepperSetSpeed = 51,
    StepperMove = 52,
    UltrasonicRead = 53,
}

/// We're using an explicit `TryFrom` impl for `Sysnum` instead of
/// `FromPrimitive` so that the kernel doesn't need `num-traits` for decoding.
impl core::convert::TryFrom<u32> for Sysnum {
    type Error = ();

    fn try_from(x: u32) -> Result<Self, Self::Error> {
        match x {
            0 => Ok(Self::Sbrk),
            1 => Ok(Self::Write),
            2 => Ok(Self::Read),
            3 => Ok(Self::Exit),
            22 => Ok(Self::SleepMs),
            23 => Ok(Self::LuxRead),
            24 => Ok(Self::NeopixelSet),
            25 => Ok(Self::NeopixelLoad),
            31 => Ok(Self::MultitaskRequest),
            32 => Ok(Self::ThreadDefine),
            33 => Ok(Self::MultitaskStart),
            34 => Ok(Self::ThreadId),
            35 => Ok(Self::ThreadYield),
            36 => Ok(Self::ThreadEnd),
            37 => Ok(Self::GetTime),
            38 => Ok(Self::ThreadTime),
            39 => Ok(Self::ThreadPriority),
            41 => Ok(Self::LockInit),
            42 => Ok(Self::Lock),
            43 => Ok(Self::Unlock),
            51 => Ok(Self::StepperSetSpeed),
            52 => Ok(Self::StepperMove),
            53 => Ok(Self::UltrasonicRead),
            _ => Err(()),
        }
    }
}
