// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The kernel context.
//!
//! Everything the kernel knows lives in one `Kernel` value: the thread table,
//! the locks, the protection switch and tick timer, the drivers, and the
//! clock. The architecture layer owns that value and feeds it one `Event` per
//! exception; the kernel answers with the thread to resume. Nothing in here
//! touches a static, so any number of kernels can exist side by side on the
//! simulated platform.
//!
//! Every event is bracketed the same way: switch to kernel posture (checking
//! that the posture we find is the one we left), do the work, pick a thread,
//! and switch to that thread's posture on the way out.

use abi::Priority;

use crate::descs::RegionDesc;
use crate::err::Fatal;
use crate::lock::LockTable;
use crate::mpu::ProtectionSwitch;
use crate::platform::{Peripherals, Platform};
use crate::startup::{
    BootInfo, RegionTable, CORE_CLOCK_HZ, DEFAULT_TICK_HZ, MAIN, THREAD_SLOTS,
    TRACE_DEPTH,
};
use crate::thread::{Thread, ThreadStart};
use crate::time::{TickCounter, Timestamp};
use crate::timer::{TickDivisor, TickTimer};
use crate::trace::{Trace, TraceBuf};

/// Where the application is in its life.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Phase {
    /// Only main exists.
    Boot,
    /// Main has reserved `threads` slots and may define threads into them.
    Requested { threads: usize },
    /// Defined threads are being scheduled and main is waiting for them.
    Multitasking { threads: usize, preemptive: bool },
}

impl Phase {
    /// Thread slots reserved, not counting main.
    pub fn capacity(self) -> usize {
        match self {
            Phase::Boot => 0,
            Phase::Requested { threads }
            | Phase::Multitasking { threads, .. } => threads,
        }
    }
}

/// Reasons the CPU comes into the kernel.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Event {
    /// The running thread trapped with a syscall in its saved registers.
    Syscall,
    /// The tick timer fired.
    Tick,
    /// The MPU refused an access, at `address` if the hardware knows it.
    MemoryFault { address: Option<u32> },
}

/// What to do on the way out of the kernel.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Dispatch {
    /// Resume the thread in this slot; the MPU is already set up for it.
    Resume(usize),
    /// Nothing is runnable. Wait for the next tick.
    Idle,
}

pub struct Kernel<P: Platform> {
    pub(crate) threads: [Thread; THREAD_SLOTS],
    pub(crate) locks: LockTable,
    /// Slot of the thread on the CPU, or `None` while idle.
    pub(crate) current: Option<usize>,
    pub(crate) mpu: ProtectionSwitch<P::Mpu>,
    pub(crate) timer: TickTimer<P::SysTick>,
    pub(crate) devices: P::Devices,
    pub(crate) memory: P::Memory,
    pub(crate) clock: TickCounter,
    pub(crate) phase: Phase,
    /// Source of `Thread::ready_seq` stamps.
    pub(crate) next_seq: u64,
    /// Regions every thread can see.
    pub(crate) shared: RegionTable,
    /// Memory thread stacks are placed in.
    pub(crate) stacks: RegionDesc,
    /// Current end of main's heap; `sbrk` moves it up to `heap_limit`.
    pub(crate) heap_break: u32,
    pub(crate) heap_limit: u32,
    pub(crate) trace: TraceBuf<TRACE_DEPTH>,
}

impl<P: Platform> Kernel<P> {
    /// Builds a kernel with main defined but not yet running.
    pub fn new(
        peripherals: Peripherals<P>,
        boot: BootInfo,
    ) -> Result<Self, Fatal> {
        let Peripherals {
            mpu,
            systick,
            devices,
            memory,
        } = peripherals;
        let regions = boot.main_regions()?;

        let mut kernel = Self {
            threads: core::array::from_fn(|_| Thread::default()),
            locks: LockTable::default(),
            current: None,
            mpu: ProtectionSwitch::new(mpu),
            timer: TickTimer::new(systick),
            devices,
            memory,
            clock: TickCounter::new(DEFAULT_TICK_HZ),
            phase: Phase::Boot,
            next_seq: 0,
            shared: boot.shared.clone(),
            stacks: boot.stacks,
            heap_break: boot.heap.start,
            heap_limit: boot.heap.end,
            trace: TraceBuf::default(),
        };

        kernel.threads[MAIN].define(
            Priority::LOWEST,
            Some(boot.stack),
            regions,
        );
        let start = ThreadStart {
            entry: boot.entry,
            argument: 0,
            exit: 0,
            stack: boot.stack,
        };
        kernel
            .prepare(MAIN, start)
            .map_err(|_| Fatal::Inconsistent("boot stack"))?;
        Ok(kernel)
    }

    /// Starts the tick at the default rate and puts main on the CPU.
    pub fn start(&mut self) -> Result<Dispatch, Fatal> {
        let divisor = TickDivisor::for_rate(CORE_CLOCK_HZ, DEFAULT_TICK_HZ)
            .ok_or(Fatal::Inconsistent("default tick rate"))?;
        self.timer.configure(divisor);
        ktrace!(self.trace, Trace::Boot);
        self.make_ready(MAIN);
        let next = self.select();
        self.exit_to(next)
    }

    /// Processes one event and says which thread to run next.
    ///
    /// A `Fatal` means the system stops, usually because isolation can no
    /// longer be trusted; the caller must not resume any thread.
    pub fn handle(&mut self, event: Event) -> Result<Dispatch, Fatal> {
        let result = self.step(event);
        if let Err(fatal) = &result {
            // No more ticks; nothing gets scheduled after this.
            self.timer.stop();
            ktrace!(self.trace, Trace::Fatal);
            klog!("kernel: halting: {}", fatal);
        }
        result
    }

    fn step(&mut self, event: Event) -> Result<Dispatch, Fatal> {
        self.mpu.enter_kernel_mode(self.current)?;

        let hint = match event {
            Event::Syscall => {
                let caller = self.current.ok_or(Fatal::NoCurrentThread)?;
                self.syscall(caller)?
            }
            Event::Tick => self.tick(),
            Event::MemoryFault { address } => {
                return Err(Fatal::MemoryFault {
                    thread: self.current,
                    address,
                });
            }
        };

        let next = self.apply(hint);
        self.exit_to(next)
    }

    fn exit_to(&mut self, next: Dispatch) -> Result<Dispatch, Fatal> {
        if let Dispatch::Resume(i) = next {
            self.mpu.enter_thread_mode(i, self.threads[i].region_table())?;
        }
        Ok(next)
    }

    pub fn current(&self) -> Option<usize> {
        self.current
    }

    pub fn thread(&self, index: usize) -> &Thread {
        &self.threads[index]
    }

    /// Gives the architecture layer (or a test standing in for a thread)
    /// access to a thread's saved registers.
    pub fn thread_mut(&mut self, index: usize) -> &mut Thread {
        &mut self.threads[index]
    }

    pub fn threads(&self) -> &[Thread] {
        &self.threads
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn now(&self) -> Timestamp {
        self.clock.now()
    }

    pub fn locks(&self) -> &LockTable {
        &self.locks
    }

    pub fn trace(&self) -> &TraceBuf<TRACE_DEPTH> {
        &self.trace
    }

    pub fn devices(&self) -> &P::Devices {
        &self.devices
    }

    pub fn devices_mut(&mut self) -> &mut P::Devices {
        &mut self.devices
    }

    pub fn memory(&self) -> &P::Memory {
        &self.memory
    }

    pub fn memory_mut(&mut self) -> &mut P::Memory {
        &mut self.memory
    }

    pub fn mpu(&self) -> &ProtectionSwitch<P::Mpu> {
        &self.mpu
    }

    pub fn timer(&self) -> &TickTimer<P::SysTick> {
        &self.timer
    }
}
