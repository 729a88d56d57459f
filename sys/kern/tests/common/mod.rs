// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! A kernel on the simulated board, and a stand-in for whichever thread is
//! on the CPU.

#![allow(dead_code)]

use abi::{RegionAttributes, ResponseCode, Sysnum, ThreadId};
use kern::arch::{Sim, SimDevices, SimMemory, SimRegisters};
use kern::descs::RegionDesc;
use kern::{BootInfo, Dispatch, Event, Kernel, Peripherals};

pub const FLASH: RegionDesc = RegionDesc::new(
    0x0800_0000,
    0x4_0000,
    RegionAttributes::READ.union(RegionAttributes::EXECUTE),
);
/// Main's data, with its heap in the top half.
pub const RAM: RegionDesc = RegionDesc::new(
    0x2000_0000,
    0x4000,
    RegionAttributes::READ.union(RegionAttributes::WRITE),
);
pub const HEAP: core::ops::Range<u32> = 0x2000_2000..0x2000_4000;
/// The kernel's thread stack arena.
pub const STACKS: RegionDesc = RegionDesc::new(
    0x2000_4000,
    0x4000,
    RegionAttributes::READ.union(RegionAttributes::WRITE),
);
pub const MAIN_STACK: RegionDesc = RegionDesc::new(
    0x2000_8000,
    0x1000,
    RegionAttributes::READ.union(RegionAttributes::WRITE),
);
pub const STACK_SIZE: u32 = 0x400;

/// Base of the `n`th thread stack in `STACKS`.
pub fn stack(n: usize) -> u32 {
    STACKS.base + n as u32 * STACK_SIZE
}

pub struct Harness {
    pub k: Kernel<Sim>,
}

impl Harness {
    pub fn boot() -> Self {
        let peripherals = Peripherals {
            mpu: SimRegisters::default(),
            systick: SimRegisters::default(),
            devices: SimDevices::default(),
            memory: SimMemory::new(0x2000_0000, 0x9000),
        };
        let info = BootInfo {
            entry: 0x0800_0101,
            stack: MAIN_STACK,
            private: [RAM].into_iter().collect(),
            shared: [FLASH].into_iter().collect(),
            stacks: STACKS,
            heap: HEAP,
        };
        let mut k = Kernel::new(peripherals, info).unwrap();
        assert_eq!(k.start(), Ok(Dispatch::Resume(0)));
        Self { k }
    }

    pub fn current(&self) -> usize {
        self.k.current().expect("some thread should be running")
    }

    /// Has the running thread trap with `nr`. Returns the status and value
    /// registers of the caller as they stand afterwards, which for a call
    /// that blocked are whatever it last returned.
    pub fn call(&mut self, nr: Sysnum, args: &[u32]) -> (u32, u32) {
        self.call_raw(nr as u32, args)
    }

    pub fn call_raw(&mut self, nr: u32, args: &[u32]) -> (u32, u32) {
        let c = self.current();
        self.k.thread_mut(c).save_mut().load_syscall(nr, args);
        self.k.handle(Event::Syscall).unwrap();
        let rets = self.k.thread(c).save().rets();
        (rets[0], rets[1])
    }

    /// Like `call`, but expects success and returns the value.
    pub fn ok(&mut self, nr: Sysnum, args: &[u32]) -> u32 {
        let (status, value) = self.call(nr, args);
        assert_eq!(status, 0, "{nr:?}{args:x?} failed");
        value
    }

    pub fn tick(&mut self) -> Dispatch {
        self.k.handle(Event::Tick).unwrap()
    }

    pub fn request(&mut self, threads: u32, locks: u32) {
        self.ok(Sysnum::MultitaskRequest, &[threads, locks]);
    }

    /// Has the running thread define a thread on the `n`th stack.
    pub fn define(&mut self, n: usize, priority: u8) -> ThreadId {
        let id = self.ok(Sysnum::ThreadDefine, &define_args(n, priority));
        ThreadId(id as u16)
    }

    pub fn start(&mut self, tick_hz: u32) {
        assert_eq!(self.current(), 0);
        let (status, _) = self.call(Sysnum::MultitaskStart, &[tick_hz]);
        assert_eq!(status, 0);
    }
}

/// `thread_define` arguments for a thread on the `n`th stack, taking `n` as
/// its argument.
pub fn define_args(n: usize, priority: u8) -> [u32; 6] {
    [
        0x0800_1001,
        stack(n),
        STACK_SIZE,
        u32::from(priority),
        n as u32,
        0,
    ]
}

pub fn code(rc: ResponseCode) -> u32 {
    rc.into()
}
