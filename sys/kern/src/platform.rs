// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The seams between the kernel and the hardware it runs on.
//!
//! Everything the portable kernel needs from a board comes through the traits
//! in this module: register blocks for the MPU and tick timer, the device
//! drivers reached by syscalls, and a way to move bytes in and out of thread
//! memory once the kernel has checked the thread may touch them. The
//! architecture backends in `arch` supply implementations.

use abi::Rgb;

use crate::umem::ValidSlice;

/// A block of 32-bit memory-mapped registers, addressed by byte offset from
/// the start of the block.
pub trait Registers {
    fn read(&self, offset: usize) -> u32;
    fn write(&mut self, offset: usize, value: u32);
}

/// Failure reported by a device driver or by the memory bus.
///
/// The calling thread only ever sees `ResponseCode::HardwareFault`; the
/// variant is for the kernel log.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum DriverError {
    /// The device did not answer in time.
    Timeout,
    /// The bus transaction failed.
    Bus,
    /// The request named something the device does not have.
    OutOfRange,
}

/// The peripheral drivers syscalls delegate to.
///
/// Implementations run in kernel mode from inside a syscall handler, so they
/// must finish (or fail) without re-entering the scheduler.
pub trait Devices {
    /// Distance reading from the ultrasonic ranger.
    fn ultrasonic_read(&mut self) -> Result<u32, DriverError>;
    /// Ambient light reading.
    fn lux_read(&mut self) -> Result<u32, DriverError>;
    fn stepper_set_speed(&mut self, rpm: u32) -> Result<(), DriverError>;
    /// Moves the stepper by `steps`; negative values turn it backwards.
    fn stepper_move(&mut self, steps: i32) -> Result<(), DriverError>;
    /// Sets one pixel of the LED strip and latches it.
    fn neopixel_set(&mut self, index: usize, color: Rgb)
        -> Result<(), DriverError>;
    /// Loads a whole strip's worth of pixels starting at pixel zero.
    fn neopixel_load(&mut self, pixels: &[Rgb]) -> Result<(), DriverError>;
    /// Writes bytes to the debug console, returning how many were taken.
    fn console_write(&mut self, bytes: &[u8]) -> Result<usize, DriverError>;
    /// Takes up to `buf.len()` bytes of console input that has already
    /// arrived, returning how many. Must not wait for more.
    fn console_read(&mut self, buf: &mut [u8]) -> Result<usize, DriverError>;
}

/// Access to thread memory.
///
/// Both directions take a `ValidSlice`, which can only be produced by
/// checking a thread's claim against its region table, so nothing reaches
/// memory a thread could not reach itself.
pub trait UserMemory {
    /// Copies `src.len()` bytes out of thread memory into `dst`, which must be
    /// exactly that long.
    fn copy_in(&self, src: &ValidSlice, dst: &mut [u8])
        -> Result<(), DriverError>;

    /// Copies `src` into thread memory at `dst`, which must be exactly as
    /// long.
    fn copy_out(&mut self, dst: &ValidSlice, src: &[u8])
        -> Result<(), DriverError>;
}

/// A board the kernel can run on.
pub trait Platform {
    type Mpu: Registers;
    type SysTick: Registers;
    type Devices: Devices;
    type Memory: UserMemory;
}

/// The concrete hardware handed to `Kernel::new`.
pub struct Peripherals<P: Platform> {
    pub mpu: P::Mpu,
    pub systick: P::SysTick,
    pub devices: P::Devices,
    pub memory: P::Memory,
}
