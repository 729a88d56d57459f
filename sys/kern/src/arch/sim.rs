// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Simulated machine for host builds.
//!
//! No thread code actually runs here. A test plays the part of the running
//! thread by loading syscall arguments into its saved state and feeding
//! `Event::Syscall` to the kernel, then reads the results back out of the
//! return registers. Register blocks record every write so tests can check
//! the exact programming sequence, memory is a plain byte buffer, and the
//! devices are scripted.

use std::cell::Cell;
use std::collections::{BTreeMap, VecDeque};

use abi::Rgb;

use crate::platform::{DriverError, Devices, Platform, Registers, UserMemory};
use crate::thread::{ArchState, ThreadStart};
use crate::umem::ValidSlice;

/// Size of the initial frame a thread's stack is charged for.
pub const INITIAL_FRAME_SIZE: usize = 32;

/// Register file of a simulated thread.
#[derive(Debug, Default, Clone)]
pub struct SavedState {
    args: [u32; 6],
    nr: u32,
    rets: [u32; 2],
    sp: u32,
    entry: u32,
    argument: u32,
    exit: u32,
}

impl SavedState {
    /// Loads a syscall into the argument registers, as the trap stub would.
    pub fn load_syscall(&mut self, nr: u32, args: &[u32]) {
        self.nr = nr;
        self.args = [0; 6];
        self.args[..args.len()].copy_from_slice(args);
    }

    pub fn rets(&self) -> [u32; 2] {
        self.rets
    }

    /// Entry point the thread would begin at.
    pub fn entry(&self) -> u32 {
        self.entry
    }

    pub fn argument(&self) -> u32 {
        self.argument
    }

    pub fn exit(&self) -> u32 {
        self.exit
    }
}

impl ArchState for SavedState {
    fn stack_pointer(&self) -> u32 {
        self.sp
    }

    fn arg0(&self) -> u32 {
        self.args[0]
    }
    fn arg1(&self) -> u32 {
        self.args[1]
    }
    fn arg2(&self) -> u32 {
        self.args[2]
    }
    fn arg3(&self) -> u32 {
        self.args[3]
    }
    fn arg4(&self) -> u32 {
        self.args[4]
    }
    fn arg5(&self) -> u32 {
        self.args[5]
    }

    fn syscall_descriptor(&self) -> u32 {
        self.nr
    }

    fn ret0(&mut self, x: u32) {
        self.rets[0] = x
    }
    fn ret1(&mut self, x: u32) {
        self.rets[1] = x
    }
}

/// Records where a thread would start, and lays its first frame out in
/// simulated memory the way the hardware would unstack it: `r0` through
/// `r3`, `r12`, `lr`, `pc`, `xpsr`.
pub fn reinitialize(
    save: &mut SavedState,
    start: &ThreadStart,
    frame: ValidSlice,
    memory: &mut impl UserMemory,
) -> Result<(), DriverError> {
    let mut words = [0u32; INITIAL_FRAME_SIZE / 4];
    words[0] = start.argument;
    words[5] = start.exit;
    words[6] = start.entry;
    let mut bytes = [0u8; INITIAL_FRAME_SIZE];
    for (chunk, word) in bytes.chunks_exact_mut(4).zip(words) {
        chunk.copy_from_slice(&word.to_le_bytes());
    }
    memory.copy_out(&frame, &bytes)?;

    *save = SavedState {
        sp: frame.base_addr() as u32,
        entry: start.entry,
        argument: start.argument,
        exit: start.exit,
        ..SavedState::default()
    };
    Ok(())
}

/// A register block that remembers its contents and every write.
#[derive(Debug, Default)]
pub struct SimRegisters {
    values: BTreeMap<usize, u32>,
    writes: Vec<(usize, u32)>,
}

impl SimRegisters {
    pub fn writes(&self) -> &[(usize, u32)] {
        &self.writes
    }
}

impl Registers for SimRegisters {
    fn read(&self, offset: usize) -> u32 {
        self.values.get(&offset).copied().unwrap_or(0)
    }

    fn write(&mut self, offset: usize, value: u32) {
        self.values.insert(offset, value);
        self.writes.push((offset, value));
    }
}

/// RAM starting at `base`, with a count of every access.
#[derive(Debug)]
pub struct SimMemory {
    base: usize,
    bytes: Vec<u8>,
    reads: Cell<usize>,
    writes: usize,
}

impl SimMemory {
    pub fn new(base: usize, len: usize) -> Self {
        Self {
            base,
            bytes: vec![0; len],
            reads: Cell::new(0),
            writes: 0,
        }
    }

    /// Test-side store, bypassing the kernel.
    pub fn poke(&mut self, addr: usize, data: &[u8]) {
        let start = addr - self.base;
        self.bytes[start..start + data.len()].copy_from_slice(data);
    }

    /// Test-side load, bypassing the kernel.
    pub fn peek(&self, addr: usize, len: usize) -> &[u8] {
        let start = addr - self.base;
        &self.bytes[start..start + len]
    }

    pub fn reads(&self) -> usize {
        self.reads.get()
    }

    pub fn writes(&self) -> usize {
        self.writes
    }

    fn range(
        &self,
        s: &ValidSlice,
    ) -> Result<std::ops::Range<usize>, DriverError> {
        let start = s
            .base_addr()
            .checked_sub(self.base)
            .ok_or(DriverError::Bus)?;
        let end = start.checked_add(s.len()).ok_or(DriverError::Bus)?;
        if end > self.bytes.len() {
            return Err(DriverError::Bus);
        }
        Ok(start..end)
    }
}

impl UserMemory for SimMemory {
    fn copy_in(
        &self,
        src: &ValidSlice,
        dst: &mut [u8],
    ) -> Result<(), DriverError> {
        let r = self.range(src)?;
        if r.len() != dst.len() {
            return Err(DriverError::OutOfRange);
        }
        self.reads.set(self.reads.get() + 1);
        dst.copy_from_slice(&self.bytes[r]);
        Ok(())
    }

    fn copy_out(
        &mut self,
        dst: &ValidSlice,
        src: &[u8],
    ) -> Result<(), DriverError> {
        let r = self.range(dst)?;
        if r.len() != src.len() {
            return Err(DriverError::OutOfRange);
        }
        self.writes += 1;
        self.bytes[r].copy_from_slice(src);
        Ok(())
    }
}

/// Device stand-ins. Readings are served from queues (repeating the last
/// one when a queue runs dry); actuator calls are logged.
#[derive(Debug, Default)]
pub struct SimDevices {
    pub ultrasonic: VecDeque<u32>,
    pub lux: VecDeque<u32>,
    /// When set, every call fails with this.
    pub fail_with: Option<DriverError>,
    /// Console accepts at most this many bytes per call, if set.
    pub console_limit: Option<usize>,
    pub console: Vec<u8>,
    /// Console input waiting to be read.
    pub console_input: VecDeque<u8>,
    pub stepper_speed: Option<u32>,
    pub stepper_moves: Vec<i32>,
    pub pixels: Vec<Rgb>,
}

impl SimDevices {
    fn check(&self) -> Result<(), DriverError> {
        match self.fail_with {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn next(queue: &mut VecDeque<u32>) -> Result<u32, DriverError> {
        match queue.len() {
            0 => Err(DriverError::Timeout),
            1 => Ok(queue[0]),
            _ => queue.pop_front().ok_or(DriverError::Timeout),
        }
    }
}

impl Devices for SimDevices {
    fn ultrasonic_read(&mut self) -> Result<u32, DriverError> {
        self.check()?;
        Self::next(&mut self.ultrasonic)
    }

    fn lux_read(&mut self) -> Result<u32, DriverError> {
        self.check()?;
        Self::next(&mut self.lux)
    }

    fn stepper_set_speed(&mut self, rpm: u32) -> Result<(), DriverError> {
        self.check()?;
        self.stepper_speed = Some(rpm);
        Ok(())
    }

    fn stepper_move(&mut self, steps: i32) -> Result<(), DriverError> {
        self.check()?;
        self.stepper_moves.push(steps);
        Ok(())
    }

    fn neopixel_set(
        &mut self,
        index: usize,
        color: Rgb,
    ) -> Result<(), DriverError> {
        self.check()?;
        if self.pixels.len() <= index {
            self.pixels.resize(index + 1, Rgb::default());
        }
        self.pixels[index] = color;
        Ok(())
    }

    fn neopixel_load(&mut self, pixels: &[Rgb]) -> Result<(), DriverError> {
        self.check()?;
        self.pixels.clear();
        self.pixels.extend_from_slice(pixels);
        Ok(())
    }

    fn console_write(&mut self, bytes: &[u8]) -> Result<usize, DriverError> {
        self.check()?;
        let n = self.console_limit.map_or(bytes.len(), |l| l.min(bytes.len()));
        self.console.extend_from_slice(&bytes[..n]);
        Ok(n)
    }

    fn console_read(&mut self, buf: &mut [u8]) -> Result<usize, DriverError> {
        self.check()?;
        let n = buf.len().min(self.console_input.len());
        for (dst, src) in buf.iter_mut().zip(self.console_input.drain(..n)) {
            *dst = src;
        }
        Ok(n)
    }
}

/// The simulated board.
#[derive(Debug)]
pub enum Sim {}

impl Platform for Sim {
    type Mpu = SimRegisters;
    type SysTick = SimRegisters;
    type Devices = SimDevices;
    type Memory = SimMemory;
}
