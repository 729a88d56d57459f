// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Architecture-independent syscall implementation.
//!
//! This builds on architecture-specific parts defined in the `arch` module.
//!
//! # Syscall implementations
//!
//! Syscalls are implemented by methods with the signature:
//!
//! ```ignore
//! fn syscall(&mut self, caller: usize) -> Result<NextThread, UserError>;
//! ```
//!
//! `caller` is the slot of the thread that trapped. Arguments are read from
//! its saved registers through the `ArchState` proxies, and a successful
//! handler writes its own results back the same way.
//!
//! The `NextThread` value tells the scheduler whether the caller can simply
//! resume. Recoverable errors are turned into a status code in the caller's
//! registers here, in one place.
//!
//! # Pointers
//!
//! A buffer argument is checked against the caller's region table before
//! the kernel reads a byte of it, and is then copied through
//! `UserMemory` rather than dereferenced.

use abi::{RegionAttributes, ResponseCode, Rgb, Sysnum};
use zerocopy::FromBytes;

use crate::err::{Fatal, UserError};
use crate::kernel::{Kernel, Phase};
use crate::lock::Acquire;
use crate::platform::{Devices, DriverError, Platform, UserMemory};
use crate::startup::{MAIN, MAX_LOCKS, MAX_PIXELS, MAX_THREADS};
use crate::thread::{ArchState, NextThread};
use crate::trace::Trace;

/// Console traffic is copied through a buffer this big.
const CONSOLE_CHUNK: usize = 64;

impl<P: Platform> Kernel<P> {
    /// Runs the syscall `caller` trapped with.
    ///
    /// Only an `Unrecoverable` error escapes; anything else has been
    /// written into the caller's registers by the time this returns.
    pub(crate) fn syscall(
        &mut self,
        caller: usize,
    ) -> Result<NextThread, Fatal> {
        let nr = self.threads[caller].save().syscall_descriptor();
        ktrace!(
            self.trace,
            Trace::Syscall {
                thread: caller as u8,
                nr
            }
        );

        let result = match Sysnum::try_from(nr) {
            Ok(sysnum) => self.dispatch(caller, sysnum),
            Err(()) => Err(ResponseCode::InvalidSyscall.into()),
        };
        match result {
            Ok(hint) => Ok(hint),
            Err(UserError::Recoverable(code, hint)) => {
                ktrace!(
                    self.trace,
                    Trace::Error {
                        thread: caller as u8,
                        code: code.into()
                    }
                );
                self.threads[caller].save_mut().set_error_response(code);
                Ok(hint)
            }
            Err(UserError::Unrecoverable(fatal)) => Err(fatal),
        }
    }

    fn dispatch(
        &mut self,
        caller: usize,
        sysnum: Sysnum,
    ) -> Result<NextThread, UserError> {
        match sysnum {
            Sysnum::Sbrk => self.sbrk(caller),
            Sysnum::Write => self.write(caller),
            Sysnum::Read => self.read(caller),
            Sysnum::Exit => {
                let status = self.threads[caller].save().arg0() as i32;
                Err(Fatal::Exited {
                    thread: caller,
                    status,
                }
                .into())
            }
            Sysnum::SleepMs => self.sleep_ms(caller),
            Sysnum::LuxRead => self.read_sensor(caller, P::Devices::lux_read),
            Sysnum::UltrasonicRead => {
                self.read_sensor(caller, P::Devices::ultrasonic_read)
            }
            Sysnum::NeopixelSet => self.neopixel_set(caller),
            Sysnum::NeopixelLoad => self.neopixel_load(caller),
            Sysnum::MultitaskRequest => self.multitask_request(caller),
            Sysnum::ThreadDefine => self.thread_define(caller),
            Sysnum::MultitaskStart => self.multitask_start(caller),
            Sysnum::ThreadId => {
                let id = self.threads[caller].id(caller);
                self.reply(caller, u32::from(id.0))
            }
            Sysnum::ThreadYield => self.thread_yield(caller),
            Sysnum::ThreadEnd => self.end_thread(caller),
            Sysnum::GetTime => {
                let now = u32::from(self.clock.now());
                self.reply(caller, now)
            }
            Sysnum::ThreadTime => {
                let ticks = self.threads[caller].run_ticks();
                self.reply(caller, ticks)
            }
            Sysnum::ThreadPriority => {
                let p = self.threads[caller].priority();
                self.reply(caller, u32::from(p.0))
            }
            Sysnum::LockInit => self.lock_init(caller),
            Sysnum::Lock => self.lock(caller),
            Sysnum::Unlock => self.unlock(caller),
            Sysnum::StepperSetSpeed => {
                let rpm = self.threads[caller].save().arg0();
                self.devices.stepper_set_speed(rpm).map_err(driver_fault)?;
                self.reply(caller, 0)
            }
            Sysnum::StepperMove => {
                let steps = self.threads[caller].save().arg0() as i32;
                self.devices.stepper_move(steps).map_err(driver_fault)?;
                self.reply(caller, 0)
            }
        }
    }

    /// Completes a call that leaves the caller running.
    fn reply(
        &mut self,
        caller: usize,
        value: u32,
    ) -> Result<NextThread, UserError> {
        self.threads[caller].save_mut().set_ok(value);
        Ok(NextThread::Same)
    }

    fn write(&mut self, caller: usize) -> Result<NextThread, UserError> {
        let t = &self.threads[caller];
        let buf = t
            .save()
            .as_buffer_args()?
            .validate(t.region_table(), RegionAttributes::READ)?;

        let mut chunk = [0u8; CONSOLE_CHUNK];
        let mut written = 0;
        while written < buf.len() {
            let n = (buf.len() - written).min(CONSOLE_CHUNK);
            let window = buf
                .window(written, n)
                .ok_or(Fatal::Inconsistent("write window"))?;
            self.memory
                .copy_in(&window, &mut chunk[..n])
                .map_err(driver_fault)?;
            let accepted = self
                .devices
                .console_write(&chunk[..n])
                .map_err(driver_fault)?;
            written += accepted.min(n);
            if accepted < n {
                break;
            }
        }
        self.reply(caller, written as u32)
    }

    /// Copies in whatever console input has already arrived, up to the
    /// buffer's length. Never waits.
    fn read(&mut self, caller: usize) -> Result<NextThread, UserError> {
        let t = &self.threads[caller];
        let buf = t
            .save()
            .as_buffer_args()?
            .validate(t.region_table(), RegionAttributes::WRITE)?;

        let mut chunk = [0u8; CONSOLE_CHUNK];
        let mut read = 0;
        while read < buf.len() {
            let want = (buf.len() - read).min(CONSOLE_CHUNK);
            let got = self
                .devices
                .console_read(&mut chunk[..want])
                .map_err(driver_fault)?
                .min(want);
            if got == 0 {
                break;
            }
            let window = buf
                .window(read, got)
                .ok_or(Fatal::Inconsistent("read window"))?;
            self.memory
                .copy_out(&window, &chunk[..got])
                .map_err(driver_fault)?;
            read += got;
            if got < want {
                break;
            }
        }
        self.reply(caller, read as u32)
    }

    /// Moves main's heap break up by the requested number of bytes and
    /// returns where it was.
    fn sbrk(&mut self, caller: usize) -> Result<NextThread, UserError> {
        // The heap is in main's private memory.
        if caller != MAIN {
            return Err(ResponseCode::NotPermitted.into());
        }
        let incr = self.threads[caller].save().arg0() as i32;
        // The heap only grows.
        let incr =
            u32::try_from(incr).map_err(|_| ResponseCode::InvalidArgument)?;
        let new = self
            .heap_break
            .checked_add(incr)
            .filter(|&b| b <= self.heap_limit)
            .ok_or(ResponseCode::OutOfMemory)?;
        let old = core::mem::replace(&mut self.heap_break, new);
        self.reply(caller, old)
    }

    fn sleep_ms(&mut self, caller: usize) -> Result<NextThread, UserError> {
        let ms = self.threads[caller].save().arg0();
        self.threads[caller].save_mut().set_ok(0);
        Ok(self.sleep(caller, ms))
    }

    fn read_sensor(
        &mut self,
        caller: usize,
        read: fn(&mut P::Devices) -> Result<u32, DriverError>,
    ) -> Result<NextThread, UserError> {
        let value = read(&mut self.devices).map_err(driver_fault)?;
        self.reply(caller, value)
    }

    fn neopixel_set(&mut self, caller: usize) -> Result<NextThread, UserError> {
        let save = self.threads[caller].save();
        let index = save.arg0() as usize;
        let color = Rgb::from_packed(save.arg1());
        if index >= MAX_PIXELS {
            return Err(ResponseCode::InvalidArgument.into());
        }
        self.devices
            .neopixel_set(index, color)
            .map_err(driver_fault)?;
        self.reply(caller, 0)
    }

    fn neopixel_load(
        &mut self,
        caller: usize,
    ) -> Result<NextThread, UserError> {
        let t = &self.threads[caller];
        let slice = t.save().as_buffer_args()?;
        if slice.len() % 3 != 0 || slice.len() > MAX_PIXELS * 3 {
            return Err(ResponseCode::InvalidArgument.into());
        }
        let buf = slice.validate(t.region_table(), RegionAttributes::READ)?;

        let mut bytes = [0u8; MAX_PIXELS * 3];
        let bytes = &mut bytes[..buf.len()];
        self.memory.copy_in(&buf, bytes).map_err(driver_fault)?;
        let pixels = <[Rgb]>::ref_from_bytes(bytes)
            .map_err(|_| Fatal::Inconsistent("pixel layout"))?;
        self.devices.neopixel_load(pixels).map_err(driver_fault)?;
        self.reply(caller, 0)
    }

    fn multitask_request(
        &mut self,
        caller: usize,
    ) -> Result<NextThread, UserError> {
        if caller != MAIN {
            return Err(ResponseCode::NotPermitted.into());
        }
        if self.phase != Phase::Boot {
            return Err(ResponseCode::AlreadyRequested.into());
        }
        let args = self.threads[caller].save().as_request_args();
        if args.threads == 0
            || args.threads > MAX_THREADS
            || args.locks > MAX_LOCKS
        {
            return Err(ResponseCode::InvalidArgument.into());
        }
        self.phase = Phase::Requested {
            threads: args.threads,
        };
        self.locks.reserve(args.locks);
        self.reply(caller, 0)
    }

    fn thread_define(
        &mut self,
        caller: usize,
    ) -> Result<NextThread, UserError> {
        let args = self.threads[caller].save().as_define_args();
        let id = self.define_thread(args)?;
        self.threads[caller].save_mut().set_ok(u32::from(id.0));
        Ok(self.outranks(id.index(), caller))
    }

    fn multitask_start(
        &mut self,
        caller: usize,
    ) -> Result<NextThread, UserError> {
        let tick_hz = self.threads[caller].save().arg0();
        let hint = self.start_multitasking(caller, tick_hz)?;
        // Seen by main when the last thread ends.
        self.threads[caller].save_mut().set_ok(0);
        Ok(hint)
    }

    fn thread_yield(&mut self, caller: usize) -> Result<NextThread, UserError> {
        if self.locks.holds_any(caller) {
            klog!("kernel: thread {} yielded holding a lock", caller);
        }
        self.threads[caller].save_mut().set_ok(0);
        Ok(self.request_switch(caller))
    }

    fn lock_init(&mut self, caller: usize) -> Result<NextThread, UserError> {
        if self.phase == Phase::Boot {
            return Err(ResponseCode::NotRequested.into());
        }
        let id = self.locks.init()?;
        self.reply(caller, id.0)
    }

    fn lock(&mut self, caller: usize) -> Result<NextThread, UserError> {
        let id = self.threads[caller].save().as_lock_args();
        match self.locks.lock(&mut self.threads, caller, id)? {
            Acquire::Taken => self.reply(caller, 0),
            // The reply is written when the lock is handed over.
            Acquire::Queued => Ok(NextThread::Other),
        }
    }

    fn unlock(&mut self, caller: usize) -> Result<NextThread, UserError> {
        let id = self.threads[caller].save().as_lock_args();
        let next = self.locks.unlock(&mut self.threads, caller, id)?;
        self.threads[caller].save_mut().set_ok(0);
        match next {
            Some(w) => {
                ktrace!(
                    self.trace,
                    Trace::Handoff {
                        lock: id.0,
                        to: w as u8
                    }
                );
                self.make_ready(w);
                Ok(self.outranks(w, caller))
            }
            None => Ok(NextThread::Same),
        }
    }
}

/// Logs a driver failure and reports it to the caller as a hardware fault.
fn driver_fault(e: DriverError) -> UserError {
    klog!("kernel: driver error: {:?}", e);
    ResponseCode::HardwareFault.into()
}
