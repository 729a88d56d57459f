// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! User application support library.
//!
//! This contains syscall stubs and types, and re-exports the contents of the
//! `abi` crate that gets shared with the kernel.
//!
//! # Syscall stub implementations
//!
//! Every syscall goes through one stub, [`trap`], which loads up to seven
//! argument words into `r4` through `r10`, the syscall number into `r11`,
//! and executes `svc`. The kernel replies in `r4` (status) and `r5` (value),
//! with `r6` through `r9` reserved. `r4` through `r11` are callee-save in the
//! ARM calling convention, so the stub stacks them around the trap.
//!
//! The wrappers below are ordinary functions over [`RawSyscall`]; only the
//! stub knows about registers. On the host, the stub instead hands the
//! descriptor to a handler installed with [`set_trap_handler`], which is how
//! thread code gets tested without a board.

#![cfg_attr(target_os = "none", no_std)]

pub use abi::*;

use num_traits::FromPrimitive;
use zerocopy::IntoBytes;

#[macro_use]
pub mod macros;

/// One syscall, as the kernel sees it in registers.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
#[repr(C)]
pub struct RawSyscall {
    pub args: [u32; 7],
    pub nr: u32,
    pub rets: [u32; 6],
}

impl RawSyscall {
    pub fn new(nr: Sysnum, args: &[u32]) -> Self {
        let mut raw = Self {
            nr: nr as u32,
            ..Self::default()
        };
        raw.args[..args.len()].copy_from_slice(args);
        raw
    }

    /// Decodes the reply: the value register on success, the response code
    /// otherwise.
    pub fn result(&self) -> Result<u32, ResponseCode> {
        match self.rets[0] {
            0 => Ok(self.rets[1]),
            // A code this library doesn't know is a kernel it doesn't match.
            code => Err(ResponseCode::from_u32(code)
                .unwrap_or(ResponseCode::InvalidSyscall)),
        }
    }
}

fn syscall(nr: Sysnum, args: &[u32]) -> Result<u32, ResponseCode> {
    let mut raw = RawSyscall::new(nr, args);
    // Safety: `raw` is a live, exclusively borrowed descriptor for the
    // duration of the trap.
    unsafe { trap(&mut raw) };
    raw.result()
}

cfg_if::cfg_if! {
    if #[cfg(armv7m)] {
        /// Traps into the kernel with the syscall described by `raw`, and
        /// writes the reply registers back into it.
        ///
        /// # Safety
        ///
        /// Any buffers named in `raw.args` must be valid for whatever the
        /// kernel does with them.
        #[unsafe(naked)]
        pub unsafe extern "C" fn trap(raw: &mut RawSyscall) {
            core::arch::naked_asm!("
                @ Spill the callee-save registers we're about to clobber.
                push {{r4-r11}}
                @ Arguments and syscall number, straight out of the struct.
                ldm r0, {{r4-r11}}
                svc #0
                @ r0 survives the trap; skip to the rets.
                adds r0, #32
                stm r0, {{r4-r9}}
                pop {{r4-r11}}
                bx lr
            ")
        }
    } else if #[cfg(target_os = "none")] {
        compile_error!("userlib only knows how to trap on ARMv7-M");
    } else {
        use std::cell::RefCell;

        type Handler = Box<dyn FnMut(&mut RawSyscall)>;

        std::thread_local! {
            static HANDLER: RefCell<Option<Handler>> = RefCell::new(None);
        }

        /// Routes this host thread's syscalls to `handler`. Without one,
        /// every call fails with `InvalidSyscall`.
        pub fn set_trap_handler(
            handler: impl FnMut(&mut RawSyscall) + 'static,
        ) {
            HANDLER.with(|h| *h.borrow_mut() = Some(Box::new(handler)));
        }

        /// Host stand-in for the `svc` stub.
        ///
        /// # Safety
        ///
        /// Always safe on the host; `unsafe` to match the target signature.
        pub unsafe fn trap(raw: &mut RawSyscall) {
            HANDLER.with(|h| match h.borrow_mut().as_mut() {
                Some(handler) => handler(raw),
                None => {
                    raw.rets[0] = ResponseCode::InvalidSyscall.into();
                    raw.rets[1] = 0;
                }
            });
        }
    }
}

/// Writes `bytes` to the console. Returns how many were accepted, which is
/// fewer than asked only if the console stopped taking them.
pub fn sys_write(bytes: &[u8]) -> Result<usize, ResponseCode> {
    let n = syscall(
        Sysnum::Write,
        &[bytes.as_ptr() as usize as u32, bytes.len() as u32],
    )?;
    Ok(n as usize)
}

/// Reads whatever console input has already arrived, up to `buf.len()`
/// bytes. Returns at once, with zero if there was none.
pub fn sys_read(buf: &mut [u8]) -> Result<usize, ResponseCode> {
    let n = syscall(
        Sysnum::Read,
        &[buf.as_mut_ptr() as usize as u32, buf.len() as u32],
    )?;
    Ok(n as usize)
}

/// Grows main's heap by `incr` bytes and returns the old break, which is
/// the start of the new space. Main only.
pub fn sys_sbrk(incr: i32) -> Result<u32, ResponseCode> {
    syscall(Sysnum::Sbrk, &[incr as u32])
}

/// Stops the whole system, leaving `status` in the kernel's record.
pub fn sys_exit(status: i32) -> ! {
    loop {
        let _ = syscall(Sysnum::Exit, &[status as u32]);
    }
}

/// Sleeps for at least `ms` milliseconds. Zero just yields.
pub fn sys_sleep_ms(ms: u32) -> Result<(), ResponseCode> {
    syscall(Sysnum::SleepMs, &[ms]).map(drop)
}

pub fn sys_lux_read() -> Result<u32, ResponseCode> {
    syscall(Sysnum::LuxRead, &[])
}

/// Distance to the nearest echo, in millimeters.
pub fn sys_ultrasonic_read() -> Result<u32, ResponseCode> {
    syscall(Sysnum::UltrasonicRead, &[])
}

pub fn sys_neopixel_set(index: u32, color: Rgb) -> Result<(), ResponseCode> {
    syscall(Sysnum::NeopixelSet, &[index, color.packed()]).map(drop)
}

/// Replaces the strip contents with `pixels`, starting from the first.
pub fn sys_neopixel_load(pixels: &[Rgb]) -> Result<(), ResponseCode> {
    let bytes = pixels.as_bytes();
    syscall(
        Sysnum::NeopixelLoad,
        &[bytes.as_ptr() as usize as u32, bytes.len() as u32],
    )
    .map(drop)
}

pub fn sys_stepper_set_speed(rpm: u32) -> Result<(), ResponseCode> {
    syscall(Sysnum::StepperSetSpeed, &[rpm]).map(drop)
}

/// Moves the stepper by `steps`, backwards if negative.
pub fn sys_stepper_move(steps: i32) -> Result<(), ResponseCode> {
    syscall(Sysnum::StepperMove, &[steps as u32]).map(drop)
}

/// Reserves `threads` thread slots and `locks` locks. Main only, once per
/// batch.
pub fn sys_multitask_request(
    threads: u32,
    locks: u32,
) -> Result<(), ResponseCode> {
    syscall(Sysnum::MultitaskRequest, &[threads, locks]).map(drop)
}

/// Defines a thread that starts at `entry(argument)` on the given stack.
/// Returning from `entry` ends the thread.
pub fn sys_thread_define(
    entry: extern "C" fn(u32),
    stack_base: u32,
    stack_size: u32,
    priority: Priority,
    argument: u32,
) -> Result<ThreadId, ResponseCode> {
    let exit: extern "C" fn() -> ! = thread_exit;
    let id = syscall(
        Sysnum::ThreadDefine,
        &[
            entry as usize as u32,
            stack_base,
            stack_size,
            u32::from(priority.0),
            argument,
            exit as usize as u32,
        ],
    )?;
    Ok(ThreadId(id as u16))
}

/// Starts the defined threads. Main doesn't return from this until every one
/// of them has ended. A `tick_hz` of zero turns off preemption.
pub fn sys_multitask_start(tick_hz: u32) -> Result<(), ResponseCode> {
    syscall(Sysnum::MultitaskStart, &[tick_hz]).map(drop)
}

pub fn sys_thread_id() -> ThreadId {
    // Can't fail.
    ThreadId(syscall(Sysnum::ThreadId, &[]).unwrap_or(0) as u16)
}

pub fn sys_thread_yield() {
    let _ = syscall(Sysnum::ThreadYield, &[]);
}

/// Ends the calling thread. Only returns if the kernel refused, which it
/// does for main.
pub fn sys_thread_end() -> ResponseCode {
    match syscall(Sysnum::ThreadEnd, &[]) {
        Err(rc) => rc,
        // Only a broken kernel lets us get here.
        Ok(_) => ResponseCode::InvalidSyscall,
    }
}

extern "C" fn thread_exit() -> ! {
    loop {
        sys_thread_end();
    }
}

/// Ticks since boot, wrapping.
pub fn sys_get_time() -> u32 {
    syscall(Sysnum::GetTime, &[]).unwrap_or(0)
}

/// Ticks the caller has spent on the CPU.
pub fn sys_thread_time() -> u32 {
    syscall(Sysnum::ThreadTime, &[]).unwrap_or(0)
}

/// The caller's effective priority, including anything it has inherited.
pub fn sys_thread_priority() -> Priority {
    Priority(syscall(Sysnum::ThreadPriority, &[]).unwrap_or(0) as u8)
}

pub fn sys_lock_init() -> Result<LockId, ResponseCode> {
    syscall(Sysnum::LockInit, &[]).map(LockId)
}

/// Blocks until the caller owns `lock`.
pub fn sys_lock(lock: LockId) -> Result<(), ResponseCode> {
    syscall(Sysnum::Lock, &[lock.0]).map(drop)
}

pub fn sys_unlock(lock: LockId) -> Result<(), ResponseCode> {
    syscall(Sysnum::Unlock, &[lock.0]).map(drop)
}
