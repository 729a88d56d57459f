// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! A small real-time kernel for a single-core microcontroller.
//!
//! The kernel multiplexes one CPU across a boot thread ("main") and the
//! threads it defines, isolates them from each other and from the kernel
//! with the MPU, and offers locks, time and device access through a trap
//! based syscall interface.
//!
//! # Design principles
//!
//! 1. One owned kernel context. All state lives in `Kernel`, which the
//!    architecture layer drives with explicit events; tests build as many
//!    kernels as they like on the simulated platform.
//! 2. Static configuration. Table sizes and clock rates are fixed at build
//!    time (see `build.rs`), so nothing in the kernel allocates.
//! 3. Hardware behind narrow traits. The MPU and tick timer are programmed
//!    through a read/write-at-offset interface, and drivers and thread
//!    memory are reached through `Platform`.
//! 4. A preference for simple and clear algorithms over fast and clever
//!    ones. Thread tables are tiny; linear scans are fine.

#![cfg_attr(target_os = "none", no_std)]

/// Kernel text log.
///
/// Goes to stderr on host builds. On hardware it goes out over semihosting
/// if the `klog-semihosting` feature is on, and nowhere otherwise.
#[macro_export]
macro_rules! klog {
    ($($arg:tt)*) => {
        $crate::klog_impl!($($arg)*)
    };
}

#[cfg(not(target_os = "none"))]
#[doc(hidden)]
#[macro_export]
macro_rules! klog_impl {
    ($($arg:tt)*) => {
        std::eprintln!($($arg)*)
    };
}

#[cfg(all(target_os = "none", feature = "klog-semihosting"))]
#[doc(hidden)]
#[macro_export]
macro_rules! klog_impl {
    ($($arg:tt)*) => {
        let _ = cortex_m_semihosting::hprintln!($($arg)*);
    };
}

#[cfg(all(target_os = "none", not(feature = "klog-semihosting")))]
#[doc(hidden)]
#[macro_export]
macro_rules! klog_impl {
    ($($arg:tt)*) => {
        let _ = format_args!($($arg)*);
    };
}

#[macro_use]
pub mod trace;

pub mod arch;
pub mod descs;
pub mod err;
pub mod fail;
pub mod kernel;
pub mod lock;
pub mod mpu;
pub mod platform;
pub mod sched;
pub mod startup;
pub mod syscalls;
pub mod thread;
pub mod time;
pub mod timer;
pub mod umem;

pub use kernel::{Dispatch, Event, Kernel, Phase};
pub use platform::{Peripherals, Platform};
pub use startup::BootInfo;
