// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The tick source.
//!
//! The SysTick counter has a 24-bit reload register. When the core clock
//! divided by the requested tick rate doesn't fit, the interval is split into
//! `bins` equal timer periods and one kernel tick is counted every `bins`
//! interrupts.

use crate::platform::Registers;

/// Control and status.
pub const CSR: usize = 0x0;
/// Reload value.
pub const RVR: usize = 0x4;
/// Current value.
pub const CVR: usize = 0x8;

const ENABLE: u32 = 1 << 0;
const TICKINT: u32 = 1 << 1;
const CLKSOURCE: u32 = 1 << 2;

const MAX_RELOAD: u32 = 0x00FF_FFFF;

/// Reload value and prescale for one tick rate.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct TickDivisor {
    pub reload: u32,
    pub bins: u32,
}

impl TickDivisor {
    /// Works out how to get `tick_hz` out of a `core_hz` clock. Returns
    /// `None` if the rate is zero or faster than the clock.
    pub fn for_rate(core_hz: u32, tick_hz: u32) -> Option<Self> {
        if tick_hz == 0 || tick_hz > core_hz {
            return None;
        }
        let cycles = core_hz / tick_hz;
        let mut bins = 1;
        while cycles / bins > MAX_RELOAD + 1 {
            bins += 1;
        }
        Some(Self {
            reload: cycles / bins - 1,
            bins,
        })
    }
}

/// Driver for the SysTick block.
pub struct TickTimer<R> {
    regs: R,
    divisor: Option<TickDivisor>,
    bins_left: u32,
}

impl<R: Registers> TickTimer<R> {
    pub fn new(regs: R) -> Self {
        Self {
            regs,
            divisor: None,
            bins_left: 0,
        }
    }

    /// Starts (or restarts) interrupts at the given divisor.
    pub fn configure(&mut self, divisor: TickDivisor) {
        self.regs.write(CSR, 0);
        self.regs.write(RVR, divisor.reload);
        self.regs.write(CVR, 0);
        self.regs.write(CSR, ENABLE | TICKINT | CLKSOURCE);
        self.divisor = Some(divisor);
        self.bins_left = divisor.bins;
    }

    pub fn stop(&mut self) {
        self.regs.write(CSR, 0);
        self.divisor = None;
    }

    pub fn is_running(&self) -> bool {
        self.divisor.is_some()
    }

    pub fn divisor(&self) -> Option<TickDivisor> {
        self.divisor
    }

    /// Accounts for one timer interrupt. Returns `true` when it completes a
    /// kernel tick.
    pub fn on_interrupt(&mut self) -> bool {
        let Some(divisor) = self.divisor else {
            return false;
        };
        self.bins_left = self.bins_left.saturating_sub(1);
        if self.bins_left == 0 {
            self.bins_left = divisor.bins;
            true
        } else {
            false
        }
    }

    pub fn registers(&self) -> &R {
        &self.regs
    }
}
