// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Implementation of kernel time.
//!
//! Time is a 32-bit count of ticks that wraps. Nothing here ever compares two
//! timestamps with `<`; ordering is always derived from the signed difference
//! between them, which is correct as long as the two are less than half the
//! counter range apart.

/// In-kernel timestamp representation, in ticks.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Default)]
#[repr(transparent)]
pub struct Timestamp(u32);

impl From<u32> for Timestamp {
    fn from(v: u32) -> Self {
        Timestamp(v)
    }
}

impl From<Timestamp> for u32 {
    fn from(v: Timestamp) -> Self {
        v.0
    }
}

impl Timestamp {
    /// Longest interval that can still be ordered correctly.
    pub const MAX_SPAN: u32 = i32::MAX as u32;

    /// Signed number of ticks from `earlier` to `self`. Negative if `self` is
    /// actually the earlier of the two.
    pub fn ticks_since(self, earlier: Timestamp) -> i32 {
        self.0.wrapping_sub(earlier.0) as i32
    }

    /// Checks whether `deadline` is now or in the past, as seen from `self`.
    pub fn has_reached(self, deadline: Timestamp) -> bool {
        self.ticks_since(deadline) >= 0
    }

    /// Produces the timestamp `ticks` after this one, wrapping.
    pub fn wrapping_add(self, ticks: u32) -> Timestamp {
        Timestamp(self.0.wrapping_add(ticks))
    }
}

/// The kernel's tick counter and its scale.
#[derive(Debug)]
pub struct TickCounter {
    now: Timestamp,
    tick_hz: u32,
}

impl TickCounter {
    pub fn new(tick_hz: u32) -> Self {
        Self::starting_at(Timestamp(0), tick_hz)
    }

    /// Creates a counter that has already run for a while; handy for putting
    /// the wrap point close by.
    pub fn starting_at(now: Timestamp, tick_hz: u32) -> Self {
        Self {
            now,
            tick_hz: tick_hz.max(1),
        }
    }

    pub fn now(&self) -> Timestamp {
        self.now
    }

    pub fn tick_hz(&self) -> u32 {
        self.tick_hz
    }

    /// Restarts the count at zero with a new scale.
    pub fn restart(&mut self, tick_hz: u32) {
        *self = Self::new(tick_hz);
    }

    /// Counts one tick, returning the new time.
    pub fn advance(&mut self) -> Timestamp {
        self.now = self.now.wrapping_add(1);
        self.now
    }

    /// Converts milliseconds to ticks, rounding up so a sleep never ends
    /// early, and clamping to the longest orderable span.
    pub fn ms_to_ticks(&self, ms: u32) -> u32 {
        let ticks = (u64::from(ms) * u64::from(self.tick_hz)).div_ceil(1000);
        u32::try_from(ticks)
            .unwrap_or(u32::MAX)
            .min(Timestamp::MAX_SPAN)
    }

    /// Computes the deadline `ms` milliseconds from now.
    pub fn deadline_after_ms(&self, ms: u32) -> Timestamp {
        self.now.wrapping_add(self.ms_to_ticks(ms))
    }
}
