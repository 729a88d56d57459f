// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Kernel startup: build-time limits and the boot description an application
//! hands to `Kernel::new`.

use core::ops::Range;

use abi::{RegionAttributes, ThreadId, MPU_REGION_COUNT};
use arrayvec::ArrayVec;

use crate::descs::RegionDesc;
use crate::err::Fatal;
use crate::umem::USlice;

include!(concat!(env!("OUT_DIR"), "/kconfig.rs"));

/// Slots in the thread table: the boot thread plus `MAX_THREADS`.
pub const THREAD_SLOTS: usize = MAX_THREADS + 1;

/// Slot of the boot thread.
pub const MAIN: usize = 0;

// Thread slots have to be nameable by a ThreadId, and by a u8 in lock wait
// sets.
static_assertions::const_assert!(THREAD_SLOTS <= 1 << ThreadId::INDEX_BITS);
static_assertions::const_assert!(THREAD_SLOTS <= u8::MAX as usize + 1);
// A user thread's table is the shared regions plus its stack.
static_assertions::const_assert!(MPU_REGION_COUNT >= 2);

pub type RegionTable = ArrayVec<RegionDesc, MPU_REGION_COUNT>;

/// What the kernel needs to know about the application at boot.
///
/// The boot thread ("main") starts at `entry` on `stack`. Besides its stack,
/// it owns `private` (typically the application's data, bss and heap), and
/// like every thread it sees `shared` (typically code and constants).
///
/// Thread stacks come out of `stacks`, which the kernel keeps for itself:
/// no thread can reach it except through the stack it was given. `heap` is
/// the span of main's private memory that `sbrk` hands out, bottom up.
#[derive(Clone, Debug)]
pub struct BootInfo {
    pub entry: u32,
    pub stack: RegionDesc,
    pub private: RegionTable,
    pub shared: RegionTable,
    pub stacks: RegionDesc,
    pub heap: Range<u32>,
}

impl BootInfo {
    /// Builds and checks the boot thread's region table, and checks that the
    /// stack arena and heap sit where they should relative to it.
    pub fn main_regions(&self) -> Result<RegionTable, Fatal> {
        let own = self
            .private
            .iter()
            .copied()
            .chain(core::iter::once(self.stack));
        let table = build_table(&self.shared, own)
            .ok_or(Fatal::Inconsistent("boot region table"))?;

        if !self.stacks.is_mpu_shaped()
            || table.iter().any(|r| kerncore::overlaps(r, &self.stacks))
        {
            return Err(Fatal::Inconsistent("thread stack arena"));
        }

        let heap_len = self
            .heap
            .end
            .checked_sub(self.heap.start)
            .ok_or(Fatal::Inconsistent("heap bounds"))?;
        USlice::<u8>::from_raw(self.heap.start as usize, heap_len as usize)
            .and_then(|h| {
                h.validate(
                    &table,
                    RegionAttributes::READ | RegionAttributes::WRITE,
                )
            })
            .map_err(|_| Fatal::Inconsistent("heap bounds"))?;
        Ok(table)
    }
}

/// Merges `shared` and `own` into one table sorted by base address.
///
/// Returns `None` if the result would not fit the MPU, if any region can't
/// be loaded into an MPU slot, or if any two regions overlap.
pub fn build_table(
    shared: &[RegionDesc],
    own: impl IntoIterator<Item = RegionDesc>,
) -> Option<RegionTable> {
    let mut table = RegionTable::new();
    for region in shared.iter().copied().chain(own) {
        if !region.is_mpu_shaped() {
            return None;
        }
        table.try_push(region).ok()?;
    }
    table.sort_unstable_by_key(|r| r.base);
    for pair in table.windows(2) {
        if kerncore::overlaps(&pair[0], &pair[1]) {
            return None;
        }
    }
    Some(table)
}

#[cfg(test)]
mod tests {
    use super::*;
    use abi::RegionAttributes;

    fn flash() -> RegionDesc {
        RegionDesc::new(
            0x0800_0000,
            0x4_0000,
            RegionAttributes::READ | RegionAttributes::EXECUTE,
        )
    }

    #[test]
    fn table_is_sorted() {
        let stack = RegionDesc::stack(0x2000_0400, 0x400).unwrap();
        let table = build_table(&[flash()], [stack]).unwrap();
        assert_eq!(table.as_slice(), &[flash(), stack]);
    }

    #[test]
    fn overlap_and_overflow_are_refused() {
        let stack = RegionDesc::stack(0x0800_0000, 0x400).unwrap();
        assert!(build_table(&[flash()], [stack]).is_none());

        let many = (0..MPU_REGION_COUNT as u32).map(|i| {
            RegionDesc::stack(0x2000_0000 + i * 0x400, 0x400).unwrap()
        });
        assert!(build_table(&[flash()], many).is_none());
    }

    fn boot() -> BootInfo {
        BootInfo {
            entry: 0x0800_0101,
            stack: RegionDesc::stack(0x2000_8000, 0x1000).unwrap(),
            private: [RegionDesc::stack(0x2000_0000, 0x4000).unwrap()]
                .into_iter()
                .collect(),
            shared: [flash()].into_iter().collect(),
            stacks: RegionDesc::stack(0x2000_4000, 0x4000).unwrap(),
            heap: 0x2000_2000..0x2000_4000,
        }
    }

    #[test]
    fn boot_table_includes_stack() {
        let boot = boot();
        let table = boot.main_regions().unwrap();
        assert_eq!(table.len(), 3);
        assert_eq!(table[0], flash());
        assert_eq!(table[2], boot.stack);
        // Main can't see the stack arena.
        assert!(!table.iter().any(|r| r.contains(0x2000_4000)));
    }

    #[test]
    fn arena_and_heap_must_fit_the_layout() {
        let mut b = boot();
        // Arena overlapping main's data.
        b.stacks = RegionDesc::stack(0x2000_0000, 0x8000).unwrap();
        assert_eq!(
            b.main_regions(),
            Err(Fatal::Inconsistent("thread stack arena"))
        );

        let mut b = boot();
        // Heap running into the arena.
        b.heap = 0x2000_3000..0x2000_5000;
        assert_eq!(b.main_regions(), Err(Fatal::Inconsistent("heap bounds")));
        b.heap = 0x2000_3000..0x2000_2000;
        assert_eq!(b.main_regions(), Err(Fatal::Inconsistent("heap bounds")));
        // An empty heap is fine.
        b.heap = 0x2000_3000..0x2000_3000;
        assert!(b.main_regions().is_ok());
    }
}
