// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Memory region descriptors.

use abi::{RegionAttributes, ResponseCode};

/// Smallest region the MPU can protect.
pub const MIN_REGION_SIZE: u32 = 32;

/// Description of one memory region.
///
/// Regions are the MPU's unit of isolation. Each thread has a small table of
/// them: the regions every thread shares (code, constants) plus the ones it
/// owns (its stack, and for the boot thread the application's data).
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct RegionDesc {
    /// Address of start of region. Must be naturally aligned for `size`.
    pub base: u32,
    /// Size of region, in bytes. Must be a power of two no smaller than
    /// `MIN_REGION_SIZE`.
    pub size: u32,
    /// Flags describing what can be done with this region.
    pub attributes: RegionAttributes,
}

impl RegionDesc {
    pub const fn new(
        base: u32,
        size: u32,
        attributes: RegionAttributes,
    ) -> Self {
        Self {
            base,
            size,
            attributes,
        }
    }

    /// Builds the read-write, never-executable region for a thread stack,
    /// checking the shape the MPU needs.
    pub fn stack(base: u32, size: u32) -> Result<Self, ResponseCode> {
        let region = Self::new(
            base,
            size,
            RegionAttributes::READ | RegionAttributes::WRITE,
        );
        if region.is_mpu_shaped() {
            Ok(region)
        } else {
            Err(ResponseCode::InvalidStackRegion)
        }
    }

    /// Checks that this region can be loaded into an MPU slot: power-of-two
    /// size of at least 32 bytes, base aligned to size, and not touching the
    /// top of the address space.
    pub fn is_mpu_shaped(&self) -> bool {
        self.size >= MIN_REGION_SIZE
            && self.size.is_power_of_two()
            && self.size <= 1 << 31
            && self.base & (self.size - 1) == 0
            && self.base.checked_add(self.size).is_some()
    }

    /// Tests whether `self` contains `addr`.
    pub fn contains(&self, addr: usize) -> bool {
        (self.base as usize) <= addr && addr < self.end_addr() as usize
    }

    /// Computes the address one past the end of this region. Regions never
    /// touch the end of the address space, so this can't wrap.
    pub fn end_addr(&self) -> u32 {
        self.base.wrapping_add(self.size)
    }

    /// Address just past the top of the region, which is where a descending
    /// stack starts.
    pub fn top(&self) -> u32 {
        self.end_addr()
    }
}

/// Lets the generic checks in kerncore work over our region tables.
impl kerncore::MemoryRegion for RegionDesc {
    #[inline(always)]
    fn contains(&self, addr: usize) -> bool {
        self.contains(addr)
    }

    #[inline(always)]
    fn base_addr(&self) -> usize {
        self.base as usize
    }

    #[inline(always)]
    fn end_addr(&self) -> usize {
        self.end_addr() as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stack_shape_rules() {
        assert!(RegionDesc::stack(0x2000_1000, 0x400).is_ok());
        assert!(RegionDesc::stack(0x2000_0000, 32).is_ok());

        for (base, size) in [
            (0x2000_1000, 0),         // empty
            (0x2000_1000, 16),        // below MPU granule
            (0x2000_1000, 0x300),     // not a power of two
            (0x2000_1200, 0x400),     // misaligned for its size
            (0xFFFF_FC00, 0x400),     // touches the end of the address space
        ] {
            assert_eq!(
                RegionDesc::stack(base, size),
                Err(ResponseCode::InvalidStackRegion),
                "{base:#x}+{size:#x} accepted",
            );
        }
    }

    #[test]
    fn containment_is_half_open() {
        let r = RegionDesc::new(0x1000, 0x100, RegionAttributes::READ);
        assert!(r.contains(0x1000));
        assert!(r.contains(0x10FF));
        assert!(!r.contains(0x1100));
        assert!(!r.contains(0x0FFF));
        assert_eq!(r.top(), 0x1100);
    }
}
