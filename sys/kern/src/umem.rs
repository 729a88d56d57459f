// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Support for safely interacting with untrusted/unprivileged/user memory.

use core::marker::PhantomData;

use abi::{RegionAttributes, ResponseCode};

use crate::descs::RegionDesc;

/// A (user, untrusted, unprivileged) slice.
///
/// A `USlice` is passed into the kernel by a thread, and is intended to refer
/// to memory that thread controls, such as a buffer of bytes it wants
/// written to the console. However, the `USlice` type itself simply
/// represents an _allegation_ from the thread that a section of address space
/// is suitable; it does _not_ demonstrate that the thread has access to that
/// memory. It could point into the kernel, to peripherals, etc.
///
/// Having a `USlice<T>` tells you the following:
///
/// - Some thread has claimed it has access to a section of address space
///   (delimited by the `USlice`).
/// - The base of the section is correctly aligned for type `T`.
/// - The section does not wrap around the end of the address space.
///
/// To actually access the memory referred to by a `USlice`, you need to turn
/// it into a `ValidSlice` with `USlice::validate`.
pub struct USlice<T> {
    /// Base address of the slice.
    base_address: usize,
    /// Number of `T` elements in the slice.
    length: usize,
    /// since we don't actually use T...
    _marker: PhantomData<*mut [T]>,
}

impl<T> USlice<T> {
    /// Constructs a `USlice` given a base address and length passed from
    /// untrusted code.
    ///
    /// This will only succeed if such a slice would not overlap or touch the
    /// top of the address space, and if `base_address` is correctly aligned
    /// for `T`. A slice that fails these checks cannot lie in any thread's
    /// memory, so the failure is reported as a `MemoryViolation`.
    pub fn from_raw(
        base_address: usize,
        length: usize,
    ) -> Result<Self, ResponseCode> {
        // NOTE: the properties checked here are critical for the correctness
        // of this type. Think carefully before loosening any of them, or
        // adding a second way to construct a USlice.
        const { assert!(core::mem::size_of::<T>() != 0) };

        if !base_address.is_multiple_of(core::mem::align_of::<T>()) {
            return Err(ResponseCode::MemoryViolation);
        }
        let size_in_bytes = length
            .checked_mul(core::mem::size_of::<T>())
            .ok_or(ResponseCode::MemoryViolation)?;
        // Note: this subtraction cannot underflow. You can subtract any usize
        // from usize::MAX.
        let highest_possible_base = usize::MAX - size_in_bytes;
        if base_address <= highest_possible_base {
            Ok(Self {
                base_address,
                length,
                _marker: PhantomData,
            })
        } else {
            Err(ResponseCode::MemoryViolation)
        }
    }

    /// Returns `true` if this slice is zero-length, `false` otherwise.
    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// Returns the number of `T`s in this slice.
    pub fn len(&self) -> usize {
        self.length
    }

    /// Returns the bottom address of this slice as a `usize`.
    pub fn base_addr(&self) -> usize {
        self.base_address
    }

    fn size_in_bytes(&self) -> usize {
        // Checked for overflow at construction.
        self.length.wrapping_mul(core::mem::size_of::<T>())
    }

    /// Returns the end address of the slice, which is the address one past
    /// its final byte, or its base address if it's empty.
    pub fn end_addr(&self) -> usize {
        self.base_address.wrapping_add(self.size_in_bytes())
    }

    /// Checks this claim against a thread's region table.
    ///
    /// Every byte must fall in a region granting all of `access`. Device
    /// regions never qualify: the kernel does not touch registers on a
    /// thread's behalf.
    pub fn validate(
        &self,
        regions: &[RegionDesc],
        access: RegionAttributes,
    ) -> Result<ValidSlice, ResponseCode> {
        let ok = kerncore::can_access(self, regions, |r| {
            r.attributes.contains(access)
                && !r.attributes.contains(RegionAttributes::DEVICE)
        });
        if ok {
            Ok(ValidSlice {
                base: self.base_address,
                len: self.size_in_bytes(),
            })
        } else {
            Err(ResponseCode::MemoryViolation)
        }
    }
}

impl<T> kerncore::UserSlice for USlice<T> {
    #[inline(always)]
    fn is_empty(&self) -> bool {
        self.is_empty()
    }

    #[inline(always)]
    fn base_addr(&self) -> usize {
        self.base_addr()
    }

    #[inline(always)]
    fn end_addr(&self) -> usize {
        self.end_addr()
    }
}

/// A byte range the kernel has checked against a thread's region table.
///
/// These only come out of `USlice::validate`, and `UserMemory` only accepts
/// these, so thread memory is never touched on the strength of an unchecked
/// pointer.
#[derive(Debug, Eq, PartialEq)]
pub struct ValidSlice {
    base: usize,
    len: usize,
}

impl ValidSlice {
    pub fn base_addr(&self) -> usize {
        self.base
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Carves out `len` bytes starting `offset` bytes in. Any part of a
    /// checked range is itself checked.
    pub fn window(&self, offset: usize, len: usize) -> Option<ValidSlice> {
        let end = offset.checked_add(len)?;
        if end > self.len {
            return None;
        }
        Some(ValidSlice {
            base: self.base + offset,
            len,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> [RegionDesc; 3] {
        [
            RegionDesc::new(
                0x0000_8000,
                0x8000,
                RegionAttributes::READ | RegionAttributes::EXECUTE,
            ),
            RegionDesc::new(
                0x2000_0000,
                0x400,
                RegionAttributes::READ | RegionAttributes::WRITE,
            ),
            RegionDesc::new(
                0x4000_0000,
                0x1000,
                RegionAttributes::READ
                    | RegionAttributes::WRITE
                    | RegionAttributes::DEVICE,
            ),
        ]
    }

    #[test]
    fn from_raw_rejects_misaligned_and_wrapping() {
        assert!(USlice::<u32>::from_raw(0x2000_0002, 1).is_err());
        assert!(USlice::<u8>::from_raw(usize::MAX, 2).is_err());
        assert!(USlice::<u32>::from_raw(0, usize::MAX).is_err());
        assert!(USlice::<u8>::from_raw(0x2000_0001, 3).is_ok());
    }

    #[test]
    fn validation_follows_attributes() {
        let t = table();
        let stack = USlice::<u8>::from_raw(0x2000_0010, 16).unwrap();
        let v = stack.validate(&t, RegionAttributes::WRITE).unwrap();
        assert_eq!(v.base_addr(), 0x2000_0010);
        assert_eq!(v.len(), 16);

        let code = USlice::<u8>::from_raw(0x0000_8000, 4).unwrap();
        assert!(code.validate(&t, RegionAttributes::READ).is_ok());
        assert_eq!(
            code.validate(&t, RegionAttributes::WRITE),
            Err(ResponseCode::MemoryViolation)
        );

        let regs = USlice::<u8>::from_raw(0x4000_0000, 4).unwrap();
        assert_eq!(
            regs.validate(&t, RegionAttributes::READ),
            Err(ResponseCode::MemoryViolation)
        );
    }

    #[test]
    fn windows_stay_inside() {
        let t = table();
        let v = USlice::<u8>::from_raw(0x2000_0000, 100)
            .unwrap()
            .validate(&t, RegionAttributes::READ)
            .unwrap();
        let w = v.window(96, 4).unwrap();
        assert_eq!(w.base_addr(), 0x2000_0060);
        assert_eq!(w.len(), 4);
        assert!(v.window(97, 4).is_none());
        assert!(v.window(usize::MAX, 2).is_none());
    }
}
