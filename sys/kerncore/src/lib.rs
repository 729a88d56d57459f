// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Architecture-independent memory checks used by the kernel.
//!
//! The kernel needs to answer two questions about thread memory without caring
//! what its own region types look like:
//!
//! - does a thread's region table cover an address range that the thread
//!   handed us in a syscall? (`can_access`)
//! - do two regions share any byte? (`overlaps`)
//!
//! Both are expressed over the small traits below so they can be tested on the
//! host with throwaway types.

// std is available to the unit tests below; everything else is no_std.
#![cfg_attr(not(test), no_std)]
#![forbid(clippy::wildcard_imports)]

use core::cmp::Ordering;

/// An address range claimed by a thread, as received in syscall arguments.
///
/// Holding one of these grants nothing. It is a base/end pair to be checked.
///
/// # Invariants
///
/// `base_addr() <= end_addr()`, and `is_empty()` holds exactly when the two
/// are equal.
pub trait UserSlice {
    /// Empty ranges are never checked, so threads can pass `&[]` freely.
    fn is_empty(&self) -> bool;

    /// First byte in the range.
    fn base_addr(&self) -> usize;

    /// First byte past the range.
    fn end_addr(&self) -> usize;
}

impl<T: UserSlice> UserSlice for &T {
    #[inline(always)]
    fn is_empty(&self) -> bool {
        (**self).is_empty()
    }

    #[inline(always)]
    fn base_addr(&self) -> usize {
        (**self).base_addr()
    }

    #[inline(always)]
    fn end_addr(&self) -> usize {
        (**self).end_addr()
    }
}

/// A protection region in a thread's region table.
///
/// Permissions are not part of this trait; callers of `can_access` judge them
/// with a predicate.
///
/// # Invariants
///
/// `contains(x)` holds exactly when `base_addr() <= x < end_addr()`.
pub trait MemoryRegion {
    fn contains(&self, addr: usize) -> bool;
    fn base_addr(&self) -> usize;
    fn end_addr(&self) -> usize;
}

impl<T: MemoryRegion> MemoryRegion for &T {
    #[inline(always)]
    fn contains(&self, addr: usize) -> bool {
        (**self).contains(addr)
    }

    #[inline(always)]
    fn base_addr(&self) -> usize {
        (**self).base_addr()
    }

    #[inline(always)]
    fn end_addr(&self) -> usize {
        (**self).end_addr()
    }
}

/// Orders `region` relative to `addr` for a binary search: `Equal` if the
/// region holds the address, `Less` if the region lies wholly below it,
/// `Greater` if wholly above.
#[inline(always)]
fn locate(region: &impl MemoryRegion, addr: usize) -> Ordering {
    if addr < region.base_addr() {
        Ordering::Greater
    } else if addr >= region.end_addr() {
        Ordering::Less
    } else {
        Ordering::Equal
    }
}

/// Decides whether `slice` is entirely covered by regions of `table` that
/// satisfy `region_ok`.
///
/// The covering regions may be several, but they must abut with no gap and
/// every one of them must pass `region_ok`.
///
/// # Preconditions
///
/// `table` is sorted by base address and its regions are pairwise disjoint.
/// The kernel builds thread region tables that way; see `overlaps`.
#[must_use]
pub fn can_access<S, R>(
    slice: S,
    table: &[R],
    region_ok: impl Fn(&R) -> bool,
) -> bool
where
    S: UserSlice,
    R: MemoryRegion,
{
    if slice.is_empty() {
        return true;
    }

    let end = slice.end_addr();
    let Ok(first) = table.binary_search_by(|r| locate(r, slice.base_addr()))
    else {
        return false;
    };

    let mut covered_to = slice.base_addr();
    for region in &table[first..] {
        if !region.contains(covered_to) || !region_ok(region) {
            return false;
        }
        covered_to = region.end_addr();
        if covered_to >= end {
            return true;
        }
    }

    // Ran off the end of the table with bytes still uncovered.
    false
}

/// Checks whether two half-open ranges `[a_base, a_end)` and
/// `[b_base, b_end)` share at least one address. Empty ranges overlap nothing.
pub fn overlaps(a: &impl MemoryRegion, b: &impl MemoryRegion) -> bool {
    let a_empty = a.base_addr() == a.end_addr();
    let b_empty = b.base_addr() == b.end_addr();
    !a_empty
        && !b_empty
        && a.base_addr() < b.end_addr()
        && b.base_addr() < a.end_addr()
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Claim {
        base: usize,
        len: usize,
    }

    impl UserSlice for Claim {
        fn is_empty(&self) -> bool {
            self.len == 0
        }

        fn base_addr(&self) -> usize {
            self.base
        }

        fn end_addr(&self) -> usize {
            self.base + self.len
        }
    }

    #[derive(Clone)]
    struct Region {
        base: usize,
        size: usize,
        writable: bool,
    }

    impl MemoryRegion for Region {
        fn contains(&self, addr: usize) -> bool {
            addr >= self.base && addr < self.end_addr()
        }

        fn base_addr(&self) -> usize {
            self.base
        }

        fn end_addr(&self) -> usize {
            self.base + self.size
        }
    }

    /// Shaped like a user thread's table: shared code and constants, then a
    /// stack split across two abutting regions, then a stray window.
    fn thread_table() -> Vec<Region> {
        vec![
            Region {
                base: 0x0000_8000,
                size: 0x8000,
                writable: false,
            },
            Region {
                base: 0x0001_0000,
                size: 0x1000,
                writable: false,
            },
            Region {
                base: 0x2000_4000,
                size: 0x400,
                writable: true,
            },
            Region {
                base: 0x2000_4400,
                size: 0x400,
                writable: true,
            },
            Region {
                base: 0x2000_9000,
                size: 0x100,
                writable: false,
            },
        ]
    }

    fn anything(_: &Region) -> bool {
        true
    }

    fn writable(r: &Region) -> bool {
        r.writable
    }

    #[test]
    fn empty_claims_are_always_fine() {
        let table = thread_table();
        assert!(can_access(Claim { base: 0, len: 0 }, &table, writable));
        assert!(can_access(
            Claim { base: 0, len: 0 },
            &[] as &[Region],
            anything
        ));
    }

    #[test]
    fn claim_inside_one_region() {
        let table = thread_table();
        assert!(can_access(
            Claim {
                base: 0x2000_4010,
                len: 0x20
            },
            &table,
            writable
        ));
        assert!(can_access(
            Claim {
                base: 0x0001_0000,
                len: 0x1000
            },
            &table,
            anything
        ));
    }

    #[test]
    fn claim_spanning_abutting_regions() {
        let table = thread_table();
        assert!(can_access(
            Claim {
                base: 0x2000_43F0,
                len: 0x40
            },
            &table,
            writable
        ));
    }

    #[test]
    fn predicate_failure_anywhere_rejects() {
        let table = thread_table();
        // Read-only constants are not writable.
        assert!(!can_access(
            Claim {
                base: 0x0001_0010,
                len: 4
            },
            &table,
            writable
        ));
        // Code region abuts the constants; the first part passes, the
        // second does not.
        let table = thread_table();
        assert!(!can_access(
            Claim {
                base: 0x0000_FFF0,
                len: 0x20
            },
            &table,
            |r: &Region| r.base == 0x0000_8000
        ));
    }

    #[test]
    fn gaps_and_strays_are_rejected() {
        let table = thread_table();
        // Between constants and stack.
        assert!(!can_access(
            Claim {
                base: 0x1000_0000,
                len: 4
            },
            &table,
            anything
        ));
        // Runs off the top of the stack into the gap before the window.
        assert!(!can_access(
            Claim {
                base: 0x2000_47F0,
                len: 0x20
            },
            &table,
            anything
        ));
        // Below everything.
        assert!(!can_access(Claim { base: 0x10, len: 4 }, &table, anything));
        // Above everything.
        assert!(!can_access(
            Claim {
                base: 0x3000_0000,
                len: 4
            },
            &table,
            anything
        ));
    }

    #[test]
    fn every_gap_between_regions_is_rejected() {
        let table = thread_table();
        let mut last_end = 0;
        for region in &table {
            if region.base_addr() > last_end {
                assert!(
                    !can_access(
                        Claim {
                            base: last_end,
                            len: region.base_addr() - last_end,
                        },
                        &table,
                        anything
                    ),
                    "gap {last_end:#x}..{:#x} was accepted",
                    region.base_addr()
                );
            }
            last_end = region.end_addr();
        }
    }

    #[test]
    fn overlap_detection() {
        let a = Region {
            base: 0x1000,
            size: 0x100,
            writable: true,
        };
        let touching = Region {
            base: 0x1100,
            size: 0x100,
            writable: true,
        };
        let inside = Region {
            base: 0x1080,
            size: 0x10,
            writable: true,
        };
        let straddle = Region {
            base: 0x0F80,
            size: 0x100,
            writable: true,
        };
        let empty = Region {
            base: 0x1050,
            size: 0,
            writable: true,
        };

        assert!(!overlaps(&a, &touching));
        assert!(!overlaps(&touching, &a));
        assert!(overlaps(&a, &inside));
        assert!(overlaps(&inside, &a));
        assert!(overlaps(&a, &straddle));
        assert!(overlaps(&a, &a.clone()));
        assert!(!overlaps(&a, &empty));
    }
}
