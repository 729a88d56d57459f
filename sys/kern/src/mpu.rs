// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The memory protection switch.
//!
//! There are exactly two postures. In the kernel posture the MPU is off and
//! privileged code sees all of memory. In a thread posture the MPU holds that
//! thread's region table and nothing else, with the privileged default map
//! behind it so the kernel can still run when it traps in.
//!
//! Switches must alternate: kernel entry from the thread that was running (or
//! from idle, which is already kernel posture), then exit to exactly one
//! thread. Anything else means thread code could run with the wrong map, and
//! is reported as `Fatal::ProtectionMismatch`.

use abi::{RegionAttributes, MPU_REGION_COUNT};

use crate::descs::RegionDesc;
use crate::err::Fatal;
use crate::platform::Registers;

/// Register offsets within the ARMv7-M MPU block.
pub const TYPE: usize = 0x0;
pub const CTRL: usize = 0x4;
pub const RNR: usize = 0x8;
pub const RBAR: usize = 0xC;
pub const RASR: usize = 0x10;

const ENABLE: u32 = 0b001;
const PRIVDEFENA: u32 = 0b100;

/// Which memory map is loaded.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Posture {
    /// `KERNEL_PROTECT`: everything visible.
    Kernel,
    /// `THREAD_PROTECT` for the thread in this slot.
    Thread(usize),
}

/// Encodes one region's attribute and size register.
pub fn rasr(region: &RegionDesc) -> u32 {
    let ratts = region.attributes;
    let xn = !ratts.contains(RegionAttributes::EXECUTE);
    // These AP encodings never deny *privileged* code (i.e. us) access to
    // the memory.
    let ap = if ratts.contains(RegionAttributes::WRITE) {
        0b011
    } else if ratts.contains(RegionAttributes::READ) {
        0b010
    } else {
        0b001
    };
    // TEX/SCB: device memory, or normal write-back memory used only by this
    // core. See table B3-13 in the ARMv7-M ARM.
    let (tex, scb) = if ratts.contains(RegionAttributes::DEVICE) {
        (0b000, 0b001)
    } else {
        (0b001, 0b011)
    };
    // The size field is log2(size) - 1, and sizes are powers of two.
    let l2size = 30 - region.size.leading_zeros();

    (xn as u32) << 28
        | ap << 24
        | tex << 19
        | scb << 16
        | l2size << 1
        | 1 // enable
}

/// Encodes one region's base address register. The region number is written
/// separately through RNR.
pub fn rbar(region: &RegionDesc) -> u32 {
    region.base
}

/// Owner of the MPU and of the record of which posture is in force.
pub struct ProtectionSwitch<R> {
    regs: R,
    posture: Posture,
}

impl<R: Registers> ProtectionSwitch<R> {
    /// Takes the MPU, turning it off. The kernel boots in kernel posture.
    pub fn new(mut regs: R) -> Self {
        regs.write(CTRL, 0);
        Self {
            regs,
            posture: Posture::Kernel,
        }
    }

    pub fn posture(&self) -> Posture {
        self.posture
    }

    /// Switches to `KERNEL_PROTECT` on kernel entry. `running` is the thread
    /// the kernel believes was on the CPU, or `None` if the kernel was idle.
    pub fn enter_kernel_mode(
        &mut self,
        running: Option<usize>,
    ) -> Result<(), Fatal> {
        let expected = match running {
            Some(i) => Posture::Thread(i),
            None => Posture::Kernel,
        };
        if self.posture != expected {
            return Err(Fatal::ProtectionMismatch {
                expected,
                found: self.posture,
            });
        }
        self.regs.write(CTRL, 0);
        self.posture = Posture::Kernel;
        Ok(())
    }

    /// Switches to `THREAD_PROTECT` for `thread`, whose region table is
    /// `regions`, on the way out of the kernel.
    pub fn enter_thread_mode(
        &mut self,
        thread: usize,
        regions: &[RegionDesc],
    ) -> Result<(), Fatal> {
        if self.posture != Posture::Kernel {
            return Err(Fatal::ProtectionMismatch {
                expected: Posture::Kernel,
                found: self.posture,
            });
        }
        if regions.len() > MPU_REGION_COUNT {
            return Err(Fatal::Inconsistent("region table too large"));
        }

        self.regs.write(CTRL, 0);
        for slot in 0..MPU_REGION_COUNT {
            self.regs.write(RNR, slot as u32);
            match regions.get(slot) {
                Some(region) => {
                    self.regs.write(RBAR, rbar(region));
                    self.regs.write(RASR, rasr(region));
                }
                None => {
                    self.regs.write(RBAR, 0);
                    self.regs.write(RASR, 0);
                }
            }
        }
        self.regs.write(CTRL, ENABLE | PRIVDEFENA);
        self.posture = Posture::Thread(thread);
        Ok(())
    }

    pub fn registers(&self) -> &R {
        &self.regs
    }
}
