// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Architecture support for ARMv7-M.
//!
//! # Entry and exit
//!
//! Three exceptions lead into the kernel: `SVCall` (a thread's `svc`),
//! `SysTick`, and `MemoryManagement`. All three run at the same place in the
//! priority scheme as far as the kernel is concerned: SVCall and SysTick
//! share the lowest priority so they can't preempt each other, and a
//! MemoryManagement fault is always fatal so it never needs to return.
//!
//! Each handler loads a small event code into r0 and branches to
//! `kernel_trap`, which saves the interrupted thread's callee-save registers,
//! PSP and EXC_RETURN into the `SavedState` that `CURRENT_SAVE` points at,
//! calls into Rust, and then restores from wherever `CURRENT_SAVE` points
//! afterwards. That may be a different thread.
//!
//! The caller-save registers (r0-r3, r12, LR, PC, xPSR) live in the hardware
//! exception frame on the thread's own stack and aren't touched.
//!
//! # Idle
//!
//! There's no idle thread. When nothing is runnable the kernel stays in the
//! handler and sleeps in `wfe` until SysTick goes pending; since SysTick has
//! the same priority as SVCall it can't actually be taken until we return,
//! so `SCR.SEVONPEND` is set to make the pend itself a wakeup event.
//!
//! # Floating point
//!
//! Threads get the basic (non-FP) exception frame and the kernel does not
//! save s16-s31, so threads must not use the FPU.

use core::arch::{self, global_asm};
use core::marker::PhantomData;
use core::sync::atomic::{AtomicPtr, Ordering};

use zerocopy::{Immutable, IntoBytes};

use crate::kernel::{Dispatch, Event, Kernel};
use crate::platform::{
    DriverError, Devices, Peripherals, Platform, Registers, UserMemory,
};
use crate::startup::BootInfo;
use crate::thread::{ArchState, ThreadStart};
use crate::umem::ValidSlice;

/// Points at the saved state of the thread on the CPU. The entry sequence
/// saves into this and restores from it.
#[no_mangle]
static CURRENT_SAVE: AtomicPtr<SavedState> =
    AtomicPtr::new(core::ptr::null_mut());

/// The kernel context, type-erased so the non-generic entry path can hold
/// it. Set once by `run`.
static KERNEL: AtomicPtr<()> = AtomicPtr::new(core::ptr::null_mut());

/// The `handle_entry` instance matching `KERNEL`'s type.
static ENTRY: AtomicPtr<()> = AtomicPtr::new(core::ptr::null_mut());

const TRAP_SYSCALL: u32 = 0;
const TRAP_TICK: u32 = 1;
const TRAP_MEMFAULT: u32 = 2;

/// ARMv7-M volatile registers that must be saved across context switches.
#[repr(C)]
#[derive(Debug, Default)]
pub struct SavedState {
    // NOTE: the following fields must be kept contiguous and in this order;
    // `kernel_trap` stores and loads them with one stm/ldm.
    r4: u32,
    r5: u32,
    r6: u32,
    r7: u32,
    r8: u32,
    r9: u32,
    r10: u32,
    r11: u32,
    psp: u32,
    exc_return: u32,
}

/// Map the volatile registers to (architecture-independent) syscall argument
/// and return slots.
impl ArchState for SavedState {
    fn stack_pointer(&self) -> u32 {
        self.psp
    }

    /// Reads syscall argument register 0.
    fn arg0(&self) -> u32 {
        self.r4
    }
    fn arg1(&self) -> u32 {
        self.r5
    }
    fn arg2(&self) -> u32 {
        self.r6
    }
    fn arg3(&self) -> u32 {
        self.r7
    }
    fn arg4(&self) -> u32 {
        self.r8
    }
    fn arg5(&self) -> u32 {
        self.r9
    }

    fn syscall_descriptor(&self) -> u32 {
        self.r11
    }

    /// Writes syscall return argument 0.
    fn ret0(&mut self, x: u32) {
        self.r4 = x
    }
    fn ret1(&mut self, x: u32) {
        self.r5 = x
    }
}

/// Stuff placed on the stack at exception entry.
#[derive(Debug, Default, IntoBytes, Immutable)]
#[repr(C)]
struct ExceptionFrame {
    r0: u32,
    r1: u32,
    r2: u32,
    r3: u32,
    r12: u32,
    lr: u32,
    pc: u32,
    xpsr: u32,
}

/// Bytes at the top of a new thread's stack taken by its first frame.
pub const INITIAL_FRAME_SIZE: usize = core::mem::size_of::<ExceptionFrame>();

/// Initially we just set the Thumb Mode bit, the minimum required.
const INITIAL_PSR: u32 = 1 << 24;

/// Return to Thread mode on the process stack, basic frame.
const EXC_RETURN_CONST: u32 = 0xFFFF_FFFD;

/// Writes a new thread's first exception frame and points its saved state
/// at it, so the first return from the kernel "resumes" it at its entry
/// point with its argument in r0.
pub fn reinitialize(
    save: &mut SavedState,
    start: &ThreadStart,
    frame: ValidSlice,
    memory: &mut impl UserMemory,
) -> Result<(), DriverError> {
    let initial = ExceptionFrame {
        r0: start.argument,
        lr: start.exit,
        pc: start.entry | 1, // for thumb
        xpsr: INITIAL_PSR,
        ..ExceptionFrame::default()
    };
    memory.copy_out(&frame, initial.as_bytes())?;
    *save = SavedState {
        psp: frame.base_addr() as u32,
        exc_return: EXC_RETURN_CONST,
        ..SavedState::default()
    };
    Ok(())
}

/// Base of the MPU register block.
pub const MPU_BASE: usize = 0xE000_ED90;
/// Base of the SysTick register block.
pub const SYST_BASE: usize = 0xE000_E010;

/// A memory-mapped register block.
pub struct Mmio {
    base: usize,
}

impl Mmio {
    /// # Safety
    ///
    /// `base` must be the address of a block of 32-bit registers that
    /// nothing else drives.
    pub const unsafe fn new(base: usize) -> Self {
        Self { base }
    }
}

impl Registers for Mmio {
    fn read(&self, offset: usize) -> u32 {
        // Safety: the constructor's contract makes this a register we own.
        unsafe { core::ptr::read_volatile((self.base + offset) as *const u32) }
    }

    fn write(&mut self, offset: usize, value: u32) {
        // Safety: as above.
        unsafe {
            core::ptr::write_volatile((self.base + offset) as *mut u32, value)
        }
    }
}

/// Thread memory, reached directly: the kernel runs with the privileged
/// default map.
pub struct ArmMemory;

impl UserMemory for ArmMemory {
    fn copy_in(
        &self,
        src: &ValidSlice,
        dst: &mut [u8],
    ) -> Result<(), DriverError> {
        if src.len() != dst.len() {
            return Err(DriverError::OutOfRange);
        }
        // Safety: `src` was checked against a thread's region table, and
        // every region in such a table is real memory.
        unsafe {
            core::ptr::copy_nonoverlapping(
                src.base_addr() as *const u8,
                dst.as_mut_ptr(),
                dst.len(),
            );
        }
        Ok(())
    }

    fn copy_out(
        &mut self,
        dst: &ValidSlice,
        src: &[u8],
    ) -> Result<(), DriverError> {
        if dst.len() != src.len() {
            return Err(DriverError::OutOfRange);
        }
        // Safety: as for `copy_in`, and the range was checked writable.
        unsafe {
            core::ptr::copy_nonoverlapping(
                src.as_ptr(),
                dst.base_addr() as *mut u8,
                src.len(),
            );
        }
        Ok(())
    }
}

/// An ARMv7-M board with device drivers `D`.
pub struct ArmM<D>(PhantomData<D>);

impl<D: Devices> Platform for ArmM<D> {
    type Mpu = Mmio;
    type SysTick = Mmio;
    type Devices = D;
    type Memory = ArmMemory;
}

/// Boots the kernel on this core and starts the boot thread. Never returns.
///
/// # Safety
///
/// Must be called exactly once, from privileged Thread mode on the main
/// stack, before anything else has touched the MPU or SysTick.
pub unsafe fn run<D: Devices>(devices: D, boot: BootInfo) -> ! {
    cortex_m::interrupt::disable();

    // Safety: the caller hands us these blocks.
    let peripherals = Peripherals::<ArmM<D>> {
        mpu: unsafe { Mmio::new(MPU_BASE) },
        systick: unsafe { Mmio::new(SYST_BASE) },
        devices,
        memory: ArmMemory,
    };

    configure_exceptions();

    let mut kernel = match Kernel::new(peripherals, boot) {
        Ok(k) => k,
        Err(fatal) => crate::fail::die(fatal),
    };
    let first = match kernel.start() {
        Ok(Dispatch::Resume(i)) => i,
        Ok(Dispatch::Idle) => crate::fail::die("boot thread not runnable"),
        Err(fatal) => crate::fail::die(fatal),
    };

    // `kernel` lives in this frame, which never returns.
    KERNEL.store(
        core::ptr::addr_of_mut!(kernel).cast::<()>(),
        Ordering::Relaxed,
    );
    let entry: unsafe fn(u32) = handle_entry::<D>;
    ENTRY.store(entry as *mut (), Ordering::Relaxed);

    let save = kernel.thread_mut(first).save_mut();
    // Safety: this is setting the Process (thread) stack pointer, which has
    // no effect while we run on the Main stack.
    unsafe {
        cortex_m::register::psp::write(save.psp);
    }
    let save: *mut SavedState = save;
    CURRENT_SAVE.store(save, Ordering::Relaxed);

    // Flip into Handler mode by trapping; the SVCall handler recognizes the
    // trap from the Main stack and drops into the boot thread.
    //
    // Safety: noreturn; the boot thread's registers are all we leave behind.
    unsafe {
        arch::asm!("
            @ Restore callee-save registers.
            ldm {save}, {{r4-r11}}
            cpsie i
            @ Trap into the kernel.
            svc #0xFF
            ",
            save = in(reg) save,
            options(noreturn),
        )
    }
}

/// Sets exception priorities and turns on the faults we rely on.
fn configure_exceptions() {
    // Safety: these registers have no memory-safety implications; the
    // register API just doesn't know it.
    unsafe {
        let scb = &*cortex_m::peripheral::SCB::PTR;
        // MemManage is distinguished from HardFault.
        scb.shcsr.modify(|x| x | 1 << 16);
        // Faults at the highest configurable priority.
        scb.shpr[0].write(0x00);
        scb.shpr[1].write(0x00);
        scb.shpr[2].write(0x00);
        // SVCall, PendSV and SysTick at the lowest, so none of them can
        // preempt another.
        scb.shpr[7].write(0xFF);
        scb.shpr[10].write(0xFF);
        scb.shpr[11].write(0xFF);
        // Trap on divide by zero rather than quietly producing 0.
        const DIV_0_TRP: u32 = 1 << 4;
        scb.ccr.modify(|x| x | DIV_0_TRP);
        // Pending exceptions wake `wfe`, even ones masked by priority.
        const SEVONPEND: u32 = 1 << 4;
        scb.scr.modify(|x| x | SEVONPEND);
    }
}

/// Called from `kernel_trap` with all thread state saved.
#[no_mangle]
unsafe extern "C" fn kernel_entry(trap: u32) {
    let f = ENTRY.load(Ordering::Relaxed);
    if f.is_null() {
        crate::fail::die("exception before kernel start");
    }
    // Safety: `run` only ever stores a `handle_entry::<D>` here.
    let f: unsafe fn(u32) = unsafe { core::mem::transmute(f) };
    unsafe { f(trap) }
}

unsafe fn handle_entry<D: Devices>(trap: u32) {
    // Safety: `run` stored a `Kernel<ArmM<D>>` for the same `D` that chose
    // this instance, and exception handlers don't nest, so this is the only
    // reference.
    let kernel = unsafe {
        &mut *KERNEL.load(Ordering::Relaxed).cast::<Kernel<ArmM<D>>>()
    };

    let mut event = match trap {
        TRAP_SYSCALL => Event::Syscall,
        TRAP_TICK => Event::Tick,
        TRAP_MEMFAULT => Event::MemoryFault {
            address: fault_address(),
        },
        _ => crate::fail::die("unknown trap"),
    };
    loop {
        match kernel.handle(event) {
            Ok(Dispatch::Resume(i)) => {
                let save: *mut SavedState = kernel.thread_mut(i).save_mut();
                CURRENT_SAVE.store(save, Ordering::Relaxed);
                return;
            }
            Ok(Dispatch::Idle) => {
                wait_for_tick();
                event = Event::Tick;
            }
            Err(fatal) => crate::fail::die(fatal),
        }
    }
}

/// The faulting data address, if the MPU recorded one.
fn fault_address() -> Option<u32> {
    const MMARVALID: u32 = 1 << 7;
    // Safety: reading fault status has no side effects.
    let scb = unsafe { &*cortex_m::peripheral::SCB::PTR };
    if scb.cfsr.read() & MMARVALID != 0 {
        Some(scb.mmfar.read())
    } else {
        None
    }
}

/// Sleeps until SysTick goes pending, then claims it.
fn wait_for_tick() {
    const PENDSTSET: u32 = 1 << 26;
    const PENDSTCLR: u32 = 1 << 25;
    // Safety: ICSR pend bits only affect SysTick, which we own.
    let scb = unsafe { &*cortex_m::peripheral::SCB::PTR };
    // A stale event can end the first `wfe` early, hence the loop.
    while scb.icsr.read() & PENDSTSET == 0 {
        cortex_m::asm::wfe();
    }
    unsafe { scb.icsr.write(PENDSTCLR) };
}

global_asm! {"
    .section .text.SVCall
    .globl SVCall
    .type SVCall,function
    SVCall:
        @ Inspect LR to figure out the caller's mode.
        mov r0, lr
        mov r1, #0xFFFFFFF3
        bic r0, r1
        @ Is the call coming from thread mode + main stack, i.e.
        @ from `run`?
        cmp r0, #0x8
        beq 1f
        movs r0, #{syscall}
        b kernel_trap

    1:  @ starting up the boot thread.
        movs r0, #1         @ get bitmask to...
        msr CONTROL, r0     @ ...shed privs from thread mode.
                            @ note: no barrier here because exc return
                            @ serves as barrier
        mov lr, {exc_return}
        bx lr               @ branch into user mode

    .section .text.SysTick
    .globl SysTick
    .type SysTick,function
    SysTick:
        movs r0, #{tick}
        b kernel_trap

    .section .text.MemoryManagement
    .globl MemoryManagement
    .type MemoryManagement,function
    MemoryManagement:
        movs r0, #{memfault}
        b kernel_trap

    .section .text.kernel_trap
    .globl kernel_trap
    .type kernel_trap,function
    kernel_trap:
        @ r0 holds the trap code; keep it for kernel_entry.
        movw r1, #:lower16:CURRENT_SAVE
        movt r1, #:upper16:CURRENT_SAVE
        ldr r1, [r1]
        @ fetching PSP into r12 means the order in the stm below is right.
        mrs r12, PSP
        stm r1, {{r4-r12, lr}}

        bl kernel_entry

        @ we're returning back to *some* thread, maybe not the same one.
        movw r0, #:lower16:CURRENT_SAVE
        movt r0, #:upper16:CURRENT_SAVE
        ldr r0, [r0]
        ldm r0, {{r4-r12, lr}}
        msr PSP, r12
        bx lr
    ",
    syscall = const TRAP_SYSCALL,
    tick = const TRAP_TICK,
    memfault = const TRAP_MEMFAULT,
    exc_return = const EXC_RETURN_CONST,
}
