// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Common error-handling support.
//!
//! This module is designed around the idea that kernel code spends too much
//! time handling and recording errors, and we ought to be able to separate
//! that concern using `Result`.

use core::fmt;

use abi::ResponseCode;

use crate::mpu::Posture;
use crate::thread::NextThread;

/// An error committed by user code when interacting with a syscall.
///
/// This is used internally as the returned error type for syscall
/// implementations.
#[derive(Clone, Debug)]
pub enum UserError {
    /// A recoverable error. Recoverable errors are indicated to the errant
    /// thread by returning a response code. They may still cause a context
    /// switch, however, as indicated by the `NextThread`.
    Recoverable(ResponseCode, NextThread),
    /// An unrecoverable error. The kernel stops.
    Unrecoverable(Fatal),
}

/// Convenience conversion for the common case of an error that leaves the
/// caller running.
impl From<ResponseCode> for UserError {
    fn from(code: ResponseCode) -> Self {
        Self::Recoverable(code, NextThread::Same)
    }
}

impl From<Fatal> for UserError {
    fn from(f: Fatal) -> Self {
        Self::Unrecoverable(f)
    }
}

/// A condition the kernel cannot continue past.
///
/// Apart from `Exited`, each of these means either that isolation has been
/// breached or that the kernel's own bookkeeping no longer holds together;
/// carrying on would risk running thread code with the wrong memory visible.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Fatal {
    /// A protection switch was requested from the wrong posture.
    ProtectionMismatch { expected: Posture, found: Posture },
    /// The MPU caught an access outside the running thread's regions.
    MemoryFault {
        thread: Option<usize>,
        address: Option<u32>,
    },
    /// A syscall arrived with no thread on the CPU.
    NoCurrentThread,
    /// Kernel bookkeeping contradicts itself.
    Inconsistent(&'static str),
    /// A thread called `exit`. The system stops with `status` on record.
    Exited { thread: usize, status: i32 },
}

impl fmt::Display for Fatal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Fatal::ProtectionMismatch { expected, found } => write!(
                f,
                "protection switch expected {expected:?}, found {found:?}"
            ),
            Fatal::MemoryFault { thread, address } => {
                f.write_str("memory fault")?;
                if let Some(t) = thread {
                    write!(f, " in thread {t}")?;
                }
                if let Some(a) = address {
                    write!(f, " at {a:#010x}")?;
                }
                Ok(())
            }
            Fatal::NoCurrentThread => f.write_str("syscall with no thread"),
            Fatal::Inconsistent(what) => write!(f, "inconsistent: {what}"),
            Fatal::Exited { thread, status } => {
                write!(f, "thread {thread} exited with status {status}")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn epitaph_text() {
        let f = Fatal::MemoryFault {
            thread: Some(3),
            address: Some(0x2000_0000),
        };
        assert_eq!(f.to_string(), "memory fault in thread 3 at 0x20000000");
        let f = Fatal::ProtectionMismatch {
            expected: Posture::Kernel,
            found: Posture::Thread(2),
        };
        assert_eq!(
            f.to_string(),
            "protection switch expected Kernel, found Thread(2)"
        );
        let f = Fatal::Exited {
            thread: 0,
            status: -1,
        };
        assert_eq!(f.to_string(), "thread 0 exited with status -1");
    }
}
