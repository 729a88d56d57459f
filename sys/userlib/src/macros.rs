// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Console logging from threads, over the `write` syscall.

use core::fmt;

/// `fmt::Write` adapter for the kernel console.
pub struct Console;

impl fmt::Write for Console {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        let mut rest = s.as_bytes();
        while !rest.is_empty() {
            match crate::sys_write(rest) {
                Ok(0) | Err(_) => return Err(fmt::Error),
                Ok(n) => rest = &rest[n..],
            }
        }
        Ok(())
    }
}

/// Formats a line to the console. Output that the console refuses is
/// dropped.
#[macro_export]
macro_rules! sys_log {
    ($s:expr) => {
        {
            use core::fmt::Write as _;
            let _ = writeln!($crate::macros::Console, $s);
        }
    };
    ($s:expr, $($tt:tt)*) => {
        {
            use core::fmt::Write as _;
            let _ = writeln!($crate::macros::Console, $s, $($tt)*);
        }
    };
}
