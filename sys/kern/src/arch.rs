// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Architecture-specific support.
//!
//! In practice, this works by
//!
//! - Conditionally defining a nested module (below).
//! - `pub use`-ing its contents
//!
//! Thus, all architecture-specific types and functions show up right here in
//! the `arch` module, magically tailored for the current target.
//!
//! Every backend defines `SavedState`, `INITIAL_FRAME_SIZE` and
//! `reinitialize`; the rest is backend-specific.

cfg_if::cfg_if! {
    // Note: cfg_if! is slightly touchy about ordering and expression
    // complexity; this chain seems to be the best compromise.

    if #[cfg(all(target_arch = "arm", armv7m))] {
        pub mod arm_m;
        pub use arm_m::*;
    } else if #[cfg(target_arch = "arm")] {
        compile_error!("only ARMv7-M is supported on ARM");
    } else {
        pub mod sim;
        pub use sim::*;
    }
}
