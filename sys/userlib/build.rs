// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::env;

/// Turns the target triple into `cfg(armv7m)` for the trap stub. Host builds
/// get no profile and trap into a test hook instead.
fn main() {
    println!("cargo::rustc-check-cfg=cfg(armv7m)");
    let target = env::var("TARGET").unwrap_or_default();
    if target.starts_with("thumbv7m") || target.starts_with("thumbv7em") {
        println!("cargo:rustc-cfg=armv7m");
    }
}
