// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::env;
use std::fs::File;
use std::io::Write;
use std::path::PathBuf;

use serde::Deserialize;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    expose_m_profile();
    generate_consts()?;
    Ok(())
}

/// Turns the target triple into `cfg(armv7m)` for the architecture backend.
/// Host builds get no profile and use the simulator.
fn expose_m_profile() {
    println!("cargo::rustc-check-cfg=cfg(armv7m)");
    let target = env::var("TARGET").unwrap_or_default();
    if target.starts_with("thumbv7m") || target.starts_with("thumbv7em") {
        println!("cargo:rustc-cfg=armv7m");
    }
}

fn generate_consts() -> Result<(), Box<dyn std::error::Error>> {
    println!("cargo:rerun-if-env-changed=KERNEL_CONFIG");
    let kconfig: KernelConfig = match env::var("KERNEL_CONFIG") {
        Ok(text) => ron::de::from_str(&text)?,
        Err(_) => KernelConfig::default(),
    };

    if kconfig.max_threads == 0 || kconfig.max_threads > 254 {
        return Err(format!(
            "max_threads must be in 1..=254, got {}",
            kconfig.max_threads
        )
        .into());
    }
    if kconfig.default_tick_hz == 0
        || kconfig.default_tick_hz > kconfig.core_clock_hz
    {
        return Err("default_tick_hz must be in 1..=core_clock_hz".into());
    }
    if kconfig.trace_depth == 0 {
        return Err("trace_depth must be nonzero".into());
    }

    let out = &PathBuf::from(env::var_os("OUT_DIR").ok_or("no OUT_DIR")?);
    let mut file = File::create(out.join("kconfig.rs"))?;

    writeln!(file, "// See build.rs for details")?;
    writeln!(
        file,
        "/// Threads an application may define, not counting the boot thread."
    )?;
    writeln!(file, "pub const MAX_THREADS: usize = {};", kconfig.max_threads)?;
    writeln!(file, "/// Locks an application may initialize.")?;
    writeln!(file, "pub const MAX_LOCKS: usize = {};", kconfig.max_locks)?;
    writeln!(file, "/// Frequency of the clock feeding the tick timer.")?;
    writeln!(
        file,
        "pub const CORE_CLOCK_HZ: u32 = {};",
        kconfig.core_clock_hz
    )?;
    writeln!(file, "/// Tick rate used when preemption is turned off.")?;
    writeln!(
        file,
        "pub const DEFAULT_TICK_HZ: u32 = {};",
        kconfig.default_tick_hz
    )?;
    writeln!(file, "/// Entries in each kernel's trace ring.")?;
    writeln!(file, "pub const TRACE_DEPTH: usize = {};", kconfig.trace_depth)?;
    writeln!(file, "/// Longest LED strip `neopixel_load` will accept.")?;
    writeln!(file, "pub const MAX_PIXELS: usize = {};", kconfig.max_pixels)?;

    Ok(())
}

#[derive(Deserialize)]
#[serde(default)]
struct KernelConfig {
    max_threads: usize,
    max_locks: usize,
    core_clock_hz: u32,
    default_tick_hz: u32,
    trace_depth: usize,
    max_pixels: usize,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            max_threads: 14,
            max_locks: 32,
            core_clock_hz: 64_000_000,
            default_tick_hz: 1000,
            trace_depth: 64,
            max_pixels: 64,
        }
    }
}
