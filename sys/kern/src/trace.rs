// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Kernel trace ring.
//!
//! A small ring of recent kernel events, owned by the kernel context and
//! meant to be read out by a debugger (or by tests). Each entry is tagged
//! with the source line that recorded it. When the same line records the
//! same payload twice in a row, the existing entry's count is bumped rather
//! than spending a new slot, so a thread spinning on `thread_yield` doesn't
//! flush out everything else.
//!
//! Use the `ktrace!` macro, which supplies the line number.

/// Things worth remembering.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum Trace {
    /// Filler for slots that have never been written.
    #[default]
    None,
    Boot,
    Syscall { thread: u8, nr: u32 },
    Switch(u8),
    Idle,
    Wake(u8),
    Handoff { lock: u32, to: u8 },
    Define { thread: u8, priority: u8 },
    End(u8),
    Error { thread: u8, code: u32 },
    Fatal,
}

/// One slot of the ring.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct TraceEntry {
    pub line: u16,
    /// Bumped every time this slot is overwritten, so a reader can tell
    /// fresh entries from stale ones after the ring wraps.
    pub generation: u16,
    pub count: u16,
    pub payload: Trace,
}

#[derive(Debug)]
pub struct TraceBuf<const N: usize> {
    last: Option<usize>,
    buffer: [TraceEntry; N],
}

impl<const N: usize> Default for TraceBuf<N> {
    fn default() -> Self {
        Self {
            last: None,
            buffer: [TraceEntry::default(); N],
        }
    }
}

impl<const N: usize> TraceBuf<N> {
    pub fn entry(&mut self, line: u16, payload: Trace) {
        // Treat "never written" as an out-of-range index, so the first entry
        // lands in slot 0 and is never merged.
        let last = self.last.unwrap_or(usize::MAX);

        if let Some(ent) = self.buffer.get_mut(last) {
            if ent.line == line && ent.payload == payload {
                if let Some(new_count) = ent.count.checked_add(1) {
                    ent.count = new_count;
                    return;
                }
            }
        }

        let ndx = {
            let last_plus_1 = last.wrapping_add(1);
            if last_plus_1 >= self.buffer.len() {
                0
            } else {
                last_plus_1
            }
        };

        let ent = &mut self.buffer[ndx];
        *ent = TraceEntry {
            line,
            payload,
            count: 1,
            generation: ent.generation.wrapping_add(1),
        };

        self.last = Some(ndx);
    }

    /// The most recently recorded entry.
    pub fn last(&self) -> Option<&TraceEntry> {
        self.last.and_then(|i| self.buffer.get(i))
    }

    /// Walks the written entries, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &TraceEntry> + '_ {
        let start = self.last.map_or(0, |l| l + 1);
        self.buffer[start..]
            .iter()
            .chain(&self.buffer[..start])
            .filter(|e| e.generation != 0)
    }
}

/// Records `$payload` in `$buf`, tagged with the calling line.
#[macro_export]
macro_rules! ktrace {
    ($buf:expr, $payload:expr) => {
        $buf.entry(line!() as u16, $payload)
    };
}
