//! Line assembly for the serial byte stream.

use std::collections::VecDeque;

use log::warn;

/// Longest line kept before it is considered garbage.
pub const MAX_LINE_LEN: usize = 64;

/// Commands that may wait for a control cycle.
pub const MAX_PENDING: usize = 8;

/// Collects bytes until a line terminator and hands back trimmed lines.
///
/// `\n` and `\r` both end a line, so `\r\n` endings yield one line and an
/// empty remainder that is skipped. Overlong lines are dropped whole.
#[derive(Debug, Default, Clone)]
pub struct LineBuffer {
    buf: Vec<u8>,
    overflowed: bool,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds `bytes` in and returns every line they completed.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        for &byte in bytes {
            match byte {
                b'\n' | b'\r' => {
                    if let Some(line) = self.take_line() {
                        lines.push(line);
                    }
                }
                _ if self.overflowed => {}
                _ if self.buf.len() == MAX_LINE_LEN => {
                    warn!("Discarding command longer than {MAX_LINE_LEN} bytes");
                    self.buf.clear();
                    self.overflowed = true;
                }
                _ => self.buf.push(byte),
            }
        }
        lines
    }

    /// Bytes of the line still being assembled.
    pub fn pending(&self) -> &[u8] {
        &self.buf
    }

    fn take_line(&mut self) -> Option<String> {
        let overflowed = std::mem::take(&mut self.overflowed);
        let raw = std::mem::take(&mut self.buf);
        if overflowed {
            return None;
        }
        let line = String::from_utf8_lossy(&raw).trim().to_string();
        (!line.is_empty()).then_some(line)
    }
}

/// Lines waiting to be applied, one per control cycle.
///
/// Once full, newly arriving lines are dropped with a warning, the way a
/// receive buffer overflows.
#[derive(Debug, Default, Clone)]
pub struct CommandQueue {
    lines: VecDeque<String>,
}

impl CommandQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues `line`. Returns `false` if it was dropped.
    pub fn push(&mut self, line: String) -> bool {
        if self.lines.len() >= MAX_PENDING {
            warn!("Command queue full, dropping {line:?}");
            return false;
        }
        self.lines.push_back(line);
        true
    }

    pub fn extend(&mut self, lines: impl IntoIterator<Item = String>) {
        for line in lines {
            self.push(line);
        }
    }

    pub fn pop(&mut self) -> Option<String> {
        self.lines.pop_front()
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}
