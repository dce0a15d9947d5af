//! Debug output channel
//!
//! The driver has no port of its own; the host installs a writer callback.
//! Every line is also kept in a small ring (like dmesg) so that faults can be
//! inspected after the fact.

use alloc::collections::VecDeque;
use alloc::string::String;
use core::fmt;
use lazy_static::lazy_static;
use spin::Mutex;

/// Lines kept in the history ring
pub const HISTORY_LINES: usize = 128;

pub(crate) struct Console {
    writer: Option<fn(&str)>,
    history: VecDeque<String>,
    partial: String,
}

impl Console {
    fn new() -> Self {
        Self {
            writer: None,
            history: VecDeque::with_capacity(HISTORY_LINES),
            partial: String::new(),
        }
    }

    fn push_line(&mut self, line: String) {
        if self.history.len() == HISTORY_LINES {
            self.history.pop_front();
        }
        self.history.push_back(line);
    }
}

impl fmt::Write for Console {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        if let Some(writer) = self.writer {
            writer(s);
        }
        for ch in s.chars() {
            if ch == '\n' {
                let line = core::mem::take(&mut self.partial);
                self.push_line(line);
            } else {
                self.partial.push(ch);
            }
        }
        Ok(())
    }
}

lazy_static! {
    pub(crate) static ref CONSOLE: Mutex<Console> = Mutex::new(Console::new());
}

/// Route console output to `writer` (None silences the host side)
pub fn set_writer(writer: Option<fn(&str)>) {
    CONSOLE.lock().writer = writer;
}

/// Print to the console (internal use)
#[doc(hidden)]
pub fn _print(args: fmt::Arguments) {
    use core::fmt::Write;
    // Formatting into the history buffer cannot fail
    let _ = CONSOLE.lock().write_fmt(args);
}

/// Snapshot of the most recent complete lines, oldest first
pub fn recent_lines() -> alloc::vec::Vec<String> {
    CONSOLE.lock().history.iter().cloned().collect()
}

/// True if any retained line contains `needle`
pub fn history_contains(needle: &str) -> bool {
    CONSOLE.lock().history.iter().any(|l| l.contains(needle))
}

/// Print to the console
#[macro_export]
macro_rules! console_print {
    ($($arg:tt)*) => {
        $crate::console::_print(format_args!($($arg)*))
    };
}
