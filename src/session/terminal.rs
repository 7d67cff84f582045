// Copyright 2025 Lablup Inc. and Jeongkyu Shin
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Local terminal state for interactive shells.

use crossterm::terminal::{disable_raw_mode, enable_raw_mode};
use once_cell::sync::Lazy;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use crate::ssh::PtyRequest;

/// Only one guard at a time may flip raw mode.
static TERMINAL_MUTEX: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));
static RAW_MODE_ACTIVE: AtomicBool = AtomicBool::new(false);

/// Keeps the terminal in raw mode until dropped.
pub struct RawModeGuard {
    entered: bool,
}

impl RawModeGuard {
    pub fn enter() -> io::Result<Self> {
        let _lock = TERMINAL_MUTEX
            .lock()
            .map_err(|_| io::Error::other("terminal lock poisoned"))?;
        if RAW_MODE_ACTIVE.load(Ordering::SeqCst) {
            return Ok(Self { entered: false });
        }
        enable_raw_mode()?;
        RAW_MODE_ACTIVE.store(true, Ordering::SeqCst);
        Ok(Self { entered: true })
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        if !self.entered {
            return;
        }
        let Ok(_lock) = TERMINAL_MUTEX.lock() else {
            return;
        };
        if RAW_MODE_ACTIVE.swap(false, Ordering::SeqCst) {
            if let Err(e) = disable_raw_mode() {
                eprintln!("Warning: Failed to restore terminal state: {e}");
            }
        }
    }
}

/// Restore cooked mode from anywhere, e.g. on the way out after an error.
pub fn force_terminal_cleanup() {
    if let Ok(_lock) = TERMINAL_MUTEX.lock() {
        if RAW_MODE_ACTIVE.swap(false, Ordering::SeqCst) {
            let _ = disable_raw_mode();
        }
    }
}

/// PTY parameters from `$TERM` and the current window size.
pub fn pty_request() -> PtyRequest {
    pty_request_from(
        std::env::var("TERM").ok(),
        crossterm::terminal::size().ok(),
    )
}

fn pty_request_from(term: Option<String>, size: Option<(u16, u16)>) -> PtyRequest {
    let mut pty = PtyRequest::default();
    if let Some(term) = term.filter(|t| !t.is_empty() && t != "dumb") {
        pty.term = term;
    }
    if let Some((cols, rows)) = size.filter(|&(c, r)| c > 0 && r > 0) {
        pty.cols = u32::from(cols);
        pty.rows = u32::from(rows);
    }
    pty
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pty_request_defaults() {
        let pty = pty_request_from(None, None);
        assert_eq!(pty, PtyRequest::default());
        assert_eq!(pty.term, "xterm");
    }

    #[test]
    fn test_pty_request_uses_environment() {
        let pty = pty_request_from(Some("screen-256color".to_string()), Some((132, 43)));
        assert_eq!(pty.term, "screen-256color");
        assert_eq!((pty.cols, pty.rows), (132, 43));

        let pty = pty_request_from(Some("dumb".to_string()), Some((0, 0)));
        assert_eq!(pty, PtyRequest::default());
    }
}
