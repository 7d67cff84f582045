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

//! Cancellable terminal prompts.

use async_trait::async_trait;
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use std::io::{self, BufRead, Write};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::debug;
use zeroize::Zeroizing;

use crate::session::terminal::RawModeGuard;

#[derive(Debug, Error)]
pub enum PromptError {
    #[error("prompt cancelled")]
    Cancelled,

    #[error("failed to read from terminal: {0}")]
    Io(#[from] io::Error),
}

/// Source of interactive answers (passwords, passphrases, keyboard-interactive
/// responses).
#[async_trait]
pub trait Prompter: Send + Sync {
    /// Read a secret without echo.
    async fn secret(&self, prompt: &str) -> Result<Zeroizing<String>, PromptError>;

    /// Read a visible line of input.
    async fn line(&self, prompt: &str) -> Result<String, PromptError>;
}

/// Terminal access for hidden reads.
///
/// `read` blocks and runs off the async runtime. `restore` is called exactly
/// once after every successful `hide`, including when the read is abandoned.
pub trait SecretInput: Send + Sync {
    /// Stop echoing typed characters.
    fn hide(&self) -> io::Result<()>;

    /// Block until a line is entered. Ctrl-C is `ErrorKind::Interrupted`.
    fn read(&self) -> io::Result<Zeroizing<String>>;

    /// Put the terminal back the way `hide` found it.
    fn restore(&self);
}

/// Reads key events with the terminal in raw mode.
#[derive(Default)]
pub struct RawTerminal {
    guard: std::sync::Mutex<Option<RawModeGuard>>,
}

impl SecretInput for RawTerminal {
    fn hide(&self) -> io::Result<()> {
        let entered = RawModeGuard::enter()?;
        let mut guard = self
            .guard
            .lock()
            .map_err(|_| io::Error::other("terminal lock poisoned"))?;
        *guard = Some(entered);
        Ok(())
    }

    fn read(&self) -> io::Result<Zeroizing<String>> {
        let mut secret = Zeroizing::new(String::new());
        loop {
            let Event::Key(KeyEvent {
                code,
                modifiers,
                kind,
                ..
            }) = event::read()?
            else {
                continue;
            };
            if kind == KeyEventKind::Release {
                continue;
            }
            let ctrl = modifiers.contains(KeyModifiers::CONTROL);
            match code {
                KeyCode::Enter => return Ok(secret),
                KeyCode::Char('c') if ctrl => {
                    return Err(io::Error::new(io::ErrorKind::Interrupted, "interrupted"));
                }
                KeyCode::Char('d') if ctrl && secret.is_empty() => {
                    return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "end of input"));
                }
                KeyCode::Char('u') if ctrl => secret.clear(),
                KeyCode::Char(c) if !ctrl => secret.push(c),
                KeyCode::Backspace => {
                    secret.pop();
                }
                _ => {}
            }
        }
    }

    fn restore(&self) {
        match self.guard.lock() {
            Ok(mut guard) => drop(guard.take()),
            Err(_) => debug!("terminal lock poisoned, raw mode left to exit cleanup"),
        }
    }
}

/// Calls [`SecretInput::restore`] when dropped.
struct Restore<'a>(&'a dyn SecretInput);

impl Drop for Restore<'_> {
    fn drop(&mut self) {
        self.0.restore();
    }
}

/// Prompts on the controlling terminal.
///
/// Reads run on the blocking pool and race the cancellation token, so a
/// Ctrl-C during a password prompt unblocks the caller immediately and the
/// terminal is restored before the error is returned. Prompts are
/// serialized so that two concurrent dials never interleave their questions.
pub struct TerminalPrompter {
    cancel: CancellationToken,
    lock: Mutex<()>,
    input: Arc<dyn SecretInput>,
}

impl TerminalPrompter {
    pub fn new(cancel: CancellationToken) -> Self {
        Self {
            cancel,
            lock: Mutex::new(()),
            input: Arc::new(RawTerminal::default()),
        }
    }

    pub fn with_input(mut self, input: Arc<dyn SecretInput>) -> Self {
        self.input = input;
        self
    }

    async fn turn(&self) -> Result<MutexGuard<'_, ()>, PromptError> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(PromptError::Cancelled),
            guard = self.lock.lock() => Ok(guard),
        }
    }

    async fn off_thread<T, F>(&self, read: F) -> Result<T, PromptError>
    where
        T: Send + 'static,
        F: FnOnce() -> io::Result<T> + Send + 'static,
    {
        let handle = tokio::task::spawn_blocking(read);
        tokio::select! {
            biased;
            // The blocking read cannot be interrupted; it is abandoned and
            // finishes (or dies with the process) on its own.
            _ = self.cancel.cancelled() => Err(PromptError::Cancelled),
            joined = handle => match joined {
                Ok(result) => result.map_err(PromptError::from),
                Err(e) => Err(PromptError::Io(io::Error::other(e))),
            }
        }
    }

    async fn blocking<T, F>(&self, read: F) -> Result<T, PromptError>
    where
        T: Send + 'static,
        F: FnOnce() -> io::Result<T> + Send + 'static,
    {
        let _turn = self.turn().await?;
        let result = self.off_thread(read).await;
        if matches!(result, Err(PromptError::Cancelled)) {
            eprintln!();
        }
        result
    }
}

#[async_trait]
impl Prompter for TerminalPrompter {
    async fn secret(&self, prompt: &str) -> Result<Zeroizing<String>, PromptError> {
        let _turn = self.turn().await?;
        {
            let mut stderr = io::stderr();
            write!(stderr, "{prompt}")?;
            stderr.flush()?;
        }

        self.input.hide()?;
        let restore = Restore(self.input.as_ref());
        let input = self.input.clone();
        let result = self.off_thread(move || input.read()).await;
        drop(restore);
        eprintln!();

        match result {
            Err(PromptError::Io(e)) if e.kind() == io::ErrorKind::Interrupted => {
                debug!("interrupted at secret prompt");
                self.cancel.cancel();
                Err(PromptError::Cancelled)
            }
            other => other,
        }
    }

    async fn line(&self, prompt: &str) -> Result<String, PromptError> {
        let prompt = prompt.to_string();
        self.blocking(move || {
            let mut stderr = io::stderr();
            write!(stderr, "{prompt}")?;
            stderr.flush()?;
            let mut line = String::new();
            io::stdin().lock().read_line(&mut line)?;
            Ok(line.trim_end_matches(['\r', '\n']).to_string())
        })
        .await
    }
}
