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

//! Bounded in-memory byte pipe with force-close from either side.
//!
//! [`pipe`] returns a writer, a reader and a closer. The closer can fail
//! either end with a reason at any time; a task blocked on the pipe is woken
//! and gets an error. The reader sees end-of-file only after the writer has
//! been shut down cleanly. A writer dropped without shutdown is an error for
//! the reader, never a silent truncation.

use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{ready, Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::sync::mpsc;
use tokio_util::sync::{CancellationToken, PollSender, WaitForCancellationFutureOwned};

/// Default number of in-flight chunks.
pub const DEFAULT_CAPACITY: usize = 16;

/// Largest chunk a single write moves into the pipe.
const MAX_CHUNK: usize = 64 * 1024;

#[derive(Default)]
struct Shared {
    reader_closed: CancellationToken,
    writer_closed: CancellationToken,
    /// Fired after either side is closed; used only for wakeups.
    any_closed: CancellationToken,
    reader_reason: Mutex<Option<String>>,
    writer_reason: Mutex<Option<String>>,
}

impl Shared {
    fn close(&self, token: &CancellationToken, slot: &Mutex<Option<String>>, reason: String) {
        if let Ok(mut slot) = slot.lock() {
            slot.get_or_insert(reason);
        }
        token.cancel();
        self.any_closed.cancel();
    }

    fn close_reader(&self, reason: String) {
        self.close(&self.reader_closed, &self.reader_reason, reason);
    }

    fn close_writer(&self, reason: String) {
        self.close(&self.writer_closed, &self.writer_reason, reason);
    }

    fn error(slot: &Mutex<Option<String>>, side: &str) -> io::Error {
        let reason = slot
            .lock()
            .ok()
            .and_then(|s| s.clone())
            .unwrap_or_else(|| format!("pipe {side} closed"));
        io::Error::new(io::ErrorKind::BrokenPipe, reason)
    }

    fn reader_error(&self) -> io::Error {
        Self::error(&self.reader_reason, "reader")
    }

    fn writer_error(&self) -> io::Error {
        Self::error(&self.writer_reason, "writer")
    }

    /// Error for whichever side has been force-closed, reader first.
    fn closed_error(&self) -> Option<io::Error> {
        if self.reader_closed.is_cancelled() {
            Some(self.reader_error())
        } else if self.writer_closed.is_cancelled() {
            Some(self.writer_error())
        } else {
            None
        }
    }
}

/// Create a pipe holding at most `capacity` chunks in flight.
pub fn pipe(capacity: usize) -> (PipeWriter, PipeReader, PipeCloser) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let shared = Arc::new(Shared::default());
    let writer = PipeWriter {
        tx: PollSender::new(tx),
        wake: Box::pin(shared.any_closed.clone().cancelled_owned()),
        shared: shared.clone(),
        finished: false,
    };
    let reader = PipeReader {
        rx,
        pending: Vec::new(),
        pos: 0,
        wake: Box::pin(shared.any_closed.clone().cancelled_owned()),
        shared: shared.clone(),
    };
    (writer, reader, PipeCloser { shared })
}

/// Force-closes pipe ends; cheap to clone.
#[derive(Clone)]
pub struct PipeCloser {
    shared: Arc<Shared>,
}

impl PipeCloser {
    /// Fail the reading side. Pending and future reads and writes error.
    pub fn close_reader(&self, reason: impl Into<String>) {
        self.shared.close_reader(reason.into());
    }

    /// Fail the writing side. Pending and future writes and reads error.
    pub fn close_writer(&self, reason: impl Into<String>) {
        self.shared.close_writer(reason.into());
    }

    pub fn is_reader_closed(&self) -> bool {
        self.shared.reader_closed.is_cancelled()
    }

    pub fn is_writer_closed(&self) -> bool {
        self.shared.writer_closed.is_cancelled()
    }
}

pub struct PipeWriter {
    tx: PollSender<Vec<u8>>,
    wake: Pin<Box<WaitForCancellationFutureOwned>>,
    shared: Arc<Shared>,
    finished: bool,
}

impl PipeWriter {
    /// Abort the stream: the reader gets `reason` as an error instead of
    /// end-of-file.
    pub fn close_with_error(&mut self, reason: impl Into<String>) {
        self.shared.close_writer(reason.into());
        self.tx.close();
    }
}

impl Drop for PipeWriter {
    fn drop(&mut self) {
        if !self.finished {
            if let Ok(mut slot) = self.shared.writer_reason.lock() {
                slot.get_or_insert_with(|| "pipe writer dropped before completion".to_string());
            }
        }
    }
}

impl AsyncWrite for PipeWriter {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        if let Some(err) = this.shared.closed_error() {
            return Poll::Ready(Err(err));
        }
        if buf.is_empty() {
            return Poll::Ready(Ok(0));
        }

        match this.tx.poll_reserve(cx) {
            Poll::Ready(Ok(())) => {}
            Poll::Ready(Err(_)) => {
                return Poll::Ready(Err(io::Error::new(
                    io::ErrorKind::BrokenPipe,
                    "pipe reader dropped",
                )))
            }
            Poll::Pending => {
                ready!(this.wake.as_mut().poll(cx));
                let err = this
                    .shared
                    .closed_error()
                    .unwrap_or_else(|| this.shared.reader_error());
                return Poll::Ready(Err(err));
            }
        }

        let n = buf.len().min(MAX_CHUNK);
        this.tx
            .send_item(buf[..n].to_vec())
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "pipe reader dropped"))?;
        Poll::Ready(Ok(n))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.shared.closed_error() {
            Some(err) => Poll::Ready(Err(err)),
            None => Poll::Ready(Ok(())),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if let Some(err) = this.shared.closed_error() {
            return Poll::Ready(Err(err));
        }
        this.finished = true;
        this.tx.close();
        Poll::Ready(Ok(()))
    }
}

pub struct PipeReader {
    rx: mpsc::Receiver<Vec<u8>>,
    pending: Vec<u8>,
    pos: usize,
    wake: Pin<Box<WaitForCancellationFutureOwned>>,
    shared: Arc<Shared>,
}

impl PipeReader {
    fn copy_pending(&mut self, out: &mut ReadBuf<'_>) {
        let n = (self.pending.len() - self.pos).min(out.remaining());
        out.put_slice(&self.pending[self.pos..self.pos + n]);
        self.pos += n;
        if self.pos == self.pending.len() {
            self.pending.clear();
            self.pos = 0;
        }
    }
}

impl AsyncRead for PipeReader {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        out: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if this.shared.reader_closed.is_cancelled() {
            return Poll::Ready(Err(this.shared.reader_error()));
        }
        if this.pos < this.pending.len() {
            this.copy_pending(out);
            return Poll::Ready(Ok(()));
        }

        match this.rx.poll_recv(cx) {
            Poll::Ready(Some(chunk)) => {
                this.pending = chunk;
                this.pos = 0;
                this.copy_pending(out);
                Poll::Ready(Ok(()))
            }
            Poll::Ready(None) => {
                let failed = this
                    .shared
                    .writer_reason
                    .lock()
                    .map(|s| s.is_some())
                    .unwrap_or(true);
                if failed || this.shared.writer_closed.is_cancelled() {
                    Poll::Ready(Err(this.shared.writer_error()))
                } else {
                    Poll::Ready(Ok(()))
                }
            }
            Poll::Pending => {
                if let Some(err) = this.shared.closed_error() {
                    return Poll::Ready(Err(err));
                }
                ready!(this.wake.as_mut().poll(cx));
                let err = this
                    .shared
                    .closed_error()
                    .unwrap_or_else(|| this.shared.writer_error());
                Poll::Ready(Err(err))
            }
        }
    }
}
