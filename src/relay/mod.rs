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

//! Remote-to-remote streaming relay.
//!
//! Bytes are downloaded from one transport and uploaded to another through
//! a bounded in-process [`pipe`]. Nothing touches the local disk.
//!
//! The two transfer tasks are coupled through the pipe: when one fails it
//! force-closes the opposite end so the other fails fast instead of
//! blocking. A failing task first marks its own side closed and only then
//! the opposite one, so the other task can tell whether its own error was
//! *induced*: the opposite end had already been force-closed when it
//! arrived. The reported error is the primary one; when both or neither
//! are induced, the source error wins.

pub mod pipe;
pub mod remote;

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::ssh::transport::{Transport, TransportError};
pub use pipe::{pipe, PipeCloser, PipeReader, PipeWriter};
pub use remote::RemoteStat;

/// How long the surviving side may take to settle after the other failed.
const SETTLE_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("source {path}: {source}")]
    Source {
        path: String,
        source: TransportError,
    },

    #[error("destination {path}: {source}")]
    Destination {
        path: String,
        source: TransportError,
    },

    #[error("transfer cancelled")]
    Cancelled,
}

/// Summary of a completed relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayReport {
    pub source: String,
    /// Final destination path, after directory resolution.
    pub destination: String,
    pub bytes: u64,
    pub mode: u32,
}

/// What one transfer task reports back.
#[derive(Debug)]
struct Outcome {
    result: Result<u64, TransportError>,
    induced: bool,
}

impl Outcome {
    fn lost(side: &str) -> Self {
        Self {
            result: Err(TransportError::Channel(format!("{side} task ended unexpectedly"))),
            induced: false,
        }
    }
}

/// Stream `src_path` on `src` to `dst_path` on `dst`.
///
/// If `dst_path` is an existing directory the source basename is appended.
/// The destination is created with the source's permission bits. A failed
/// transfer may leave a partial destination file behind.
pub async fn relay_remote_to_remote(
    cancel: &CancellationToken,
    src: Arc<dyn Transport>,
    src_path: &str,
    dst: Arc<dyn Transport>,
    dst_path: &str,
) -> Result<RelayReport, RelayError> {
    relay_with_capacity(cancel, src, src_path, dst, dst_path, pipe::DEFAULT_CAPACITY).await
}

pub async fn relay_with_capacity(
    cancel: &CancellationToken,
    src: Arc<dyn Transport>,
    src_path: &str,
    dst: Arc<dyn Transport>,
    dst_path: &str,
    capacity: usize,
) -> Result<RelayReport, RelayError> {
    let source_err = |source| RelayError::Source {
        path: src_path.to_string(),
        source,
    };

    let stat = guarded(cancel, remote::stat(src.as_ref(), src_path))
        .await?
        .map_err(source_err)?;
    debug!("source {} is {} bytes, mode {:o}", src_path, stat.size, stat.mode);

    let destination = guarded(
        cancel,
        remote::resolve_destination(dst.as_ref(), dst_path, src_path),
    )
    .await?
    .map_err(|source| RelayError::Destination {
        path: dst_path.to_string(),
        source,
    })?;

    info!(
        "relaying {}:{} -> {}:{}",
        src.peer(),
        src_path,
        dst.peer(),
        destination
    );

    let (writer, reader, closer) = pipe::pipe(capacity);
    let (download_tx, download_rx) = oneshot::channel();
    let (upload_tx, upload_rx) = oneshot::channel();
    let download = spawn_download(
        src,
        src_path.to_string(),
        writer,
        closer.clone(),
        download_tx,
    );
    let upload = spawn_upload(
        dst,
        destination.clone(),
        stat.mode,
        reader,
        closer.clone(),
        upload_tx,
    );

    let (download_outcome, upload_outcome) =
        match collect(cancel, download_rx, upload_rx, &download, &upload).await {
            Some(outcomes) => outcomes,
            None => {
                closer.close_reader("transfer cancelled");
                closer.close_writer("transfer cancelled");
                download.abort();
                upload.abort();
                return Err(RelayError::Cancelled);
            }
        };

    match attribute(download_outcome, upload_outcome) {
        Ok(bytes) => {
            info!("relayed {} bytes to {}", bytes, destination);
            Ok(RelayReport {
                source: src_path.to_string(),
                destination,
                bytes,
                mode: stat.mode,
            })
        }
        Err(Side::Source(source)) => Err(RelayError::Source {
            path: src_path.to_string(),
            source,
        }),
        Err(Side::Destination(source)) => Err(RelayError::Destination {
            path: destination,
            source,
        }),
    }
}

/// Run a probe unless cancellation fires first.
async fn guarded<T>(
    cancel: &CancellationToken,
    fut: impl std::future::Future<Output = T>,
) -> Result<T, RelayError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(RelayError::Cancelled),
        value = fut => Ok(value),
    }
}

fn spawn_download(
    src: Arc<dyn Transport>,
    path: String,
    mut writer: PipeWriter,
    closer: PipeCloser,
    done: oneshot::Sender<Outcome>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut result = src.download(&path, &mut writer).await;
        if result.is_ok() {
            if let Err(e) = writer.shutdown().await {
                result = Err(e.into());
            }
        }
        let induced = match &result {
            Ok(_) => false,
            Err(e) => {
                let induced = closer.is_reader_closed();
                debug!("download of {} failed (induced: {}): {}", path, induced, e);
                writer.close_with_error(format!("source failed: {e}"));
                closer.close_reader(format!("source failed: {e}"));
                induced
            }
        };
        let _ = done.send(Outcome { result, induced });
    })
}

fn spawn_upload(
    dst: Arc<dyn Transport>,
    path: String,
    mode: u32,
    mut reader: PipeReader,
    closer: PipeCloser,
    done: oneshot::Sender<Outcome>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let result = dst.upload(&path, mode, &mut reader).await;
        let induced = match &result {
            Ok(_) => false,
            Err(e) => {
                let induced = closer.is_writer_closed();
                debug!("upload to {} failed (induced: {}): {}", path, induced, e);
                closer.close_reader(format!("destination failed: {e}"));
                closer.close_writer(format!("destination failed: {e}"));
                induced
            }
        };
        drop(reader);
        let _ = done.send(Outcome { result, induced });
    })
}

/// Wait for both outcomes. Returns `None` on cancellation.
///
/// Once one side has failed the other gets [`SETTLE_TIMEOUT`] to report;
/// a side that never settles is aborted and counted as induced.
async fn collect(
    cancel: &CancellationToken,
    mut download_rx: oneshot::Receiver<Outcome>,
    mut upload_rx: oneshot::Receiver<Outcome>,
    download: &JoinHandle<()>,
    upload: &JoinHandle<()>,
) -> Option<(Outcome, Outcome)> {
    let mut download_outcome: Option<Outcome> = None;
    let mut upload_outcome: Option<Outcome> = None;

    while download_outcome.is_none() || upload_outcome.is_none() {
        let failed = download_outcome
            .as_ref()
            .or(upload_outcome.as_ref())
            .is_some_and(|o| o.result.is_err());
        let settle = async {
            if failed {
                tokio::time::sleep(SETTLE_TIMEOUT).await
            } else {
                std::future::pending::<()>().await
            }
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return None,
            outcome = &mut download_rx, if download_outcome.is_none() => {
                download_outcome = Some(outcome.unwrap_or_else(|_| Outcome::lost("download")));
            }
            outcome = &mut upload_rx, if upload_outcome.is_none() => {
                upload_outcome = Some(outcome.unwrap_or_else(|_| Outcome::lost("upload")));
            }
            _ = settle => {
                warn!("transfer side did not settle after failure, aborting it");
                let stalled = Outcome {
                    result: Err(TransportError::Channel("aborted after peer failure".to_string())),
                    induced: true,
                };
                if download_outcome.is_none() {
                    download.abort();
                    download_outcome = Some(stalled);
                } else {
                    upload.abort();
                    upload_outcome = Some(stalled);
                }
            }
        }
    }

    download_outcome.zip(upload_outcome)
}

#[derive(Debug)]
enum Side {
    Source(TransportError),
    Destination(TransportError),
}

/// Decide the relay result from both outcomes.
fn attribute(download: Outcome, upload: Outcome) -> Result<u64, Side> {
    match (download.result, upload.result) {
        (Ok(_), Ok(written)) => Ok(written),
        (Err(src), Ok(_)) => Err(Side::Source(src)),
        (Ok(_), Err(dst)) => Err(Side::Destination(dst)),
        (Err(src), Err(dst)) => {
            if download.induced && !upload.induced {
                Err(Side::Destination(dst))
            } else {
                Err(Side::Source(src))
            }
        }
    }
}
