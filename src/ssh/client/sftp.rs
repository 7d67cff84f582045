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

//! Streaming SFTP file transfer.
//!
//! Some sshd_config does not enable sftp by default. A line like
//! `Subsystem sftp internal-sftp` is needed on the remote machine.

use russh::client::Handle;
use russh_sftp::client::SftpSession;
use russh_sftp::protocol::{FileAttributes, OpenFlags};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::debug;

use super::channel_error;
use super::handler::ClientHandler;
use crate::ssh::transport::{DynReader, DynWriter, TransportError};

const TRANSFER_BUFFER_SIZE: usize = 32 * 1024;

fn sftp_error(path: &str, e: impl std::fmt::Display) -> TransportError {
    TransportError::Sftp {
        path: path.to_string(),
        message: e.to_string(),
    }
}

/// SFTP resolves relative paths against the login directory, so `~/x`
/// becomes `x` and `~` becomes `.`.
fn sftp_path(path: &str) -> &str {
    match path {
        "~" | "~/" => ".",
        _ => path.strip_prefix("~/").unwrap_or(path),
    }
}

async fn open_session(
    handle: &Handle<ClientHandler>,
    path: &str,
) -> Result<SftpSession, TransportError> {
    let channel = handle
        .channel_open_session()
        .await
        .map_err(channel_error)?;
    channel
        .request_subsystem(true, "sftp")
        .await
        .map_err(channel_error)?;
    SftpSession::new(channel.into_stream())
        .await
        .map_err(|e| sftp_error(path, e))
}

/// Stream a remote file into `sink`.
///
/// Read failures are reported as [`TransportError::Sftp`]; failures writing
/// to `sink` surface as [`TransportError::Io`].
pub(super) async fn download(
    handle: &Handle<ClientHandler>,
    path: &str,
    sink: DynWriter<'_>,
) -> Result<u64, TransportError> {
    let sftp = open_session(handle, path).await?;
    let mut file = sftp
        .open(sftp_path(path))
        .await
        .map_err(|e| sftp_error(path, e))?;

    let mut buf = vec![0u8; TRANSFER_BUFFER_SIZE];
    let mut total = 0u64;
    loop {
        let n = file.read(&mut buf).await.map_err(|e| sftp_error(path, e))?;
        if n == 0 {
            break;
        }
        sink.write_all(&buf[..n]).await?;
        total += n as u64;
    }
    sink.flush().await?;

    if let Err(e) = sftp.close().await {
        debug!("closing sftp session after reading {}: {}", path, e);
    }
    Ok(total)
}

/// Create or truncate a remote file with permission bits `mode` and fill it
/// from `source`.
pub(super) async fn upload(
    handle: &Handle<ClientHandler>,
    path: &str,
    mode: u32,
    source: DynReader<'_>,
) -> Result<u64, TransportError> {
    let sftp = open_session(handle, path).await?;
    let mut attrs = FileAttributes::empty();
    attrs.permissions = Some(mode);
    let mut file = sftp
        .open_with_flags_and_attributes(
            sftp_path(path),
            OpenFlags::CREATE | OpenFlags::TRUNCATE | OpenFlags::WRITE,
            attrs.clone(),
        )
        .await
        .map_err(|e| sftp_error(path, e))?;

    let mut buf = vec![0u8; TRANSFER_BUFFER_SIZE];
    let mut total = 0u64;
    loop {
        let n = source.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        file.write_all(&buf[..n])
            .await
            .map_err(|e| sftp_error(path, e))?;
        total += n as u64;
    }
    file.flush().await.map_err(|e| sftp_error(path, e))?;
    file.shutdown().await.map_err(|e| sftp_error(path, e))?;

    // The mode given at creation is subject to the server's umask.
    if let Err(e) = sftp.set_metadata(sftp_path(path), attrs).await {
        debug!("cannot set mode {:o} on {}: {}", mode, path, e);
    }
    if let Err(e) = sftp.close().await {
        debug!("closing sftp session after writing {}: {}", path, e);
    }
    Ok(total)
}
