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

//! Session channels: one-shot command execution and interactive shells.

use russh::client::Handle;
use russh::ChannelMsg;
use std::io::Read;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::channel_error;
use super::handler::ClientHandler;
use crate::ssh::transport::{DynWriter, PtyRequest, TransportError};
use crate::utils::validate_command;

/// Size of chunks read from the local terminal.
const STDIN_CHUNK: usize = 1024;

/// How often the local terminal size is checked while a shell is attached.
const RESIZE_POLL: Duration = Duration::from_millis(250);

/// Execute a remote command, streaming stdout and stderr into the given
/// writers.
///
/// Every invocation is a new shell context on the remote side.
pub(super) async fn exec(
    handle: &Handle<ClientHandler>,
    command: &str,
    stdout: DynWriter<'_>,
    stderr: DynWriter<'_>,
) -> Result<u32, TransportError> {
    let command = validate_command(command).map_err(TransportError::InvalidCommand)?;
    let mut channel = handle
        .channel_open_session()
        .await
        .map_err(channel_error)?;
    channel.exec(true, command).await.map_err(channel_error)?;

    let mut result = None;
    while let Some(msg) = channel.wait().await {
        match msg {
            ChannelMsg::Data { ref data } => stdout.write_all(data).await?,
            ChannelMsg::ExtendedData { ref data, ext } if ext == 1 => {
                stderr.write_all(data).await?
            }
            // The exit status may arrive before the last data; keep reading
            // until the channel closes.
            ChannelMsg::ExitStatus { exit_status } => result = Some(exit_status),
            _ => {}
        }
    }
    stdout.flush().await?;
    stderr.flush().await?;

    result.ok_or_else(|| TransportError::NoExitStatus {
        command: command.to_string(),
    })
}

/// Attach the local terminal to a login shell until the remote side closes.
///
/// The caller is responsible for putting the terminal in raw mode.
pub(super) async fn shell(
    handle: &Handle<ClientHandler>,
    pty: &PtyRequest,
) -> Result<u32, TransportError> {
    let mut channel = handle
        .channel_open_session()
        .await
        .map_err(channel_error)?;
    channel
        .request_pty(false, &pty.term, pty.cols, pty.rows, 0, 0, &[])
        .await
        .map_err(channel_error)?;
    channel.request_shell(false).await.map_err(channel_error)?;
    debug!("shell started ({}x{} {})", pty.cols, pty.rows, pty.term);

    let mut input = spawn_stdin_reader();
    let mut stdin_open = true;
    let mut stdout = tokio::io::stdout();
    let mut size = (pty.cols, pty.rows);
    let mut resize = tokio::time::interval(RESIZE_POLL);
    let mut exit_status = None;

    loop {
        tokio::select! {
            msg = channel.wait() => match msg {
                Some(ChannelMsg::Data { ref data }) => {
                    stdout.write_all(data).await?;
                    stdout.flush().await?;
                }
                Some(ChannelMsg::ExtendedData { ref data, .. }) => {
                    stdout.write_all(data).await?;
                    stdout.flush().await?;
                }
                Some(ChannelMsg::ExitStatus { exit_status: status }) => exit_status = Some(status),
                Some(ChannelMsg::Close) | None => break,
                Some(_) => {}
            },
            data = input.recv(), if stdin_open => match data {
                Some(data) => channel.data(&data[..]).await.map_err(channel_error)?,
                None => {
                    stdin_open = false;
                    channel.eof().await.map_err(channel_error)?;
                }
            },
            _ = resize.tick() => {
                let Ok((cols, rows)) = crossterm::terminal::size() else {
                    continue;
                };
                let current = (u32::from(cols), u32::from(rows));
                if current != size {
                    size = current;
                    if let Err(e) = channel.window_change(size.0, size.1, 0, 0).await {
                        warn!("failed to send window resize to remote: {e}");
                    }
                }
            }
        }
    }

    Ok(exit_status.unwrap_or(0))
}

/// Read raw bytes from stdin on a detached thread.
///
/// A blocking stdin read cannot be interrupted, so the thread is not joined;
/// it ends with the next keystroke after the receiver is dropped.
fn spawn_stdin_reader() -> mpsc::Receiver<Vec<u8>> {
    let (tx, rx) = mpsc::channel(64);
    std::thread::spawn(move || {
        let mut stdin = std::io::stdin();
        let mut buf = [0u8; STDIN_CHUNK];
        loop {
            match stdin.read(&mut buf) {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    if tx.blocking_send(buf[..n].to_vec()).is_err() {
                        break;
                    }
                }
            }
        }
    });
    rx
}
