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

//! Probes run on remote hosts before a transfer.

use tracing::debug;

use crate::ssh::transport::{Transport, TransportError};
use crate::utils::{base_name, join_remote, shell_quote_path};

/// Size and permission bits of a remote file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemoteStat {
    pub size: u64,
    pub mode: u32,
}

/// Stat a remote file with GNU `stat`, falling back to the BSD flavour.
pub async fn stat(transport: &dyn Transport, path: &str) -> Result<RemoteStat, TransportError> {
    let quoted = shell_quote_path(path);
    let command =
        format!("stat -c '%s %a' {quoted} 2>/dev/null || stat -f '%z %Lp' {quoted}");
    let output = transport.run(&command).await?;
    if !output.success() {
        return Err(TransportError::Sftp {
            path: path.to_string(),
            message: format!("cannot stat: {}", output.stderr_str().trim()),
        });
    }
    parse_stat(&output.stdout_str()).ok_or_else(|| TransportError::Sftp {
        path: path.to_string(),
        message: format!("unexpected stat output: {:?}", output.stdout_str().trim()),
    })
}

/// Parse `"<size> <octal mode>"`.
pub fn parse_stat(output: &str) -> Option<RemoteStat> {
    let mut fields = output.split_whitespace();
    let size = fields.next()?.parse().ok()?;
    let mode = u32::from_str_radix(fields.next()?, 8).ok()?;
    Some(RemoteStat { size, mode })
}

pub async fn is_dir(transport: &dyn Transport, path: &str) -> Result<bool, TransportError> {
    let command = format!(
        "test -d {} && echo dir || echo notdir",
        shell_quote_path(path)
    );
    let output = transport.run(&command).await?;
    Ok(output.stdout_str().trim() == "dir")
}

/// Where a file named after `src_path` lands when copied to `dst_path`:
/// inside it when it is an existing directory, at it otherwise.
pub async fn resolve_destination(
    transport: &dyn Transport,
    dst_path: &str,
    src_path: &str,
) -> Result<String, TransportError> {
    if is_dir(transport, dst_path).await? {
        let resolved = join_remote(dst_path, base_name(src_path));
        debug!("{} is a directory, writing to {}", dst_path, resolved);
        Ok(resolved)
    } else {
        Ok(dst_path.to_string())
    }
}
