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

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::resolver::{EntryResolver, Query};
use crate::session::Orchestrator;

/// Resolve the target, log in and run `command` or an interactive shell.
/// Returns the remote exit status.
pub async fn connect(
    resolver: &EntryResolver,
    orchestrator: &Orchestrator,
    query: &Query,
    command: Option<&str>,
    cancel: &CancellationToken,
) -> Result<u32> {
    let mut entry = resolver
        .resolve(query)
        .await
        .context("Failed to resolve target")?;
    let target = entry.to_string();
    debug!("target resolved to {} (id {})", target, entry.id);

    let status = orchestrator
        .run(&mut entry, command, cancel)
        .await
        .with_context(|| format!("Session to {target} failed"))?;
    debug!("{} exited with status {}", target, status);
    Ok(status)
}
