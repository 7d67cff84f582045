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
use owo_colors::OwoColorize;
use tokio_util::sync::CancellationToken;

use crate::copy::{Copier, CopyReport, CopyRequest};
use crate::resolver::EntryResolver;
use crate::session::Orchestrator;
use crate::utils::format_bytes;

pub async fn copy_file(
    resolver: &EntryResolver,
    orchestrator: &Orchestrator,
    request: &CopyRequest,
    cancel: &CancellationToken,
) -> Result<CopyReport> {
    let report = Copier::new(resolver, orchestrator)
        .copy(request, cancel)
        .await
        .with_context(|| format!("Failed to copy {} to {}", request.source, request.target))?;

    println!(
        "{} {} {} {} {}",
        "✓".green(),
        report.from,
        "→".dimmed(),
        report.to,
        format!("({})", format_bytes(report.bytes)).dimmed()
    );
    Ok(report)
}
