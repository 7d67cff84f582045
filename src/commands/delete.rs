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
use tracing::info;

use crate::repo::{Repo, RepoError};

/// Delete every id that exists. Unknown ids are reported and skipped.
pub fn delete_entries(repo: &dyn Repo, ids: &[u64]) -> Result<usize> {
    if ids.is_empty() {
        println!("{}", "no id specified, nothing to delete".dimmed());
        return Ok(0);
    }

    let mut deleted = 0;
    for &id in ids {
        match repo.delete_entry(id) {
            Ok(()) => {
                info!("entry {} deleted", id);
                println!("{} entry {} deleted", "✓".green(), id);
                deleted += 1;
            }
            Err(RepoError::NotFound(_)) => {
                println!("{} no entry with id {}", "!".yellow(), id);
            }
            Err(e) => return Err(e).with_context(|| format!("Failed to delete entry {id}")),
        }
    }
    Ok(deleted)
}
