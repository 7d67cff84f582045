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

//! Choosing one entry out of several.

use async_trait::async_trait;
use owo_colors::OwoColorize;
use std::sync::Arc;

use super::ResolveError;
use crate::auth::Prompter;
use crate::entry::Entry;

#[async_trait]
pub trait Picker: Send + Sync {
    /// Return the index of the chosen entry in `entries` (never empty).
    async fn pick(&self, title: &str, entries: &[Entry]) -> Result<usize, ResolveError>;
}

/// Numbered list on stderr, answered through a [`Prompter`].
///
/// A number selects by position. Any other text narrows the list to the
/// entries containing it and asks again.
pub struct PromptPicker {
    prompter: Arc<dyn Prompter>,
}

impl PromptPicker {
    pub fn new(prompter: Arc<dyn Prompter>) -> Self {
        Self { prompter }
    }
}

fn label(entry: &Entry) -> String {
    if entry.tags.is_empty() {
        entry.to_string()
    } else {
        format!("{} {}", entry, format!("[{}]", entry.tags.join(", ")).dimmed())
    }
}

#[async_trait]
impl Picker for PromptPicker {
    async fn pick(&self, title: &str, entries: &[Entry]) -> Result<usize, ResolveError> {
        let mut visible: Vec<usize> = (0..entries.len()).collect();
        loop {
            eprintln!("{}", title.bold());
            for (n, &index) in visible.iter().enumerate() {
                eprintln!("  {:>3}) {}", (n + 1).green(), label(&entries[index]));
            }

            let answer = self
                .prompter
                .line(&format!("select entry [1-{}]: ", visible.len()))
                .await?;
            let answer = answer.trim();

            if let Ok(n) = answer.parse::<usize>() {
                if (1..=visible.len()).contains(&n) {
                    return Ok(visible[n - 1]);
                }
                return Err(ResolveError::InvalidSelection(answer.to_string()));
            }
            if answer.is_empty() {
                continue;
            }

            let narrowed: Vec<usize> = visible
                .iter()
                .copied()
                .filter(|&i| entries[i].matches_keyword(answer))
                .collect();
            match narrowed.len() {
                0 => return Err(ResolveError::InvalidSelection(answer.to_string())),
                1 => return Ok(narrowed[0]),
                _ => visible = narrowed,
            }
        }
    }
}
