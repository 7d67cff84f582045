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

use anyhow::{bail, Context, Result};

use crate::entry::Entry;
use crate::resolver::{EntryResolver, Query};

/// Print the resolved entry as JSON with secrets masked.
pub async fn show_info(resolver: &EntryResolver, query: &Query) -> Result<()> {
    let entry = resolver
        .resolve(query)
        .await
        .context("Failed to resolve entry")?;
    println!("{}", render(&entry, query.keyword.as_deref())?);
    Ok(())
}

fn render(entry: &Entry, keyword: Option<&str>) -> Result<String> {
    if let Some(keyword) = keyword.filter(|_| !entry.is_persisted()) {
        bail!("no saved entry matches {keyword:?}");
    }
    Ok(entry.to_json_pretty()?)
}
