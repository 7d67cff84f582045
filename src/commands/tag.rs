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
use owo_colors::OwoColorize;
use tracing::debug;

use crate::entry::Entry;
use crate::repo::Repo;

/// Delete, then append tags on entry `id` and save it.
pub fn update_tags(repo: &dyn Repo, id: u64, add: &[String], delete: &[String]) -> Result<Entry> {
    if add.is_empty() && delete.is_empty() {
        bail!("no tag specified, use -t to add or -d to delete");
    }

    let mut entry = repo
        .get_entry(id)
        .with_context(|| format!("Failed to load entry {id}"))?;
    debug!("tags of {} before: {:?}", id, entry.tags);
    remove_tags(&mut entry.tags, delete);
    union_tags(&mut entry.tags, add);
    repo.touch_entry(&mut entry)
        .with_context(|| format!("Failed to save entry {id}"))?;

    println!(
        "{} {} {}",
        "✓".green(),
        entry.to_string().bold(),
        format!("[{}]", entry.tags.join(",")).dimmed()
    );
    Ok(entry)
}

/// Append tags not already present, keeping first-seen order.
fn union_tags(tags: &mut Vec<String>, add: &[String]) {
    for tag in add.iter().map(|t| t.trim()).filter(|t| !t.is_empty()) {
        if !tags.iter().any(|t| t == tag) {
            tags.push(tag.to_string());
        }
    }
}

fn remove_tags(tags: &mut Vec<String>, delete: &[String]) {
    tags.retain(|t| !delete.iter().any(|d| d.trim() == t));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repo::JsonRepo;
    use tempfile::TempDir;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_union_keeps_order_and_skips_duplicates() {
        let mut tags = strings(&["prod", "db"]);
        union_tags(&mut tags, &strings(&["db", "eu", "prod", " ", "eu"]));
        assert_eq!(tags, strings(&["prod", "db", "eu"]));
    }

    #[test]
    fn test_remove_tags() {
        let mut tags = strings(&["prod", "db", "eu"]);
        remove_tags(&mut tags, &strings(&["db", "missing"]));
        assert_eq!(tags, strings(&["prod", "eu"]));
    }

    #[test]
    fn test_update_tags_persists() {
        let dir = TempDir::new().unwrap();
        let repo = JsonRepo::new(dir.path().join("store.json"));
        repo.init().unwrap();
        let mut e = Entry {
            host: "db.lan".to_string(),
            tags: strings(&["staging"]),
            ..Default::default()
        };
        e.tidy().unwrap();
        repo.touch_entry(&mut e).unwrap();

        update_tags(&repo, e.id, &strings(&["prod"]), &strings(&["staging"])).unwrap();
        assert_eq!(repo.get_entry(e.id).unwrap().tags, strings(&["prod"]));

        assert!(update_tags(&repo, e.id, &[], &[]).is_err());
        assert!(update_tags(&repo, 42, &strings(&["x"]), &[]).is_err());
    }
}
