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

//! Entry resolution.
//!
//! Turns what the user typed into exactly one [`Entry`]. The first of these
//! that is present decides the path taken:
//!
//! 1. an explicit id
//! 2. an explicit address, `[user@]host[:port]`
//! 3. a tag fragment
//! 4. a free-text keyword
//! 5. nothing: pick from every known entry

pub mod picker;
pub mod ssh_config;

use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

use crate::auth::PromptError;
use crate::entry::{Address, Entry, EntryError, Proxy};
use crate::repo::{Repo, RepoError};

pub use picker::{Picker, PromptPicker};
pub use ssh_config::SshConfigError;

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("no entry found for {0}")]
    NotFound(String),

    #[error("no entries stored yet, connect to a host first")]
    NoEntries,

    #[error("invalid selection '{0}'")]
    InvalidSelection(String),

    #[error(transparent)]
    Entry(#[from] EntryError),

    #[error(transparent)]
    Repo(#[from] RepoError),

    #[error(transparent)]
    Prompt(#[from] PromptError),
}

/// What the user asked for on the command line.
#[derive(Debug, Clone, Default)]
pub struct Query {
    pub id: Option<u64>,
    pub address: Option<String>,
    pub tag: Option<String>,
    pub keyword: Option<String>,
    /// `-k`: overrides the key file of whatever entry is resolved.
    pub identity_file: Option<String>,
    /// `-J`: jump chain attached to the resolved entry.
    pub jump: Option<String>,
}

pub struct EntryResolver {
    repo: Arc<dyn Repo>,
    picker: Arc<dyn Picker>,
    /// Read-only entries from `~/.ssh/config`.
    imported: Vec<Entry>,
}

impl EntryResolver {
    pub fn new(repo: Arc<dyn Repo>, picker: Arc<dyn Picker>) -> Self {
        Self {
            repo,
            picker,
            imported: Vec::new(),
        }
    }

    pub fn with_imported(mut self, imported: Vec<Entry>) -> Self {
        self.imported = imported;
        self
    }

    pub fn imported(&self) -> &[Entry] {
        &self.imported
    }

    /// Stored entries in id order, then imported ones.
    pub fn all_entries(&self) -> Result<Vec<Entry>, ResolveError> {
        let mut entries: Vec<Entry> = self.repo.get_all_entries()?.into_values().collect();
        entries.extend(self.imported.iter().cloned());
        Ok(entries)
    }

    pub async fn resolve(&self, query: &Query) -> Result<Entry, ResolveError> {
        let mut entry = if let Some(id) = query.id.filter(|&id| id > 0) {
            self.by_id(id)?
        } else if let Some(address) = non_empty(&query.address) {
            self.by_address(address).await?
        } else if let Some(tag) = non_empty(&query.tag) {
            self.by_tag(tag).await?
        } else if let Some(keyword) = non_empty(&query.keyword) {
            self.by_keyword(keyword).await?
        } else {
            self.pick_from(self.all_entries()?, "select entry").await?
        };

        if let Some(key) = non_empty(&query.identity_file) {
            entry.key_path = key.to_string();
        }
        if let Some(jump) = non_empty(&query.jump) {
            entry.proxy = Proxy::parse_chain(jump)?;
        }
        Ok(entry)
    }

    fn by_id(&self, id: u64) -> Result<Entry, ResolveError> {
        debug!("resolving entry by id {}", id);
        self.repo.get_entry(id).map_err(|e| match e {
            RepoError::NotFound(id) => ResolveError::NotFound(format!("id {id}")),
            other => other.into(),
        })
    }

    async fn by_address(&self, input: &str) -> Result<Entry, ResolveError> {
        let addr = Address::parse(input)?;
        let stored: Vec<Entry> = self.repo.get_all_entries()?.into_values().collect();

        let mut candidates = Vec::new();
        for pool in [stored.as_slice(), self.imported.as_slice()] {
            let (hit, more) = match_address(pool, &addr);
            if let Some(hit) = hit {
                debug!("address {} matched {}", input, hit);
                return Ok(hit);
            }
            candidates.extend(more);
        }

        match candidates.len() {
            0 => {
                debug!("it is a fresh entry");
                Ok(Entry::from_address(&addr)?)
            }
            1 => Ok(candidates.remove(0)),
            _ => {
                self.pick_from(candidates, "multiple entries found, select one")
                    .await
            }
        }
    }

    async fn by_tag(&self, tag: &str) -> Result<Entry, ResolveError> {
        let candidates: Vec<Entry> = self
            .all_entries()?
            .into_iter()
            .filter(|e| e.tags.iter().any(|t| t.contains(tag)))
            .collect();
        match candidates.len() {
            0 => Err(ResolveError::NotFound(format!("tag '{tag}'"))),
            1 => Ok(candidates.into_iter().next().ok_or(ResolveError::NoEntries)?),
            _ => {
                self.pick_from(candidates, "multiple entries found, select one")
                    .await
            }
        }
    }

    async fn by_keyword(&self, keyword: &str) -> Result<Entry, ResolveError> {
        let candidates: Vec<Entry> = self
            .all_entries()?
            .into_iter()
            .filter(|e| e.matches_keyword(keyword))
            .collect();
        match candidates.len() {
            0 => {
                debug!("not found by keyword {:?}, treat it as new entry", keyword);
                Ok(Entry::from_address(&Address::parse(keyword)?)?)
            }
            1 => Ok(candidates.into_iter().next().ok_or(ResolveError::NoEntries)?),
            _ => self.pick_from(candidates, "select entry").await,
        }
    }

    async fn pick_from(&self, mut entries: Vec<Entry>, title: &str) -> Result<Entry, ResolveError> {
        if entries.is_empty() {
            return Err(ResolveError::NoEntries);
        }
        let index = self.picker.pick(title, &entries).await?;
        if index >= entries.len() {
            return Err(ResolveError::InvalidSelection(index.to_string()));
        }
        Ok(entries.swap_remove(index))
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

/// An entry whose host contains the address host and whose user equals the
/// given user is a hit; other host matches are candidates.
fn match_address(pool: &[Entry], addr: &Address) -> (Option<Entry>, Vec<Entry>) {
    let mut candidates = Vec::new();
    for entry in pool.iter().filter(|e| e.host.contains(&addr.host)) {
        if addr.user.as_deref() == Some(entry.user.as_str()) {
            let mut hit = entry.clone();
            if let Some(port) = addr.port {
                hit.port = port.to_string();
            }
            return (Some(hit), Vec::new());
        }
        candidates.push(entry.clone());
    }
    (None, candidates)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::EntrySource;
    use crate::repo::JsonRepo;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Records what it was offered and answers with a fixed index.
    struct FixedPicker {
        choice: usize,
        offered: Mutex<Vec<Vec<String>>>,
    }

    impl FixedPicker {
        fn new(choice: usize) -> Arc<Self> {
            Arc::new(Self {
                choice,
                offered: Mutex::new(Vec::new()),
            })
        }

        fn offered(&self) -> Vec<Vec<String>> {
            self.offered.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Picker for FixedPicker {
        async fn pick(&self, _title: &str, entries: &[Entry]) -> Result<usize, ResolveError> {
            self.offered
                .lock()
                .unwrap()
                .push(entries.iter().map(|e| e.to_string()).collect());
            Ok(self.choice)
        }
    }

    fn stored(repo: &JsonRepo, user: &str, host: &str, tags: &[&str]) -> Entry {
        let mut e = Entry {
            host: host.to_string(),
            user: user.to_string(),
            tags: tags.iter().map(|t| t.to_string()).collect(),
            ..Default::default()
        };
        e.tidy().unwrap();
        repo.touch_entry(&mut e).unwrap();
        e
    }

    fn setup(choice: usize) -> (TempDir, Arc<FixedPicker>, EntryResolver) {
        let dir = TempDir::new().unwrap();
        let repo = JsonRepo::new(dir.path().join("store.json"));
        repo.init().unwrap();
        stored(&repo, "root", "10.0.0.1", &["web", "prod"]);
        stored(&repo, "deploy", "10.0.0.2", &["web"]);
        stored(&repo, "postgres", "db.internal", &["database"]);

        let picker = FixedPicker::new(choice);
        let resolver = EntryResolver::new(Arc::new(repo), picker.clone());
        (dir, picker, resolver)
    }

    fn query() -> Query {
        Query::default()
    }

    #[tokio::test]
    async fn test_id_wins_over_everything() {
        let (_dir, picker, resolver) = setup(0);
        let q = Query {
            id: Some(3),
            address: Some("10.0.0.1".to_string()),
            keyword: Some("web".to_string()),
            ..query()
        };
        let e = resolver.resolve(&q).await.unwrap();
        assert_eq!(e.host, "db.internal");
        assert!(picker.offered().is_empty());
    }

    #[tokio::test]
    async fn test_missing_id() {
        let (_dir, _picker, resolver) = setup(0);
        let q = Query {
            id: Some(99),
            ..query()
        };
        assert!(matches!(
            resolver.resolve(&q).await,
            Err(ResolveError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_address_exact_hit_overrides_port() {
        let (_dir, picker, resolver) = setup(0);
        let q = Query {
            address: Some("deploy@10.0.0:2200".to_string()),
            ..query()
        };
        let e = resolver.resolve(&q).await.unwrap();
        assert_eq!(e.id, 2);
        assert_eq!(e.port, "2200");
        assert!(picker.offered().is_empty());
    }

    #[tokio::test]
    async fn test_address_candidates_go_to_picker() {
        let (_dir, picker, resolver) = setup(1);
        let q = Query {
            address: Some("10.0.0".to_string()),
            ..query()
        };
        let e = resolver.resolve(&q).await.unwrap();
        assert_eq!(e.user, "deploy");
        assert_eq!(picker.offered()[0].len(), 2);
    }

    #[tokio::test]
    async fn test_unknown_address_is_fresh() {
        let (_dir, _picker, resolver) = setup(0);
        let q = Query {
            address: Some("admin@192.168.1.9:2022".to_string()),
            ..query()
        };
        let e = resolver.resolve(&q).await.unwrap();
        assert_eq!(e.id, 0);
        assert_eq!(e.to_string(), "admin@192.168.1.9:2022");
        assert_eq!(e.source, EntrySource::Store);
    }

    #[tokio::test]
    async fn test_tag_lookup() {
        let (_dir, picker, resolver) = setup(0);
        let q = Query {
            tag: Some("data".to_string()),
            ..query()
        };
        assert_eq!(resolver.resolve(&q).await.unwrap().host, "db.internal");

        let q = Query {
            tag: Some("web".to_string()),
            ..query()
        };
        resolver.resolve(&q).await.unwrap();
        assert_eq!(picker.offered()[0].len(), 2);

        let q = Query {
            tag: Some("nope".to_string()),
            ..query()
        };
        assert!(matches!(
            resolver.resolve(&q).await,
            Err(ResolveError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_keyword_is_case_insensitive_and_falls_back() {
        let (_dir, _picker, resolver) = setup(0);
        let q = Query {
            keyword: Some("POSTGRES".to_string()),
            ..query()
        };
        assert_eq!(resolver.resolve(&q).await.unwrap().id, 3);

        let q = Query {
            keyword: Some("bob@fresh.example.com".to_string()),
            ..query()
        };
        let e = resolver.resolve(&q).await.unwrap();
        assert_eq!(e.id, 0);
        assert_eq!(e.user, "bob");

        let q = Query {
            keyword: Some("not an address!".to_string()),
            ..query()
        };
        assert!(matches!(
            resolver.resolve(&q).await,
            Err(ResolveError::Entry(EntryError::InvalidAddress { .. }))
        ));
    }

    #[tokio::test]
    async fn test_no_input_picks_from_all_including_imported() {
        let (_dir, picker, resolver) = setup(3);
        let imported = ssh_config::parse("Host lab\n  HostName lab.local\n").unwrap();
        let resolver = resolver.with_imported(imported);
        let e = resolver.resolve(&query()).await.unwrap();
        assert_eq!(e.host, "lab.local");
        assert_eq!(e.source, EntrySource::SshConfig);
        assert_eq!(picker.offered()[0].len(), 4);
    }

    #[tokio::test]
    async fn test_empty_store_has_nothing_to_pick() {
        let dir = TempDir::new().unwrap();
        let resolver = EntryResolver::new(
            Arc::new(JsonRepo::new(dir.path().join("s.json"))),
            FixedPicker::new(0),
        );
        assert!(matches!(
            resolver.resolve(&query()).await,
            Err(ResolveError::NoEntries)
        ));
    }

    #[tokio::test]
    async fn test_identity_file_and_jump_are_applied() {
        let (_dir, _picker, resolver) = setup(0);
        let q = Query {
            id: Some(1),
            identity_file: Some("~/.ssh/other".to_string()),
            jump: Some("ops@bastion:2222,inner".to_string()),
            ..query()
        };
        let e = resolver.resolve(&q).await.unwrap();
        assert_eq!(e.key_path, "~/.ssh/other");
        assert_eq!(e.proxy.as_ref().unwrap().hop_count(), 2);
    }
}
