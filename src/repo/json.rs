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

//! JSON file store.
//!
//! The whole store is one pretty-printed JSON document, read on every call
//! and replaced atomically (temporary file plus rename) on every write.

use chrono::Utc;
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
#[cfg(unix)]
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use tracing::debug;

use super::{Repo, RepoError, Sealer, DEVICE_ID_KEY, NEXT_ID_KEY};
use crate::entry::{Entry, EntrySource};

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreFile {
    #[serde(default)]
    metadata: BTreeMap<String, String>,
    #[serde(default)]
    entries: BTreeMap<u64, Entry>,
}

#[derive(Debug)]
pub struct JsonRepo {
    path: PathBuf,
    sealer: OnceCell<Sealer>,
}

impl JsonRepo {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        debug!("json repo at {}", path.display());
        Self {
            path,
            sealer: OnceCell::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, source: std::io::Error) -> RepoError {
        RepoError::Io {
            path: self.path.clone(),
            source,
        }
    }

    fn load(&self) -> Result<StoreFile, RepoError> {
        if !self.path.exists() {
            return Ok(StoreFile::default());
        }
        let content = fs::read_to_string(&self.path).map_err(|e| self.io_error(e))?;
        if content.trim().is_empty() {
            return Ok(StoreFile::default());
        }
        serde_json::from_str(&content).map_err(|source| RepoError::Corrupted {
            path: self.path.clone(),
            source,
        })
    }

    fn save(&self, store: &StoreFile) -> Result<(), RepoError> {
        let content = serde_json::to_string_pretty(store).map_err(|source| {
            RepoError::Corrupted {
                path: self.path.clone(),
                source,
            }
        })?;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| self.io_error(e))?;
        }

        let mut tmp_name = self.path.as_os_str().to_owned();
        tmp_name.push(".tmp");
        let tmp_path = PathBuf::from(tmp_name);

        let mut options = OpenOptions::new();
        options.create(true).write(true).truncate(true);
        #[cfg(unix)]
        options.mode(0o600);
        let mut file = options.open(&tmp_path).map_err(|e| self.io_error(e))?;
        file.write_all(content.as_bytes())
            .and_then(|_| file.sync_all())
            .map_err(|e| self.io_error(e))?;
        drop(file);
        fs::rename(&tmp_path, &self.path).map_err(|e| self.io_error(e))
    }

    /// The sealer for this store, creating the device id on first use.
    fn sealer(&self) -> Result<&Sealer, RepoError> {
        self.sealer.get_or_try_init(|| {
            let mut store = self.load()?;
            let device_id = match store.metadata.get(DEVICE_ID_KEY) {
                Some(id) => id.clone(),
                None => {
                    let id = uuid::Uuid::new_v4().to_string();
                    debug!("generated device id for {}", self.path.display());
                    store.metadata.insert(DEVICE_ID_KEY.to_string(), id.clone());
                    self.save(&store)?;
                    id
                }
            };
            Sealer::from_device_id(&device_id)
        })
    }

    fn open_secrets(&self, mut entry: Entry) -> Result<Entry, RepoError> {
        let sealer = self.sealer()?;
        entry.password = sealer.open(&entry.password);
        entry.passphrase = sealer.open(&entry.passphrase);
        Ok(entry)
    }

    fn seal_secrets(&self, entry: &Entry) -> Result<Entry, RepoError> {
        let sealer = self.sealer()?;
        let mut sealed = entry.clone();
        sealed.password = sealer.seal(&entry.password)?;
        sealed.passphrase = sealer.seal(&entry.passphrase)?;
        Ok(sealed)
    }
}

impl Repo for JsonRepo {
    fn init(&self) -> Result<(), RepoError> {
        self.sealer().map(drop)
    }

    fn get_entry(&self, id: u64) -> Result<Entry, RepoError> {
        debug!("json repo: get entry by id: {}", id);
        let mut store = self.load()?;
        let entry = store.entries.remove(&id).ok_or(RepoError::NotFound(id))?;
        self.open_secrets(entry)
    }

    fn get_all_entries(&self) -> Result<BTreeMap<u64, Entry>, RepoError> {
        debug!("json repo: get all entries");
        self.load()?
            .entries
            .into_iter()
            .map(|(id, entry)| Ok((id, self.open_secrets(entry)?)))
            .collect()
    }

    fn touch_entry(&self, entry: &mut Entry) -> Result<(), RepoError> {
        debug!("json repo: touch entry: {}", entry.id);
        // Resolve the sealer first: it may write the device id.
        self.sealer()?;
        let mut store = self.load()?;
        let now = Utc::now();

        match store.entries.get(&entry.id).filter(|_| entry.id > 0) {
            Some(existing) => {
                entry.visit_count = existing.visit_count + 1;
                entry.created_at = existing.created_at;
                entry.updated_at = Some(now);
            }
            None => {
                let highest = store.entries.keys().next_back().copied().unwrap_or(0);
                let next = store
                    .metadata
                    .get(NEXT_ID_KEY)
                    .and_then(|v| v.parse::<u64>().ok())
                    .unwrap_or(1);
                entry.id = next.max(highest + 1);
                store
                    .metadata
                    .insert(NEXT_ID_KEY.to_string(), (entry.id + 1).to_string());
                entry.visit_count = 1;
                entry.created_at = Some(now);
                entry.updated_at = Some(now);
            }
        }
        entry.source = EntrySource::Store;

        let sealed = self.seal_secrets(entry)?;
        store.entries.insert(entry.id, sealed);
        self.save(&store)
    }

    fn delete_entry(&self, id: u64) -> Result<(), RepoError> {
        debug!("json repo: delete entry: {}", id);
        let mut store = self.load()?;
        if store.entries.remove(&id).is_none() {
            return Err(RepoError::NotFound(id));
        }
        self.save(&store)
    }

    fn set_metadata(&self, key: &str, value: &str) -> Result<(), RepoError> {
        debug!("json repo: set metadata: {}", key);
        let mut store = self.load()?;
        store.metadata.insert(key.to_string(), value.to_string());
        self.save(&store)
    }

    fn get_metadata(&self, key: &str) -> Result<Option<String>, RepoError> {
        Ok(self.load()?.metadata.remove(key))
    }
}
