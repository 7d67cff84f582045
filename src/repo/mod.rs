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

//! Persistent entry store.

pub mod json;
pub mod sealer;

use std::collections::BTreeMap;
use std::path::PathBuf;
use thiserror::Error;

use crate::entry::Entry;

pub use json::JsonRepo;
pub use sealer::Sealer;

/// Metadata key holding the per-store device id the sealing key derives from.
pub const DEVICE_ID_KEY: &str = "device_id";
/// Next id to hand out. Ids of deleted entries are never reused.
pub const NEXT_ID_KEY: &str = "next_id";

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("entry {0} does not exist")]
    NotFound(u64),

    #[error("failed to access store {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("store {path} is corrupted: {source}")]
    Corrupted {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to seal secret: {0}")]
    Seal(String),
}

/// Entry storage used by the resolver and the connection orchestrator.
pub trait Repo: Send + Sync {
    /// Prepare the store for use. Safe to call repeatedly.
    fn init(&self) -> Result<(), RepoError>;

    fn get_entry(&self, id: u64) -> Result<Entry, RepoError>;

    fn get_all_entries(&self) -> Result<BTreeMap<u64, Entry>, RepoError>;

    /// Insert or update `entry`.
    ///
    /// A new entry is assigned the next free id with a visit count of 1. An
    /// existing one has its visit count bumped and keeps its creation time.
    /// The assigned id, counter and timestamps are written back to `entry`.
    fn touch_entry(&self, entry: &mut Entry) -> Result<(), RepoError>;

    fn delete_entry(&self, id: u64) -> Result<(), RepoError>;

    fn set_metadata(&self, key: &str, value: &str) -> Result<(), RepoError>;

    fn get_metadata(&self, key: &str) -> Result<Option<String>, RepoError>;
}
