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

//! Target descriptors.
//!
//! An [`Entry`] describes one connectable host together with its stored
//! credentials, tags and an optional jump chain. Entries come from three
//! places: the store, the user's `~/.ssh/config`, or an address typed on the
//! command line. They are tidied (defaults filled, port validated) when
//! constructed and never during dialing.

pub mod address;
pub mod proxy;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use zeroize::Zeroizing;

use crate::utils::mask_secret;

pub use address::Address;
pub use proxy::Proxy;

pub const DEFAULT_USER: &str = "root";
pub const DEFAULT_PORT: &str = "22";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EntryError {
    #[error("invalid address '{input}': {reason}")]
    InvalidAddress { input: String, reason: String },

    #[error("invalid port for {entry}: {reason}")]
    InvalidPort { entry: String, reason: String },

    #[error("failed to serialize entry: {0}")]
    Serialize(String),
}

/// Where an entry came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum EntrySource {
    /// Imported read-only from the user's ssh client configuration.
    #[serde(rename = "ssh_config")]
    SshConfig,
    /// Persisted by this tool.
    #[default]
    #[serde(rename = "sshkeep_store")]
    Store,
}

/// A fully tidied network endpoint: what a transport actually dials.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
    pub user: String,
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}:{}", self.user, self.host, self.port)
    }
}

/// A connectable target.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Entry {
    #[serde(default)]
    pub id: u64,
    pub host: String,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub port: String,
    #[serde(default)]
    pub key_path: String,
    #[serde(default)]
    pub passphrase: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub visit_count: u64,
    #[serde(default)]
    pub source: EntrySource,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy: Option<Box<Proxy>>,
}

impl Entry {
    /// Build a fresh, not yet persisted entry from a typed address.
    pub fn from_address(addr: &Address) -> Result<Self, EntryError> {
        let mut entry = Entry {
            host: addr.host.clone(),
            user: addr.user.clone().unwrap_or_default(),
            port: addr.port.map(|p| p.to_string()).unwrap_or_default(),
            source: EntrySource::Store,
            ..Default::default()
        };
        entry.tidy()?;
        Ok(entry)
    }

    /// Complete unset fields with default values and validate the port.
    pub fn tidy(&mut self) -> Result<(), EntryError> {
        if self.user.is_empty() {
            self.user = DEFAULT_USER.to_string();
        }
        if self.port.is_empty() {
            self.port = DEFAULT_PORT.to_string();
        }
        address::parse_port(&self.port).map_err(|reason| EntryError::InvalidPort {
            entry: format!("{}@{}", self.user, self.host),
            reason,
        })?;
        if let Some(proxy) = self.proxy.as_mut() {
            proxy.tidy()?;
        }
        Ok(())
    }

    pub fn endpoint(&self) -> Result<Endpoint, EntryError> {
        let port = address::parse_port(&self.port).map_err(|reason| EntryError::InvalidPort {
            entry: self.to_string(),
            reason,
        })?;
        Ok(Endpoint {
            host: self.host.clone(),
            port,
            user: self.user.clone(),
        })
    }

    pub fn stored_password(&self) -> Option<Zeroizing<String>> {
        (!self.password.is_empty()).then(|| Zeroizing::new(self.password.clone()))
    }

    pub fn stored_passphrase(&self) -> Option<Zeroizing<String>> {
        (!self.passphrase.is_empty()).then(|| Zeroizing::new(self.passphrase.clone()))
    }

    /// Whether the store has already assigned this entry a durable id.
    pub fn is_persisted(&self) -> bool {
        self.id > 0
    }

    /// Case-insensitive substring match against the address or any tag.
    pub fn matches_keyword(&self, keyword: &str) -> bool {
        let needle = keyword.to_lowercase();
        self.to_string().to_lowercase().contains(&needle)
            || self
                .tags
                .iter()
                .any(|tag| tag.to_lowercase().contains(&needle))
    }

    /// Copy with secrets masked, for display.
    pub fn masked(&self) -> Entry {
        let mut copy = self.clone();
        copy.password = mask_secret(&copy.password);
        copy.passphrase = mask_secret(&copy.passphrase);
        copy
    }

    pub fn to_json_pretty(&self) -> Result<String, EntryError> {
        serde_json::to_string_pretty(&self.masked())
            .map_err(|e| EntryError::Serialize(e.to_string()))
    }
}

impl fmt::Display for Entry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}:{}", self.user, self.host, self.port)
    }
}
