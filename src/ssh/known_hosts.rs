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

//! Host identity verification with trust-on-first-use.

use russh::keys::known_hosts::{check_known_hosts_path, learn_known_hosts_path};
use russh::keys::{Error as KeyError, HashAlg, PublicKey};
use std::fmt::Debug;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, error, info};

#[cfg(unix)]
use std::os::unix::fs::OpenOptionsExt;

use crate::utils::ssh_dir;

#[derive(Debug, Error)]
pub enum TrustError {
    /// A known host presented a different key. Never bypassed.
    #[error(
        "REMOTE HOST IDENTIFICATION HAS CHANGED for {host}:{port} (known_hosts line {line}); \
         this may indicate a man-in-the-middle attack"
    )]
    HostKeyChanged { host: String, port: u16, line: usize },

    #[error("cannot determine the known_hosts location")]
    NoHomeDir,

    #[error("known_hosts file {path}: {message}")]
    Store { path: PathBuf, message: String },
}

/// Decides whether a server's host key is acceptable.
pub trait HostTrust: Send + Sync + Debug {
    fn verify(&self, host: &str, port: u16, key: &PublicKey) -> Result<(), TrustError>;
}

/// Get the default known_hosts file path
pub fn get_default_known_hosts_path() -> Option<PathBuf> {
    ssh_dir().map(|dir| dir.join("known_hosts"))
}

/// Trust-on-first-use policy backed by an OpenSSH `known_hosts` file.
///
/// * known host, same key: accepted
/// * known host, different key: [`TrustError::HostKeyChanged`]
/// * unknown host: recorded and accepted
#[derive(Debug, Clone)]
pub struct KnownHosts {
    path: PathBuf,
}

impl KnownHosts {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn open_default() -> Result<Self, TrustError> {
        get_default_known_hosts_path()
            .map(Self::new)
            .ok_or(TrustError::NoHomeDir)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn ensure_file(&self) -> Result<(), TrustError> {
        if self.path.exists() {
            return Ok(());
        }
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| self.store_error(e))?;
        }
        let mut options = OpenOptions::new();
        options.create(true).append(true);
        #[cfg(unix)]
        options.mode(0o600);
        options
            .open(&self.path)
            .map(drop)
            .map_err(|e| self.store_error(e))
    }

    fn store_error(&self, e: impl std::fmt::Display) -> TrustError {
        TrustError::Store {
            path: self.path.clone(),
            message: e.to_string(),
        }
    }
}

impl HostTrust for KnownHosts {
    fn verify(&self, host: &str, port: u16, key: &PublicKey) -> Result<(), TrustError> {
        self.ensure_file()?;

        match check_known_hosts_path(host, port, key, &self.path) {
            Ok(true) => {
                debug!(host = %host, port = %port, "host key verified");
                Ok(())
            }
            Ok(false) => {
                learn_known_hosts_path(host, port, key, &self.path)
                    .map_err(|e| self.store_error(e))?;
                info!(
                    "added host {}:{} ({}) to known_hosts",
                    host,
                    port,
                    key.fingerprint(HashAlg::Sha256)
                );
                Ok(())
            }
            Err(KeyError::KeyChanged { line }) => {
                error!(
                    "REMOTE HOST IDENTIFICATION HAS CHANGED for host {}:{}! This may indicate a MitM attack.",
                    host, port
                );
                Err(TrustError::HostKeyChanged {
                    host: host.to_string(),
                    port,
                    line,
                })
            }
            Err(e) => Err(self.store_error(e)),
        }
    }
}
