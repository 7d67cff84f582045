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

//! Authentication method chain.
//!
//! [`build_auth_chain`] turns an [`Entry`] into the ordered list of methods
//! the transport tries until one is accepted:
//!
//! 1. the stored password, if any
//! 2. every usable private key: the entry's own key file first, then the
//!    default identities under `~/.ssh`
//! 3. an interactive prompt (keyboard-interactive, then password)
//!
//! A passphrase typed for an encrypted key is handed back in
//! [`AuthChain::passphrase`]; the caller decides whether to persist it.

pub mod prompt;

use russh::keys::{Error as KeyError, PrivateKey};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};
use zeroize::Zeroizing;

use crate::entry::Entry;
use crate::utils::expand_home;

pub use prompt::{PromptError, Prompter, RawTerminal, SecretInput, TerminalPrompter};

/// Default identity files, in priority order.
pub const DEFAULT_KEY_FILES: [&str; 5] = [
    "id_rsa",
    "id_ecdsa",
    "id_ecdsa_sk",
    "id_ed25519",
    "id_ed25519_sk",
];

#[derive(Debug, Error)]
pub enum AuthError {
    #[error(transparent)]
    Prompt(#[from] PromptError),
}

/// One way of proving identity to a server.
#[derive(Clone)]
pub enum AuthMethod {
    Password(Zeroizing<String>),
    PublicKey { path: PathBuf, key: Arc<PrivateKey> },
    /// Ask the user: keyboard-interactive first, then a password prompt.
    Interactive,
}

impl AuthMethod {
    pub fn password(password: impl Into<String>) -> Self {
        Self::Password(Zeroizing::new(password.into()))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            AuthMethod::Password(_) => "password",
            AuthMethod::PublicKey { .. } => "publickey",
            AuthMethod::Interactive => "interactive",
        }
    }
}

impl fmt::Debug for AuthMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthMethod::Password(_) => write!(f, "Password(***)"),
            AuthMethod::PublicKey { path, .. } => write!(f, "PublicKey({})", path.display()),
            AuthMethod::Interactive => write!(f, "Interactive"),
        }
    }
}

/// Output of [`build_auth_chain`].
#[derive(Debug, Clone, Default)]
pub struct AuthChain {
    pub methods: Vec<AuthMethod>,
    /// Passphrase entered at a prompt while loading keys.
    pub passphrase: Option<Zeroizing<String>>,
}

/// Build the ordered authentication methods for `entry`.
///
/// `ssh_dir` is where default identities are looked up; `None` skips them.
pub async fn build_auth_chain(
    entry: &Entry,
    ssh_dir: Option<&Path>,
    prompter: &dyn Prompter,
) -> Result<AuthChain, AuthError> {
    let mut chain = AuthChain::default();

    if let Some(password) = entry.stored_password() {
        chain.methods.push(AuthMethod::Password(password));
    }

    let mut passphrase = entry.stored_passphrase();
    for path in collect_key_files(entry, ssh_dir) {
        debug!("parsing key file: {}", path.display());
        let key = match russh::keys::load_secret_key(&path, None) {
            Ok(key) => key,
            Err(KeyError::KeyIsEncrypted) => {
                let pass = match &passphrase {
                    Some(pass) => pass.clone(),
                    None => {
                        let typed = prompter
                            .secret(&format!("Enter passphrase for key '{}': ", path.display()))
                            .await?;
                        if typed.is_empty() {
                            debug!("empty passphrase, skipping {}", path.display());
                            continue;
                        }
                        chain.passphrase = Some(typed.clone());
                        passphrase = Some(typed.clone());
                        typed
                    }
                };
                match russh::keys::load_secret_key(&path, Some(pass.as_str())) {
                    Ok(key) => key,
                    Err(e) => {
                        warn!("cannot decrypt key file {}: {}", path.display(), e);
                        continue;
                    }
                }
            }
            Err(e) => {
                debug!("parse failed, ignore key file {}: {}", path.display(), e);
                continue;
            }
        };
        chain.methods.push(AuthMethod::PublicKey {
            path,
            key: Arc::new(key),
        });
    }

    chain.methods.push(AuthMethod::Interactive);
    Ok(chain)
}

/// Candidate key files: the entry's own key (if it exists) followed by the
/// default identities found in `ssh_dir`, without duplicates.
pub fn collect_key_files(entry: &Entry, ssh_dir: Option<&Path>) -> Vec<PathBuf> {
    let mut paths = Vec::new();
    let own = (!entry.key_path.is_empty()).then(|| expand_home(&entry.key_path));
    if let Some(own) = &own {
        if own.is_file() {
            paths.push(own.clone());
        }
    }

    let Some(ssh_dir) = ssh_dir else {
        return paths;
    };
    for name in DEFAULT_KEY_FILES {
        let candidate = ssh_dir.join(name);
        if own.as_ref() == Some(&candidate) || !candidate.is_file() {
            continue;
        }
        paths.push(candidate);
    }
    paths
}
