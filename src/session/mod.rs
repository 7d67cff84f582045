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

//! Connection orchestration.
//!
//! [`Orchestrator::login`] is the one place that turns a resolved [`Entry`]
//! into an open [`Tunnel`]. It owns the stale-password retry, writes
//! credentials learned at prompts back onto the entry and records the
//! visit in the store once the login has succeeded.

pub mod terminal;

use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::auth::{build_auth_chain, AuthChain, AuthError, PromptError};
use crate::entry::{Entry, EntrySource};
use crate::repo::{Repo, RepoError};
use crate::ssh::TransportError;
use crate::tunnel::{Credentials, Tunnel, TunnelError, TunnelResolver};
use crate::utils::ssh_dir;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("cancelled")]
    Cancelled,

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Tunnel(#[from] TunnelError),

    #[error("failed to record visit: {0}")]
    Repo(#[from] RepoError),

    #[error("session on {endpoint} failed: {source}")]
    Remote {
        endpoint: String,
        #[source]
        source: TransportError,
    },

    #[error("failed to set up terminal: {0}")]
    Terminal(#[source] std::io::Error),
}

impl SessionError {
    pub fn is_cancelled(&self) -> bool {
        matches!(
            self,
            SessionError::Cancelled
                | SessionError::Tunnel(TunnelError::Cancelled)
                | SessionError::Auth(AuthError::Prompt(PromptError::Cancelled))
        )
    }
}

pub struct Orchestrator {
    repo: Arc<dyn Repo>,
    tunnels: TunnelResolver,
    ssh_dir: Option<PathBuf>,
}

impl Orchestrator {
    pub fn new(repo: Arc<dyn Repo>, tunnels: TunnelResolver) -> Self {
        Self {
            repo,
            tunnels,
            ssh_dir: ssh_dir(),
        }
    }

    /// Where default identities are looked up; `None` disables them.
    pub fn with_ssh_dir(mut self, ssh_dir: Option<PathBuf>) -> Self {
        self.ssh_dir = ssh_dir;
        self
    }

    pub fn repo(&self) -> &Arc<dyn Repo> {
        &self.repo
    }

    async fn auth_chain(
        &self,
        entry: &Entry,
        cancel: &CancellationToken,
    ) -> Result<AuthChain, SessionError> {
        if cancel.is_cancelled() {
            return Err(SessionError::Cancelled);
        }
        let prompter = self.tunnels.prompter().clone();
        let chain = build_auth_chain(entry, self.ssh_dir.as_deref(), prompter.as_ref())
            .await
            .map_err(|e| match e {
                AuthError::Prompt(PromptError::Cancelled) => SessionError::Cancelled,
                other => other.into(),
            })?;
        debug!("auth methods for {}: {:?}", entry, chain.methods);
        Ok(chain)
    }

    async fn dial_once(
        &self,
        entry: &Entry,
        chain: &AuthChain,
        cancel: &CancellationToken,
    ) -> Result<Tunnel, SessionError> {
        self.tunnels
            .dial(entry, chain, cancel)
            .await
            .map_err(|e| match e {
                TunnelError::Cancelled => SessionError::Cancelled,
                other => other.into(),
            })
    }

    /// Open a tunnel to `entry`.
    ///
    /// When a stored entry's saved password is rejected the password is
    /// dropped and the login is tried once more, which falls back to asking.
    /// A key passphrase typed during the first attempt is reused.
    /// On success the entry carries any newly typed credentials and, for
    /// store entries, has been touched exactly once.
    pub async fn login(
        &self,
        entry: &mut Entry,
        cancel: &CancellationToken,
    ) -> Result<Tunnel, SessionError> {
        let chain = self.auth_chain(entry, cancel).await?;
        let tunnel = match self.dial_once(entry, &chain, cancel).await {
            Err(SessionError::Tunnel(e))
                if e.is_target_auth_exhausted()
                    && entry.is_persisted()
                    && !entry.password.is_empty() =>
            {
                warn!("stored password for {} was rejected, asking again", entry);
                entry.password.clear();
                if let Some(passphrase) = &chain.passphrase {
                    entry.passphrase = passphrase.as_str().to_string();
                }
                let retry = self.auth_chain(entry, cancel).await?;
                self.dial_once(entry, &retry, cancel).await?
            }
            other => other?,
        };
        info!("connected to {}", entry);

        apply_credentials(entry, tunnel.credentials());
        if entry.source == EntrySource::Store {
            if let Err(e) = self.repo.touch_entry(entry) {
                tunnel.close().await;
                return Err(e.into());
            }
            debug!("entry {} visited {} times", entry.id, entry.visit_count);
        }
        Ok(tunnel)
    }

    /// Log in, then run `command` or attach an interactive shell. Returns the
    /// remote exit status. The tunnel is closed before returning.
    pub async fn run(
        &self,
        entry: &mut Entry,
        command: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<u32, SessionError> {
        let tunnel = self.login(entry, cancel).await?;
        let target = tunnel.target().clone();
        let endpoint = target.peer().to_string();

        let result = match command {
            Some(command) => {
                let mut stdout = tokio::io::stdout();
                let mut stderr = tokio::io::stderr();
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => Err(SessionError::Cancelled),
                    status = target.exec(command, &mut stdout, &mut stderr) => {
                        status.map_err(|source| SessionError::Remote { endpoint, source })
                    }
                }
            }
            None => match terminal::RawModeGuard::enter() {
                Ok(raw) => {
                    let pty = terminal::pty_request();
                    let status = tokio::select! {
                        biased;
                        _ = cancel.cancelled() => Err(SessionError::Cancelled),
                        status = target.shell(&pty) => {
                            status.map_err(|source| SessionError::Remote { endpoint, source })
                        }
                    };
                    drop(raw);
                    status
                }
                Err(e) => Err(SessionError::Terminal(e)),
            },
        };

        tunnel.close().await;
        result
    }
}

/// Copy secrets learned while connecting onto the entry so the touch that
/// follows persists them.
fn apply_credentials(entry: &mut Entry, credentials: &Credentials) {
    if let Some(password) = &credentials.password {
        entry.password = password.as_str().to_string();
    }
    if let Some(passphrase) = &credentials.passphrase {
        entry.passphrase = passphrase.as_str().to_string();
    }
}
