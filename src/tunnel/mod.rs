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

//! Connection topology: reaching a target through an optional chain of jump
//! hosts.
//!
//! The chain is walked with an explicit loop. Every transport opened so far
//! sits in a `Vec`, so a failure (or Ctrl-C) at hop `k` closes exactly the
//! `k` transports already opened, newest first.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use zeroize::Zeroizing;

use crate::auth::{AuthChain, AuthMethod, PromptError, Prompter};
use crate::entry::{Endpoint, Entry, EntryError, Proxy};
use crate::ssh::known_hosts::HostTrust;
use crate::ssh::transport::{Authenticated, ClientConfig, Connector, Transport, TransportError};

pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum TunnelError {
    #[error("proxy hop {index} ({endpoint}): {source}")]
    Hop {
        index: usize,
        endpoint: String,
        source: TransportError,
    },

    #[error("{endpoint}: {source}")]
    Target {
        endpoint: String,
        source: TransportError,
    },

    #[error("connection cancelled")]
    Cancelled,

    #[error(transparent)]
    Entry(#[from] EntryError),
}

impl TunnelError {
    /// The target (not a hop) rejected every authentication method.
    pub fn is_target_auth_exhausted(&self) -> bool {
        matches!(self, TunnelError::Target { source, .. } if source.is_auth_exhausted())
    }
}

/// Secrets learned while connecting, handed back for the caller to persist.
#[derive(Default, Clone)]
pub struct Credentials {
    /// Target password typed at an interactive prompt.
    pub password: Option<Zeroizing<String>>,
    /// Key passphrase typed while building the auth chain.
    pub passphrase: Option<Zeroizing<String>>,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("passphrase", &self.passphrase.as_ref().map(|_| "***"))
            .finish()
    }
}

/// An open route to a target. Hop transports stay alive as long as the
/// tunnel does.
#[derive(Debug)]
pub struct Tunnel {
    hops: Vec<Arc<dyn Transport>>,
    target: Arc<dyn Transport>,
    credentials: Credentials,
}

impl Tunnel {
    pub fn target(&self) -> &Arc<dyn Transport> {
        &self.target
    }

    pub fn hops(&self) -> &[Arc<dyn Transport>] {
        &self.hops
    }

    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    /// Close the target, then every hop in reverse order.
    pub async fn close(&self) {
        self.target.close().await;
        close_reverse(&self.hops).await;
    }
}

async fn close_reverse(transports: &[Arc<dyn Transport>]) {
    for transport in transports.iter().rev() {
        debug!("closing {}", transport.peer());
        transport.close().await;
    }
}

enum Step {
    Cancelled,
    Failed(TransportError),
}

/// Race one dial step against cancellation. A cancelled prompt inside the
/// handshake counts as cancellation too.
async fn race<F>(cancel: &CancellationToken, step: F) -> Result<Authenticated, Step>
where
    F: Future<Output = Result<Authenticated, TransportError>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Step::Cancelled),
        result = step => match result {
            Ok(auth) => Ok(auth),
            Err(TransportError::Prompt(PromptError::Cancelled)) => Err(Step::Cancelled),
            Err(e) => Err(Step::Failed(e)),
        },
    }
}

/// Dials entries, hop by hop.
pub struct TunnelResolver {
    connector: Arc<dyn Connector>,
    trust: Arc<dyn HostTrust>,
    prompter: Arc<dyn Prompter>,
    connect_timeout: Duration,
    keepalive: Option<Duration>,
    /// Hop passwords typed during this process; never persisted.
    hop_passwords: Mutex<HashMap<Endpoint, Zeroizing<String>>>,
}

impl TunnelResolver {
    pub fn new(
        connector: Arc<dyn Connector>,
        trust: Arc<dyn HostTrust>,
        prompter: Arc<dyn Prompter>,
    ) -> Self {
        Self {
            connector,
            trust,
            prompter,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            keepalive: None,
            hop_passwords: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_keepalive(mut self, interval: Option<Duration>) -> Self {
        self.keepalive = interval;
        self
    }

    pub fn prompter(&self) -> &Arc<dyn Prompter> {
        &self.prompter
    }

    fn client_config(&self, methods: Vec<AuthMethod>) -> ClientConfig {
        ClientConfig {
            methods,
            trust: self.trust.clone(),
            prompter: self.prompter.clone(),
            connect_timeout: self.connect_timeout,
            keepalive: self.keepalive,
        }
    }

    /// A hop uses its own password when one is known, otherwise it asks.
    fn hop_methods(&self, hop: &Proxy, endpoint: &Endpoint) -> Vec<AuthMethod> {
        let cached = self
            .hop_passwords
            .lock()
            .ok()
            .and_then(|cache| cache.get(endpoint).cloned());
        match hop.password().or(cached) {
            Some(password) => vec![AuthMethod::Password(password)],
            None => vec![AuthMethod::Interactive],
        }
    }

    fn remember_hop_password(&self, endpoint: &Endpoint, password: Option<Zeroizing<String>>) {
        if let (Some(password), Ok(mut cache)) = (password, self.hop_passwords.lock()) {
            cache.insert(endpoint.clone(), password);
        }
    }

    /// Open an authenticated transport to `entry`, through its proxy chain
    /// when it has one.
    pub async fn dial(
        &self,
        entry: &Entry,
        chain: &AuthChain,
        cancel: &CancellationToken,
    ) -> Result<Tunnel, TunnelError> {
        let target = entry.endpoint()?;
        let mut opened: Vec<Arc<dyn Transport>> = Vec::new();

        for (index, hop) in entry.proxy.iter().flat_map(|p| p.hops()).enumerate() {
            let endpoint = match hop.endpoint() {
                Ok(endpoint) => endpoint,
                Err(e) => {
                    close_reverse(&opened).await;
                    return Err(e.into());
                }
            };
            info!("connecting to proxy hop {} ({})", index, endpoint);
            let config = self.client_config(self.hop_methods(hop, &endpoint));
            let step = match opened.last() {
                None => self.connector.connect(&endpoint, &config),
                Some(previous) => previous.dial_through(&endpoint, &config),
            };
            match race(cancel, step).await {
                Ok(auth) => {
                    self.remember_hop_password(&endpoint, auth.password);
                    opened.push(auth.transport);
                }
                Err(step) => {
                    close_reverse(&opened).await;
                    return Err(match step {
                        Step::Cancelled => TunnelError::Cancelled,
                        Step::Failed(source) => TunnelError::Hop {
                            index,
                            endpoint: endpoint.to_string(),
                            source,
                        },
                    });
                }
            }
        }

        info!("connecting to {}", target);
        let config = self.client_config(chain.methods.clone());
        let step = match opened.last() {
            None => self.connector.connect(&target, &config),
            Some(previous) => previous.dial_through(&target, &config),
        };
        match race(cancel, step).await {
            Ok(auth) => Ok(Tunnel {
                hops: opened,
                target: auth.transport,
                credentials: Credentials {
                    password: auth.password,
                    passphrase: chain.passphrase.clone(),
                },
            }),
            Err(step) => {
                close_reverse(&opened).await;
                Err(match step {
                    Step::Cancelled => TunnelError::Cancelled,
                    Step::Failed(source) => TunnelError::Target {
                        endpoint: target.to_string(),
                        source,
                    },
                })
            }
        }
    }
}
