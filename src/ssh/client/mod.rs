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

//! russh-backed [`Connector`] and [`Transport`].
//!
//! A direct connection goes through [`russh::client::connect`]. A hop
//! through an existing connection opens a `direct-tcpip` channel on it and
//! runs a fresh SSH session over the channel stream with
//! [`russh::client::connect_stream`], so every hop authenticates end to end.

mod authentication;
mod channel;
mod handler;
mod sftp;

use async_trait::async_trait;
use russh::client::Handle;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;

use crate::entry::Endpoint;
use crate::ssh::transport::{
    Authenticated, ClientConfig, Connector, DynReader, DynWriter, PtyRequest, Transport,
    TransportError,
};
use handler::{take_rejection, ClientHandler, TrustSlot};

/// Number of unanswered keepalives before the connection is dropped.
const KEEPALIVE_MAX: usize = 3;

pub(crate) fn ssh_error(e: russh::Error) -> TransportError {
    TransportError::Ssh(e.to_string())
}

pub(crate) fn channel_error(e: russh::Error) -> TransportError {
    TransportError::Channel(e.to_string())
}

fn russh_config(config: &ClientConfig) -> Arc<russh::client::Config> {
    Arc::new(russh::client::Config {
        keepalive_interval: config.keepalive,
        keepalive_max: KEEPALIVE_MAX,
        ..Default::default()
    })
}

/// Connects to hosts directly over TCP.
#[derive(Debug, Default, Clone, Copy)]
pub struct RusshConnector;

#[async_trait]
impl Connector for RusshConnector {
    async fn connect(
        &self,
        target: &Endpoint,
        config: &ClientConfig,
    ) -> Result<Authenticated, TransportError> {
        debug!("connecting to {}", target);
        let (handler, rejected) =
            ClientHandler::new(&target.host, target.port, config.trust.clone());
        let handshake = russh::client::connect(
            russh_config(config),
            (target.host.as_str(), target.port),
            handler,
        );
        let handle = finish_handshake(target, config, &rejected, handshake).await?;
        RusshTransport::authenticate(handle, target, config).await
    }
}

/// Wait for the SSH handshake with the connect timeout applied.
async fn finish_handshake<F>(
    target: &Endpoint,
    config: &ClientConfig,
    rejected: &TrustSlot,
    handshake: F,
) -> Result<Handle<ClientHandler>, TransportError>
where
    F: std::future::Future<Output = Result<Handle<ClientHandler>, russh::Error>>,
{
    match tokio::time::timeout(config.connect_timeout, handshake).await {
        Err(_) => Err(TransportError::Timeout {
            endpoint: target.to_string(),
            after: config.connect_timeout,
        }),
        Ok(Err(e)) => match take_rejection(rejected) {
            Some(trust) => Err(TransportError::Trust(trust)),
            None => Err(TransportError::Connect {
                endpoint: target.to_string(),
                message: e.to_string(),
            }),
        },
        Ok(Ok(handle)) => Ok(handle),
    }
}

/// One authenticated russh session.
pub struct RusshTransport {
    handle: Handle<ClientHandler>,
    peer: Endpoint,
    closed: AtomicBool,
}

impl fmt::Debug for RusshTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RusshTransport")
            .field("peer", &self.peer)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl RusshTransport {
    async fn authenticate(
        mut handle: Handle<ClientHandler>,
        target: &Endpoint,
        config: &ClientConfig,
    ) -> Result<Authenticated, TransportError> {
        let password = match authentication::authenticate(
            &mut handle,
            target,
            &config.methods,
            config.prompter.as_ref(),
        )
        .await
        {
            Ok(password) => password,
            Err(e) => {
                let _ = handle
                    .disconnect(russh::Disconnect::ByApplication, "", "")
                    .await;
                return Err(e);
            }
        };
        debug!("authenticated to {}", target);

        let transport = Arc::new(Self {
            handle,
            peer: target.clone(),
            closed: AtomicBool::new(false),
        });
        Ok(Authenticated {
            transport,
            password,
        })
    }

    fn ensure_open(&self) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed {
                endpoint: self.peer.to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl Transport for RusshTransport {
    fn peer(&self) -> &Endpoint {
        &self.peer
    }

    async fn dial_through(
        &self,
        target: &Endpoint,
        config: &ClientConfig,
    ) -> Result<Authenticated, TransportError> {
        self.ensure_open()?;
        debug!("opening tunnel to {} through {}", target, self.peer);

        let channel = tokio::time::timeout(
            config.connect_timeout,
            self.handle.channel_open_direct_tcpip(
                target.host.clone(),
                u32::from(target.port),
                "127.0.0.1",
                22,
            ),
        )
        .await
        .map_err(|_| TransportError::Timeout {
            endpoint: target.to_string(),
            after: config.connect_timeout,
        })?
        .map_err(|e| TransportError::Connect {
            endpoint: target.to_string(),
            message: format!("direct-tcpip through {} refused: {}", self.peer, e),
        })?;

        let stream = channel.into_stream();
        let (handler, rejected) =
            ClientHandler::new(&target.host, target.port, config.trust.clone());
        let handshake = russh::client::connect_stream(russh_config(config), stream, handler);
        let handle = finish_handshake(target, config, &rejected, handshake).await?;
        Self::authenticate(handle, target, config).await
    }

    async fn exec(
        &self,
        command: &str,
        stdout: DynWriter<'_>,
        stderr: DynWriter<'_>,
    ) -> Result<u32, TransportError> {
        self.ensure_open()?;
        channel::exec(&self.handle, command, stdout, stderr).await
    }

    async fn shell(&self, pty: &PtyRequest) -> Result<u32, TransportError> {
        self.ensure_open()?;
        channel::shell(&self.handle, pty).await
    }

    async fn download(&self, path: &str, sink: DynWriter<'_>) -> Result<u64, TransportError> {
        self.ensure_open()?;
        sftp::download(&self.handle, path, sink).await
    }

    async fn upload(
        &self,
        path: &str,
        mode: u32,
        source: DynReader<'_>,
    ) -> Result<u64, TransportError> {
        self.ensure_open()?;
        sftp::upload(&self.handle, path, mode, source).await
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Err(e) = self
            .handle
            .disconnect(russh::Disconnect::ByApplication, "", "")
            .await
        {
            debug!("disconnect from {}: {}", self.peer, e);
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst) || self.handle.is_closed()
    }
}
