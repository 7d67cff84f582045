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

//! Secure transport abstraction.
//!
//! Everything above this module (tunnel resolution, relaying, copying)
//! talks to remote hosts only through [`Connector`] and [`Transport`]. The
//! russh implementation lives in [`crate::ssh::client`].

use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use zeroize::Zeroizing;

use crate::auth::{AuthMethod, PromptError, Prompter};
use crate::entry::Endpoint;
use crate::ssh::known_hosts::{HostTrust, TrustError};

pub type DynWriter<'a> = &'a mut (dyn AsyncWrite + Send + Unpin);
pub type DynReader<'a> = &'a mut (dyn AsyncRead + Send + Unpin);

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to connect to {endpoint}: {message}")]
    Connect { endpoint: String, message: String },

    #[error("timed out after {}s connecting to {endpoint}", .after.as_secs_f64())]
    Timeout { endpoint: String, after: Duration },

    /// Every configured method was rejected by the server.
    #[error("authentication failed for {endpoint}: no supported methods remain")]
    AuthExhausted { endpoint: String },

    #[error(transparent)]
    Trust(#[from] TrustError),

    #[error(transparent)]
    Prompt(#[from] PromptError),

    #[error("ssh protocol error: {0}")]
    Ssh(String),

    #[error("channel error: {0}")]
    Channel(String),

    #[error("sftp error on {path}: {message}")]
    Sftp { path: String, message: String },

    #[error("remote command did not report an exit status: {command}")]
    NoExitStatus { command: String },

    #[error("invalid command: {0}")]
    InvalidCommand(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("transport to {endpoint} is closed")]
    Closed { endpoint: String },
}

impl TransportError {
    pub fn is_auth_exhausted(&self) -> bool {
        matches!(self, TransportError::AuthExhausted { .. })
    }
}

/// Connection parameters handed to a [`Connector`] or to
/// [`Transport::dial_through`].
#[derive(Clone)]
pub struct ClientConfig {
    pub methods: Vec<AuthMethod>,
    pub trust: Arc<dyn HostTrust>,
    pub prompter: Arc<dyn Prompter>,
    pub connect_timeout: Duration,
    pub keepalive: Option<Duration>,
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("methods", &self.methods)
            .field("trust", &self.trust)
            .field("connect_timeout", &self.connect_timeout)
            .field("keepalive", &self.keepalive)
            .finish()
    }
}

/// A freshly authenticated transport.
pub struct Authenticated {
    pub transport: Arc<dyn Transport>,
    /// Password typed at an interactive prompt, if that is what succeeded.
    pub password: Option<Zeroizing<String>>,
}

impl fmt::Debug for Authenticated {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Authenticated")
            .field("transport", &self.transport)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .finish()
    }
}

/// Collected output of a one-shot command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub exit_status: u32,
}

impl CommandOutput {
    pub fn stdout_str(&self) -> String {
        String::from_utf8_lossy(&self.stdout).to_string()
    }

    pub fn stderr_str(&self) -> String {
        String::from_utf8_lossy(&self.stderr).to_string()
    }

    pub fn success(&self) -> bool {
        self.exit_status == 0
    }
}

/// Terminal parameters for an interactive shell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PtyRequest {
    pub term: String,
    pub cols: u32,
    pub rows: u32,
}

impl Default for PtyRequest {
    fn default() -> Self {
        Self {
            term: "xterm".to_string(),
            cols: 80,
            rows: 24,
        }
    }
}

/// Opens authenticated transports directly over the network.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(
        &self,
        target: &Endpoint,
        config: &ClientConfig,
    ) -> Result<Authenticated, TransportError>;
}

/// An authenticated, multiplexed connection to one host.
#[async_trait]
pub trait Transport: Send + Sync + fmt::Debug {
    /// The endpoint this transport is connected to.
    fn peer(&self) -> &Endpoint;

    /// Originate a new authenticated connection tunneled through this one.
    async fn dial_through(
        &self,
        target: &Endpoint,
        config: &ClientConfig,
    ) -> Result<Authenticated, TransportError>;

    /// Run `command`, streaming its output, and return the exit status.
    async fn exec(
        &self,
        command: &str,
        stdout: DynWriter<'_>,
        stderr: DynWriter<'_>,
    ) -> Result<u32, TransportError>;

    /// Run `command` and collect its output.
    async fn run(&self, command: &str) -> Result<CommandOutput, TransportError> {
        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let exit_status = self.exec(command, &mut stdout, &mut stderr).await?;
        Ok(CommandOutput {
            stdout,
            stderr,
            exit_status,
        })
    }

    /// Attach the local terminal to a remote login shell.
    async fn shell(&self, pty: &PtyRequest) -> Result<u32, TransportError>;

    /// Stream the remote file at `path` into `sink`.
    async fn download(&self, path: &str, sink: DynWriter<'_>) -> Result<u64, TransportError>;

    /// Create (or truncate) the remote file at `path` with permission bits
    /// `mode` and fill it from `source`.
    async fn upload(
        &self,
        path: &str,
        mode: u32,
        source: DynReader<'_>,
    ) -> Result<u64, TransportError>;

    /// Close the connection. Calling it more than once is a no-op.
    async fn close(&self);

    fn is_closed(&self) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_output_helpers() {
        let out = CommandOutput {
            stdout: b"1234 644\n".to_vec(),
            stderr: Vec::new(),
            exit_status: 0,
        };
        assert!(out.success());
        assert_eq!(out.stdout_str().trim(), "1234 644");
    }

    #[test]
    fn test_auth_exhausted_detection() {
        let err = TransportError::AuthExhausted {
            endpoint: "root@h:22".to_string(),
        };
        assert!(err.is_auth_exhausted());
        assert!(err.to_string().contains("no supported methods remain"));
        let err = TransportError::Closed {
            endpoint: "root@h:22".to_string(),
        };
        assert!(!err.is_auth_exhausted());
    }
}
