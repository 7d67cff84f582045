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

//! In-memory doubles for [`Connector`], [`Transport`], [`HostTrust`] and
//! [`Prompter`].
//!
//! A [`MockNetwork`] holds a set of hosts, each with its own credentials and
//! a tiny filesystem. It records every handshake, trust check and close so
//! tests can assert on connection topology.

use async_trait::async_trait;
use russh::keys::PublicKey;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use zeroize::Zeroizing;

use super::known_hosts::{HostTrust, TrustError};
use super::transport::{
    Authenticated, ClientConfig, Connector, DynReader, DynWriter, PtyRequest, Transport,
    TransportError,
};
use crate::auth::{AuthMethod, PromptError, Prompter};
use crate::entry::Endpoint;

pub const HOST_KEY: &str = "AAAAC3NzaC1lZDI1NTE5AAAAICM2bhUSQpUIJuMQE1KsNMWLSD2nW7aVtN0MCdGfjAbO";

const CHUNK: usize = 4096;

/// Prompter that replays canned answers.
pub struct ScriptedPrompter {
    answers: Mutex<VecDeque<String>>,
    asked: AtomicUsize,
    cancelled: bool,
}

impl ScriptedPrompter {
    pub fn new<I, S>(answers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            answers: Mutex::new(answers.into_iter().map(Into::into).collect()),
            asked: AtomicUsize::new(0),
            cancelled: false,
        }
    }

    pub fn cancelled() -> Self {
        Self {
            cancelled: true,
            ..Self::new(Vec::<String>::new())
        }
    }

    pub fn asked(&self) -> usize {
        self.asked.load(Ordering::SeqCst)
    }

    fn next(&self) -> Result<String, PromptError> {
        self.asked.fetch_add(1, Ordering::SeqCst);
        if self.cancelled {
            return Err(PromptError::Cancelled);
        }
        self.answers
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| PromptError::Io(std::io::Error::other("no scripted answer left")))
    }
}

#[async_trait]
impl Prompter for ScriptedPrompter {
    async fn secret(&self, _prompt: &str) -> Result<Zeroizing<String>, PromptError> {
        self.next().map(Zeroizing::new)
    }

    async fn line(&self, _prompt: &str) -> Result<String, PromptError> {
        self.next()
    }
}

/// Trust policy that accepts everything except hosts marked as changed.
#[derive(Debug, Default)]
pub struct RecordingTrust {
    checks: Mutex<Vec<String>>,
    changed: Mutex<HashSet<String>>,
}

impl RecordingTrust {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark_changed(&self, host: &str) {
        self.changed.lock().unwrap().insert(host.to_string());
    }

    pub fn checks(&self) -> Vec<String> {
        self.checks.lock().unwrap().clone()
    }
}

impl HostTrust for RecordingTrust {
    fn verify(&self, host: &str, port: u16, _key: &PublicKey) -> Result<(), TrustError> {
        self.checks.lock().unwrap().push(host.to_string());
        if self.changed.lock().unwrap().contains(host) {
            return Err(TrustError::HostKeyChanged {
                host: host.to_string(),
                port,
                line: 1,
            });
        }
        Ok(())
    }
}

/// How a mocked transfer misbehaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// Fail after moving this many bytes.
    FailAfter(usize),
    /// Stop making progress (forever) after this many bytes.
    StallAfter(usize),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockFile {
    pub data: Vec<u8>,
    pub mode: u32,
}

/// One simulated server.
#[derive(Debug, Clone, Default)]
pub struct MockHost {
    pub password: Option<String>,
    pub accepts_keys: bool,
    /// Server-side cap on authentication attempts; 0 means unlimited.
    pub max_auth_tries: usize,
    pub refuse_connection: bool,
    pub connect_delay: Option<Duration>,
    pub files: HashMap<String, MockFile>,
    pub dirs: HashSet<String>,
    pub download_fault: Option<Fault>,
    pub upload_fault: Option<Fault>,
}

impl MockHost {
    pub fn with_password(password: &str) -> Self {
        Self {
            password: Some(password.to_string()),
            ..Default::default()
        }
    }

    pub fn with_keys() -> Self {
        Self {
            accepts_keys: true,
            ..Default::default()
        }
    }

    pub fn file(mut self, path: &str, data: &[u8], mode: u32) -> Self {
        self.files.insert(
            path.to_string(),
            MockFile {
                data: data.to_vec(),
                mode,
            },
        );
        self
    }

    pub fn dir(mut self, path: &str) -> Self {
        self.dirs.insert(path.trim_end_matches('/').to_string());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Handshake { host: String, via: Option<String> },
    Close { host: String },
}

/// Shared state of every simulated host.
#[derive(Default)]
pub struct MockNetwork {
    hosts: Mutex<HashMap<String, MockHost>>,
    events: Mutex<Vec<Event>>,
    transports: Mutex<Vec<Arc<MockTransport>>>,
    commands: Mutex<Vec<(String, String)>>,
}

impl MockNetwork {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn add_host(&self, name: &str, host: MockHost) {
        self.hosts.lock().unwrap().insert(name.to_string(), host);
    }

    pub fn update_host(&self, name: &str, f: impl FnOnce(&mut MockHost)) {
        if let Some(host) = self.hosts.lock().unwrap().get_mut(name) {
            f(host);
        }
    }

    pub fn file(&self, host: &str, path: &str) -> Option<MockFile> {
        self.hosts
            .lock()
            .unwrap()
            .get(host)
            .and_then(|h| h.files.get(path).cloned())
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    pub fn handshakes(&self) -> usize {
        self.events()
            .iter()
            .filter(|e| matches!(e, Event::Handshake { .. }))
            .count()
    }

    pub fn closed_hosts(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Close { host } => Some(host),
                _ => None,
            })
            .collect()
    }

    pub fn opened(&self) -> usize {
        self.transports.lock().unwrap().len()
    }

    pub fn open_transports(&self) -> usize {
        self.transports
            .lock()
            .unwrap()
            .iter()
            .filter(|t| !t.is_closed())
            .count()
    }

    pub fn commands(&self) -> Vec<(String, String)> {
        self.commands.lock().unwrap().clone()
    }

    pub fn connector(self: &Arc<Self>) -> MockConnector {
        MockConnector { net: self.clone() }
    }

    fn host(&self, name: &str) -> Option<MockHost> {
        self.hosts.lock().unwrap().get(name).cloned()
    }

    async fn handshake(
        self: &Arc<Self>,
        target: &Endpoint,
        config: &ClientConfig,
        via: Option<&Endpoint>,
    ) -> Result<Authenticated, TransportError> {
        let Some(host) = self.host(&target.host) else {
            return Err(TransportError::Connect {
                endpoint: target.to_string(),
                message: "no route to host".to_string(),
            });
        };
        if let Some(delay) = host.connect_delay {
            tokio::time::timeout(config.connect_timeout, tokio::time::sleep(delay))
                .await
                .map_err(|_| TransportError::Timeout {
                    endpoint: target.to_string(),
                    after: config.connect_timeout,
                })?;
        }
        if host.refuse_connection {
            return Err(TransportError::Connect {
                endpoint: target.to_string(),
                message: "connection refused".to_string(),
            });
        }

        let key = russh::keys::parse_public_key_base64(HOST_KEY)
            .map_err(|e| TransportError::Ssh(e.to_string()))?;
        config.trust.verify(&target.host, target.port, &key)?;

        self.events.lock().unwrap().push(Event::Handshake {
            host: target.host.clone(),
            via: via.map(|v| v.host.clone()),
        });

        let mut attempts = 0;
        let mut accepted = None;
        for method in &config.methods {
            if host.max_auth_tries > 0 && attempts >= host.max_auth_tries {
                break;
            }
            attempts += 1;
            match method {
                AuthMethod::Password(p) => {
                    if host.password.as_deref() == Some(p.as_str()) {
                        accepted = Some(None);
                    }
                }
                AuthMethod::PublicKey { .. } => {
                    if host.accepts_keys {
                        accepted = Some(None);
                    }
                }
                AuthMethod::Interactive => {
                    let typed = config
                        .prompter
                        .secret(&format!("{}@{}'s password: ", target.user, target.host))
                        .await?;
                    if host.password.as_deref() == Some(typed.as_str()) {
                        accepted = Some(Some(typed));
                    }
                }
            }
            if accepted.is_some() {
                break;
            }
        }

        let Some(password) = accepted else {
            return Err(TransportError::AuthExhausted {
                endpoint: target.to_string(),
            });
        };

        let transport = Arc::new(MockTransport {
            peer: target.clone(),
            net: self.clone(),
            closed: AtomicBool::new(false),
        });
        self.transports.lock().unwrap().push(transport.clone());
        Ok(Authenticated {
            transport,
            password,
        })
    }
}

pub struct MockConnector {
    net: Arc<MockNetwork>,
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(
        &self,
        target: &Endpoint,
        config: &ClientConfig,
    ) -> Result<Authenticated, TransportError> {
        self.net.handshake(target, config, None).await
    }
}

pub struct MockTransport {
    peer: Endpoint,
    net: Arc<MockNetwork>,
    closed: AtomicBool,
}

impl std::fmt::Debug for MockTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockTransport")
            .field("peer", &self.peer)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl MockTransport {
    fn ensure_open(&self) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed {
                endpoint: self.peer.to_string(),
            });
        }
        Ok(())
    }

    fn host(&self) -> Result<MockHost, TransportError> {
        self.net
            .host(&self.peer.host)
            .ok_or_else(|| TransportError::Closed {
                endpoint: self.peer.to_string(),
            })
    }

    fn answer(&self, command: &str) -> (String, u32) {
        let Ok(host) = self.host() else {
            return (String::new(), 255);
        };
        let path = last_quoted(command).unwrap_or_default();
        if command.starts_with("stat ") {
            match host.files.get(&path) {
                Some(file) => (format!("{} {:o}\n", file.data.len(), file.mode), 0),
                None => (String::new(), 1),
            }
        } else if command.starts_with("test -d ") {
            let is_dir = host.dirs.contains(path.trim_end_matches('/'));
            (if is_dir { "dir\n" } else { "notdir\n" }.to_string(), 0)
        } else if let Some(code) = command.strip_prefix("exit ") {
            (String::new(), code.trim().parse().unwrap_or(1))
        } else {
            (String::new(), 0)
        }
    }
}

/// Last single-quoted token of a shell command: the path operand of the
/// `stat` and `test -d` probes.
fn last_quoted(command: &str) -> Option<String> {
    let end = command.rfind('\'')?;
    let start = command[..end].rfind('\'')? + 1;
    Some(command[start..end].to_string())
}

#[async_trait]
impl Transport for MockTransport {
    fn peer(&self) -> &Endpoint {
        &self.peer
    }

    async fn dial_through(
        &self,
        target: &Endpoint,
        config: &ClientConfig,
    ) -> Result<Authenticated, TransportError> {
        self.ensure_open()?;
        self.net.handshake(target, config, Some(&self.peer)).await
    }

    async fn exec(
        &self,
        command: &str,
        stdout: DynWriter<'_>,
        stderr: DynWriter<'_>,
    ) -> Result<u32, TransportError> {
        self.ensure_open()?;
        self.net
            .commands
            .lock()
            .unwrap()
            .push((self.peer.host.clone(), command.to_string()));
        let (out, status) = self.answer(command);
        stdout.write_all(out.as_bytes()).await?;
        if status != 0 {
            stderr.write_all(b"No such file or directory\n").await?;
        }
        Ok(status)
    }

    async fn shell(&self, _pty: &PtyRequest) -> Result<u32, TransportError> {
        self.ensure_open()?;
        Ok(0)
    }

    async fn download(&self, path: &str, sink: DynWriter<'_>) -> Result<u64, TransportError> {
        self.ensure_open()?;
        let host = self.host()?;
        let file = host.files.get(path).ok_or_else(|| TransportError::Sftp {
            path: path.to_string(),
            message: "no such file".to_string(),
        })?;

        let mut sent = 0usize;
        loop {
            if let Some(fault) = host.download_fault {
                match fault {
                    Fault::FailAfter(n) if sent >= n => {
                        return Err(TransportError::Sftp {
                            path: path.to_string(),
                            message: "read failed".to_string(),
                        });
                    }
                    Fault::StallAfter(n) if sent >= n => std::future::pending::<()>().await,
                    _ => {}
                }
            }
            if sent >= file.data.len() {
                break;
            }
            let end = (sent + CHUNK).min(file.data.len());
            sink.write_all(&file.data[sent..end]).await?;
            sent = end;
        }
        sink.flush().await?;
        Ok(sent as u64)
    }

    async fn upload(
        &self,
        path: &str,
        mode: u32,
        source: DynReader<'_>,
    ) -> Result<u64, TransportError> {
        self.ensure_open()?;
        let fault = self.host()?.upload_fault;
        let mut data = Vec::new();
        let mut buf = vec![0u8; CHUNK];
        loop {
            match fault {
                Some(Fault::FailAfter(n)) if data.len() >= n => {
                    return Err(TransportError::Sftp {
                        path: path.to_string(),
                        message: "write failed".to_string(),
                    });
                }
                Some(Fault::StallAfter(n)) if data.len() >= n => {
                    std::future::pending::<()>().await
                }
                _ => {}
            }
            let read = source.read(&mut buf).await?;
            if read == 0 {
                break;
            }
            data.extend_from_slice(&buf[..read]);
        }
        let len = data.len() as u64;
        self.net.update_host(&self.peer.host, |h| {
            h.files
                .insert(path.to_string(), MockFile { data, mode });
        });
        Ok(len)
    }

    async fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.net.events.lock().unwrap().push(Event::Close {
                host: self.peer.host.clone(),
            });
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Config with every test double wired in.
pub fn client_config(methods: Vec<AuthMethod>, prompter: Arc<dyn Prompter>) -> ClientConfig {
    ClientConfig {
        methods,
        trust: Arc::new(RecordingTrust::new()),
        prompter,
        connect_timeout: Duration::from_secs(5),
        keepalive: None,
    }
}
