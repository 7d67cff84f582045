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

//! File copy between a local path and a remote host, or between two
//! remote hosts.
//!
//! Both operands are parsed with [`CpPath::parse`]. Each remote operand is
//! resolved through the [`EntryResolver`] and logged in through the
//! [`Orchestrator`], so saved credentials, jump chains and visit counts
//! behave exactly as they do for `connect`.

pub mod path;

pub use path::{CpPath, RemoteHost};

use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::relay::{self, remote, RelayError};
use crate::resolver::{EntryResolver, Query, ResolveError};
use crate::session::{Orchestrator, SessionError};
use crate::ssh::TransportError;
use crate::tunnel::Tunnel;
use crate::utils::{base_name, expand_home};

#[derive(Debug, Error)]
pub enum CopyError {
    #[error("local to local copy is not supported, use your operating system's cp command")]
    LocalToLocal,

    #[error("copy cancelled")]
    Cancelled,

    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Relay(#[from] RelayError),

    #[error("{path}: {source}")]
    Local {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{0} is a directory, only single files can be copied")]
    IsDirectory(String),

    #[error("transfer with {endpoint} failed: {source}")]
    Remote {
        endpoint: String,
        #[source]
        source: TransportError,
    },
}

impl CopyError {
    pub fn is_cancelled(&self) -> bool {
        match self {
            CopyError::Cancelled | CopyError::Relay(RelayError::Cancelled) => true,
            CopyError::Session(e) => e.is_cancelled(),
            _ => false,
        }
    }
}

/// Operands and connection overrides of one `cp` invocation.
#[derive(Debug, Clone, Default)]
pub struct CopyRequest {
    pub source: String,
    pub target: String,
    pub identity_file: Option<String>,
    pub jump: Option<String>,
}

/// What was copied where.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyReport {
    pub from: String,
    pub to: String,
    pub bytes: u64,
}

pub struct Copier<'a> {
    resolver: &'a EntryResolver,
    orchestrator: &'a Orchestrator,
}

impl<'a> Copier<'a> {
    pub fn new(resolver: &'a EntryResolver, orchestrator: &'a Orchestrator) -> Self {
        Self {
            resolver,
            orchestrator,
        }
    }

    pub async fn copy(
        &self,
        request: &CopyRequest,
        cancel: &CancellationToken,
    ) -> Result<CopyReport, CopyError> {
        let source = CpPath::parse(&request.source);
        let target = CpPath::parse(&request.target);
        debug!("copy {:?} -> {:?}", source, target);

        match (source, target) {
            (CpPath::Local(_), CpPath::Local(_)) => Err(CopyError::LocalToLocal),
            (CpPath::Local(local), CpPath::Remote { host, path }) => {
                self.upload(request, &local, &host, &path, cancel).await
            }
            (CpPath::Remote { host, path }, CpPath::Local(local)) => {
                self.download(request, &host, &path, &local, cancel).await
            }
            (
                CpPath::Remote {
                    host: src_host,
                    path: src_path,
                },
                CpPath::Remote {
                    host: dst_host,
                    path: dst_path,
                },
            ) => {
                self.remote_to_remote(request, &src_host, &src_path, &dst_host, &dst_path, cancel)
                    .await
            }
        }
    }

    async fn login(
        &self,
        request: &CopyRequest,
        host: &RemoteHost,
        cancel: &CancellationToken,
    ) -> Result<Tunnel, CopyError> {
        let mut query = Query {
            identity_file: request.identity_file.clone(),
            jump: request.jump.clone(),
            ..Default::default()
        };
        match host {
            RemoteHost::Address { .. } => query.address = Some(host.to_string()),
            RemoteHost::Keyword(keyword) => query.keyword = Some(keyword.clone()),
        }

        let mut entry = self.resolver.resolve(&query).await?;
        debug!("{} resolved to {}", host, entry);
        Ok(self.orchestrator.login(&mut entry, cancel).await?)
    }

    async fn upload(
        &self,
        request: &CopyRequest,
        local: &str,
        host: &RemoteHost,
        remote_path: &str,
        cancel: &CancellationToken,
    ) -> Result<CopyReport, CopyError> {
        let local_path = expand_home(local);
        let metadata = tokio::fs::metadata(&local_path)
            .await
            .map_err(|source| local_error(&local_path, source))?;
        if metadata.is_dir() {
            return Err(CopyError::IsDirectory(local_path.display().to_string()));
        }
        let mode = file_mode(&metadata);

        let tunnel = self.login(request, host, cancel).await?;
        let result = send_file(&tunnel, &local_path, remote_path, mode, cancel).await;
        tunnel.close().await;
        result
    }

    async fn download(
        &self,
        request: &CopyRequest,
        host: &RemoteHost,
        remote_path: &str,
        local: &str,
        cancel: &CancellationToken,
    ) -> Result<CopyReport, CopyError> {
        let local_path = local_destination(&expand_home(local), remote_path).await;

        let tunnel = self.login(request, host, cancel).await?;
        let result = receive_file(&tunnel, remote_path, &local_path, cancel).await;
        tunnel.close().await;
        result
    }

    async fn remote_to_remote(
        &self,
        request: &CopyRequest,
        src_host: &RemoteHost,
        src_path: &str,
        dst_host: &RemoteHost,
        dst_path: &str,
        cancel: &CancellationToken,
    ) -> Result<CopyReport, CopyError> {
        let src = self.login(request, src_host, cancel).await?;
        let dst = match self.login(request, dst_host, cancel).await {
            Ok(dst) => dst,
            Err(e) => {
                src.close().await;
                return Err(e);
            }
        };
        let src_endpoint = src.target().peer().to_string();
        let dst_endpoint = dst.target().peer().to_string();
        info!(
            "relaying {}:{} to {}:{}",
            src_endpoint, src_path, dst_endpoint, dst_path
        );

        let result = relay::relay_remote_to_remote(
            cancel,
            src.target().clone(),
            src_path,
            dst.target().clone(),
            dst_path,
        )
        .await;

        dst.close().await;
        src.close().await;

        let report = result?;
        Ok(CopyReport {
            from: format!("{src_endpoint}:{}", report.source),
            to: format!("{dst_endpoint}:{}", report.destination),
            bytes: report.bytes,
        })
    }
}

fn local_error(path: &Path, source: std::io::Error) -> CopyError {
    CopyError::Local {
        path: path.display().to_string(),
        source,
    }
}

async fn send_file(
    tunnel: &Tunnel,
    local_path: &Path,
    remote_path: &str,
    mode: u32,
    cancel: &CancellationToken,
) -> Result<CopyReport, CopyError> {
    let target = tunnel.target();
    let endpoint = target.peer().to_string();
    let remote_error = |source| CopyError::Remote {
        endpoint: endpoint.clone(),
        source,
    };

    let file_name = local_path.to_string_lossy();
    let destination = remote::resolve_destination(target.as_ref(), remote_path, &file_name)
        .await
        .map_err(remote_error)?;
    let mut file = tokio::fs::File::open(local_path)
        .await
        .map_err(|source| local_error(local_path, source))?;
    info!("uploading {} to {}:{}", local_path.display(), endpoint, destination);

    let bytes = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(CopyError::Cancelled),
        sent = target.upload(&destination, mode, &mut file) => sent.map_err(remote_error)?,
    };
    Ok(CopyReport {
        from: local_path.display().to_string(),
        to: format!("{endpoint}:{destination}"),
        bytes,
    })
}

async fn receive_file(
    tunnel: &Tunnel,
    remote_path: &str,
    local_path: &Path,
    cancel: &CancellationToken,
) -> Result<CopyReport, CopyError> {
    let target = tunnel.target();
    let endpoint = target.peer().to_string();
    let mut file = tokio::fs::File::create(local_path)
        .await
        .map_err(|source| local_error(local_path, source))?;
    info!("downloading {}:{} to {}", endpoint, remote_path, local_path.display());

    let received = tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(CopyError::Cancelled),
        received = target.download(remote_path, &mut file) => {
            received.map_err(|source| CopyError::Remote {
                endpoint: endpoint.clone(),
                source,
            })
        }
    };
    drop(file);
    let bytes = match received {
        Ok(bytes) => bytes,
        Err(e) => {
            if let Err(rm) = tokio::fs::remove_file(local_path).await {
                warn!("failed to remove partial file {}: {}", local_path.display(), rm);
            }
            return Err(e);
        }
    };
    Ok(CopyReport {
        from: format!("{endpoint}:{remote_path}"),
        to: local_path.display().to_string(),
        bytes,
    })
}

/// A local directory receives the remote basename.
async fn local_destination(local: &Path, remote_path: &str) -> PathBuf {
    match tokio::fs::metadata(local).await {
        Ok(metadata) if metadata.is_dir() => local.join(base_name(remote_path)),
        _ => local.to_path_buf(),
    }
}

#[cfg(unix)]
fn file_mode(metadata: &std::fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o7777
}

#[cfg(not(unix))]
fn file_mode(metadata: &std::fs::Metadata) -> u32 {
    if metadata.permissions().readonly() {
        0o444
    } else {
        0o644
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::Entry;
    use crate::repo::{JsonRepo, Repo};
    use crate::resolver::Picker;
    use crate::ssh::mock::{Fault, MockHost, MockNetwork, RecordingTrust, ScriptedPrompter};
    use crate::tunnel::TunnelResolver;
    use async_trait::async_trait;
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::TempDir;

    struct FirstPicker;

    #[async_trait]
    impl Picker for FirstPicker {
        async fn pick(&self, _title: &str, _entries: &[Entry]) -> Result<usize, ResolveError> {
            Ok(0)
        }
    }

    struct Fixture {
        dir: TempDir,
        net: Arc<MockNetwork>,
        resolver: EntryResolver,
        orchestrator: Orchestrator,
    }

    impl Fixture {
        fn copier(&self) -> Copier<'_> {
            Copier::new(&self.resolver, &self.orchestrator)
        }

        fn local(&self, name: &str) -> String {
            self.dir.path().join(name).display().to_string()
        }
    }

    fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let repo = Arc::new(JsonRepo::new(dir.path().join("store.json")));
        repo.init().unwrap();
        for host in ["src.lan", "dst.lan"] {
            let mut e = Entry {
                host: host.to_string(),
                password: "pw".to_string(),
                ..Default::default()
            };
            e.tidy().unwrap();
            repo.touch_entry(&mut e).unwrap();
        }

        let net = MockNetwork::new();
        let tunnels = TunnelResolver::new(
            Arc::new(net.connector()),
            Arc::new(RecordingTrust::new()),
            Arc::new(ScriptedPrompter::new(Vec::<String>::new())),
        )
        .with_connect_timeout(Duration::from_secs(2));
        let resolver = EntryResolver::new(repo.clone(), Arc::new(FirstPicker));
        let orchestrator = Orchestrator::new(repo, tunnels).with_ssh_dir(None);
        Fixture {
            dir,
            net,
            resolver,
            orchestrator,
        }
    }

    fn request(source: &str, target: &str) -> CopyRequest {
        CopyRequest {
            source: source.to_string(),
            target: target.to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_local_to_local_is_rejected_without_network() {
        let f = fixture();
        let err = f
            .copier()
            .copy(&request("/tmp/a", "./b"), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, CopyError::LocalToLocal));
        assert!(err.to_string().contains("use your operating system's cp command"));
        assert_eq!(f.net.handshakes(), 0);
    }

    #[tokio::test]
    async fn test_upload_into_remote_directory() {
        let f = fixture();
        f.net
            .add_host("dst.lan", MockHost::with_password("pw").dir("/srv"));
        let local = f.local("notes.txt");
        std::fs::write(&local, b"hello upload").unwrap();

        let report = f
            .copier()
            .copy(&request(&local, "root@dst.lan:/srv"), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.bytes, 12);
        let uploaded = f.net.file("dst.lan", "/srv/notes.txt").unwrap();
        assert_eq!(uploaded.data, b"hello upload");
        assert_eq!(f.net.open_transports(), 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_upload_keeps_local_mode() {
        use std::os::unix::fs::PermissionsExt;

        let f = fixture();
        f.net.add_host("dst.lan", MockHost::with_password("pw"));
        let local = f.local("run.sh");
        std::fs::write(&local, b"#!/bin/sh\n").unwrap();
        std::fs::set_permissions(&local, std::fs::Permissions::from_mode(0o750)).unwrap();

        f.copier()
            .copy(&request(&local, "dst.lan:/opt/run.sh"), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(f.net.file("dst.lan", "/opt/run.sh").unwrap().mode, 0o750);
    }

    #[tokio::test]
    async fn test_upload_rejects_directories() {
        let f = fixture();
        f.net.add_host("dst.lan", MockHost::with_password("pw"));
        let err = f
            .copier()
            .copy(
                &request(&f.dir.path().display().to_string(), "dst.lan:/tmp"),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, CopyError::IsDirectory(_)));
        assert_eq!(f.net.handshakes(), 0);
    }

    #[tokio::test]
    async fn test_download_into_local_directory() {
        let f = fixture();
        f.net.add_host(
            "src.lan",
            MockHost::with_password("pw").file("/var/log/app.log", b"line one\n", 0o644),
        );

        let report = f
            .copier()
            .copy(
                &request("src.lan:/var/log/app.log", &f.dir.path().display().to_string()),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        let written = f.dir.path().join("app.log");
        assert_eq!(std::fs::read(&written).unwrap(), b"line one\n");
        assert_eq!(report.bytes, 9);
        assert_eq!(f.net.open_transports(), 0);
    }

    #[tokio::test]
    async fn test_failed_download_removes_partial_file() {
        let f = fixture();
        let mut host =
            MockHost::with_password("pw").file("/data/big.bin", &vec![7u8; 256 * 1024], 0o600);
        host.download_fault = Some(Fault::FailAfter(64 * 1024));
        f.net.add_host("src.lan", host);
        let local = f.local("big.bin");

        let err = f
            .copier()
            .copy(&request("src.lan:/data/big.bin", &local), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, CopyError::Remote { .. }));
        assert!(!Path::new(&local).exists());
        assert_eq!(f.net.open_transports(), 0);
    }

    #[tokio::test]
    async fn test_remote_to_remote_closes_both_tunnels() {
        let f = fixture();
        f.net.add_host(
            "src.lan",
            MockHost::with_password("pw").file("/etc/motd", b"welcome\n", 0o644),
        );
        f.net
            .add_host("dst.lan", MockHost::with_password("pw").dir("/tmp"));

        let report = f
            .copier()
            .copy(&request("src.lan:/etc/motd", "dst.lan:/tmp"), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.bytes, 8);
        assert!(report.to.ends_with(":/tmp/motd"));
        assert_eq!(f.net.file("dst.lan", "/tmp/motd").unwrap().data, b"welcome\n");
        assert_eq!(f.net.open_transports(), 0);
    }

    #[tokio::test]
    async fn test_unreachable_destination_closes_source() {
        let f = fixture();
        f.net.add_host(
            "src.lan",
            MockHost::with_password("pw").file("/etc/motd", b"welcome\n", 0o644),
        );

        let err = f
            .copier()
            .copy(&request("src.lan:/etc/motd", "dst.lan:/tmp"), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, CopyError::Session(_)));
        assert_eq!(f.net.open_transports(), 0);
    }

    #[tokio::test]
    async fn test_cancel_mid_relay_closes_both_tunnels() {
        let f = fixture();
        f.net.add_host(
            "src.lan",
            MockHost {
                download_fault: Some(Fault::StallAfter(16 * 1024)),
                ..MockHost::with_password("pw").file("/data/big.bin", &vec![7u8; 100_000], 0o644)
            },
        );
        f.net
            .add_host("dst.lan", MockHost::with_password("pw").dir("/backup"));

        // Cancel once the destination probe has run, i.e. while bytes flow.
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        let net = f.net.clone();
        tokio::spawn(async move {
            while !net.commands().iter().any(|(host, _)| host == "dst.lan") {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let started = std::time::Instant::now();
        let err = f
            .copier()
            .copy(&request("src.lan:/data/big.bin", "dst.lan:/backup"), &cancel)
            .await
            .unwrap_err();

        assert!(err.is_cancelled(), "unexpected error: {err}");
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(f.net.handshakes(), 2);
        assert_eq!(f.net.open_transports(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_copy() {
        let f = fixture();
        f.net.add_host(
            "src.lan",
            MockHost::with_password("pw").file("/etc/motd", b"welcome\n", 0o644),
        );
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = f
            .copier()
            .copy(&request("src.lan:/etc/motd", &f.local("motd")), &cancel)
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(f.net.handshakes(), 0);
    }
}
