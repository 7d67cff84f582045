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

//! `cp` operands.

use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt;

/// `[user@]host[:port]:path`
static REMOTE_PATH_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:(?P<user>[\w.\-]+)@)?(?P<host>[\w.\-]+)(?::(?P<port>\d+))?:(?P<path>.+)$")
        .expect("valid regex")
});

/// An IPv4-ish address or anything containing a dot.
static IP_OR_DOMAIN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d{1,3}\.){1,3}\d{1,3}$|\.").expect("valid regex"));

/// Which host a remote operand refers to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteHost {
    /// Looks like a real address: has a dot, a user or a port.
    Address {
        user: Option<String>,
        host: String,
        port: Option<String>,
    },
    /// A bare word, resolved like a keyword (`web:/tmp/x`).
    Keyword(String),
}

impl fmt::Display for RemoteHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RemoteHost::Address { user, host, port } => {
                if let Some(user) = user {
                    write!(f, "{user}@")?;
                }
                write!(f, "{host}")?;
                if let Some(port) = port {
                    write!(f, ":{port}")?;
                }
                Ok(())
            }
            RemoteHost::Keyword(keyword) => write!(f, "{keyword}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CpPath {
    Local(String),
    Remote { host: RemoteHost, path: String },
}

impl CpPath {
    pub fn parse(input: &str) -> Self {
        if let Some(caps) = REMOTE_PATH_RE.captures(input) {
            let group = |name| caps.name(name).map(|m| m.as_str().to_string());
            let user = group("user");
            let host = group("host").unwrap_or_default();
            let port = group("port");
            let path = group("path").unwrap_or_default();

            let host = if IP_OR_DOMAIN_RE.is_match(&host) || user.is_some() || port.is_some() {
                RemoteHost::Address { user, host, port }
            } else {
                RemoteHost::Keyword(host)
            };
            return CpPath::Remote { host, path };
        }

        // keyword:/path or keyword:~path with a keyword the host pattern
        // rejects.
        if let Some((prefix, suffix)) = input.split_once(':') {
            if prefix.chars().count() > 1 && (suffix.starts_with('/') || suffix.starts_with('~')) {
                return CpPath::Remote {
                    host: RemoteHost::Keyword(prefix.to_string()),
                    path: suffix.to_string(),
                };
            }
        }

        CpPath::Local(input.to_string())
    }

    pub fn is_remote(&self) -> bool {
        matches!(self, CpPath::Remote { .. })
    }

    pub fn path(&self) -> &str {
        match self {
            CpPath::Local(path) | CpPath::Remote { path, .. } => path,
        }
    }
}

impl fmt::Display for CpPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CpPath::Local(path) => write!(f, "{path}"),
            CpPath::Remote { host, path } => write!(f, "{host}:{path}"),
        }
    }
}
