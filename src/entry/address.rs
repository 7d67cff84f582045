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

//! `[user@]host[:port]` address parsing

use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt;

use super::EntryError;

static USER_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[\w.\-]+$").expect("valid regex"));
static HOST_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[\w.\-]+$").expect("valid regex"));

/// A loosely specified address as typed by the user.
///
/// Missing parts stay `None`; defaulting happens when an [`Entry`] or
/// [`Proxy`] is tidied.
///
/// [`Entry`]: super::Entry
/// [`Proxy`]: super::Proxy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Address {
    pub user: Option<String>,
    pub host: String,
    pub port: Option<u16>,
}

impl Address {
    /// Parse `[user@]host[:port]`. IPv6 literals must be bracketed when a
    /// port is given (`[::1]:2222`).
    pub fn parse(spec: &str) -> Result<Self, EntryError> {
        let spec = spec.trim();
        if spec.is_empty() {
            return Err(EntryError::InvalidAddress {
                input: spec.to_string(),
                reason: "empty address".to_string(),
            });
        }

        let (user, host_port) = match spec.split_once('@') {
            Some((user, rest)) => {
                if !USER_RE.is_match(user) {
                    return Err(EntryError::InvalidAddress {
                        input: spec.to_string(),
                        reason: format!("invalid user name '{user}'"),
                    });
                }
                (Some(user.to_string()), rest)
            }
            None => (None, spec),
        };

        let (host, port) = parse_host_port(host_port).map_err(|reason| {
            EntryError::InvalidAddress {
                input: spec.to_string(),
                reason,
            }
        })?;

        if !host.contains(':') && !HOST_RE.is_match(&host) {
            return Err(EntryError::InvalidAddress {
                input: spec.to_string(),
                reason: format!("invalid host name '{host}'"),
            });
        }

        Ok(Self { user, host, port })
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(user) = &self.user {
            write!(f, "{user}@")?;
        }
        write!(f, "{}", self.host)?;
        if let Some(port) = self.port {
            write!(f, ":{port}")?;
        }
        Ok(())
    }
}

/// Parse host:port specification with IPv6 support
///
/// Handles various formats:
/// * `hostname` -> (hostname, None)
/// * `hostname:port` -> (hostname, Some(port))
/// * `[::1]` -> (::1, None)
/// * `[::1]:port` -> (::1, Some(port))
pub fn parse_host_port(host_port: &str) -> Result<(String, Option<u16>), String> {
    if host_port.is_empty() {
        return Err("empty host specification".to_string());
    }

    // Handle IPv6 addresses in brackets
    if let Some(inner) = host_port.strip_prefix('[') {
        let Some(bracket_end) = inner.find(']') else {
            return Err("unclosed bracket in IPv6 address".to_string());
        };
        let ipv6_addr = &inner[..bracket_end];
        if ipv6_addr.is_empty() {
            return Err("empty IPv6 address in brackets".to_string());
        }
        let remaining = &inner[bracket_end + 1..];
        if remaining.is_empty() {
            return Ok((ipv6_addr.to_string(), None));
        }
        let Some(port_str) = remaining.strip_prefix(':') else {
            return Err(format!("invalid characters after IPv6 address: '{remaining}'"));
        };
        return Ok((ipv6_addr.to_string(), Some(parse_port(port_str)?)));
    }

    // Find the last colon to handle IPv6 addresses without brackets
    match host_port.rfind(':') {
        Some(colon_pos) => {
            let host_part = &host_port[..colon_pos];
            let port_part = &host_port[colon_pos + 1..];
            if host_part.is_empty() {
                return Err("empty hostname".to_string());
            }
            if port_part.chars().all(|c| c.is_ascii_digit()) && !host_part.contains(':') {
                Ok((host_part.to_string(), Some(parse_port(port_part)?)))
            } else {
                // Not a port, treat entire string as hostname (might be IPv6)
                Ok((host_port.to_string(), None))
            }
        }
        None => Ok((host_port.to_string(), None)),
    }
}

/// Parse a port number, rejecting zero and out-of-range values.
pub fn parse_port(port: &str) -> Result<u16, String> {
    if port.is_empty() {
        return Err("empty port specification".to_string());
    }
    match port.parse::<u16>() {
        Ok(0) => Err("port number cannot be zero".to_string()),
        Ok(port) => Ok(port),
        Err(e) => Err(format!("invalid port number: '{port}' ({e})")),
    }
}
