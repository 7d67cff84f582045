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

//! Jump host chain attached to an entry

use serde::{Deserialize, Serialize};
use std::fmt;
use zeroize::Zeroizing;

use super::address::{parse_port, Address};
use super::{Endpoint, EntryError, DEFAULT_PORT, DEFAULT_USER};

/// One hop of a jump chain.
///
/// The chain is a singly linked list: the last hop has no `proxy`. Hop
/// passwords only live for the duration of a process and are never
/// written to the store.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Proxy {
    pub host: String,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub port: String,
    #[serde(skip)]
    pub password: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy: Option<Box<Proxy>>,
}

impl Proxy {
    pub fn from_address(addr: Address) -> Self {
        Self {
            host: addr.host,
            user: addr.user.unwrap_or_default(),
            port: addr.port.map(|p| p.to_string()).unwrap_or_default(),
            password: String::new(),
            proxy: None,
        }
    }

    /// Parse a `-J` value: `[user1@]host1[:port1][,[user2@]host2[:port2]...]`.
    ///
    /// Returns `None` for an empty specification.
    pub fn parse_chain(spec: &str) -> Result<Option<Box<Proxy>>, EntryError> {
        let mut hops = Vec::new();
        for part in spec.split(',').map(str::trim) {
            if part.is_empty() {
                continue;
            }
            hops.push(Proxy::from_address(Address::parse(part)?));
        }

        let mut chain: Option<Box<Proxy>> = None;
        for mut hop in hops.into_iter().rev() {
            hop.proxy = chain;
            chain = Some(Box::new(hop));
        }
        if let Some(chain) = chain.as_mut() {
            chain.tidy()?;
        }
        Ok(chain)
    }

    /// Fill default user and port on this hop and every following hop.
    pub fn tidy(&mut self) -> Result<(), EntryError> {
        if self.user.is_empty() {
            self.user = DEFAULT_USER.to_string();
        }
        if self.port.is_empty() {
            self.port = DEFAULT_PORT.to_string();
        }
        parse_port(&self.port).map_err(|reason| EntryError::InvalidPort {
            entry: format!("{}@{}", self.user, self.host),
            reason,
        })?;
        match self.proxy.as_mut() {
            Some(next) => next.tidy(),
            None => Ok(()),
        }
    }

    /// Iterate hops front to back, starting with `self`.
    pub fn hops(&self) -> Hops<'_> {
        Hops { next: Some(self) }
    }

    pub fn endpoint(&self) -> Result<Endpoint, EntryError> {
        let port = parse_port(&self.port).map_err(|reason| EntryError::InvalidPort {
            entry: self.to_string(),
            reason,
        })?;
        Ok(Endpoint {
            host: self.host.clone(),
            port,
            user: self.user.clone(),
        })
    }

    pub fn password(&self) -> Option<Zeroizing<String>> {
        (!self.password.is_empty()).then(|| Zeroizing::new(self.password.clone()))
    }

    /// Clear the password of this hop and all following hops.
    pub fn clear_password(&mut self) {
        self.password.clear();
        if let Some(next) = self.proxy.as_mut() {
            next.clear_password();
        }
    }

    pub fn hop_count(&self) -> usize {
        self.hops().count()
    }
}

impl fmt::Display for Proxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}:{}", self.user, self.host, self.port)
    }
}

/// Forward iterator over a proxy chain.
pub struct Hops<'a> {
    next: Option<&'a Proxy>,
}

impl<'a> Iterator for Hops<'a> {
    type Item = &'a Proxy;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.next?;
        self.next = current.proxy.as_deref();
        Some(current)
    }
}
