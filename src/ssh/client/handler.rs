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

//! russh client handler: host key verification.

use russh::client::Handler;
use std::sync::{Arc, Mutex};

use crate::ssh::known_hosts::{HostTrust, TrustError};

/// Slot in which the handler leaves the trust failure for the connecting
/// code to pick up; russh only reports a generic "unknown key".
pub(super) type TrustSlot = Arc<Mutex<Option<TrustError>>>;

/// SSH client handler for managing server key verification.
pub(super) struct ClientHandler {
    host: String,
    port: u16,
    trust: Arc<dyn HostTrust>,
    rejected: TrustSlot,
}

impl ClientHandler {
    pub(super) fn new(host: &str, port: u16, trust: Arc<dyn HostTrust>) -> (Self, TrustSlot) {
        let rejected = TrustSlot::default();
        let handler = Self {
            host: host.to_string(),
            port,
            trust,
            rejected: rejected.clone(),
        };
        (handler, rejected)
    }
}

/// Take the trust failure recorded during the handshake, if any.
pub(super) fn take_rejection(slot: &TrustSlot) -> Option<TrustError> {
    slot.lock().ok().and_then(|mut s| s.take())
}

impl Handler for ClientHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &russh::keys::PublicKey,
    ) -> Result<bool, Self::Error> {
        match self.trust.verify(&self.host, self.port, server_public_key) {
            Ok(()) => Ok(true),
            Err(e) => {
                if let Ok(mut slot) = self.rejected.lock() {
                    *slot = Some(e);
                }
                Ok(false)
            }
        }
    }
}
