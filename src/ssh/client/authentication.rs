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

//! Walks an authentication chain against a live russh handle.

use russh::client::{Handle, Handler, KeyboardInteractiveAuthResponse};
use russh::keys::PrivateKeyWithHashAlg;
use tracing::debug;
use zeroize::Zeroizing;

use super::ssh_error;
use crate::auth::{AuthMethod, Prompter};
use crate::entry::Endpoint;
use crate::ssh::transport::TransportError;

/// Try each method in order until the server accepts one.
///
/// Returns the password typed at an interactive prompt when that is what
/// succeeded, so callers can reuse or persist it.
pub(super) async fn authenticate<H: Handler>(
    handle: &mut Handle<H>,
    target: &Endpoint,
    methods: &[AuthMethod],
    prompter: &dyn Prompter,
) -> Result<Option<Zeroizing<String>>, TransportError> {
    let user = target.user.as_str();
    for method in methods {
        debug!("trying {} authentication for {}", method.kind(), target);
        match method {
            AuthMethod::Password(password) => {
                let result = handle
                    .authenticate_password(user, password.as_str())
                    .await
                    .map_err(ssh_error)?;
                if result.success() {
                    return Ok(None);
                }
            }
            AuthMethod::PublicKey { path, key } => {
                let hash = handle
                    .best_supported_rsa_hash()
                    .await
                    .map_err(ssh_error)?
                    .flatten();
                let result = handle
                    .authenticate_publickey(user, PrivateKeyWithHashAlg::new(key.clone(), hash))
                    .await
                    .map_err(ssh_error)?;
                if result.success() {
                    return Ok(None);
                }
                debug!("key {} rejected by {}", path.display(), target);
            }
            AuthMethod::Interactive => {
                if let Exchange::Accepted(typed) =
                    keyboard_interactive(handle, target, prompter).await?
                {
                    return Ok(typed);
                }
                let typed = prompter
                    .secret(&format!("{}@{}'s password: ", target.user, target.host))
                    .await?;
                let result = handle
                    .authenticate_password(user, typed.as_str())
                    .await
                    .map_err(ssh_error)?;
                if result.success() {
                    return Ok(Some(typed));
                }
            }
        }
    }

    Err(TransportError::AuthExhausted {
        endpoint: target.to_string(),
    })
}

enum Exchange {
    /// Accepted; carries the last secret answer, if any was asked.
    Accepted(Option<Zeroizing<String>>),
    Refused,
}

/// Run a keyboard-interactive exchange, answering each prompt from the
/// terminal.
async fn keyboard_interactive<H: Handler>(
    handle: &mut Handle<H>,
    target: &Endpoint,
    prompter: &dyn Prompter,
) -> Result<Exchange, TransportError> {
    let mut response = handle
        .authenticate_keyboard_interactive_start(target.user.as_str(), None::<String>)
        .await
        .map_err(ssh_error)?;
    let mut last_secret = None;

    loop {
        let prompts = match response {
            KeyboardInteractiveAuthResponse::Success => return Ok(Exchange::Accepted(last_secret)),
            KeyboardInteractiveAuthResponse::Failure { .. } => return Ok(Exchange::Refused),
            KeyboardInteractiveAuthResponse::InfoRequest { prompts, .. } => prompts,
        };

        let mut answers = Vec::with_capacity(prompts.len());
        for prompt in prompts {
            if prompt.echo {
                answers.push(prompter.line(&prompt.prompt).await?);
            } else {
                let secret = prompter.secret(&prompt.prompt).await?;
                answers.push(secret.to_string());
                last_secret = Some(secret);
            }
        }

        response = handle
            .authenticate_keyboard_interactive_respond(answers)
            .await
            .map_err(ssh_error)?;
    }
}
