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

//! At-rest sealing of stored passwords and passphrases.
//!
//! Sealed values look like `v1:<base64(nonce || ciphertext)>`. The key is
//! derived with Argon2id from the store's device id, so a copied store file
//! is useless without its metadata, and a lost device id makes the sealed
//! values unreadable rather than wrong.

use argon2::{Algorithm, Argon2, Params, Version};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chacha20poly1305::aead::{Aead, AeadCore, KeyInit, OsRng};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use tracing::debug;
use zeroize::Zeroizing;

use super::RepoError;
use crate::utils::mask_secret;

pub const SEALED_PREFIX: &str = "v1:";

const KEY_SALT: &[u8] = b"sshkeep-store-v1";
const NONCE_LEN: usize = 12;

// The device id is a random uuid, so a light cost is enough.
const ARGON2_MEMORY_KIB: u32 = 8 * 1024;
const ARGON2_ITERATIONS: u32 = 2;

pub struct Sealer {
    cipher: ChaCha20Poly1305,
}

impl std::fmt::Debug for Sealer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Sealer(***)")
    }
}

impl Sealer {
    pub fn from_device_id(device_id: &str) -> Result<Self, RepoError> {
        let params = Params::new(ARGON2_MEMORY_KIB, ARGON2_ITERATIONS, 1, Some(32))
            .map_err(|e| RepoError::Seal(e.to_string()))?;
        let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

        let mut key = Zeroizing::new([0u8; 32]);
        argon2
            .hash_password_into(device_id.as_bytes(), KEY_SALT, &mut key[..])
            .map_err(|e| RepoError::Seal(e.to_string()))?;

        Ok(Self {
            cipher: ChaCha20Poly1305::new(Key::from_slice(&key[..])),
        })
    }

    /// Seal `plain`. Empty strings stay empty.
    pub fn seal(&self, plain: &str) -> Result<String, RepoError> {
        if plain.is_empty() {
            return Ok(String::new());
        }
        let nonce = ChaCha20Poly1305::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plain.as_bytes())
            .map_err(|e| RepoError::Seal(e.to_string()))?;

        let mut payload = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        payload.extend_from_slice(nonce.as_slice());
        payload.extend_from_slice(&ciphertext);
        Ok(format!("{SEALED_PREFIX}{}", BASE64.encode(payload)))
    }

    /// Open a sealed value.
    ///
    /// Values without the prefix are plaintext from an older store and are
    /// returned unchanged, as is anything that fails to open.
    pub fn open(&self, stored: &str) -> String {
        let Some(encoded) = stored.strip_prefix(SEALED_PREFIX) else {
            return stored.to_string();
        };
        match self.try_open(encoded) {
            Ok(plain) => plain,
            Err(reason) => {
                debug!("failed to open sealed value '{}': {}", mask_secret(stored), reason);
                stored.to_string()
            }
        }
    }

    fn try_open(&self, encoded: &str) -> Result<String, String> {
        let payload = BASE64.decode(encoded).map_err(|e| e.to_string())?;
        if payload.len() <= NONCE_LEN {
            return Err("payload too short".to_string());
        }
        let (nonce, ciphertext) = payload.split_at(NONCE_LEN);
        let plain = self
            .cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|e| e.to_string())?;
        String::from_utf8(plain).map_err(|e| e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seal_then_open() {
        let sealer = Sealer::from_device_id("3f1c0c1e-8d7a-4b8e-9a55-0c2b8c1f0e11").unwrap();
        let sealed = sealer.seal("hunter2").unwrap();
        assert!(sealed.starts_with(SEALED_PREFIX));
        assert!(!sealed.contains("hunter2"));
        assert_eq!(sealer.open(&sealed), "hunter2");
    }

    #[test]
    fn test_nonce_differs_per_seal() {
        let sealer = Sealer::from_device_id("device").unwrap();
        assert_ne!(sealer.seal("same").unwrap(), sealer.seal("same").unwrap());
    }

    #[test]
    fn test_empty_and_plaintext_pass_through() {
        let sealer = Sealer::from_device_id("device").unwrap();
        assert_eq!(sealer.seal("").unwrap(), "");
        assert_eq!(sealer.open(""), "");
        assert_eq!(sealer.open("legacy-plain"), "legacy-plain");
    }

    #[test]
    fn test_wrong_device_keeps_value() {
        let sealed = Sealer::from_device_id("device-a")
            .unwrap()
            .seal("secret")
            .unwrap();
        let other = Sealer::from_device_id("device-b").unwrap();
        assert_eq!(other.open(&sealed), sealed);
        assert_eq!(other.open("v1:not base64!"), "v1:not base64!");
    }
}
