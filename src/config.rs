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

//! Process-wide settings read from the environment.

use std::env;
use std::path::PathBuf;
use std::time::Duration;
use tracing::debug;

use crate::utils::{expand_home, home_dir};

pub const ENV_DB_PATH: &str = "SSHKEEP_DB_PATH";
pub const ENV_CONNECT_TIMEOUT: &str = "SSHKEEP_CONNECT_TIMEOUT";
pub const ENV_IMPORT_SSH_CONFIG: &str = "SSHKEEP_IMPORT_SSH_CONFIG";
pub const ENV_KEEPALIVE: &str = "SSHKEEP_KEEPALIVE";

pub const DEFAULT_DB_FILE: &str = ".sshkeep.json";
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_KEEPALIVE: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub db_path: PathBuf,
    pub connect_timeout: Duration,
    pub import_ssh_config: bool,
    /// `None` disables keepalives (`SSHKEEP_KEEPALIVE=0`).
    pub keepalive: Option<Duration>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            import_ssh_config: false,
            keepalive: Some(DEFAULT_KEEPALIVE),
        }
    }
}

impl Settings {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut settings = Self::default();

        if let Some(path) = lookup(ENV_DB_PATH).filter(|p| !p.trim().is_empty()) {
            settings.db_path = expand_home(path.trim());
        }
        if let Some(raw) = lookup(ENV_CONNECT_TIMEOUT) {
            match parse_duration(&raw) {
                Ok(timeout) if !timeout.is_zero() => settings.connect_timeout = timeout,
                Ok(_) => debug!("{ENV_CONNECT_TIMEOUT} must be positive, using default"),
                Err(e) => debug!("invalid {ENV_CONNECT_TIMEOUT} {raw:?}: {e}, using default"),
            }
        }
        settings.import_ssh_config = lookup(ENV_IMPORT_SSH_CONFIG)
            .map(|v| !v.trim().is_empty())
            .unwrap_or(false);
        if let Some(raw) = lookup(ENV_KEEPALIVE) {
            match parse_duration(&raw) {
                Ok(interval) if interval.is_zero() => settings.keepalive = None,
                Ok(interval) => settings.keepalive = Some(interval),
                Err(e) => debug!("invalid {ENV_KEEPALIVE} {raw:?}: {e}, using default"),
            }
        }
        settings
    }
}

fn default_db_path() -> PathBuf {
    home_dir()
        .map(|home| home.join(DEFAULT_DB_FILE))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_DB_FILE))
}

/// Parse durations such as `10`, `10s`, `500ms`, `2m` or `1m30s`.
///
/// A bare number is seconds.
pub fn parse_duration(input: &str) -> Result<Duration, String> {
    let input = input.trim();
    if input.is_empty() {
        return Err("empty duration".to_string());
    }
    if let Ok(secs) = input.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }

    let mut total = Duration::ZERO;
    let mut rest = input;
    while !rest.is_empty() {
        let digits = rest.find(|c: char| !c.is_ascii_digit()).unwrap_or(rest.len());
        if digits == 0 {
            return Err(format!("expected a number in {input:?}"));
        }
        let value: u64 = rest[..digits]
            .parse()
            .map_err(|e| format!("{input:?}: {e}"))?;
        rest = &rest[digits..];

        let unit_len = rest
            .find(|c: char| c.is_ascii_digit())
            .unwrap_or(rest.len());
        let unit = match &rest[..unit_len] {
            "ms" => Duration::from_millis(value),
            "s" => Duration::from_secs(value),
            "m" => Duration::from_secs(value * 60),
            "h" => Duration::from_secs(value * 3600),
            "" => return Err(format!("missing unit in {input:?}")),
            other => return Err(format!("unknown unit {other:?} in {input:?}")),
        };
        total += unit;
        rest = &rest[unit_len..];
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_parse_duration_forms() {
        assert_eq!(parse_duration("10"), Ok(Duration::from_secs(10)));
        assert_eq!(parse_duration("10s"), Ok(Duration::from_secs(10)));
        assert_eq!(parse_duration("500ms"), Ok(Duration::from_millis(500)));
        assert_eq!(parse_duration("1m"), Ok(Duration::from_secs(60)));
        assert_eq!(parse_duration("1m30s"), Ok(Duration::from_secs(90)));
        assert_eq!(parse_duration(" 2h "), Ok(Duration::from_secs(7200)));
    }

    #[test]
    fn test_parse_duration_rejects_garbage() {
        assert!(parse_duration("").is_err());
        assert!(parse_duration("abc").is_err());
        assert!(parse_duration("10x").is_err());
        assert!(parse_duration("1m30").is_err());
        assert!(parse_duration("-5s").is_err());
    }

    #[test]
    fn test_defaults_without_environment() {
        let settings = Settings::from_lookup(lookup(&[]));
        assert_eq!(settings.connect_timeout, DEFAULT_CONNECT_TIMEOUT);
        assert_eq!(settings.keepalive, Some(DEFAULT_KEEPALIVE));
        assert!(!settings.import_ssh_config);
        assert!(settings.db_path.ends_with(DEFAULT_DB_FILE));
    }

    #[test]
    fn test_values_from_lookup() {
        let settings = Settings::from_lookup(lookup(&[
            (ENV_DB_PATH, "/tmp/store.json"),
            (ENV_CONNECT_TIMEOUT, "1m30s"),
            (ENV_IMPORT_SSH_CONFIG, "1"),
            (ENV_KEEPALIVE, "0"),
        ]));
        assert_eq!(settings.db_path, PathBuf::from("/tmp/store.json"));
        assert_eq!(settings.connect_timeout, Duration::from_secs(90));
        assert!(settings.import_ssh_config);
        assert_eq!(settings.keepalive, None);
    }

    #[test]
    fn test_invalid_timeout_falls_back() {
        let settings = Settings::from_lookup(lookup(&[(ENV_CONNECT_TIMEOUT, "soon")]));
        assert_eq!(settings.connect_timeout, DEFAULT_CONNECT_TIMEOUT);
        let settings = Settings::from_lookup(lookup(&[(ENV_CONNECT_TIMEOUT, "0")]));
        assert_eq!(settings.connect_timeout, DEFAULT_CONNECT_TIMEOUT);
    }

    #[test]
    #[serial]
    fn test_from_process_environment() {
        std::env::set_var(ENV_CONNECT_TIMEOUT, "750ms");
        std::env::set_var(ENV_IMPORT_SSH_CONFIG, "");
        let settings = Settings::from_env();
        std::env::remove_var(ENV_CONNECT_TIMEOUT);
        std::env::remove_var(ENV_IMPORT_SSH_CONFIG);

        assert_eq!(settings.connect_timeout, Duration::from_millis(750));
        assert!(!settings.import_ssh_config);
    }
}
