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

//! Read-only import of `~/.ssh/config`.
//!
//! Only `Host`, `HostName`, `Port`, `User` and `IdentityFile` are read.
//! Every `Host` block whose values resolve to a `HostName` becomes an
//! [`Entry`] tagged with the block's patterns. As with ssh itself, the first
//! value obtained for a key wins, so later blocks such as `Host *` only fill
//! in what is still unset.

use std::path::Path;
use thiserror::Error;
use tracing::debug;

use crate::entry::{Entry, EntrySource};
use crate::utils::expand_home;

#[derive(Debug, Error)]
pub enum SshConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("line {line}: {message}")]
    Syntax { line: usize, message: String },
}

#[derive(Debug, Default, Clone)]
struct HostBlock {
    patterns: Vec<String>,
    hostname: Option<String>,
    port: Option<String>,
    user: Option<String>,
    identity_file: Option<String>,
}

/// Load entries from an ssh config file. A missing file yields no entries.
pub fn load(path: &Path) -> Result<Vec<Entry>, SshConfigError> {
    if !path.is_file() {
        debug!("user ssh config not exist: {}", path.display());
        return Ok(Vec::new());
    }
    debug!("parsing user ssh config: {}", path.display());
    let content = std::fs::read_to_string(path).map_err(|source| SshConfigError::Io {
        path: path.display().to_string(),
        source,
    })?;
    parse(&content)
}

/// Parse ssh config text into entries.
pub fn parse(content: &str) -> Result<Vec<Entry>, SshConfigError> {
    let blocks = parse_blocks(content)?;
    let mut entries = Vec::new();

    for block in &blocks {
        let Some(alias) = block.patterns.first() else {
            continue;
        };
        let resolved = resolve(&blocks, alias);
        let Some(hostname) = resolved.hostname else {
            continue;
        };
        debug!("processing: {:?}", hostname);

        let mut entry = Entry {
            host: hostname,
            port: resolved.port.unwrap_or_default(),
            user: resolved.user.unwrap_or_default(),
            key_path: resolved
                .identity_file
                .map(|p| expand_home(&p).display().to_string())
                .unwrap_or_default(),
            tags: block.patterns.clone(),
            source: EntrySource::SshConfig,
            ..Default::default()
        };
        entry.tidy().map_err(|e| SshConfigError::Syntax {
            line: 0,
            message: format!("host {alias}: {e}"),
        })?;
        entries.push(entry);
    }
    Ok(entries)
}

fn parse_blocks(content: &str) -> Result<Vec<HostBlock>, SshConfigError> {
    let mut blocks = Vec::new();
    let mut current: Option<HostBlock> = None;

    for (index, line) in content.lines().enumerate() {
        let line_number = index + 1;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        // Both "Key Value" and "Key=Value" are accepted.
        let (keyword, args): (String, Vec<&str>) = match line.find('=') {
            Some(eq) => (
                line[..eq].trim().to_lowercase(),
                line[eq + 1..].split_whitespace().collect(),
            ),
            None => {
                let mut parts = line.split_whitespace();
                let keyword = parts.next().unwrap_or_default().to_lowercase();
                (keyword, parts.collect())
            }
        };

        let value = || {
            args.first()
                .map(|v| v.trim_matches('"').to_string())
                .ok_or_else(|| SshConfigError::Syntax {
                    line: line_number,
                    message: format!("{keyword} requires a value"),
                })
        };

        match keyword.as_str() {
            "host" => {
                if args.is_empty() {
                    return Err(SshConfigError::Syntax {
                        line: line_number,
                        message: "Host requires at least one pattern".to_string(),
                    });
                }
                if let Some(block) = current.take() {
                    blocks.push(block);
                }
                current = Some(HostBlock {
                    patterns: args.iter().map(|s| s.to_string()).collect(),
                    ..Default::default()
                });
            }
            "hostname" | "port" | "user" | "identityfile" => {
                let value = value()?;
                if keyword == "port" && value.parse::<u16>().is_err() {
                    return Err(SshConfigError::Syntax {
                        line: line_number,
                        message: format!("invalid port value {value:?}"),
                    });
                }
                let Some(block) = current.as_mut() else {
                    debug!("ignoring global option '{}' at line {}", keyword, line_number);
                    continue;
                };
                let slot = match keyword.as_str() {
                    "hostname" => &mut block.hostname,
                    "port" => &mut block.port,
                    "user" => &mut block.user,
                    _ => &mut block.identity_file,
                };
                slot.get_or_insert(value);
            }
            _ => {}
        }
    }

    if let Some(block) = current {
        blocks.push(block);
    }
    Ok(blocks)
}

/// Values for `alias`, first match wins across blocks in file order.
fn resolve(blocks: &[HostBlock], alias: &str) -> HostBlock {
    let mut resolved = HostBlock::default();
    for block in blocks.iter().filter(|b| matches_host_pattern(alias, &b.patterns)) {
        if resolved.hostname.is_none() {
            resolved.hostname = block.hostname.clone();
        }
        if resolved.port.is_none() {
            resolved.port = block.port.clone();
        }
        if resolved.user.is_none() {
            resolved.user = block.user.clone();
        }
        if resolved.identity_file.is_none() {
            resolved.identity_file = block.identity_file.clone();
        }
    }
    resolved
}

/// A negated pattern that matches excludes the block outright.
fn matches_host_pattern(host: &str, patterns: &[String]) -> bool {
    let mut matched = false;
    for pattern in patterns {
        if let Some(negated) = pattern.strip_prefix('!') {
            if wildcard_match(host, negated) {
                return false;
            }
        } else if wildcard_match(host, pattern) {
            matched = true;
        }
    }
    matched
}

fn wildcard_match(text: &str, pattern: &str) -> bool {
    let text: Vec<char> = text.to_lowercase().chars().collect();
    let pattern: Vec<char> = pattern.to_lowercase().chars().collect();

    // Iterative glob with single-star backtracking.
    let (mut t, mut p) = (0, 0);
    let mut star: Option<(usize, usize)> = None;
    while t < text.len() {
        match pattern.get(p) {
            Some('*') => {
                star = Some((p, t));
                p += 1;
            }
            Some(&c) if c == '?' || c == text[t] => {
                t += 1;
                p += 1;
            }
            _ => match star {
                Some((sp, st)) => {
                    p = sp + 1;
                    t = st + 1;
                    star = Some((sp, st + 1));
                }
                None => return false,
            },
        }
    }
    pattern[p..].iter().all(|&c| c == '*')
}
