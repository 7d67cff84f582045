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

/// Quote a remote path for a POSIX shell.
///
/// The path is wrapped in single quotes with embedded quotes escaped as
/// `'\''`. A leading `~/` (or a bare `~`) is kept outside the quotes as
/// `"$HOME"` so the remote shell still expands it.
pub fn shell_quote_path(path: &str) -> String {
    if path == "~" {
        return "\"$HOME\"".to_string();
    }
    if let Some(rest) = path.strip_prefix("~/") {
        return format!("\"$HOME\"/{}", single_quote(rest));
    }
    single_quote(path)
}

fn single_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', "'\\''"))
}

/// Mask a secret for display: keep a short prefix and the last character.
pub fn mask_secret(secret: &str) -> String {
    const MASK: &str = "***";
    let chars: Vec<char> = secret.chars().collect();
    match chars.len() {
        0 => String::new(),
        1..=3 => format!("{}{MASK}", chars[0]),
        n => format!("{}{}{MASK}{}", chars[0], chars[1], chars[n - 1]),
    }
}

/// Reject commands that can never be sent over an exec channel.
pub fn validate_command(command: &str) -> Result<&str, String> {
    if command.trim().is_empty() {
        return Err("empty command not allowed".to_string());
    }
    if command.contains('\0') {
        return Err("command contains null bytes".to_string());
    }
    Ok(command)
}
