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

use anyhow::{bail, Context, Result};
use owo_colors::OwoColorize;
use std::io::{self, Write};

use crate::entry::Entry;
use crate::repo::Repo;

pub fn list_entries(repo: &dyn Repo, imported: &[Entry]) -> Result<()> {
    let stored: Vec<Entry> = repo
        .get_all_entries()
        .context("Failed to read saved entries")?
        .into_values()
        .collect();
    if stored.is_empty() && imported.is_empty() {
        bail!("no entries yet, log in to a host once to save it");
    }

    let stdout = io::stdout();
    write_entries(&mut stdout.lock(), &stored, imported)?;
    Ok(())
}

/// `stored` is expected in id order, as the repository returns it.
fn write_entries(out: &mut impl Write, stored: &[Entry], imported: &[Entry]) -> io::Result<()> {
    if !stored.is_empty() {
        writeln!(out, "\n{} {}\n", "▶".cyan(), "Saved entries".bold())?;
        let width = stored
            .iter()
            .map(|e| e.to_string().len())
            .max()
            .unwrap_or(0);
        for entry in stored {
            let address = format!("{:<width$}", entry.to_string());
            writeln!(
                out,
                "  {:>4}  {}  {}",
                entry.id.to_string().yellow(),
                address.bold(),
                entry.tags.join(",").dimmed()
            )?;
        }
    }

    if !imported.is_empty() {
        writeln!(out, "\n{} {}\n", "▶".cyan(), "From ~/.ssh/config".bold())?;
        for entry in imported {
            writeln!(
                out,
                "  {} {}  {}",
                "●".blue(),
                entry,
                entry.tags.join(",").dimmed()
            )?;
        }
    }
    writeln!(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::EntrySource;

    fn entry(id: u64, host: &str, tags: &[&str]) -> Entry {
        let mut e = Entry {
            id,
            host: host.to_string(),
            tags: tags.iter().map(|t| t.to_string()).collect(),
            ..Default::default()
        };
        e.tidy().unwrap();
        e
    }

    #[test]
    fn test_stored_before_imported() {
        let stored = vec![entry(1, "10.0.0.1", &["db"]), entry(2, "web.lan", &[])];
        let mut lab = entry(0, "lab.example.com", &["lab"]);
        lab.source = EntrySource::SshConfig;

        let mut out = Vec::new();
        write_entries(&mut out, &stored, &[lab]).unwrap();
        let text = String::from_utf8(out).unwrap();

        let first = text.find("root@10.0.0.1:22").unwrap();
        let second = text.find("root@web.lan:22").unwrap();
        let imported = text.find("root@lab.example.com:22").unwrap();
        assert!(first < second && second < imported);
        assert!(text.contains("db"));
    }

    #[test]
    fn test_only_imported() {
        let mut out = Vec::new();
        write_entries(&mut out, &[], &[entry(0, "lab", &["lab"])]).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(!text.contains("Saved entries"));
        assert!(text.contains("root@lab:22"));
    }
}
