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

use anyhow::{Context, Result};
use clap::Parser;
use owo_colors::OwoColorize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use sshkeep::{
    auth::{PromptError, Prompter, TerminalPrompter},
    cli::{Cli, Commands},
    commands::{
        connect::connect, cp::copy_file, delete::delete_entries, info::show_info,
        list::list_entries, tag::update_tags,
    },
    config::Settings,
    copy::{CopyError, CopyRequest},
    entry::Entry,
    repo::{JsonRepo, Repo},
    resolver::{ssh_config, EntryResolver, PromptPicker, Query},
    session::{terminal::force_terminal_cleanup, Orchestrator, SessionError},
    ssh::{KnownHosts, RusshConnector},
    tunnel::TunnelResolver,
    utils::{expand_home, init_logging, ssh_dir},
};

/// Exit code after Ctrl-C, as a shell reports SIGINT.
const EXIT_CANCELLED: i32 = 130;

#[tokio::main]
async fn main() {
    let code = match run().await {
        Ok(code) => code,
        Err(e) => {
            force_terminal_cleanup();
            if is_cancelled(&e) {
                eprintln!("{}", "cancelled".yellow());
                EXIT_CANCELLED
            } else {
                eprintln!("{} {:#}", "error:".red().bold(), e);
                1
            }
        }
    };
    std::process::exit(code);
}

fn is_cancelled(e: &anyhow::Error) -> bool {
    e.chain().any(|cause| {
        cause
            .downcast_ref::<SessionError>()
            .is_some_and(SessionError::is_cancelled)
            || cause
                .downcast_ref::<CopyError>()
                .is_some_and(CopyError::is_cancelled)
            || matches!(
                cause.downcast_ref::<PromptError>(),
                Some(PromptError::Cancelled)
            )
    })
}

async fn run() -> Result<i32> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let mut settings = Settings::from_env();
    if let Some(db) = &cli.db {
        settings.db_path = expand_home(&db.to_string_lossy());
    }
    if let Some(timeout) = cli.timeout {
        settings.connect_timeout = timeout;
    }
    tracing::debug!("settings: {:?}", settings);

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::debug!("interrupt received, cancelling");
                cancel.cancel();
            }
        }
    });

    let repo = Arc::new(JsonRepo::new(&settings.db_path));
    repo.init()
        .with_context(|| format!("Failed to open store {}", settings.db_path.display()))?;

    let prompter: Arc<dyn Prompter> = Arc::new(TerminalPrompter::new(cancel.clone()));
    let resolver = EntryResolver::new(repo.clone(), Arc::new(PromptPicker::new(prompter.clone())))
        .with_imported(imported_entries(&settings));

    match cli.command {
        Some(Commands::List) => {
            list_entries(repo.as_ref(), resolver.imported())?;
            Ok(0)
        }
        Some(Commands::Delete { ref ids }) => {
            delete_entries(repo.as_ref(), ids)?;
            Ok(0)
        }
        Some(Commands::Tag {
            id,
            ref add,
            ref delete,
        }) => {
            update_tags(repo.as_ref(), id, add, delete)?;
            Ok(0)
        }
        Some(Commands::Info {
            ref keyword,
            id,
            ref server,
            ref tag,
        }) => {
            let query = Query {
                id,
                address: server.clone(),
                tag: tag.clone(),
                keyword: keyword.clone(),
                ..Default::default()
            };
            show_info(&resolver, &query).await?;
            Ok(0)
        }
        Some(Commands::Cp {
            ref source,
            ref target,
            ref keyfile,
            ref jump_server,
        }) => {
            let orchestrator = orchestrator(&settings, repo, prompter)?;
            let request = CopyRequest {
                source: source.clone(),
                target: target.clone(),
                identity_file: keyfile.clone(),
                jump: jump_server.clone(),
            };
            copy_file(&resolver, &orchestrator, &request, &cancel).await?;
            Ok(0)
        }
        None => {
            let orchestrator = orchestrator(&settings, repo, prompter)?;
            let command = cli.remote_command();
            let status = connect(
                &resolver,
                &orchestrator,
                &cli.query(),
                command.as_deref(),
                &cancel,
            )
            .await?;
            Ok(i32::try_from(status).unwrap_or(1))
        }
    }
}

fn orchestrator(
    settings: &Settings,
    repo: Arc<JsonRepo>,
    prompter: Arc<dyn Prompter>,
) -> Result<Orchestrator> {
    let known_hosts = KnownHosts::open_default().context("Failed to locate known_hosts")?;
    tracing::debug!("host keys are checked against {}", known_hosts.path().display());
    let tunnels = TunnelResolver::new(Arc::new(RusshConnector), Arc::new(known_hosts), prompter)
        .with_connect_timeout(settings.connect_timeout)
        .with_keepalive(settings.keepalive);
    Ok(Orchestrator::new(repo, tunnels))
}

/// Hosts from `~/.ssh/config`, when importing is enabled. A broken config
/// file is reported and otherwise ignored.
fn imported_entries(settings: &Settings) -> Vec<Entry> {
    if !settings.import_ssh_config {
        return Vec::new();
    }
    let Some(path) = ssh_dir().map(|dir| dir.join("config")) else {
        return Vec::new();
    };
    match ssh_config::load(&path) {
        Ok(entries) => {
            tracing::debug!("imported {} entries from {}", entries.len(), path.display());
            entries
        }
        Err(e) => {
            tracing::warn!("ignoring {}: {}", path.display(), e);
            Vec::new()
        }
    }
}
