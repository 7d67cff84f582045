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

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

use crate::config::{parse_duration, ENV_DB_PATH};
use crate::resolver::Query;

#[derive(Parser, Debug)]
#[command(
    name = "sshkeep",
    version,
    about = "sshkeep - an SSH client that remembers where you have been",
    long_about = "sshkeep remembers every host you log in to, together with its credentials, tags\nand jump chain. Later logins only need a fragment of the address, a tag or the\nnumeric id shown by 'sshkeep list'. Saved passwords are sealed at rest.",
    after_help = "EXAMPLES:\n  First login:                   sshkeep root@10.0.0.5:2222\n  Through jump hosts:            sshkeep -J ops@bastion,10.0.1.1 db.internal\n  Login again by fragment:       sshkeep 0.5\n  Login by id or tag:            sshkeep -i 3 / sshkeep -t prod\n  Run a command:                 sshkeep web uptime\n  Copy between two servers:      sshkeep cp web:/var/log/app.log backup:/srv/logs/"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    #[arg(
        help = "Address ([user@]host[:port]), tag, or any fragment of a saved entry\nWithout it a numbered list of all entries is shown"
    )]
    pub keyword: Option<String>,

    #[arg(short = 'i', long = "id", help = "Entry id as shown by 'sshkeep list'")]
    pub id: Option<u64>,

    #[arg(
        short = 's',
        long = "server",
        help = "Target server address\nFormat: [user@]host[:port]"
    )]
    pub server: Option<String>,

    #[arg(short = 't', long = "tag", help = "Search entries by tag")]
    pub tag: Option<String>,

    #[arg(short = 'k', long = "keyfile", help = "Identity file to authenticate with")]
    pub keyfile: Option<String>,

    #[arg(
        short = 'J',
        long = "jump-server",
        help = "Jump hosts, separated by commas\nFormat: [user1@]host1[:port1][,[user2@]host2[:port2]...]"
    )]
    pub jump_server: Option<String>,

    #[arg(short = 'c', long = "cmd", help = "Execute the command and exit")]
    pub cmd: Option<String>,

    #[arg(
        long,
        value_parser = parse_timeout,
        help = "Connect timeout per hop, e.g. 10, 5s, 500ms, 1m30s [default: 10s]"
    )]
    pub timeout: Option<Duration>,

    #[arg(
        long,
        env = ENV_DB_PATH,
        help = "File that stores saved entries [default: ~/.sshkeep.json]"
    )]
    pub db: Option<PathBuf>,

    #[arg(
        short = 'v',
        long,
        global = true,
        action = clap::ArgAction::Count,
        help = "Increase verbosity (-v, -vv, -vvv)"
    )]
    pub verbose: u8,

    #[arg(
        trailing_var_arg = true,
        allow_hyphen_values = true,
        help = "Command to execute instead of a login shell"
    )]
    pub command_args: Vec<String>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    #[command(
        visible_aliases = ["ls", "l"],
        about = "List all entries",
        long_about = "Lists saved entries ordered by id, followed by hosts imported from\n~/.ssh/config when SSHKEEP_IMPORT_SSH_CONFIG is set."
    )]
    List,

    #[command(
        visible_aliases = ["d", "del"],
        about = "Delete entries by id",
        after_help = "Examples:\n  sshkeep delete --id 1\n  sshkeep delete --id 1 --id 4"
    )]
    Delete {
        #[arg(long = "id", value_delimiter = ',', help = "Entry id (repeatable)")]
        ids: Vec<u64>,
    },

    #[command(
        about = "Add or delete tags of an entry",
        after_help = "Examples:\n  sshkeep tag -i 2 -t prod -t db\n  sshkeep tag -i 2 -d staging"
    )]
    Tag {
        #[arg(short = 'i', long = "id", help = "Entry id")]
        id: u64,

        #[arg(short = 't', long = "tag", value_delimiter = ',', help = "Tag to add")]
        add: Vec<String>,

        #[arg(short = 'd', long = "delete", value_delimiter = ',', help = "Tag to delete")]
        delete: Vec<String>,
    },

    #[command(about = "Show the details of an entry, with secrets masked")]
    Info {
        #[arg(help = "Keyword to search for")]
        keyword: Option<String>,

        #[arg(long = "id", help = "Entry id")]
        id: Option<u64>,

        #[arg(short = 's', long = "server", help = "Target server address")]
        server: Option<String>,

        #[arg(short = 't', long = "tag", help = "Search entries by tag")]
        tag: Option<String>,
    },

    #[command(
        about = "Copy a file from, to, or between remote hosts",
        long_about = "Copies a single file. Either side may be remote, written as\n[user@]host[:port]:path or keyword:path. When both sides are remote the\nbytes are streamed from one host to the other without touching local disk.",
        after_help = "Examples:\n  sshkeep cp ./app.tar.gz web:/tmp/\n  sshkeep cp root@10.0.0.5:/etc/hosts ./hosts\n  sshkeep cp web:/var/log/app.log backup:/srv/logs/"
    )]
    Cp {
        #[arg(help = "Source file")]
        source: String,

        #[arg(help = "Destination file or directory")]
        target: String,

        #[arg(short = 'k', long = "keyfile", help = "Identity file to authenticate with")]
        keyfile: Option<String>,

        #[arg(short = 'J', long = "jump-server", help = "Jump hosts, separated by commas")]
        jump_server: Option<String>,
    },
}

fn parse_timeout(value: &str) -> Result<Duration, String> {
    match parse_duration(value)? {
        d if d.is_zero() => Err("timeout must be positive".to_string()),
        d => Ok(d),
    }
}

impl Cli {
    /// Entry selection flags of the top-level invocation.
    pub fn query(&self) -> Query {
        Query {
            id: self.id,
            address: self.server.clone(),
            tag: self.tag.clone(),
            keyword: self.keyword.clone(),
            identity_file: self.keyfile.clone(),
            jump: self.jump_server.clone(),
        }
    }

    /// `-c` wins; otherwise everything after the keyword is the command.
    pub fn remote_command(&self) -> Option<String> {
        if let Some(cmd) = self.cmd.as_deref().filter(|c| !c.trim().is_empty()) {
            return Some(cmd.to_string());
        }
        if self.command_args.is_empty() {
            None
        } else {
            Some(self.command_args.join(" "))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("sshkeep").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_keyword_and_trailing_command() {
        let cli = parse(&["web", "uname", "-a"]);
        assert!(cli.command.is_none());
        assert_eq!(cli.keyword.as_deref(), Some("web"));
        assert_eq!(cli.remote_command().as_deref(), Some("uname -a"));
    }

    #[test]
    fn test_cmd_flag_wins() {
        let cli = parse(&["-c", "uptime", "web", "whoami"]);
        assert_eq!(cli.remote_command().as_deref(), Some("uptime"));
        assert!(parse(&["web"]).remote_command().is_none());
    }

    #[test]
    fn test_query_flags() {
        let cli = parse(&["-i", "3", "-k", "~/.ssh/ops", "-J", "a@jump:2222,b@jump2"]);
        let query = cli.query();
        assert_eq!(query.id, Some(3));
        assert_eq!(query.identity_file.as_deref(), Some("~/.ssh/ops"));
        assert_eq!(query.jump.as_deref(), Some("a@jump:2222,b@jump2"));
        assert!(query.keyword.is_none());
    }

    #[test]
    fn test_timeout_parsing() {
        assert_eq!(parse(&["--timeout", "1m30s", "web"]).timeout, Some(Duration::from_secs(90)));
        assert!(Cli::try_parse_from(["sshkeep", "--timeout", "0", "web"]).is_err());
        assert!(Cli::try_parse_from(["sshkeep", "--timeout", "soon", "web"]).is_err());
    }

    #[test]
    fn test_subcommands() {
        assert!(matches!(parse(&["ls"]).command, Some(Commands::List)));
        assert!(matches!(parse(&["-v", "list"]).command, Some(Commands::List)));

        match parse(&["delete", "--id", "1", "--id", "4"]).command {
            Some(Commands::Delete { ids }) => assert_eq!(ids, vec![1, 4]),
            other => panic!("unexpected {other:?}"),
        }
        match parse(&["tag", "-i", "2", "-t", "prod", "-t", "db", "-d", "old"]).command {
            Some(Commands::Tag { id, add, delete }) => {
                assert_eq!(id, 2);
                assert_eq!(add, vec!["prod", "db"]);
                assert_eq!(delete, vec!["old"]);
            }
            other => panic!("unexpected {other:?}"),
        }
        match parse(&["cp", "./a", "web:/tmp/", "-J", "bastion"]).command {
            Some(Commands::Cp {
                source,
                target,
                jump_server,
                ..
            }) => {
                assert_eq!(source, "./a");
                assert_eq!(target, "web:/tmp/");
                assert_eq!(jump_server.as_deref(), Some("bastion"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_tag_requires_id() {
        assert!(Cli::try_parse_from(["sshkeep", "tag", "-t", "prod"]).is_err());
    }
}
