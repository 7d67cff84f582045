use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sshkeep::auth::{PromptError, Prompter};
use sshkeep::copy::{Copier, CopyError, CopyRequest, CpPath, RemoteHost};
use sshkeep::entry::Entry;
use sshkeep::repo::{JsonRepo, Repo};
use sshkeep::resolver::{EntryResolver, Picker, ResolveError};
use sshkeep::session::Orchestrator;
use sshkeep::ssh::{KnownHosts, RusshConnector};
use sshkeep::tunnel::TunnelResolver;
use tempfile::TempDir;
use tokio_test::{assert_err, assert_ok};
use tokio_util::sync::CancellationToken;
use zeroize::Zeroizing;

/// Fails the test if anything tries to ask the user.
struct NoPrompts;

#[async_trait]
impl Prompter for NoPrompts {
    async fn secret(&self, prompt: &str) -> Result<Zeroizing<String>, PromptError> {
        panic!("unexpected secret prompt: {prompt}");
    }

    async fn line(&self, prompt: &str) -> Result<String, PromptError> {
        panic!("unexpected prompt: {prompt}");
    }
}

struct NoPicker;

#[async_trait]
impl Picker for NoPicker {
    async fn pick(&self, title: &str, _entries: &[Entry]) -> Result<usize, ResolveError> {
        panic!("unexpected picker: {title}");
    }
}

fn wiring(dir: &TempDir) -> (EntryResolver, Orchestrator, Arc<JsonRepo>) {
    let repo = Arc::new(JsonRepo::new(dir.path().join("store.json")));
    assert_ok!(repo.init());
    let tunnels = TunnelResolver::new(
        Arc::new(RusshConnector),
        Arc::new(KnownHosts::new(dir.path().join("known_hosts"))),
        Arc::new(NoPrompts),
    )
    .with_connect_timeout(Duration::from_millis(200));
    let resolver = EntryResolver::new(repo.clone(), Arc::new(NoPicker));
    let orchestrator = Orchestrator::new(repo.clone(), tunnels).with_ssh_dir(None);
    (resolver, orchestrator, repo)
}

#[tokio::test]
async fn test_local_to_local_copy_is_rejected() {
    let dir = TempDir::new().unwrap();
    let (resolver, orchestrator, repo) = wiring(&dir);
    let source = dir.path().join("a.txt");
    std::fs::write(&source, b"data").unwrap();

    let request = CopyRequest {
        source: source.display().to_string(),
        target: dir.path().join("b.txt").display().to_string(),
        ..Default::default()
    };
    let err = assert_err!(
        Copier::new(&resolver, &orchestrator)
            .copy(&request, &CancellationToken::new())
            .await
    );

    assert!(matches!(err, CopyError::LocalToLocal));
    assert!(err
        .to_string()
        .contains("use your operating system's cp command"));
    assert!(!dir.path().join("b.txt").exists());
    assert!(!dir.path().join("known_hosts").exists());
    assert!(assert_ok!(repo.get_all_entries()).is_empty());
}

#[test]
fn test_operand_classification() {
    assert!(!CpPath::parse("./build/out.tar").is_remote());
    assert!(!CpPath::parse("relative/file").is_remote());

    match CpPath::parse("deploy@10.2.0.4:2200:/srv/app.tar") {
        CpPath::Remote {
            host: RemoteHost::Address { user, host, port },
            path,
        } => {
            assert_eq!(user.as_deref(), Some("deploy"));
            assert_eq!(host, "10.2.0.4");
            assert_eq!(port.as_deref(), Some("2200"));
            assert_eq!(path, "/srv/app.tar");
        }
        other => panic!("unexpected {other:?}"),
    }

    assert_eq!(
        CpPath::parse("web:~/logs/app.log"),
        CpPath::Remote {
            host: RemoteHost::Keyword("web".to_string()),
            path: "~/logs/app.log".to_string(),
        }
    );
}
