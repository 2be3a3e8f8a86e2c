use std::net::{Ipv4Addr, SocketAddr};
use std::path::Path;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::time::{timeout, Instant};

use crate::config::ReadinessConfig;
use crate::runner::Runner;

/// The outcome of watching a freshly started runner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    /// The runner accepted a connection on its port.
    Ready,
    /// The runner reported that its port was already taken.
    PortConflict,
    /// The runner process exited during the grace window.
    Exited(Option<i32>),
    /// Nothing went wrong during the grace window, but the runner never confirmed its port either.
    Unconfirmed,
}

impl Readiness {
    /// Whether the runner should be kept.
    pub fn is_accepted(self) -> bool {
        matches!(self, Readiness::Ready | Readiness::Unconfirmed)
    }
}

/// Watch a started runner for the whole grace window.
///
/// A connection on the runner's port only counts once the window has passed with a clean log
/// and a live process, since a foreign listener on a conflicting port accepts connections too.
/// The log is checked before the exit status so that a runner which printed the conflict
/// signature and then exited is reported as a conflict rather than a plain exit.
pub(crate) async fn probe_readiness(runner: &mut Runner, settings: &ReadinessConfig) -> Readiness {
    let deadline = Instant::now() + settings.grace();
    let log_path = runner.log_path();
    let port = runner.port();
    let mut accepted = false;

    loop {
        if log_contains(&log_path, &settings.conflict_signature).await {
            return Readiness::PortConflict;
        }

        if let Some(child) = runner.child_mut() {
            if let Ok(Some(status)) = child.try_wait() {
                if log_contains(&log_path, &settings.conflict_signature).await {
                    return Readiness::PortConflict;
                }
                return Readiness::Exited(status.code());
            }
        }

        if !accepted && port_accepts(port, settings.poll()).await {
            log::trace!("Port {port} is accepting connections");
            accepted = true;
        }

        if Instant::now() >= deadline {
            return if accepted {
                Readiness::Ready
            } else {
                Readiness::Unconfirmed
            };
        }

        tokio::time::sleep(settings.poll()).await;
    }
}

async fn log_contains(path: &Path, signature: &str) -> bool {
    match tokio::fs::read(path).await {
        Ok(content) => String::from_utf8_lossy(&content)
            .to_lowercase()
            .contains(&signature.to_lowercase()),
        Err(_) => false,
    }
}

async fn port_accepts(port: u16, wait: Duration) -> bool {
    let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, port));
    matches!(timeout(wait, TcpStream::connect(addr)).await, Ok(Ok(_)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn signature_match_ignores_case() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("runner.log");
        std::fs::write(&path, "bind failed: Address already in use (os error 98)\n").unwrap();

        assert!(log_contains(&path, "address already in use").await);
        assert!(!log_contains(&path, "permission denied").await);
        assert!(!log_contains(&dir.path().join("missing.log"), "address").await);
    }

    #[tokio::test]
    async fn listening_port_is_ready() {
        let listener = tokio::net::TcpListener::bind((Ipv4Addr::LOCALHOST, 0))
            .await
            .unwrap();
        let port = listener.local_addr().unwrap().port();
        let dir = tempfile::tempdir().unwrap();
        let mut runner = Runner::new(1, port, dir.path().to_path_buf());
        let settings = ReadinessConfig {
            grace_ms: 200,
            poll_ms: 20,
            ..Default::default()
        };

        let readiness = probe_readiness(&mut runner, &settings).await;
        assert_eq!(readiness, Readiness::Ready);
    }

    #[tokio::test]
    async fn late_conflict_wins_over_a_foreign_listener() {
        let listener = tokio::net::TcpListener::bind((Ipv4Addr::LOCALHOST, 0))
            .await
            .unwrap();
        let port = listener.local_addr().unwrap().port();
        let dir = tempfile::tempdir().unwrap();
        let mut runner = Runner::new(1, port, dir.path().to_path_buf());
        let log_path = runner.log_path();
        let settings = ReadinessConfig {
            grace_ms: 500,
            poll_ms: 20,
            ..Default::default()
        };

        let writer = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(150)).await;
            tokio::fs::write(log_path, "listen tcp: bind: Address already in use\n")
                .await
                .unwrap();
        });

        assert_eq!(
            probe_readiness(&mut runner, &settings).await,
            Readiness::PortConflict
        );
        writer.await.unwrap();
    }

    #[tokio::test]
    async fn quiet_runner_is_unconfirmed_after_grace() {
        let dir = tempfile::tempdir().unwrap();
        let port = {
            let l = std::net::TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
            l.local_addr().unwrap().port()
        };
        let mut runner = Runner::new(1, port, dir.path().to_path_buf());
        let settings = ReadinessConfig {
            grace_ms: 100,
            poll_ms: 20,
            ..Default::default()
        };

        assert_eq!(
            probe_readiness(&mut runner, &settings).await,
            Readiness::Unconfirmed
        );
    }
}
