//! The directory service: the injected capability that knows how to
//! validate a credential and provision/tear down a user's back-end
//! server (§4.1). `jupyterhub` is the one binding shipped in this
//! repository; anything implementing [`DirectoryService`] can stand in
//! for it, which is also what keeps the retry schedule below testable
//! against a stub HTTP layer instead of a live Hub.

pub mod jupyterhub;
mod metrics;

use std::time::Duration;

use tracing::{debug, warn};

use crate::error::Error;
use metrics::PROVISIONING_RETRIES;

/// The back-end host plus the options bag `get_forwarding_args`
/// returns (§3, §4.1): enough for the back-end connector to open an
/// outbound SSH client connection on the user's behalf.
#[derive(Debug, Clone)]
pub struct ForwardingArgs {
    pub port: u16,
    pub username: String,
    pub password: String,
    pub host_key_policy: HostKeyPolicy,
}

/// Whether and how the back-end connector verifies the host key the
/// back-end offers. Deferred and defaulted to `Trust` per the open
/// question in §9: the back-end's identity is already vouched for by
/// the directory service that just started it, so TOFU is deliberately
/// not implemented. Pluggable via the `known_hosts` entry the options
/// bag may carry.
#[derive(Debug, Clone, Default)]
pub enum HostKeyPolicy {
    #[default]
    Trust,
    KnownHosts(std::path::PathBuf),
}

/// Outcome of a single, non-retrying poll of `start_server` (§4.1).
/// [`retrying_start`] turns a sequence of these into the doubling
/// backoff schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    Ready,
    Pending,
}

/// The four operations consumed from the directory service (§4.1),
/// all scoped to one `(connection_id, username, auth_secret)` tuple.
/// Implementations must be safe to call concurrently across sessions
/// (§5, "shared resources").
#[async_trait::async_trait]
pub trait DirectoryService: Send + Sync {
    /// Returns whether `auth_secret` authenticates `username`.
    async fn validate_auth(
        &self,
        connection_id: &str,
        username: &str,
        auth_secret: &str,
    ) -> Result<bool, Error>;

    /// Returns the back-end host and the options needed to connect to
    /// it.
    async fn get_forwarding_args(
        &self,
        connection_id: &str,
        username: &str,
        auth_secret: &str,
    ) -> Result<(String, ForwardingArgs), Error>;

    /// Polls once whether the back-end server is running, requesting
    /// that it be started if it is not. Idempotent.
    async fn start_server_once(
        &self,
        connection_id: &str,
        username: &str,
        auth_secret: &str,
    ) -> Result<StartOutcome, Error>;

    /// Best-effort request that the back-end server be stopped.
    async fn stop_server(
        &self,
        connection_id: &str,
        username: &str,
        auth_secret: &str,
    ) -> Result<(), Error>;
}

/// The initial retry delay and doubling cap from §4.1: start at 10s,
/// double on each `Pending`, and give up once the *delay* (not the
/// elapsed total) would exceed 60s.
const INITIAL_RETRY: Duration = Duration::from_secs(10);
const RETRY_CAP: Duration = Duration::from_secs(60);

/// Drives `start_server_once` to completion per the doubling schedule
/// in §4.1/§9: `started`/`already-running` succeeds immediately,
/// `pending` sleeps and retries with the delay doubled, and the loop
/// surfaces [`Error::ProvisioningFailed`] once the next delay would
/// exceed [`RETRY_CAP`].
pub async fn retrying_start(
    directory: &dyn DirectoryService,
    connection_id: &str,
    username: &str,
    auth_secret: &str,
) -> Result<(), Error> {
    let mut retry = INITIAL_RETRY;

    loop {
        debug!(connection_id, "attempting to start back-end server");

        match directory
            .start_server_once(connection_id, username, auth_secret)
            .await?
        {
            StartOutcome::Ready => {
                debug!(connection_id, "back-end server ready");
                return Ok(());
            }
            StartOutcome::Pending if retry <= RETRY_CAP => {
                PROVISIONING_RETRIES.inc();
                debug!(connection_id, delay_secs = retry.as_secs(), "back-end pending, retrying");
                tokio::time::sleep(retry).await;
                retry *= 2;
            }
            StartOutcome::Pending => {
                warn!(connection_id, "back-end did not become ready within the retry schedule");
                return Err(Error::ProvisioningFailed(eyre::eyre!(
                    "failed to start back-end server for {username}"
                )));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    struct Scripted {
        outcomes: Vec<StartOutcome>,
        calls: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl DirectoryService for Scripted {
        async fn validate_auth(&self, _: &str, _: &str, _: &str) -> Result<bool, Error> {
            Ok(true)
        }

        async fn get_forwarding_args(
            &self,
            _: &str,
            _: &str,
            _: &str,
        ) -> Result<(String, ForwardingArgs), Error> {
            unimplemented!()
        }

        async fn start_server_once(&self, _: &str, _: &str, _: &str) -> Result<StartOutcome, Error> {
            let i = self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.outcomes[i.min(self.outcomes.len() - 1)])
        }

        async fn stop_server(&self, _: &str, _: &str, _: &str) -> Result<(), Error> {
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_immediately_when_already_running() {
        let svc = Scripted {
            outcomes: vec![StartOutcome::Ready],
            calls: AtomicUsize::new(0),
        };

        retrying_start(&svc, "c1", "alice", "tok").await.unwrap();

        assert_eq!(svc.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_with_doubling_delay_then_succeeds() {
        let svc = Scripted {
            outcomes: vec![
                StartOutcome::Pending,
                StartOutcome::Pending,
                StartOutcome::Ready,
            ],
            calls: AtomicUsize::new(0),
        };

        let start = tokio::time::Instant::now();
        retrying_start(&svc, "c1", "alice", "tok").await.unwrap();
        let elapsed = start.elapsed();

        assert_eq!(svc.calls.load(Ordering::SeqCst), 3);
        // 10s then 20s of sleeping between the three polls.
        assert_eq!(elapsed, Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_once_the_delay_would_exceed_the_cap() {
        let svc = Scripted {
            outcomes: vec![
                StartOutcome::Pending, // retry = 10 -> sleep 10, retry becomes 20
                StartOutcome::Pending, // retry = 20 -> sleep 20, retry becomes 40
                StartOutcome::Pending, // retry = 40 -> sleep 40, retry becomes 80
                StartOutcome::Pending, // retry = 80 > 60 cap -> fail
            ],
            calls: AtomicUsize::new(0),
        };

        let err = retrying_start(&svc, "c1", "alice", "tok").await.unwrap_err();

        assert!(matches!(err, Error::ProvisioningFailed(_)));
        assert_eq!(svc.calls.load(Ordering::SeqCst), 4);
    }
}
