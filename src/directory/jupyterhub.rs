//! The shipped [`DirectoryService`] binding, talking to a JupyterHub
//! Hub process over its REST API (§4.1.1, §6). Grounded directly on
//! `jupyter_hub_directory_service.py` from the tool this proxy
//! reimplements, with the header bug (`Authentication:` instead of
//! `Authorization:`) corrected per §9 and the `400 => already running`
//! behavior kept for parity, isolated in [`map_start_status`] so it is
//! easy to correct later.

use reqwest::{Client, StatusCode, Url};
use serde::Deserialize;
use tracing::{debug, error, info, warn};

use super::{DirectoryService, ForwardingArgs, HostKeyPolicy, StartOutcome};
use crate::error::Error;

/// A `DirectoryService` backed by a single JupyterHub Hub's admin API,
/// authenticated with a per-user API token treated as the SSH password.
pub struct JupyterHub {
    client: Client,
    hub_url: Url,
}

#[derive(Debug, Deserialize)]
struct UserModel {
    server: Option<String>,
}

impl JupyterHub {
    /// Builds a client against `hub_url`, e.g. `https://hub.example.org`.
    pub fn new(hub_url: Url) -> Self {
        Self {
            client: Client::new(),
            hub_url,
        }
    }

    fn url(&self, path: &str) -> Url {
        self.hub_url
            .join(path)
            .unwrap_or_else(|_| self.hub_url.clone())
    }

    fn authorization(token: &str) -> String {
        format!("token {token}")
    }

    async fn get(&self, connection_id: &str, path: &str, token: &str) -> Result<reqwest::Response, Error> {
        self.client
            .get(self.url(path))
            .header(reqwest::header::AUTHORIZATION, Self::authorization(token))
            .send()
            .await
            .map_err(|e| {
                error!(connection_id, "failed to connect to jupyter hub");
                Error::UpstreamUnavailable(e.into())
            })
    }
}

#[async_trait::async_trait]
impl DirectoryService for JupyterHub {
    async fn validate_auth(
        &self,
        connection_id: &str,
        username: &str,
        auth_secret: &str,
    ) -> Result<bool, Error> {
        let exists = self
            .get(connection_id, &format!("hub/api/users/{username}"), auth_secret)
            .await?;

        if !exists.status().is_success() {
            info!(connection_id, username, "unknown user");
            return Ok(false);
        }

        let token_valid = self
            .get(
                connection_id,
                &format!("hub/api/users/{username}/tokens/{auth_secret}"),
                auth_secret,
            )
            .await?;

        if !token_valid.status().is_success() {
            info!(connection_id, username, "invalid token");
            return Ok(false);
        }

        info!(connection_id, username, "user successfully logged in");

        Ok(true)
    }

    async fn get_forwarding_args(
        &self,
        connection_id: &str,
        username: &str,
        auth_secret: &str,
    ) -> Result<(String, ForwardingArgs), Error> {
        let response = self
            .client
            .post(self.url(&format!("hub/api/users/{username}")))
            .header(reqwest::header::AUTHORIZATION, Self::authorization(auth_secret))
            .send()
            .await
            .map_err(|e| Error::UpstreamUnavailable(e.into()))?;

        if !response.status().is_success() {
            return Err(Error::ProvisioningFailed(eyre::eyre!(
                "failed to retrieve forwarding information for {username}"
            )));
        }

        let body = response
            .text()
            .await
            .map_err(|e| Error::UpstreamUnavailable(e.into()))?;

        let model: UserModel =
            serde_path_to_error::deserialize(&mut serde_json::Deserializer::from_str(&body))
                .map_err(|e| Error::ProvisioningFailed(eyre::eyre!(e.to_string())))?;

        let host = model.server.ok_or_else(|| {
            Error::ProvisioningFailed(eyre::eyre!("hub response for {username} has no server field"))
        })?;

        debug!(connection_id, host, "connecting to back-end");

        Ok((
            host,
            ForwardingArgs {
                port: 22,
                username: username.to_string(),
                password: auth_secret.to_string(),
                host_key_policy: HostKeyPolicy::Trust,
            },
        ))
    }

    async fn start_server_once(
        &self,
        connection_id: &str,
        username: &str,
        auth_secret: &str,
    ) -> Result<StartOutcome, Error> {
        debug!(connection_id, "attempting to start container");

        let response = self
            .client
            .post(self.url(&format!("hub/api/users/{username}/server")))
            .header(reqwest::header::AUTHORIZATION, Self::authorization(auth_secret))
            .send()
            .await
            .map_err(|e| Error::UpstreamUnavailable(e.into()))?;

        map_start_status(connection_id, response.status())
    }

    async fn stop_server(
        &self,
        connection_id: &str,
        username: &str,
        auth_secret: &str,
    ) -> Result<(), Error> {
        debug!(connection_id, "attempting to stop container");

        let response = self
            .client
            .delete(self.url(&format!("hub/api/users/{username}/server")))
            .header(reqwest::header::AUTHORIZATION, Self::authorization(auth_secret))
            .send()
            .await
            .map_err(|e| Error::StopServerFailed(e.into()))?;

        if response.status().is_success() {
            debug!(connection_id, "stopped unused container");
            Ok(())
        } else {
            warn!(connection_id, username, "failed to stop unused container");
            Err(Error::StopServerFailed(eyre::eyre!(
                "hub returned {} stopping {username}'s server",
                response.status()
            )))
        }
    }
}

/// `201`/`400` mean the container is running (§9 carries the original
/// tool's documented `400` bug forward for parity pending confirmation
/// against the live Hub's contract); `202` means still starting;
/// anything else is a hard failure.
fn map_start_status(connection_id: &str, status: StatusCode) -> Result<StartOutcome, Error> {
    match status {
        StatusCode::CREATED | StatusCode::BAD_REQUEST => {
            info!(connection_id, %status, "container started");
            Ok(StartOutcome::Ready)
        }
        StatusCode::ACCEPTED => Ok(StartOutcome::Pending),
        other => {
            error!(connection_id, %other, "failed to start container");
            Err(Error::ProvisioningFailed(eyre::eyre!(
                "hub returned unexpected status {other} starting container"
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_created_and_bad_request_to_ready() {
        assert_eq!(
            map_start_status("c1", StatusCode::CREATED).unwrap(),
            StartOutcome::Ready
        );
        assert_eq!(
            map_start_status("c1", StatusCode::BAD_REQUEST).unwrap(),
            StartOutcome::Ready
        );
    }

    #[test]
    fn maps_accepted_to_pending() {
        assert_eq!(
            map_start_status("c1", StatusCode::ACCEPTED).unwrap(),
            StartOutcome::Pending
        );
    }

    #[test]
    fn maps_anything_else_to_provisioning_failed() {
        assert!(matches!(
            map_start_status("c1", StatusCode::INTERNAL_SERVER_ERROR),
            Err(Error::ProvisioningFailed(_))
        ));
    }
}
