//! The closed set of error kinds the proxy distinguishes between, per
//! §4.7/§7. Call sites match on *kind* to decide the client-visible
//! outcome; the chain of context riding along with each variant comes
//! from `eyre`/`color-eyre` rather than from hand-threaded strings.

use eyre::Report;
use russh::Disconnect;

/// A closed taxonomy of the ways a session can fail, each mapped to a
/// distinct SSH-facing outcome (§7).
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The directory service rejected the offered credential. Surfaced
    /// as an SSH auth failure; the client may retry per SSH rules.
    #[error("invalid credential")]
    InvalidCredential,

    /// The directory service itself could not be reached. Surfaced as
    /// an SSH disconnect with reason "application".
    #[error("directory service unavailable")]
    UpstreamUnavailable(#[source] Report),

    /// The back-end never became ready within the retry schedule, or
    /// the outbound connection to it failed. Surfaced as an SSH
    /// disconnect reading "Failed to connect to internal host".
    #[error("provisioning failed")]
    ProvisioningFailed(#[source] Report),

    /// Either spliced transport errored. The session tears down
    /// silently; both peers merely see their transport close.
    #[error("transport error")]
    TransportError(#[source] Report),

    /// `stop_server` failed. Logged at error level and never surfaced
    /// to either SSH peer.
    #[error("failed to stop back-end server")]
    StopServerFailed(#[source] Report),
}

impl Error {
    /// The `(reason_code, message)` pair to disconnect the client-side
    /// transport with, for the kinds that are surfaced synchronously
    /// during authentication (§7's propagation policy). Kinds that tear
    /// down silently post-splice have no disconnect text of their own.
    #[must_use]
    pub fn disconnect(&self) -> Option<(Disconnect, &'static str)> {
        match self {
            Self::UpstreamUnavailable(_) => Some((Disconnect::ByApplication, "application")),
            Self::ProvisioningFailed(_) => {
                Some((Disconnect::ByApplication, "Failed to connect to internal host"))
            }
            Self::InvalidCredential | Self::TransportError(_) | Self::StopServerFailed(_) => None,
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
