//! Session lifecycle state (§4.2's transition table). Kept as a bare
//! tag alongside the fields it doesn't duplicate - username, auth
//! secret, the two transports - which live on `Session` itself,
//! consistent with §3 listing `state` as its own attribute rather than
//! folding the rest of the data model into enum variants.

use eyre::{eyre, Result};

use super::metrics::UNEXPECTED_STATE;

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::AsRefStr, Default)]
pub enum State {
    #[default]
    Connected,
    Authenticating,
    Provisioning,
    Bridged,
    Closed,
}

impl State {
    /// `Connected` -> `Authenticating`: a password has been offered and
    /// is being checked against the directory service.
    pub fn authenticating(&mut self) -> Result<()> {
        self.transition(Self::Connected, Self::Authenticating)
    }

    /// `Authenticating` -> `Connected`: the directory service rejected
    /// the credential. The client is free to retry per SSH rules.
    pub fn rejected(&mut self) -> Result<()> {
        self.transition(Self::Authenticating, Self::Connected)
    }

    /// `Authenticating` -> `Provisioning`: the credential was accepted
    /// and the back-end start/connect sequence has begun.
    pub fn provisioning(&mut self) -> Result<()> {
        self.transition(Self::Authenticating, Self::Provisioning)
    }

    /// `Provisioning` -> `Bridged`: both handshakes have reached the
    /// authenticated state and the splice is installed.
    pub fn bridged(&mut self) -> Result<()> {
        self.transition(Self::Provisioning, Self::Bridged)
    }

    /// Any state -> `Closed`. Idempotent, since teardown can race a
    /// client disconnect against a provisioning failure.
    pub fn closed(&mut self) {
        *self = Self::Closed;
    }

    fn transition(&mut self, expected: Self, to: Self) -> Result<()> {
        if *self != expected {
            UNEXPECTED_STATE
                .with_label_values(&[self.as_ref(), to.as_ref()])
                .inc();

            return Err(eyre!(
                "cannot move to {to:?} from {self:?}, expected {expected:?}"
            ));
        }

        *self = to;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn walks_the_happy_path() {
        let mut state = State::default();
        state.authenticating().unwrap();
        state.provisioning().unwrap();
        state.bridged().unwrap();

        assert_eq!(state, State::Bridged);
    }

    #[test]
    fn rejection_returns_to_connected() {
        let mut state = State::default();
        state.authenticating().unwrap();
        state.rejected().unwrap();

        assert_eq!(state, State::Connected);
    }

    #[test]
    fn out_of_order_transition_is_rejected() {
        let mut state = State::default();

        assert!(state.provisioning().is_err());
        assert_eq!(state, State::Connected);
    }

    #[test]
    fn close_is_idempotent_from_any_state() {
        let mut state = State::default();
        state.closed();
        state.closed();

        assert_eq!(state, State::Closed);
    }
}
