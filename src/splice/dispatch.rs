//! SSH message-type constants and the per-transport dispatch table the
//! splicing engine rewrites at splice time.

use std::collections::HashMap;

/// `SSH_MSG_DISCONNECT`
pub const MSG_DISCONNECT: u8 = 1;
/// `SSH_MSG_IGNORE`
pub const MSG_IGNORE: u8 = 2;
/// `SSH_MSG_UNIMPLEMENTED`
pub const MSG_UNIMPLEMENTED: u8 = 3;
/// `SSH_MSG_DEBUG`
pub const MSG_DEBUG: u8 = 4;
/// `SSH_MSG_SERVICE_REQUEST`
pub const MSG_SERVICE_REQUEST: u8 = 5;
/// `SSH_MSG_SERVICE_ACCEPT`
pub const MSG_SERVICE_ACCEPT: u8 = 6;
/// `SSH_MSG_EXT_INFO`
pub const MSG_EXT_INFO: u8 = 7;
/// `SSH_MSG_USERAUTH_BANNER`
pub const MSG_USERAUTH_BANNER: u8 = 53;
/// `SSH_MSG_GLOBAL_REQUEST`
pub const MSG_GLOBAL_REQUEST: u8 = 80;
/// `SSH_MSG_REQUEST_SUCCESS`
pub const MSG_REQUEST_SUCCESS: u8 = 81;
/// `SSH_MSG_REQUEST_FAILURE`
pub const MSG_REQUEST_FAILURE: u8 = 82;
/// `SSH_MSG_CHANNEL_OPEN`
pub const MSG_CHANNEL_OPEN: u8 = 90;
/// `SSH_MSG_CHANNEL_OPEN_CONFIRMATION`
pub const MSG_CHANNEL_OPEN_CONFIRMATION: u8 = 91;
/// `SSH_MSG_CHANNEL_OPEN_FAILURE`
pub const MSG_CHANNEL_OPEN_FAILURE: u8 = 92;
/// First channel-scoped message type the library would otherwise route
/// through per-channel bookkeeping (window adjust, data, extended data,
/// eof, close, request, success, failure).
pub const MSG_CHANNEL_SCOPED_FIRST: u8 = 93;
/// Last channel-scoped message type (inclusive).
pub const MSG_CHANNEL_SCOPED_LAST: u8 = 100;

/// Message types re-emitted verbatim on the peer transport once spliced,
/// per §4.4. Channel-scoped types (93-100) are handled separately via
/// [`Handler::ChannelBypass`] rather than listed individually here.
pub const FORWARDED_MESSAGE_TYPES: &[u8] = &[
    MSG_IGNORE,
    MSG_UNIMPLEMENTED,
    MSG_DEBUG,
    MSG_SERVICE_ACCEPT,
    MSG_GLOBAL_REQUEST,
    MSG_REQUEST_SUCCESS,
    MSG_REQUEST_FAILURE,
    MSG_CHANNEL_OPEN,
    MSG_CHANNEL_OPEN_CONFIRMATION,
    MSG_CHANNEL_OPEN_FAILURE,
];

/// What the engine does with a given message type once a session is
/// bridged. One table entry per `u8` message type, one table per
/// transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handler {
    /// Re-emit the packet verbatim on the peer transport, recording a
    /// sequence-number mapping first.
    Forward,
    /// Leave the library's original, non-splicing handler in place.
    Local,
    /// `SSH_MSG_UNIMPLEMENTED` needs the sequence-number translation in
    /// [`crate::splice::engine`] rather than a plain forward.
    Unimplemented,
    /// `SSH_MSG_SERVICE_REQUEST` / `SSH_MSG_SERVICE_ACCEPT` need the
    /// `ssh-userauth` carve-out.
    Service,
    /// `SSH_MSG_DISCONNECT` forwards *and* runs the local teardown.
    Disconnect,
    /// Channel-scoped message (93-100): bypass per-channel bookkeeping
    /// entirely and forward verbatim, without the proxy ever allocating
    /// a channel object of its own.
    ChannelBypass,
}

/// Mapping from SSH message type to its current [`Handler`]. Built with
/// the library's defaults ([`DispatchTable::unspliced`]) and then
/// rewritten wholesale by [`crate::splice::engine::splice`].
#[derive(Debug, Clone, Default)]
pub struct DispatchTable {
    entries: HashMap<u8, Handler>,
}

impl DispatchTable {
    /// The table in effect before a session is bridged: every message
    /// type runs its library-provided handler.
    #[must_use]
    pub fn unspliced() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// The table installed at splice time, per §4.4: the control-plane
    /// message types forward, `MSG_UNIMPLEMENTED`/`MSG_SERVICE_REQUEST`/
    /// `MSG_SERVICE_ACCEPT`/`MSG_DISCONNECT` get their special handling,
    /// `MSG_EXT_INFO` is dropped from the table entirely (never
    /// forwarded, never re-emitted), and channel-scoped types bypass.
    #[must_use]
    pub fn spliced() -> Self {
        let mut entries = HashMap::new();

        for &msg_type in FORWARDED_MESSAGE_TYPES {
            entries.insert(msg_type, Handler::Forward);
        }

        entries.insert(MSG_UNIMPLEMENTED, Handler::Unimplemented);
        entries.insert(MSG_SERVICE_REQUEST, Handler::Service);
        entries.insert(MSG_SERVICE_ACCEPT, Handler::Service);
        entries.insert(MSG_DISCONNECT, Handler::Disconnect);
        entries.remove(&MSG_EXT_INFO);

        for msg_type in MSG_CHANNEL_SCOPED_FIRST..=MSG_CHANNEL_SCOPED_LAST {
            entries.insert(msg_type, Handler::ChannelBypass);
        }

        Self { entries }
    }

    /// Looks up how `msg_type` should be handled. Types with no entry
    /// (e.g. `MSG_EXT_INFO` after splice, or anything pre-splice) fall
    /// back to [`Handler::Local`].
    #[must_use]
    pub fn get(&self, msg_type: u8) -> Handler {
        self.entries.get(&msg_type).copied().unwrap_or(Handler::Local)
    }

    pub fn set(&mut self, msg_type: u8, handler: Handler) {
        self.entries.insert(msg_type, handler);
    }

    pub fn clear(&mut self, msg_type: u8) {
        self.entries.remove(&msg_type);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unspliced_table_defaults_everything_local() {
        let table = DispatchTable::unspliced();

        assert_eq!(table.get(MSG_IGNORE), Handler::Local);
        assert_eq!(table.get(MSG_CHANNEL_OPEN), Handler::Local);
        assert_eq!(table.get(MSG_EXT_INFO), Handler::Local);
    }

    #[test]
    fn spliced_table_forwards_the_control_plane() {
        let table = DispatchTable::spliced();

        for &msg_type in FORWARDED_MESSAGE_TYPES {
            if msg_type == MSG_UNIMPLEMENTED {
                continue;
            }
            assert_eq!(table.get(msg_type), Handler::Forward);
        }
    }

    #[test]
    fn spliced_table_special_cases_take_priority() {
        let table = DispatchTable::spliced();

        assert_eq!(table.get(MSG_UNIMPLEMENTED), Handler::Unimplemented);
        assert_eq!(table.get(MSG_SERVICE_REQUEST), Handler::Service);
        assert_eq!(table.get(MSG_SERVICE_ACCEPT), Handler::Service);
        assert_eq!(table.get(MSG_DISCONNECT), Handler::Disconnect);
    }

    #[test]
    fn spliced_table_never_forwards_ext_info() {
        let table = DispatchTable::spliced();

        assert_eq!(table.get(MSG_EXT_INFO), Handler::Local);
    }

    #[test]
    fn spliced_table_bypasses_channel_scoped_types() {
        let table = DispatchTable::spliced();

        for msg_type in MSG_CHANNEL_SCOPED_FIRST..=MSG_CHANNEL_SCOPED_LAST {
            assert_eq!(table.get(msg_type), Handler::ChannelBypass);
        }
    }

    #[test]
    fn userauth_banner_is_left_local() {
        // MSG_USERAUTH_BANNER is never given an entry, so it stays bound
        // to the library's own handler on both transports.
        let table = DispatchTable::spliced();

        assert_eq!(table.get(MSG_USERAUTH_BANNER), Handler::Local);
    }
}
