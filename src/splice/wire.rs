//! Minimal helpers for picking fields out of an SSH packet payload
//! (RFC 4253 §5 data type encodings), used only for the handful of
//! message types the engine needs to peek inside: `MSG_UNIMPLEMENTED`'s
//! sequence number and `MSG_SERVICE_REQUEST`/`MSG_SERVICE_ACCEPT`'s
//! service name.

/// Reads the leading `uint32` of `payload`, as carried by
/// `SSH_MSG_UNIMPLEMENTED`.
#[must_use]
pub fn read_uint32(payload: &[u8]) -> Option<u32> {
    let bytes: [u8; 4] = payload.get(0..4)?.try_into().ok()?;

    Some(u32::from_be_bytes(bytes))
}

/// Encodes `value` as the sole field of an `SSH_MSG_UNIMPLEMENTED`
/// payload.
#[must_use]
pub fn write_uint32(value: u32) -> Vec<u8> {
    value.to_be_bytes().to_vec()
}

/// Reads the leading `string` of `payload` (a 4-byte big-endian length
/// prefix followed by that many bytes), as carried by
/// `SSH_MSG_SERVICE_REQUEST`/`SSH_MSG_SERVICE_ACCEPT`.
#[must_use]
pub fn read_ssh_string(payload: &[u8]) -> Option<&[u8]> {
    let len = read_uint32(payload)? as usize;

    payload.get(4..4 + len)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_a_uint32() {
        let payload = write_uint32(0xDEAD_BEEF);

        assert_eq!(read_uint32(&payload), Some(0xDEAD_BEEF));
    }

    #[test]
    fn short_payload_has_no_uint32() {
        assert_eq!(read_uint32(&[1, 2, 3]), None);
    }

    #[test]
    fn reads_a_service_name() {
        let mut payload = write_uint32(12);
        payload.extend_from_slice(b"ssh-userauth");

        assert_eq!(read_ssh_string(&payload), Some(&b"ssh-userauth"[..]));
    }

    #[test]
    fn truncated_string_is_rejected() {
        let mut payload = write_uint32(100);
        payload.extend_from_slice(b"short");

        assert_eq!(read_ssh_string(&payload), None);
    }
}
