//! Fixed-width payload codec.
//!
//! The payload is the 32-byte wire form of a `(device_id, session_id)` pair:
//!
//! ```text
//! [16 bytes] device_id   (UTF-8, null-padded)
//! [16 bytes] session_id  (UTF-8, null-padded)
//! ```
//!
//! Longer identifiers are cut at the last character boundary that fits in 16
//! bytes. Decoding strips trailing null bytes, so an identifier that itself
//! ends in `\0` (or is all `\0`) does not survive a round-trip.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{Error, Result};

/// Width of each identifier field in bytes.
pub const FIELD_LEN: usize = 16;
/// Total payload size in bytes.
pub const PAYLOAD_LEN: usize = 2 * FIELD_LEN;
/// Total payload size in bits.
pub const PAYLOAD_BITS: usize = PAYLOAD_LEN * 8;

/// The 32 raw payload bytes hidden in an image.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Payload {
    raw: [u8; PAYLOAD_LEN],
}

impl Payload {
    /// Pack a device and session identifier into a payload.
    #[must_use]
    pub fn new(device_id: &str, session_id: &str) -> Self {
        Self {
            raw: encode(device_id, session_id),
        }
    }

    /// Wrap already-packed payload bytes.
    #[must_use]
    pub fn from_bytes(raw: [u8; PAYLOAD_LEN]) -> Self {
        Self { raw }
    }

    /// The raw wire bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; PAYLOAD_LEN] {
        &self.raw
    }

    /// The 256 payload bits, MSB first.
    #[must_use]
    pub fn to_bits(&self) -> Vec<u8> {
        to_bits(&self.raw)
    }

    /// Rebuild a payload from exactly [`PAYLOAD_BITS`] bits.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PayloadBits`] for any other length.
    pub fn from_bits(bits: &[u8]) -> Result<Self> {
        if bits.len() != PAYLOAD_BITS {
            return Err(Error::PayloadBits(bits.len()));
        }
        let bytes = from_bits(bits)?;
        let mut raw = [0u8; PAYLOAD_LEN];
        raw.copy_from_slice(&bytes);
        Ok(Self { raw })
    }

    /// Decode the `(device_id, session_id)` pair.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Decode`] if either field is not valid UTF-8.
    pub fn identifiers(&self) -> Result<(String, String)> {
        decode(&self.raw)
    }

    /// Lowercase hex encoding of the raw bytes (64 characters).
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.raw)
    }

    /// Parse the hex form produced by [`Payload::to_hex`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidPayload`] if the string is not 64 hex digits.
    pub fn from_hex(s: &str) -> Result<Self> {
        let bytes = hex::decode(s.trim()).map_err(|e| Error::InvalidPayload(e.to_string()))?;
        let raw: [u8; PAYLOAD_LEN] = bytes.try_into().map_err(|b: Vec<u8>| {
            Error::InvalidPayload(format!("expected {PAYLOAD_LEN} bytes, got {}", b.len()))
        })?;
        Ok(Self { raw })
    }
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Payload").field(&self.to_hex()).finish()
    }
}

impl Serialize for Payload {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Payload {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// Pack two identifiers into the fixed 32-byte layout.
///
/// Never fails: long identifiers are clipped, short ones null-padded.
#[must_use]
pub fn encode(device_id: &str, session_id: &str) -> [u8; PAYLOAD_LEN] {
    let mut raw = [0u8; PAYLOAD_LEN];
    let device = clip(device_id);
    let session = clip(session_id);
    raw[..device.len()].copy_from_slice(device);
    raw[FIELD_LEN..FIELD_LEN + session.len()].copy_from_slice(session);
    raw
}

/// Split the payload at byte 16 and decode each half as text.
///
/// # Errors
///
/// Returns [`Error::Decode`] naming the field that is not valid UTF-8.
pub fn decode(raw: &[u8; PAYLOAD_LEN]) -> Result<(String, String)> {
    let (device, session) = raw.split_at(FIELD_LEN);
    Ok((
        decode_field(device, "device_id")?,
        decode_field(session, "session_id")?,
    ))
}

/// Expand bytes into bits, most significant bit first.
#[must_use]
pub fn to_bits(bytes: &[u8]) -> Vec<u8> {
    bytes
        .iter()
        .flat_map(|&byte| (0..8).rev().map(move |shift| (byte >> shift) & 1))
        .collect()
}

/// Pack bits (MSB first) back into bytes.
///
/// # Errors
///
/// Returns [`Error::Length`] unless `bits.len()` is a positive multiple of 8.
pub fn from_bits(bits: &[u8]) -> Result<Vec<u8>> {
    if bits.is_empty() || bits.len() % 8 != 0 {
        return Err(Error::Length(bits.len()));
    }
    Ok(bits
        .chunks_exact(8)
        .map(|chunk| chunk.iter().fold(0u8, |acc, &bit| (acc << 1) | (bit & 1)))
        .collect())
}

/// Longest prefix of `id` that fits in a field without splitting a character.
fn clip(id: &str) -> &[u8] {
    if id.len() <= FIELD_LEN {
        return id.as_bytes();
    }
    let mut end = FIELD_LEN;
    while !id.is_char_boundary(end) {
        end -= 1;
    }
    &id.as_bytes()[..end]
}

fn decode_field(field: &[u8], name: &'static str) -> Result<String> {
    let end = field.iter().rposition(|&b| b != 0).map_or(0, |i| i + 1);
    std::str::from_utf8(&field[..end])
        .map(str::to_owned)
        .map_err(|source| Error::Decode {
            field: name,
            source,
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_pads_fields_with_nulls() {
        let raw = encode("DEV-1", "SESS-1");
        assert_eq!(&raw[..5], b"DEV-1");
        assert!(raw[5..16].iter().all(|&b| b == 0));
        assert_eq!(&raw[16..22], b"SESS-1");
        assert!(raw[22..].iter().all(|&b| b == 0));
    }

    #[test]
    fn encode_truncates_long_identifiers() {
        let raw = encode("DEVICE-SCREEN-001-EXTRA", "s");
        assert_eq!(&raw[..16], b"DEVICE-SCREEN-00");
        let (device, session) = decode(&raw).unwrap();
        assert_eq!(device, "DEVICE-SCREEN-00");
        assert_eq!(session, "s");
    }

    #[test]
    fn truncation_never_splits_a_character() {
        // 15 ASCII bytes followed by a 2-byte character: 17 bytes total.
        let raw = encode("abcdefghijklmno\u{e9}", "\u{e9}\u{e9}\u{e9}\u{e9}\u{e9}\u{e9}\u{e9}\u{e9}\u{e9}");
        let (device, session) = decode(&raw).unwrap();
        assert_eq!(device, "abcdefghijklmno");
        assert_eq!(session.chars().count(), 8);
    }

    #[test]
    fn decode_round_trips_identifiers() {
        let payload = Payload::new("monitor-7f3a", "s-20261018");
        let (device, session) = payload.identifiers().unwrap();
        assert_eq!(device, "monitor-7f3a");
        assert_eq!(session, "s-20261018");
    }

    #[test]
    fn decode_rejects_invalid_utf8() {
        let mut raw = encode("DEV-1", "SESS-1");
        raw[16] = 0xff;
        match decode(&raw) {
            Err(Error::Decode { field, .. }) => assert_eq!(field, "session_id"),
            other => panic!("expected decode error, got {other:?}"),
        }
    }

    #[test]
    fn embedded_nulls_do_not_round_trip() {
        let raw = encode("ab\0", "\0\0");
        let (device, session) = decode(&raw).unwrap();
        assert_eq!(device, "ab");
        assert_eq!(session, "");
    }

    #[test]
    fn bits_are_msb_first() {
        assert_eq!(to_bits(&[0x80]), vec![1, 0, 0, 0, 0, 0, 0, 0]);
        assert_eq!(to_bits(&[0x44]), vec![0, 1, 0, 0, 0, 1, 0, 0]);
        assert_eq!(from_bits(&[0, 0, 1, 1, 0, 0, 0, 1]).unwrap(), vec![0x31]);
    }

    #[test]
    fn payload_bits_have_fixed_length() {
        let payload = Payload::new("DEV-1", "SESS-1");
        let bits = payload.to_bits();
        assert_eq!(bits.len(), PAYLOAD_BITS);
        assert_eq!(Payload::from_bits(&bits).unwrap(), payload);
    }

    #[test]
    fn from_bits_rejects_bad_lengths() {
        assert!(matches!(from_bits(&[]), Err(Error::Length(0))));
        assert!(matches!(from_bits(&[1; 7]), Err(Error::Length(7))));
        assert!(matches!(from_bits(&[1; 9]), Err(Error::Length(9))));
        assert!(matches!(
            Payload::from_bits(&[0; 64]),
            Err(Error::PayloadBits(64))
        ));
    }

    #[test]
    fn hex_form_is_stable() {
        let payload = Payload::new("DEV-1", "SESS-1");
        let hex = payload.to_hex();
        assert_eq!(hex.len(), 64);
        assert!(hex.starts_with("4445562d31"));
        assert_eq!(Payload::from_hex(&hex).unwrap(), payload);
    }

    #[test]
    fn from_hex_rejects_wrong_size_and_garbage() {
        assert!(matches!(
            Payload::from_hex("00ff"),
            Err(Error::InvalidPayload(_))
        ));
        assert!(matches!(
            Payload::from_hex("not hex"),
            Err(Error::InvalidPayload(_))
        ));
    }

    #[test]
    fn payload_serializes_as_hex_string() {
        let payload = Payload::new("d", "s");
        let json = serde_json::to_string(&payload).unwrap();
        assert_eq!(json, format!("\"{}\"", payload.to_hex()));
        let back: Payload = serde_json::from_str(&json).unwrap();
        assert_eq!(back, payload);
    }
}
