//! Widevine protection header builder.
//!
//! The license endpoint expects the `PSSH` data of a track as a base64 string
//! made of a fixed 32 byte marker followed by a serialized `WidevineCencHeader`.
//!
//! ```
//! use wvdl_mp4::pssh::ProtectionHeader;
//!
//! let header = ProtectionHeader::new("", "AAAAAAAAAAAAAAAAAAAAAA==")?;
//! assert!(header.to_base64().starts_with("MDEyMzQ1Njc4OWFiY2Rl"));
//! # Ok::<(), wvdl_mp4::Error>(())
//! ```

mod widevine;

pub use widevine::{Algorithm, WidevineCencHeader};

use crate::{Error, Result};
use base64::{Engine, engine::general_purpose::STANDARD};
use prost::Message;

/// Marker prepended to every serialized header.
pub const PSSH_MARKER: &[u8; 32] = b"0123456789abcdef0123456789abcdef";

/// Widevine system id as found in `pssh` boxes.
pub const WIDEVINE_SYSTEM_ID: [u8; 16] = [
    0xed, 0xef, 0x8b, 0xa9, 0x79, 0xd6, 0x4a, 0xce, 0xa3, 0xc8, 0x27, 0xdc, 0xd5, 0x1d, 0x21, 0xed,
];

/// Protection header of a single key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProtectionHeader {
    key_id: [u8; 16],
    content_id: Vec<u8>,
    algorithm: Algorithm,
}

impl ProtectionHeader {
    /// Build a header from a content id (may be empty) and a base64 encoded key id.
    /// The key id must decode to exactly 16 bytes.
    pub fn new(content_id: &str, key_id: &str) -> Result<Self> {
        let decoded = STANDARD
            .decode(key_id.trim())
            .map_err(|x| Error::InvalidKeyId(format!("{} ({})", key_id, x)))?;

        let key_id: [u8; 16] = decoded.try_into().map_err(|x: Vec<u8>| {
            Error::InvalidKeyId(format!("expected 16 bytes, got {} bytes", x.len()))
        })?;

        Ok(Self {
            key_id,
            content_id: content_id.as_bytes().to_vec(),
            algorithm: Algorithm::Aesctr,
        })
    }

    pub fn key_id(&self) -> &[u8; 16] {
        &self.key_id
    }

    pub fn key_id_hex(&self) -> String {
        hex::encode(self.key_id)
    }

    pub fn content_id(&self) -> &[u8] {
        &self.content_id
    }

    /// The protobuf message carried after the marker.
    pub fn to_message(&self) -> WidevineCencHeader {
        WidevineCencHeader {
            algorithm: Some(self.algorithm as i32),
            key_id: vec![self.key_id.to_vec()],
            provider: Some(String::new()),
            content_id: Some(STANDARD.encode(&self.content_id).into_bytes()),
            policy: Some(String::new()),
        }
    }

    /// Marker followed by the serialized message.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut data = PSSH_MARKER.to_vec();
        data.extend(self.to_message().encode_to_vec());
        data
    }

    pub fn to_base64(&self) -> String {
        STANDARD.encode(self.to_bytes())
    }

    /// Version 0 `pssh` box carrying the message, for CDMs that expect a real box
    /// instead of the marker.
    pub fn to_pssh_box(&self) -> Vec<u8> {
        let data = self.to_message().encode_to_vec();
        let size = 32 + data.len() as u32;

        let mut pssh = Vec::with_capacity(size as usize);
        pssh.extend(size.to_be_bytes());
        pssh.extend(b"pssh");
        pssh.extend([0, 0, 0, 0]);
        pssh.extend(WIDEVINE_SYSTEM_ID);
        pssh.extend((data.len() as u32).to_be_bytes());
        pssh.extend(data);
        pssh
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KID: &str = "ERERERERERERERERERERAA==";

    #[test]
    fn layout_matches_wire_format() {
        let header = ProtectionHeader::new("", KID).unwrap();
        let mut expected = PSSH_MARKER.to_vec();
        expected.extend([0x08, 0x01, 0x12, 0x10]);
        expected.extend([0x11; 15]);
        expected.push(0x00);
        expected.extend([0x1a, 0x00, 0x22, 0x00, 0x32, 0x00]);

        assert_eq!(header.to_bytes(), expected);
    }

    #[test]
    fn content_id_is_base64_encoded() {
        let header = ProtectionHeader::new("1440", KID).unwrap();
        let message = WidevineCencHeader::decode(&header.to_bytes()[32..]).unwrap();

        assert_eq!(message.content_id, Some(b"MTQ0MA==".to_vec()));
        assert_eq!(message.key_id, vec![header.key_id().to_vec()]);
        assert_eq!(message.algorithm, Some(Algorithm::Aesctr as i32));
    }

    #[test]
    fn pssh_box_shares_the_message() {
        let header = ProtectionHeader::new("", KID).unwrap();
        let pssh = header.to_pssh_box();
        let headers = crate::scan_boxes(&pssh).unwrap();

        assert_eq!(headers.len(), 1);
        assert!(headers[0].is("pssh"));
        assert_eq!(headers[0].size, pssh.len());
        assert_eq!(&pssh[12..28], &WIDEVINE_SYSTEM_ID);
        assert_eq!(&pssh[32..], &header.to_bytes()[32..]);
    }

    #[test]
    fn output_is_deterministic() {
        let first = ProtectionHeader::new("1440", KID).unwrap().to_base64();
        let second = ProtectionHeader::new("1440", KID).unwrap().to_base64();

        assert_eq!(first, second);
        assert_eq!(
            &STANDARD.decode(&first).unwrap()[..32],
            b"0123456789abcdef0123456789abcdef"
        );
    }

    #[test]
    fn rejects_invalid_key_ids() {
        assert!(matches!(
            ProtectionHeader::new("", "not base64!"),
            Err(Error::InvalidKeyId(_))
        ));
        assert!(matches!(
            ProtectionHeader::new("", "AAAA"),
            Err(Error::InvalidKeyId(_))
        ));
    }
}
