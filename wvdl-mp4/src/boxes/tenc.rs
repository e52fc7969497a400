/*
    REFERENCES
    ----------

    1. https://github.com/shaka-project/shaka-player/blob/7098f43f70119226bca2e5583833aaf27b498e33/lib/util/mp4_box_parsers.js#L554-L567

*/

use crate::{ParsedBox, Result};

/// Track Encryption Box (tenc) - default encryption parameters of a track.
#[derive(Debug, Clone)]
pub struct TencBox {
    /// Number of encrypted blocks in a pattern (version 1 only).
    pub crypt_byte_block: u8,
    /// Number of clear blocks in a pattern (version 1 only).
    pub skip_byte_block: u8,
    pub is_protected: bool,
    /// Size of the IV stored per sample in `senc`, 0 when a constant IV is used.
    pub per_sample_iv_size: u8,
    pub default_kid: [u8; 16],
    pub constant_iv: Option<Vec<u8>>,
}

impl TencBox {
    pub fn new(box_: &mut ParsedBox) -> Result<Self> {
        let reader = &mut box_.reader;

        // Skip reserved byte.
        reader.skip(1)?;

        let mut crypt_byte_block = 0;
        let mut skip_byte_block = 0;

        if box_.version.unwrap_or(0) == 0 {
            reader.skip(1)?;
        } else {
            let blocks = reader.read_u8()?;
            crypt_byte_block = (blocks >> 4) & 0x0F;
            skip_byte_block = blocks & 0x0F;
        }

        let is_protected = reader.read_u8()? != 0;
        let per_sample_iv_size = reader.read_u8()?;

        let mut default_kid = [0; 16];
        default_kid.copy_from_slice(&reader.read_bytes(16)?);

        let mut constant_iv = None;

        if is_protected && per_sample_iv_size == 0 {
            let constant_iv_size = reader.read_u8()?;
            constant_iv = Some(reader.read_bytes(constant_iv_size as usize)?);
        }

        Ok(Self {
            crypt_byte_block,
            skip_byte_block,
            is_protected,
            per_sample_iv_size,
            default_kid,
            constant_iv,
        })
    }

    pub fn default_kid_hex(&self) -> String {
        hex::encode(self.default_kid)
    }
}
