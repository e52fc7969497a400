use crate::decrypt::error::{DecryptError, Result};
use aes::{
    Aes128,
    cipher::{BlockDecrypt, KeyInit, KeyIvInit, StreamCipher, generic_array::GenericArray},
};

type Aes128Ctr = ctr::Ctr128BE<Aes128>;

/// Common encryption protection schemes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Scheme {
    /// AES-CTR full sample encryption.
    Cenc,
    /// AES-CTR pattern encryption.
    Cens,
    /// AES-CBC full sample encryption.
    Cbc1,
    /// AES-CBC pattern encryption with a constant IV.
    Cbcs,
}

impl Scheme {
    pub fn from_fourcc(scheme_type: u32) -> Option<Self> {
        match scheme_type {
            0x63656E63 => Some(Self::Cenc),
            0x63656E73 => Some(Self::Cens),
            0x63626331 => Some(Self::Cbc1),
            0x63626373 => Some(Self::Cbcs),
            _ => None,
        }
    }

    pub fn is_cbc_mode(&self) -> bool {
        matches!(self, Self::Cbc1 | Self::Cbcs)
    }

    /// The IV is reset at the start of every subsample.
    pub fn resets_iv_per_subsample(&self) -> bool {
        matches!(self, Self::Cbcs)
    }

    fn uses_pattern(&self) -> bool {
        matches!(self, Self::Cens | Self::Cbcs)
    }
}

impl std::fmt::Display for Scheme {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Cenc => "cenc",
            Self::Cens => "cens",
            Self::Cbc1 => "cbc1",
            Self::Cbcs => "cbcs",
        })
    }
}

/// In place AES-128 decryption of protected byte ranges.
///
/// CTR keystream and CBC chaining state persist between calls to
/// [`Cipher::decrypt_range`] until the next [`Cipher::set_iv`].
pub struct Cipher {
    scheme: Scheme,
    key: [u8; 16],
    block: Aes128,
    crypt_blocks: usize,
    skip_blocks: usize,
    iv: [u8; 16],
    ctr: Option<Aes128Ctr>,
}

impl Cipher {
    pub fn new(scheme: Scheme, key: &[u8; 16], crypt_blocks: u8, skip_blocks: u8) -> Self {
        Self {
            scheme,
            key: *key,
            block: Aes128::new(GenericArray::from_slice(key)),
            crypt_blocks: crypt_blocks as usize,
            skip_blocks: skip_blocks as usize,
            iv: [0; 16],
            ctr: None,
        }
    }

    pub fn scheme(&self) -> Scheme {
        self.scheme
    }

    /// Set an 8 or 16 byte IV. Shorter IVs are padded with zeros, which makes
    /// the lower half the CTR block counter.
    pub fn set_iv(&mut self, iv: &[u8]) -> Result<()> {
        if iv.len() != 8 && iv.len() != 16 {
            return Err(DecryptError::InvalidIvSize(iv.len()));
        }

        self.iv = [0; 16];
        self.iv[..iv.len()].copy_from_slice(iv);

        if !self.scheme.is_cbc_mode() {
            self.ctr = Some(Aes128Ctr::new(
                GenericArray::from_slice(&self.key),
                GenericArray::from_slice(&self.iv),
            ));
        }

        Ok(())
    }

    /// Decrypt one protected range in place, applying the crypt/skip pattern
    /// from its start when the scheme uses one.
    pub fn decrypt_range(&mut self, data: &mut [u8]) {
        let patterned =
            self.scheme.uses_pattern() && (self.crypt_blocks > 0 || self.skip_blocks > 0);

        // Partial trailing blocks are never encrypted in CBC modes.
        let end = if self.scheme.is_cbc_mode() {
            (data.len() / 16) * 16
        } else {
            data.len()
        };

        if !patterned {
            self.apply(&mut data[..end]);
            return;
        }

        let crypt_size = self.crypt_blocks * 16;
        let skip_size = self.skip_blocks * 16;
        let mut offset = 0;

        while offset < end {
            let crypt_end = (offset + crypt_size).min(end);
            self.apply(&mut data[offset..crypt_end]);
            offset = crypt_end + skip_size;
        }
    }

    fn apply(&mut self, data: &mut [u8]) {
        if data.is_empty() {
            return;
        }

        if self.scheme.is_cbc_mode() {
            self.apply_cbc(data);
        } else if let Some(ctr) = self.ctr.as_mut() {
            ctr.apply_keystream(data);
        }
    }

    fn apply_cbc(&mut self, data: &mut [u8]) {
        let mut prev = self.iv;

        for chunk in data.chunks_exact_mut(16) {
            let mut ciphertext = [0; 16];
            ciphertext.copy_from_slice(chunk);

            let block = GenericArray::from_mut_slice(chunk);
            self.block.decrypt_block(block);

            for (byte, iv) in chunk.iter_mut().zip(prev) {
                *byte ^= iv;
            }

            prev = ciphertext;
        }

        self.iv = prev;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aes::cipher::BlockEncrypt;

    const KEY: [u8; 16] = [0x2b; 16];

    #[test]
    fn scheme_fourcc() {
        assert_eq!(Scheme::from_fourcc(0x63626373), Some(Scheme::Cbcs));
        assert_eq!(Scheme::from_fourcc(0x63656E63).unwrap().to_string(), "cenc");
        assert_eq!(Scheme::from_fourcc(0x70696666), None);
    }

    #[test]
    fn ctr_keystream_continues_between_ranges() {
        let plain = (0..40).collect::<Vec<u8>>();
        let mut encrypted = plain.clone();
        let mut ctr = Aes128Ctr::new(
            GenericArray::from_slice(&KEY),
            GenericArray::from_slice(&[[9; 8], [0; 8]].concat()),
        );
        ctr.apply_keystream(&mut encrypted);

        let mut cipher = Cipher::new(Scheme::Cenc, &KEY, 0, 0);
        cipher.set_iv(&[9; 8]).unwrap();
        let (first, second) = encrypted.split_at_mut(13);
        cipher.decrypt_range(first);
        cipher.decrypt_range(second);

        assert_eq!(encrypted, plain);
    }

    #[test]
    fn cbc_leaves_partial_block_clear() {
        let plain = (0..20).collect::<Vec<u8>>();
        let iv = [3; 16];
        let aes = Aes128::new(GenericArray::from_slice(&KEY));

        let mut encrypted = plain.clone();
        let mut block = GenericArray::clone_from_slice(&encrypted[..16]);
        for (byte, iv) in block.iter_mut().zip(iv) {
            *byte ^= iv;
        }
        aes.encrypt_block(&mut block);
        encrypted[..16].copy_from_slice(&block);

        let mut cipher = Cipher::new(Scheme::Cbc1, &KEY, 0, 0);
        cipher.set_iv(&iv).unwrap();
        cipher.decrypt_range(&mut encrypted);

        assert_eq!(encrypted, plain);
    }

    #[test]
    fn rejects_odd_iv_sizes() {
        let mut cipher = Cipher::new(Scheme::Cbcs, &KEY, 1, 9);
        assert!(matches!(
            cipher.set_iv(&[0; 12]),
            Err(DecryptError::InvalidIvSize(12))
        ));
    }
}
