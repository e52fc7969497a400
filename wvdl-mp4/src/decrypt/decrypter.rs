use crate::{
    boxes::SencSubsample,
    decrypt::{
        cipher::{Cipher, Scheme},
        error::{DecryptError, Result},
    },
};

/// Decrypts samples of a single track, one at a time.
pub struct SingleSampleDecrypter(Cipher);

impl SingleSampleDecrypter {
    pub fn new(scheme: Scheme, key: &[u8; 16], crypt_blocks: u8, skip_blocks: u8) -> Self {
        Self(Cipher::new(scheme, key, crypt_blocks, skip_blocks))
    }

    /// Decrypt `sample` in place.
    ///
    /// Without subsamples the whole sample is protected. Otherwise each
    /// subsample is a clear prefix followed by a protected range, and the
    /// subsamples must fit inside the sample. Bytes after the last subsample
    /// are left untouched.
    pub fn decrypt_sample(
        &mut self,
        sample: &mut [u8],
        iv: &[u8],
        subsamples: &[SencSubsample],
    ) -> Result<()> {
        self.0.set_iv(iv)?;

        if subsamples.is_empty() {
            self.0.decrypt_range(sample);
            return Ok(());
        }

        let mut offset = 0;

        for (i, subsample) in subsamples.iter().enumerate() {
            let clear = subsample.bytes_of_clear_data as usize;
            let encrypted = subsample.bytes_of_encrypted_data as usize;
            let end = offset + clear + encrypted;

            if end > sample.len() {
                return Err(DecryptError::SubsampleError(format!(
                    "subsample {} ends at byte {} but the sample is {} bytes",
                    i,
                    end,
                    sample.len()
                )));
            }

            if encrypted > 0 {
                if self.0.scheme().resets_iv_per_subsample() {
                    self.0.set_iv(iv)?;
                }

                self.0.decrypt_range(&mut sample[offset + clear..end]);
            }

            offset = end;
        }

        Ok(())
    }
}
