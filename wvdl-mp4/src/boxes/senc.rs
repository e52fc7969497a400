use crate::{Error, Reader, Result};

/// A subsample entry from the senc box.
#[derive(Debug, Clone)]
pub struct SencSubsample {
    /// Number of clear (unencrypted) bytes.
    pub bytes_of_clear_data: u16,
    /// Number of encrypted bytes.
    pub bytes_of_encrypted_data: u32,
}

/// Sample encryption information for a single sample.
#[derive(Debug, Clone)]
pub struct SencSample {
    /// The initialization vector for this sample.
    pub iv: Vec<u8>,
    /// Subsample encryption entries (if present).
    pub subsamples: Vec<SencSubsample>,
}

/// Sample Encryption Box (senc) - contains per-sample encryption info.
///
/// This box provides the IV (initialization vector) and optional subsample
/// encryption mapping for each sample in the fragment. The IV size is not
/// stored in the box itself, so parsing needs the `tenc` defaults of the
/// track the box belongs to.
#[derive(Debug, Clone)]
pub struct SencBox {
    /// Flags from the full box header.
    pub flags: u32,
    /// Per-sample encryption information.
    pub samples: Vec<SencSample>,
}

impl SencBox {
    /// Parse the payload of a senc box (everything after version and flags).
    ///
    /// # Arguments
    /// * `payload` - The box payload
    /// * `flags` - The flags of the full box header
    /// * `iv_size` - The IV size (from tenc per_sample_iv_size)
    /// * `constant_iv` - Optional constant IV (for CBCS when per_sample_iv_size is 0)
    /// * `max_samples` - Samples the track fragment runs describe
    pub fn parse(
        payload: Vec<u8>,
        flags: u32,
        iv_size: u8,
        constant_iv: Option<&[u8]>,
        max_samples: usize,
    ) -> Result<Self> {
        let mut reader = Reader::new(payload);

        let sample_count = reader.read_u32()?;
        let has_subsamples = flags & 0x02 != 0;

        // Smallest entry: the iv plus an empty subsample count.
        let entry_size = iv_size as u64 + if has_subsamples { 2 } else { 0 };
        let fits = match entry_size {
            0 => sample_count as usize <= max_samples,
            _ => sample_count as u64 * entry_size <= reader.remaining(),
        };

        if !fits {
            return Err(Error::new_decode_err(format!(
                "senc with {} samples does not fit its {} bytes or {} track samples",
                sample_count,
                reader.remaining(),
                max_samples
            )));
        }

        let mut samples = Vec::with_capacity(sample_count.min(4096) as usize);

        for _ in 0..sample_count {
            let iv = if iv_size > 0 {
                reader.read_bytes(iv_size as usize)?
            } else {
                constant_iv.map(|x| x.to_vec()).unwrap_or_default()
            };

            let subsamples = if has_subsamples {
                let subsample_count = reader.read_u16()?;
                let mut subs = Vec::with_capacity(subsample_count as usize);
                for _ in 0..subsample_count {
                    let bytes_of_clear_data = reader.read_u16()?;
                    let bytes_of_encrypted_data = reader.read_u32()?;
                    subs.push(SencSubsample {
                        bytes_of_clear_data,
                        bytes_of_encrypted_data,
                    });
                }
                subs
            } else {
                Vec::new()
            };

            samples.push(SencSample { iv, subsamples });
        }

        Ok(Self { flags, samples })
    }

    /// Check if this senc box has subsample encryption info.
    pub fn has_subsamples(&self) -> bool {
        self.flags & 0x02 != 0
    }

    /// Get the number of samples.
    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn per_sample_ivs_with_subsamples() {
        let mut payload = 1u32.to_be_bytes().to_vec();
        payload.extend_from_slice(&[7; 8]);
        payload.extend_from_slice(&2u16.to_be_bytes());
        payload.extend_from_slice(&5u16.to_be_bytes());
        payload.extend_from_slice(&32u32.to_be_bytes());
        payload.extend_from_slice(&0u16.to_be_bytes());
        payload.extend_from_slice(&16u32.to_be_bytes());

        let senc = SencBox::parse(payload, 0x02, 8, None, 1).unwrap();
        assert!(senc.has_subsamples());
        assert_eq!(senc.sample_count(), 1);
        assert_eq!(senc.samples[0].iv, vec![7; 8]);
        assert_eq!(senc.samples[0].subsamples.len(), 2);
        assert_eq!(senc.samples[0].subsamples[0].bytes_of_clear_data, 5);
        assert_eq!(senc.samples[0].subsamples[1].bytes_of_encrypted_data, 16);
    }

    #[test]
    fn constant_iv_is_shared() {
        let payload = 3u32.to_be_bytes().to_vec();
        let senc = SencBox::parse(payload, 0, 0, Some(&[1; 16]), 3).unwrap();
        assert_eq!(senc.sample_count(), 3);
        assert!(senc.samples.iter().all(|x| x.iv == vec![1; 16]));
    }

    #[test]
    fn constant_iv_count_is_bounded_by_the_track() {
        let payload = u32::MAX.to_be_bytes().to_vec();

        assert!(matches!(
            SencBox::parse(payload, 0, 0, Some(&[1; 16]), 4),
            Err(Error::Decode(_))
        ));
    }

    #[test]
    fn count_larger_than_the_payload_is_an_error() {
        let mut payload = u32::MAX.to_be_bytes().to_vec();
        payload.extend_from_slice(&[7; 8]);

        assert!(matches!(
            SencBox::parse(payload, 0, 8, None, usize::MAX),
            Err(Error::Decode(_))
        ));
    }

    #[test]
    fn truncated_box_is_an_error() {
        let mut payload = 2u32.to_be_bytes().to_vec();
        payload.extend_from_slice(&[7; 8]);
        assert!(SencBox::parse(payload, 0, 8, None, 2).is_err());
    }
}
