use crate::{
    Mp4Parser,
    decrypt::{
        context::DecryptContext,
        error::{DecryptError, Result},
        fragment::decrypt_fragment,
    },
    scan_boxes,
};
use std::io::Write;

/// Counts of how the fragments of a container were handled.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DecryptSummary {
    pub fragments: usize,
    /// Fragments with at least one protected track fragment.
    pub decrypted: usize,
    /// Fragments written unmodified because they carry no sample encryption data.
    pub passed_through: usize,
    pub samples: usize,
}

/// Decrypts a complete fragmented mp4 file with a single content key.
///
/// # Example
///
/// ```no_run
/// use wvdl_mp4::decrypt::Mp4Decrypter;
/// use std::fs::{self, File};
///
/// let decrypter = Mp4Decrypter::from_hex("100b6c20940f779a4589152b57d2dacb")?;
/// let data = fs::read("encrypted.mp4")?;
/// let summary = decrypter.decrypt_to(&data, &mut File::create("decrypted.mp4")?)?;
/// println!("{} fragments", summary.fragments);
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
#[derive(Clone)]
pub struct Mp4Decrypter {
    key: [u8; 16],
}

impl Mp4Decrypter {
    pub fn new(key: &[u8]) -> Result<Self> {
        let key = key
            .try_into()
            .map_err(|_| DecryptError::InvalidKeySize(key.len()))?;
        Ok(Self { key })
    }

    pub fn from_hex(key: &str) -> Result<Self> {
        Self::new(&hex::decode(key.trim())?)
    }

    /// Decrypt `data` into memory.
    pub fn decrypt(&self, data: &[u8]) -> Result<Vec<u8>> {
        let mut output = Vec::with_capacity(data.len());
        self.decrypt_to(data, &mut output)?;
        Ok(output)
    }

    /// Decrypt `data` and stream the result into `writer`.
    ///
    /// The init segment (everything before the first `moof`) is written first
    /// and unmodified. Every fragment is then decrypted on its own and written
    /// as soon as it is done. A fragment without sample encryption data is
    /// passed through, any other error stops the whole operation.
    pub fn decrypt_to<W: Write>(&self, data: &[u8], writer: &mut W) -> Result<DecryptSummary> {
        let boxes = scan_boxes(data)?;

        let has_moov = boxes.iter().any(|x| x.is("moov"));
        let first_moof = boxes.iter().position(|x| x.is("moof"));

        if !has_moov {
            return Err(match first_moof {
                Some(_) => DecryptError::MissingInit,
                None => DecryptError::NotFragmented,
            });
        }

        let init_end = first_moof
            .map(|x| boxes[x].start)
            .unwrap_or(data.len());
        let init = &data[..init_end];
        let ctx = DecryptContext::new(init, self.key)?;

        if first_moof.is_none() && !ctx.has_mvex() {
            return Err(DecryptError::NotFragmented);
        }

        writer.write_all(init)?;

        let mut summary = DecryptSummary::default();

        let starts = boxes
            .iter()
            .filter(|x| x.is("moof"))
            .map(|x| x.start)
            .collect::<Vec<_>>();

        for (i, start) in starts.iter().enumerate() {
            let end = starts.get(i + 1).copied().unwrap_or(data.len());
            let mut fragment = data[*start..end].to_vec();

            match decrypt_fragment(&mut fragment, *start as u64, &ctx) {
                Ok(samples) => {
                    summary.decrypted += 1;
                    summary.samples += samples;
                }
                Err(DecryptError::NoSampleEncryption) => summary.passed_through += 1,
                Err(e) => return Err(e),
            }

            writer.write_all(&fragment)?;
            summary.fragments += 1;
        }

        writer.flush()?;
        Ok(summary)
    }
}

/// Check whether `data` is a fragmented mp4 file with an init segment.
pub fn is_fragmented(data: &[u8]) -> bool {
    let Ok(boxes) = scan_boxes(data) else {
        return false;
    };

    if !boxes.iter().any(|x| x.is("moov")) {
        return false;
    }

    if boxes.iter().any(|x| x.is("moof")) {
        return true;
    }

    let has_mvex = crate::data!(false);
    let has_mvex_c = has_mvex.clone();

    let parsed = Mp4Parser::new()
        .base_box("moov", crate::parser::children)
        .base_box("mvex", move |_| {
            *has_mvex_c.borrow_mut() = true;
            Ok(())
        })
        .parse(data, true);

    parsed.is_ok() && has_mvex.take()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixture::{
        FixtureSample, FixtureTrack, clear_fragment, decrypted_fragment, encrypted_fragment,
    };

    const KEY: [u8; 16] = [
        0x10, 0x0b, 0x6c, 0x20, 0x94, 0x0f, 0x77, 0x9a, 0x45, 0x89, 0x15, 0x2b, 0x57, 0xd2, 0xda,
        0xcb,
    ];

    fn payload(seed: u8, len: usize) -> Vec<u8> {
        (0..len).map(|x| (x as u8).wrapping_mul(31) ^ seed).collect()
    }

    macro_rules! sample {
        ($test_name: ident, $track: expr, $samples: expr) => {
            #[test]
            fn $test_name() {
                let track = $track;
                let samples: Vec<FixtureSample> = $samples;

                let init = track.init_segment();
                let first = encrypted_fragment(1, &track, &KEY, &samples);
                let second = encrypted_fragment(2, &track, &KEY, &samples);

                let mut data = init.clone();
                data.extend(&first);
                data.extend(&second);

                let decrypter = Mp4Decrypter::new(&KEY).unwrap();
                let mut output = Vec::new();
                let summary = decrypter.decrypt_to(&data, &mut output).unwrap();

                let mut expected = init;
                expected.extend(decrypted_fragment(1, &track, &samples));
                expected.extend(decrypted_fragment(2, &track, &samples));

                assert_eq!(summary.fragments, 2);
                assert_eq!(summary.decrypted, 2);
                assert_eq!(summary.samples, samples.len() * 2);
                assert_eq!(output, expected);
            }
        };
    }

    sample!(
        cenc_full_samples,
        FixtureTrack::cenc(),
        vec![
            FixtureSample::full(payload(1, 100), vec![1; 8]),
            FixtureSample::full(payload(2, 33), vec![2; 8]),
        ]
    );

    sample!(
        cenc_subsamples,
        FixtureTrack::cenc(),
        vec![
            FixtureSample::with_subsamples(payload(3, 90), vec![3; 8], vec![(10, 40), (7, 33)]),
            FixtureSample::with_subsamples(payload(4, 20), vec![4; 8], vec![(20, 0)]),
        ]
    );

    sample!(
        cens_pattern,
        FixtureTrack::cens(),
        vec![FixtureSample::with_subsamples(
            payload(5, 260),
            vec![5; 8],
            vec![(4, 256)]
        )]
    );

    sample!(
        cbc1_full_samples,
        FixtureTrack::cbc1(),
        vec![
            FixtureSample::full(payload(6, 64), vec![6; 16]),
            FixtureSample::full(payload(7, 50), vec![7; 16]),
        ]
    );

    sample!(
        cbcs_pattern,
        FixtureTrack::cbcs(),
        vec![
            FixtureSample::with_subsamples(payload(8, 400), Vec::new(), vec![(16, 370), (6, 8)]),
            FixtureSample::with_subsamples(payload(9, 17), Vec::new(), vec![(1, 16)]),
        ]
    );

    #[test]
    fn clear_fragment_passes_through() {
        let track = FixtureTrack::cenc();
        let samples = vec![FixtureSample::full(payload(1, 48), vec![1; 8])];

        let mut data = track.init_segment();
        data.extend(encrypted_fragment(1, &track, &KEY, &samples));
        let clear = clear_fragment(2, &track, &samples);
        data.extend(&clear);

        let decrypter = Mp4Decrypter::new(&KEY).unwrap();
        let mut output = Vec::new();
        let summary = decrypter.decrypt_to(&data, &mut output).unwrap();

        assert_eq!(summary.decrypted, 1);
        assert_eq!(summary.passed_through, 1);

        let mut expected = track.init_segment();
        expected.extend(decrypted_fragment(1, &track, &samples));
        expected.extend(clear);
        assert_eq!(output, expected);
    }

    #[test]
    fn encrypted_fragment_after_clear_one_is_decrypted() {
        let track = FixtureTrack::cenc();
        let samples = vec![FixtureSample::full(payload(2, 48), vec![9; 8])];

        let mut data = track.init_segment();
        data.extend(clear_fragment(1, &track, &samples));
        data.extend(encrypted_fragment(2, &track, &KEY, &samples));

        let decrypter = Mp4Decrypter::new(&KEY).unwrap();
        let output = decrypter.decrypt(&data).unwrap();

        let mut expected = track.init_segment();
        expected.extend(clear_fragment(1, &track, &samples));
        expected.extend(decrypted_fragment(2, &track, &samples));
        assert_eq!(output, expected);
    }

    #[test]
    fn wrong_key_does_not_restore_plaintext() {
        let track = FixtureTrack::cenc();
        let samples = vec![FixtureSample::full(payload(3, 48), vec![1; 8])];

        let mut data = track.init_segment();
        data.extend(encrypted_fragment(1, &track, &KEY, &samples));

        let output = Mp4Decrypter::new(&[0; 16]).unwrap().decrypt(&data).unwrap();
        let mut expected = track.init_segment();
        expected.extend(decrypted_fragment(1, &track, &samples));
        assert_ne!(output, expected);
    }

    #[test]
    fn moov_without_fragments_is_rejected() {
        let track = FixtureTrack::cenc();
        let init = track.init_segment_without_mvex();
        let decrypter = Mp4Decrypter::new(&KEY).unwrap();

        assert!(!is_fragmented(&init));
        assert!(matches!(
            decrypter.decrypt(&init),
            Err(DecryptError::NotFragmented)
        ));
    }

    #[test]
    fn init_only_with_mvex_is_fragmented() {
        let init = FixtureTrack::cenc().init_segment();
        assert!(is_fragmented(&init));
        assert_eq!(Mp4Decrypter::new(&KEY).unwrap().decrypt(&init).unwrap(), init);
    }

    #[test]
    fn fragments_without_moov_are_rejected() {
        let track = FixtureTrack::cenc();
        let samples = vec![FixtureSample::full(payload(1, 16), vec![1; 8])];
        let data = encrypted_fragment(1, &track, &KEY, &samples);

        assert!(matches!(
            Mp4Decrypter::new(&KEY).unwrap().decrypt(&data),
            Err(DecryptError::MissingInit)
        ));
    }

    fn with_trun_header(mut fragment: Vec<u8>, flags: u32, count: u32) -> Vec<u8> {
        let at = fragment
            .windows(4)
            .position(|x| x == b"trun")
            .unwrap();
        fragment[at + 4..at + 8].copy_from_slice(&flags.to_be_bytes());
        fragment[at + 8..at + 12].copy_from_slice(&count.to_be_bytes());
        fragment
    }

    #[test]
    fn huge_64_bit_box_size_is_an_error() {
        let track = FixtureTrack::cenc();
        let samples = vec![FixtureSample::full(payload(1, 16), vec![1; 8])];

        let mut data = track.init_segment();
        data.extend(encrypted_fragment(1, &track, &KEY, &samples));
        data.extend(1u32.to_be_bytes());
        data.extend(b"mdat");
        data.extend((u64::MAX - 7).to_be_bytes());

        assert!(matches!(
            Mp4Decrypter::new(&KEY).unwrap().decrypt(&data),
            Err(DecryptError::Parse(crate::Error::Decode(_)))
        ));
    }

    #[test]
    fn huge_sample_counts_are_errors() {
        let track = FixtureTrack::cenc();
        let samples = vec![FixtureSample::full(payload(1, 16), vec![1; 8])];
        let fragment = encrypted_fragment(1, &track, &KEY, &samples);
        let decrypter = Mp4Decrypter::new(&KEY).unwrap();

        // Sizes present, far fewer entries than announced.
        let mut data = track.init_segment();
        data.extend(with_trun_header(fragment.clone(), 0x000201, u32::MAX));
        assert!(matches!(
            decrypter.decrypt(&data),
            Err(DecryptError::Parse(crate::Error::Decode(_)))
        ));

        // No per sample fields at all.
        let mut data = track.init_segment();
        data.extend(with_trun_header(fragment, 0, u32::MAX));
        assert!(matches!(
            decrypter.decrypt(&data),
            Err(DecryptError::InvalidFormat(_))
        ));
    }

    #[test]
    fn key_must_be_16_bytes() {
        assert!(matches!(
            Mp4Decrypter::new(&[0; 15]),
            Err(DecryptError::InvalidKeySize(15))
        ));
        assert!(Mp4Decrypter::from_hex("100b6c20940f779a4589152b57d2dacb").is_ok());
        assert!(matches!(
            Mp4Decrypter::from_hex("zz"),
            Err(DecryptError::InvalidHex(_))
        ));
    }

    #[test]
    fn subsamples_larger_than_sample_fail() {
        let track = FixtureTrack::cenc();
        let samples = vec![FixtureSample::with_subsamples(
            payload(1, 16),
            vec![1; 8],
            vec![(8, 8)],
        )];
        let mut fragment = encrypted_fragment(1, &track, &KEY, &samples);

        // Grow the encrypted byte count of the only subsample past the sample.
        let len = fragment.len();
        let position = fragment
            .windows(4)
            .position(|x| x == b"senc")
            .unwrap();
        // senc: type(4) version/flags(4) count(4) iv(8) subsample count(2) clear(2) encrypted(4)
        let encrypted_at = position + 4 + 4 + 4 + 8 + 2 + 2;
        fragment[encrypted_at..encrypted_at + 4].copy_from_slice(&64u32.to_be_bytes());
        assert_eq!(fragment.len(), len);

        let mut data = track.init_segment();
        data.extend(fragment);

        assert!(matches!(
            Mp4Decrypter::new(&KEY).unwrap().decrypt(&data),
            Err(DecryptError::SubsampleError(_))
        ));
    }
}
