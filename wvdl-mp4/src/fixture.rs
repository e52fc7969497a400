//! Builder for small synthetic fragmented mp4 files with encrypted samples.
//!
//! The layout is the minimum the decryptor reads: one audio track with an
//! `enca` sample entry, one `traf` per fragment and sample data in a single
//! `mdat` right after the `moof`.

use aes::{
    Aes128,
    cipher::{BlockEncrypt, KeyInit, KeyIvInit, StreamCipher, generic_array::GenericArray},
};

type Aes128Ctr = ctr::Ctr128BE<Aes128>;

/// Protection parameters of the synthetic track.
#[derive(Clone, Debug)]
pub struct FixtureTrack {
    pub track_id: u32,
    pub scheme: [u8; 4],
    pub per_sample_iv_size: u8,
    pub constant_iv: Option<Vec<u8>>,
    pub crypt_byte_block: u8,
    pub skip_byte_block: u8,
    pub kid: [u8; 16],
}

/// A sample in clear together with how it is protected.
#[derive(Clone, Debug)]
pub struct FixtureSample {
    pub data: Vec<u8>,
    /// Ignored when the track uses a constant IV.
    pub iv: Vec<u8>,
    /// `(clear bytes, encrypted bytes)` pairs, empty for full sample encryption.
    pub subsamples: Vec<(u16, u32)>,
}

impl FixtureSample {
    pub fn full(data: Vec<u8>, iv: Vec<u8>) -> Self {
        Self {
            data,
            iv,
            subsamples: Vec::new(),
        }
    }

    pub fn with_subsamples(data: Vec<u8>, iv: Vec<u8>, subsamples: Vec<(u16, u32)>) -> Self {
        Self {
            data,
            iv,
            subsamples,
        }
    }
}

impl FixtureTrack {
    fn new(scheme: &[u8; 4], per_sample_iv_size: u8, crypt: u8, skip: u8) -> Self {
        Self {
            track_id: 1,
            scheme: *scheme,
            per_sample_iv_size,
            constant_iv: None,
            crypt_byte_block: crypt,
            skip_byte_block: skip,
            kid: [0x11; 16],
        }
    }

    pub fn cenc() -> Self {
        Self::new(b"cenc", 8, 0, 0)
    }

    pub fn cens() -> Self {
        Self::new(b"cens", 8, 1, 9)
    }

    pub fn cbc1() -> Self {
        Self::new(b"cbc1", 16, 0, 0)
    }

    pub fn cbcs() -> Self {
        Self {
            constant_iv: Some(vec![0x33; 16]),
            ..Self::new(b"cbcs", 0, 1, 9)
        }
    }

    /// `ftyp` and `moov` boxes, with a `mvex` box declaring fragments.
    pub fn init_segment(&self) -> Vec<u8> {
        self.build_init(true)
    }

    pub fn init_segment_without_mvex(&self) -> Vec<u8> {
        self.build_init(false)
    }

    fn build_init(&self, with_mvex: bool) -> Vec<u8> {
        let mut tkhd = vec![0; 80];
        tkhd[8..12].copy_from_slice(&self.track_id.to_be_bytes());

        let mut tenc = vec![0];
        let version = if self.crypt_byte_block > 0 || self.skip_byte_block > 0 {
            tenc.push((self.crypt_byte_block << 4) | self.skip_byte_block);
            1
        } else {
            tenc.push(0);
            0
        };
        tenc.push(1);
        tenc.push(self.per_sample_iv_size);
        tenc.extend(self.kid);
        if let Some(iv) = &self.constant_iv {
            tenc.push(iv.len() as u8);
            tenc.extend(iv);
        }

        let mut schm = self.scheme.to_vec();
        schm.extend(0x00010000u32.to_be_bytes());

        let sinf = base_box(
            "sinf",
            &[
                base_box("frma", b"mp4a"),
                full_box("schm", 0, 0, &schm),
                base_box("schi", &full_box("tenc", version, 0, &tenc)),
            ]
            .concat(),
        );

        let mut enca = vec![0; 28];
        enca[7] = 1; // data reference index
        enca[17] = 2; // channel count
        enca[19] = 16; // sample size
        enca[24..28].copy_from_slice(&(44100u32 << 16).to_be_bytes());
        enca.extend(sinf);

        let mut stsd = 1u32.to_be_bytes().to_vec();
        stsd.extend(base_box("enca", &enca));

        let trak = base_box(
            "trak",
            &[
                full_box("tkhd", 0, 7, &tkhd),
                base_box(
                    "mdia",
                    &base_box(
                        "minf",
                        &base_box("stbl", &full_box("stsd", 0, 0, &stsd)),
                    ),
                ),
            ]
            .concat(),
        );

        let mut moov = trak;
        if with_mvex {
            let mut trex = self.track_id.to_be_bytes().to_vec();
            trex.extend([0, 0, 0, 1]);
            trex.extend([0; 12]);
            moov.extend(base_box("mvex", &full_box("trex", 0, 0, &trex)));
        }

        let mut init = base_box("ftyp", b"iso6\0\0\0\0iso6dash");
        init.extend(base_box("moov", &moov));
        init
    }

    fn sample_iv(&self, sample: &FixtureSample) -> Vec<u8> {
        match (&self.constant_iv, self.per_sample_iv_size) {
            (Some(iv), 0) => iv.clone(),
            _ => sample.iv.clone(),
        }
    }

    fn senc(&self, samples: &[FixtureSample]) -> Vec<u8> {
        let has_subsamples = samples.iter().any(|x| !x.subsamples.is_empty());
        let mut payload = (samples.len() as u32).to_be_bytes().to_vec();

        for sample in samples {
            if self.per_sample_iv_size > 0 {
                payload.extend(&sample.iv);
            }

            if has_subsamples {
                payload.extend((sample.subsamples.len() as u16).to_be_bytes());
                for (clear, encrypted) in &sample.subsamples {
                    payload.extend(clear.to_be_bytes());
                    payload.extend(encrypted.to_be_bytes());
                }
            }
        }

        full_box("senc", 0, if has_subsamples { 2 } else { 0 }, &payload)
    }

    fn encrypt(&self, key: &[u8; 16], sample: &FixtureSample) -> Vec<u8> {
        let mut data = sample.data.clone();
        let mut iv = [0; 16];
        let sample_iv = self.sample_iv(sample);
        iv[..sample_iv.len()].copy_from_slice(&sample_iv);

        let ranges = if sample.subsamples.is_empty() {
            vec![0..data.len()]
        } else {
            let mut offset = 0;
            sample
                .subsamples
                .iter()
                .map(|(clear, encrypted)| {
                    let start = offset + *clear as usize;
                    offset = start + *encrypted as usize;
                    start..offset
                })
                .collect()
        };

        let pattern = (self.crypt_byte_block as usize, self.skip_byte_block as usize);

        match &self.scheme {
            b"cenc" | b"cens" => {
                let mut ctr =
                    Aes128Ctr::new(GenericArray::from_slice(key), GenericArray::from_slice(&iv));
                for range in ranges {
                    for chunk in pattern_chunks(range, pattern, false) {
                        ctr.apply_keystream(&mut data[chunk]);
                    }
                }
            }
            b"cbc1" | b"cbcs" => {
                let aes = Aes128::new(GenericArray::from_slice(key));
                let mut prev = iv;
                for range in ranges {
                    if &self.scheme == b"cbcs" {
                        prev = iv;
                    }
                    for chunk in pattern_chunks(range, pattern, true) {
                        for block in data[chunk].chunks_exact_mut(16) {
                            for (byte, x) in block.iter_mut().zip(prev) {
                                *byte ^= x;
                            }
                            aes.encrypt_block(GenericArray::from_mut_slice(block));
                            prev.copy_from_slice(block);
                        }
                    }
                }
            }
            _ => (),
        }

        data
    }
}

/// Sub-ranges of `range` covered by the crypt part of a pattern.
fn pattern_chunks(
    range: std::ops::Range<usize>,
    (crypt, skip): (usize, usize),
    whole_blocks: bool,
) -> Vec<std::ops::Range<usize>> {
    let end = if whole_blocks {
        range.start + ((range.end - range.start) / 16) * 16
    } else {
        range.end
    };

    if crypt == 0 && skip == 0 {
        return vec![range.start..end];
    }

    let mut chunks = Vec::new();
    let mut offset = range.start;

    while offset < end {
        let crypt_end = (offset + crypt * 16).min(end);
        chunks.push(offset..crypt_end);
        offset = crypt_end + skip * 16;
    }

    chunks
}

/// Fragment whose samples are encrypted with `key`.
pub fn encrypted_fragment(
    sequence: u32,
    track: &FixtureTrack,
    key: &[u8; 16],
    samples: &[FixtureSample],
) -> Vec<u8> {
    let data = samples
        .iter()
        .map(|x| track.encrypt(key, x))
        .collect::<Vec<_>>();
    fragment(sequence, track, Some(track.senc(samples)), &data)
}

/// What decrypting [`encrypted_fragment`] in place is expected to produce.
pub fn decrypted_fragment(sequence: u32, track: &FixtureTrack, samples: &[FixtureSample]) -> Vec<u8> {
    let data = samples.iter().map(|x| x.data.clone()).collect::<Vec<_>>();
    fragment(sequence, track, Some(track.senc(samples)), &data)
}

/// Fragment without any sample encryption information.
pub fn clear_fragment(sequence: u32, track: &FixtureTrack, samples: &[FixtureSample]) -> Vec<u8> {
    let data = samples.iter().map(|x| x.data.clone()).collect::<Vec<_>>();
    fragment(sequence, track, None, &data)
}

fn fragment(sequence: u32, track: &FixtureTrack, senc: Option<Vec<u8>>, data: &[Vec<u8>]) -> Vec<u8> {
    let moof = |data_offset: i32| {
        let mut trun = (data.len() as u32).to_be_bytes().to_vec();
        trun.extend(data_offset.to_be_bytes());
        for sample in data {
            trun.extend((sample.len() as u32).to_be_bytes());
        }

        let mut traf = [
            full_box("tfhd", 0, 0x020000, &track.track_id.to_be_bytes()),
            full_box("tfdt", 1, 0, &0u64.to_be_bytes()),
            full_box("trun", 0, 0x000201, &trun),
        ]
        .concat();

        if let Some(senc) = &senc {
            traf.extend(senc);
        }

        base_box(
            "moof",
            &[
                full_box("mfhd", 0, 0, &sequence.to_be_bytes()),
                base_box("traf", &traf),
            ]
            .concat(),
        )
    };

    let header_size = moof(0).len() + 8;
    let mut fragment = moof(header_size as i32);
    fragment.extend(base_box("mdat", &data.concat()));
    fragment
}

pub fn base_box(name: &str, payload: &[u8]) -> Vec<u8> {
    let mut data = ((payload.len() + 8) as u32).to_be_bytes().to_vec();
    data.extend(name.as_bytes());
    data.extend(payload);
    data
}

pub fn full_box(name: &str, version: u8, flags: u32, payload: &[u8]) -> Vec<u8> {
    let mut body = ((version as u32) << 24 | (flags & 0xFFFFFF)).to_be_bytes().to_vec();
    body.extend(payload);
    base_box(name, &body)
}
