use crate::{
    Mp4Parser,
    boxes::{SchmBox, TencBox, TkhdBox, TrexBox},
    data,
    decrypt::{
        cipher::Scheme,
        error::{DecryptError, Result},
    },
    parser,
};
use std::collections::HashMap;

/// Decryption parameters of one protected track.
#[derive(Clone, Debug)]
pub struct TrackDecryptInfo {
    pub scheme: Scheme,
    pub per_sample_iv_size: u8,
    pub constant_iv: Option<Vec<u8>>,
    pub crypt_byte_block: u8,
    pub skip_byte_block: u8,
    pub default_kid: [u8; 16],
}

/// Everything needed to decrypt the fragments following an init segment.
#[derive(Clone, Debug)]
pub struct DecryptContext {
    key: [u8; 16],
    tracks: HashMap<u32, TrackDecryptInfo>,
    default_sample_sizes: HashMap<u32, u32>,
    fragmented: bool,
}

#[derive(Default)]
struct TrackState {
    track_id: Option<u32>,
    scheme_type: Option<u32>,
    scheme_name: String,
    tenc: Option<TencBox>,
}

impl DecryptContext {
    /// Read the protection parameters of every track in `init`.
    pub fn new(init: &[u8], key: [u8; 16]) -> Result<Self> {
        let tracks = data!(Vec::<TrackState>::new());
        let trex = data!(HashMap::<u32, u32>::new());
        let has_mvex = data!(false);

        let tracks_c = tracks.clone();
        let tkhd_c = tracks.clone();
        let schm_c = tracks.clone();
        let tenc_c = tracks.clone();
        let trex_c = trex.clone();
        let has_mvex_c = has_mvex.clone();

        Mp4Parser::new()
            .base_box("moov", parser::children)
            .base_box("trak", move |box_| {
                tracks_c.borrow_mut().push(TrackState::default());
                parser::children(box_)
            })
            .full_box("tkhd", move |mut box_| {
                let tkhd = TkhdBox::new(&mut box_)?;
                if let Some(track) = tkhd_c.borrow_mut().last_mut() {
                    track.track_id = Some(tkhd.track_id);
                }
                Ok(())
            })
            .base_box("mdia", parser::children)
            .base_box("minf", parser::children)
            .base_box("stbl", parser::children)
            .full_box("stsd", parser::sample_description)
            .base_box("encv", parser::visual_sample_entry)
            .base_box("enca", parser::audio_sample_entry)
            .base_box("sinf", parser::children)
            .full_box("schm", move |mut box_| {
                let schm = SchmBox::new(&mut box_)?;
                if let Some(track) = schm_c.borrow_mut().last_mut() {
                    track.scheme_type = Some(schm.scheme_type);
                    track.scheme_name = schm.scheme_name();
                }
                Ok(())
            })
            .base_box("schi", parser::children)
            .full_box("tenc", move |mut box_| {
                let tenc = TencBox::new(&mut box_)?;
                if let Some(track) = tenc_c.borrow_mut().last_mut() {
                    track.tenc = Some(tenc);
                }
                Ok(())
            })
            .base_box("mvex", move |box_| {
                *has_mvex_c.borrow_mut() = true;
                parser::children(box_)
            })
            .full_box("trex", move |mut box_| {
                let trex = TrexBox::new(&mut box_)?;
                trex_c
                    .borrow_mut()
                    .insert(trex.track_id, trex.default_sample_size);
                Ok(())
            })
            .parse(init, false)?;

        let mut protected = HashMap::new();

        for track in tracks.take() {
            let (Some(track_id), Some(tenc)) = (track.track_id, track.tenc) else {
                continue;
            };

            if !tenc.is_protected {
                continue;
            }

            // A tenc box without schm is treated as plain cenc.
            let scheme = match track.scheme_type {
                Some(scheme_type) => Scheme::from_fourcc(scheme_type)
                    .ok_or_else(|| DecryptError::UnsupportedScheme(track.scheme_name.clone()))?,
                None => Scheme::Cenc,
            };

            if tenc.per_sample_iv_size == 0 && tenc.constant_iv.is_none() {
                return Err(DecryptError::InvalidFormat(format!(
                    "track {} has neither per sample nor constant IVs",
                    track_id
                )));
            }

            protected.insert(
                track_id,
                TrackDecryptInfo {
                    scheme,
                    per_sample_iv_size: tenc.per_sample_iv_size,
                    constant_iv: tenc.constant_iv,
                    crypt_byte_block: tenc.crypt_byte_block,
                    skip_byte_block: tenc.skip_byte_block,
                    default_kid: tenc.default_kid,
                },
            );
        }

        Ok(Self {
            key,
            tracks: protected,
            default_sample_sizes: trex.take(),
            fragmented: has_mvex.take(),
        })
    }

    pub fn key(&self) -> &[u8; 16] {
        &self.key
    }

    pub fn track(&self, track_id: u32) -> Option<&TrackDecryptInfo> {
        self.tracks.get(&track_id)
    }

    pub fn tracks(&self) -> impl Iterator<Item = (&u32, &TrackDecryptInfo)> {
        self.tracks.iter()
    }

    /// Default sample size declared in `trex` for a track.
    pub fn default_sample_size(&self, track_id: u32) -> Option<u32> {
        self.default_sample_sizes
            .get(&track_id)
            .copied()
            .filter(|x| *x > 0)
    }

    /// The init segment declares movie fragments through a `mvex` box.
    pub fn has_mvex(&self) -> bool {
        self.fragmented
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixture::FixtureTrack;

    #[test]
    fn reads_track_protection() {
        let ctx = DecryptContext::new(&FixtureTrack::cbcs().init_segment(), [0; 16]).unwrap();
        let track = ctx.track(1).unwrap();

        assert!(ctx.has_mvex());
        assert_eq!(track.scheme, Scheme::Cbcs);
        assert_eq!(track.per_sample_iv_size, 0);
        assert_eq!(track.constant_iv.as_deref(), Some(&[0x33; 16][..]));
        assert_eq!((track.crypt_byte_block, track.skip_byte_block), (1, 9));
        assert_eq!(track.default_kid, [0x11; 16]);
        assert!(ctx.track(2).is_none());
    }

    #[test]
    fn unknown_scheme_is_rejected() {
        let track = FixtureTrack {
            scheme: *b"piff",
            ..FixtureTrack::cenc()
        };

        assert!(matches!(
            DecryptContext::new(&track.init_segment(), [0; 16]),
            Err(DecryptError::UnsupportedScheme(x)) if x == "piff"
        ));
    }
}
