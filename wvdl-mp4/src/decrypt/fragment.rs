use crate::{
    Mp4Parser,
    boxes::{SencBox, TfhdBox, TrunBox},
    data,
    decrypt::{
        context::DecryptContext,
        decrypter::SingleSampleDecrypter,
        error::{DecryptError, Result},
    },
    parser, scan_boxes,
};
use std::ops::Range;

#[derive(Default)]
struct TrafState {
    tfhd: Option<TfhdBox>,
    truns: Vec<TrunBox>,
    senc: Option<(u32, Vec<u8>)>,
}

/// Decrypt the samples of one media fragment in place.
///
/// `fragment` starts with a `moof` box and holds the data it references.
/// `fragment_offset` is the absolute position of the fragment in the whole
/// file, needed to resolve explicit base data offsets.
///
/// Returns the number of decrypted samples, or
/// [`DecryptError::NoSampleEncryption`] when no track fragment carries a
/// `senc` box for a protected track.
pub fn decrypt_fragment(
    fragment: &mut [u8],
    fragment_offset: u64,
    ctx: &DecryptContext,
) -> Result<usize> {
    let moof = scan_boxes(fragment)?
        .into_iter()
        .find(|x| x.is("moof"))
        .ok_or_else(|| DecryptError::InvalidFormat("fragment without moof box".to_owned()))?;

    let trafs = data!(Vec::<TrafState>::new());
    let traf_c = trafs.clone();
    let tfhd_c = trafs.clone();
    let trun_c = trafs.clone();
    let senc_c = trafs.clone();

    Mp4Parser::new()
        .base_box("moof", parser::children)
        .base_box("traf", move |box_| {
            traf_c.borrow_mut().push(TrafState::default());
            parser::children(box_)
        })
        .full_box("tfhd", move |mut box_| {
            let tfhd = TfhdBox::new(&mut box_)?;
            if let Some(traf) = tfhd_c.borrow_mut().last_mut() {
                traf.tfhd = Some(tfhd);
            }
            Ok(())
        })
        .full_box("trun", move |mut box_| {
            let trun = TrunBox::new(&mut box_)?;
            if let Some(traf) = trun_c.borrow_mut().last_mut() {
                traf.truns.push(trun);
            }
            Ok(())
        })
        .full_box("senc", move |mut box_| {
            let payload = box_.reader.read_to_end()?;
            if let Some(traf) = senc_c.borrow_mut().last_mut() {
                traf.senc = Some((box_.flags.unwrap_or(0), payload));
            }
            Ok(())
        })
        .parse(&fragment[moof.start..moof.end()], false)?;

    let trafs = trafs.take();

    let is_protected = trafs.iter().any(|traf| {
        traf.senc.is_some()
            && traf
                .tfhd
                .as_ref()
                .is_some_and(|x| ctx.track(x.track_id).is_some())
    });

    if !is_protected {
        return Err(DecryptError::NoSampleEncryption);
    }

    let moof_start = moof.start as u64;
    let mut next_base = moof_start;
    let mut decrypted = 0;

    for traf in trafs {
        let tfhd = traf
            .tfhd
            .ok_or_else(|| DecryptError::InvalidFormat("traf without tfhd box".to_owned()))?;

        let base = if let Some(offset) = tfhd.base_data_offset {
            offset.checked_sub(fragment_offset).ok_or_else(|| {
                DecryptError::InvalidFormat(format!(
                    "base data offset {} points before the fragment",
                    offset
                ))
            })?
        } else if tfhd.default_base_is_moof {
            moof_start
        } else {
            next_base
        };

        let ranges = sample_ranges(&traf.truns, base, &tfhd, ctx, fragment.len())?;

        if let Some(last) = ranges.last() {
            next_base = last.end as u64;
        }

        let Some((flags, payload)) = traf.senc else {
            continue;
        };

        let Some(info) = ctx.track(tfhd.track_id) else {
            continue;
        };

        let senc = SencBox::parse(
            payload,
            flags,
            info.per_sample_iv_size,
            info.constant_iv.as_deref(),
            ranges.len(),
        )?;

        let mut decrypter = SingleSampleDecrypter::new(
            info.scheme,
            ctx.key(),
            info.crypt_byte_block,
            info.skip_byte_block,
        );

        for (index, range) in ranges.into_iter().enumerate() {
            let sample_info =
                senc.samples
                    .get(index)
                    .ok_or(DecryptError::SampleOutOfRange {
                        index,
                        count: senc.sample_count(),
                    })?;

            if range.end > fragment.len() {
                return Err(DecryptError::InvalidFormat(format!(
                    "sample {} of track {} ends at byte {} but the fragment is {} bytes",
                    index,
                    tfhd.track_id,
                    range.end,
                    fragment.len()
                )));
            }

            decrypter.decrypt_sample(
                &mut fragment[range],
                &sample_info.iv,
                &sample_info.subsamples,
            )?;
            decrypted += 1;
        }
    }

    Ok(decrypted)
}

fn sample_ranges(
    truns: &[TrunBox],
    base: u64,
    tfhd: &TfhdBox,
    ctx: &DecryptContext,
    limit: usize,
) -> Result<Vec<Range<usize>>> {
    let default_size = tfhd
        .default_sample_size
        .or_else(|| ctx.default_sample_size(tfhd.track_id));
    let out_of_bounds = |what: String| {
        DecryptError::InvalidFormat(format!(
            "{} in track {} exceeds the {} byte fragment",
            what, tfhd.track_id, limit
        ))
    };

    let mut ranges = Vec::new();
    let mut position = base;

    for trun in truns {
        if let Some(data_offset) = trun.data_offset {
            position = base.checked_add_signed(data_offset as i64).ok_or_else(|| {
                DecryptError::InvalidFormat(format!(
                    "negative sample data position in track {}",
                    tfhd.track_id
                ))
            })?;
        }

        if trun.sample_count as usize > limit {
            return Err(out_of_bounds(format!("{} samples", trun.sample_count)));
        }

        for index in 0..trun.sample_count as usize {
            let size = trun
                .sample_sizes
                .get(index)
                .copied()
                .or(default_size)
                .ok_or_else(|| {
                    DecryptError::InvalidFormat(format!(
                        "no sample size for track {}",
                        tfhd.track_id
                    ))
                })?;

            let end = position
                .checked_add(size as u64)
                .filter(|x| *x <= limit as u64)
                .ok_or_else(|| out_of_bounds(format!("sample {} at {}", index, position)))?;

            ranges.push(position as usize..end as usize);
            position = end;
        }
    }

    Ok(ranges)
}
