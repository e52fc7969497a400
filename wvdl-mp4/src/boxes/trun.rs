use crate::{Error, ParsedBox, Result};

const DATA_OFFSET: u32 = 0x000001;
const FIRST_SAMPLE_FLAGS: u32 = 0x000004;
const SAMPLE_DURATION: u32 = 0x000100;
const SAMPLE_SIZE: u32 = 0x000200;
const SAMPLE_FLAGS: u32 = 0x000400;
const SAMPLE_COMPOSITION_TIME_OFFSET: u32 = 0x000800;

/// Track fragment run, reduced to sample sizes and the data offset.
#[derive(Debug, Clone)]
pub struct TrunBox {
    pub sample_count: u32,
    /// Relative to the base data offset of the track fragment.
    pub data_offset: Option<i32>,
    /// One entry per sample when the run carries sizes, empty when the
    /// `tfhd` or `trex` default applies.
    pub sample_sizes: Vec<u32>,
}

impl TrunBox {
    pub fn new(box_: &mut ParsedBox) -> Result<Self> {
        let flags = box_.flags.unwrap_or(0);
        let reader = &mut box_.reader;
        let sample_count = reader.read_u32()?;

        let data_offset = match flags & DATA_OFFSET {
            0 => None,
            _ => Some(reader.read_i32()?),
        };

        if flags & FIRST_SAMPLE_FLAGS != 0 {
            reader.skip(4)?;
        }

        let fields = [
            SAMPLE_DURATION,
            SAMPLE_SIZE,
            SAMPLE_FLAGS,
            SAMPLE_COMPOSITION_TIME_OFFSET,
        ];
        let entry_size = fields.iter().filter(|x| flags & **x != 0).count() as u64 * 4;

        if sample_count as u64 * entry_size > reader.remaining() {
            return Err(Error::new_decode_err(format!(
                "trun with {} samples of {} bytes in {} bytes",
                sample_count,
                entry_size,
                reader.remaining()
            )));
        }

        let mut sample_sizes = Vec::new();

        if flags & SAMPLE_SIZE != 0 {
            sample_sizes.reserve(sample_count as usize);

            for _ in 0..sample_count {
                if flags & SAMPLE_DURATION != 0 {
                    reader.skip(4)?;
                }

                sample_sizes.push(reader.read_u32()?);

                for skipped in [SAMPLE_FLAGS, SAMPLE_COMPOSITION_TIME_OFFSET] {
                    if flags & skipped != 0 {
                        reader.skip(4)?;
                    }
                }
            }
        }

        Ok(Self {
            sample_count,
            data_offset,
            sample_sizes,
        })
    }
}
