use crate::{ParsedBox, Result};

const BASE_DATA_OFFSET: u32 = 0x000001;
const SAMPLE_DESCRIPTION_INDEX: u32 = 0x000002;
const DEFAULT_SAMPLE_DURATION: u32 = 0x000008;
const DEFAULT_SAMPLE_SIZE: u32 = 0x000010;
const DEFAULT_BASE_IS_MOOF: u32 = 0x020000;

/// Track fragment header, the fields needed to locate sample data.
pub struct TfhdBox {
    pub track_id: u32,
    /// Overrides the `trex` default for this fragment.
    pub default_sample_size: Option<u32>,
    pub base_data_offset: Option<u64>,
    /// Sample offsets are relative to the enclosing `moof`.
    pub default_base_is_moof: bool,
}

impl TfhdBox {
    pub fn new(box_: &mut ParsedBox) -> Result<Self> {
        let flags = box_.flags.unwrap_or(0);
        let reader = &mut box_.reader;
        let track_id = reader.read_u32()?;

        let base_data_offset = match flags & BASE_DATA_OFFSET {
            0 => None,
            _ => Some(reader.read_u64()?),
        };

        for skipped in [SAMPLE_DESCRIPTION_INDEX, DEFAULT_SAMPLE_DURATION] {
            if flags & skipped != 0 {
                reader.skip(4)?;
            }
        }

        let default_sample_size = match flags & DEFAULT_SAMPLE_SIZE {
            0 => None,
            _ => Some(reader.read_u32()?),
        };

        Ok(Self {
            track_id,
            default_sample_size,
            base_data_offset,
            default_base_is_moof: flags & DEFAULT_BASE_IS_MOOF != 0,
        })
    }
}
