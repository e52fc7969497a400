use crate::{ParsedBox, Result};

/// Track Extends Box (trex) - per track defaults used by movie fragments.
pub struct TrexBox {
    pub track_id: u32,
    pub default_sample_duration: u32,
    pub default_sample_size: u32,
}

impl TrexBox {
    pub fn new(box_: &mut ParsedBox) -> Result<Self> {
        let reader = &mut box_.reader;

        let track_id = reader.read_u32()?;
        // Skip "default_sample_description_index".
        reader.skip(4)?;
        let default_sample_duration = reader.read_u32()?;
        let default_sample_size = reader.read_u32()?;

        Ok(Self {
            track_id,
            default_sample_duration,
            default_sample_size,
        })
    }
}
