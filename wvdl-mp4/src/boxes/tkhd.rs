use crate::{ParsedBox, Result};

pub struct TkhdBox {
    pub track_id: u32,
}

impl TkhdBox {
    /// Parses a TKHD Box.
    pub fn new(box_: &mut ParsedBox) -> Result<Self> {
        let reader = &mut box_.reader;

        // Skip "creation_time" and "modification_time".
        if box_.version == Some(1) {
            reader.skip(16)?;
        } else {
            reader.skip(8)?;
        }

        let track_id = reader.read_u32()?;

        Ok(Self { track_id })
    }
}
