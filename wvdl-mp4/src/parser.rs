//! Callback driven box parser, modelled on the one in shaka-player
//! (`lib/util/mp4_parser.js`).
//!
//! A parser is a set of box definitions. Every box without a definition is
//! skipped, container boxes have to be declared with [`children`] (or one of
//! the sample entry callbacks) for their contents to be visited.

use crate::{Error, Reader};
use std::{collections::HashMap, sync::Arc};

/// `Result` type returned by box callbacks.
pub type HandlerResult = Result<(), Error>;

type Callback = Arc<dyn Fn(ParsedBox) -> HandlerResult>;

#[derive(Clone)]
struct Definition {
    full: bool,
    callback: Callback,
}

#[derive(Clone, Default)]
pub struct Mp4Parser {
    definitions: HashMap<u32, Definition>,
}

impl Mp4Parser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Visit boxes named `name` with `callback`.
    pub fn base_box<F>(self, name: &str, callback: F) -> Self
    where
        F: Fn(ParsedBox) -> HandlerResult + 'static,
    {
        self.define(name, false, callback)
    }

    /// Same as [`Mp4Parser::base_box`] for boxes that start with version and flags.
    pub fn full_box<F>(self, name: &str, callback: F) -> Self
    where
        F: Fn(ParsedBox) -> HandlerResult + 'static,
    {
        self.define(name, true, callback)
    }

    fn define<F>(mut self, name: &str, full: bool, callback: F) -> Self
    where
        F: Fn(ParsedBox) -> HandlerResult + 'static,
    {
        self.definitions.insert(
            type_from_string(name),
            Definition {
                full,
                callback: Arc::new(callback),
            },
        );
        self
    }

    /// Walk `data`. With `partial_okay` a box running past the end of `data`
    /// is handed to its callback truncated instead of failing.
    pub fn parse(&self, data: &[u8], partial_okay: bool) -> HandlerResult {
        let mut reader = Reader::new(data.to_vec());

        while reader.has_more_data() {
            self.parse_next(0, &mut reader, partial_okay)?;
        }

        Ok(())
    }

    /// Parse one box at the position of `reader`, whose first byte sits at
    /// `abs_start` in the outermost buffer.
    fn parse_next(&self, abs_start: u64, reader: &mut Reader, partial_okay: bool) -> HandlerResult {
        let start = reader.get_position();
        let mut size = reader.read_u32()? as u64;
        let type_ = reader.read_u32()?;
        let mut header_size = 8;

        match size {
            0 => size = reader.get_length() - start,
            1 => {
                size = reader.read_u64()?;
                header_size += 8;
            }
            _ => (),
        }

        let Some(box_end) = start.checked_add(size).filter(|_| size >= header_size) else {
            return Err(Error::new_decode_err(format!(
                "{} box with invalid size {}",
                type_to_string(type_)?,
                size
            )));
        };

        let Some(Definition { full, callback }) = self.definitions.get(&type_).cloned() else {
            let skip = (box_end - reader.get_position()).min(reader.remaining());
            reader.skip(skip)?;
            return Ok(());
        };

        let (version, flags) = if full {
            let x = reader.read_u32()?;
            header_size += 4;
            (Some(x >> 24), Some(x & 0xFFFFFF))
        } else {
            (None, None)
        };

        let mut end = box_end;

        if partial_okay {
            end = end.min(reader.get_length());
        }

        let payload = reader.read_bytes(end.saturating_sub(reader.get_position()) as usize)?;

        callback(ParsedBox {
            parser: self.clone(),
            partial_okay,
            start: start + abs_start,
            header_size,
            version,
            flags,
            reader: Reader::new(payload),
        })
    }
}

/// Treat the payload as a sequence of boxes.
pub fn children(mut box_: ParsedBox) -> HandlerResult {
    box_.parse_rest()
}

/// Treat the payload as an `stsd` box: an entry count followed by that many
/// sample entries.
pub fn sample_description(mut box_: ParsedBox) -> HandlerResult {
    let count = box_.reader.read_u32()?;

    for _ in 0..count {
        if !box_.reader.has_more_data() {
            break;
        }

        box_.parse_child()?;
    }

    Ok(())
}

/// `encv` and friends: 78 bytes of fixed video fields, then child boxes.
pub fn visual_sample_entry(mut box_: ParsedBox) -> HandlerResult {
    box_.reader.skip(78)?;
    box_.parse_rest()
}

/// `enca` and friends: fixed audio fields whose length depends on the
/// entry version, then child boxes.
pub fn audio_sample_entry(mut box_: ParsedBox) -> HandlerResult {
    // reserved + data reference index
    box_.reader.skip(8)?;
    let version = box_.reader.read_u16()?;
    // revision + vendor
    box_.reader.skip(6)?;

    let fields = match version {
        1 => 12 + 16,
        2 => 48,
        _ => 12,
    };

    box_.reader.skip(fields)?;
    box_.parse_rest()
}

/// Integer form of a four character box name.
pub fn type_from_string(name: &str) -> u32 {
    assert!(name.len() == 4, "MP4 box names must be 4 characters long");

    name.bytes().fold(0, |code, chr| (code << 8) | chr as u32)
}

pub fn type_to_string(type_: u32) -> Result<String, std::string::FromUtf8Error> {
    String::from_utf8(type_.to_be_bytes().to_vec())
}

/// A box handed to a callback. `reader` only covers its payload.
pub struct ParsedBox {
    pub parser: Mp4Parser,
    pub partial_okay: bool,
    /// Absolute offset of the box header in the parsed buffer.
    pub start: u64,
    /// Header length including a 64 bit size and version/flags when present.
    pub header_size: u64,
    /// Only set for full boxes.
    pub version: Option<u32>,
    /// Only set for full boxes.
    pub flags: Option<u32>,
    pub reader: Reader,
}

impl ParsedBox {
    fn parse_child(&mut self) -> HandlerResult {
        let parser = self.parser.clone();
        parser.parse_next(self.start + self.header_size, &mut self.reader, self.partial_okay)
    }

    fn parse_rest(&mut self) -> HandlerResult {
        while self.reader.has_more_data() {
            self.parse_child()?;
        }

        Ok(())
    }
}

/// Header of a box found while scanning one level of an mp4 buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BoxHeader {
    /// The fourcc as an integer, see [`type_from_string`].
    pub type_: u32,
    /// Offset of the box header in the scanned buffer.
    pub start: usize,
    /// Size of the box including its header.
    pub size: usize,
}

impl BoxHeader {
    pub fn end(&self) -> usize {
        self.start + self.size
    }

    pub fn is(&self, name: &str) -> bool {
        self.type_ == type_from_string(name)
    }
}

/// List the boxes of one level of `data` without reading their payloads.
pub fn scan_boxes(data: &[u8]) -> Result<Vec<BoxHeader>, Error> {
    let mut boxes = Vec::new();
    let mut offset = 0;

    while offset < data.len() {
        if offset + 8 > data.len() {
            return Err(Error::new_decode_err(format!(
                "truncated box header at offset {}",
                offset
            )));
        }

        let mut size = u32::from_be_bytes([
            data[offset],
            data[offset + 1],
            data[offset + 2],
            data[offset + 3],
        ]) as usize;
        let type_ = u32::from_be_bytes([
            data[offset + 4],
            data[offset + 5],
            data[offset + 6],
            data[offset + 7],
        ]);
        let mut header_size = 8;

        match size {
            0 => size = data.len() - offset,
            1 => {
                if offset + 16 > data.len() {
                    return Err(Error::new_decode_err(format!(
                        "truncated 64-bit box header at offset {}",
                        offset
                    )));
                }

                let mut buf = [0; 8];
                buf.copy_from_slice(&data[offset + 8..offset + 16]);
                size = usize::try_from(u64::from_be_bytes(buf)).unwrap_or(usize::MAX);
                header_size = 16;
            }
            _ => (),
        }

        let end = offset.checked_add(size).filter(|x| *x <= data.len());

        if size < header_size || end.is_none() {
            return Err(Error::new_decode_err(format!(
                "{} box at offset {} with size {} exceeds the available {} bytes",
                type_to_string(type_).unwrap_or_default(),
                offset,
                size,
                data.len() - offset
            )));
        }

        boxes.push(BoxHeader {
            type_,
            start: offset,
            size,
        });
        offset += size;
    }

    Ok(boxes)
}
