/*
    REFERENCES
    ----------

    1. https://github.com/shaka-project/shaka-player/blob/f539147d480fff9cc8d685f3aac0e6f5dc28a182/lib/util/data_view_reader.js

*/

use std::io::{Cursor, Error, ErrorKind, Read, Result};

/// Big endian reader for parsing mp4 boxes.
#[derive(Clone, Default)]
pub struct Reader {
    inner: Cursor<Vec<u8>>,
}

impl Reader {
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            inner: Cursor::new(data),
        }
    }

    pub fn has_more_data(&self) -> bool {
        self.inner.position() < self.get_length()
    }

    pub fn get_length(&self) -> u64 {
        self.inner.get_ref().len() as u64
    }

    pub fn get_position(&self) -> u64 {
        self.inner.position()
    }

    pub fn remaining(&self) -> u64 {
        self.get_length().saturating_sub(self.get_position())
    }

    pub fn skip(&mut self, bytes: u64) -> Result<()> {
        let Some(position) = self
            .get_position()
            .checked_add(bytes)
            .filter(|x| *x <= self.get_length())
        else {
            return Err(Error::new(
                ErrorKind::UnexpectedEof,
                "Reader skips out of bounds.",
            ));
        };

        self.inner.set_position(position);
        Ok(())
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        let mut buf = [0; 1];
        self.inner.read_exact(&mut buf)?;
        Ok(buf[0])
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        let mut buf = [0; 2];
        self.inner.read_exact(&mut buf)?;
        Ok(u16::from_be_bytes(buf))
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        let mut buf = [0; 4];
        self.inner.read_exact(&mut buf)?;
        Ok(u32::from_be_bytes(buf))
    }

    pub fn read_i32(&mut self) -> Result<i32> {
        let mut buf = [0; 4];
        self.inner.read_exact(&mut buf)?;
        Ok(i32::from_be_bytes(buf))
    }

    pub fn read_u64(&mut self) -> Result<u64> {
        let mut buf = [0; 8];
        self.inner.read_exact(&mut buf)?;
        Ok(u64::from_be_bytes(buf))
    }

    pub fn read_bytes(&mut self, bytes: usize) -> Result<Vec<u8>> {
        if bytes as u64 > self.remaining() {
            return Err(Error::new(
                ErrorKind::UnexpectedEof,
                "Reader reads out of bounds.",
            ));
        }

        let mut buf = vec![0; bytes];
        self.inner.read_exact(&mut buf)?;
        Ok(buf)
    }

    /// Read all bytes left in this reader.
    pub fn read_to_end(&mut self) -> Result<Vec<u8>> {
        self.read_bytes(self.remaining() as usize)
    }
}
