//! Batch frame layout.
//!
//! Every batch starts with a fixed-shape header:
//!
//! | field        | width  | encoding      |
//! |--------------|--------|---------------|
//! | set count K  | 1 B    | u8            |
//! | meta length  | 4 B    | u32 LE        |
//! | set lengths  | 4·K B  | u32 LE each   |
//!
//! The header is followed by the metadata blob and then the K column-set
//! blobs in declaration order. Fixed-width length prefixes make skipping an
//! unwanted blob a single forward seek; no index is needed.
//!
//! All binary I/O is strictly little-endian. No runtime negotiation is ever
//! performed.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Read, Write};

/// Set count is carried in one byte.
pub const MAX_COLUMN_SETS: usize = 255;

/// Parsed batch header. The payload follows immediately: `meta_len` bytes
/// of metadata, then `set_lens[i]` bytes per column set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchHeader {
    pub meta_len: u32,
    pub set_lens: Vec<u32>,
}

impl BatchHeader {
    pub fn set_count(&self) -> usize {
        self.set_lens.len()
    }

    /// Byte length of the encoded header itself.
    pub fn header_len(&self) -> u64 {
        1 + 4 + 4 * self.set_lens.len() as u64
    }

    /// Byte length of the payload the header announces.
    pub fn payload_len(&self) -> u64 {
        self.meta_len as u64 + self.set_lens.iter().map(|&l| l as u64).sum::<u64>()
    }

    /// Total on-disk size of the batch: header plus payload.
    pub fn frame_len(&self) -> u64 {
        self.header_len() + self.payload_len()
    }

    pub fn write<W: Write>(&self, mut writer: W) -> io::Result<()> {
        debug_assert!(self.set_lens.len() <= MAX_COLUMN_SETS);
        writer.write_u8(self.set_lens.len() as u8)?;
        writer.write_u32::<LittleEndian>(self.meta_len)?;
        for &len in &self.set_lens {
            writer.write_u32::<LittleEndian>(len)?;
        }
        Ok(())
    }

    /// Read a header at the current position.
    ///
    /// `Ok(None)` means the stream ended cleanly at a batch boundary. EOF
    /// after the first byte is a short header and surfaces as
    /// `UnexpectedEof` so callers can report truncation.
    pub fn read<R: Read>(mut reader: R) -> io::Result<Option<Self>> {
        let set_count = match reader.read_u8() {
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e),
        };
        let meta_len = reader.read_u32::<LittleEndian>()?;
        let mut set_lens = Vec::with_capacity(set_count as usize);
        for _ in 0..set_count {
            set_lens.push(reader.read_u32::<LittleEndian>()?);
        }
        Ok(Some(Self { meta_len, set_lens }))
    }
}
