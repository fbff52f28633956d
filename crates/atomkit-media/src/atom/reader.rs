//! Bounded box reader.

use super::{FourCc, HEADER_SIZE, WIDE_HEADER_SIZE};
use crate::{Error, Result};
use bytes::Bytes;
use std::io::{self, Read, Take};

/// Maximum payload size (64 MB) read into memory, to prevent OOM on malformed files.
const MAX_PAYLOAD_SIZE: u64 = 64 * 1024 * 1024;

/// Parsed box header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoxHeader {
    /// Box type code.
    pub box_type: FourCc,
    /// Box size including header.
    pub size: u64,
    /// Size of the header (8 or 16 bytes).
    pub header_size: u8,
    /// Absolute offset of the first header byte.
    pub offset: u64,
}

impl BoxHeader {
    /// Get the payload size (size - header).
    pub fn payload_size(&self) -> u64 {
        self.size - self.header_size as u64
    }

    /// Whether the header carried a 64-bit length.
    pub fn is_wide(&self) -> bool {
        self.header_size == WIDE_HEADER_SIZE
    }
}

/// Reader bounded to exactly one region: a whole file or one box payload.
///
/// Child readers borrow their parent, so a child can neither read past its
/// own payload nor leave the parent between two siblings.
pub struct BoxReader<'a> {
    region: Take<&'a mut dyn Read>,
    box_type: FourCc,
    base: u64,
    len: u64,
}

impl<'a> BoxReader<'a> {
    /// Create a reader over the next `len` bytes of `inner`.
    ///
    /// `box_type` names the region in errors; use [`FourCc::ROOT`] for a file.
    pub fn new(inner: &'a mut dyn Read, len: u64, box_type: FourCc) -> Self {
        Self {
            region: inner.take(len),
            box_type,
            base: 0,
            len,
        }
    }

    /// Set the absolute offset of the region start, used for [`BoxHeader::offset`].
    pub fn at_offset(mut self, base: u64) -> Self {
        self.base = base;
        self
    }

    /// Type code of the box this reader is bounded to.
    pub fn box_type(&self) -> FourCc {
        self.box_type
    }

    /// Bytes left in the region.
    pub fn remaining(&self) -> u64 {
        self.region.limit()
    }

    /// Absolute offset of the next byte.
    pub fn position(&self) -> u64 {
        self.base + (self.len - self.region.limit())
    }

    /// Read the next child box header, or `None` at the end of the region.
    pub fn next_header(&mut self) -> Result<Option<BoxHeader>> {
        let remaining = self.remaining();
        if remaining == 0 {
            return Ok(None);
        }

        let offset = self.position();
        if remaining < HEADER_SIZE as u64 {
            return Err(Error::invalid_box(
                self.box_type,
                format!("{remaining} trailing bytes are too short for a box header"),
            ));
        }

        let size = self.read_u32()?;
        let box_type = FourCc(self.read_array()?);

        let (size, header_size) = match size {
            1 => {
                if self.remaining() < 8 {
                    return Err(Error::invalid_box(box_type, "truncated 64-bit length"));
                }
                (self.read_u64()?, WIDE_HEADER_SIZE)
            }
            0 => (HEADER_SIZE as u64 + self.remaining(), HEADER_SIZE),
            n => (n as u64, HEADER_SIZE),
        };

        if size < header_size as u64 {
            return Err(Error::invalid_box(
                box_type,
                format!("length {size} is smaller than its {header_size}-byte header"),
            ));
        }

        let header = BoxHeader {
            box_type,
            size,
            header_size,
            offset,
        };
        if header.payload_size() > self.remaining() {
            return Err(Error::invalid_box(
                box_type,
                format!(
                    "length {size} overruns enclosing {} ({} bytes left)",
                    self.box_type,
                    self.remaining()
                ),
            ));
        }

        Ok(Some(header))
    }

    /// Reader bounded to the payload of `header`, which must be the header just read.
    pub fn child(&mut self, header: &BoxHeader) -> BoxReader<'_> {
        let base = self.position();
        let len = header.payload_size();
        let inner: &mut dyn Read = &mut self.region;
        BoxReader {
            region: inner.take(len),
            box_type: header.box_type,
            base,
            len,
        }
    }

    /// Run `f` on every child box, discarding whatever each call leaves unread.
    pub fn for_each_child<F>(&mut self, mut f: F) -> Result<()>
    where
        F: FnMut(&BoxHeader, &mut BoxReader<'_>) -> Result<()>,
    {
        while let Some(header) = self.next_header()? {
            let mut child = self.child(&header);
            f(&header, &mut child)?;
            child.skip_rest()?;
        }
        Ok(())
    }

    fn fill(&mut self, buf: &mut [u8]) -> Result<()> {
        let box_type = self.box_type;
        self.region.read_exact(buf).map_err(|e| {
            if e.kind() == io::ErrorKind::UnexpectedEof {
                Error::UnexpectedEof { box_type }
            } else {
                Error::Io(e)
            }
        })
    }

    pub fn read_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut buf = [0u8; N];
        self.fill(&mut buf)?;
        Ok(buf)
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.read_array::<1>()?[0])
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        Ok(u16::from_be_bytes(self.read_array()?))
    }

    pub fn read_i16(&mut self) -> Result<i16> {
        Ok(i16::from_be_bytes(self.read_array()?))
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        Ok(u32::from_be_bytes(self.read_array()?))
    }

    pub fn read_i32(&mut self) -> Result<i32> {
        Ok(i32::from_be_bytes(self.read_array()?))
    }

    pub fn read_u64(&mut self) -> Result<u64> {
        Ok(u64::from_be_bytes(self.read_array()?))
    }

    pub fn read_fourcc(&mut self) -> Result<FourCc> {
        Ok(FourCc(self.read_array()?))
    }

    /// Read a full box version and 24-bit flags.
    pub fn read_full_header(&mut self) -> Result<(u8, u32)> {
        let word = self.read_u32()?;
        Ok(((word >> 24) as u8, word & 0x00FF_FFFF))
    }

    /// Read `n` bytes into an owned buffer.
    pub fn read_bytes(&mut self, n: u64) -> Result<Bytes> {
        if n > self.remaining() {
            return Err(Error::UnexpectedEof {
                box_type: self.box_type,
            });
        }
        if n > MAX_PAYLOAD_SIZE {
            return Err(Error::invalid_box(
                self.box_type,
                format!("payload of {n} bytes exceeds maximum {MAX_PAYLOAD_SIZE}"),
            ));
        }
        let mut data = vec![0u8; n as usize];
        self.fill(&mut data)?;
        Ok(Bytes::from(data))
    }

    /// Read everything left in the region.
    pub fn read_to_end(&mut self) -> Result<Bytes> {
        self.read_bytes(self.remaining())
    }

    /// Discard `n` bytes.
    pub fn skip(&mut self, n: u64) -> Result<()> {
        let inner: &mut dyn Read = &mut self.region;
        let copied = io::copy(&mut inner.take(n), &mut io::sink())?;
        if copied < n {
            return Err(Error::UnexpectedEof {
                box_type: self.box_type,
            });
        }
        Ok(())
    }

    /// Discard everything left in the region.
    pub fn skip_rest(&mut self) -> Result<()> {
        self.skip(self.remaining())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header_bytes(size: u32, box_type: &[u8; 4]) -> Vec<u8> {
        let mut v = size.to_be_bytes().to_vec();
        v.extend_from_slice(box_type);
        v
    }

    #[test]
    fn test_read_compact_header() {
        let mut data = header_bytes(12, b"free");
        data.extend_from_slice(&[1, 2, 3, 4]);
        let mut src = data.as_slice();
        let mut reader = BoxReader::new(&mut src, 12, FourCc::ROOT);

        let header = reader.next_header().unwrap().unwrap();
        assert_eq!(header.box_type, FourCc::FREE);
        assert_eq!(header.size, 12);
        assert_eq!(header.header_size, 8);
        assert_eq!(header.payload_size(), 4);
        assert!(!header.is_wide());
    }

    #[test]
    fn test_read_wide_header() {
        let mut data = header_bytes(1, b"mdat");
        data.extend_from_slice(&20u64.to_be_bytes());
        data.extend_from_slice(&[9, 9, 9, 9]);
        let mut src = data.as_slice();
        let mut reader = BoxReader::new(&mut src, 20, FourCc::ROOT);

        let header = reader.next_header().unwrap().unwrap();
        assert_eq!(header.size, 20);
        assert!(header.is_wide());
        assert_eq!(header.payload_size(), 4);
    }

    #[test]
    fn test_zero_length_extends_to_region_end() {
        let mut data = header_bytes(0, b"mdat");
        data.extend_from_slice(&[0; 10]);
        let mut src = data.as_slice();
        let mut reader = BoxReader::new(&mut src, 18, FourCc::ROOT);

        let header = reader.next_header().unwrap().unwrap();
        assert_eq!(header.size, 18);
        assert_eq!(header.payload_size(), 10);
    }

    #[test]
    fn test_length_smaller_than_header_is_error() {
        let data = header_bytes(4, b"free");
        let mut src = data.as_slice();
        let mut reader = BoxReader::new(&mut src, 8, FourCc::ROOT);

        assert!(matches!(
            reader.next_header(),
            Err(Error::InvalidBox { box_type, .. }) if box_type == FourCc::FREE
        ));
    }

    #[test]
    fn test_wide_length_smaller_than_wide_header_is_error() {
        let mut data = header_bytes(1, b"mdat");
        data.extend_from_slice(&12u64.to_be_bytes());
        let mut src = data.as_slice();
        let mut reader = BoxReader::new(&mut src, 16, FourCc::ROOT);

        assert!(matches!(reader.next_header(), Err(Error::InvalidBox { .. })));
    }

    #[test]
    fn test_length_overrunning_parent_is_error() {
        let data = header_bytes(100, b"free");
        let mut src = data.as_slice();
        let mut reader = BoxReader::new(&mut src, 8, FourCc::ROOT);

        assert!(matches!(reader.next_header(), Err(Error::InvalidBox { .. })));
    }

    #[test]
    fn test_child_under_read_is_discarded() {
        // Two siblings; the handler reads only one byte of the first.
        let mut data = header_bytes(12, b"aaaa");
        data.extend_from_slice(&[1, 2, 3, 4]);
        data.extend_from_slice(&header_bytes(9, b"bbbb"));
        data.push(7);
        let len = data.len() as u64;
        let mut src = data.as_slice();
        let mut reader = BoxReader::new(&mut src, len, FourCc::ROOT);

        let mut seen = Vec::new();
        reader
            .for_each_child(|header, child| {
                seen.push((header.box_type, header.offset, child.read_u8()?));
                Ok(())
            })
            .unwrap();

        assert_eq!(
            seen,
            vec![(FourCc(*b"aaaa"), 0, 1), (FourCc(*b"bbbb"), 12, 7)]
        );
    }

    #[test]
    fn test_child_cannot_over_read() {
        let mut data = header_bytes(10, b"aaaa");
        data.extend_from_slice(&[1, 2]);
        data.extend_from_slice(&header_bytes(8, b"bbbb"));
        let len = data.len() as u64;
        let mut src = data.as_slice();
        let mut reader = BoxReader::new(&mut src, len, FourCc::ROOT);

        let header = reader.next_header().unwrap().unwrap();
        let mut child = reader.child(&header);
        assert!(matches!(
            child.read_u32(),
            Err(Error::UnexpectedEof { box_type }) if box_type == FourCc(*b"aaaa")
        ));
    }

    #[test]
    fn test_truncated_region_is_unexpected_eof() {
        // Region claims 16 bytes but the source only has 12.
        let mut data = header_bytes(16, b"free");
        data.extend_from_slice(&[0; 4]);
        let mut src = data.as_slice();
        let mut reader = BoxReader::new(&mut src, 16, FourCc::ROOT);

        let result = reader.for_each_child(|_, _| Ok(()));
        assert!(matches!(result, Err(Error::UnexpectedEof { .. })));
    }

    #[test]
    fn test_full_header() {
        let data = [0x01, 0x00, 0x00, 0x07];
        let mut src = &data[..];
        let mut reader = BoxReader::new(&mut src, 4, FourCc::TKHD);
        assert_eq!(reader.read_full_header().unwrap(), (1, 7));
    }
}
