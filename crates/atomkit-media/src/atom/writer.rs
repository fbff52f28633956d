//! Box writer with deferred size patch-back.

use super::FourCc;
use crate::{Error, Result};
use std::io::{self, Seek, SeekFrom, Write};

/// Object-safe alias for seekable sinks.
pub trait WriteSeek: Write + Seek {}

impl<T: Write + Seek> WriteSeek for T {}

/// Write a 16-byte wide header (`1`, type, zero 64-bit length) and return its offset.
pub fn write_wide_placeholder<W: Write + Seek + ?Sized>(w: &mut W, box_type: FourCc) -> Result<u64> {
    let start = w.stream_position()?;
    w.write_all(&1u32.to_be_bytes())?;
    w.write_all(box_type.as_bytes())?;
    w.write_all(&0u64.to_be_bytes())?;
    Ok(start)
}

/// Patch the 64-bit length of a wide header written at `start`.
///
/// Leaves the sink positioned just after the length field.
pub fn patch_wide_size<W: Write + Seek + ?Sized>(w: &mut W, start: u64, size: u64) -> Result<()> {
    w.seek(SeekFrom::Start(start + 8))?;
    w.write_all(&size.to_be_bytes())?;
    Ok(())
}

/// An open box on a seekable sink.
///
/// Opening writes the header with a placeholder length; [`finish`](Self::finish)
/// seeks back and writes the real header-inclusive length. A writer dropped
/// without `finish` (for example when `?` bails out mid-box) patches itself.
///
/// `BoxWriter` is itself `Write + Seek`, so child boxes open on top of it.
pub struct BoxWriter<'a, W: Write + Seek + ?Sized> {
    inner: &'a mut W,
    box_type: FourCc,
    start: u64,
    wide: bool,
    finished: bool,
}

impl<'a, W: Write + Seek + ?Sized> BoxWriter<'a, W> {
    /// Open a box with a 32-bit length field.
    pub fn open(inner: &'a mut W, box_type: FourCc) -> Result<Self> {
        let start = inner.stream_position()?;
        inner.write_all(&0u32.to_be_bytes())?;
        inner.write_all(box_type.as_bytes())?;
        Ok(Self {
            inner,
            box_type,
            start,
            wide: false,
            finished: false,
        })
    }

    /// Open a box with a 64-bit length field.
    ///
    /// Must be chosen before any payload is written; a compact header cannot
    /// grow once children follow it.
    pub fn open_wide(inner: &'a mut W, box_type: FourCc) -> Result<Self> {
        let start = write_wide_placeholder(&mut *inner, box_type)?;
        Ok(Self {
            inner,
            box_type,
            start,
            wide: true,
            finished: false,
        })
    }

    /// Open a full box: compact header followed by version and 24-bit flags.
    pub fn open_full(inner: &'a mut W, box_type: FourCc, version: u8, flags: u32) -> Result<Self> {
        let mut writer = Self::open(inner, box_type)?;
        let word = ((version as u32) << 24) | (flags & 0x00FF_FFFF);
        writer.write_all(&word.to_be_bytes())?;
        Ok(writer)
    }

    pub fn box_type(&self) -> FourCc {
        self.box_type
    }

    /// Patch the length field and return the header-inclusive box size.
    pub fn finish(mut self) -> Result<u64> {
        self.finished = true;
        self.patch()
    }

    fn patch(&mut self) -> Result<u64> {
        let end = self.inner.stream_position()?;
        let size = end - self.start;

        if self.wide {
            patch_wide_size(&mut *self.inner, self.start, size)?;
        } else {
            let compact = u32::try_from(size).map_err(|_| Error::BoxTooLarge {
                box_type: self.box_type,
                size,
            })?;
            self.inner.seek(SeekFrom::Start(self.start))?;
            self.inner.write_all(&compact.to_be_bytes())?;
        }

        self.inner.seek(SeekFrom::Start(end))?;
        Ok(size)
    }
}

impl<W: Write + Seek + ?Sized> Drop for BoxWriter<'_, W> {
    fn drop(&mut self) {
        if !self.finished {
            if let Err(e) = self.patch() {
                tracing::warn!(box_type = %self.box_type, error = %e, "Failed to patch box size on drop");
            }
        }
    }
}

impl<W: Write + Seek + ?Sized> Write for BoxWriter<'_, W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

impl<W: Write + Seek + ?Sized> Seek for BoxWriter<'_, W> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.inner.seek(pos)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    /// Sink that records writes by offset instead of storing a dense buffer.
    #[derive(Default)]
    struct SparseSink {
        pos: u64,
        len: u64,
        writes: Vec<(u64, Vec<u8>)>,
    }

    impl Write for SparseSink {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.writes.push((self.pos, buf.to_vec()));
            self.pos += buf.len() as u64;
            self.len = self.len.max(self.pos);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Seek for SparseSink {
        fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
            self.pos = match pos {
                SeekFrom::Start(n) => n,
                SeekFrom::Current(d) => self.pos.wrapping_add_signed(d),
                SeekFrom::End(d) => self.len.wrapping_add_signed(d),
            };
            Ok(self.pos)
        }
    }

    #[test]
    fn test_nested_sizes_are_patched() {
        let mut cursor = Cursor::new(Vec::new());
        let mut outer = BoxWriter::open(&mut cursor, FourCc::MOOV).unwrap();
        let mut inner = BoxWriter::open(&mut outer, FourCc::FREE).unwrap();
        inner.write_all(&[1, 2, 3]).unwrap();
        assert_eq!(inner.finish().unwrap(), 11);
        assert_eq!(outer.finish().unwrap(), 19);

        let data = cursor.into_inner();
        assert_eq!(&data[0..8], &[0, 0, 0, 19, b'm', b'o', b'o', b'v']);
        assert_eq!(&data[8..16], &[0, 0, 0, 11, b'f', b'r', b'e', b'e']);
        assert_eq!(&data[16..], &[1, 2, 3]);
    }

    #[test]
    fn test_full_box_header() {
        let mut cursor = Cursor::new(Vec::new());
        let writer = BoxWriter::open_full(&mut cursor, FourCc::TKHD, 1, 3).unwrap();
        writer.finish().unwrap();
        assert_eq!(
            cursor.into_inner(),
            vec![0, 0, 0, 12, b't', b'k', b'h', b'd', 1, 0, 0, 3]
        );
    }

    #[test]
    fn test_drop_patches_size() {
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = BoxWriter::open(&mut cursor, FourCc::FREE).unwrap();
            writer.write_all(&[0xAA; 4]).unwrap();
        }
        let data = cursor.into_inner();
        assert_eq!(u32::from_be_bytes([data[0], data[1], data[2], data[3]]), 12);
    }

    #[test]
    fn test_wide_box_size() {
        let mut cursor = Cursor::new(Vec::new());
        let mut writer = BoxWriter::open_wide(&mut cursor, FourCc::MDAT).unwrap();
        writer.write_all(&[0; 5]).unwrap();
        assert_eq!(writer.finish().unwrap(), 21);

        let data = cursor.into_inner();
        assert_eq!(&data[0..4], &1u32.to_be_bytes());
        assert_eq!(&data[4..8], b"mdat");
        assert_eq!(&data[8..16], &21u64.to_be_bytes());
    }

    #[test]
    fn test_compact_box_over_4gib_is_rejected() {
        let mut sink = SparseSink::default();
        let mut writer = BoxWriter::open(&mut sink, FourCc::MDAT).unwrap();
        writer.seek(SeekFrom::Current(u32::MAX as i64)).unwrap();
        writer.write_all(&[0]).unwrap();

        assert!(matches!(
            writer.finish(),
            Err(Error::BoxTooLarge { box_type, size }) if box_type == FourCc::MDAT && size == u32::MAX as u64 + 9
        ));
    }

    #[test]
    fn test_wide_box_over_4gib_is_patched() {
        let mut sink = SparseSink::default();
        let mut writer = BoxWriter::open_wide(&mut sink, FourCc::MDAT).unwrap();
        writer.seek(SeekFrom::Current(u32::MAX as i64)).unwrap();
        writer.write_all(&[0]).unwrap();

        let expected = u32::MAX as u64 + 17;
        assert_eq!(writer.finish().unwrap(), expected);
        assert!(sink
            .writes
            .iter()
            .any(|(offset, bytes)| *offset == 8 && bytes == &expected.to_be_bytes()));
    }
}
