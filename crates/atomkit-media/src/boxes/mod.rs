//! Typed ISO BMFF metadata boxes.
//!
//! Each box has a `write` that emits the full box (header included) on a
//! seekable sink, and a `read` that decodes it from a reader bounded to the
//! box payload. Container boxes skip children they do not model.

mod movie;
mod sample_table;

pub use movie::{
    DataEntry, Dinf, Ftyp, Hdlr, Mdhd, Mdia, MediaHeader, Minf, Moov, Mvhd, Smhd, Tkhd, Trak, Vmhd,
};
pub use sample_table::{Ctts, CttsEntry, Stbl, Stco, Stsc, StscEntry, Stss, Stsz, Stts, SttsEntry};

use crate::atom::{BoxReader, BoxWriter, FourCc};
use crate::Result;
use bytes::{BufMut, BytesMut};
use std::io::{Seek, Write};

/// Identity transformation matrix (16.16 and 2.30 fixed point).
pub const IDENTITY_MATRIX: [i32; 9] = [0x0001_0000, 0, 0, 0, 0x0001_0000, 0, 0, 0, 0x4000_0000];

/// Undetermined language code ("und" packed as ISO-639-2/T).
pub const LANGUAGE_UND: u16 = 0x55C4;

/// Write a leaf box whose payload was serialized up front.
pub(crate) fn write_leaf<W: Write + Seek + ?Sized>(
    w: &mut W,
    box_type: FourCc,
    payload: &[u8],
) -> Result<u64> {
    let mut writer = BoxWriter::open(w, box_type)?;
    writer.write_all(payload)?;
    writer.finish()
}

/// Put a full box version and 24-bit flags.
pub(crate) fn put_full_header(buf: &mut BytesMut, version: u8, flags: u32) {
    buf.put_u32(((version as u32) << 24) | (flags & 0x00FF_FFFF));
}

pub(crate) fn put_matrix(buf: &mut BytesMut, matrix: &[i32; 9]) {
    for value in matrix {
        buf.put_i32(*value);
    }
}

pub(crate) fn read_matrix(reader: &mut BoxReader<'_>) -> Result<[i32; 9]> {
    let mut matrix = [0i32; 9];
    for value in matrix.iter_mut() {
        *value = reader.read_i32()?;
    }
    Ok(matrix)
}

/// Read a `u32` entry count and cap it by what the payload can hold.
pub(crate) fn read_entry_count(reader: &mut BoxReader<'_>, entry_size: u64) -> Result<usize> {
    let count = reader.read_u32()? as u64;
    if count * entry_size > reader.remaining() {
        return Err(crate::Error::invalid_box(
            reader.box_type(),
            format!(
                "{count} entries of {entry_size} bytes exceed the {} bytes left",
                reader.remaining()
            ),
        ));
    }
    Ok(count as usize)
}
