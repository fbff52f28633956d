//! Sample table boxes.
//!
//! Durations and composition offsets are run-length coded; sizes and chunk
//! offsets are flat, one entry per sample.

use super::{put_full_header, read_entry_count, write_leaf};
use crate::atom::{BoxReader, BoxWriter, FourCc};
use crate::sample_entry::Stsd;
use crate::{Error, Result};
use bytes::{BufMut, BytesMut};
use std::io::{Seek, Write};

/// Sample table box.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stbl {
    pub stsd: Stsd,
    pub stts: Stts,
    pub ctts: Option<Ctts>,
    pub stss: Option<Stss>,
    pub stsc: Stsc,
    pub stsz: Stsz,
    pub stco: Stco,
}

impl Stbl {
    pub fn write<W: Write + Seek + ?Sized>(&self, w: &mut W) -> Result<u64> {
        let mut writer = BoxWriter::open(w, FourCc::STBL)?;
        self.stsd.write(&mut writer)?;
        self.stts.write(&mut writer)?;
        if let Some(ctts) = &self.ctts {
            ctts.write(&mut writer)?;
        }
        if let Some(stss) = &self.stss {
            stss.write(&mut writer)?;
        }
        self.stsc.write(&mut writer)?;
        self.stsz.write(&mut writer)?;
        self.stco.write(&mut writer)?;
        writer.finish()
    }

    pub fn read(reader: &mut BoxReader<'_>) -> Result<Self> {
        let mut stsd = None;
        let mut stts = None;
        let mut ctts = None;
        let mut stss = None;
        let mut stsc = None;
        let mut stsz = None;
        let mut stco = None;

        reader.for_each_child(|header, child| {
            match header.box_type {
                FourCc::STSD => stsd = Some(Stsd::read(child)?),
                FourCc::STTS => stts = Some(Stts::read(child)?),
                FourCc::CTTS => ctts = Some(Ctts::read(child)?),
                FourCc::STSS => stss = Some(Stss::read(child)?),
                FourCc::STSC => stsc = Some(Stsc::read(child)?),
                FourCc::STSZ => stsz = Some(Stsz::read(child)?),
                FourCc::STCO => stco = Some(Stco::read(child, false)?),
                FourCc::CO64 => stco = Some(Stco::read(child, true)?),
                other => {
                    tracing::trace!(box_type = %other, "Skipping unknown stbl child");
                }
            }
            Ok(())
        })?;

        Ok(Self {
            stsd: stsd.ok_or(Error::MissingBox("stsd"))?,
            stts: stts.ok_or(Error::MissingBox("stts"))?,
            ctts,
            stss,
            stsc: stsc.ok_or(Error::MissingBox("stsc"))?,
            stsz: stsz.ok_or(Error::MissingBox("stsz"))?,
            stco: stco.ok_or(Error::MissingBox("stco"))?,
        })
    }
}

// ---------------------------------------------------------------------------
// stts
// ---------------------------------------------------------------------------

/// One run of equal sample durations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SttsEntry {
    pub sample_count: u32,
    pub sample_delta: u32,
}

/// Decoding time-to-sample box.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Stts {
    pub entries: Vec<SttsEntry>,
}

impl Stts {
    /// Append one sample duration, extending the last run when it matches.
    pub fn push(&mut self, delta: u32) {
        match self.entries.last_mut() {
            Some(last) if last.sample_delta == delta => last.sample_count += 1,
            _ => self.entries.push(SttsEntry {
                sample_count: 1,
                sample_delta: delta,
            }),
        }
    }

    pub fn sample_count(&self) -> u64 {
        self.entries.iter().map(|e| e.sample_count as u64).sum()
    }

    /// Sum of all durations, in media ticks.
    pub fn total_duration(&self) -> u64 {
        self.entries
            .iter()
            .map(|e| e.sample_count as u64 * e.sample_delta as u64)
            .sum()
    }

    pub fn write<W: Write + Seek + ?Sized>(&self, w: &mut W) -> Result<u64> {
        let mut buf = BytesMut::with_capacity(8 + self.entries.len() * 8);
        put_full_header(&mut buf, 0, 0);
        buf.put_u32(self.entries.len() as u32);
        for entry in &self.entries {
            buf.put_u32(entry.sample_count);
            buf.put_u32(entry.sample_delta);
        }
        write_leaf(w, FourCc::STTS, &buf)
    }

    pub fn read(reader: &mut BoxReader<'_>) -> Result<Self> {
        reader.read_full_header()?;
        let count = read_entry_count(reader, 8)?;
        let mut entries = Vec::with_capacity(count);
        for _ in 0..count {
            entries.push(SttsEntry {
                sample_count: reader.read_u32()?,
                sample_delta: reader.read_u32()?,
            });
        }
        Ok(Self { entries })
    }
}

// ---------------------------------------------------------------------------
// ctts
// ---------------------------------------------------------------------------

/// One run of equal composition offsets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CttsEntry {
    pub sample_count: u32,
    pub sample_offset: i32,
}

/// Composition time-to-sample box.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Ctts {
    pub entries: Vec<CttsEntry>,
}

impl Ctts {
    /// Append one composition offset, extending the last run when it matches.
    pub fn push(&mut self, offset: i32) {
        match self.entries.last_mut() {
            Some(last) if last.sample_offset == offset => last.sample_count += 1,
            _ => self.entries.push(CttsEntry {
                sample_count: 1,
                sample_offset: offset,
            }),
        }
    }

    pub fn sample_count(&self) -> u64 {
        self.entries.iter().map(|e| e.sample_count as u64).sum()
    }

    pub fn write<W: Write + Seek + ?Sized>(&self, w: &mut W) -> Result<u64> {
        // Version 1 signals signed offsets.
        let version = u8::from(self.entries.iter().any(|e| e.sample_offset < 0));
        let mut buf = BytesMut::with_capacity(8 + self.entries.len() * 8);
        put_full_header(&mut buf, version, 0);
        buf.put_u32(self.entries.len() as u32);
        for entry in &self.entries {
            buf.put_u32(entry.sample_count);
            buf.put_i32(entry.sample_offset);
        }
        write_leaf(w, FourCc::CTTS, &buf)
    }

    pub fn read(reader: &mut BoxReader<'_>) -> Result<Self> {
        let (version, _) = reader.read_full_header()?;
        let count = read_entry_count(reader, 8)?;
        let mut entries = Vec::with_capacity(count);
        for _ in 0..count {
            let sample_count = reader.read_u32()?;
            let sample_offset = if version == 0 {
                // Unsigned in version 0; clamp values that cannot be an i32.
                i32::try_from(reader.read_u32()?).unwrap_or(i32::MAX)
            } else {
                reader.read_i32()?
            };
            entries.push(CttsEntry {
                sample_count,
                sample_offset,
            });
        }
        Ok(Self { entries })
    }
}

// ---------------------------------------------------------------------------
// stss
// ---------------------------------------------------------------------------

/// Sync sample box: sorted 1-based indices of keyframes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Stss {
    pub sample_numbers: Vec<u32>,
}

impl Stss {
    pub fn write<W: Write + Seek + ?Sized>(&self, w: &mut W) -> Result<u64> {
        let mut buf = BytesMut::with_capacity(8 + self.sample_numbers.len() * 4);
        put_full_header(&mut buf, 0, 0);
        buf.put_u32(self.sample_numbers.len() as u32);
        for n in &self.sample_numbers {
            buf.put_u32(*n);
        }
        write_leaf(w, FourCc::STSS, &buf)
    }

    pub fn read(reader: &mut BoxReader<'_>) -> Result<Self> {
        reader.read_full_header()?;
        let count = read_entry_count(reader, 4)?;
        let mut sample_numbers = Vec::with_capacity(count);
        for _ in 0..count {
            sample_numbers.push(reader.read_u32()?);
        }
        Ok(Self { sample_numbers })
    }
}

// ---------------------------------------------------------------------------
// stsc
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StscEntry {
    /// 1-based index of the first chunk this run applies to.
    pub first_chunk: u32,
    pub samples_per_chunk: u32,
    pub sample_description_index: u32,
}

/// Sample-to-chunk box.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Stsc {
    pub entries: Vec<StscEntry>,
}

impl Stsc {
    /// Every chunk holds exactly one sample described by entry 1.
    pub fn one_sample_per_chunk() -> Self {
        Self {
            entries: vec![StscEntry {
                first_chunk: 1,
                samples_per_chunk: 1,
                sample_description_index: 1,
            }],
        }
    }

    pub fn write<W: Write + Seek + ?Sized>(&self, w: &mut W) -> Result<u64> {
        let mut buf = BytesMut::with_capacity(8 + self.entries.len() * 12);
        put_full_header(&mut buf, 0, 0);
        buf.put_u32(self.entries.len() as u32);
        for entry in &self.entries {
            buf.put_u32(entry.first_chunk);
            buf.put_u32(entry.samples_per_chunk);
            buf.put_u32(entry.sample_description_index);
        }
        write_leaf(w, FourCc::STSC, &buf)
    }

    pub fn read(reader: &mut BoxReader<'_>) -> Result<Self> {
        reader.read_full_header()?;
        let count = read_entry_count(reader, 12)?;
        let mut entries = Vec::with_capacity(count);
        for _ in 0..count {
            entries.push(StscEntry {
                first_chunk: reader.read_u32()?,
                samples_per_chunk: reader.read_u32()?,
                sample_description_index: reader.read_u32()?,
            });
        }
        Ok(Self { entries })
    }
}

// ---------------------------------------------------------------------------
// stsz
// ---------------------------------------------------------------------------

/// Sample size box.
///
/// A non-zero `sample_size` means every sample has that size and
/// `entry_sizes` is empty.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Stsz {
    pub sample_size: u32,
    pub sample_count: u32,
    pub entry_sizes: Vec<u32>,
}

impl Stsz {
    pub fn push(&mut self, size: u32) {
        self.entry_sizes.push(size);
        self.sample_count += 1;
    }

    /// Size of the sample at 0-based `index`.
    pub fn size_of(&self, index: usize) -> Option<u32> {
        if self.sample_size != 0 {
            (index < self.sample_count as usize).then_some(self.sample_size)
        } else {
            self.entry_sizes.get(index).copied()
        }
    }

    pub fn write<W: Write + Seek + ?Sized>(&self, w: &mut W) -> Result<u64> {
        let mut buf = BytesMut::with_capacity(12 + self.entry_sizes.len() * 4);
        put_full_header(&mut buf, 0, 0);
        buf.put_u32(self.sample_size);
        buf.put_u32(self.sample_count);
        if self.sample_size == 0 {
            for size in &self.entry_sizes {
                buf.put_u32(*size);
            }
        }
        write_leaf(w, FourCc::STSZ, &buf)
    }

    pub fn read(reader: &mut BoxReader<'_>) -> Result<Self> {
        reader.read_full_header()?;
        let sample_size = reader.read_u32()?;
        let sample_count;
        let mut entry_sizes = Vec::new();
        if sample_size == 0 {
            let count = read_entry_count(reader, 4)?;
            sample_count = count as u32;
            entry_sizes.reserve(count);
            for _ in 0..count {
                entry_sizes.push(reader.read_u32()?);
            }
        } else {
            sample_count = reader.read_u32()?;
        }
        Ok(Self {
            sample_size,
            sample_count,
            entry_sizes,
        })
    }
}

// ---------------------------------------------------------------------------
// stco / co64
// ---------------------------------------------------------------------------

/// Chunk offset box, written as `co64` when `is_64bit` is set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Stco {
    /// Absolute file offsets of each chunk.
    pub offsets: Vec<u64>,
    pub is_64bit: bool,
}

impl Stco {
    pub fn box_type(&self) -> FourCc {
        if self.is_64bit {
            FourCc::CO64
        } else {
            FourCc::STCO
        }
    }

    pub fn write<W: Write + Seek + ?Sized>(&self, w: &mut W) -> Result<u64> {
        let entry_size = if self.is_64bit { 8 } else { 4 };
        let mut buf = BytesMut::with_capacity(8 + self.offsets.len() * entry_size);
        put_full_header(&mut buf, 0, 0);
        buf.put_u32(self.offsets.len() as u32);
        for &offset in &self.offsets {
            if self.is_64bit {
                buf.put_u64(offset);
            } else {
                let offset = u32::try_from(offset).map_err(|_| {
                    Error::invalid_box(
                        FourCc::STCO,
                        format!("chunk offset {offset} needs co64"),
                    )
                })?;
                buf.put_u32(offset);
            }
        }
        write_leaf(w, self.box_type(), &buf)
    }

    pub fn read(reader: &mut BoxReader<'_>, is_64bit: bool) -> Result<Self> {
        reader.read_full_header()?;
        let count = read_entry_count(reader, if is_64bit { 8 } else { 4 })?;
        let mut offsets = Vec::with_capacity(count);
        for _ in 0..count {
            let offset = if is_64bit {
                reader.read_u64()?
            } else {
                reader.read_u32()? as u64
            };
            offsets.push(offset);
        }
        Ok(Self { offsets, is_64bit })
    }
}
