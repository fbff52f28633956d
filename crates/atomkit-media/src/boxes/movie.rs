//! Movie-level boxes: ftyp, moov, mvhd, trak, tkhd, mdia, mdhd, hdlr, minf.

use super::{
    put_full_header, put_matrix, read_entry_count, read_matrix, write_leaf, Stbl, IDENTITY_MATRIX,
    LANGUAGE_UND,
};
use crate::atom::{BoxReader, BoxWriter, FourCc};
use crate::{Error, Result};
use bytes::{BufMut, Bytes, BytesMut};
use std::io::{Seek, Write};

/// Pick the full box version able to hold `duration`.
fn version_for(duration: u64) -> u8 {
    if duration > u32::MAX as u64 {
        1
    } else {
        0
    }
}

fn skip_unknown(parent: FourCc, child: FourCc) {
    tracing::trace!(parent = %parent, box_type = %child, "Skipping unknown box");
}

// ---------------------------------------------------------------------------
// ftyp
// ---------------------------------------------------------------------------

/// File type box.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ftyp {
    pub major_brand: FourCc,
    pub minor_version: u32,
    pub compatible_brands: Vec<FourCc>,
}

impl Default for Ftyp {
    fn default() -> Self {
        Self {
            major_brand: FourCc(*b"isom"),
            minor_version: 0x200,
            compatible_brands: vec![
                FourCc(*b"isom"),
                FourCc(*b"iso2"),
                FourCc(*b"avc1"),
                FourCc(*b"mp41"),
            ],
        }
    }
}

impl Ftyp {
    pub fn write<W: Write + Seek + ?Sized>(&self, w: &mut W) -> Result<u64> {
        let mut buf = BytesMut::with_capacity(8 + self.compatible_brands.len() * 4);
        buf.put_slice(self.major_brand.as_bytes());
        buf.put_u32(self.minor_version);
        for brand in &self.compatible_brands {
            buf.put_slice(brand.as_bytes());
        }
        write_leaf(w, FourCc::FTYP, &buf)
    }

    pub fn read(reader: &mut BoxReader<'_>) -> Result<Self> {
        let major_brand = reader.read_fourcc()?;
        let minor_version = reader.read_u32()?;
        let mut compatible_brands = Vec::new();
        while reader.remaining() >= 4 {
            compatible_brands.push(reader.read_fourcc()?);
        }
        Ok(Self {
            major_brand,
            minor_version,
            compatible_brands,
        })
    }
}

// ---------------------------------------------------------------------------
// moov
// ---------------------------------------------------------------------------

/// Movie box: the complete metadata tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Moov {
    pub mvhd: Mvhd,
    pub traks: Vec<Trak>,
}

impl Moov {
    pub fn write<W: Write + Seek + ?Sized>(&self, w: &mut W) -> Result<u64> {
        let mut writer = BoxWriter::open(w, FourCc::MOOV)?;
        self.mvhd.write(&mut writer)?;
        for trak in &self.traks {
            trak.write(&mut writer)?;
        }
        writer.finish()
    }

    pub fn read(reader: &mut BoxReader<'_>) -> Result<Self> {
        let mut mvhd = None;
        let mut traks = Vec::new();

        reader.for_each_child(|header, child| {
            match header.box_type {
                FourCc::MVHD => mvhd = Some(Mvhd::read(child)?),
                FourCc::TRAK => traks.push(Trak::read(child)?),
                other => skip_unknown(FourCc::MOOV, other),
            }
            Ok(())
        })?;

        Ok(Self {
            mvhd: mvhd.ok_or(Error::MissingBox("mvhd"))?,
            traks,
        })
    }
}

// ---------------------------------------------------------------------------
// mvhd
// ---------------------------------------------------------------------------

/// Movie header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mvhd {
    /// Movie timescale (units per second).
    pub timescale: u32,
    /// Duration in movie timescale units.
    pub duration: u64,
    /// Preferred rate, 16.16 fixed point.
    pub rate: u32,
    /// Preferred volume, 8.8 fixed point.
    pub volume: u16,
    pub matrix: [i32; 9],
    pub next_track_id: u32,
}

impl Mvhd {
    pub fn new(timescale: u32, duration: u64, next_track_id: u32) -> Self {
        Self {
            timescale,
            duration,
            rate: 0x0001_0000,
            volume: 0x0100,
            matrix: IDENTITY_MATRIX,
            next_track_id,
        }
    }

    pub fn write<W: Write + Seek + ?Sized>(&self, w: &mut W) -> Result<u64> {
        let version = version_for(self.duration);
        let mut buf = BytesMut::with_capacity(112);
        put_full_header(&mut buf, version, 0);
        if version == 1 {
            buf.put_u64(0); // creation time
            buf.put_u64(0); // modification time
            buf.put_u32(self.timescale);
            buf.put_u64(self.duration);
        } else {
            buf.put_u32(0);
            buf.put_u32(0);
            buf.put_u32(self.timescale);
            buf.put_u32(self.duration as u32);
        }
        buf.put_u32(self.rate);
        buf.put_u16(self.volume);
        buf.put_slice(&[0u8; 10]); // reserved
        put_matrix(&mut buf, &self.matrix);
        buf.put_slice(&[0u8; 24]); // pre_defined
        buf.put_u32(self.next_track_id);
        write_leaf(w, FourCc::MVHD, &buf)
    }

    pub fn read(reader: &mut BoxReader<'_>) -> Result<Self> {
        let (version, _) = reader.read_full_header()?;
        let (timescale, duration) = if version == 1 {
            reader.skip(16)?;
            (reader.read_u32()?, reader.read_u64()?)
        } else {
            reader.skip(8)?;
            (reader.read_u32()?, reader.read_u32()? as u64)
        };
        let rate = reader.read_u32()?;
        let volume = reader.read_u16()?;
        reader.skip(10)?;
        let matrix = read_matrix(reader)?;
        reader.skip(24)?;
        let next_track_id = reader.read_u32()?;

        Ok(Self {
            timescale,
            duration,
            rate,
            volume,
            matrix,
            next_track_id,
        })
    }
}

// ---------------------------------------------------------------------------
// trak
// ---------------------------------------------------------------------------

/// Track box.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Trak {
    pub tkhd: Tkhd,
    pub mdia: Mdia,
}

impl Trak {
    pub fn write<W: Write + Seek + ?Sized>(&self, w: &mut W) -> Result<u64> {
        let mut writer = BoxWriter::open(w, FourCc::TRAK)?;
        self.tkhd.write(&mut writer)?;
        self.mdia.write(&mut writer)?;
        writer.finish()
    }

    pub fn read(reader: &mut BoxReader<'_>) -> Result<Self> {
        let mut tkhd = None;
        let mut mdia = None;

        reader.for_each_child(|header, child| {
            match header.box_type {
                FourCc::TKHD => tkhd = Some(Tkhd::read(child)?),
                FourCc::MDIA => mdia = Some(Mdia::read(child)?),
                other => skip_unknown(FourCc::TRAK, other),
            }
            Ok(())
        })?;

        Ok(Self {
            tkhd: tkhd.ok_or(Error::MissingBox("tkhd"))?,
            mdia: mdia.ok_or(Error::MissingBox("mdia"))?,
        })
    }
}

// ---------------------------------------------------------------------------
// tkhd
// ---------------------------------------------------------------------------

/// Track header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tkhd {
    /// Track enabled (0x1) | in movie (0x2) | in preview (0x4).
    pub flags: u32,
    pub track_id: u32,
    /// Duration in movie timescale units.
    pub duration: u64,
    pub layer: i16,
    pub alternate_group: i16,
    /// 8.8 fixed point; 0x0100 for audio, 0 otherwise.
    pub volume: u16,
    pub matrix: [i32; 9],
    /// Presentation width in pixels.
    pub width: u32,
    /// Presentation height in pixels.
    pub height: u32,
}

impl Tkhd {
    pub const FLAGS_ENABLED_IN_MOVIE: u32 = 0x0003;

    pub fn write<W: Write + Seek + ?Sized>(&self, w: &mut W) -> Result<u64> {
        let version = version_for(self.duration);
        let mut buf = BytesMut::with_capacity(96);
        put_full_header(&mut buf, version, self.flags);
        if version == 1 {
            buf.put_u64(0);
            buf.put_u64(0);
            buf.put_u32(self.track_id);
            buf.put_u32(0);
            buf.put_u64(self.duration);
        } else {
            buf.put_u32(0);
            buf.put_u32(0);
            buf.put_u32(self.track_id);
            buf.put_u32(0);
            buf.put_u32(self.duration as u32);
        }
        buf.put_u64(0); // reserved
        buf.put_i16(self.layer);
        buf.put_i16(self.alternate_group);
        buf.put_u16(self.volume);
        buf.put_u16(0);
        put_matrix(&mut buf, &self.matrix);
        buf.put_u32((self.width & 0xFFFF) << 16);
        buf.put_u32((self.height & 0xFFFF) << 16);
        write_leaf(w, FourCc::TKHD, &buf)
    }

    pub fn read(reader: &mut BoxReader<'_>) -> Result<Self> {
        let (version, flags) = reader.read_full_header()?;
        let (track_id, duration) = if version == 1 {
            reader.skip(16)?;
            let track_id = reader.read_u32()?;
            reader.skip(4)?;
            (track_id, reader.read_u64()?)
        } else {
            reader.skip(8)?;
            let track_id = reader.read_u32()?;
            reader.skip(4)?;
            (track_id, reader.read_u32()? as u64)
        };
        reader.skip(8)?;
        let layer = reader.read_i16()?;
        let alternate_group = reader.read_i16()?;
        let volume = reader.read_u16()?;
        reader.skip(2)?;
        let matrix = read_matrix(reader)?;
        let width = reader.read_u32()? >> 16;
        let height = reader.read_u32()? >> 16;

        Ok(Self {
            flags,
            track_id,
            duration,
            layer,
            alternate_group,
            volume,
            matrix,
            width,
            height,
        })
    }
}

// ---------------------------------------------------------------------------
// mdia
// ---------------------------------------------------------------------------

/// Media box.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mdia {
    pub mdhd: Mdhd,
    pub hdlr: Hdlr,
    pub minf: Minf,
}

impl Mdia {
    pub fn write<W: Write + Seek + ?Sized>(&self, w: &mut W) -> Result<u64> {
        let mut writer = BoxWriter::open(w, FourCc::MDIA)?;
        self.mdhd.write(&mut writer)?;
        self.hdlr.write(&mut writer)?;
        self.minf.write(&mut writer)?;
        writer.finish()
    }

    pub fn read(reader: &mut BoxReader<'_>) -> Result<Self> {
        let mut mdhd = None;
        let mut hdlr = None;
        let mut minf = None;

        reader.for_each_child(|header, child| {
            match header.box_type {
                FourCc::MDHD => mdhd = Some(Mdhd::read(child)?),
                FourCc::HDLR => hdlr = Some(Hdlr::read(child)?),
                FourCc::MINF => minf = Some(Minf::read(child)?),
                other => skip_unknown(FourCc::MDIA, other),
            }
            Ok(())
        })?;

        Ok(Self {
            mdhd: mdhd.ok_or(Error::MissingBox("mdhd"))?,
            hdlr: hdlr.ok_or(Error::MissingBox("hdlr"))?,
            minf: minf.ok_or(Error::MissingBox("minf"))?,
        })
    }
}

/// Media header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mdhd {
    /// Media timescale (ticks per second).
    pub timescale: u32,
    /// Duration in media timescale ticks.
    pub duration: u64,
    pub language: u16,
}

impl Mdhd {
    pub fn new(timescale: u32, duration: u64) -> Self {
        Self {
            timescale,
            duration,
            language: LANGUAGE_UND,
        }
    }

    pub fn write<W: Write + Seek + ?Sized>(&self, w: &mut W) -> Result<u64> {
        let version = version_for(self.duration);
        let mut buf = BytesMut::with_capacity(36);
        put_full_header(&mut buf, version, 0);
        if version == 1 {
            buf.put_u64(0);
            buf.put_u64(0);
            buf.put_u32(self.timescale);
            buf.put_u64(self.duration);
        } else {
            buf.put_u32(0);
            buf.put_u32(0);
            buf.put_u32(self.timescale);
            buf.put_u32(self.duration as u32);
        }
        buf.put_u16(self.language);
        buf.put_u16(0); // pre_defined
        write_leaf(w, FourCc::MDHD, &buf)
    }

    pub fn read(reader: &mut BoxReader<'_>) -> Result<Self> {
        let (version, _) = reader.read_full_header()?;
        let (timescale, duration) = if version == 1 {
            reader.skip(16)?;
            (reader.read_u32()?, reader.read_u64()?)
        } else {
            reader.skip(8)?;
            (reader.read_u32()?, reader.read_u32()? as u64)
        };
        if timescale == 0 {
            return Err(Error::invalid_box(FourCc::MDHD, "timescale is zero"));
        }
        let language = reader.read_u16()?;

        Ok(Self {
            timescale,
            duration,
            language,
        })
    }
}

/// Handler reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hdlr {
    /// `vide`, `soun`, ...
    pub handler_type: FourCc,
    pub name: String,
}

impl Hdlr {
    pub fn write<W: Write + Seek + ?Sized>(&self, w: &mut W) -> Result<u64> {
        let mut buf = BytesMut::with_capacity(25 + self.name.len());
        put_full_header(&mut buf, 0, 0);
        buf.put_u32(0); // pre_defined
        buf.put_slice(self.handler_type.as_bytes());
        buf.put_slice(&[0u8; 12]); // reserved
        buf.put_slice(self.name.as_bytes());
        buf.put_u8(0);
        write_leaf(w, FourCc::HDLR, &buf)
    }

    pub fn read(reader: &mut BoxReader<'_>) -> Result<Self> {
        reader.read_full_header()?;
        reader.skip(4)?;
        let handler_type = reader.read_fourcc()?;
        reader.skip(12)?;
        let raw = reader.read_to_end()?;
        let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
        let name = String::from_utf8_lossy(&raw[..end]).into_owned();

        Ok(Self { handler_type, name })
    }
}

// ---------------------------------------------------------------------------
// minf
// ---------------------------------------------------------------------------

/// Media information box.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Minf {
    pub media_header: Option<MediaHeader>,
    pub dinf: Dinf,
    pub stbl: Stbl,
}

impl Minf {
    pub fn write<W: Write + Seek + ?Sized>(&self, w: &mut W) -> Result<u64> {
        let mut writer = BoxWriter::open(w, FourCc::MINF)?;
        match &self.media_header {
            Some(MediaHeader::Video(vmhd)) => {
                vmhd.write(&mut writer)?;
            }
            Some(MediaHeader::Sound(smhd)) => {
                smhd.write(&mut writer)?;
            }
            None => {}
        }
        self.dinf.write(&mut writer)?;
        self.stbl.write(&mut writer)?;
        writer.finish()
    }

    pub fn read(reader: &mut BoxReader<'_>) -> Result<Self> {
        let mut media_header = None;
        let mut dinf = None;
        let mut stbl = None;

        reader.for_each_child(|header, child| {
            match header.box_type {
                FourCc::VMHD => media_header = Some(MediaHeader::Video(Vmhd::read(child)?)),
                FourCc::SMHD => media_header = Some(MediaHeader::Sound(Smhd::read(child)?)),
                FourCc::DINF => dinf = Some(Dinf::read(child)?),
                FourCc::STBL => stbl = Some(Stbl::read(child)?),
                other => skip_unknown(FourCc::MINF, other),
            }
            Ok(())
        })?;

        Ok(Self {
            media_header,
            dinf: dinf.unwrap_or_default(),
            stbl: stbl.ok_or(Error::MissingBox("stbl"))?,
        })
    }
}

/// Media-type specific header inside `minf`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaHeader {
    Video(Vmhd),
    Sound(Smhd),
}

/// Video media header.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Vmhd {
    pub graphics_mode: u16,
    pub opcolor: [u16; 3],
}

impl Vmhd {
    pub fn write<W: Write + Seek + ?Sized>(&self, w: &mut W) -> Result<u64> {
        let mut buf = BytesMut::with_capacity(12);
        put_full_header(&mut buf, 0, 1);
        buf.put_u16(self.graphics_mode);
        for c in self.opcolor {
            buf.put_u16(c);
        }
        write_leaf(w, FourCc::VMHD, &buf)
    }

    pub fn read(reader: &mut BoxReader<'_>) -> Result<Self> {
        reader.read_full_header()?;
        let graphics_mode = reader.read_u16()?;
        let opcolor = [reader.read_u16()?, reader.read_u16()?, reader.read_u16()?];
        Ok(Self {
            graphics_mode,
            opcolor,
        })
    }
}

/// Sound media header.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Smhd {
    /// 8.8 fixed point stereo balance.
    pub balance: i16,
}

impl Smhd {
    pub fn write<W: Write + Seek + ?Sized>(&self, w: &mut W) -> Result<u64> {
        let mut buf = BytesMut::with_capacity(8);
        put_full_header(&mut buf, 0, 0);
        buf.put_i16(self.balance);
        buf.put_u16(0);
        write_leaf(w, FourCc::SMHD, &buf)
    }

    pub fn read(reader: &mut BoxReader<'_>) -> Result<Self> {
        reader.read_full_header()?;
        Ok(Self {
            balance: reader.read_i16()?,
        })
    }
}

// ---------------------------------------------------------------------------
// dinf / dref
// ---------------------------------------------------------------------------

/// Data information box with its single `dref` table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dinf {
    pub entries: Vec<DataEntry>,
}

/// One `dref` entry. Flag 0x1 means the media data lives in this file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataEntry {
    pub entry_type: FourCc,
    pub flags: u32,
    pub location: Bytes,
}

impl DataEntry {
    pub fn self_contained() -> Self {
        Self {
            entry_type: FourCc::URL,
            flags: 0x000001,
            location: Bytes::new(),
        }
    }
}

impl Default for Dinf {
    fn default() -> Self {
        Self {
            entries: vec![DataEntry::self_contained()],
        }
    }
}

impl Dinf {
    pub fn write<W: Write + Seek + ?Sized>(&self, w: &mut W) -> Result<u64> {
        let mut dinf = BoxWriter::open(w, FourCc::DINF)?;
        let mut dref = BoxWriter::open_full(&mut dinf, FourCc::DREF, 0, 0)?;
        dref.write_all(&(self.entries.len() as u32).to_be_bytes())?;
        for entry in &self.entries {
            let mut writer = BoxWriter::open_full(&mut dref, entry.entry_type, 0, entry.flags)?;
            writer.write_all(&entry.location)?;
            writer.finish()?;
        }
        dref.finish()?;
        dinf.finish()
    }

    pub fn read(reader: &mut BoxReader<'_>) -> Result<Self> {
        let mut entries = Vec::new();

        reader.for_each_child(|header, dref| {
            if header.box_type != FourCc::DREF {
                skip_unknown(FourCc::DINF, header.box_type);
                return Ok(());
            }
            dref.read_full_header()?;
            read_entry_count(dref, 8)?;
            dref.for_each_child(|header, child| {
                let (_, flags) = child.read_full_header()?;
                entries.push(DataEntry {
                    entry_type: header.box_type,
                    flags,
                    location: child.read_to_end()?,
                });
                Ok(())
            })
        })?;

        Ok(Self { entries })
    }
}
