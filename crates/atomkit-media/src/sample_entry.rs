//! Sample descriptions (`stsd`).
//!
//! Visual entries (`avc1`, `avc3`, `hvc1`, `hev1`) carry geometry and an
//! opaque decoder configuration box. `mp4a` carries channel layout and the
//! AudioSpecificConfig wrapped in an MPEG-4 `esds` descriptor chain. Other
//! entry types are kept as raw boxes so files round-trip unchanged.

use crate::atom::{Atom, AtomBody, BoxReader, BoxWriter, FourCc};
use crate::boxes::{put_full_header, read_entry_count, write_leaf};
use crate::{Error, Result};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::io::{Seek, Write};

/// 72 dpi in 16.16 fixed point.
const RESOLUTION_72_DPI: u32 = 0x0048_0000;

/// Sample description box.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Stsd {
    pub entries: Vec<SampleEntry>,
}

impl Stsd {
    pub fn new(entry: SampleEntry) -> Self {
        Self {
            entries: vec![entry],
        }
    }

    pub fn write<W: Write + Seek + ?Sized>(&self, w: &mut W) -> Result<u64> {
        let mut writer = BoxWriter::open_full(w, FourCc::STSD, 0, 0)?;
        writer.write_all(&(self.entries.len() as u32).to_be_bytes())?;
        for entry in &self.entries {
            entry.write(&mut writer)?;
        }
        writer.finish()
    }

    pub fn read(reader: &mut BoxReader<'_>) -> Result<Self> {
        reader.read_full_header()?;
        let count = read_entry_count(reader, 8)?;
        let mut entries = Vec::with_capacity(count);

        reader.for_each_child(|header, child| {
            let entry = match header.box_type {
                FourCc::AVC1 | FourCc::AVC3 | FourCc::HVC1 | FourCc::HEV1 => {
                    SampleEntry::Visual(VisualSampleEntry::read(header.box_type, child)?)
                }
                FourCc::MP4A => SampleEntry::Audio(AudioSampleEntry::read(header.box_type, child)?),
                _ => SampleEntry::Unknown(Atom::read(header, child)?),
            };
            entries.push(entry);
            Ok(())
        })?;

        if entries.len() != count {
            tracing::debug!(declared = count, found = entries.len(), "stsd entry count mismatch");
        }

        Ok(Self { entries })
    }
}

/// One sample description.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SampleEntry {
    Visual(VisualSampleEntry),
    Audio(AudioSampleEntry),
    /// Entry type without a typed model, kept verbatim.
    Unknown(Atom),
}

impl SampleEntry {
    pub fn format(&self) -> FourCc {
        match self {
            Self::Visual(v) => v.format,
            Self::Audio(a) => a.format,
            Self::Unknown(atom) => atom.box_type,
        }
    }

    pub fn write<W: Write + Seek + ?Sized>(&self, w: &mut W) -> Result<u64> {
        match self {
            Self::Visual(v) => v.write(w),
            Self::Audio(a) => a.write(w),
            Self::Unknown(atom) => {
                let mut writer = BoxWriter::open(w, atom.box_type)?;
                match &atom.body {
                    AtomBody::Leaf(data) => writer.write_all(data)?,
                    AtomBody::Container(children) => {
                        for child in children {
                            child.write_to(&mut writer)?;
                        }
                    }
                }
                writer.finish()
            }
        }
    }
}

/// Configuration box type paired with a visual entry format.
fn config_box_for(format: FourCc) -> FourCc {
    match format {
        FourCc::HVC1 | FourCc::HEV1 => FourCc::HVCC,
        _ => FourCc::AVCC,
    }
}

/// Visual sample entry with its decoder configuration record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VisualSampleEntry {
    /// `avc1`, `avc3`, `hvc1` or `hev1`.
    pub format: FourCc,
    pub data_reference_index: u16,
    pub width: u16,
    pub height: u16,
    pub horiz_resolution: u32,
    pub vert_resolution: u32,
    pub frame_count: u16,
    pub compressor_name: String,
    pub depth: u16,
    /// Payload of the `avcC`/`hvcC` box.
    pub config: Option<Bytes>,
    /// Other child boxes (`pasp`, `btrt`, `colr`, ...).
    pub extensions: Vec<Atom>,
}

impl VisualSampleEntry {
    /// H.264 entry with default resolution, depth and no compressor name.
    pub fn avc1(width: u16, height: u16, avc_config: Bytes) -> Self {
        Self {
            format: FourCc::AVC1,
            data_reference_index: 1,
            width,
            height,
            horiz_resolution: RESOLUTION_72_DPI,
            vert_resolution: RESOLUTION_72_DPI,
            frame_count: 1,
            compressor_name: String::new(),
            depth: 0x0018,
            config: Some(avc_config),
            extensions: Vec::new(),
        }
    }

    pub fn write<W: Write + Seek + ?Sized>(&self, w: &mut W) -> Result<u64> {
        let mut writer = BoxWriter::open(w, self.format)?;

        let mut buf = BytesMut::with_capacity(78);
        buf.put_slice(&[0; 6]); // reserved
        buf.put_u16(self.data_reference_index);
        buf.put_u16(0); // pre_defined
        buf.put_u16(0); // reserved
        buf.put_slice(&[0; 12]); // pre_defined
        buf.put_u16(self.width);
        buf.put_u16(self.height);
        buf.put_u32(self.horiz_resolution);
        buf.put_u32(self.vert_resolution);
        buf.put_u32(0); // reserved
        buf.put_u16(self.frame_count);
        put_compressor_name(&mut buf, &self.compressor_name);
        buf.put_u16(self.depth);
        buf.put_i16(-1); // pre_defined
        writer.write_all(&buf)?;

        if let Some(config) = &self.config {
            write_leaf(&mut writer, config_box_for(self.format), config)?;
        }
        for ext in &self.extensions {
            ext.write_to(&mut writer)?;
        }
        writer.finish()
    }

    pub fn read(format: FourCc, reader: &mut BoxReader<'_>) -> Result<Self> {
        reader.skip(6)?;
        let data_reference_index = reader.read_u16()?;
        reader.skip(16)?;
        let width = reader.read_u16()?;
        let height = reader.read_u16()?;
        let horiz_resolution = reader.read_u32()?;
        let vert_resolution = reader.read_u32()?;
        reader.skip(4)?;
        let frame_count = reader.read_u16()?;
        let name: [u8; 32] = reader.read_array()?;
        let depth = reader.read_u16()?;
        reader.skip(2)?;

        let config_type = config_box_for(format);
        let mut config = None;
        let mut extensions = Vec::new();
        reader.for_each_child(|header, child| {
            if header.box_type == config_type {
                config = Some(child.read_to_end()?);
            } else {
                extensions.push(Atom::read(header, child)?);
            }
            Ok(())
        })?;

        Ok(Self {
            format,
            data_reference_index,
            width,
            height,
            horiz_resolution,
            vert_resolution,
            frame_count,
            compressor_name: parse_compressor_name(&name),
            depth,
            config,
            extensions,
        })
    }
}

/// Pascal-style 32-byte compressor name.
fn put_compressor_name(buf: &mut BytesMut, name: &str) {
    let bytes = name.as_bytes();
    let len = bytes.len().min(31);
    buf.put_u8(len as u8);
    buf.put_slice(&bytes[..len]);
    buf.put_bytes(0, 31 - len);
}

fn parse_compressor_name(raw: &[u8; 32]) -> String {
    let len = (raw[0] as usize).min(31);
    String::from_utf8_lossy(&raw[1..1 + len]).into_owned()
}

/// Audio sample entry (`mp4a`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioSampleEntry {
    pub format: FourCc,
    pub data_reference_index: u16,
    pub channel_count: u16,
    /// Bits per sample.
    pub sample_size: u16,
    /// Sample rate in Hz. Values above 65535 are clamped in the 16.16 field.
    pub sample_rate: u32,
    /// DecoderSpecificInfo bytes (the AudioSpecificConfig for AAC).
    pub decoder_config: Option<Bytes>,
    pub extensions: Vec<Atom>,
}

impl AudioSampleEntry {
    pub fn mp4a(channel_count: u16, sample_size: u16, sample_rate: u32, config: Bytes) -> Self {
        Self {
            format: FourCc::MP4A,
            data_reference_index: 1,
            channel_count,
            sample_size,
            sample_rate,
            decoder_config: Some(config),
            extensions: Vec::new(),
        }
    }

    pub fn write<W: Write + Seek + ?Sized>(&self, w: &mut W) -> Result<u64> {
        let mut writer = BoxWriter::open(w, self.format)?;

        let mut buf = BytesMut::with_capacity(28);
        buf.put_slice(&[0; 6]); // reserved
        buf.put_u16(self.data_reference_index);
        buf.put_u32(0); // reserved
        buf.put_u32(0); // reserved
        buf.put_u16(self.channel_count);
        buf.put_u16(self.sample_size);
        buf.put_u16(0); // pre_defined
        buf.put_u16(0); // reserved
        buf.put_u32(self.sample_rate.min(0xFFFF) << 16);
        writer.write_all(&buf)?;

        if let Some(config) = &self.decoder_config {
            write_leaf(&mut writer, FourCc::ESDS, &encode_esds(config)?)?;
        }
        for ext in &self.extensions {
            ext.write_to(&mut writer)?;
        }
        writer.finish()
    }

    pub fn read(format: FourCc, reader: &mut BoxReader<'_>) -> Result<Self> {
        reader.skip(6)?;
        let data_reference_index = reader.read_u16()?;
        let version = reader.read_u16()?;
        reader.skip(6)?; // revision, vendor
        let channel_count = reader.read_u16()?;
        let sample_size = reader.read_u16()?;
        reader.skip(4)?;
        let sample_rate = reader.read_u32()? >> 16;
        // QuickTime sound description extensions.
        match version {
            1 => reader.skip(16)?,
            2 => reader.skip(36)?,
            _ => {}
        }

        let mut decoder_config = None;
        let mut extensions = Vec::new();
        reader.for_each_child(|header, child| {
            if header.box_type == FourCc::ESDS {
                child.read_full_header()?;
                let data = child.read_to_end()?;
                decoder_config = parse_esds(&data)?;
            } else {
                extensions.push(Atom::read(header, child)?);
            }
            Ok(())
        })?;

        Ok(Self {
            format,
            data_reference_index,
            channel_count,
            sample_size,
            sample_rate,
            decoder_config,
            extensions,
        })
    }
}

// ---------------------------------------------------------------------------
// esds
// ---------------------------------------------------------------------------

const ES_DESCRIPTOR_TAG: u8 = 0x03;
const DECODER_CONFIG_TAG: u8 = 0x04;
const DECODER_SPECIFIC_INFO_TAG: u8 = 0x05;
const SL_CONFIG_TAG: u8 = 0x06;

/// MPEG-4 Audio object type indication.
const OBJECT_TYPE_MPEG4_AUDIO: u8 = 0x40;
/// Audio stream type (0x05) shifted, with the reserved bit set.
const STREAM_TYPE_AUDIO: u8 = (0x05 << 2) | 0x01;

/// Largest length expressible in four 7-bit groups.
const MAX_DESCRIPTOR_LEN: usize = (1 << 28) - 1;

fn put_descriptor(buf: &mut BytesMut, tag: u8, len: usize) -> Result<()> {
    if len > MAX_DESCRIPTOR_LEN {
        return Err(Error::invalid_box(
            FourCc::ESDS,
            format!("descriptor length {len} too large"),
        ));
    }
    buf.put_u8(tag);
    let mut shift = 21;
    while shift > 0 && len >> shift == 0 {
        shift -= 7;
    }
    while shift > 0 {
        buf.put_u8(0x80 | ((len >> shift) & 0x7F) as u8);
        shift -= 7;
    }
    buf.put_u8((len & 0x7F) as u8);
    Ok(())
}

fn descriptor_len_size(len: usize) -> usize {
    match len {
        0..=0x7F => 1,
        0x80..=0x3FFF => 2,
        0x4000..=0x1F_FFFF => 3,
        _ => 4,
    }
}

/// Encode the full box payload of an `esds` box for an audio config.
fn encode_esds(config: &[u8]) -> Result<BytesMut> {
    let dsi_len = config.len();
    let dcd_len = 13 + 1 + descriptor_len_size(dsi_len) + dsi_len;
    let sl_len = 1;
    let es_len = 3 + 1 + descriptor_len_size(dcd_len) + dcd_len + 1 + descriptor_len_size(sl_len) + sl_len;

    let mut buf = BytesMut::with_capacity(4 + 1 + 4 + es_len);
    put_full_header(&mut buf, 0, 0);

    put_descriptor(&mut buf, ES_DESCRIPTOR_TAG, es_len)?;
    buf.put_u16(0); // ES_ID
    buf.put_u8(0); // no dependency, URL or OCR stream

    put_descriptor(&mut buf, DECODER_CONFIG_TAG, dcd_len)?;
    buf.put_u8(OBJECT_TYPE_MPEG4_AUDIO);
    buf.put_u8(STREAM_TYPE_AUDIO);
    buf.put_uint(0, 3); // buffer size
    buf.put_u32(0); // max bitrate
    buf.put_u32(0); // avg bitrate

    put_descriptor(&mut buf, DECODER_SPECIFIC_INFO_TAG, dsi_len)?;
    buf.put_slice(config);

    put_descriptor(&mut buf, SL_CONFIG_TAG, sl_len)?;
    buf.put_u8(0x02); // predefined: MP4 file

    Ok(buf)
}

fn esds_error(reason: &str) -> Error {
    Error::invalid_box(FourCc::ESDS, reason)
}

fn skip_es_field(body: &mut Bytes, n: usize) -> Result<()> {
    if body.remaining() < n {
        return Err(esds_error("short ES_Descriptor"));
    }
    body.advance(n);
    Ok(())
}

/// Read a descriptor tag and its variable-length size.
fn read_descriptor(data: &mut Bytes) -> Result<(u8, usize)> {
    if !data.has_remaining() {
        return Err(esds_error("truncated descriptor tag"));
    }
    let tag = data.get_u8();
    let mut len = 0usize;
    for _ in 0..4 {
        if !data.has_remaining() {
            return Err(esds_error("truncated descriptor length"));
        }
        let b = data.get_u8();
        len = (len << 7) | (b & 0x7F) as usize;
        if b & 0x80 == 0 {
            if len > data.remaining() {
                return Err(esds_error("descriptor overruns esds"));
            }
            return Ok((tag, len));
        }
    }
    Err(esds_error("descriptor length longer than four bytes"))
}

/// Extract the DecoderSpecificInfo bytes from an `esds` payload
/// (after the full box header).
fn parse_esds(data: &[u8]) -> Result<Option<Bytes>> {
    let mut data = Bytes::copy_from_slice(data);
    find_decoder_specific_info(&mut data)
}

fn find_decoder_specific_info(data: &mut Bytes) -> Result<Option<Bytes>> {
    while data.has_remaining() {
        let (tag, len) = read_descriptor(data)?;
        let mut body = data.split_to(len);
        match tag {
            ES_DESCRIPTOR_TAG => {
                if body.remaining() < 3 {
                    return Err(esds_error("short ES_Descriptor"));
                }
                body.advance(2);
                let flags = body.get_u8();
                // dependsOn_ES_ID precedes the URL, which precedes OCR_ES_ID.
                if flags & 0x80 != 0 {
                    skip_es_field(&mut body, 2)?;
                }
                if flags & 0x40 != 0 {
                    if !body.has_remaining() {
                        return Err(esds_error("short ES_Descriptor"));
                    }
                    let url_len = body.get_u8() as usize;
                    skip_es_field(&mut body, url_len)?;
                }
                if flags & 0x20 != 0 {
                    skip_es_field(&mut body, 2)?;
                }
                if let Some(info) = find_decoder_specific_info(&mut body)? {
                    return Ok(Some(info));
                }
            }
            DECODER_CONFIG_TAG => {
                if body.remaining() < 13 {
                    return Err(esds_error("short DecoderConfigDescriptor"));
                }
                body.advance(13);
                if let Some(info) = find_decoder_specific_info(&mut body)? {
                    return Ok(Some(info));
                }
            }
            DECODER_SPECIFIC_INFO_TAG => return Ok(Some(body)),
            _ => {}
        }
    }
    Ok(None)
}
