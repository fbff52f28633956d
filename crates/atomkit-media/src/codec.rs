//! The [`CodecDescriptor`] trait describing a track to the muxer.
//!
//! The muxer never inspects bitstreams. Everything it needs to build a track
//! (media kind, sample description, handler and header fields) comes through
//! this trait.

use crate::atom::FourCc;
use crate::boxes::{MediaHeader, Smhd, Vmhd};
use crate::sample_entry::{AudioSampleEntry, SampleEntry, VisualSampleEntry};
use bytes::Bytes;

/// Capabilities of one elementary stream.
pub trait CodecDescriptor {
    /// Short codec name used in logs and errors (e.g. `"avc1"`).
    fn codec_name(&self) -> &str;

    fn is_video(&self) -> bool;

    fn is_audio(&self) -> bool;

    /// Sample description written into the track's `stsd`.
    fn sample_entry(&self) -> SampleEntry;

    /// Track-level metadata for `tkhd`, `hdlr` and `minf`.
    fn track_fields(&self) -> TrackFields;
}

/// Metadata a track box needs beyond its sample table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackFields {
    pub handler_type: FourCc,
    pub handler_name: String,
    /// Presentation width in pixels; 0 for audio.
    pub width: u32,
    /// Presentation height in pixels; 0 for audio.
    pub height: u32,
    /// 8.8 fixed point.
    pub volume: u16,
    pub alternate_group: i16,
    pub media_header: MediaHeader,
}

impl TrackFields {
    pub fn video(width: u32, height: u32) -> Self {
        Self {
            handler_type: FourCc::VIDE,
            handler_name: "Video Media Handler".to_string(),
            width,
            height,
            volume: 0,
            alternate_group: 0,
            media_header: MediaHeader::Video(Vmhd::default()),
        }
    }

    pub fn audio() -> Self {
        Self {
            handler_type: FourCc::SOUN,
            handler_name: "Sound Handler".to_string(),
            width: 0,
            height: 0,
            volume: 0x0100,
            alternate_group: 1,
            media_header: MediaHeader::Sound(Smhd::default()),
        }
    }
}

/// H.264 stream description.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AvcDescriptor {
    pub width: u16,
    pub height: u16,
    /// AVCDecoderConfigurationRecord bytes (the `avcC` payload).
    pub decoder_config: Bytes,
}

impl AvcDescriptor {
    pub fn new(width: u16, height: u16, decoder_config: impl Into<Bytes>) -> Self {
        Self {
            width,
            height,
            decoder_config: decoder_config.into(),
        }
    }
}

impl CodecDescriptor for AvcDescriptor {
    fn codec_name(&self) -> &str {
        "avc1"
    }

    fn is_video(&self) -> bool {
        true
    }

    fn is_audio(&self) -> bool {
        false
    }

    fn sample_entry(&self) -> SampleEntry {
        SampleEntry::Visual(VisualSampleEntry::avc1(
            self.width,
            self.height,
            self.decoder_config.clone(),
        ))
    }

    fn track_fields(&self) -> TrackFields {
        TrackFields::video(self.width as u32, self.height as u32)
    }
}

/// AAC stream description.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AacDescriptor {
    pub channel_count: u16,
    pub sample_rate: u32,
    /// Bytes per PCM sample of the decoded signal.
    pub bytes_per_sample: u16,
    /// AudioSpecificConfig bytes.
    pub decoder_config: Bytes,
}

impl AacDescriptor {
    pub fn new(channel_count: u16, sample_rate: u32, decoder_config: impl Into<Bytes>) -> Self {
        Self {
            channel_count,
            sample_rate,
            bytes_per_sample: 2,
            decoder_config: decoder_config.into(),
        }
    }
}

impl CodecDescriptor for AacDescriptor {
    fn codec_name(&self) -> &str {
        "mp4a"
    }

    fn is_video(&self) -> bool {
        false
    }

    fn is_audio(&self) -> bool {
        true
    }

    fn sample_entry(&self) -> SampleEntry {
        SampleEntry::Audio(AudioSampleEntry::mp4a(
            self.channel_count,
            self.bytes_per_sample * 8,
            self.sample_rate,
            self.decoder_config.clone(),
        ))
    }

    fn track_fields(&self) -> TrackFields {
        TrackFields::audio()
    }
}

/// A parsed sample entry describes its own track, which lets a demuxed
/// file be fed straight back into the muxer.
impl CodecDescriptor for SampleEntry {
    fn codec_name(&self) -> &str {
        match self {
            Self::Visual(v) => v.format.as_str(),
            Self::Audio(a) => a.format.as_str(),
            Self::Unknown(atom) => atom.box_type.as_str(),
        }
    }

    fn is_video(&self) -> bool {
        matches!(self, Self::Visual(_))
    }

    fn is_audio(&self) -> bool {
        matches!(self, Self::Audio(_))
    }

    fn sample_entry(&self) -> SampleEntry {
        self.clone()
    }

    fn track_fields(&self) -> TrackFields {
        match self {
            Self::Visual(v) => TrackFields::video(v.width as u32, v.height as u32),
            _ => TrackFields::audio(),
        }
    }
}
