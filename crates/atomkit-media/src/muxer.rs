//! MP4 multiplexer.
//!
//! Produces `[ftyp] mdat moov` on a seekable sink:
//!
//! 1. [`Muxer::write_header`] creates one track per descriptor and reserves a
//!    16-byte `mdat` header with a 64-bit length.
//! 2. [`Muxer::write_packet`] streams sample payloads into `mdat`, one sample
//!    behind per track.
//! 3. [`Muxer::write_trailer`] flushes pending samples, patches the `mdat`
//!    length and appends `moov`.

use crate::atom::{patch_wide_size, write_wide_placeholder, FourCc, WIDE_HEADER_SIZE};
use crate::boxes::{Ftyp, Moov, Mvhd};
use crate::codec::CodecDescriptor;
use crate::time::Timestamp;
use crate::track::{SampleWriter, Track};
use crate::{Error, Result};
use bytes::Bytes;
use std::io::{BufWriter, Cursor, Seek, SeekFrom, Write};

/// Muxer settings.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serialize", serde(default))]
pub struct MuxerConfig {
    /// Media timescale of every track, in ticks per second.
    pub timescale: u32,
    /// Timescale of `mvhd` and `tkhd` durations.
    pub movie_timescale: u32,
    /// Write an `ftyp` box before `mdat`.
    pub write_ftyp: bool,
    /// Capacity of the write buffer in front of the sink.
    pub buffer_size: usize,
}

impl Default for MuxerConfig {
    fn default() -> Self {
        Self {
            timescale: 90000,
            movie_timescale: 10000,
            write_ftyp: true,
            buffer_size: 64 * 1024,
        }
    }
}

/// One encoded sample bound for a track.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    /// 0-based track index, in `write_header` order.
    pub track: usize,
    /// Decode time.
    pub time: Timestamp,
    /// Presentation time minus decode time.
    pub composition_offset: Option<Timestamp>,
    pub is_keyframe: bool,
    pub data: Bytes,
}

impl Packet {
    pub fn new(track: usize, time: Timestamp, data: impl Into<Bytes>) -> Self {
        Self {
            track,
            time,
            composition_offset: None,
            is_keyframe: false,
            data: data.into(),
        }
    }

    pub fn keyframe(mut self, is_keyframe: bool) -> Self {
        self.is_keyframe = is_keyframe;
        self
    }

    pub fn with_composition_offset(mut self, offset: Timestamp) -> Self {
        self.composition_offset = Some(offset);
        self
    }
}

/// Whether chunk offsets up to `mdat_end` need `co64`.
pub fn needs_64bit_offsets(mdat_end: u64) -> bool {
    mdat_end > u32::MAX as u64
}

/// Buffered sink that tracks the absolute write position.
struct MediaData<W: Write + Seek> {
    inner: BufWriter<W>,
    position: u64,
}

impl<W: Write + Seek> SampleWriter for MediaData<W> {
    fn append(&mut self, data: &[u8]) -> Result<u64> {
        let offset = self.position;
        self.inner.write_all(data)?;
        self.position += data.len() as u64;
        Ok(offset)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Created,
    Writing,
    Finished,
}

/// MP4 writer over a seekable sink.
pub struct Muxer<W: Write + Seek> {
    config: MuxerConfig,
    media: MediaData<W>,
    tracks: Vec<Track>,
    mdat_start: u64,
    state: State,
}

impl<W: Write + Seek> Muxer<W> {
    pub fn new(sink: W) -> Self {
        Self::with_config(sink, MuxerConfig::default())
    }

    pub fn with_config(sink: W, config: MuxerConfig) -> Self {
        let inner = BufWriter::with_capacity(config.buffer_size, sink);
        Self {
            config,
            media: MediaData { inner, position: 0 },
            tracks: Vec::new(),
            mdat_start: 0,
            state: State::Created,
        }
    }

    pub fn config(&self) -> &MuxerConfig {
        &self.config
    }

    /// Tracks in header order. Empty again once the trailer is written.
    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    /// Create tracks and reserve the `mdat` header.
    pub fn write_header(&mut self, descriptors: &[&dyn CodecDescriptor]) -> Result<()> {
        match self.state {
            State::Created => {}
            State::Writing => return Err(Error::HeaderAlreadyWritten),
            State::Finished => return Err(Error::Finished),
        }
        if self.config.timescale == 0 {
            return Err(Error::invalid_box(FourCc::MDHD, "track timescale must be non-zero"));
        }
        if self.config.movie_timescale == 0 {
            return Err(Error::invalid_box(FourCc::MVHD, "movie timescale must be non-zero"));
        }

        let mut tracks = Vec::with_capacity(descriptors.len());
        for (index, descriptor) in descriptors.iter().enumerate() {
            if !descriptor.is_video() && !descriptor.is_audio() {
                return Err(Error::UnsupportedMediaKind {
                    codec: descriptor.codec_name().to_string(),
                });
            }
            tracks.push(Track::new(index, *descriptor, self.config.timescale));
        }

        if self.config.write_ftyp {
            Ftyp::default().write(&mut self.media.inner)?;
        }
        self.mdat_start = write_wide_placeholder(&mut self.media.inner, FourCc::MDAT)?;
        self.media.position = self.mdat_start + WIDE_HEADER_SIZE as u64;
        self.tracks = tracks;
        self.state = State::Writing;

        tracing::debug!(
            tracks = self.tracks.len(),
            mdat_start = self.mdat_start,
            timescale = self.config.timescale,
            "Muxer header written"
        );
        Ok(())
    }

    /// Submit one packet to its track.
    ///
    /// # Panics
    ///
    /// Panics if `packet.track` is not a track created by `write_header`.
    pub fn write_packet(&mut self, packet: Packet) -> Result<()> {
        match self.state {
            State::Writing => {}
            State::Created => return Err(Error::HeaderNotWritten),
            State::Finished => return Err(Error::Finished),
        }
        assert!(
            packet.track < self.tracks.len(),
            "track index {} out of range for {} tracks",
            packet.track,
            self.tracks.len()
        );

        tracing::trace!(
            track = packet.track,
            time = ?packet.time,
            size = packet.data.len(),
            keyframe = packet.is_keyframe,
            "Packet"
        );
        self.tracks[packet.track].submit(packet, &mut self.media)
    }

    /// Finish the file.
    ///
    /// On error the output is incomplete and must be discarded.
    pub fn write_trailer(&mut self) -> Result<()> {
        match self.state {
            State::Writing => {}
            State::Created => return Err(Error::HeaderNotWritten),
            State::Finished => return Err(Error::Finished),
        }
        self.state = State::Finished;

        for track in &mut self.tracks {
            track.finalize(&mut self.media)?;
        }

        let mdat_end = self.media.position;
        let mdat_size = mdat_end - self.mdat_start;
        self.media.inner.flush()?;
        patch_wide_size(&mut self.media.inner, self.mdat_start, mdat_size)?;

        if needs_64bit_offsets(mdat_end) {
            tracing::debug!(mdat_end, "Media data exceeds 32-bit offsets, using co64");
            for track in &mut self.tracks {
                track.use_64bit_offsets();
            }
        }

        let moov = self.build_moov()?;
        let mut buf = Cursor::new(Vec::new());
        moov.write(&mut buf)?;

        self.media.inner.seek(SeekFrom::Start(mdat_end))?;
        self.media.inner.write_all(buf.get_ref())?;
        self.media.inner.flush()?;

        tracing::debug!(
            mdat_size,
            moov_size = buf.get_ref().len(),
            duration = moov.mvhd.duration,
            "Muxer trailer written"
        );
        Ok(())
    }

    fn build_moov(&mut self) -> Result<Moov> {
        let movie_timescale = self.config.movie_timescale;
        let tracks = std::mem::take(&mut self.tracks);
        let next_track_id = tracks.len() as u32 + 1;

        let mut traks = Vec::with_capacity(tracks.len());
        for (i, track) in tracks.into_iter().enumerate() {
            traks.push(track.into_trak(i as u32 + 1, movie_timescale)?);
        }
        let duration = traks.iter().map(|t| t.tkhd.duration).max().unwrap_or(0);

        Ok(Moov {
            mvhd: Mvhd::new(movie_timescale, duration, next_track_id),
            traks,
        })
    }

    /// Return the sink. Call after [`write_trailer`](Self::write_trailer).
    pub fn into_inner(self) -> Result<W> {
        self.media
            .inner
            .into_inner()
            .map_err(|e| Error::Io(e.into_error()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atom::{Atom, AtomBody};
    use crate::codec::{AacDescriptor, AvcDescriptor};
    use std::io;

    fn avc() -> AvcDescriptor {
        AvcDescriptor::new(320, 240, vec![1, 0x42, 0, 0x1e])
    }

    fn ticks(t: i64) -> Timestamp {
        Timestamp::new(t, 90000)
    }

    /// Cursor whose first byte sits at file offset `base`.
    struct OffsetSink {
        base: u64,
        inner: Cursor<Vec<u8>>,
    }

    impl Write for OffsetSink {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.inner.write(buf)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Seek for OffsetSink {
        fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
            let pos = match pos {
                SeekFrom::Start(n) => SeekFrom::Start(n - self.base),
                other => other,
            };
            Ok(self.base + self.inner.seek(pos)?)
        }
    }

    #[test]
    fn test_header_layout() {
        let mut muxer = Muxer::new(Cursor::new(Vec::new()));
        muxer.write_header(&[&avc()]).unwrap();
        let data = muxer.into_inner().unwrap().into_inner();

        assert_eq!(data.len(), 32 + 16);
        assert_eq!(&data[4..8], b"ftyp");
        assert_eq!(&data[32..36], &1u32.to_be_bytes());
        assert_eq!(&data[36..40], b"mdat");
    }

    #[test]
    fn test_header_without_ftyp() {
        let config = MuxerConfig {
            write_ftyp: false,
            ..MuxerConfig::default()
        };
        let mut muxer = Muxer::with_config(Cursor::new(Vec::new()), config);
        muxer.write_header(&[&avc()]).unwrap();
        let data = muxer.into_inner().unwrap().into_inner();
        assert_eq!(&data[4..8], b"mdat");
    }

    #[test]
    fn test_unsupported_descriptor_is_rejected() {
        let text = crate::SampleEntry::Unknown(Atom::leaf(FourCc(*b"tx3g"), vec![]));
        let mut muxer = Muxer::new(Cursor::new(Vec::new()));
        let err = muxer.write_header(&[&avc(), &text]).unwrap_err();
        assert!(matches!(err, Error::UnsupportedMediaKind { codec } if codec == "tx3g"));
    }

    #[test]
    fn test_zero_timescale_is_rejected() {
        for (timescale, movie_timescale, box_type) in
            [(0, 1000, FourCc::MDHD), (90000, 0, FourCc::MVHD)]
        {
            let config = MuxerConfig {
                timescale,
                movie_timescale,
                ..MuxerConfig::default()
            };
            let mut muxer = Muxer::with_config(Cursor::new(Vec::new()), config);
            let err = muxer.write_header(&[&avc()]).unwrap_err();
            assert!(matches!(err, Error::InvalidBox { box_type: b, .. } if b == box_type));
            // Nothing written, and the muxer still waits for a header.
            assert!(matches!(muxer.write_trailer(), Err(Error::HeaderNotWritten)));
            assert!(muxer.into_inner().unwrap().into_inner().is_empty());
        }
    }

    #[test]
    fn test_lifecycle_errors() {
        let mut muxer = Muxer::new(Cursor::new(Vec::new()));
        assert!(matches!(
            muxer.write_packet(Packet::new(0, ticks(0), vec![0])),
            Err(Error::HeaderNotWritten)
        ));
        assert!(matches!(muxer.write_trailer(), Err(Error::HeaderNotWritten)));

        muxer.write_header(&[&avc()]).unwrap();
        assert!(matches!(
            muxer.write_header(&[&avc()]),
            Err(Error::HeaderAlreadyWritten)
        ));
        muxer.write_trailer().unwrap();

        assert!(matches!(
            muxer.write_packet(Packet::new(0, ticks(0), vec![0])),
            Err(Error::Finished)
        ));
        assert!(matches!(muxer.write_trailer(), Err(Error::Finished)));
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn test_out_of_range_track_panics() {
        let mut muxer = Muxer::new(Cursor::new(Vec::new()));
        muxer.write_header(&[&avc()]).unwrap();
        let _ = muxer.write_packet(Packet::new(3, ticks(0), vec![0]));
    }

    #[test]
    fn test_trailer_patches_mdat_and_appends_moov() {
        let aac = AacDescriptor::new(2, 48000, vec![0x11, 0x90]);
        let mut muxer = Muxer::new(Cursor::new(Vec::new()));
        muxer.write_header(&[&avc(), &aac]).unwrap();
        muxer
            .write_packet(Packet::new(0, ticks(0), vec![1; 10]).keyframe(true))
            .unwrap();
        muxer.write_packet(Packet::new(1, ticks(0), vec![2; 4])).unwrap();
        muxer.write_packet(Packet::new(0, ticks(3000), vec![3; 6])).unwrap();
        muxer.write_trailer().unwrap();
        let data = muxer.into_inner().unwrap().into_inner();

        let atoms = Atom::parse(&data).unwrap();
        let types: Vec<_> = atoms.iter().map(|a| a.box_type).collect();
        assert_eq!(types, vec![FourCc::FTYP, FourCc::MDAT, FourCc::MOOV]);

        let mdat = &atoms[1];
        assert!(mdat.wide);
        assert_eq!(mdat.encoded_len(), 16 + 20);
        assert_eq!(atoms[2].children().iter().filter(|a| a.box_type == FourCc::TRAK).count(), 2);

        let mvhd = atoms[2].find(&[FourCc::MVHD]).unwrap();
        let AtomBody::Leaf(payload) = &mvhd.body else {
            panic!("mvhd is a leaf");
        };
        // next_track_id is the last field
        assert_eq!(&payload[payload.len() - 4..], &3u32.to_be_bytes());
    }

    #[test]
    fn test_offsets_promote_to_co64() {
        let sink = OffsetSink {
            base: u32::MAX as u64 - 40,
            inner: Cursor::new(Vec::new()),
        };
        let mut muxer = Muxer::new(sink);
        muxer.write_header(&[&avc()]).unwrap();
        for t in [0, 3000] {
            muxer
                .write_packet(Packet::new(0, ticks(t), vec![0; 16]).keyframe(true))
                .unwrap();
        }
        muxer.write_trailer().unwrap();
        let data = muxer.into_inner().unwrap().inner.into_inner();

        let atoms = Atom::parse(&data).unwrap();
        let stbl = atoms[2]
            .find(&[FourCc::TRAK, FourCc::MDIA, FourCc::MINF, FourCc::STBL])
            .unwrap();
        assert!(stbl.find(&[FourCc::CO64]).is_some());
        assert!(stbl.find(&[FourCc::STCO]).is_none());
    }

    #[test]
    fn test_needs_64bit_offsets() {
        assert!(!needs_64bit_offsets(u32::MAX as u64));
        assert!(needs_64bit_offsets(u32::MAX as u64 + 1));
    }
}
