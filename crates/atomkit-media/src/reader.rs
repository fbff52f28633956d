//! MP4 file reader.
//!
//! Walks the top-level boxes with seeks so `mdat` is never read, decodes
//! `ftyp` and `moov`, and resolves every track's sample table into
//! per-sample offsets, sizes and timestamps.

use crate::atom::{BoxHeader, BoxReader, FourCc};
use crate::boxes::{Ftyp, Moov, Stbl};
use crate::sample_entry::SampleEntry;
use crate::{Error, Result};
use bytes::Bytes;
use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::Path;

/// Upper bound on samples resolved per track.
const MAX_SAMPLE_COUNT: u64 = 16 * 1024 * 1024;

/// A resolved sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleInfo {
    /// Sample index (0-based).
    pub index: u32,
    /// File offset where sample data starts.
    pub offset: u64,
    /// Sample size in bytes.
    pub size: u32,
    /// Decode timestamp in media timescale.
    pub dts: u64,
    /// Duration in media timescale.
    pub duration: u32,
    /// Composition time offset (for PTS calculation).
    pub cts_offset: i32,
    /// Whether this sample is a keyframe (sync sample).
    pub is_keyframe: bool,
}

impl SampleInfo {
    /// Get the presentation timestamp.
    pub fn pts(&self) -> u64 {
        (self.dts as i64 + self.cts_offset as i64).max(0) as u64
    }
}

/// One track of a parsed file.
#[derive(Debug, Clone)]
pub struct Mp4Track {
    pub track_id: u32,
    pub handler_type: FourCc,
    /// Media timescale.
    pub timescale: u32,
    /// Duration in media timescale.
    pub duration: u64,
    pub sample_entry: Option<SampleEntry>,
    pub samples: Vec<SampleInfo>,
}

impl Mp4Track {
    pub fn is_video(&self) -> bool {
        self.handler_type == FourCc::VIDE
    }

    pub fn is_audio(&self) -> bool {
        self.handler_type == FourCc::SOUN
    }

    /// Sample entry format, e.g. `avc1`.
    pub fn codec(&self) -> Option<FourCc> {
        self.sample_entry.as_ref().map(SampleEntry::format)
    }

    /// 1-based indices of keyframes.
    pub fn keyframe_indices(&self) -> Vec<u32> {
        self.samples
            .iter()
            .filter(|s| s.is_keyframe)
            .map(|s| s.index + 1)
            .collect()
    }

    pub fn duration_secs(&self) -> f64 {
        if self.timescale == 0 {
            return 0.0;
        }
        self.duration as f64 / self.timescale as f64
    }
}

/// Parsed MP4 file.
#[derive(Debug, Clone)]
pub struct Mp4File {
    pub ftyp: Option<Ftyp>,
    pub moov: Moov,
    /// Headers of every top-level `mdat`.
    pub media_data: Vec<BoxHeader>,
    pub tracks: Vec<Mp4Track>,
}

impl Mp4File {
    /// Open and parse a file from disk.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let mut reader = BufReader::new(File::open(path)?);
        Self::parse(&mut reader)
    }

    /// Parse a complete file.
    pub fn parse<R: Read + Seek>(reader: &mut R) -> Result<Self> {
        let file_size = reader.seek(SeekFrom::End(0))?;
        let mut ftyp = None;
        let mut moov = None;
        let mut media_data = Vec::new();

        let mut pos = 0u64;
        while pos < file_size {
            reader.seek(SeekFrom::Start(pos))?;
            let inner: &mut dyn Read = &mut *reader;
            let mut region = BoxReader::new(inner, file_size - pos, FourCc::ROOT).at_offset(pos);
            let Some(header) = region.next_header()? else {
                break;
            };

            match header.box_type {
                FourCc::FTYP => ftyp = Some(Ftyp::read(&mut region.child(&header))?),
                FourCc::MOOV => moov = Some(Moov::read(&mut region.child(&header))?),
                FourCc::MDAT => media_data.push(header),
                other => {
                    tracing::trace!(box_type = %other, offset = pos, "Skipping top-level box");
                }
            }
            pos = header.offset + header.size;
        }

        let moov = moov.ok_or(Error::MissingBox("moov"))?;
        let mut tracks = Vec::with_capacity(moov.traks.len());
        for (index, trak) in moov.traks.iter().enumerate() {
            let mdia = &trak.mdia;
            let samples = resolve_samples(&mdia.minf.stbl, file_size)
                .map_err(|e| e.in_track(index))?;
            tracks.push(Mp4Track {
                track_id: trak.tkhd.track_id,
                handler_type: mdia.hdlr.handler_type,
                timescale: mdia.mdhd.timescale,
                duration: mdia.mdhd.duration,
                sample_entry: mdia.minf.stbl.stsd.entries.first().cloned(),
                samples,
            });
        }

        tracing::debug!(
            tracks = tracks.len(),
            mdat_boxes = media_data.len(),
            file_size,
            "Parsed MP4"
        );

        Ok(Self {
            ftyp,
            moov,
            media_data,
            tracks,
        })
    }

    /// Movie duration in seconds.
    pub fn duration_secs(&self) -> f64 {
        let mvhd = &self.moov.mvhd;
        if mvhd.timescale == 0 {
            return 0.0;
        }
        mvhd.duration as f64 / mvhd.timescale as f64
    }

    pub fn video_track(&self) -> Option<&Mp4Track> {
        self.tracks.iter().find(|t| t.is_video())
    }

    pub fn audio_track(&self) -> Option<&Mp4Track> {
        self.tracks.iter().find(|t| t.is_audio())
    }

    /// Read one sample's payload from the file it was parsed from.
    pub fn read_sample<R: Read + Seek>(reader: &mut R, sample: &SampleInfo) -> Result<Bytes> {
        reader.seek(SeekFrom::Start(sample.offset))?;
        let mut data = vec![0u8; sample.size as usize];
        reader.read_exact(&mut data)?;
        Ok(Bytes::from(data))
    }
}

/// Resolve a sample table into per-sample entries.
///
/// `data_len` is the size of the file the table points into. A table of
/// constant-size samples whose total exceeds it is rejected before any
/// sample is expanded.
pub fn resolve_samples(stbl: &Stbl, data_len: u64) -> Result<Vec<SampleInfo>> {
    let stsz = &stbl.stsz;
    if stsz.sample_count as u64 > MAX_SAMPLE_COUNT {
        return Err(Error::invalid_box(
            FourCc::STSZ,
            format!(
                "{} samples exceed maximum {MAX_SAMPLE_COUNT}",
                stsz.sample_count
            ),
        ));
    }
    let total = stsz.sample_count as u64 * stsz.sample_size as u64;
    if total > data_len {
        return Err(Error::invalid_box(
            FourCc::STSZ,
            format!("{total} bytes of samples exceed the {data_len} byte file"),
        ));
    }

    let sample_count = stsz.sample_count as usize;
    if sample_count == 0 {
        return Ok(Vec::new());
    }

    let offsets = resolve_offsets(stbl, sample_count)?;
    let (dts_values, durations) = resolve_timestamps(stbl, sample_count)?;
    let cts_offsets = resolve_cts_offsets(stbl, sample_count);

    let mut samples = Vec::with_capacity(sample_count);
    for (i, offset) in offsets.into_iter().enumerate() {
        let number = i as u32 + 1;
        let is_keyframe = match &stbl.stss {
            // No stss means all samples are sync samples
            None => true,
            Some(stss) => stss.sample_numbers.binary_search(&number).is_ok(),
        };

        samples.push(SampleInfo {
            index: i as u32,
            offset,
            size: stbl.stsz.size_of(i).unwrap_or(0),
            dts: dts_values[i],
            duration: durations[i],
            cts_offset: cts_offsets[i],
            is_keyframe,
        });
    }
    Ok(samples)
}

fn resolve_offsets(stbl: &Stbl, sample_count: usize) -> Result<Vec<u64>> {
    let entries = &stbl.stsc.entries;
    let chunk_offsets = &stbl.stco.offsets;
    let num_chunks = chunk_offsets.len() as u32;

    let mut offsets = Vec::with_capacity(sample_count.min(chunk_offsets.len().max(1) * 64));
    for (i, entry) in entries.iter().enumerate() {
        if entry.first_chunk == 0 {
            return Err(Error::invalid_box(FourCc::STSC, "chunk indices are 1-based"));
        }
        let next_first = entries
            .get(i + 1)
            .map_or(num_chunks + 1, |next| next.first_chunk);

        for chunk in entry.first_chunk..next_first.min(num_chunks + 1) {
            let mut offset = chunk_offsets[chunk as usize - 1];
            for _ in 0..entry.samples_per_chunk {
                if offsets.len() >= sample_count {
                    return Ok(offsets);
                }
                offsets.push(offset);
                offset += stbl.stsz.size_of(offsets.len() - 1).unwrap_or(0) as u64;
            }
        }
    }

    if offsets.len() < sample_count {
        return Err(Error::invalid_box(
            FourCc::STSC,
            format!("maps {} of {sample_count} samples to chunks", offsets.len()),
        ));
    }
    Ok(offsets)
}

fn resolve_timestamps(stbl: &Stbl, sample_count: usize) -> Result<(Vec<u64>, Vec<u32>)> {
    let mut dts_values = Vec::with_capacity(sample_count);
    let mut durations = Vec::with_capacity(sample_count);
    let mut current_dts = 0u64;

    'runs: for entry in &stbl.stts.entries {
        for _ in 0..entry.sample_count {
            if dts_values.len() >= sample_count {
                break 'runs;
            }
            dts_values.push(current_dts);
            durations.push(entry.sample_delta);
            current_dts += entry.sample_delta as u64;
        }
    }

    if dts_values.len() < sample_count {
        return Err(Error::invalid_box(
            FourCc::STTS,
            format!("times {} of {sample_count} samples", dts_values.len()),
        ));
    }
    Ok((dts_values, durations))
}

fn resolve_cts_offsets(stbl: &Stbl, sample_count: usize) -> Vec<i32> {
    let mut offsets = Vec::with_capacity(sample_count);
    if let Some(ctts) = &stbl.ctts {
        'runs: for entry in &ctts.entries {
            for _ in 0..entry.sample_count {
                if offsets.len() >= sample_count {
                    break 'runs;
                }
                offsets.push(entry.sample_offset);
            }
        }
    }

    // Pad with zeros if needed
    offsets.resize(sample_count, 0);
    offsets
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::boxes::{Stco, Stsc, StscEntry, Stss, Stsz, Stts, SttsEntry};
    use crate::sample_entry::Stsd;
    use std::io::Cursor;

    const DATA_LEN: u64 = 8192;

    fn stbl() -> Stbl {
        Stbl {
            stsd: Stsd::default(),
            stts: Stts {
                entries: vec![SttsEntry {
                    sample_count: 3,
                    sample_delta: 1000,
                }],
            },
            ctts: None,
            stss: Some(Stss {
                sample_numbers: vec![1],
            }),
            stsc: Stsc {
                entries: vec![StscEntry {
                    first_chunk: 1,
                    samples_per_chunk: 3,
                    sample_description_index: 1,
                }],
            },
            stsz: Stsz {
                sample_size: 0,
                sample_count: 3,
                entry_sizes: vec![100, 200, 150],
            },
            stco: Stco {
                offsets: vec![1000],
                is_64bit: false,
            },
        }
    }

    #[test]
    fn test_sample_info_pts() {
        let sample = SampleInfo {
            index: 0,
            offset: 100,
            size: 1000,
            dts: 100,
            duration: 0,
            cts_offset: -200,
            is_keyframe: true,
        };
        assert_eq!(sample.pts(), 0); // Clamped to 0
    }

    #[test]
    fn test_resolve_samples_in_one_chunk() {
        let samples = resolve_samples(&stbl(), DATA_LEN).unwrap();
        assert_eq!(samples.len(), 3);

        assert_eq!(samples[0].offset, 1000);
        assert_eq!(samples[0].dts, 0);
        assert!(samples[0].is_keyframe);

        assert_eq!(samples[1].offset, 1100); // 1000 + 100
        assert_eq!(samples[1].size, 200);
        assert_eq!(samples[1].dts, 1000);
        assert!(!samples[1].is_keyframe);

        assert_eq!(samples[2].offset, 1300); // 1000 + 100 + 200
    }

    #[test]
    fn test_resolve_samples_across_chunk_runs() {
        let mut table = stbl();
        // chunk 1 holds 2 samples, chunk 2 holds 1
        table.stsc.entries = vec![
            StscEntry {
                first_chunk: 1,
                samples_per_chunk: 2,
                sample_description_index: 1,
            },
            StscEntry {
                first_chunk: 2,
                samples_per_chunk: 1,
                sample_description_index: 1,
            },
        ];
        table.stco.offsets = vec![1000, 5000];

        let offsets: Vec<_> = resolve_samples(&table, DATA_LEN)
            .unwrap()
            .iter()
            .map(|s| s.offset)
            .collect();
        assert_eq!(offsets, vec![1000, 1100, 5000]);
    }

    #[test]
    fn test_short_chunk_map_is_error() {
        let mut table = stbl();
        table.stsc.entries[0].samples_per_chunk = 2;
        assert!(matches!(
            resolve_samples(&table, DATA_LEN),
            Err(Error::InvalidBox { box_type, .. }) if box_type == FourCc::STSC
        ));
    }

    #[test]
    fn test_short_stts_is_error() {
        let mut table = stbl();
        table.stts.entries[0].sample_count = 2;
        assert!(matches!(
            resolve_samples(&table, DATA_LEN),
            Err(Error::InvalidBox { box_type, .. }) if box_type == FourCc::STTS
        ));
    }

    #[test]
    fn test_constant_size_samples_must_fit_in_file() {
        let mut table = stbl();
        table.stsz = Stsz {
            sample_size: 4,
            sample_count: 3,
            entry_sizes: Vec::new(),
        };
        let samples = resolve_samples(&table, DATA_LEN).unwrap();
        let offsets: Vec<_> = samples.iter().map(|s| s.offset).collect();
        assert_eq!(offsets, vec![1000, 1004, 1008]);

        table.stsz.sample_count = 10_000;
        table.stsc.entries[0].samples_per_chunk = u32::MAX;
        assert!(matches!(
            resolve_samples(&table, DATA_LEN),
            Err(Error::InvalidBox { box_type, .. }) if box_type == FourCc::STSZ
        ));
    }

    #[test]
    fn test_sample_count_is_capped() {
        let mut table = stbl();
        table.stsz = Stsz {
            sample_size: 1,
            sample_count: MAX_SAMPLE_COUNT as u32 + 1,
            entry_sizes: Vec::new(),
        };
        assert!(matches!(
            resolve_samples(&table, u64::MAX),
            Err(Error::InvalidBox { box_type, .. }) if box_type == FourCc::STSZ
        ));
    }

    #[test]
    fn test_oversized_constant_stsz_in_file_is_rejected() {
        use crate::codec::AvcDescriptor;
        use crate::{Muxer, Packet, Timestamp};

        let video = AvcDescriptor::new(16, 16, vec![1, 0x42, 0, 0x0a]);
        let mut muxer = Muxer::new(Cursor::new(Vec::new()));
        muxer.write_header(&[&video]).unwrap();
        muxer
            .write_packet(Packet::new(0, Timestamp::new(0, 90000), vec![7; 8]).keyframe(true))
            .unwrap();
        muxer.write_trailer().unwrap();
        let mut data = muxer.into_inner().unwrap().into_inner();

        // Rewrite stsz as 20M constant-size samples and stsc as one huge chunk.
        let stsz = data.windows(4).position(|w| w == b"stsz").unwrap();
        data[stsz + 8..stsz + 12].copy_from_slice(&1u32.to_be_bytes());
        data[stsz + 12..stsz + 16].copy_from_slice(&20_000_000u32.to_be_bytes());
        let stsc = data.windows(4).position(|w| w == b"stsc").unwrap();
        data[stsc + 16..stsc + 20].copy_from_slice(&u32::MAX.to_be_bytes());

        let err = Mp4File::parse(&mut Cursor::new(&data)).unwrap_err();
        let Error::Track { track: 0, source } = err else {
            panic!("expected a track error, got {err:?}");
        };
        assert!(matches!(*source, Error::InvalidBox { box_type, .. } if box_type == FourCc::STSZ));
    }

    #[test]
    fn test_missing_moov() {
        let mut data = vec![0, 0, 0, 16];
        data.extend_from_slice(b"mdat");
        data.extend_from_slice(&[0; 8]);
        let result = Mp4File::parse(&mut Cursor::new(data));
        assert!(matches!(result, Err(Error::MissingBox("moov"))));
    }
}
