//! `atomkit remux`: parse a file and write its samples through the muxer.

use anyhow::{Context, Result};
use atomkit_media::{
    CodecDescriptor, Mp4File, Muxer, MuxerConfig, Packet, SampleEntry, SampleInfo, Timestamp,
};
use std::fs::File;
use std::io::{BufReader, Read, Seek, Write};
use std::path::Path;

/// Counts reported after a remux.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RemuxStats {
    pub tracks: usize,
    pub skipped_tracks: usize,
    pub samples: usize,
    pub bytes: u64,
}

/// One sample queued for the output, in source timescale.
struct Queued<'a> {
    track: usize,
    timescale: u32,
    sample: &'a SampleInfo,
}

pub fn remux_file(input: &Path, output: &Path, config: &MuxerConfig) -> Result<RemuxStats> {
    if !input.exists() {
        anyhow::bail!("Input file does not exist: {:?}", input);
    }

    let mut reader = BufReader::new(
        File::open(input).with_context(|| format!("Failed to open {:?}", input))?,
    );
    let sink =
        File::create(output).with_context(|| format!("Failed to create {:?}", output))?;

    let stats = remux(&mut reader, sink, config)
        .with_context(|| format!("Failed to remux {:?} into {:?}", input, output))?;

    tracing::info!(
        tracks = stats.tracks,
        samples = stats.samples,
        bytes = stats.bytes,
        "Remuxed {:?} -> {:?}",
        input,
        output
    );
    Ok(stats)
}

/// Copy every audio and video track of `reader` into a new file on `sink`.
///
/// Samples are interleaved by decode time across tracks.
pub fn remux<R, W>(reader: &mut R, sink: W, config: &MuxerConfig) -> Result<RemuxStats>
where
    R: Read + Seek,
    W: Write + Seek,
{
    let file = Mp4File::parse(reader).context("Failed to parse input")?;
    let mut stats = RemuxStats::default();

    let mut entries: Vec<&SampleEntry> = Vec::new();
    let mut queue: Vec<Queued<'_>> = Vec::new();
    for track in &file.tracks {
        let entry = match &track.sample_entry {
            Some(entry) if entry.is_video() || entry.is_audio() => entry,
            other => {
                tracing::warn!(
                    track_id = track.track_id,
                    codec = other.as_ref().map(|e| e.codec_name()).unwrap_or("none"),
                    "Skipping track without a supported sample entry"
                );
                stats.skipped_tracks += 1;
                continue;
            }
        };

        let index = entries.len();
        entries.push(entry);
        queue.extend(track.samples.iter().map(|sample| Queued {
            track: index,
            timescale: track.timescale,
            sample,
        }));
    }

    if entries.is_empty() {
        anyhow::bail!("Input has no audio or video tracks");
    }

    // Stable sort keeps source order for samples with equal decode time.
    queue.sort_by_key(|q| Timestamp::new(q.sample.dts as i64, q.timescale).to_ticks(config.timescale));

    let descriptors: Vec<&dyn CodecDescriptor> =
        entries.iter().map(|e| *e as &dyn CodecDescriptor).collect();
    let mut muxer = Muxer::with_config(sink, config.clone());
    muxer.write_header(&descriptors)?;

    for q in queue {
        let data = Mp4File::read_sample(reader, q.sample)?;
        stats.bytes += data.len() as u64;

        let mut packet = Packet::new(
            q.track,
            Timestamp::new(q.sample.dts as i64, q.timescale),
            data,
        )
        .keyframe(q.sample.is_keyframe);
        if q.sample.cts_offset != 0 {
            packet = packet.with_composition_offset(Timestamp::new(
                q.sample.cts_offset as i64,
                q.timescale,
            ));
        }
        muxer.write_packet(packet)?;
        stats.samples += 1;
    }

    muxer.write_trailer()?;
    let mut sink = muxer.into_inner()?;
    sink.flush()?;

    stats.tracks = entries.len();
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use atomkit_media::{AacDescriptor, AvcDescriptor};
    use std::io::Cursor;

    fn source(timescale: u32) -> Vec<u8> {
        let video = AvcDescriptor::new(640, 360, vec![1, 0x4d, 0, 0x1e]);
        let audio = AacDescriptor::new(1, 44100, vec![0x12, 0x08]);
        let config = MuxerConfig {
            timescale,
            ..MuxerConfig::default()
        };
        let mut muxer = Muxer::with_config(Cursor::new(Vec::new()), config);
        muxer.write_header(&[&video, &audio]).unwrap();

        // Video first in full, then audio: the remux must interleave.
        for i in 0..5i64 {
            let packet = Packet::new(0, Timestamp::new(i * 40, 1000), vec![i as u8; 30])
                .keyframe(i == 0)
                .with_composition_offset(Timestamp::new(40, 1000));
            muxer.write_packet(packet).unwrap();
        }
        for i in 0..8i64 {
            let packet = Packet::new(1, Timestamp::new(i * 23, 1000), vec![0xAA; 6]).keyframe(true);
            muxer.write_packet(packet).unwrap();
        }
        muxer.write_trailer().unwrap();
        muxer.into_inner().unwrap().into_inner()
    }

    #[test]
    fn test_remux_copies_all_samples() {
        let input = source(90000);
        let mut out = Cursor::new(Vec::new());
        let stats = remux(&mut Cursor::new(&input), &mut out, &MuxerConfig::default()).unwrap();

        assert_eq!(stats.tracks, 2);
        assert_eq!(stats.skipped_tracks, 0);
        assert_eq!(stats.samples, 13);
        assert_eq!(stats.bytes, 5 * 30 + 8 * 6);

        let data = out.into_inner();
        let before = Mp4File::parse(&mut Cursor::new(&input)).unwrap();
        let after = Mp4File::parse(&mut Cursor::new(&data)).unwrap();
        for (a, b) in before.tracks.iter().zip(&after.tracks) {
            let a_times: Vec<(u64, i32, bool)> =
                a.samples.iter().map(|s| (s.dts, s.cts_offset, s.is_keyframe)).collect();
            let b_times: Vec<(u64, i32, bool)> =
                b.samples.iter().map(|s| (s.dts, s.cts_offset, s.is_keyframe)).collect();
            assert_eq!(a_times, b_times);
            assert_eq!(a.sample_entry, b.sample_entry);
        }
    }

    #[test]
    fn test_remux_interleaves_by_time() {
        let input = source(90000);
        let mut out = Cursor::new(Vec::new());
        remux(&mut Cursor::new(&input), &mut out, &MuxerConfig::default()).unwrap();

        let data = out.into_inner();
        let file = Mp4File::parse(&mut Cursor::new(&data)).unwrap();
        // Audio at 23ms lands between video at 0ms and 40ms.
        let video = &file.tracks[0].samples;
        let audio = &file.tracks[1].samples;
        assert!(audio[1].offset > video[0].offset);
        assert!(audio[1].offset < video[1].offset);
    }

    #[test]
    fn test_remux_rescales_to_configured_timescale() {
        let input = source(90000);
        let config = MuxerConfig {
            timescale: 1000,
            ..MuxerConfig::default()
        };
        let mut out = Cursor::new(Vec::new());
        remux(&mut Cursor::new(&input), &mut out, &config).unwrap();

        let data = out.into_inner();
        let file = Mp4File::parse(&mut Cursor::new(&data)).unwrap();
        let video = &file.tracks[0];
        assert_eq!(video.timescale, 1000);
        let dts: Vec<u64> = video.samples.iter().map(|s| s.dts).collect();
        assert_eq!(dts, vec![0, 40, 80, 120, 160]);
    }

    #[test]
    fn test_remux_rejects_zero_media_timescale() {
        let mut input = source(90000);
        let mdhd = input.windows(4).position(|w| w == b"mdhd").unwrap();
        input[mdhd + 16..mdhd + 20].copy_from_slice(&0u32.to_be_bytes());

        let mut out = Cursor::new(Vec::new());
        let err = remux(&mut Cursor::new(&input), &mut out, &MuxerConfig::default()).unwrap_err();
        assert!(err.to_string().contains("Failed to parse input"));
        assert!(format!("{err:#}").contains("mdhd"));
        assert!(out.into_inner().is_empty());
    }

    #[test]
    fn test_remux_rejects_non_mp4() {
        let mut out = Cursor::new(Vec::new());
        let err = remux(
            &mut Cursor::new(b"not an mp4 file".to_vec()),
            &mut out,
            &MuxerConfig::default(),
        )
        .unwrap_err();
        assert!(err.to_string().contains("Failed to parse input"));
    }
}
