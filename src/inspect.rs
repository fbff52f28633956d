//! `atomkit inspect`: track summary and raw box tree.

use anyhow::{Context, Result};
use atomkit_media::atom::is_container;
use atomkit_media::{BoxHeader, BoxReader, FourCc, Mp4File, SampleEntry};
use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom, Write};
use std::path::Path;

pub fn inspect_file(path: &Path, tree: bool) -> Result<()> {
    if !path.exists() {
        anyhow::bail!("File does not exist: {:?}", path);
    }

    let mut reader = BufReader::new(
        File::open(path).with_context(|| format!("Failed to open {:?}", path))?,
    );
    let stdout = std::io::stdout();
    let mut out = stdout.lock();

    if tree {
        write_tree(&mut reader, &mut out)
    } else {
        let file = Mp4File::parse(&mut reader)
            .with_context(|| format!("Failed to parse {:?}", path))?;
        writeln!(out, "File: {}", path.display())?;
        write_summary(&file, &mut out)
    }
}

/// Print brand, duration and one line per track.
pub fn write_summary(file: &Mp4File, out: &mut dyn Write) -> Result<()> {
    if let Some(ftyp) = &file.ftyp {
        let brands: Vec<&str> = ftyp.compatible_brands.iter().map(|b| b.as_str()).collect();
        writeln!(
            out,
            "Brand: {} (minor {}) [{}]",
            ftyp.major_brand,
            ftyp.minor_version,
            brands.join(", ")
        )?;
    }
    writeln!(out, "Duration: {}", format_duration(file.duration_secs()))?;

    let media_bytes: u64 = file.media_data.iter().map(|h| h.payload_size()).sum();
    writeln!(
        out,
        "Media data: {} bytes in {} mdat box(es)",
        media_bytes,
        file.media_data.len()
    )?;

    writeln!(out, "\nTracks: {}", file.tracks.len())?;
    for track in &file.tracks {
        let codec = track
            .codec()
            .map(|c| c.to_string())
            .unwrap_or_else(|| "none".to_string());
        write!(out, "  [{}] {} {}", track.track_id, track.handler_type, codec)?;
        match &track.sample_entry {
            Some(SampleEntry::Visual(v)) => write!(out, " {}x{}", v.width, v.height)?,
            Some(SampleEntry::Audio(a)) => {
                write!(out, " {}ch {}Hz", a.channel_count, a.sample_rate)?
            }
            _ => {}
        }
        writeln!(
            out,
            ", {} samples, {}",
            track.samples.len(),
            format_duration(track.duration_secs())
        )?;
        if track.is_video() {
            writeln!(out, "      keyframes: {}", track.keyframe_indices().len())?;
        }
    }

    Ok(())
}

/// Print every box header, indenting children of container boxes.
///
/// Top-level boxes are visited by seeking, so `mdat` payloads are never read.
pub fn write_tree<R: Read + Seek>(reader: &mut R, out: &mut dyn Write) -> Result<()> {
    let file_size = reader.seek(SeekFrom::End(0))?;
    let mut pos = 0u64;

    while pos < file_size {
        reader.seek(SeekFrom::Start(pos))?;
        let inner: &mut dyn Read = &mut *reader;
        let mut region = BoxReader::new(inner, file_size - pos, FourCc::ROOT).at_offset(pos);
        let Some(header) = region.next_header()? else {
            break;
        };

        write_header_line(out, &header, 0)?;
        if is_container(header.box_type) {
            write_children(&mut region.child(&header), out, 1)?;
        }
        pos = header.offset + header.size;
    }

    Ok(())
}

fn write_children(
    reader: &mut BoxReader<'_>,
    out: &mut dyn Write,
    depth: usize,
) -> atomkit_media::Result<()> {
    reader.for_each_child(|header, child| {
        write_header_line(out, header, depth)?;
        if is_container(header.box_type) {
            write_children(child, out, depth + 1)?;
        }
        Ok(())
    })
}

fn write_header_line(out: &mut dyn Write, header: &BoxHeader, depth: usize) -> std::io::Result<()> {
    let wide = if header.is_wide() { " (64-bit)" } else { "" };
    writeln!(
        out,
        "{:indent$}{} size={} offset={}{}",
        "",
        header.box_type,
        header.size,
        header.offset,
        wide,
        indent = depth * 2
    )
}

fn format_duration(secs: f64) -> String {
    let millis = (secs * 1000.0).round() as u64;
    let total_secs = millis / 1000;
    format!(
        "{:02}:{:02}:{:02}.{:03}",
        total_secs / 3600,
        (total_secs / 60) % 60,
        total_secs % 60,
        millis % 1000
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use atomkit_media::{AvcDescriptor, Muxer, Packet, Timestamp};
    use std::io::Cursor;

    fn small_file() -> Vec<u8> {
        let video = AvcDescriptor::new(320, 240, vec![1, 0x42, 0, 0x0a]);
        let mut muxer = Muxer::new(Cursor::new(Vec::new()));
        muxer.write_header(&[&video]).unwrap();
        for i in 0..4 {
            let packet = Packet::new(0, Timestamp::new(i * 3000, 90000), vec![0u8; 10])
                .keyframe(i == 0);
            muxer.write_packet(packet).unwrap();
        }
        muxer.write_trailer().unwrap();
        muxer.into_inner().unwrap().into_inner()
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(0.0), "00:00:00.000");
        assert_eq!(format_duration(0.1), "00:00:00.100");
        assert_eq!(format_duration(3723.5), "01:02:03.500");
    }

    #[test]
    fn test_tree_lists_nested_boxes() {
        let data = small_file();
        let mut out = Vec::new();
        write_tree(&mut Cursor::new(&data), &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();

        let lines: Vec<&str> = text.lines().collect();
        assert!(lines[0].starts_with("ftyp size=32 offset=0"));
        assert!(lines[1].starts_with("mdat"));
        assert!(lines[1].ends_with("(64-bit)"));
        assert!(text.contains("\n    tkhd size=92"));
        assert!(text.contains("\n        stbl"));
        assert!(text.contains("\n          stsz"));
    }

    #[test]
    fn test_summary_lists_tracks() {
        let data = small_file();
        let file = Mp4File::parse(&mut Cursor::new(&data)).unwrap();
        let mut out = Vec::new();
        write_summary(&file, &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();

        assert!(text.contains("Brand: isom (minor 512) [isom, iso2, avc1, mp41]"));
        assert!(text.contains("Tracks: 1"));
        assert!(text.contains("[1] vide avc1 320x240, 4 samples"));
        assert!(text.contains("keyframes: 1"));
        assert!(text.contains("Media data: 40 bytes in 1 mdat box(es)"));
    }
}
