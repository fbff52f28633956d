//! Per-track sample accumulation.
//!
//! A [`Track`] holds back one sample: its duration is only known once the
//! next sample's decode time arrives. Committing a sample appends its payload
//! through a [`SampleWriter`] and records it in the [`SampleTables`]:
//! - stts: run-length durations
//! - ctts: run-length composition offsets (video)
//! - stss: 1-based keyframe indices (video)
//! - stsz: per-sample sizes
//! - stco/co64: per-sample offsets (one sample per chunk)

use crate::atom::FourCc;
use crate::boxes::{
    Ctts, Dinf, Hdlr, Mdhd, Mdia, Minf, Stbl, Stco, Stsc, Stss, Stsz, Stts, Tkhd, Trak,
    IDENTITY_MATRIX,
};
use crate::codec::{CodecDescriptor, TrackFields};
use crate::muxer::Packet;
use crate::sample_entry::{SampleEntry, Stsd};
use crate::time::rescale;
use crate::{Error, Result};
use bytes::Bytes;

/// Destination for sample payloads.
pub trait SampleWriter {
    /// Append `data` to the media data region and return its absolute file offset.
    fn append(&mut self, data: &[u8]) -> Result<u64>;
}

/// Index-aligned sample tables of one track.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SampleTables {
    pub stts: Stts,
    pub ctts: Option<Ctts>,
    pub stss: Option<Stss>,
    pub stsz: Stsz,
    pub stco: Stco,
}

impl SampleTables {
    /// Tables for a track; video tracks also carry ctts and stss.
    pub fn new(is_video: bool) -> Self {
        Self {
            ctts: is_video.then(Ctts::default),
            stss: is_video.then(Stss::default),
            ..Self::default()
        }
    }

    pub fn sample_count(&self) -> u64 {
        self.stsz.sample_count as u64
    }

    /// Check that every table describes the same number of samples.
    pub fn check_consistency(&self) -> Result<()> {
        let count = self.sample_count();
        let mismatch = |box_type: FourCc, found: u64| {
            Error::invalid_box(
                box_type,
                format!("describes {found} samples but stsz has {count}"),
            )
        };

        if self.stts.sample_count() != count {
            return Err(mismatch(FourCc::STTS, self.stts.sample_count()));
        }
        if let Some(ctts) = &self.ctts {
            if ctts.sample_count() != count {
                return Err(mismatch(FourCc::CTTS, ctts.sample_count()));
            }
        }
        if self.stco.offsets.len() as u64 != count {
            return Err(mismatch(self.stco.box_type(), self.stco.offsets.len() as u64));
        }
        Ok(())
    }
}

/// Reconcile one sample's nominal decode and presentation ticks.
///
/// `last_dts` is the decode time of the previous sample on the track. The
/// result keeps decode times strictly increasing and presentation at or
/// after decode whenever the input had it so.
pub fn reconcile(mut dts: i64, mut pts: i64, last_dts: Option<i64>) -> (i64, i64) {
    let min_dts = last_dts.map_or(1, |last| last.saturating_add(1));

    if dts > pts {
        // Collapse an inverted pair onto the median of {pts, dts, min_dts}.
        let lo = pts.min(dts).min(min_dts);
        let hi = pts.max(dts).max(min_dts);
        let median = (pts as i128 + dts as i128 + min_dts as i128 - lo as i128 - hi as i128) as i64;
        dts = median;
        pts = median;
    }

    if last_dts.is_some() && dts < min_dts {
        if pts >= dts && pts < min_dts {
            pts = min_dts;
        }
        dts = min_dts;
    }

    (dts, pts)
}

#[derive(Debug)]
struct PendingSample {
    dts: i64,
    cts_offset: i64,
    is_keyframe: bool,
    data: Bytes,
}

/// Muxing state of one track.
#[derive(Debug)]
pub struct Track {
    index: usize,
    codec: String,
    entry: SampleEntry,
    fields: TrackFields,
    timescale: u32,
    tables: SampleTables,
    last_dts: Option<i64>,
    pending: Option<PendingSample>,
}

impl Track {
    /// Create track number `index` (0-based) from a descriptor.
    pub fn new(index: usize, descriptor: &dyn CodecDescriptor, timescale: u32) -> Self {
        Self {
            index,
            codec: descriptor.codec_name().to_string(),
            entry: descriptor.sample_entry(),
            fields: descriptor.track_fields(),
            timescale,
            tables: SampleTables::new(descriptor.is_video()),
            last_dts: None,
            pending: None,
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn codec(&self) -> &str {
        &self.codec
    }

    pub fn timescale(&self) -> u32 {
        self.timescale
    }

    pub fn tables(&self) -> &SampleTables {
        &self.tables
    }

    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Sum of committed durations, in track ticks.
    pub fn duration(&self) -> u64 {
        self.tables.stts.total_duration()
    }

    /// Reconciled decode time of the most recent sample.
    pub fn last_dts(&self) -> Option<i64> {
        self.last_dts
    }

    /// Accept a sample, committing the previously pending one.
    ///
    /// If the pending sample cannot be committed the new sample is rejected
    /// and the track is left as it was. An I/O error from `writer` may still
    /// have left part of the payload in the media data.
    pub fn submit(&mut self, packet: Packet, writer: &mut dyn SampleWriter) -> Result<()> {
        let nominal_dts = packet.time.to_ticks(self.timescale);
        let offset = packet
            .composition_offset
            .map_or(0, |o| o.to_ticks(self.timescale));
        let nominal_pts = nominal_dts.saturating_add(offset);

        let (dts, pts) = reconcile(nominal_dts, nominal_pts, self.last_dts);
        if (dts, pts) != (nominal_dts, nominal_pts) {
            tracing::debug!(
                track = self.index,
                nominal_dts,
                nominal_pts,
                dts,
                pts,
                "Adjusted sample timestamps"
            );
        }

        if let Some(pending) = self.pending.take() {
            let duration = dts.saturating_sub(pending.dts);
            if let Err(e) = self.commit(&pending, duration, writer) {
                self.pending = Some(pending);
                return Err(e);
            }
        }

        self.last_dts = Some(dts);
        self.pending = Some(PendingSample {
            dts,
            cts_offset: pts.saturating_sub(dts),
            is_keyframe: packet.is_keyframe,
            data: packet.data,
        });
        Ok(())
    }

    /// Commit the pending sample, if any, with a zero duration.
    pub fn finalize(&mut self, writer: &mut dyn SampleWriter) -> Result<()> {
        if let Some(pending) = self.pending.take() {
            if let Err(e) = self.commit(&pending, 0, writer) {
                self.pending = Some(pending);
                return Err(e);
            }
        }
        tracing::debug!(
            track = self.index,
            codec = %self.codec,
            samples = self.tables.sample_count(),
            duration = self.duration(),
            "Track finalized"
        );
        Ok(())
    }

    fn commit(
        &mut self,
        sample: &PendingSample,
        duration: i64,
        writer: &mut dyn SampleWriter,
    ) -> Result<()> {
        let track = self.index;
        let delta = u32::try_from(duration)
            .map_err(|_| Error::DurationOverflow { track, delta: duration })?;
        let size = u32::try_from(sample.data.len()).map_err(|_| {
            Error::invalid_box(
                FourCc::STSZ,
                format!("sample of {} bytes", sample.data.len()),
            )
            .in_track(track)
        })?;

        let cts = i32::try_from(sample.cts_offset).map_err(|_| Error::DurationOverflow {
            track,
            delta: sample.cts_offset,
        })?;

        let offset = writer.append(&sample.data).map_err(|e| e.in_track(track))?;

        self.tables.stsz.push(size);
        self.tables.stco.offsets.push(offset);
        self.tables.stts.push(delta);
        if let Some(ctts) = &mut self.tables.ctts {
            ctts.push(cts);
        }
        if sample.is_keyframe {
            if let Some(stss) = &mut self.tables.stss {
                stss.sample_numbers.push(self.tables.stsz.sample_count);
            }
        }

        tracing::trace!(
            track,
            dts = sample.dts,
            duration,
            offset,
            size,
            keyframe = sample.is_keyframe,
            "Committed sample"
        );
        Ok(())
    }

    /// Write chunk offsets as 64-bit entries.
    pub fn use_64bit_offsets(&mut self) {
        self.tables.stco.is_64bit = true;
    }

    /// Build the `trak` box for this finalized track.
    pub fn into_trak(self, track_id: u32, movie_timescale: u32) -> Result<Trak> {
        if self.pending.is_some() {
            return Err(
                Error::invalid_box(FourCc::TRAK, "track has a pending sample").in_track(self.index),
            );
        }
        self.tables
            .check_consistency()
            .map_err(|e| e.in_track(self.index))?;

        let media_duration = self.duration();
        let fields = self.fields;
        let SampleTables {
            stts,
            ctts,
            stss,
            stsz,
            stco,
        } = self.tables;

        Ok(Trak {
            tkhd: Tkhd {
                flags: Tkhd::FLAGS_ENABLED_IN_MOVIE,
                track_id,
                duration: rescale(media_duration, self.timescale, movie_timescale),
                layer: 0,
                alternate_group: fields.alternate_group,
                volume: fields.volume,
                matrix: IDENTITY_MATRIX,
                width: fields.width,
                height: fields.height,
            },
            mdia: Mdia {
                mdhd: Mdhd::new(self.timescale, media_duration),
                hdlr: Hdlr {
                    handler_type: fields.handler_type,
                    name: fields.handler_name,
                },
                minf: Minf {
                    media_header: Some(fields.media_header),
                    dinf: Dinf::default(),
                    stbl: Stbl {
                        stsd: Stsd::new(self.entry),
                        stts,
                        ctts,
                        stss,
                        stsc: Stsc::one_sample_per_chunk(),
                        stsz,
                        stco,
                    },
                },
            },
        })
    }
}
