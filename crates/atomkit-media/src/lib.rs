//! Atomkit-Media: ISO BMFF box codec and MP4 multiplexer
//!
//! This crate reads and writes the box (atom) tree of MP4 files and assembles
//! already-encoded audio/video samples into a seekable, playable MP4.
//!
//! # Modules
//!
//! - `atom` - Generic box codec (bounded readers, size patch-back writers, raw trees)
//! - `boxes` - Typed movie metadata boxes (moov, trak, stbl, ...)
//! - `sample_entry` - Sample descriptions (stsd with avc1/avcC and mp4a/esds)
//! - `codec` - Track descriptors the muxer consumes
//! - `track` - Per-track sample table accumulation and timestamp reconciliation
//! - `muxer` - Header/packet/trailer lifecycle producing `[ftyp] mdat moov`
//! - `reader` - Parses a finished file back into its movie tree and samples
//!
//! # Layout
//!
//! The muxer reserves a 64-bit `mdat` header up front, streams sample payloads
//! behind it, and on the trailer patches the `mdat` length and appends `moov`:
//!
//! 1. `write_header` - one track per descriptor, wide `mdat` placeholder
//! 2. `write_packet` - one pending sample per track, committed when the next arrives
//! 3. `write_trailer` - flush pending samples, patch `mdat`, append `moov`

pub mod atom;
pub mod boxes;
pub mod codec;
pub mod error;
pub mod muxer;
pub mod reader;
pub mod sample_entry;
pub mod time;
pub mod track;

pub use atom::{Atom, BoxHeader, BoxReader, BoxWriter, FourCc};
pub use codec::{AacDescriptor, AvcDescriptor, CodecDescriptor, TrackFields};
pub use error::{Error, Result};
pub use muxer::{Muxer, MuxerConfig, Packet};
pub use reader::{Mp4File, Mp4Track, SampleInfo};
pub use sample_entry::{AudioSampleEntry, SampleEntry, Stsd, VisualSampleEntry};
pub use time::Timestamp;
pub use track::{SampleTables, SampleWriter, Track};
