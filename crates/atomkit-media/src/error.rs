//! Error types for atomkit-media.

use crate::atom::FourCc;
use std::io;
use thiserror::Error;

/// Result type for atomkit-media operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for atomkit-media operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error from the underlying reader or sink.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Malformed box header or payload.
    #[error("Invalid box {box_type}: {reason}")]
    InvalidBox { box_type: FourCc, reason: String },

    /// A box payload ended before a field could be read.
    #[error("Unexpected end of data in box {box_type}")]
    UnexpectedEof { box_type: FourCc },

    /// A box opened with a 32-bit header grew past the 32-bit range.
    #[error("Box {box_type} is {size} bytes, too large for a 32-bit header")]
    BoxTooLarge { box_type: FourCc, size: u64 },

    /// Missing required box while decoding a movie tree.
    #[error("Missing required box: {0}")]
    MissingBox(&'static str),

    /// Track descriptor is neither video nor audio.
    #[error("Unsupported media kind: {codec}")]
    UnsupportedMediaKind { codec: String },

    /// A sample duration or composition offset does not fit its table field.
    #[error("Track {track}: tick delta {delta} does not fit in a sample table entry")]
    DurationOverflow { track: usize, delta: i64 },

    /// Error raised while handling a specific track.
    #[error("Track {track}: {source}")]
    Track {
        track: usize,
        #[source]
        source: Box<Error>,
    },

    /// Packet or trailer written before the header.
    #[error("Muxer header has not been written")]
    HeaderNotWritten,

    /// Header written twice.
    #[error("Muxer header has already been written")]
    HeaderAlreadyWritten,

    /// Any write after the trailer.
    #[error("Muxer is already finished")]
    Finished,
}

impl Error {
    /// Create an invalid box error.
    pub fn invalid_box(box_type: FourCc, reason: impl Into<String>) -> Self {
        Self::InvalidBox {
            box_type,
            reason: reason.into(),
        }
    }

    /// Attach a track index to this error.
    pub fn in_track(self, track: usize) -> Self {
        Self::Track {
            track,
            source: Box::new(self),
        }
    }
}
