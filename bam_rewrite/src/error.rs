//! Error taxonomy of the pipeline.
//!
//! Only conditions that abort a lane are errors. A full rewrite buffer or a
//! group without both mates is ordinary control flow and never shows up here.

use crate::parse_buffer::ParseBuffer;
use crate::rewrite_buffer::RewriteBuffer;

/// Crate wide result alias.
pub type Result<T> = std::result::Result<T, PipelineError>;

/// A complete frame whose bytes are not a valid record.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// Fewer bytes than the fixed part of a record.
    #[error("record is {len} bytes long, at least {min} expected")]
    TooShort { len: usize, min: usize },

    /// Length prefix disagrees with the frame it was found in.
    #[error("block_size field says {declared} bytes, frame holds {actual}")]
    BlockSizeMismatch { declared: usize, actual: usize },

    /// Read name is empty or not NUL terminated.
    #[error("invalid read name: {0}")]
    InvalidReadName(&'static str),

    /// A variable sized field runs past the end of the record.
    #[error("field {field} ends at byte {end}, record holds {len}")]
    FieldOverflow {
        field: &'static str,
        end: usize,
        len: usize,
    },

    /// Auxiliary data could not be walked.
    #[error("invalid tag data at offset {offset}: {reason}")]
    InvalidTag { offset: usize, reason: String },

    /// Text record column is missing or unparsable.
    #[error("invalid SAM column {column}: {reason}")]
    InvalidColumn { column: &'static str, reason: String },
}

/// Invalid configuration.
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("invalid value for '{parameter}': {reason}")]
    InvalidParameter {
        parameter: &'static str,
        reason: String,
    },

    #[error("failed to read configuration: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse configuration: {0}")]
    Json(#[from] serde_json::Error),
}

/// Fatal pipeline errors.
#[derive(thiserror::Error, Debug)]
pub enum PipelineError {
    /// Stream ended inside a length prefixed frame.
    #[error("stream truncated inside a frame at offset {offset}: {missing} more bytes expected")]
    TruncatedFrame { offset: u64, missing: usize },

    /// A complete frame could not be decoded.
    #[error("failed to decode frame {frame}: {source}")]
    Decode {
        frame: usize,
        #[source]
        source: DecodeError,
    },

    /// A record that does not fit an empty rewrite buffer can never be written.
    #[error("record of {size} bytes does not fit into an empty rewrite buffer of {capacity} bytes")]
    RecordTooLarge { size: usize, capacity: usize },

    /// Header of the input could not be parsed.
    #[error("invalid header: {0}")]
    InvalidHeader(String),

    /// Error raised inside a particular lane.
    #[error("lane {lane} failed: {source}")]
    Lane {
        lane: usize,
        #[source]
        source: Box<PipelineError>,
    },

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl PipelineError {
    /// Wraps this error into a lane error unless it already is one.
    pub fn in_lane(self, lane: usize) -> Self {
        match self {
            e @ PipelineError::Lane { .. } => e,
            e => PipelineError::Lane {
                lane,
                source: Box::new(e),
            },
        }
    }

    /// True if the error comes from malformed input rather than the environment.
    pub fn is_malformed_input(&self) -> bool {
        match self {
            PipelineError::TruncatedFrame { .. }
            | PipelineError::Decode { .. }
            | PipelineError::InvalidHeader(_) => true,
            PipelineError::Lane { source, .. } => source.is_malformed_input(),
            _ => false,
        }
    }
}

/// Fatal outcome of a dispatch. The buffers travel with the error so nothing
/// held in them is lost and they can be inspected by the orchestrator.
#[derive(Debug)]
pub struct DispatchFailure {
    pub error: PipelineError,
    pub parse: ParseBuffer,
    pub rewrite: RewriteBuffer,
}

impl std::fmt::Display for DispatchFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} (parse buffer {} holds {} live and {} stashed records)",
            self.error,
            self.parse.id(),
            self.parse.live_len(),
            self.parse.stash_len()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lane_wrapping_is_not_nested() {
        let err = PipelineError::TruncatedFrame {
            offset: 10,
            missing: 3,
        }
        .in_lane(2)
        .in_lane(5);
        let msg = format!("{}", err);
        assert!(msg.starts_with("lane 2 failed"));
        assert!(err.is_malformed_input());
    }

    #[test]
    fn test_decode_error_message() {
        let err = PipelineError::Decode {
            frame: 4,
            source: DecodeError::TooShort { len: 3, min: 32 },
        };
        let msg = format!("{}", err);
        assert!(msg.contains("frame 4"));
        assert!(msg.contains("at least 32"));
    }

    #[test]
    fn test_io_is_not_malformed_input() {
        let err: PipelineError = std::io::Error::from(std::io::ErrorKind::BrokenPipe).into();
        assert!(!err.is_malformed_input());
    }
}
