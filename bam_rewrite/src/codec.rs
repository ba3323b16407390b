//! Physical encodings of a record. Records are always held in BAM binary
//! form; a codec turns a frame into that form and back.

mod sam;

use crate::error::DecodeError;
use crate::frame::Framing;
use crate::record::Record;
use crate::U32_SIZE;
use byteorder::{ByteOrder, LittleEndian, WriteBytesExt};
use serde::{Deserialize, Serialize};

pub use sam::SamCodec;

/// Record encoding of a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Format {
    Bam,
    Sam,
}

impl Format {
    pub fn extension(self) -> &'static str {
        match self {
            Format::Bam => "bam",
            Format::Sam => "sam",
        }
    }
}

pub trait RecordCodec: Send + Sync {
    fn format(&self) -> Format;

    /// How frames of this encoding are delimited in a stream.
    fn framing(&self) -> Framing;

    /// Loads the record held in `frame` into `rec`. Must fail, never panic, on
    /// malformed bytes.
    fn decode(&self, frame: &[u8], rec: &mut Record) -> Result<(), DecodeError>;

    /// Appends one frame holding `rec` to `out`.
    fn encode(&self, rec: &Record, out: &mut Vec<u8>);
}

/// BAM records: `block_size` followed by the record itself.
#[derive(Debug, Clone, Copy, Default)]
pub struct BamCodec;

impl RecordCodec for BamCodec {
    fn format(&self) -> Format {
        Format::Bam
    }

    fn framing(&self) -> Framing {
        Framing::LengthPrefixed
    }

    fn decode(&self, frame: &[u8], rec: &mut Record) -> Result<(), DecodeError> {
        if frame.len() < U32_SIZE {
            return Err(DecodeError::TooShort {
                len: frame.len(),
                min: U32_SIZE,
            });
        }
        let declared = LittleEndian::read_u32(frame) as usize;
        let actual = frame.len() - U32_SIZE;
        if declared != actual {
            return Err(DecodeError::BlockSizeMismatch { declared, actual });
        }
        rec.load(&frame[U32_SIZE..])
    }

    fn encode(&self, rec: &Record, out: &mut Vec<u8>) {
        // Writes into a Vec cannot fail.
        let _ = out.write_u32::<LittleEndian>(rec.len() as u32);
        out.extend_from_slice(rec.data());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::builder::RecordBuilder;
    use crate::record::SlotId;

    #[test]
    fn test_bam_decode_encode() {
        let frame = RecordBuilder::new("read1")
            .ref_id(0)
            .pos(10)
            .cigar("2M")
            .seq("AC")
            .build_frame();
        let mut rec = Record::with_slot(SlotId(0));
        BamCodec.decode(&frame, &mut rec).unwrap();
        assert_eq!(rec.group_key(), b"read1");
        let mut out = Vec::new();
        BamCodec.encode(&rec, &mut out);
        assert_eq!(out, frame);
    }

    #[test]
    fn test_bam_block_size_mismatch() {
        let mut frame = RecordBuilder::new("r").build_frame();
        frame.push(0);
        let mut rec = Record::with_slot(SlotId(0));
        assert!(matches!(
            BamCodec.decode(&frame, &mut rec),
            Err(DecodeError::BlockSizeMismatch { .. })
        ));
        assert!(matches!(
            BamCodec.decode(&[1, 0], &mut rec),
            Err(DecodeError::TooShort { len: 2, min: 4 })
        ));
    }
}
