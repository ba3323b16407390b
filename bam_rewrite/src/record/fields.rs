// Fields enum, used to address fields of a BAM record held as raw bytes
// (everything after `block_size`).
use crate::error::DecodeError;
use crate::record::tags;
use crate::{U16_SIZE, U32_SIZE, U8_SIZE};
use byteorder::{ByteOrder, LittleEndian};
use std::ops::Range;

// To avoid visual clutter (no need to write Fields::* each time).
use self::Fields::*;

/// Size of the fixed part of a record, the read name starts right after it.
pub const FIXED_SIZE: usize = 32;

/// Fields of a BAM record.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum Fields {
    #[allow(clippy::upper_case_acronyms)]
    RefID,
    Pos,
    LName,
    Mapq,
    Bin,
    NCigar,
    Flags,
    SequenceLength,
    #[allow(clippy::upper_case_acronyms)]
    NextRefID,
    NextPos,
    TemplateLength,
    ReadName,
    RawCigar,
    RawSequence,
    RawQual,
    RawTags,
}

impl Fields {
    pub fn name(&self) -> &'static str {
        match self {
            RefID => "refID",
            Pos => "pos",
            LName => "l_read_name",
            Mapq => "mapq",
            Bin => "bin",
            NCigar => "n_cigar_op",
            Flags => "flag",
            SequenceLength => "l_seq",
            NextRefID => "next_refID",
            NextPos => "next_pos",
            TemplateLength => "tlen",
            ReadName => "read_name",
            RawCigar => "cigar",
            RawSequence => "seq",
            RawQual => "qual",
            RawTags => "tags",
        }
    }
}

fn l_read_name(data: &[u8]) -> usize {
    data[8] as usize
}

fn n_cigar_op(data: &[u8]) -> usize {
    LittleEndian::read_u16(&data[12..14]) as usize
}

fn l_seq(data: &[u8]) -> usize {
    LittleEndian::read_u32(&data[16..20]) as usize
}

/// Calculates actual size of variable length field in bytes.
fn var_field_len(data: &[u8], field: Fields) -> usize {
    match field {
        ReadName => l_read_name(data),
        RawCigar => U32_SIZE * n_cigar_op(data),
        RawSequence => (l_seq(data) + 1) / 2,
        RawQual => l_seq(data),
        _ => 0,
    }
}

fn var_field_offset(data: &[u8], field: Fields) -> usize {
    match field {
        ReadName => FIXED_SIZE,
        RawCigar => FIXED_SIZE + var_field_len(data, ReadName),
        RawSequence => var_field_offset(data, RawCigar) + var_field_len(data, RawCigar),
        RawQual => var_field_offset(data, RawSequence) + var_field_len(data, RawSequence),
        RawTags => var_field_offset(data, RawQual) + var_field_len(data, RawQual),
        _ => unreachable!("{} is a fixed size field", field.name()),
    }
}

/// Byte range the field occupies. The record must have been validated.
pub fn field_range(data: &[u8], field: Fields) -> Range<usize> {
    let fixed = |offset: usize, len: usize| offset..offset + len;
    match field {
        RefID => fixed(0, U32_SIZE),
        Pos => fixed(4, U32_SIZE),
        LName => fixed(8, U8_SIZE),
        Mapq => fixed(9, U8_SIZE),
        Bin => fixed(10, U16_SIZE),
        NCigar => fixed(12, U16_SIZE),
        Flags => fixed(14, U16_SIZE),
        SequenceLength => fixed(16, U32_SIZE),
        NextRefID => fixed(20, U32_SIZE),
        NextPos => fixed(24, U32_SIZE),
        TemplateLength => fixed(28, U32_SIZE),
        RawTags => var_field_offset(data, RawTags)..data.len(),
        _ => {
            let offset = var_field_offset(data, field);
            offset..offset + var_field_len(data, field)
        }
    }
}

/// Returns bytes of specified field. The record must have been validated.
pub fn get_bytes(data: &[u8], field: Fields) -> &[u8] {
    &data[field_range(data, field)]
}

pub fn read_i32(data: &[u8], field: Fields) -> i32 {
    LittleEndian::read_i32(get_bytes(data, field))
}

pub fn write_i32(data: &mut [u8], field: Fields, value: i32) {
    let range = field_range(data, field);
    LittleEndian::write_i32(&mut data[range], value);
}

pub fn read_u16(data: &[u8], field: Fields) -> u16 {
    LittleEndian::read_u16(get_bytes(data, field))
}

pub fn write_u16(data: &mut [u8], field: Fields, value: u16) {
    let range = field_range(data, field);
    LittleEndian::write_u16(&mut data[range], value);
}

/// Checks that every field lies inside the record and that the auxiliary
/// data can be walked to its end. Accessors above rely on this.
pub fn validate(data: &[u8]) -> Result<(), DecodeError> {
    if data.len() < FIXED_SIZE {
        return Err(DecodeError::TooShort {
            len: data.len(),
            min: FIXED_SIZE,
        });
    }
    let name_len = l_read_name(data);
    if name_len == 0 {
        return Err(DecodeError::InvalidReadName("empty"));
    }
    for field in [ReadName, RawCigar, RawSequence, RawQual] {
        let end = var_field_offset(data, field) + var_field_len(data, field);
        if end > data.len() {
            return Err(DecodeError::FieldOverflow {
                field: field.name(),
                end,
                len: data.len(),
            });
        }
    }
    if data[FIXED_SIZE + name_len - 1] != 0 {
        return Err(DecodeError::InvalidReadName("not NUL terminated"));
    }
    let tags_start = var_field_offset(data, RawTags);
    tags::validate(&data[tags_start..]).map_err(|e| match e {
        DecodeError::InvalidTag { offset, reason } => DecodeError::InvalidTag {
            offset: offset + tags_start,
            reason,
        },
        e => e,
    })
}
