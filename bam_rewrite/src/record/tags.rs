// https://github.com/pezmaster31/bamtools/blob/2391b1a1275816ad89c624586fa02b1a621924f5/src/api/internal/bam/BamReader_p.cpp

use crate::error::DecodeError;
use crate::{U16_SIZE, U32_SIZE, U8_SIZE};
use byteorder::{ByteOrder, LittleEndian, WriteBytesExt};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagType {
    /// Char
    A,
    /// Byte array
    B,
    /// u8
    C,
    /// i8
    #[allow(non_camel_case_types)]
    c,
    /// float
    #[allow(non_camel_case_types)]
    f,
    /// Null-terminated HEX string
    H,
    /// u32
    I,
    /// i32
    #[allow(non_camel_case_types)]
    i,
    /// u16
    S,
    /// i16
    #[allow(non_camel_case_types)]
    s,
    /// Null-terminated char string
    Z,
}

impl TagType {
    pub fn from_code(c: u8) -> Option<TagType> {
        match c {
            b'A' => Some(TagType::A),
            b'B' => Some(TagType::B),
            b'C' => Some(TagType::C),
            b'c' => Some(TagType::c),
            b'f' => Some(TagType::f),
            b'H' => Some(TagType::H),
            b'i' => Some(TagType::i),
            b'I' => Some(TagType::I),
            b'S' => Some(TagType::S),
            b's' => Some(TagType::s),
            b'Z' => Some(TagType::Z),
            _ => None,
        }
    }

    pub fn code(self) -> u8 {
        match self {
            TagType::A => b'A',
            TagType::B => b'B',
            TagType::C => b'C',
            TagType::c => b'c',
            TagType::f => b'f',
            TagType::H => b'H',
            TagType::I => b'I',
            TagType::i => b'i',
            TagType::S => b'S',
            TagType::s => b's',
            TagType::Z => b'Z',
        }
    }

    /// Size of a single value, `None` for variable sized types.
    pub fn item_size(self) -> Option<usize> {
        match self {
            TagType::C | TagType::c | TagType::A => Some(U8_SIZE),
            TagType::S | TagType::s => Some(U16_SIZE),
            TagType::I | TagType::i | TagType::f => Some(U32_SIZE),
            _ => None,
        }
    }
}

/// One auxiliary field. `value` excludes the type byte; for `B` arrays it
/// starts with the subtype and the element count.
#[derive(Debug, Clone, Copy)]
pub struct Tag<'a> {
    pub name: [u8; 2],
    pub ty: TagType,
    pub value: &'a [u8],
}

impl<'a> Tag<'a> {
    /// Integer value of the tag, for integer and char types.
    pub fn as_int(&self) -> Option<i64> {
        let v = self.value;
        let val = match self.ty {
            TagType::A | TagType::C => v[0] as i64,
            TagType::c => v[0] as i8 as i64,
            TagType::s => LittleEndian::read_i16(v) as i64,
            TagType::S => LittleEndian::read_u16(v) as i64,
            TagType::i => LittleEndian::read_i32(v) as i64,
            TagType::I => LittleEndian::read_u32(v) as i64,
            _ => return None,
        };
        Some(val)
    }

    /// String value without the terminating NUL.
    pub fn as_str_bytes(&self) -> Option<&'a [u8]> {
        match self.ty {
            TagType::Z | TagType::H => Some(&self.value[..self.value.len() - 1]),
            _ => None,
        }
    }
}

/// Returns type and full length (type byte included) of the value starting
/// at `data[0]`.
fn value_len(data: &[u8]) -> Result<(TagType, usize), String> {
    let code = *data.first().ok_or("missing tag type")?;
    let tag_type =
        TagType::from_code(code).ok_or_else(|| format!("unknown tag type <{}>", code as char))?;
    let len = match tag_type {
        TagType::B => {
            if data.len() < U8_SIZE + U8_SIZE + U32_SIZE {
                return Err("truncated array header".to_string());
            }
            let sub = TagType::from_code(data[1])
                .ok_or_else(|| format!("unknown array subtype <{}>", data[1] as char))?;
            let item_size = sub
                .item_size()
                .ok_or_else(|| format!("invalid array subtype <{}>", data[1] as char))?;
            let count = LittleEndian::read_u32(&data[2..6]) as usize;
            // tag type + item type + byte count + len_in_bytes
            U8_SIZE + U8_SIZE + U32_SIZE + count * item_size
        }
        TagType::Z | TagType::H => match memchr::memchr(0, &data[1..]) {
            Some(nul) => U8_SIZE + nul + 1,
            None => return Err("string is not NUL terminated".to_string()),
        },
        _ => U8_SIZE + tag_type.item_size().unwrap_or_default(),
    };
    if len > data.len() {
        return Err(format!("value needs {} bytes, {} left", len, data.len()));
    }
    Ok((tag_type, len))
}

/// Walks the auxiliary data once and reports the first malformed entry.
pub fn validate(aux: &[u8]) -> Result<(), DecodeError> {
    let mut idx = 0;
    while idx < aux.len() {
        if idx + U16_SIZE >= aux.len() {
            return Err(DecodeError::InvalidTag {
                offset: idx,
                reason: "truncated tag".to_string(),
            });
        }
        let (_, len) = value_len(&aux[idx + U16_SIZE..])
            .map_err(|reason| DecodeError::InvalidTag { offset: idx, reason })?;
        idx += U16_SIZE + len;
    }
    Ok(())
}

/// Iterator over validated auxiliary data.
pub struct Tags<'a> {
    aux: &'a [u8],
    idx: usize,
}

impl<'a> Iterator for Tags<'a> {
    type Item = Tag<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.idx + U16_SIZE >= self.aux.len() {
            return None;
        }
        let name = [self.aux[self.idx], self.aux[self.idx + 1]];
        let (ty, len) = value_len(&self.aux[self.idx + U16_SIZE..]).ok()?;
        let start = self.idx + U16_SIZE + U8_SIZE;
        let value = &self.aux[start..self.idx + U16_SIZE + len];
        self.idx += U16_SIZE + len;
        Some(Tag { name, ty, value })
    }
}

pub fn iter(aux: &[u8]) -> Tags<'_> {
    Tags { aux, idx: 0 }
}

pub fn get_tag<'a>(aux: &'a [u8], name: &[u8; 2]) -> Option<Tag<'a>> {
    iter(aux).find(|t| &t.name == name)
}

/// Removes every occurrence of the given tags from the auxiliary data which
/// starts at `aux_start` and runs to the end of `data`.
pub fn remove_tags(data: &mut Vec<u8>, aux_start: usize, names: &[[u8; 2]]) {
    let mut read = aux_start;
    let mut write = aux_start;
    while read + U16_SIZE < data.len() {
        let len = match value_len(&data[read + U16_SIZE..]) {
            Ok((_, len)) => U16_SIZE + len,
            Err(_) => break,
        };
        let name = [data[read], data[read + 1]];
        if !names.contains(&name) {
            data.copy_within(read..read + len, write);
            write += len;
        }
        read += len;
    }
    data.truncate(write);
}

/// Bytes `push_int` appends for `value`.
pub fn int_tag_size(value: i64) -> usize {
    U16_SIZE + U8_SIZE + smallest_int_type(value).item_size().unwrap_or(U32_SIZE)
}

fn smallest_int_type(value: i64) -> TagType {
    if value < 0 {
        if value >= i8::MIN as i64 {
            TagType::c
        } else if value >= i16::MIN as i64 {
            TagType::s
        } else {
            TagType::i
        }
    } else if value <= u8::MAX as i64 {
        TagType::C
    } else if value <= u16::MAX as i64 {
        TagType::S
    } else if value <= i32::MAX as i64 {
        TagType::i
    } else {
        TagType::I
    }
}

/// Appends an integer tag using the smallest type that holds the value.
pub fn push_int(buf: &mut Vec<u8>, name: &[u8; 2], value: i64) {
    let ty = smallest_int_type(value);
    buf.extend_from_slice(name);
    buf.push(ty.code());
    // Writes into a Vec cannot fail.
    let _ = match ty {
        TagType::c => buf.write_i8(value as i8),
        TagType::C => buf.write_u8(value as u8),
        TagType::s => buf.write_i16::<LittleEndian>(value as i16),
        TagType::S => buf.write_u16::<LittleEndian>(value as u16),
        TagType::i => buf.write_i32::<LittleEndian>(value as i32),
        _ => buf.write_u32::<LittleEndian>(value as u32),
    };
}

/// Appends a NUL terminated string tag.
pub fn push_string(buf: &mut Vec<u8>, name: &[u8; 2], value: &[u8]) {
    buf.extend_from_slice(name);
    buf.push(b'Z');
    buf.extend_from_slice(value);
    buf.push(0);
}
