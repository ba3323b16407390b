use super::{Format, RecordCodec};
use crate::error::DecodeError;
use crate::frame::Framing;
use crate::reader::Header;
use crate::record::builder::{decode_base, RecordBuilder};
use crate::record::tags::{self, TagType};
use crate::record::{cigar, Flags, Record};
use byteorder::{ByteOrder, LittleEndian, WriteBytesExt};
use std::fmt::Write;
use std::str::FromStr;
use std::sync::Arc;

const MAX_READ_NAME_LEN: usize = 254;
const QUAL_OFFSET: u8 = 33;

/// SAM text records, one per line. Reference names are resolved against the
/// header the stream started with.
#[derive(Debug, Clone)]
pub struct SamCodec {
    header: Arc<Header>,
}

impl SamCodec {
    pub fn new(header: Arc<Header>) -> Self {
        SamCodec { header }
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    fn ref_id(&self, name: &[u8], column: &'static str) -> Result<i32, DecodeError> {
        if name == b"*" {
            return Ok(-1);
        }
        let name = utf8(name, column)?;
        self.header
            .ref_id(name)
            .ok_or_else(|| invalid(column, format!("unknown reference '{}'", name)))
    }

    fn ref_name(&self, id: i32) -> &str {
        self.header.ref_name(id).unwrap_or("*")
    }
}

fn invalid(column: &'static str, reason: String) -> DecodeError {
    DecodeError::InvalidColumn { column, reason }
}

fn utf8<'a>(bytes: &'a [u8], column: &'static str) -> Result<&'a str, DecodeError> {
    std::str::from_utf8(bytes).map_err(|e| invalid(column, e.to_string()))
}

fn number<T>(bytes: &[u8], column: &'static str) -> Result<T, DecodeError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    utf8(bytes, column)?
        .parse::<T>()
        .map_err(|e| invalid(column, e.to_string()))
}

/// Parses a 1-based SAM position into the 0-based BAM one. 0 means unset.
fn position(bytes: &[u8], column: &'static str) -> Result<i32, DecodeError> {
    let pos: i32 = number(bytes, column)?;
    if pos < 0 {
        return Err(invalid(column, format!("position {} is negative", pos)));
    }
    Ok(pos - 1)
}

fn next_column<'a, I>(columns: &mut I, column: &'static str) -> Result<&'a [u8], DecodeError>
where
    I: Iterator<Item = &'a [u8]>,
{
    columns
        .next()
        .ok_or_else(|| invalid(column, "missing".to_string()))
}

impl RecordCodec for SamCodec {
    fn format(&self) -> Format {
        Format::Sam
    }

    fn framing(&self) -> Framing {
        Framing::Delimited(b'\n')
    }

    fn decode(&self, frame: &[u8], rec: &mut Record) -> Result<(), DecodeError> {
        let line = frame.strip_suffix(b"\n").unwrap_or(frame);
        let line = line.strip_suffix(b"\r").unwrap_or(line);
        let mut columns = line.split(|&b| b == b'\t');

        let qname = next_column(&mut columns, "QNAME")?;
        if qname.is_empty() || qname.len() > MAX_READ_NAME_LEN {
            return Err(invalid("QNAME", format!("length {} out of range", qname.len())));
        }
        let flags = Flags::from_bits_retain(number(next_column(&mut columns, "FLAG")?, "FLAG")?);
        let ref_id = self.ref_id(next_column(&mut columns, "RNAME")?, "RNAME")?;
        let pos = position(next_column(&mut columns, "POS")?, "POS")?;
        let mapq: u8 = number(next_column(&mut columns, "MAPQ")?, "MAPQ")?;
        let cigar_ops = cigar::parse(utf8(next_column(&mut columns, "CIGAR")?, "CIGAR")?)
            .map_err(|reason| invalid("CIGAR", reason))?;
        let rnext = next_column(&mut columns, "RNEXT")?;
        let next_ref_id = if rnext == b"=" {
            ref_id
        } else {
            self.ref_id(rnext, "RNEXT")?
        };
        let next_pos = position(next_column(&mut columns, "PNEXT")?, "PNEXT")?;
        let tlen: i32 = number(next_column(&mut columns, "TLEN")?, "TLEN")?;
        let seq = utf8(next_column(&mut columns, "SEQ")?, "SEQ")?;
        let qual = next_column(&mut columns, "QUAL")?;

        let mut builder = RecordBuilder::from_name_bytes(qname)
            .flags(flags)
            .ref_id(ref_id)
            .pos(pos)
            .mapq(mapq)
            .cigar_ops(cigar_ops)
            .seq(seq)
            .mate(next_ref_id, next_pos)
            .tlen(tlen);
        if qual != b"*" {
            let seq_len = if seq == "*" { 0 } else { seq.len() };
            if qual.len() != seq_len {
                return Err(invalid(
                    "QUAL",
                    format!("{} qualities for {} bases", qual.len(), seq_len),
                ));
            }
            if qual.iter().any(|&q| q < QUAL_OFFSET) {
                return Err(invalid("QUAL", "quality below '!'".to_string()));
            }
            let phred: Vec<u8> = qual.iter().map(|q| q - QUAL_OFFSET).collect();
            builder = builder.qual(&phred);
        }

        let mut aux = Vec::new();
        for field in columns {
            parse_tag(field, &mut aux)?;
        }
        builder = builder.raw_aux(&aux);

        let buf = rec.buffer_mut();
        buf.clear();
        builder.write_into(buf);
        rec.finish_load()
    }

    fn encode(&self, rec: &Record, out: &mut Vec<u8>) {
        let mut line = String::with_capacity(rec.len() * 2);
        line.push_str(&String::from_utf8_lossy(rec.group_key()));
        let ref_id = rec.ref_id();
        let next_ref_id = rec.next_ref_id();
        let rnext = if next_ref_id >= 0 && next_ref_id == ref_id {
            "="
        } else {
            self.ref_name(next_ref_id)
        };
        let _ = write!(
            line,
            "\t{}\t{}\t{}\t{}\t",
            rec.flags().bits(),
            self.ref_name(ref_id),
            rec.pos() as i64 + 1,
            rec.mapq()
        );
        cigar::format(rec.raw_cigar(), &mut line);
        let _ = write!(line, "\t{}\t{}\t{}\t", rnext, rec.next_pos() as i64 + 1, rec.template_length());

        let seq_len = rec.sequence_len();
        if seq_len == 0 {
            line.push('*');
        } else {
            let packed = rec.raw_sequence();
            for i in 0..seq_len {
                let code = if i % 2 == 0 {
                    packed[i / 2] >> 4
                } else {
                    packed[i / 2]
                };
                line.push(decode_base(code) as char);
            }
        }
        line.push('\t');
        let qual = rec.qualities();
        if qual.is_empty() || qual[0] == 0xff {
            line.push('*');
        } else {
            line.extend(qual.iter().map(|&q| (q.saturating_add(QUAL_OFFSET)) as char));
        }

        for tag in tags::iter(rec.raw_tags()) {
            line.push('\t');
            format_tag(&tag, &mut line);
        }
        line.push('\n');
        out.extend_from_slice(line.as_bytes());
    }
}

/// Parses `TAG:TYPE:VALUE` and appends its binary form to `aux`.
fn parse_tag(field: &[u8], aux: &mut Vec<u8>) -> Result<(), DecodeError> {
    const COLUMN: &str = "TAG";
    let field = utf8(field, COLUMN)?;
    let mut parts = field.splitn(3, ':');
    let (name, ty, value) = match (parts.next(), parts.next(), parts.next()) {
        (Some(name), Some(ty), Some(value)) if name.len() == 2 && ty.len() == 1 => {
            (name.as_bytes(), ty.as_bytes()[0], value)
        }
        _ => return Err(invalid(COLUMN, format!("malformed field '{}'", field))),
    };
    let name = [name[0], name[1]];
    match ty {
        b'A' if value.len() == 1 => {
            aux.extend_from_slice(&name);
            aux.push(b'A');
            aux.push(value.as_bytes()[0]);
        }
        b'i' => tags::push_int(aux, &name, number(value.as_bytes(), COLUMN)?),
        b'f' => {
            let v: f32 = number(value.as_bytes(), COLUMN)?;
            aux.extend_from_slice(&name);
            aux.push(b'f');
            let _ = aux.write_f32::<LittleEndian>(v);
        }
        b'Z' => tags::push_string(aux, &name, value.as_bytes()),
        b'H' => {
            aux.extend_from_slice(&name);
            aux.push(b'H');
            aux.extend_from_slice(value.as_bytes());
            aux.push(0);
        }
        b'B' => parse_array(&name, value, aux)?,
        _ => return Err(invalid(COLUMN, format!("unsupported field '{}'", field))),
    }
    Ok(())
}

fn parse_array(name: &[u8; 2], value: &str, aux: &mut Vec<u8>) -> Result<(), DecodeError> {
    const COLUMN: &str = "TAG";
    let mut items = value.split(',');
    let sub = items
        .next()
        .and_then(|s| s.bytes().next())
        .and_then(TagType::from_code)
        .filter(|t| t.item_size().is_some() && *t != TagType::A)
        .ok_or_else(|| invalid(COLUMN, format!("bad array subtype in '{}'", value)))?;
    let items: Vec<&str> = items.collect();

    aux.extend_from_slice(name);
    aux.push(b'B');
    aux.push(sub.code());
    let _ = aux.write_u32::<LittleEndian>(items.len() as u32);
    for item in items {
        let item = item.as_bytes();
        let _ = match sub {
            TagType::c => aux.write_i8(number(item, COLUMN)?),
            TagType::C => aux.write_u8(number(item, COLUMN)?),
            TagType::s => aux.write_i16::<LittleEndian>(number(item, COLUMN)?),
            TagType::S => aux.write_u16::<LittleEndian>(number(item, COLUMN)?),
            TagType::i => aux.write_i32::<LittleEndian>(number(item, COLUMN)?),
            TagType::I => aux.write_u32::<LittleEndian>(number(item, COLUMN)?),
            _ => aux.write_f32::<LittleEndian>(number(item, COLUMN)?),
        };
    }
    Ok(())
}

fn format_tag(tag: &tags::Tag<'_>, out: &mut String) {
    out.push(tag.name[0] as char);
    out.push(tag.name[1] as char);
    match tag.ty {
        TagType::A => {
            let _ = write!(out, ":A:{}", tag.value[0] as char);
        }
        TagType::f => {
            let _ = write!(out, ":f:{}", LittleEndian::read_f32(tag.value));
        }
        TagType::Z | TagType::H => {
            let code = tag.ty.code() as char;
            let text = tag.as_str_bytes().unwrap_or_default();
            let _ = write!(out, ":{}:{}", code, String::from_utf8_lossy(text));
        }
        TagType::B => format_array(tag.value, out),
        _ => {
            let _ = write!(out, ":i:{}", tag.as_int().unwrap_or_default());
        }
    }
}

fn format_array(value: &[u8], out: &mut String) {
    let sub = match TagType::from_code(value[0]) {
        Some(sub) => sub,
        None => return,
    };
    let size = sub.item_size().unwrap_or(1);
    let _ = write!(out, ":B:{}", sub.code() as char);
    for item in value[5..].chunks_exact(size) {
        let _ = match sub {
            TagType::c => write!(out, ",{}", item[0] as i8),
            TagType::C => write!(out, ",{}", item[0]),
            TagType::s => write!(out, ",{}", LittleEndian::read_i16(item)),
            TagType::S => write!(out, ",{}", LittleEndian::read_u16(item)),
            TagType::i => write!(out, ",{}", LittleEndian::read_i32(item)),
            TagType::I => write!(out, ",{}", LittleEndian::read_u32(item)),
            _ => write!(out, ",{}", LittleEndian::read_f32(item)),
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::SlotId;

    fn codec() -> SamCodec {
        let header =
            Header::from_sam_text("@SQ\tSN:chr1\tLN:1000\n@SQ\tSN:chr2\tLN:800\n".to_string())
                .unwrap();
        SamCodec::new(Arc::new(header))
    }

    fn decode(line: &str) -> Result<Record, DecodeError> {
        let mut rec = Record::with_slot(SlotId(0));
        codec().decode(line.as_bytes(), &mut rec).map(|_| rec)
    }

    #[test]
    fn test_decode_fields() {
        let rec = decode(
            "q1\t99\tchr2\t101\t60\t3M1I2M\t=\t201\t150\tACGTAC\t!!II#5\tNM:i:1\tRG:Z:g1\tXA:A:x\n",
        )
        .unwrap();
        assert_eq!(rec.group_key(), b"q1");
        assert_eq!(rec.flags().bits(), 99);
        assert_eq!((rec.ref_id(), rec.pos()), (1, 100));
        assert_eq!(rec.mapq(), 60);
        assert_eq!((rec.next_ref_id(), rec.next_pos()), (1, 200));
        assert_eq!(rec.template_length(), 150);
        assert_eq!(rec.sequence_len(), 6);
        assert_eq!(rec.qualities(), &[0, 0, 40, 40, 2, 20]);
        assert_eq!(rec.tag(b"NM").and_then(|t| t.as_int()), Some(1));
        assert_eq!(rec.tag(b"RG").and_then(|t| t.as_str_bytes()), Some(&b"g1"[..]));
    }

    #[test]
    fn test_encode_renders_same_line() {
        let lines = [
            "q1\t99\tchr2\t101\t60\t3M1I2M\t=\t201\t150\tACGTAC\t!!II#5\tNM:i:1\tRG:Z:g1\tXA:A:x\n",
            "u\t4\t*\t0\t0\t*\t*\t0\t0\t*\t*\n",
            "m\t1\tchr1\t5\t0\t2M\tchr2\t9\t0\tAN\t*\tZB:B:s,-3,7\tXF:f:1.5\n",
        ];
        for line in lines {
            let rec = decode(line).unwrap();
            let mut out = Vec::new();
            codec().encode(&rec, &mut out);
            assert_eq!(String::from_utf8(out).unwrap(), line);
        }
    }

    #[test]
    fn test_crlf_line() {
        let rec = decode("u\t4\t*\t0\t0\t*\t*\t0\t0\tAC\tII\r\n").unwrap();
        assert_eq!(rec.qualities(), &[40, 40]);
    }

    #[test]
    fn test_malformed_lines() {
        let cases = [
            ("u\t4\t*\t0\t0\t*\t*\t0\t0\tAC\n", "QUAL"),
            ("u\tx\t*\t0\t0\t*\t*\t0\t0\t*\t*\n", "FLAG"),
            ("u\t0\tchr9\t1\t0\t*\t*\t0\t0\t*\t*\n", "RNAME"),
            ("u\t0\tchr1\t1\t0\t3Q\t*\t0\t0\t*\t*\n", "CIGAR"),
            ("u\t0\tchr1\t1\t0\t*\t*\t0\t0\tAC\tI\n", "QUAL"),
            ("u\t0\tchr1\t1\t0\t*\t*\t0\t0\t*\t*\tNM:q:1\n", "TAG"),
            ("u\t0\tchr1\t-2147483648\t0\t*\t*\t0\t0\t*\t*\n", "POS"),
            ("u\t0\tchr1\t1\t0\t*\t=\t-1\t0\t*\t*\n", "PNEXT"),
            ("u\t0\tchr1\t2147483648\t0\t*\t*\t0\t0\t*\t*\n", "POS"),
        ];
        for (line, column) in cases {
            match decode(line) {
                Err(DecodeError::InvalidColumn { column: c, .. }) => assert_eq!(c, column, "{}", line),
                other => panic!("{:?} for {}", other, line),
            }
        }
    }
}
