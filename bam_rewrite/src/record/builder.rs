use super::cigar;
use super::flags::Flags;
use super::tags;
use byteorder::{LittleEndian, WriteBytesExt};

const SEQ_ALPHABET: &[u8; 16] = b"=ACMGRSVTWYHKDBN";
const MAX_NAME_LEN: usize = 254;

/// Assembles the binary representation of a record from its SAM level
/// fields. Used by the text codec and by tests.
#[derive(Debug, Clone)]
pub struct RecordBuilder {
    name: Vec<u8>,
    flags: Flags,
    ref_id: i32,
    pos: i32,
    mapq: u8,
    cigar: Vec<u32>,
    seq: Vec<u8>,
    qual: Option<Vec<u8>>,
    next_ref_id: i32,
    next_pos: i32,
    tlen: i32,
    aux: Vec<u8>,
}

impl RecordBuilder {
    /// Unmapped record with the given read name and no sequence.
    pub fn new(name: &str) -> Self {
        Self::from_name_bytes(name.as_bytes())
    }

    pub fn from_name_bytes(name: &[u8]) -> Self {
        let len = name.len().min(MAX_NAME_LEN);
        RecordBuilder {
            name: name[..len].to_vec(),
            flags: Flags::UNMAPPED,
            ref_id: -1,
            pos: -1,
            mapq: 255,
            cigar: Vec::new(),
            seq: Vec::new(),
            qual: None,
            next_ref_id: -1,
            next_pos: -1,
            tlen: 0,
            aux: Vec::new(),
        }
    }

    pub fn flags(mut self, flags: Flags) -> Self {
        self.flags = flags;
        self
    }

    pub fn ref_id(mut self, ref_id: i32) -> Self {
        self.ref_id = ref_id;
        self
    }

    /// 0-based leftmost position.
    pub fn pos(mut self, pos: i32) -> Self {
        self.pos = pos;
        self
    }

    pub fn mapq(mut self, mapq: u8) -> Self {
        self.mapq = mapq;
        self
    }

    /// CIGAR in SAM notation. Panics on invalid notation, meant for literals;
    /// use [`RecordBuilder::cigar_ops`] with [`cigar::parse`] for input data.
    pub fn cigar(self, text: &str) -> Self {
        match cigar::parse(text) {
            Ok(ops) => self.cigar_ops(ops),
            Err(e) => panic!("{}", e),
        }
    }

    pub fn cigar_ops(mut self, ops: Vec<u32>) -> Self {
        self.cigar = ops;
        self
    }

    /// Sequence in IUPAC letters, `*` for none.
    pub fn seq(mut self, seq: &str) -> Self {
        self.seq = if seq == "*" {
            Vec::new()
        } else {
            seq.as_bytes().to_vec()
        };
        self
    }

    /// Phred qualities (not ASCII offset).
    pub fn qual(mut self, qual: &[u8]) -> Self {
        self.qual = Some(qual.to_vec());
        self
    }

    pub fn mate(mut self, next_ref_id: i32, next_pos: i32) -> Self {
        self.next_ref_id = next_ref_id;
        self.next_pos = next_pos;
        self
    }

    pub fn tlen(mut self, tlen: i32) -> Self {
        self.tlen = tlen;
        self
    }

    pub fn int_tag(mut self, name: &[u8; 2], value: i64) -> Self {
        tags::push_int(&mut self.aux, name, value);
        self
    }

    pub fn string_tag(mut self, name: &[u8; 2], value: &str) -> Self {
        tags::push_string(&mut self.aux, name, value.as_bytes());
        self
    }

    /// Appends already encoded auxiliary bytes.
    pub fn raw_aux(mut self, aux: &[u8]) -> Self {
        self.aux.extend_from_slice(aux);
        self
    }

    /// Writes the record (without `block_size`) to the end of `out`.
    pub fn write_into(&self, out: &mut Vec<u8>) {
        let l_seq = self.seq.len();
        let ref_len = cigar::reference_length(
            &self
                .cigar
                .iter()
                .flat_map(|op| op.to_le_bytes())
                .collect::<Vec<u8>>(),
        ) as i64;
        let end = if ref_len > 0 {
            self.pos as i64 + ref_len
        } else {
            self.pos as i64 + 1
        };
        out.reserve(32 + self.name.len() + 1 + 4 * self.cigar.len() + l_seq * 2 + self.aux.len());

        // Writes into a Vec cannot fail.
        let _ = out.write_i32::<LittleEndian>(self.ref_id);
        let _ = out.write_i32::<LittleEndian>(self.pos);
        out.push((self.name.len() + 1) as u8);
        out.push(self.mapq);
        let _ = out.write_u16::<LittleEndian>(reg2bin(self.pos as i64, end));
        let _ = out.write_u16::<LittleEndian>(self.cigar.len() as u16);
        let _ = out.write_u16::<LittleEndian>(self.flags.bits());
        let _ = out.write_u32::<LittleEndian>(l_seq as u32);
        let _ = out.write_i32::<LittleEndian>(self.next_ref_id);
        let _ = out.write_i32::<LittleEndian>(self.next_pos);
        let _ = out.write_i32::<LittleEndian>(self.tlen);
        out.extend_from_slice(&self.name);
        out.push(0);
        for op in &self.cigar {
            let _ = out.write_u32::<LittleEndian>(*op);
        }
        for pair in self.seq.chunks(2) {
            let hi = encode_base(pair[0]);
            let lo = pair.get(1).map_or(0, |&b| encode_base(b));
            out.push(hi << 4 | lo);
        }
        match &self.qual {
            Some(qual) if qual.len() == l_seq => out.extend_from_slice(qual),
            _ => out.resize(out.len() + l_seq, 0xff),
        }
        out.extend_from_slice(&self.aux);
    }

    pub fn build(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.write_into(&mut out);
        out
    }

    /// The record preceded by its `block_size`, as found in a BAM stream.
    pub fn build_frame(&self) -> Vec<u8> {
        let record = self.build();
        let mut out = Vec::with_capacity(record.len() + 4);
        let _ = out.write_u32::<LittleEndian>(record.len() as u32);
        out.extend_from_slice(&record);
        out
    }
}

fn encode_base(base: u8) -> u8 {
    let upper = base.to_ascii_uppercase();
    SEQ_ALPHABET
        .iter()
        .position(|&c| c == upper)
        .unwrap_or(15) as u8
}

pub(crate) fn decode_base(code: u8) -> u8 {
    SEQ_ALPHABET[(code & 0xf) as usize]
}

/// UCSC binning scheme, `end` is exclusive.
pub(crate) fn reg2bin(beg: i64, end: i64) -> u16 {
    let end = end - 1;
    let bin = if beg >> 14 == end >> 14 {
        ((1 << 15) - 1) / 7 + (beg >> 14)
    } else if beg >> 17 == end >> 17 {
        ((1 << 12) - 1) / 7 + (beg >> 17)
    } else if beg >> 20 == end >> 20 {
        ((1 << 9) - 1) / 7 + (beg >> 20)
    } else if beg >> 23 == end >> 23 {
        ((1 << 6) - 1) / 7 + (beg >> 23)
    } else if beg >> 26 == end >> 26 {
        ((1 << 3) - 1) / 7 + (beg >> 26)
    } else {
        0
    };
    bin as u16
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::fields::{self, Fields};

    #[test]
    fn test_unmapped_default_layout() {
        // Same bytes as noodles' default record.
        let data = RecordBuilder::new("*").build();
        assert_eq!(
            data,
            vec![
                0xff, 0xff, 0xff, 0xff, // ref_id = -1
                0xff, 0xff, 0xff, 0xff, // pos = -1
                0x02, // l_read_name = 2
                0xff, // mapq = 255
                0x48, 0x12, // bin = 4680
                0x00, 0x00, // n_cigar_op = 0
                0x04, 0x00, // flag = 4
                0x00, 0x00, 0x00, 0x00, // l_seq = 0
                0xff, 0xff, 0xff, 0xff, // next_ref_id = -1
                0xff, 0xff, 0xff, 0xff, // next_pos = -1
                0x00, 0x00, 0x00, 0x00, // tlen = 0
                0x2a, 0x00, // read_name = "*\x00"
            ]
        );
    }

    #[test]
    fn test_sequence_packing() {
        let data = RecordBuilder::new("r").seq("ACGTN").build();
        let seq = fields::get_bytes(&data, Fields::RawSequence);
        assert_eq!(seq, &[0x12, 0x48, 0xf0]);
        assert_eq!(decode_base(seq[0] >> 4), b'A');
        assert_eq!(fields::get_bytes(&data, Fields::RawQual), &[0xff; 5]);
    }

    #[test]
    fn test_frame_has_block_size() {
        let frame = RecordBuilder::new("r").build_frame();
        assert_eq!(
            u32::from_le_bytes([frame[0], frame[1], frame[2], frame[3]]) as usize,
            frame.len() - 4
        );
    }

    #[test]
    fn test_reg2bin() {
        assert_eq!(reg2bin(-1, 0), 4680);
        assert_eq!(reg2bin(0, 100), 4681);
        assert_eq!(reg2bin(16_000, 17_000), 585);
        assert_eq!(reg2bin(16_384, 16_400), 4682);
    }
}
