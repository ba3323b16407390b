use crate::error::{PipelineError, Result};
use crate::MAGIC_NUMBER;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::collections::HashMap;
use std::convert::TryFrom;
use std::ffi::CStr;
use std::io::{self, BufRead, Read, Write};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference {
    pub name: String,
    pub length: u32,
}

/// Header text plus the reference dictionary records refer to by index.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Header {
    text: String,
    references: Vec<Reference>,
    ref_ids: HashMap<String, i32>,
}

impl Header {
    pub fn new(text: String, references: Vec<Reference>) -> Self {
        let ref_ids = references
            .iter()
            .enumerate()
            .map(|(id, r)| (r.name.clone(), id as i32))
            .collect();
        Header {
            text,
            references,
            ref_ids,
        }
    }

    /// Header of SAM text; the reference dictionary comes from `@SQ` lines.
    pub fn from_sam_text(text: String) -> Result<Self> {
        let mut references = Vec::new();
        for line in text.lines().filter(|l| l.starts_with("@SQ")) {
            let mut name = None;
            let mut length = None;
            for field in line.split('\t').skip(1) {
                if let Some(v) = field.strip_prefix("SN:") {
                    name = Some(v.to_string());
                } else if let Some(v) = field.strip_prefix("LN:") {
                    length = Some(v.parse::<u32>().map_err(|e| {
                        PipelineError::InvalidHeader(format!("bad LN in '{}': {}", line, e))
                    })?);
                }
            }
            match (name, length) {
                (Some(name), Some(length)) => references.push(Reference { name, length }),
                _ => {
                    return Err(PipelineError::InvalidHeader(format!(
                        "@SQ line without SN or LN: '{}'",
                        line
                    )))
                }
            }
        }
        Ok(Header::new(text, references))
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn references(&self) -> &[Reference] {
        &self.references
    }

    pub fn ref_id(&self, name: &str) -> Option<i32> {
        self.ref_ids.get(name).copied()
    }

    pub fn ref_name(&self, id: i32) -> Option<&str> {
        usize::try_from(id)
            .ok()
            .and_then(|id| self.references.get(id))
            .map(|r| r.name.as_str())
    }

    /// Reads a BAM header: magic, text and the binary reference dictionary.
    pub fn read_bam<R: Read>(reader: &mut R) -> Result<Self> {
        read_bam_header(reader).map_err(|e| match e.kind() {
            io::ErrorKind::UnexpectedEof | io::ErrorKind::InvalidData => {
                PipelineError::InvalidHeader(e.to_string())
            }
            _ => PipelineError::Io(e),
        })
    }

    /// Reads the leading `@` lines of a SAM stream, leaving the reader at the
    /// first record.
    pub fn read_sam<R: BufRead>(reader: &mut R) -> Result<Self> {
        let mut text = Vec::new();
        loop {
            let buf = match reader.fill_buf() {
                Ok(buf) => buf,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            };
            if buf.first() != Some(&b'@') {
                break;
            }
            reader.read_until(b'\n', &mut text)?;
        }
        let text = String::from_utf8(text)
            .map_err(|e| PipelineError::InvalidHeader(format!("header is not UTF-8: {}", e)))?;
        Header::from_sam_text(text)
    }

    pub fn write_bam<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        writer.write_all(MAGIC_NUMBER)?;
        writer.write_u32::<LittleEndian>(self.text.len() as u32)?;
        writer.write_all(self.text.as_bytes())?;
        writer.write_u32::<LittleEndian>(self.references.len() as u32)?;
        for r in &self.references {
            writer.write_u32::<LittleEndian>(r.name.len() as u32 + 1)?;
            writer.write_all(r.name.as_bytes())?;
            writer.write_u8(0)?;
            writer.write_u32::<LittleEndian>(r.length)?;
        }
        Ok(())
    }

    /// Header as SAM text. `@SQ` lines are generated when the text lacks them.
    pub fn to_sam_text(&self) -> String {
        if self.text.lines().any(|l| l.starts_with("@SQ")) || self.references.is_empty() {
            return self.text.clone();
        }
        let mut text = self.text.clone();
        if !text.is_empty() && !text.ends_with('\n') {
            text.push('\n');
        }
        for r in &self.references {
            text.push_str(&format!("@SQ\tSN:{}\tLN:{}\n", r.name, r.length));
        }
        text
    }
}

fn read_bam_header<R: Read>(reader: &mut R) -> io::Result<Header> {
    let mut magic = [0; 4];
    reader.read_exact(&mut magic)?;
    if magic != MAGIC_NUMBER {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "invalid BAM magic number",
        ));
    }

    let l_text = reader.read_u32::<LittleEndian>()? as usize;
    let mut text = vec![0; l_text];
    reader.read_exact(&mut text)?;
    // "Plain header text in SAM; not necessarily NUL-terminated".
    if let Some(nul) = memchr::memchr(0, &text) {
        text.truncate(nul);
    }
    let text = String::from_utf8(text).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

    let n_ref = reader.read_u32::<LittleEndian>()?;
    let mut references = Vec::new();
    for _ in 0..n_ref {
        references.push(read_reference(reader)?);
    }
    Ok(Header::new(text, references))
}

fn read_reference<R: Read>(reader: &mut R) -> io::Result<Reference> {
    let l_name = reader.read_u32::<LittleEndian>().and_then(|n| {
        usize::try_from(n).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    })?;
    let mut c_name = vec![0; l_name];
    reader.read_exact(&mut c_name)?;
    let name = bytes_with_nul_to_string(&c_name)?;
    let length = reader.read_u32::<LittleEndian>()?;
    Ok(Reference { name, length })
}

fn bytes_with_nul_to_string(buf: &[u8]) -> io::Result<String> {
    CStr::from_bytes_with_nul(buf)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
        .and_then(|c_str| {
            c_str
                .to_str()
                .map(|s| s.to_string())
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    const SAM_HEADER: &str = "@HD\tVN:1.6\tSO:unsorted\n@SQ\tSN:chr1\tLN:1000\n@SQ\tSN:chr2\tLN:500\n";

    #[test]
    fn test_bam_header_round_trip() {
        let header = Header::from_sam_text(SAM_HEADER.to_string()).unwrap();
        let mut bytes = Vec::new();
        header.write_bam(&mut bytes).unwrap();
        bytes.extend_from_slice(b"records follow");

        let mut reader = Cursor::new(bytes);
        let parsed = Header::read_bam(&mut reader).unwrap();
        assert_eq!(parsed, header);
        assert_eq!(parsed.ref_id("chr2"), Some(1));
        assert_eq!(parsed.ref_name(0), Some("chr1"));
        assert_eq!(parsed.ref_name(-1), None);
        let mut rest = String::new();
        reader.read_to_string(&mut rest).unwrap();
        assert_eq!(rest, "records follow");
    }

    #[test]
    fn test_bad_magic() {
        let mut reader = Cursor::new(b"BAM\x02\0\0\0\0".to_vec());
        assert!(matches!(
            Header::read_bam(&mut reader),
            Err(PipelineError::InvalidHeader(_))
        ));
    }

    #[test]
    fn test_sam_header_stops_at_first_record() {
        let input = format!("{}r1\t4\t*\t0\t0\t*\t*\t0\t0\t*\t*\n", SAM_HEADER);
        let mut reader = io::BufReader::with_capacity(8, Cursor::new(input.into_bytes()));
        let header = Header::read_sam(&mut reader).unwrap();
        assert_eq!(header.text(), SAM_HEADER);
        assert_eq!(header.references().len(), 2);
        let mut rest = String::new();
        reader.read_to_string(&mut rest).unwrap();
        assert!(rest.starts_with("r1\t4"));
    }

    #[test]
    fn test_sq_without_length_is_rejected() {
        assert!(Header::from_sam_text("@SQ\tSN:chr1\n".to_string()).is_err());
    }

    #[test]
    fn test_generated_sq_lines() {
        let header = Header::new(
            "@HD\tVN:1.6".to_string(),
            vec![Reference {
                name: "c".to_string(),
                length: 7,
            }],
        );
        assert_eq!(header.to_sam_text(), "@HD\tVN:1.6\n@SQ\tSN:c\tLN:7\n");
    }
}
