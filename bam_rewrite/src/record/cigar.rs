use crate::U32_SIZE;
use byteorder::{ByteOrder, LittleEndian};
use std::fmt::Write;

const OPS: &[u8; 9] = b"MIDNSHP=X";

/// A single packed CIGAR operation, `length << 4 | op`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Op(pub u32);

impl Op {
    pub fn new(op_type: char, length: u32) -> Option<Op> {
        let code = OPS.iter().position(|&c| c as char == op_type)?;
        Some(Op(length << 4 | code as u32))
    }

    /// True if operation is one of M, =, X, D, N
    pub fn is_consuming_reference(&self) -> bool {
        let op = self.0 & 0xF;
        matches!(op, 0 | 2 | 3 | 7 | 8)
    }

    /// Length of operator
    pub fn length(&self) -> u32 {
        self.0 >> 4
    }

    /// Type of operator itself, `None` for codes outside the SAM alphabet.
    pub fn op_type(&self) -> Option<char> {
        OPS.get((self.0 & 0xF) as usize).map(|&c| c as char)
    }
}

/// Iterates packed operations of a raw CIGAR field.
pub fn ops(raw: &[u8]) -> impl Iterator<Item = Op> + '_ {
    raw.chunks_exact(U32_SIZE)
        .map(|chunk| Op(LittleEndian::read_u32(chunk)))
}

/// Number of reference bases covered by the alignment.
pub fn reference_length(raw: &[u8]) -> u32 {
    ops(raw)
        .filter(|op| op.is_consuming_reference())
        .map(|op| op.length())
        .sum()
}

/// Renders the raw field in SAM notation, `*` when empty.
pub fn format(raw: &[u8], out: &mut String) {
    if raw.is_empty() {
        out.push('*');
        return;
    }
    for op in ops(raw) {
        let _ = write!(out, "{}{}", op.length(), op.op_type().unwrap_or('?'));
    }
}

/// Parses SAM notation into packed operations.
pub fn parse(text: &str) -> Result<Vec<u32>, String> {
    let mut ops = Vec::new();
    if text == "*" {
        return Ok(ops);
    }
    let mut length: u32 = 0;
    let mut has_digits = false;
    for c in text.chars() {
        if let Some(d) = c.to_digit(10) {
            length = length
                .checked_mul(10)
                .and_then(|l| l.checked_add(d))
                .filter(|&l| l < 1 << 28)
                .ok_or_else(|| format!("operation length overflow in '{}'", text))?;
            has_digits = true;
        } else {
            if !has_digits {
                return Err(format!("operation '{}' without length in '{}'", c, text));
            }
            let op = Op::new(c, length)
                .ok_or_else(|| format!("unknown operation '{}' in '{}'", c, text))?;
            ops.push(op.0);
            length = 0;
            has_digits = false;
        }
    }
    if has_digits {
        return Err(format!("trailing length without operation in '{}'", text));
    }
    Ok(ops)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pack(ops: &[u32]) -> Vec<u8> {
        ops.iter().flat_map(|op| op.to_le_bytes()).collect()
    }

    #[test]
    fn test_parse_and_format() {
        let ops = parse("5S10M2D3I1=").unwrap();
        let mut text = String::new();
        format(&pack(&ops), &mut text);
        assert_eq!(text, "5S10M2D3I1=");
        assert!(parse("*").unwrap().is_empty());
    }

    #[test]
    fn test_reference_length() {
        let ops = parse("5S10M2D3I4N1X").unwrap();
        assert_eq!(reference_length(&pack(&ops)), 10 + 2 + 4 + 1);
    }

    #[test]
    fn test_parse_errors() {
        assert!(parse("10").is_err());
        assert!(parse("M").is_err());
        assert!(parse("3Q").is_err());
    }
}
