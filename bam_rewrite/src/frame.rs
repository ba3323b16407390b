//! Splits a byte stream into frames, each holding one encoded record.
//!
//! Bytes are read into a working region. After every fill the splitter
//! locates as many complete frames as the region holds; whatever follows the
//! last complete frame is carried over to the front of the region on the next
//! fill.

use crate::error::{PipelineError, Result};
use crate::reader::ByteSource;
use crate::U32_SIZE;
use byteorder::{ByteOrder, LittleEndian};
use log::debug;
use std::io;
use std::ops::Range;

/// How frame boundaries are recognised.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    /// Each frame starts with a little endian `u32` holding the length of the
    /// rest of the frame (BAM `block_size`).
    LengthPrefixed,
    /// Frames end with the delimiter byte (SAM lines). Frames made of the
    /// delimiter alone are skipped.
    Delimited(u8),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FillResult {
    pub bytes_read: usize,
    /// True exactly once, on the fill that observed the end of the stream.
    pub reached_end: bool,
}

pub struct FrameSplitter<S> {
    source: S,
    framing: Framing,
    region: Vec<u8>,
    capacity: usize,
    frames: Vec<Range<usize>>,
    // End of the last located frame inside `region`.
    cursor: usize,
    // Stream offset of region[0].
    region_offset: u64,
    end_reported: bool,
}

impl<S: ByteSource> FrameSplitter<S> {
    pub fn new(source: S, framing: Framing, capacity: usize) -> Self {
        let capacity = capacity.max(U32_SIZE);
        FrameSplitter {
            source,
            framing,
            region: Vec::with_capacity(capacity),
            capacity,
            frames: Vec::new(),
            cursor: 0,
            region_offset: 0,
            end_reported: false,
        }
    }

    pub fn framing(&self) -> Framing {
        self.framing
    }

    /// True once the end of the stream has been reported.
    pub fn is_finished(&self) -> bool {
        self.end_reported
    }

    /// Bytes kept from the previous fill that do not form a complete frame yet.
    pub fn carry_over(&self) -> usize {
        self.region.len() - self.cursor
    }

    /// Frames located by the last fill. Valid until the next fill.
    pub fn frames(&self) -> impl ExactSizeIterator<Item = &[u8]> + '_ {
        self.frames.iter().map(move |r| &self.region[r.clone()])
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    /// Stream offset at which frame `idx` of the last fill starts.
    pub fn frame_offset(&self, idx: usize) -> Option<u64> {
        self.frames
            .get(idx)
            .map(|r| self.region_offset + r.start as u64)
    }

    /// Reads up to `max_bytes` more bytes and locates the frames they complete.
    pub fn fill(&mut self, max_bytes: usize) -> Result<FillResult> {
        self.frames.clear();
        if self.end_reported {
            return Ok(FillResult::default());
        }
        self.rehome_carry_over();

        if self.region.len() == self.capacity {
            // One frame is larger than the whole region.
            self.capacity *= 2;
            debug!("Frame region grown to {} bytes", self.capacity);
        }

        let scan_from = self.region.len();
        let want = max_bytes.min(self.capacity - self.region.len());
        let (bytes_read, eof) = self.read_region(want)?;

        match self.framing {
            Framing::LengthPrefixed => self.locate_length_prefixed(),
            Framing::Delimited(delim) => self.locate_delimited(scan_from, delim),
        }

        if eof {
            self.finish_stream()?;
        }
        Ok(FillResult {
            bytes_read,
            reached_end: eof,
        })
    }

    fn rehome_carry_over(&mut self) {
        if self.cursor > 0 {
            self.region.drain(..self.cursor);
            self.region_offset += self.cursor as u64;
            self.cursor = 0;
        }
    }

    /// Returns bytes read and whether the source is exhausted.
    fn read_region(&mut self, want: usize) -> Result<(usize, bool)> {
        let start = self.region.len();
        self.region.resize(start + want, 0);
        let mut filled = 0;
        let mut eof = false;
        while filled < want {
            match self.source.read_bytes(&mut self.region[start + filled..]) {
                Ok(0) => {
                    eof = true;
                    break;
                }
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    self.region.truncate(start + filled);
                    return Err(e.into());
                }
            }
        }
        self.region.truncate(start + filled);
        Ok((filled, eof))
    }

    fn locate_length_prefixed(&mut self) {
        loop {
            let rest = &self.region[self.cursor..];
            if rest.len() < U32_SIZE {
                break;
            }
            let frame_len = U32_SIZE + LittleEndian::read_u32(rest) as usize;
            if rest.len() < frame_len {
                break;
            }
            self.frames.push(self.cursor..self.cursor + frame_len);
            self.cursor += frame_len;
        }
    }

    fn locate_delimited(&mut self, scan_from: usize, delim: u8) {
        // Carry-over holds no delimiter, only the new bytes need scanning.
        let last = match memchr::memrchr(delim, &self.region[scan_from..]) {
            Some(p) => scan_from + p,
            None => return,
        };
        let mut start = self.cursor;
        for end in memchr::memchr_iter(delim, &self.region[self.cursor..=last]) {
            let end = self.cursor + end;
            if end > start {
                self.frames.push(start..end + 1);
            }
            start = end + 1;
        }
        self.cursor = last + 1;
    }

    fn finish_stream(&mut self) -> Result<()> {
        self.end_reported = true;
        let carry = self.carry_over();
        if carry == 0 {
            return Ok(());
        }
        match self.framing {
            Framing::LengthPrefixed => {
                let rest = &self.region[self.cursor..];
                let missing = if rest.len() < U32_SIZE {
                    U32_SIZE - rest.len()
                } else {
                    U32_SIZE + LittleEndian::read_u32(rest) as usize - rest.len()
                };
                Err(PipelineError::TruncatedFrame {
                    offset: self.region_offset + self.cursor as u64,
                    missing,
                })
            }
            Framing::Delimited(_) => {
                // Unterminated last line is still a frame.
                self.frames.push(self.cursor..self.region.len());
                self.cursor = self.region.len();
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Cursor, Read};

    fn length_prefixed(payloads: &[&[u8]]) -> Vec<u8> {
        let mut out = Vec::new();
        for p in payloads {
            out.extend_from_slice(&(p.len() as u32).to_le_bytes());
            out.extend_from_slice(p);
        }
        out
    }

    fn collect(splitter: &FrameSplitter<impl ByteSource>) -> Vec<Vec<u8>> {
        splitter.frames().map(|f| f.to_vec()).collect()
    }

    /// Source returning at most `step` bytes per read.
    struct Trickle(Cursor<Vec<u8>>, usize);

    impl Read for Trickle {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let n = buf.len().min(self.1);
            self.0.read(&mut buf[..n])
        }
    }

    #[test]
    fn test_length_prefixed_frames_across_fills() {
        let stream = length_prefixed(&[b"abc", b"defgh", b"ij"]);
        let mut splitter = FrameSplitter::new(Cursor::new(stream.clone()), Framing::LengthPrefixed, 64);

        let res = splitter.fill(9).unwrap();
        assert_eq!(res, FillResult { bytes_read: 9, reached_end: false });
        assert_eq!(collect(&splitter), vec![length_prefixed(&[b"abc"])]);
        assert_eq!(splitter.carry_over(), 2);

        let res = splitter.fill(100).unwrap();
        assert_eq!(res.bytes_read, stream.len() - 9);
        assert!(res.reached_end);
        assert_eq!(
            collect(&splitter),
            vec![length_prefixed(&[b"defgh"]), length_prefixed(&[b"ij"])]
        );
        assert_eq!(splitter.frame_offset(0), Some(7));

        let res = splitter.fill(100).unwrap();
        assert_eq!(res, FillResult { bytes_read: 0, reached_end: false });
        assert_eq!(splitter.frame_count(), 0);
        assert!(splitter.is_finished());
    }

    #[test]
    fn test_truncated_length_prefixed_stream_is_fatal() {
        let mut stream = length_prefixed(&[b"abcd", b"efghijkl"]);
        stream.truncate(stream.len() - 3);
        let mut splitter = FrameSplitter::new(Cursor::new(stream), Framing::LengthPrefixed, 64);
        let err = splitter.fill(1000).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::TruncatedFrame { offset: 8, missing: 3 }
        ));
        // The partial frame was never reported.
        assert_eq!(collect(&splitter), vec![length_prefixed(&[b"abcd"])]);
    }

    #[test]
    fn test_truncated_inside_length_field() {
        let mut splitter = FrameSplitter::new(Cursor::new(vec![5, 0]), Framing::LengthPrefixed, 64);
        assert!(matches!(
            splitter.fill(10),
            Err(PipelineError::TruncatedFrame { offset: 0, missing: 2 })
        ));
    }

    #[test]
    fn test_frame_larger_than_region_grows_it() {
        let big = vec![7u8; 100];
        let stream = length_prefixed(&[&big, b"x"]);
        let mut splitter = FrameSplitter::new(Cursor::new(stream), Framing::LengthPrefixed, 16);
        let mut frames = Vec::new();
        loop {
            let res = splitter.fill(usize::MAX).unwrap();
            frames.extend(collect(&splitter));
            if res.reached_end {
                break;
            }
        }
        assert_eq!(frames, vec![length_prefixed(&[&big]), length_prefixed(&[b"x"])]);
    }

    #[test]
    fn test_short_reads_are_retried() {
        let stream = length_prefixed(&[b"hello", b"world"]);
        let source = Trickle(Cursor::new(stream), 3);
        let mut splitter = FrameSplitter::new(source, Framing::LengthPrefixed, 64);
        let res = splitter.fill(18).unwrap();
        assert_eq!(res.bytes_read, 18);
        assert_eq!(splitter.frame_count(), 2);
    }

    #[test]
    fn test_delimited_frames() {
        let stream = b"line1\nline2\n\nline3\nparti".to_vec();
        let mut splitter = FrameSplitter::new(Cursor::new(stream), Framing::Delimited(b'\n'), 64);
        let res = splitter.fill(14).unwrap();
        assert!(!res.reached_end);
        assert_eq!(collect(&splitter), vec![b"line1\n".to_vec(), b"line2\n".to_vec()]);
        assert_eq!(splitter.carry_over(), 1);

        let res = splitter.fill(100).unwrap();
        assert!(res.reached_end);
        assert_eq!(collect(&splitter), vec![b"line3\n".to_vec(), b"parti".to_vec()]);
    }

    #[test]
    fn test_delimited_stream_without_delimiter_is_one_frame() {
        let mut splitter =
            FrameSplitter::new(Cursor::new(b"lonely".to_vec()), Framing::Delimited(b'\n'), 64);
        assert!(splitter.fill(100).unwrap().reached_end);
        assert_eq!(collect(&splitter), vec![b"lonely".to_vec()]);
    }

    #[test]
    fn test_empty_stream() {
        for framing in [Framing::LengthPrefixed, Framing::Delimited(b'\n')] {
            let mut splitter = FrameSplitter::new(Cursor::new(Vec::new()), framing, 64);
            let res = splitter.fill(100).unwrap();
            assert_eq!(res, FillResult { bytes_read: 0, reached_end: true });
            assert_eq!(splitter.frame_count(), 0);
        }
    }
}
