mod header;
mod readahead;

use crate::block::Block;
use crate::codec::Format;
use crate::error::Result;
use crate::gz;
use crate::MAGIC_NUMBER;
use log::debug;
use std::io::{self, BufRead, BufReader, Read};

pub use header::{Header, Reference};
use readahead::Readahead;

use indicatif::{ProgressBar, ProgressStyle};

/// Supplies raw bytes to a frame splitter. `Ok(0)` means end of stream.
pub trait ByteSource: Send {
    fn read_bytes(&mut self, buf: &mut [u8]) -> io::Result<usize>;
}

impl<R: Read + Send> ByteSource for R {
    fn read_bytes(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.read(buf)
    }
}

/// Decompressed view of a BGZF stream. Blocks are inflated in parallel ahead
/// of the reader.
pub struct BgzfReader {
    readahead: Readahead,
    block_buffer: Option<Block>,
    eof_reached: bool,
    count_of_bytes_read: u64,
    count_of_blocks: usize,
    progress_bar: Option<ProgressBar>,
}

impl BgzfReader {
    /// `track_progress` is the compressed size of the input, if a progress
    /// bar should be drawn.
    pub fn new<RSS: Read + Send + 'static>(
        inner: RSS,
        thread_num: usize,
        track_progress: Option<u64>,
    ) -> io::Result<Self> {
        let thread_num = thread_num.min(num_cpus::get());
        let readahead = Readahead::new(thread_num, Box::new(inner))?;
        let progress_bar = track_progress.map(|file_size| {
            let pb = ProgressBar::new(file_size);
            if let Ok(style) = ProgressStyle::default_bar().template(
                "{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec}, {eta})",
            ) {
                pb.set_style(style.progress_chars("#>-"));
            }
            pb
        });
        Ok(Self {
            readahead,
            block_buffer: Some(Block::default()),
            eof_reached: false,
            count_of_bytes_read: 0,
            count_of_blocks: 0,
            progress_bar,
        })
    }

    fn next_block(&mut self) -> io::Result<bool> {
        let old = self.block_buffer.take().unwrap_or_default();
        match self.readahead.get_block(old)? {
            None => {
                self.eof_reached = true;
                if let Some(pb) = &self.progress_bar {
                    pb.finish();
                }
                Ok(false)
            }
            Some(new_block) => {
                const CHECK_PROGRESS_ONCE_PER_BLOCKS: usize = 1000;
                self.count_of_blocks += 1;
                self.count_of_bytes_read += new_block.compressed_size;
                if let Some(pb) = &self.progress_bar {
                    if self.count_of_blocks % CHECK_PROGRESS_ONCE_PER_BLOCKS == 0 {
                        pb.set_position(self.count_of_bytes_read);
                    }
                }
                self.block_buffer = Some(new_block);
                Ok(true)
            }
        }
    }
}

impl Read for BgzfReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        // Empty blocks (the EOF marker among them) are skipped.
        while !self.eof_reached {
            if let Some(block) = self.block_buffer.as_mut() {
                if block.remaining() > 0 {
                    return block.data_mut().read(buf);
                }
            }
            self.next_block()?;
        }
        Ok(0)
    }
}

/// An opened input: its header and the bytes of its records.
pub struct Input {
    pub format: Format,
    pub header: Header,
    pub source: Box<dyn Read + Send>,
}

impl std::fmt::Debug for Input {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Input")
            .field("format", &self.format)
            .field("header", &self.header)
            .finish_non_exhaustive()
    }
}

fn peek<R: BufRead>(reader: &mut R) -> io::Result<&[u8]> {
    loop {
        match reader.fill_buf() {
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            _ => break,
        }
    }
    reader.fill_buf()
}

/// Detects BGZF compression and BAM or SAM encoding from the first bytes of
/// `inner`, then reads the header.
pub fn open<R: Read + Send + 'static>(
    inner: R,
    thread_num: usize,
    track_progress: Option<u64>,
) -> Result<Input> {
    let mut raw = BufReader::new(inner);
    let compressed = peek(&mut raw)?.starts_with(&gz::MAGIC_NUMBER);
    let decoded: Box<dyn Read + Send> = if compressed {
        Box::new(BgzfReader::new(raw, thread_num, track_progress)?)
    } else {
        Box::new(raw)
    };

    let mut reader = BufReader::new(decoded);
    let (format, header) = if peek(&mut reader)?.starts_with(MAGIC_NUMBER) {
        (Format::Bam, Header::read_bam(&mut reader)?)
    } else {
        (Format::Sam, Header::read_sam(&mut reader)?)
    };
    debug!(
        "Opened {:?} input (BGZF: {}), {} references",
        format,
        compressed,
        header.references().len()
    );
    Ok(Input {
        format,
        header,
        source: Box::new(reader),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gz::EOF_BLOCK;
    use crate::util::deflate_block;
    use flate2::Compression;
    use std::io::Cursor;

    fn bgzf(data: &[u8], chunk: usize) -> Vec<u8> {
        let mut out = Vec::new();
        for part in data.chunks(chunk) {
            deflate_block(part, Compression::fast(), &mut out).unwrap();
        }
        out.extend_from_slice(&EOF_BLOCK);
        out
    }

    #[test]
    fn test_bgzf_reader_restores_order() {
        let data: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
        let mut reader = BgzfReader::new(Cursor::new(bgzf(&data, 1000)), 4, None).unwrap();
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        assert_eq!(out, data);
        assert_eq!(reader.read(&mut [0; 4]).unwrap(), 0);
    }

    #[test]
    fn test_bgzf_reader_reports_corrupt_block() {
        let mut compressed = bgzf(b"some bytes", 1000);
        compressed.truncate(compressed.len() - EOF_BLOCK.len() - 3);
        let mut reader = BgzfReader::new(Cursor::new(compressed), 3, None).unwrap();
        let mut out = Vec::new();
        assert!(reader.read_to_end(&mut out).is_err());
    }

    #[test]
    fn test_open_plain_sam() {
        let text = b"@SQ\tSN:c1\tLN:10\nr\t4\t*\t0\t0\t*\t*\t0\t0\t*\t*\n".to_vec();
        let mut input = open(Cursor::new(text), 1, None).unwrap();
        assert_eq!(input.format, Format::Sam);
        assert_eq!(input.header.ref_id("c1"), Some(0));
        let mut rest = Vec::new();
        input.source.read_to_end(&mut rest).unwrap();
        assert!(rest.starts_with(b"r\t4"));
    }

    #[test]
    fn test_open_bgzf_bam() {
        let header = Header::from_sam_text("@SQ\tSN:c1\tLN:10\n".to_string()).unwrap();
        let mut plain = Vec::new();
        header.write_bam(&mut plain).unwrap();
        plain.extend_from_slice(b"RECORDS");
        let input = open(Cursor::new(bgzf(&plain, 7)), 2, None).unwrap();
        assert_eq!(input.format, Format::Bam);
        assert_eq!(input.header, header);
    }

    #[test]
    fn test_open_empty_input() {
        let input = open(Cursor::new(Vec::new()), 1, None).unwrap();
        assert_eq!(input.format, Format::Sam);
        assert!(input.header.references().is_empty());
    }
}
