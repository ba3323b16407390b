//! Consumers of flushed rewrite buffers.

use crate::codec::Format;
use crate::gz::{EOF_BLOCK, MAX_UNCOMPRESSED_BLOCK_SIZE};
use crate::reader::Header;
use crate::record::SortKey;
use crate::rewrite_buffer::RewriteBuffer;
use crate::util::deflate_block;
use flate2::Compression;
use log::debug;
use rayon::prelude::*;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

/// Takes the records of a sorted rewrite buffer. The buffer is reset and
/// reused once `consume` returns.
pub trait RewriteSink: Send {
    fn consume(&mut self, rewrite: &RewriteBuffer) -> io::Result<()>;

    /// Called once after the last buffer.
    fn finish(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Blocks staged before they are compressed in parallel.
const BLOCKS_PER_BATCH: usize = 16;

/// BGZF compressing writer.
pub struct BgzfWriter<W: Write> {
    inner: W,
    level: Compression,
    staged: Vec<u8>,
}

impl<W: Write> BgzfWriter<W> {
    pub fn new(inner: W, level: Compression) -> Self {
        BgzfWriter {
            inner,
            level,
            staged: Vec::with_capacity(BLOCKS_PER_BATCH * MAX_UNCOMPRESSED_BLOCK_SIZE),
        }
    }

    /// Compresses every complete block staged so far, or everything if `all`.
    fn compress_staged(&mut self, all: bool) -> io::Result<()> {
        let full = if all {
            self.staged.len()
        } else {
            self.staged.len() / MAX_UNCOMPRESSED_BLOCK_SIZE * MAX_UNCOMPRESSED_BLOCK_SIZE
        };
        if full == 0 {
            return Ok(());
        }
        let level = self.level;
        let blocks = self.staged[..full]
            .par_chunks(MAX_UNCOMPRESSED_BLOCK_SIZE)
            .map(|chunk| {
                let mut out = Vec::with_capacity(chunk.len() / 2);
                deflate_block(chunk, level, &mut out).map(|_| out)
            })
            .collect::<io::Result<Vec<_>>>()?;
        for block in blocks {
            self.inner.write_all(&block)?;
        }
        self.staged.drain(..full);
        Ok(())
    }

    /// Writes out what is staged, the EOF block, and returns the inner writer.
    pub fn finish(mut self) -> io::Result<W> {
        self.compress_staged(true)?;
        self.inner.write_all(&EOF_BLOCK)?;
        self.inner.flush()?;
        Ok(self.inner)
    }
}

impl<W: Write> Write for BgzfWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.staged.extend_from_slice(buf);
        if self.staged.len() >= BLOCKS_PER_BATCH * MAX_UNCOMPRESSED_BLOCK_SIZE {
            self.compress_staged(false)?;
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.compress_staged(true)?;
        self.inner.flush()
    }
}

/// Writes every flushed buffer to its own file, `<prefix>.<n>.bam` (BGZF) or
/// `<prefix>.<n>.sam`, each a sorted run carrying the input header.
pub struct RunWriter {
    prefix: PathBuf,
    format: Format,
    header: Header,
    level: Compression,
    runs: Vec<PathBuf>,
}

impl RunWriter {
    pub fn new<P: AsRef<Path>>(prefix: P, format: Format, header: Header) -> Self {
        RunWriter {
            prefix: prefix.as_ref().to_path_buf(),
            format,
            header,
            level: Compression::default(),
            runs: Vec::new(),
        }
    }

    pub fn with_compression(mut self, level: Compression) -> Self {
        self.level = level;
        self
    }

    /// Files written so far, in flush order.
    pub fn runs(&self) -> &[PathBuf] {
        &self.runs
    }

    fn run_path(&self, n: usize) -> PathBuf {
        let mut name = self.prefix.as_os_str().to_owned();
        name.push(format!(".{}.{}", n, self.format.extension()));
        PathBuf::from(name)
    }
}

impl RewriteSink for RunWriter {
    fn consume(&mut self, rewrite: &RewriteBuffer) -> io::Result<()> {
        if rewrite.is_empty() {
            return Ok(());
        }
        let path = self.run_path(self.runs.len());
        let file = BufWriter::new(File::create(&path)?);
        match self.format {
            Format::Bam => {
                let mut writer = BgzfWriter::new(file, self.level);
                self.header.write_bam(&mut writer)?;
                for frame in rewrite.iter() {
                    writer.write_all(frame)?;
                }
                writer.finish()?.flush()?;
            }
            Format::Sam => {
                let mut writer = file;
                writer.write_all(self.header.to_sam_text().as_bytes())?;
                for line in rewrite.iter() {
                    writer.write_all(line)?;
                }
                writer.flush()?;
            }
        }
        debug!(
            "Wrote run {} with {} records to {}",
            self.runs.len(),
            rewrite.len(),
            path.display()
        );
        self.runs.push(path);
        Ok(())
    }
}

/// A flushed buffer as seen by [`MemorySink`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Run {
    pub records: Vec<Vec<u8>>,
    pub sort_keys: Vec<SortKey>,
    pub used_bytes: usize,
    pub is_final: bool,
}

/// Keeps copies of every non-empty flushed buffer.
#[derive(Debug, Default)]
pub struct MemorySink {
    pub runs: Vec<Run>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> impl Iterator<Item = &[u8]> + '_ {
        self.runs
            .iter()
            .flat_map(|run| run.records.iter().map(|r| r.as_slice()))
    }
}

impl RewriteSink for MemorySink {
    fn consume(&mut self, rewrite: &RewriteBuffer) -> io::Result<()> {
        if rewrite.is_empty() {
            return Ok(());
        }
        self.runs.push(Run {
            records: rewrite.iter().map(|r| r.to_vec()).collect(),
            sort_keys: rewrite.sort_keys().collect(),
            used_bytes: rewrite.used_bytes(),
            is_final: rewrite.is_final(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader;
    use crate::record::builder::RecordBuilder;
    use std::io::{Cursor, Read};

    fn header() -> Header {
        Header::from_sam_text("@HD\tVN:1.6\n@SQ\tSN:chr1\tLN:1000\n".to_string()).unwrap()
    }

    #[test]
    fn test_bgzf_writer_output_reads_back() {
        let data: Vec<u8> = (0..300_000u32).map(|i| (i * 7 % 256) as u8).collect();
        let mut writer = BgzfWriter::new(Vec::new(), Compression::fast());
        for chunk in data.chunks(10_000) {
            writer.write_all(chunk).unwrap();
        }
        let compressed = writer.finish().unwrap();
        assert!(compressed.ends_with(&EOF_BLOCK));

        let mut reader = reader::BgzfReader::new(Cursor::new(compressed), 2, None).unwrap();
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        assert_eq!(out, data);
    }

    #[test]
    fn test_run_writer_bam() {
        let dir = tempfile::tempdir().unwrap();
        let prefix = dir.path().join("out");
        let mut sink = RunWriter::new(&prefix, Format::Bam, header());

        let frame = RecordBuilder::new("r1").ref_id(0).pos(5).cigar("3M").seq("ACG").build_frame();
        let mut rewrite = RewriteBuffer::new(0, 1 << 16);
        assert!(rewrite.put(&frame, SortKey(0)));
        sink.consume(&rewrite).unwrap();
        sink.consume(&RewriteBuffer::new(1, 16)).unwrap();
        assert_eq!(sink.runs(), &[dir.path().join("out.0.bam")]);

        let input = reader::open(File::open(&sink.runs()[0]).unwrap(), 1, None).unwrap();
        assert_eq!(input.format, Format::Bam);
        assert_eq!(input.header, header());
        let mut rest = Vec::new();
        let mut source = input.source;
        source.read_to_end(&mut rest).unwrap();
        assert_eq!(rest, frame);
    }

    #[test]
    fn test_run_writer_sam() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = RunWriter::new(dir.path().join("x"), Format::Sam, header());
        let mut rewrite = RewriteBuffer::new(0, 1 << 10);
        assert!(rewrite.put(b"r1\t4\t*\t0\t0\t*\t*\t0\t0\t*\t*\n", SortKey::ABSENT));
        sink.consume(&rewrite).unwrap();
        let text = std::fs::read_to_string(dir.path().join("x.0.sam")).unwrap();
        assert!(text.starts_with("@HD\tVN:1.6\n@SQ\tSN:chr1\tLN:1000\n"));
        assert!(text.ends_with("r1\t4\t*\t0\t0\t*\t*\t0\t0\t*\t*\n"));
    }

    #[test]
    fn test_memory_sink_skips_empty_buffers() {
        let mut sink = MemorySink::new();
        let mut rewrite = RewriteBuffer::new(0, 1 << 10);
        sink.consume(&rewrite).unwrap();
        assert!(rewrite.put(b"abc", SortKey(2)));
        rewrite.mark_final();
        sink.consume(&rewrite).unwrap();
        assert_eq!(sink.runs.len(), 1);
        assert!(sink.runs[0].is_final);
        assert_eq!(sink.runs[0].sort_keys, vec![SortKey(2)]);
        assert_eq!(sink.records().collect::<Vec<_>>(), vec![&b"abc"[..]]);
    }
}
