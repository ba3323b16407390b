// Block level BGZF reading after noodles-bgzf, plus the matching writer.

use super::gz::{
    BGZF_HEADER_SIZE, BLOCK_HEADER, MAGIC_NUMBER, MAX_BLOCK_SIZE, MAX_UNCOMPRESSED_BLOCK_SIZE,
    TRAILER_SIZE,
};
use crate::block::Block;
use byteorder::{ByteOrder, LittleEndian, WriteBytesExt};
use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use flate2::Compression;
use std::io::{self, Read, Write};

pub(crate) fn inflate_data<R>(reader: R, writer: &mut Vec<u8>) -> io::Result<usize>
where
    R: Read,
{
    let mut decoder = DeflateDecoder::new(reader);
    decoder.read_to_end(writer)
}

/// Reads the next compressed block into `cdata`. Returns the block size, 0 at
/// a clean end of stream.
pub(crate) fn fetch_block(
    reader: &mut dyn Read,
    cdata: &mut Vec<u8>,
    block: &mut Block,
) -> io::Result<usize> {
    let block_size = match read_block_size(reader)? {
        0 => return Ok(0),
        bs => bs,
    };

    if block_size < BGZF_HEADER_SIZE + TRAILER_SIZE {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!(
                "expected clen >= {}, got {}",
                BGZF_HEADER_SIZE + TRAILER_SIZE,
                block_size
            ),
        ));
    }

    let cdata_len = block_size - BGZF_HEADER_SIZE - TRAILER_SIZE;
    cdata.resize(cdata_len, Default::default());
    reader.read_exact(cdata)?;

    let mut trailer = [0; TRAILER_SIZE];
    reader.read_exact(&mut trailer)?;

    block.compressed_size = block_size as u64;
    block.data_mut().get_mut().clear();
    block.data_mut().set_position(0);

    Ok(block_size)
}

/// Reads a block header. End of stream before the first header byte is a
/// clean end, anywhere else it is an error.
fn read_block_size(reader: &mut dyn Read) -> io::Result<usize> {
    let mut header = [0; BGZF_HEADER_SIZE];
    let mut filled = 0;
    while filled < header.len() {
        match reader.read(&mut header[filled..]) {
            Ok(0) if filled == 0 => return Ok(0),
            Ok(0) => return Err(io::Error::from(io::ErrorKind::UnexpectedEof)),
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    if header[..2] != MAGIC_NUMBER {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "invalid BGZF block header",
        ));
    }

    // Add 1 because BSIZE is "total Block SIZE minus 1".
    Ok(LittleEndian::read_u16(&header[16..18]) as usize + 1)
}

pub(crate) fn decompress_block(cdata: &[u8], block: &mut Block) -> io::Result<()> {
    let udata = block.data_mut();
    inflate_data(cdata, udata.get_mut())?;
    udata.set_position(0);
    Ok(())
}

/// Compresses `data` (at most `MAX_UNCOMPRESSED_BLOCK_SIZE` bytes) into one
/// complete BGZF block appended to `out`.
pub(crate) fn deflate_block(data: &[u8], level: Compression, out: &mut Vec<u8>) -> io::Result<()> {
    debug_assert!(data.len() <= MAX_UNCOMPRESSED_BLOCK_SIZE);
    let start = out.len();
    out.extend_from_slice(&BLOCK_HEADER);

    let mut encoder = DeflateEncoder::new(&mut *out, level);
    encoder.write_all(data)?;
    encoder.finish()?;

    let mut crc = crc32fast::Hasher::new();
    crc.update(data);
    out.write_u32::<LittleEndian>(crc.finalize())?;
    out.write_u32::<LittleEndian>(data.len() as u32)?;

    let block_size = out.len() - start;
    if block_size > MAX_BLOCK_SIZE {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("compressed block of {} bytes exceeds BGZF limit", block_size),
        ));
    }
    LittleEndian::write_u16(&mut out[start + 16..start + 18], (block_size - 1) as u16);
    Ok(())
}
