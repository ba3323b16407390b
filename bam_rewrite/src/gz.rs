// BGZF framing constants, see SAMv1 § 4.1.

// RFC 1952 § 2.3.1
pub(crate) const MAGIC_NUMBER: [u8; 2] = [0x1f, 0x8b];

// ID1 (1) + ID2 (1) + CM (1) + FLG (1) + MTIME (4) + XFL (1) + OS (1)
pub(crate) const HEADER_SIZE: usize = 10;

// CRC32 (4) + ISIZE (4)
pub(crate) const TRAILER_SIZE: usize = 8;

// XLEN (2)
const GZIP_XLEN_SIZE: usize = 2;

// SI1 (1) + SI2 (1) + SLEN (2) + BSIZE (2)
const BGZF_XLEN: usize = 6;

pub(crate) const BGZF_HEADER_SIZE: usize = HEADER_SIZE + GZIP_XLEN_SIZE + BGZF_XLEN;

/// Largest compressed block BSIZE can describe.
pub(crate) const MAX_BLOCK_SIZE: usize = 1 << 16;

/// Uncompressed bytes put into one block by the writer. Leaves room for
/// incompressible data to still fit `MAX_BLOCK_SIZE` after deflate.
pub(crate) const MAX_UNCOMPRESSED_BLOCK_SIZE: usize = 0xff00;

/// Header of every block written, BSIZE (the last two bytes) is patched in.
pub(crate) const BLOCK_HEADER: [u8; BGZF_HEADER_SIZE] = [
    MAGIC_NUMBER[0],
    MAGIC_NUMBER[1],
    CompressionMethod::Deflate as u8,
    0x04, // FLG.FEXTRA
    0x00, 0x00, 0x00, 0x00, // MTIME
    0x00, // XFL
    OperatingSystem::Unknown as u8,
    BGZF_XLEN as u8, 0x00, // XLEN
    b'B', b'C', // SI1, SI2
    0x02, 0x00, // SLEN
    0x00, 0x00, // BSIZE
];

/// Empty block terminating every BGZF file.
pub(crate) const EOF_BLOCK: [u8; 28] = [
    0x1f, 0x8b, 0x08, 0x04, 0x00, 0x00, 0x00, 0x00, 0x00, 0xff, 0x06, 0x00, 0x42, 0x43, 0x02,
    0x00, 0x1b, 0x00, 0x03, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
];

#[non_exhaustive]
pub(crate) enum CompressionMethod {
    Deflate = 8,
}

#[non_exhaustive]
pub(crate) enum OperatingSystem {
    Unknown = 255,
}
