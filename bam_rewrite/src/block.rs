use std::io::Cursor;

/// A decompressed BGZF block and the size it had on disk.
#[derive(Debug, Default)]
pub(crate) struct Block {
    /// Size on disk, header and trailer included.
    pub compressed_size: u64,
    data: Cursor<Vec<u8>>,
}

impl Block {
    pub fn data_mut(&mut self) -> &mut Cursor<Vec<u8>> {
        &mut self.data
    }

    /// Uncompressed bytes not read yet.
    pub fn remaining(&self) -> usize {
        self.data.get_ref().len() - self.data.position() as usize
    }
}
