//! Layout constants & entry codec.
//!
//! Fixed offsets and sizes of the four on-disk regions (header, root
//! directory, block table, data blocks), the packed binary layout of a
//! directory entry and of a block-table cell, and the bitmask convention
//! on the entry size field. This module never interprets the `DIRECTORY`
//! flag or the chain sentinels beyond decoding them to/from their numeric
//! form; callers (the resolver, the chain walker, the operation engine)
//! give them meaning.
//!
//! Disk content uses Intel byte order, independent of the host's
//! endianness.

use static_assertions::const_assert_eq;

use crate::disk::Disk;
use crate::error::SfsError;

/// Maximum stored filename length, including the NUL terminator.
pub const FILENAME_MAX: usize = 55;

/// On-disk size of one `Entry`: filename bytes, then a little-endian
/// `size` field, then a little-endian `first_block` field.
pub const ENTRY_SIZE: usize = FILENAME_MAX + 4 + 4;

/// Directory entries per data block. Chosen so that
/// `DIR_NENTRIES * ENTRY_SIZE == BLOCK_SIZE` exactly, per the directory
/// block-count invariant.
pub const DIR_NENTRIES: usize = 16;

pub const BLOCK_SIZE: usize = DIR_NENTRIES * ENTRY_SIZE;
const_assert_eq!(DIR_NENTRIES * ENTRY_SIZE, BLOCK_SIZE);

/// Slots in the root directory (stored inline, not in a data block).
pub const ROOT_NENTRIES: usize = 16;

/// Total number of blocks tracked by the block table / present in the
/// data region.
pub const BLOCK_NENTRIES: usize = 1024;
pub const BLOCKTBL_NENTRIES: usize = BLOCK_NENTRIES;

/// Size in bytes of one block-table cell.
pub const BLOCKIDX_SIZE: usize = 4;

/// Sentinel: slot is free.
pub const BLOCKIDX_EMPTY: u32 = u32::MAX - 1;
/// Sentinel: slot is the terminal link of a chain.
pub const BLOCKIDX_END: u32 = u32::MAX;

/// High bit of `Entry::size`: set iff the entry is a directory.
pub const DIRECTORY: u32 = 1 << 31;
/// Remaining bits of `Entry::size`: the file's payload size in bytes.
pub const SIZEMASK: u32 = !DIRECTORY;

const MAGIC: &[u8; 4] = b"SFS1";
const HEADER_SIZE: u64 = 16;

pub const HEADER_OFF: u64 = 0;
pub const ROOT_SIZE: u64 = (ROOT_NENTRIES * ENTRY_SIZE) as u64;
pub const ROOT_OFF: u64 = HEADER_OFF + HEADER_SIZE;
pub const BLOCKTBL_SIZE: u64 = (BLOCKTBL_NENTRIES * BLOCKIDX_SIZE) as u64;
pub const BLOCKTBL_OFF: u64 = ROOT_OFF + ROOT_SIZE;
pub const DATA_OFF: u64 = BLOCKTBL_OFF + BLOCKTBL_SIZE;

/// Total size an image must have for this layout.
pub const IMAGE_SIZE: u64 = DATA_OFF + (BLOCK_NENTRIES * BLOCK_SIZE) as u64;

/// Byte offset of data block `idx` within the image.
pub const fn block_off(idx: u32) -> u64 {
    DATA_OFF + (idx as u64) * (BLOCK_SIZE as u64)
}

/// An in-memory directory entry. `filename` is empty iff the slot is
/// unused (on disk: the first byte is NUL).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Entry {
    pub filename: [u8; FILENAME_MAX],
    pub size: u32,
    pub first_block: u32,
}

impl Entry {
    pub fn empty() -> Self {
        Self {
            filename: [0; FILENAME_MAX],
            size: 0,
            first_block: BLOCKIDX_END,
        }
    }

    pub fn is_empty_slot(&self) -> bool {
        self.filename[0] == 0
    }

    pub fn is_directory(&self) -> bool {
        self.size & DIRECTORY != 0
    }

    pub fn file_size(&self) -> u32 {
        self.size & SIZEMASK
    }

    /// Returns the entry's name as a byte slice with the NUL terminator
    /// (and anything past it) stripped off.
    pub fn name_bytes(&self) -> &[u8] {
        let len = self
            .filename
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(FILENAME_MAX);
        &self.filename[..len]
    }

    pub fn set_name(&mut self, name: &[u8]) {
        self.filename = [0; FILENAME_MAX];
        self.filename[..name.len()].copy_from_slice(name);
    }

    fn decode(bytes: &[u8]) -> Self {
        debug_assert_eq!(bytes.len(), ENTRY_SIZE);
        let mut filename = [0u8; FILENAME_MAX];
        filename.copy_from_slice(&bytes[..FILENAME_MAX]);
        let size = u32::from_le_bytes(bytes[FILENAME_MAX..FILENAME_MAX + 4].try_into().unwrap());
        let first_block = u32::from_le_bytes(
            bytes[FILENAME_MAX + 4..FILENAME_MAX + 8]
                .try_into()
                .unwrap(),
        );
        Self {
            filename,
            size,
            first_block,
        }
    }

    fn encode(&self, bytes: &mut [u8]) {
        debug_assert_eq!(bytes.len(), ENTRY_SIZE);
        bytes[..FILENAME_MAX].copy_from_slice(&self.filename);
        bytes[FILENAME_MAX..FILENAME_MAX + 4].copy_from_slice(&self.size.to_le_bytes());
        bytes[FILENAME_MAX + 4..FILENAME_MAX + 8].copy_from_slice(&self.first_block.to_le_bytes());
    }
}

/// A fixed-length array of directory entries as stored in the root region
/// or in a single data block.
pub type EntryArray = Vec<Entry>;

/// Encodes a single entry to its on-disk byte form. Exposed for callers
/// that rewrite one directory slot without reading or rewriting the rest
/// of the region.
pub fn encode_entry(entry: &Entry) -> [u8; ENTRY_SIZE] {
    let mut raw = [0u8; ENTRY_SIZE];
    entry.encode(&mut raw);
    raw
}

/// Reads `n` consecutive entries starting at byte offset `off`.
pub fn read_entries(disk: &mut Disk, off: u64, n: usize) -> Result<EntryArray, SfsError> {
    let mut raw = vec![0u8; n * ENTRY_SIZE];
    disk.read(&mut raw, off)?;
    Ok(raw.chunks_exact(ENTRY_SIZE).map(Entry::decode).collect())
}

/// Writes a fixed-length array of entries back to byte offset `off` in one
/// region-sized write.
pub fn write_entries(disk: &mut Disk, off: u64, entries: &[Entry]) -> Result<(), SfsError> {
    let mut raw = vec![0u8; entries.len() * ENTRY_SIZE];
    for (chunk, entry) in raw.chunks_exact_mut(ENTRY_SIZE).zip(entries) {
        entry.encode(chunk);
    }
    disk.write(&raw, off)
}

/// Reads the whole block table.
pub fn read_block_table(disk: &mut Disk) -> Result<Vec<u32>, SfsError> {
    let mut raw = vec![0u8; BLOCKTBL_NENTRIES * BLOCKIDX_SIZE];
    disk.read(&mut raw, BLOCKTBL_OFF)?;
    Ok(raw
        .chunks_exact(BLOCKIDX_SIZE)
        .map(|c| u32::from_le_bytes(c.try_into().unwrap()))
        .collect())
}

/// Persists the whole block table in one write.
pub fn write_block_table(disk: &mut Disk, table: &[u32]) -> Result<(), SfsError> {
    debug_assert_eq!(table.len(), BLOCKTBL_NENTRIES);
    let mut raw = vec![0u8; table.len() * BLOCKIDX_SIZE];
    for (chunk, idx) in raw.chunks_exact_mut(BLOCKIDX_SIZE).zip(table) {
        chunk.copy_from_slice(&idx.to_le_bytes());
    }
    disk.write(&raw, BLOCKTBL_OFF)
}

/// Reads one data block in full.
pub fn read_block(disk: &mut Disk, idx: u32) -> Result<Vec<u8>, SfsError> {
    let mut buf = vec![0u8; BLOCK_SIZE];
    disk.read(&mut buf, block_off(idx))?;
    Ok(buf)
}

/// Writes one data block in full.
pub fn write_block(disk: &mut Disk, idx: u32, data: &[u8]) -> Result<(), SfsError> {
    debug_assert_eq!(data.len(), BLOCK_SIZE);
    disk.write(data, block_off(idx))
}

/// Formats a fresh image: writes the header, an empty root directory, an
/// all-`EMPTY` block table, and zeroes the data region. Used by tests and
/// by a standalone `mkfs`-equivalent; the driver itself only ever mounts
/// an existing image.
pub fn format(disk: &mut Disk) -> Result<(), SfsError> {
    let mut header = [0u8; HEADER_SIZE as usize];
    header[..MAGIC.len()].copy_from_slice(MAGIC);
    disk.write(&header, HEADER_OFF)?;

    write_entries(disk, ROOT_OFF, &vec![Entry::empty(); ROOT_NENTRIES])?;
    write_block_table(disk, &vec![BLOCKIDX_EMPTY; BLOCKTBL_NENTRIES])?;

    let zero_block = vec![0u8; BLOCK_SIZE];
    for idx in 0..BLOCK_NENTRIES as u32 {
        write_block(disk, idx, &zero_block)?;
    }
    Ok(())
}

/// Verifies the header's magic is present; the engine does not otherwise
/// interpret the header.
pub fn check_magic(disk: &mut Disk) -> Result<(), SfsError> {
    let mut header = [0u8; HEADER_SIZE as usize];
    disk.read(&mut header, HEADER_OFF)?;
    if &header[..MAGIC.len()] != MAGIC {
        return Err(SfsError::InvalidArgument);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_round_trips_through_bytes() {
        let mut e = Entry::empty();
        e.set_name(b"hello.txt");
        e.size = 14;
        e.first_block = 3;

        let mut raw = [0u8; ENTRY_SIZE];
        e.encode(&mut raw);
        let decoded = Entry::decode(&raw);

        assert_eq!(decoded.name_bytes(), b"hello.txt");
        assert_eq!(decoded.size, 14);
        assert_eq!(decoded.first_block, 3);
    }

    #[test]
    fn directory_flag_and_sizemask_are_disjoint() {
        assert_eq!(DIRECTORY & SIZEMASK, 0);
        assert_eq!(DIRECTORY | SIZEMASK, u32::MAX);
    }
}
