//! Operation engine.
//!
//! One handler per filesystem callback. Each composes the resolver, the
//! chain walker/allocator, and the codec to perform its mutation against
//! the image: read the relevant region(s) into memory, mutate, write
//! back in whole-region writes. Every handler here actually implements
//! its operation, including `truncate`, `write`, and `rename`.

use std::path::Path as FsPath;

use crate::chain;
use crate::disk::Disk;
use crate::error::SfsError;
use crate::layout::{self, Entry, BLOCKIDX_END, BLOCK_SIZE, DIR_NENTRIES};
use crate::path::{name_fits, split_parent};
use crate::resolver::{resolve, resolve_dir, DirRegion};

/// What kind of node a resolved path names.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Kind {
    File,
    Directory,
}

/// Attributes the callback binding needs to answer `getattr`. Ownership
/// and timestamps are not here: they are synthesized by the binding from
/// the calling process and the current time, never persisted on disk.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Attr {
    pub kind: Kind,
    pub mode: u16,
    pub nlink: u32,
    pub size: u64,
}

pub struct Engine {
    disk: Disk,
    /// Gates the second, unused block `mkdir` allocates per new directory
    /// (a single block already holds a full directory entry array; the
    /// second is pure slack). Defaults to `true` so images created by
    /// this driver keep that slack block, matching existing on-disk
    /// layouts that expect it.
    allow_second_mkdir_block: bool,
}

impl Engine {
    pub fn open(path: &FsPath, allow_second_mkdir_block: bool) -> Result<Self, SfsError> {
        let mut disk = Disk::open(path)?;
        if disk.len()? != layout::IMAGE_SIZE {
            return Err(SfsError::InvalidArgument);
        }
        layout::check_magic(&mut disk)?;
        Ok(Self {
            disk,
            allow_second_mkdir_block,
        })
    }

    #[cfg(test)]
    pub fn disk_mut(&mut self) -> &mut Disk {
        &mut self.disk
    }

    pub fn getattr(&mut self, path: &str) -> Result<Attr, SfsError> {
        if path == "/" {
            return Ok(Attr {
                kind: Kind::Directory,
                mode: 0o755,
                nlink: 2,
                size: 0,
            });
        }
        let resolved = resolve(&mut self.disk, path)?;
        Ok(entry_attr(&resolved.entry))
    }

    pub fn readdir(&mut self, path: &str) -> Result<Vec<String>, SfsError> {
        let region = resolve_dir(&mut self.disk, path)?;
        let entries = region.read(&mut self.disk)?;
        let mut names = vec![".".to_string(), "..".to_string()];
        for entry in &entries {
            if !entry.is_empty_slot() {
                names.push(String::from_utf8_lossy(entry.name_bytes()).into_owned());
            }
        }
        Ok(names)
    }

    pub fn read(&mut self, path: &str, buf: &mut [u8], offset: u64) -> Result<usize, SfsError> {
        let resolved = resolve(&mut self.disk, path)?;
        if resolved.entry.is_directory() {
            return Err(SfsError::IsDirectory);
        }

        let file_size = resolved.entry.file_size() as u64;
        if offset >= file_size {
            return Ok(0);
        }
        let want = std::cmp::min(buf.len() as u64, file_size - offset) as usize;

        let table = layout::read_block_table(&mut self.disk)?;
        let mut block = chain::skip(&table, resolved.entry.first_block, (offset / BLOCK_SIZE as u64) as usize);
        let mut block_offset = (offset % BLOCK_SIZE as u64) as usize;
        let mut copied = 0usize;

        while copied < want && block != BLOCKIDX_END {
            let data = layout::read_block(&mut self.disk, block)?;
            let n = std::cmp::min(BLOCK_SIZE - block_offset, want - copied);
            buf[copied..copied + n].copy_from_slice(&data[block_offset..block_offset + n]);
            copied += n;
            block_offset = 0;
            block = table[block as usize];
        }
        Ok(copied)
    }

    pub fn create(&mut self, path: &str, _mode: u32) -> Result<(), SfsError> {
        let (parent, basename) = split_parent(path).ok_or(SfsError::InvalidArgument)?;
        if !name_fits(basename) {
            return Err(SfsError::NameTooLong);
        }

        let region = resolve_dir(&mut self.disk, parent)?;
        let mut entries = region.read(&mut self.disk)?;
        reject_duplicate(&entries, basename)?;
        let index = first_empty_slot(&entries).ok_or(SfsError::NoSpace)?;

        let mut entry = Entry::empty();
        entry.set_name(basename.as_bytes());
        entry.size = 0;
        entry.first_block = BLOCKIDX_END;
        entries[index] = entry;
        region.write(&mut self.disk, &entries)
    }

    pub fn mkdir(&mut self, path: &str, _mode: u32) -> Result<(), SfsError> {
        let (parent, basename) = split_parent(path).ok_or(SfsError::InvalidArgument)?;
        if !name_fits(basename) {
            return Err(SfsError::NameTooLong);
        }

        let region = resolve_dir(&mut self.disk, parent)?;
        let mut entries = region.read(&mut self.disk)?;
        reject_duplicate(&entries, basename)?;
        let index = first_empty_slot(&entries).ok_or(SfsError::NoSpace)?;

        let k = if self.allow_second_mkdir_block { 2 } else { 1 };
        let mut table = layout::read_block_table(&mut self.disk)?;
        let first = chain::find_free(&table, k).ok_or(SfsError::NoSpace)?;
        if k == 2 {
            chain::link(&mut table, &[first, first + 1]);
        } else {
            table[first as usize] = BLOCKIDX_END;
        }
        layout::write_block_table(&mut self.disk, &table)?;

        let mut entry = Entry::empty();
        entry.set_name(basename.as_bytes());
        entry.size = layout::DIRECTORY;
        entry.first_block = first;
        entries[index] = entry;
        region.write(&mut self.disk, &entries)?;

        layout::write_entries(
            &mut self.disk,
            layout::block_off(first),
            &vec![Entry::empty(); DIR_NENTRIES],
        )
    }

    pub fn rmdir(&mut self, path: &str) -> Result<(), SfsError> {
        let resolved = resolve(&mut self.disk, path)?;
        if !resolved.entry.is_directory() {
            return Err(SfsError::DirectoryRequired);
        }

        let child_entries = layout::read_entries(
            &mut self.disk,
            layout::block_off(resolved.entry.first_block),
            DIR_NENTRIES,
        )?;
        if child_entries.iter().any(|e| !e.is_empty_slot()) {
            return Err(SfsError::NotEmpty);
        }

        clear_slot(&mut self.disk, resolved.parent, resolved.index)?;

        let mut table = layout::read_block_table(&mut self.disk)?;
        chain::free(&mut self.disk, &mut table, resolved.entry.first_block)
    }

    pub fn unlink(&mut self, path: &str) -> Result<(), SfsError> {
        let resolved = resolve(&mut self.disk, path)?;
        if resolved.entry.is_directory() {
            return Err(SfsError::IsDirectory);
        }

        clear_slot(&mut self.disk, resolved.parent, resolved.index)?;

        let mut table = layout::read_block_table(&mut self.disk)?;
        chain::free(&mut self.disk, &mut table, resolved.entry.first_block)
    }

    pub fn truncate(&mut self, path: &str, new_size: u64) -> Result<(), SfsError> {
        let mut resolved = resolve(&mut self.disk, path)?;
        if resolved.entry.is_directory() {
            return Err(SfsError::IsDirectory);
        }

        let mut table = layout::read_block_table(&mut self.disk)?;
        resize_chain(&mut self.disk, &mut table, &mut resolved.entry.first_block, new_size)?;
        layout::write_block_table(&mut self.disk, &table)?;

        resolved.entry.size = new_size as u32;
        resolved
            .parent
            .write_one(&mut self.disk, resolved.index, &resolved.entry)
    }

    pub fn write(&mut self, path: &str, buf: &[u8], offset: u64) -> Result<usize, SfsError> {
        let mut resolved = resolve(&mut self.disk, path)?;
        if resolved.entry.is_directory() {
            return Err(SfsError::IsDirectory);
        }

        let old_size = resolved.entry.file_size() as u64;
        let new_size = std::cmp::max(old_size, offset + buf.len() as u64);

        let mut table = layout::read_block_table(&mut self.disk)?;
        resize_chain(&mut self.disk, &mut table, &mut resolved.entry.first_block, new_size)?;
        layout::write_block_table(&mut self.disk, &table)?;

        if offset > old_size {
            let gap = vec![0u8; (offset - old_size) as usize];
            write_range(&mut self.disk, &table, resolved.entry.first_block, old_size, &gap)?;
        }
        write_range(&mut self.disk, &table, resolved.entry.first_block, offset, buf)?;

        resolved.entry.size = new_size as u32;
        resolved
            .parent
            .write_one(&mut self.disk, resolved.index, &resolved.entry)?;
        Ok(buf.len())
    }

    pub fn rename(&mut self, old_path: &str, new_path: &str) -> Result<(), SfsError> {
        let (new_parent, new_basename) = split_parent(new_path).ok_or(SfsError::InvalidArgument)?;
        if !name_fits(new_basename) {
            return Err(SfsError::NameTooLong);
        }

        let source = resolve(&mut self.disk, old_path)?;
        let dest_region = resolve_dir(&mut self.disk, new_parent)?;
        let mut dest_entries = dest_region.read(&mut self.disk)?;
        reject_duplicate(&dest_entries, new_basename)?;
        let dest_index = first_empty_slot(&dest_entries).ok_or(SfsError::NoSpace)?;

        let mut moved = source.entry.clone();
        moved.set_name(new_basename.as_bytes());
        dest_entries[dest_index] = moved;
        dest_region.write(&mut self.disk, &dest_entries)?;

        clear_slot(&mut self.disk, source.parent, source.index)
    }
}

fn entry_attr(entry: &Entry) -> Attr {
    if entry.is_directory() {
        Attr {
            kind: Kind::Directory,
            mode: 0o755,
            nlink: 2,
            size: 0,
        }
    } else {
        Attr {
            kind: Kind::File,
            mode: 0o644,
            nlink: 1,
            size: entry.file_size() as u64,
        }
    }
}

fn first_empty_slot(entries: &[Entry]) -> Option<usize> {
    entries.iter().position(|e| e.is_empty_slot())
}

fn reject_duplicate(entries: &[Entry], name: &str) -> Result<(), SfsError> {
    if entries
        .iter()
        .any(|e| !e.is_empty_slot() && e.name_bytes() == name.as_bytes())
    {
        return Err(SfsError::AlreadyExists);
    }
    Ok(())
}

fn clear_slot(disk: &mut Disk, region: DirRegion, index: usize) -> Result<(), SfsError> {
    region.write_one(disk, index, &Entry::empty())
}

/// Number of blocks currently backing a chain of `size` bytes, assuming
/// the engine's own invariant that a chain never holds more whole blocks
/// than its size requires.
fn blocks_for(size: u64) -> usize {
    ((size + BLOCK_SIZE as u64 - 1) / BLOCK_SIZE as u64) as usize
}

fn chain_len(table: &[u32], first_block: u32) -> usize {
    let mut n = 0;
    chain::foreach(table, first_block, |_| n += 1);
    n
}

/// Grows or shrinks the chain rooted at `*first_block` to hold exactly
/// `blocks_for(new_size)` blocks, updating `table` and `*first_block` in
/// place. Newly allocated blocks are zeroed before being linked in.
fn resize_chain(
    disk: &mut Disk,
    table: &mut [u32],
    first_block: &mut u32,
    new_size: u64,
) -> Result<(), SfsError> {
    let needed = blocks_for(new_size);
    let have = if *first_block == BLOCKIDX_END {
        0
    } else {
        chain_len(table, *first_block)
    };

    if needed == have {
        return Ok(());
    }

    if needed < have {
        if needed == 0 {
            chain::free(disk, table, *first_block)?;
            *first_block = BLOCKIDX_END;
        } else {
            let new_tail = chain::skip(table, *first_block, needed - 1);
            let excess_head = table[new_tail as usize];
            table[new_tail as usize] = BLOCKIDX_END;
            chain::free(disk, table, excess_head)?;
        }
        return Ok(());
    }

    let to_add = needed - have;
    let zero_block = vec![0u8; BLOCK_SIZE];
    let mut new_indices = Vec::with_capacity(to_add);
    for _ in 0..to_add {
        let idx = chain::find_free(table, 1).ok_or(SfsError::NoSpace)?;
        table[idx as usize] = BLOCKIDX_END;
        layout::write_block(disk, idx, &zero_block)?;
        new_indices.push(idx);
    }
    chain::link(table, &new_indices);

    if *first_block == BLOCKIDX_END {
        *first_block = new_indices[0];
    } else {
        let old_tail = chain::skip(table, *first_block, have - 1);
        table[old_tail as usize] = new_indices[0];
    }
    Ok(())
}

/// Writes `data` into the chain rooted at `first_block` starting at byte
/// offset `start`, spanning as many blocks as `data` requires. The chain
/// must already be large enough (callers grow it with `resize_chain`
/// first).
fn write_range(
    disk: &mut Disk,
    table: &[u32],
    first_block: u32,
    start: u64,
    data: &[u8],
) -> Result<(), SfsError> {
    let mut remaining = data;
    let mut abs = start;
    while !remaining.is_empty() {
        let block_index = (abs / BLOCK_SIZE as u64) as usize;
        let block_offset = (abs % BLOCK_SIZE as u64) as usize;
        let block_no = chain::skip(table, first_block, block_index);
        if block_no == BLOCKIDX_END {
            return Err(SfsError::InvalidArgument);
        }

        let mut block = layout::read_block(disk, block_no)?;
        let n = std::cmp::min(BLOCK_SIZE - block_offset, remaining.len());
        block[block_offset..block_offset + n].copy_from_slice(&remaining[..n]);
        layout::write_block(disk, block_no, &block)?;

        remaining = &remaining[n..];
        abs += n as u64;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::{format, BLOCKIDX_EMPTY};
    use tempfile::NamedTempFile;

    fn fresh_engine() -> (Engine, NamedTempFile) {
        let tmp = NamedTempFile::new().unwrap();
        {
            let mut disk = Disk::open(tmp.path()).unwrap();
            format(&mut disk).unwrap();
        }
        (Engine::open(tmp.path(), true).unwrap(), tmp)
    }

    #[test]
    fn getattr_root_is_a_directory_with_two_links() {
        let (mut engine, _tmp) = fresh_engine();
        let attr = engine.getattr("/").unwrap();
        assert_eq!(attr.kind, Kind::Directory);
        assert_eq!(attr.mode, 0o755);
        assert_eq!(attr.nlink, 2);
    }

    #[test]
    fn mkdir_then_readdir_lists_new_entry_and_links_two_blocks() {
        let (mut engine, _tmp) = fresh_engine();
        engine.mkdir("/a", 0o755).unwrap();

        assert_eq!(engine.readdir("/").unwrap(), vec![".", "..", "a"]);

        let table = layout::read_block_table(&mut engine.disk).unwrap();
        assert_eq!(table[0], 1);
        assert_eq!(table[1], BLOCKIDX_END);
    }

    #[test]
    fn nested_mkdir_allocates_further_blocks() {
        let (mut engine, _tmp) = fresh_engine();
        engine.mkdir("/a", 0o755).unwrap();
        engine.mkdir("/a/b", 0o755).unwrap();

        assert_eq!(engine.readdir("/a").unwrap(), vec![".", "..", "b"]);

        let table = layout::read_block_table(&mut engine.disk).unwrap();
        assert_eq!(table[2], 3);
        assert_eq!(table[3], BLOCKIDX_END);
    }

    #[test]
    fn rmdir_rejects_non_empty_then_succeeds_once_emptied() {
        let (mut engine, _tmp) = fresh_engine();
        engine.mkdir("/a", 0o755).unwrap();
        engine.mkdir("/a/b", 0o755).unwrap();

        assert!(matches!(engine.rmdir("/a").unwrap_err(), SfsError::NotEmpty));
        engine.rmdir("/a/b").unwrap();
        engine.rmdir("/a").unwrap();

        assert_eq!(engine.readdir("/").unwrap(), vec![".", ".."]);
        let table = layout::read_block_table(&mut engine.disk).unwrap();
        assert!(table.iter().all(|&b| b == BLOCKIDX_EMPTY));
    }

    #[test]
    fn create_then_unlink_round_trips_to_empty() {
        let (mut engine, _tmp) = fresh_engine();
        engine.create("/x", 0o644).unwrap();
        assert_eq!(engine.getattr("/x").unwrap().size, 0);

        engine.unlink("/x").unwrap();
        assert!(matches!(engine.getattr("/x").unwrap_err(), SfsError::NotFound));
    }

    #[test]
    fn create_rejects_duplicate_name() {
        let (mut engine, _tmp) = fresh_engine();
        engine.create("/x", 0o644).unwrap();
        assert!(matches!(
            engine.create("/x", 0o644).unwrap_err(),
            SfsError::AlreadyExists
        ));
    }

    #[test]
    fn write_then_read_round_trips_across_block_boundary() {
        let (mut engine, _tmp) = fresh_engine();
        engine.create("/big", 0o644).unwrap();

        let payload = vec![0xABu8; BLOCK_SIZE + 10];
        let written = engine.write("/big", &payload, 0).unwrap();
        assert_eq!(written, payload.len());
        assert_eq!(engine.getattr("/big").unwrap().size, payload.len() as u64);

        let mut buf = vec![0u8; payload.len()];
        let read = engine.read("/big", &mut buf, 0).unwrap();
        assert_eq!(read, payload.len());
        assert_eq!(buf, payload);
    }

    #[test]
    fn write_past_eof_zero_fills_the_gap() {
        let (mut engine, _tmp) = fresh_engine();
        engine.create("/sparse", 0o644).unwrap();
        engine.write("/sparse", b"end", 10).unwrap();

        let mut buf = vec![0u8; 13];
        engine.read("/sparse", &mut buf, 0).unwrap();
        assert_eq!(&buf[..10], &[0u8; 10]);
        assert_eq!(&buf[10..], b"end");
    }

    #[test]
    fn truncate_shrinks_and_frees_trailing_blocks() {
        let (mut engine, _tmp) = fresh_engine();
        engine.create("/f", 0o644).unwrap();
        engine.write("/f", &vec![1u8; BLOCK_SIZE * 2], 0).unwrap();

        engine.truncate("/f", 5).unwrap();
        assert_eq!(engine.getattr("/f").unwrap().size, 5);

        let mut buf = [0u8; 5];
        engine.read("/f", &mut buf, 0).unwrap();
        assert_eq!(buf, [1u8; 5]);
    }

    #[test]
    fn rename_moves_entry_between_directories() {
        let (mut engine, _tmp) = fresh_engine();
        engine.mkdir("/dst", 0o755).unwrap();
        engine.create("/f", 0o644).unwrap();
        engine.write("/f", b"hi", 0).unwrap();

        engine.rename("/f", "/dst/g").unwrap();

        assert!(matches!(engine.getattr("/f").unwrap_err(), SfsError::NotFound));
        let mut buf = [0u8; 2];
        engine.read("/dst/g", &mut buf, 0).unwrap();
        assert_eq!(&buf, b"hi");
    }

    #[test]
    fn read_clamps_to_file_size_and_supports_partial_offset() {
        let (mut engine, _tmp) = fresh_engine();
        engine.create("/hello.txt", 0o644).unwrap();
        engine.write("/hello.txt", b"Hello, world!\n", 0).unwrap();

        let mut buf = [0u8; 100];
        let n = engine.read("/hello.txt", &mut buf, 0).unwrap();
        assert_eq!(n, 14);
        assert_eq!(&buf[..14], b"Hello, world!\n");

        let mut buf2 = [0u8; 5];
        let n2 = engine.read("/hello.txt", &mut buf2, 7).unwrap();
        assert_eq!(n2, 5);
        assert_eq!(&buf2, b"world");
    }
}
