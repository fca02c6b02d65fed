//! Path resolver.
//!
//! Walks a slash-separated path from the root directory into nested
//! directories, returning the matched entry and its absolute byte offset
//! in the image. At each step, linearly search the current directory's
//! entry array for a slot whose filename equals the next path component;
//! descend into the block pointed to by `first_block` if more components
//! remain.
//!
//! Does not allocate beyond the entry-array buffers it reads; comparisons
//! are byte-exact and the first match wins (invariants forbid duplicate
//! names within one directory).

use crate::disk::Disk;
use crate::error::SfsError;
use crate::layout::{self, Entry, EntryArray, BLOCKIDX_END, DIR_NENTRIES, ROOT_NENTRIES, ROOT_OFF};
use crate::path::Path;

/// Identifies which on-disk entry array a directory's contents live in:
/// the fixed root region, or a data block belonging to a sub-directory.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DirRegion {
    Root,
    Block(u32),
}

impl DirRegion {
    pub fn offset(self) -> u64 {
        match self {
            DirRegion::Root => ROOT_OFF,
            DirRegion::Block(idx) => layout::block_off(idx),
        }
    }

    pub fn nentries(self) -> usize {
        match self {
            DirRegion::Root => ROOT_NENTRIES,
            DirRegion::Block(_) => DIR_NENTRIES,
        }
    }

    pub fn entry_offset(self, i: usize) -> u64 {
        self.offset() + (i * layout::ENTRY_SIZE) as u64
    }

    pub fn read(self, disk: &mut Disk) -> Result<EntryArray, SfsError> {
        layout::read_entries(disk, self.offset(), self.nentries())
    }

    pub fn write(self, disk: &mut Disk, entries: &[Entry]) -> Result<(), SfsError> {
        layout::write_entries(disk, self.offset(), entries)
    }

    /// Rewrites a single slot in place without reading or rewriting the
    /// rest of the region.
    pub fn write_one(self, disk: &mut Disk, index: usize, entry: &Entry) -> Result<(), SfsError> {
        let raw = layout::encode_entry(entry);
        disk.write(&raw, self.entry_offset(index))
    }
}

/// A successfully resolved path: the matched entry, its byte offset in
/// the image, and the directory region it lives in (needed by callers
/// that go on to rewrite the slot in place).
pub struct Resolved {
    pub entry: Entry,
    pub offset: u64,
    pub parent: DirRegion,
    pub index: usize,
}

/// Resolves an absolute path to its directory entry. Fails with
/// `NotFound` for a missing component, a non-directory traversed as if it
/// were a directory, or a malformed (non-absolute) path. `/` itself has
/// no `Entry` — callers special-case it before calling this.
pub fn resolve(disk: &mut Disk, path: &str) -> Result<Resolved, SfsError> {
    let p = Path::new(path);
    if !p.is_absolute() {
        return Err(SfsError::InvalidArgument);
    }

    let mut region = DirRegion::Root;
    let mut rest = p;
    loop {
        let (name, tail) = rest.skipelem().ok_or(SfsError::NotFound)?;
        let entries = region.read(disk)?;
        let index = entries
            .iter()
            .position(|e| !e.is_empty_slot() && e.name_bytes() == name.as_bytes())
            .ok_or(SfsError::NotFound)?;

        if tail.is_empty() {
            return Ok(Resolved {
                entry: entries[index].clone(),
                offset: region.entry_offset(index),
                parent: region,
                index,
            });
        }

        if !entries[index].is_directory() {
            return Err(SfsError::NotFound);
        }
        region = DirRegion::Block(entries[index].first_block);
        rest = tail;
    }
}

/// Resolves `path` to the `DirRegion` holding its contents: `/` maps to
/// the root region directly, anything else must resolve to a directory
/// entry.
pub fn resolve_dir(disk: &mut Disk, path: &str) -> Result<DirRegion, SfsError> {
    if path == "/" {
        return Ok(DirRegion::Root);
    }
    let resolved = resolve(disk, path)?;
    if !resolved.entry.is_directory() {
        return Err(SfsError::DirectoryRequired);
    }
    if resolved.entry.first_block == BLOCKIDX_END {
        return Err(SfsError::NotFound);
    }
    Ok(DirRegion::Block(resolved.entry.first_block))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::format;
    use crate::ops::Engine;
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
    fn resolve_missing_top_level_path_is_not_found() {
        let (mut engine, _tmp) = fresh_engine();
        let err = resolve(engine.disk_mut(), "/missing").unwrap_err();
        assert!(matches!(err, SfsError::NotFound));
    }

    #[test]
    fn resolve_through_nested_directory_finds_leaf() {
        let (mut engine, _tmp) = fresh_engine();
        engine.mkdir("/a", 0o755).unwrap();
        engine.create("/a/b.txt", 0o644).unwrap();

        let resolved = resolve(engine.disk_mut(), "/a/b.txt").unwrap();
        assert_eq!(resolved.entry.name_bytes(), b"b.txt");
    }

    #[test]
    fn resolve_rejects_traversal_through_a_file() {
        let (mut engine, _tmp) = fresh_engine();
        engine.create("/f", 0o644).unwrap();
        let err = resolve(engine.disk_mut(), "/f/nested").unwrap_err();
        assert!(matches!(err, SfsError::NotFound));
    }
}
