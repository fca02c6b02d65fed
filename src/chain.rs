//! Block-chain walker & free-block allocator.
//!
//! The block table is a FAT-style array: table\[i\] is the successor of
//! block `i`, or one of the sentinels `EMPTY`/`END`. These routines are
//! the only code that interprets those sentinels; the codec (`layout`)
//! just moves bytes.

use crate::disk::Disk;
use crate::error::SfsError;
use crate::layout::{self, BLOCKIDX_EMPTY, BLOCKIDX_END, BLOCK_NENTRIES};

/// Follows `n` links from `start`. Returns the resulting block index, or
/// `END` if the chain terminates before `n` hops.
pub fn skip(table: &[u32], start: u32, n: usize) -> u32 {
    let mut block = start;
    for _ in 0..n {
        if block == BLOCKIDX_END {
            return BLOCKIDX_END;
        }
        block = table[block as usize];
    }
    block
}

/// Walks the chain starting at `start`, calling `f` with each visited
/// block index in order, until `END`. Caps the walk at `BLOCK_NENTRIES`
/// steps so a corrupt table that cycles instead of terminating can't
/// hang the caller.
pub fn foreach<F: FnMut(u32)>(table: &[u32], start: u32, mut f: F) {
    let mut block = start;
    for _ in 0..BLOCK_NENTRIES {
        if block == BLOCKIDX_END {
            return;
        }
        f(block);
        block = table[block as usize];
    }
}

/// Frees every block in the chain starting at `start` by writing `EMPTY`
/// into each visited table slot, then persists the table in one write.
pub fn free(disk: &mut Disk, table: &mut [u32], start: u32) -> Result<(), SfsError> {
    let mut block = start;
    for _ in 0..BLOCK_NENTRIES {
        if block == BLOCKIDX_END {
            break;
        }
        let next = table[block as usize];
        table[block as usize] = BLOCKIDX_EMPTY;
        block = next;
    }
    layout::write_block_table(disk, table)
}

/// Scans the block table for the lowest index `i` such that
/// `i, i+1, ..., i+k-1` are all `EMPTY`. Returns `None` if no such run
/// exists.
pub fn find_free(table: &[u32], k: usize) -> Option<u32> {
    if k == 0 || k > table.len() {
        return None;
    }
    'outer: for i in 0..=table.len() - k {
        for j in 0..k {
            if table[i + j] != BLOCKIDX_EMPTY {
                continue 'outer;
            }
        }
        return Some(i as u32);
    }
    None
}

/// Writes successor links between consecutive entries of `indices` and
/// `END` into the last one.
pub fn link(table: &mut [u32], indices: &[u32]) {
    for pair in indices.windows(2) {
        table[pair[0] as usize] = pair[1];
    }
    if let Some(&last) = indices.last() {
        table[last as usize] = BLOCKIDX_END;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table_with(links: &[(u32, u32)]) -> Vec<u32> {
        let mut table = vec![BLOCKIDX_EMPTY; BLOCK_NENTRIES];
        for &(from, to) in links {
            table[from as usize] = to;
        }
        table
    }

    #[test]
    fn skip_follows_successor_links() {
        let table = table_with(&[(0, 1), (1, 2), (2, BLOCKIDX_END)]);
        assert_eq!(skip(&table, 0, 0), 0);
        assert_eq!(skip(&table, 0, 2), 2);
        assert_eq!(skip(&table, 0, 5), BLOCKIDX_END);
    }

    #[test]
    fn foreach_visits_every_block_in_order() {
        let table = table_with(&[(0, 1), (1, 2), (2, BLOCKIDX_END)]);
        let mut seen = Vec::new();
        foreach(&table, 0, |b| seen.push(b));
        assert_eq!(seen, vec![0, 1, 2]);
    }

    #[test]
    fn find_free_requires_a_contiguous_run() {
        let mut table = vec![BLOCKIDX_EMPTY; 8];
        table[3] = 99; // occupied
        assert_eq!(find_free(&table, 1), Some(0));
        assert_eq!(find_free(&table, 3), Some(0));
        assert_eq!(find_free(&table, 4), Some(4));
    }

    #[test]
    fn find_free_returns_none_when_exhausted() {
        let table = vec![0u32; 4]; // no EMPTY slots at all
        assert_eq!(find_free(&table, 1), None);
    }

    #[test]
    fn link_chains_indices_and_terminates_last() {
        let mut table = vec![BLOCKIDX_EMPTY; 4];
        link(&mut table, &[0, 1, 2]);
        assert_eq!(table[0], 1);
        assert_eq!(table[1], 2);
        assert_eq!(table[2], BLOCKIDX_END);
    }
}
