//! Version 1 B-trees indexing raw data chunks (node type 1).
//!
//! Each key holds the stored chunk size, the filter mask and the chunk's
//! logical offset, with a trailing zero offset for the element axis. Nodes
//! are written at the full size the library expects for K = 32, so a node
//! always has room for 64 children.

use crate::error::{ContainerError, Result};
use crate::format::cursor::Cursor;
use crate::format::UNDEF;

const TREE: &[u8; 4] = b"TREE";
const CHUNK_NODE: u8 = 1;

/// Children per node.
pub(crate) const NODE_ENTRIES: usize = 64;

/// One stored chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ChunkEntry {
    /// Stored (filtered) size in bytes.
    pub size: u32,
    /// Bit `i` set means filter `i` was skipped for this chunk.
    pub filter_mask: u32,
    /// Logical offset of the chunk's first element, one per axis.
    pub offsets: Vec<u64>,
    /// Address of the stored bytes.
    pub addr: u64,
}

#[derive(Debug, Clone)]
struct Key {
    size: u32,
    filter_mask: u32,
    offsets: Vec<u64>,
}

fn key_len(rank: usize) -> usize {
    8 + (rank + 1) * 8
}

fn node_len(rank: usize) -> usize {
    24 + (NODE_ENTRIES + 1) * key_len(rank) + NODE_ENTRIES * 8
}

/// Bytes taken by the tree over `entries` chunks.
pub(crate) fn tree_len(entries: usize, rank: usize) -> usize {
    if entries == 0 {
        return 0;
    }
    let mut nodes = 0;
    let mut level = entries;
    loop {
        level = level.div_ceil(NODE_ENTRIES);
        nodes += level;
        if level == 1 {
            return nodes * node_len(rank);
        }
    }
}

fn put_key(out: &mut Vec<u8>, key: &Key) {
    out.extend_from_slice(&key.size.to_le_bytes());
    out.extend_from_slice(&key.filter_mask.to_le_bytes());
    for off in &key.offsets {
        out.extend_from_slice(&off.to_le_bytes());
    }
    out.extend_from_slice(&0u64.to_le_bytes());
}

/// Lay the tree out at `base`; returns the root address and the node bytes.
///
/// `entries` must be in row-major chunk order. `chunk_dims` closes the last
/// key one chunk past the final entry.
pub(crate) fn build(entries: &[ChunkEntry], chunk_dims: &[u64], base: u64) -> (u64, Vec<u8>) {
    let Some(last) = entries.last() else {
        return (UNDEF, Vec::new());
    };
    let rank = chunk_dims.len();
    let node = node_len(rank);
    let end_key = Key {
        size: 0,
        filter_mask: 0,
        offsets: last.offsets.iter().zip(chunk_dims).map(|(o, c)| o + c).collect(),
    };
    let mut items: Vec<(Key, u64)> = entries
        .iter()
        .map(|e| {
            (
                Key {
                    size: e.size,
                    filter_mask: e.filter_mask,
                    offsets: e.offsets.clone(),
                },
                e.addr,
            )
        })
        .collect();

    let mut out = Vec::with_capacity(tree_len(entries.len(), rank));
    let mut level = 0u8;
    loop {
        let groups = items.len().div_ceil(NODE_ENTRIES);
        let mut parents = Vec::with_capacity(groups);
        for (i, group) in items.chunks(NODE_ENTRIES).enumerate() {
            let addr = base + out.len() as u64;
            let start = out.len();
            out.extend_from_slice(TREE);
            out.push(CHUNK_NODE);
            out.push(level);
            out.extend_from_slice(&(group.len() as u16).to_le_bytes());
            let left = if i > 0 { addr - node as u64 } else { UNDEF };
            let right = if i + 1 < groups { addr + node as u64 } else { UNDEF };
            out.extend_from_slice(&left.to_le_bytes());
            out.extend_from_slice(&right.to_le_bytes());
            for (key, child) in group {
                put_key(&mut out, key);
                out.extend_from_slice(&child.to_le_bytes());
            }
            let right_key = items
                .get((i + 1) * NODE_ENTRIES)
                .map(|(k, _)| k)
                .unwrap_or(&end_key);
            put_key(&mut out, right_key);
            out.resize(start + node, 0);
            parents.push((group[0].0.clone(), addr));
        }
        if parents.len() == 1 {
            return (parents[0].1, out);
        }
        items = parents;
        level += 1;
    }
}

/// Every chunk reachable from the node at `addr`, for a dataset of `rank`
/// axes.
pub(crate) fn collect(bytes: &[u8], addr: u64, rank: usize) -> Result<Vec<ChunkEntry>> {
    let mut out = Vec::new();
    collect_node(bytes, addr, rank, None, &mut out)?;
    Ok(out)
}

fn collect_node(bytes: &[u8], addr: u64, rank: usize, expect_level: Option<u8>, out: &mut Vec<ChunkEntry>) -> Result<()> {
    let mut cur = Cursor::at(bytes, addr, "chunk index")?;
    if cur.take(4)? != TREE {
        return Err(ContainerError::BadImage(format!("no B-tree node at {addr}")));
    }
    let node_type = cur.u8()?;
    if node_type != CHUNK_NODE {
        return Err(ContainerError::BadImage(format!("B-tree node type {node_type} in a chunk index")));
    }
    let level = cur.u8()?;
    if expect_level.is_some_and(|l| l != level) {
        return Err(ContainerError::BadImage(format!("B-tree level {level} out of sequence")));
    }
    let used = cur.u16()? as usize;
    cur.skip(16)?;
    for _ in 0..used {
        let size = cur.u32()?;
        let filter_mask = cur.u32()?;
        let mut offsets = Vec::with_capacity(rank);
        for _ in 0..rank {
            offsets.push(cur.u64()?);
        }
        cur.skip(8)?;
        let child = cur.u64()?;
        if level == 0 {
            out.push(ChunkEntry {
                size,
                filter_mask,
                offsets,
                addr: child,
            });
        } else {
            collect_node(bytes, child, rank, Some(level - 1), out)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entries(n: u64) -> Vec<ChunkEntry> {
        (0..n)
            .map(|i| ChunkEntry {
                size: 40,
                filter_mask: 0,
                offsets: vec![i * 10],
                addr: 10_000 + i * 40,
            })
            .collect()
    }

    #[test]
    fn single_leaf() {
        let chunks = entries(3);
        let (root, nodes) = build(&chunks, &[10], 0);
        assert_eq!(root, 0);
        assert_eq!(nodes.len(), tree_len(3, 1));
        assert_eq!(collect(&nodes, root, 1).unwrap(), chunks);
    }

    #[test]
    fn two_levels_keep_chunk_order() {
        let chunks = entries(150);
        let base = 512;
        let (root, nodes) = build(&chunks, &[10], base);
        assert_eq!(nodes.len(), tree_len(150, 1));
        assert_eq!(nodes.len(), 4 * node_len(1));
        let mut file = vec![0u8; base as usize];
        file.extend_from_slice(&nodes);
        assert_eq!(root, base + 3 * node_len(1) as u64);
        assert_eq!(collect(&file, root, 1).unwrap(), chunks);
    }

    #[test]
    fn empty_tree_is_undefined() {
        assert_eq!(build(&[], &[4], 0), (UNDEF, Vec::new()));
        assert_eq!(tree_len(0, 2), 0);
    }
}
