//! Raw-level tree walkers: statistics and structural verification.
//!
//! These walk serialized records by tag byte and never decode bucket
//! entries, so they work without knowing the tree's key and value types.
//! The inspector binary is their main caller.

use crate::error::{PenumbraError, Result};
use crate::htree::directory::{Directory, MAX_CHILDREN, MAX_DEPTH};
use crate::htree::node::{bucket_summary, DirCodec, TAG_BUCKET, TAG_DIRECTORY};
use crate::htree::tree::TreeCodec;
use crate::store::{Codec, RecordId, RecordStore};

/// Structural counters for one tree.
#[derive(Clone, Debug, Default)]
pub struct TreeStats {
    pub directories: u64,
    pub buckets: u64,
    pub entries: u64,
    /// Bucket counts indexed by bucket depth (1..=4; index 0 unused).
    pub bucket_depths: [u64; MAX_DEPTH as usize + 2],
}

/// Outcome of a structural verification walk.
#[derive(Clone, Debug, Default)]
pub struct VerifyReport {
    pub nodes_checked: u64,
    pub problems: Vec<String>,
}

impl VerifyReport {
    pub fn is_clean(&self) -> bool {
        self.problems.is_empty()
    }
}

/// Resolves a tree header record to its root directory record-id.
pub fn tree_root(store: &mut RecordStore, recid: RecordId) -> Result<RecordId> {
    store.fetch(recid, &TreeCodec)
}

/// Walks a tree identified by its header record and tallies its pages.
pub fn collect(store: &mut RecordStore, recid: RecordId) -> Result<TreeStats> {
    let root = tree_root(store, recid)?;
    let mut stats = TreeStats::default();
    walk_stats(store, root, &mut stats)?;
    Ok(stats)
}

/// Entry count below an already-loaded directory.
pub(crate) fn count_subtree_entries(store: &mut RecordStore, dir: &Directory) -> Result<u64> {
    let mut count = 0;
    for slot in 0..MAX_CHILDREN {
        let child = dir.child_at(slot);
        if child.is_none() {
            continue;
        }
        let data = store.fetch_raw(child)?;
        match data.first() {
            Some(&TAG_DIRECTORY) => {
                let sub = DirCodec.decode(&data)?;
                count += count_subtree_entries(store, &sub)?;
            }
            Some(&TAG_BUCKET) => count += bucket_summary(&data)?.1,
            _ => {
                return Err(PenumbraError::Corruption(format!(
                    "record {child} is not a tree node"
                )))
            }
        }
    }
    Ok(count)
}

fn walk_stats(store: &mut RecordStore, recid: RecordId, stats: &mut TreeStats) -> Result<()> {
    let data = store.fetch_raw(recid)?;
    match data.first() {
        Some(&TAG_DIRECTORY) => {
            stats.directories += 1;
            let dir = DirCodec.decode(&data)?;
            for slot in 0..MAX_CHILDREN {
                let child = dir.child_at(slot);
                if !child.is_none() {
                    walk_stats(store, child, stats)?;
                }
            }
        }
        Some(&TAG_BUCKET) => {
            let (depth, count) = bucket_summary(&data)?;
            stats.buckets += 1;
            stats.entries += count;
            if let Some(counter) = stats.bucket_depths.get_mut(depth as usize) {
                *counter += 1;
            }
        }
        _ => {
            return Err(PenumbraError::Corruption(format!(
                "record {recid} is not a tree node"
            )))
        }
    }
    Ok(())
}

/// Verifies the structural invariants of a tree: depth monotonicity,
/// non-empty reachable buckets, non-empty non-root directories, and
/// byte-stable directory re-encoding.
pub fn verify(store: &mut RecordStore, recid: RecordId) -> Result<VerifyReport> {
    let root = tree_root(store, recid)?;
    let mut report = VerifyReport::default();
    verify_node(store, root, 0, true, &mut report)?;
    Ok(report)
}

fn verify_node(
    store: &mut RecordStore,
    recid: RecordId,
    expected_depth: u8,
    is_root: bool,
    report: &mut VerifyReport,
) -> Result<()> {
    report.nodes_checked += 1;
    let data = store.fetch_raw(recid)?;
    match data.first() {
        Some(&TAG_DIRECTORY) => {
            let dir = match DirCodec.decode(&data) {
                Ok(dir) => dir,
                Err(err) => {
                    report
                        .problems
                        .push(format!("record {recid}: undecodable directory: {err}"));
                    return Ok(());
                }
            };
            if dir.depth() != expected_depth {
                report.problems.push(format!(
                    "record {recid}: directory depth {} where {expected_depth} expected",
                    dir.depth()
                ));
            }
            if !is_root && dir.is_empty() {
                report
                    .problems
                    .push(format!("record {recid}: empty non-root directory"));
            }
            let mut reencoded = Vec::new();
            DirCodec.encode(&dir, &mut reencoded)?;
            if reencoded != data {
                report
                    .problems
                    .push(format!("record {recid}: directory re-encoding differs"));
            }
            for slot in 0..MAX_CHILDREN {
                let child = dir.child_at(slot);
                if !child.is_none() {
                    verify_node(store, child, expected_depth + 1, false, report)?;
                }
            }
        }
        Some(&TAG_BUCKET) => match bucket_summary(&data) {
            Ok((depth, count)) => {
                if depth != expected_depth {
                    report.problems.push(format!(
                        "record {recid}: bucket depth {depth} where {expected_depth} expected"
                    ));
                }
                if count == 0 {
                    report
                        .problems
                        .push(format!("record {recid}: empty reachable bucket"));
                }
            }
            Err(err) => report
                .problems
                .push(format!("record {recid}: undecodable bucket: {err}")),
        },
        _ => report
            .problems
            .push(format!("record {recid}: unknown node tag")),
    }
    Ok(())
}
