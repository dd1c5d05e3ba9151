//! Deterministic aggregate hashing over a table's visible rows
//!
//! Each row is encoded into its own precomputed, non-overlapping slice of
//! one contiguous buffer (scatter-gather), so encoding parallelizes across
//! any number of rayon workers without synchronization, and the digest
//! depends only on the final (key, fields, status) tuples — never on write
//! order or worker count.

use crate::entry::Entry;
use crate::schema::TableInfo;
use rayon::prelude::*;
use sha2::{Digest, Sha256};

/// 32-byte SHA-256 digest used as the table's consensus commitment.
pub type Sha256Hash = [u8; 32];

/// Reported by tables that do not participate in consensus.
pub const ZERO_HASH: Sha256Hash = [0u8; 32];

/// Byte length of one row's hash span: `name || value` for every hashable
/// field in the entry's fixed field order, plus one status byte.
fn row_span_len(info: &TableInfo, entry: &Entry) -> usize {
    let fields: usize = entry
        .fields
        .iter()
        .filter(|(name, _)| info.is_hash_field(name))
        .map(|(name, value)| name.len() + value.len())
        .sum();
    fields + 1
}

fn encode_row_into(buf: &mut [u8], info: &TableInfo, entry: &Entry) {
    let mut at = 0;
    for (name, value) in &entry.fields {
        if !info.is_hash_field(name) {
            continue;
        }
        buf[at..at + name.len()].copy_from_slice(name.as_bytes());
        at += name.len();
        buf[at..at + value.len()].copy_from_slice(value);
        at += value.len();
    }
    buf[at] = entry.status.as_byte();
}

/// Hash the given rows. The caller passes the full visible row set; rows
/// are sorted by key here so any enumeration order produces the same
/// digest.
pub fn aggregate_hash(info: &TableInfo, mut rows: Vec<(String, Entry)>) -> Sha256Hash {
    rows.sort_by(|a, b| a.0.cmp(&b.0));

    let lens: Vec<usize> = rows
        .iter()
        .map(|(_, entry)| row_span_len(info, entry))
        .collect();
    let total: usize = lens.iter().sum();

    let mut buf = vec![0u8; total];

    // Carve the buffer into disjoint per-row slices up front; workers then
    // scatter into their own slice with no shared mutable state.
    let mut spans: Vec<&mut [u8]> = Vec::with_capacity(rows.len());
    let mut rest = buf.as_mut_slice();
    for len in &lens {
        let (span, tail) = rest.split_at_mut(*len);
        spans.push(span);
        rest = tail;
    }

    spans
        .into_par_iter()
        .zip(rows.par_iter())
        .for_each(|(span, (_, entry))| encode_row_into(span, info, entry));

    Sha256::digest(&buf).into()
}
