//! Batched transfer planning.
//!
//! In batched mode the server packs many compressed blobs back to back into
//! named batch files. Only the blobs still missing locally are requested, and
//! neighbouring blobs are coalesced into one ranged GET.

use std::collections::{BTreeMap, HashSet};

use crate::catalog::{BatchTable, BatchedFile};

use super::transport::ByteRange;

/// One blob inside a span.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchEntry {
    pub hash: String,
    pub file: BatchedFile,
}

/// A contiguous byte range of one batch, fetched with a single request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchSpan {
    pub batch: String,
    pub range: ByteRange,
    /// The span is the entire batch, so no `Range` header is needed.
    pub whole_batch: bool,
    /// Entries in offset order.
    pub entries: Vec<BatchEntry>,
}

impl BatchSpan {
    /// Range to request, or `None` for the whole batch.
    pub fn request_range(&self) -> Option<ByteRange> {
        (!self.whole_batch).then_some(self.range)
    }
}

/// Result of planning.
#[derive(Debug, Clone, Default)]
pub struct BatchPlan {
    pub spans: Vec<BatchSpan>,
    /// Wanted hashes no batch lists; fetched one by one instead.
    pub unbatched: Vec<String>,
}

/// Plan batched transfers for `wanted`.
///
/// Each hash is taken from the first batch (by name) that lists it.
pub fn plan_batches(batches: &BatchTable, wanted: &HashSet<String>) -> BatchPlan {
    let mut assigned: HashSet<&str> = HashSet::new();
    let mut per_batch: BTreeMap<&str, Vec<BatchEntry>> = BTreeMap::new();

    for (name, files) in batches {
        for (hash, file) in files {
            if wanted.contains(hash) && assigned.insert(hash.as_str()) {
                per_batch.entry(name.as_str()).or_default().push(BatchEntry {
                    hash: hash.clone(),
                    file: *file,
                });
            }
        }
    }

    let mut unbatched: Vec<String> = wanted
        .iter()
        .filter(|h| !assigned.contains(h.as_str()))
        .cloned()
        .collect();
    unbatched.sort();

    let mut spans = Vec::new();
    for (name, mut entries) in per_batch {
        entries.sort_by_key(|e| e.file.offset);
        let batch_len = batches
            .get(name)
            .map(|files| {
                files
                    .values()
                    .map(|f| f.offset + f.size_compressed)
                    .max()
                    .unwrap_or(0)
            })
            .unwrap_or(0);

        let mut name_spans: Vec<BatchSpan> = Vec::new();
        for entry in entries {
            let start = entry.file.offset;
            let len = entry.file.size_compressed;
            match name_spans.last_mut() {
                Some(span) if span.range.end + 1 == start => {
                    span.range.end = start + len.saturating_sub(1);
                    span.entries.push(entry);
                }
                _ => name_spans.push(BatchSpan {
                    batch: name.to_string(),
                    range: ByteRange::from_len(start, len),
                    whole_batch: false,
                    entries: vec![entry],
                }),
            }
        }

        if let [only] = name_spans.as_mut_slice() {
            only.whole_batch = only.range.start == 0 && only.range.end + 1 == batch_len;
        }
        spans.extend(name_spans);
    }

    BatchPlan { spans, unbatched }
}
