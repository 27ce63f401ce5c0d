//! Mapping plaintext ranges onto stored blocks and chunks
//!
//! Every stored block is `encoded` bytes except possibly the last one of the
//! file, and decodes to `decoded` plaintext bytes. A plaintext range
//! `[start, end)` therefore needs blocks `[start / decoded, ceil(end / decoded))`,
//! which occupy a contiguous run of stored bytes. Only chunks overlapping that
//! run are fetched, and only the overlapping part of each.

use crate::{CoreError, Result};
use std::ops::Range;
use strata_chunkstore::{ChunkInfo, ChunkRead};
use strata_crypto::{conceal_size, BlockCodec};

/// Plaintext and stored sizes of one block
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BlockLayout {
    pub decoded: u64,
    pub encoded: u64,
}

impl BlockLayout {
    pub fn new(decoded: u64, encoded: u64) -> Self {
        Self { decoded, encoded }
    }

    /// Stored length of `n` plaintext bytes
    pub fn encoded_len(&self, n: u64) -> u64 {
        n + (self.encoded - self.decoded) * n.div_ceil(self.decoded)
    }
}

impl From<&BlockCodec> for BlockLayout {
    fn from(codec: &BlockCodec) -> Self {
        Self {
            decoded: codec.decoded_block_size(),
            encoded: codec.encoded_block_size(),
        }
    }
}

/// Block index range held by each chunk, from a prefix sum of `ceil(size / encoded)`
pub fn chunk_block_ranges(chunks: &[ChunkInfo], encoded_block_size: u64) -> Vec<Range<u64>> {
    let mut next = 0u64;
    chunks
        .iter()
        .map(|chunk| {
            let start = next;
            next += chunk.size.div_ceil(encoded_block_size);
            start..next
        })
        .collect()
}

/// Everything needed to serve one plaintext range
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReadPlan {
    /// Clipped plaintext range
    pub range: Range<u64>,
    /// Blocks to decode
    pub blocks: Range<u64>,
    /// Chunk byte ranges to fetch, in chunk order
    pub reads: Vec<ChunkRead>,
    /// Stored bytes of `blocks`; the decoder sees exactly this many
    pub encoded_len: u64,
    /// Plaintext bytes to drop from the first decoded block
    pub skip: u64,
    /// Plaintext bytes to emit
    pub take: u64,
}

impl ReadPlan {
    fn empty(at: u64) -> Self {
        Self {
            range: at..at,
            blocks: 0..0,
            reads: Vec::new(),
            encoded_len: 0,
            skip: 0,
            take: 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.take == 0
    }
}

/// Plan a read of `range` (the whole file when `None`) of a chunked file
///
/// A whole-file read fetches every chunk whole so transport checksums cover
/// them; a ranged read fetches only the overlapping parts.
pub fn plan_read(
    chunks: &[ChunkInfo],
    layout: BlockLayout,
    size: u64,
    range: Option<Range<u64>>,
) -> Result<ReadPlan> {
    if layout.decoded == 0 || layout.encoded < layout.decoded {
        return Err(CoreError::Configuration(format!(
            "invalid block layout {layout:?}"
        )));
    }

    let whole = range.is_none();
    let Range { start, end } = range.unwrap_or(0..size);
    if start > size {
        return Err(CoreError::RangeOutOfBounds { start, size });
    }
    let end = end.min(size);
    if start >= end {
        return Ok(ReadPlan::empty(start));
    }

    let stored_total = layout.encoded_len(conceal_size(size));
    let chunk_total: u64 = chunks.iter().map(|c| c.size).sum();
    if chunk_total != stored_total {
        return Err(CoreError::Integrity(format!(
            "chunks hold {chunk_total} bytes, a {size} byte file needs {stored_total}"
        )));
    }

    let start_block = start / layout.decoded;
    let end_block = end.div_ceil(layout.decoded);
    let byte_start = start_block * layout.encoded;
    let byte_end = (end_block * layout.encoded).min(stored_total);

    let mut reads = Vec::new();
    let mut offset = 0u64;
    for chunk in chunks {
        let span = offset..offset + chunk.size;
        offset = span.end;
        if whole {
            reads.push(ChunkRead::whole(chunk.clone()));
            continue;
        }
        let lo = span.start.max(byte_start);
        let hi = span.end.min(byte_end);
        if lo < hi {
            reads.push(ChunkRead {
                chunk: chunk.clone(),
                range: lo - span.start..hi - span.start,
            });
        }
    }

    Ok(ReadPlan {
        range: start..end,
        blocks: start_block..end_block,
        reads,
        encoded_len: byte_end - byte_start,
        skip: start - start_block * layout.decoded,
        take: end - start,
    })
}
