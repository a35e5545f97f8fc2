//! BM25 Term Statistics
//!
//! Segments with BM25-enabled text fields keep a term-frequency sketch per
//! field: how many rows were seen, how many tokens in total, and how often
//! each token occurred. The sketch is updated as rows are buffered, merged
//! into the segment's running statistics on sync, and serialized into the
//! bm25_log artifact alongside the insert binlogs.
//!
//! Tokens are stored as 32-bit hashes. The query side only needs frequency
//! ranking, so hash collisions cost a little precision, never correctness.

use bytes::{BufMut, BytesMut};
use std::collections::hash_map::DefaultHasher;
use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};

/// Term-frequency statistics for one text field of one segment
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Bm25Stats {
    /// Rows contributing to this sketch
    pub num_rows: u64,
    /// Total token occurrences across all rows
    pub num_tokens: u64,
    /// token hash => occurrence count, ordered for deterministic output
    pub token_freqs: BTreeMap<u32, u64>,
}

fn hash_token(token: &str) -> u32 {
    let mut hasher = DefaultHasher::new();
    token.hash(&mut hasher);
    hasher.finish() as u32
}

impl Bm25Stats {
    /// Tokenize and record one document
    pub fn process_text(&mut self, text: &str) {
        self.num_rows += 1;
        for token in text.split_whitespace() {
            self.num_tokens += 1;
            *self.token_freqs.entry(hash_token(token)).or_insert(0) += 1;
        }
    }

    /// Fold another sketch into this one
    pub fn merge(&mut self, other: &Bm25Stats) {
        self.num_rows += other.num_rows;
        self.num_tokens += other.num_tokens;
        for (token, count) in &other.token_freqs {
            *self.token_freqs.entry(*token).or_insert(0) += count;
        }
    }

    pub fn is_empty(&self) -> bool {
        self.num_rows == 0
    }

    /// Approximate in-memory size in bytes
    pub fn memory_size(&self) -> usize {
        16 + self.token_freqs.len() * 12
    }

    /// Encode to the bm25_log blob layout: counts then sorted (token, freq)
    /// pairs, all little-endian
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(24 + self.token_freqs.len() * 12);
        buf.put_u64_le(self.num_rows);
        buf.put_u64_le(self.num_tokens);
        buf.put_u64_le(self.token_freqs.len() as u64);
        for (token, count) in &self.token_freqs {
            buf.put_u32_le(*token);
            buf.put_u64_le(*count);
        }
        buf.to_vec()
    }
}
