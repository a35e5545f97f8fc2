//! Primary-Key Bloom Filters and Batch Statistics
//!
//! Every growing segment keeps a bloom filter over the primary keys it has
//! accepted. The write buffer probes these filters to route deletes: if a
//! filter says a key is definitely absent, the segment can be skipped.
//!
//! ## False Positive Rate
//!
//! - `might_contain(key) == false`: the key is definitely NOT in the batch
//! - `might_contain(key) == true`: the key MIGHT be there (default 0.1%
//!   false positive rate); a false positive only costs a spurious delete
//!   entry, never lost data
//!
//! ## Batch Structure
//!
//! Filters are kept per *sync batch*, not per segment: each synced batch
//! gets its own `PkStats` (bloom + min/max key), and `BloomFilterSet`
//! holds the current in-progress batch plus the rolled history. Probing
//! consults every batch; the flush-time merged stats artifact serializes
//! the whole history.

use crate::error::{Error, Result};
use bloomfilter::Bloom;
use serde::{Deserialize, Serialize};
use vectorhouse_core::PrimaryKey;

/// Default false positive rate for pk filters
const DEFAULT_FALSE_POSITIVE_RATE: f64 = 0.001;

/// Default capacity for a batch filter
const DEFAULT_EXPECTED_KEYS: usize = 100_000;

/// Bloom filter sizing parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BloomFilterConfig {
    /// Expected number of keys per batch
    pub expected_keys: usize,

    /// Target false positive rate
    #[serde(default = "default_fp_rate")]
    pub false_positive_rate: f64,
}

fn default_fp_rate() -> f64 {
    DEFAULT_FALSE_POSITIVE_RATE
}

impl Default for BloomFilterConfig {
    fn default() -> Self {
        Self {
            expected_keys: DEFAULT_EXPECTED_KEYS,
            false_positive_rate: DEFAULT_FALSE_POSITIVE_RATE,
        }
    }
}

/// Serialization header for a pk bloom filter
#[derive(Serialize, Deserialize)]
struct PkBloomHeader {
    config: BloomFilterConfig,
    item_count: usize,
    num_bits: u64,
    num_hashes: u32,
    sip_keys: [(u64, u64); 2],
}

/// Bloom filter over primary-key bytes
pub struct PkBloomFilter {
    bloom: Bloom<[u8]>,
    config: BloomFilterConfig,
    item_count: usize,
}

impl PkBloomFilter {
    pub fn new(config: BloomFilterConfig) -> Self {
        let bloom = Bloom::new_for_fp_rate(config.expected_keys, config.false_positive_rate);
        Self {
            bloom,
            config,
            item_count: 0,
        }
    }

    pub fn add(&mut self, key: &PrimaryKey) {
        self.bloom.set(key.as_bytes().as_ref());
        self.item_count += 1;
    }

    /// `false` means definitely absent; `true` means possibly present
    pub fn might_contain(&self, key: &PrimaryKey) -> bool {
        self.bloom.check(key.as_bytes().as_ref())
    }

    pub fn item_count(&self) -> usize {
        self.item_count
    }

    /// Serialize to bytes: one version byte, a JSON header, then the bitmap
    pub fn to_bytes(&self) -> Vec<u8> {
        let header = PkBloomHeader {
            config: self.config.clone(),
            item_count: self.item_count,
            num_bits: self.bloom.number_of_bits(),
            num_hashes: self.bloom.number_of_hash_functions(),
            sip_keys: self.bloom.sip_keys(),
        };
        let header_json = serde_json::to_vec(&header).unwrap_or_default();
        let bitmap = self.bloom.bitmap();

        let mut out = Vec::with_capacity(1 + 4 + header_json.len() + bitmap.len());
        out.push(1); // version
        out.extend_from_slice(&(header_json.len() as u32).to_le_bytes());
        out.extend_from_slice(&header_json);
        out.extend_from_slice(&bitmap);
        out
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.is_empty() {
            return Err(Error::InvalidArgument("empty bloom filter data".into()));
        }
        if data[0] != 1 {
            return Err(Error::InvalidArgument(format!(
                "unsupported bloom filter version {}",
                data[0]
            )));
        }
        if data.len() < 5 {
            return Err(Error::InvalidArgument("truncated bloom filter".into()));
        }
        let header_len = u32::from_le_bytes([data[1], data[2], data[3], data[4]]) as usize;
        if data.len() < 5 + header_len {
            return Err(Error::InvalidArgument("truncated bloom filter header".into()));
        }
        let header: PkBloomHeader = serde_json::from_slice(&data[5..5 + header_len])
            .map_err(|e| Error::InvalidArgument(format!("invalid bloom filter header: {e}")))?;
        let bitmap = &data[5 + header_len..];

        let bloom = Bloom::from_existing(
            bitmap,
            header.num_bits,
            header.num_hashes,
            header.sip_keys,
        );
        Ok(Self {
            bloom,
            config: header.config,
            item_count: header.item_count,
        })
    }
}

/// Primary-key statistics for one sync batch: min/max key plus bloom filter
pub struct PkStats {
    pub pk_field_id: i64,
    pub min_pk: Option<PrimaryKey>,
    pub max_pk: Option<PrimaryKey>,
    pub bloom: PkBloomFilter,
}

impl PkStats {
    pub fn new(pk_field_id: i64, config: BloomFilterConfig) -> Self {
        Self {
            pk_field_id,
            min_pk: None,
            max_pk: None,
            bloom: PkBloomFilter::new(config),
        }
    }

    pub fn update(&mut self, key: &PrimaryKey) {
        self.bloom.add(key);
        match &self.min_pk {
            Some(min) if key >= min => {}
            _ => self.min_pk = Some(key.clone()),
        }
        match &self.max_pk {
            Some(max) if key <= max => {}
            _ => self.max_pk = Some(key.clone()),
        }
    }

    pub fn row_count(&self) -> usize {
        self.bloom.item_count()
    }
}

/// One rolled batch in a segment's stats history.
///
/// Entries rolled at sync dispatch are provisional: they carry the
/// accumulated batch filter so delete probing stays covered while the sync
/// is in flight. When the pack writer serializes the batch it recomputes
/// exact stats and confirms the entry.
pub struct RolledStats {
    pub stats: PkStats,
    provisional: bool,
}

/// Per-segment set of batch pk stats: the in-progress batch plus history.
///
/// The history never shrinks while the segment lives; delete routing probes
/// every batch, and the flush-time merged artifact serializes all of them.
pub struct BloomFilterSet {
    pk_field_id: i64,
    config: BloomFilterConfig,
    current: Option<PkStats>,
    history: Vec<RolledStats>,
}

impl BloomFilterSet {
    pub fn new(pk_field_id: i64, config: BloomFilterConfig) -> Self {
        Self {
            pk_field_id,
            config,
            current: None,
            history: Vec::new(),
        }
    }

    /// Record incoming primary keys into the current batch
    pub fn update_pk_range(&mut self, keys: &[PrimaryKey]) {
        let current = self
            .current
            .get_or_insert_with(|| PkStats::new(self.pk_field_id, self.config.clone()));
        for key in keys {
            current.update(key);
        }
    }

    /// Roll batch stats into history.
    ///
    /// With no payload (sync dispatch), the accumulated current batch is
    /// rolled as a provisional entry. With a payload (pack writer), the
    /// recomputed authoritative stats confirm the oldest provisional
    /// entry; per-segment sync tasks run in FIFO order, so provisional
    /// entries are confirmed in the order they were rolled.
    pub fn roll(&mut self, stats: Option<PkStats>) {
        match stats {
            Some(stats) => {
                match self.history.iter_mut().find(|entry| entry.provisional) {
                    Some(entry) => {
                        entry.stats = stats;
                        entry.provisional = false;
                    }
                    None => self.history.push(RolledStats {
                        stats,
                        provisional: false,
                    }),
                }
            }
            None => {
                if let Some(current) = self.current.take() {
                    self.history.push(RolledStats {
                        stats: current,
                        provisional: true,
                    });
                }
            }
        }
    }

    /// Whether any batch of this segment might contain the key
    pub fn might_contain(&self, key: &PrimaryKey) -> bool {
        self.current
            .iter()
            .chain(self.history.iter().map(|entry| &entry.stats))
            .any(|stats| stats.bloom.might_contain(key))
    }

    pub fn history(&self) -> &[RolledStats] {
        &self.history
    }

    pub fn pk_field_id(&self) -> i64 {
        self.pk_field_id
    }
}
