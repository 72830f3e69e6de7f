use std::fmt::Display;

use thiserror::Error;

/// Wall-clock timestamp aligned down to a multiple of a store's slot
/// duration. Matches the on-disk width (u32, little-endian).
pub type Epoch = u32;

/// Dense column index assigned to a metric name on first write.
pub type MetricIndex = u32;

/// A single storage slot. Stored little-endian; consolidation arithmetic
/// reinterprets it as signed.
pub type SeriesValue = u64;

pub const SLOT_VALUE_LEN: usize = std::mem::size_of::<SeriesValue>();

/// Number of slots covered by one fragment, the unit of compression and
/// persistence.
pub const CHUNK_GROWTH: usize = 10_000;

/// Hard cap on fragments per epoch.
pub const MAX_NUM_FRAGMENTS: usize = 16_384;

/// Worst-case compression overhead allowance for one fragment blob.
pub const CHUNK_LEN_PADDING: usize = 400;

/// Metric names are stored inside `key-<NAME>` records; the key budget
/// caps the name itself.
pub const MAX_METRIC_NAME: usize = 27;

pub const MAX_PATH_LEN: usize = 200;

/// Byte pattern filled into slots no sample ever reached.
pub const UNKNOWN_FILL: u8 = 0;

/// Value read back from slots no sample ever reached.
pub const UNKNOWN_VALUE: SeriesValue = SeriesValue::from_le_bytes([UNKNOWN_FILL; SLOT_VALUE_LEN]);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Granularity {
    Fine,
    Moderate,
    Coarse,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// Start a fresh writable store.
    Create,
    /// Open an existing store for writing.
    Append,
    ReadOnly,
}

impl OpenMode {
    pub fn is_writable(&self) -> bool {
        !matches!(self, OpenMode::ReadOnly)
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("key, epoch or metric not found")]
    NotFound,

    #[error("out of range: {0}")]
    OutOfRange(String),

    #[error("store is read-only")]
    ReadOnly,

    #[error("corrupt store metadata: {0}")]
    Corrupt(String),

    #[error("io error")]
    Io(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("out of memory growing chunk to {0} bytes")]
    OutOfMemory(usize),

    #[error("logic fault: {0}")]
    LogicFault(String),
}

impl StoreError {
    pub fn out_of_range(detail: impl Display) -> Self {
        StoreError::OutOfRange(detail.to_string())
    }

    pub fn corrupt(detail: impl Display) -> Self {
        StoreError::Corrupt(detail.to_string())
    }

    pub fn io(error: impl std::error::Error + Send + Sync + 'static) -> Self {
        StoreError::Io(Box::new(error))
    }

    pub fn logic(detail: impl Display) -> Self {
        StoreError::LogicFault(detail.to_string())
    }
}

impl<T> From<T> for StoreError
where
    T: Into<redb::Error>,
{
    fn from(value: T) -> Self {
        StoreError::Io(value.into().into())
    }
}

/// Decode the first slot of an entry. Entries are always at least one
/// slot wide.
pub fn decode_value(bytes: &[u8]) -> SeriesValue {
    debug_assert!(bytes.len() >= SLOT_VALUE_LEN);
    SeriesValue::from_le_bytes(bytes[..SLOT_VALUE_LEN].try_into().unwrap())
}
