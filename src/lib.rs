//! A tiered time-series storage engine on an ordered key/value map.
//!
//! Integer metrics sampled at a fixed cadence land in the finest of
//! three stores; moderate and coarse stores are populated automatically
//! by an incremental averaging pipeline driven by fine-chunk flushes.
//! Each store is an append-only, epoch-indexed, column-sparse table
//! with chunked rows, per-fragment compression and a persistent
//! key-to-column allocator.
//!
//! ## Layout
//!
//! - [`kv`]: the ordered KV map every store persists into
//! - [`codec`]: fragment compression
//! - [`tags`]: bitmaps over column indices
//! - [`series`]: the single-granularity store
//! - [`bundle`]: the fine/moderate/coarse triple, consolidation and
//!   range queries

pub mod bundle;
pub mod codec;
pub mod kv;
pub mod model;
pub mod series;
pub mod tags;

pub use bundle::{Bundle, BundlePaths, Clock, DataPoint, QueryReply, QueryRequest, WallClock};
pub use model::{Epoch, Granularity, MetricIndex, OpenMode, SeriesValue, StoreError};
pub use series::{Series, SeriesConfig};
pub use tags::TagOp;
