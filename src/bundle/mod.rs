//! Three-store bundle with incremental consolidation.
//!
//! Samples enter the finest store only. Every time a fine chunk is
//! flushed, its row is folded into one running-mean accumulator per
//! downstream store; when a downstream store's epoch rolls over, its
//! accumulator is written out as a synthetic row. Coarser stores are
//! therefore derived data and never written directly.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tracing::{debug, info, warn};

use crate::model::{
    Epoch, Granularity, OpenMode, SeriesValue, StoreError, MAX_METRIC_NAME, MAX_PATH_LEN,
    SLOT_VALUE_LEN,
};
use crate::series::{FlushedChunk, Series, SeriesConfig, SeriesHooks};

mod query;

pub use query::{DataPoint, QueryReply, QueryRequest};

/// Moderate epochs span this many fine epochs.
pub const MODERATE_STEP_FACTOR: u32 = 2;

/// Coarse epochs span 2.5 fine epochs, rounded to the nearest whole
/// number of seconds and never below the moderate minimum.
pub fn coarse_step(finest_step: u32) -> u32 {
    ((finest_step * 5 + 1) / 2).max(2)
}

/// Time source for the write and query paths. Stores themselves never
/// read the clock.
pub trait Clock {
    /// Seconds since the Unix epoch.
    fn now(&self) -> i64;
}

pub struct WallClock;

impl Clock for WallClock {
    fn now(&self) -> i64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or_default()
    }
}

fn epoch_from_unix(t: i64) -> Result<Epoch, StoreError> {
    Epoch::try_from(t).map_err(|_| {
        StoreError::out_of_range(format!("timestamp {t} outside the representable epoch range"))
    })
}

/// Running mean of every fine row seen since the last flush into one
/// downstream store.
struct Accumulator {
    data: Vec<SeriesValue>,
    rounds: u32,
    new_metrics: Vec<String>,
    last_flush: i64,
}

impl Accumulator {
    fn seeded(store: &Series, now: Epoch) -> Self {
        let last_flush = store
            .most_recent_epoch()
            .unwrap_or_else(|| store.normalize_epoch(now));

        Self {
            data: Vec::new(),
            rounds: 0,
            new_metrics: Vec::new(),
            last_flush: last_flush as i64,
        }
    }

    /// Fold one flushed fine row into the running mean. Both sides are
    /// aligned to the longer one first, padding with the sentinel.
    fn absorb(&mut self, chunk: &FlushedChunk) {
        let n_row = chunk.data.len() / chunk.value_len;
        let n = n_row.max(self.data.len());
        let unknown = SeriesValue::from_le_bytes([chunk.unknown_fill; SLOT_VALUE_LEN]);

        if self.data.len() < n {
            self.data.resize(n, unknown);
        }

        for i in 0..n {
            let sample = if i < n_row {
                let at = i * chunk.value_len;
                SeriesValue::from_le_bytes(chunk.data[at..at + SLOT_VALUE_LEN].try_into().unwrap())
            } else {
                unknown
            };

            self.data[i] = incremental_mean(self.data[i], sample, self.rounds);
        }

        self.rounds += 1;
    }
}

/// One step of the running mean: with `rounds` samples folded in so far,
/// the next partial mean is `(prev * rounds + sample) / (rounds + 1)`,
/// carried out in 128-bit signed arithmetic and rounded half-up.
fn incremental_mean(prev: SeriesValue, sample: SeriesValue, rounds: u32) -> SeriesValue {
    let k = rounds as i128;
    let numer = (prev as i64 as i128) * k + sample as i64 as i128;
    let denom = k + 1;

    let quot = numer.div_euclid(denom);
    let rem = numer.rem_euclid(denom);

    let rounded = if 2 * rem >= denom { quot + 1 } else { quot };

    rounded as i64 as SeriesValue
}

struct AccumSet {
    /// Accumulators for the moderate and coarse stores, in that order.
    rows: [Accumulator; 2],
    /// Epoch of the last fine row folded into the accumulators.
    last_update: Epoch,
}

/// Observer installed on the finest store. Holds the same accumulator
/// set the bundle flushes from; invocations come synchronously out of
/// the fine store's flush path, never concurrently with a reader.
struct ConsolidationHooks {
    accums: Arc<Mutex<AccumSet>>,
}

impl SeriesHooks for ConsolidationHooks {
    fn on_new_metric(&self, key: &str) -> Result<(), StoreError> {
        let mut set = self
            .accums
            .lock()
            .map_err(|_| StoreError::logic("accumulator lock poisoned"))?;

        for row in set.rows.iter_mut() {
            row.new_metrics.push(key.to_owned());
        }

        Ok(())
    }

    fn on_chunk_flush(&self, chunk: &FlushedChunk) -> Result<(), StoreError> {
        let mut set = self
            .accums
            .lock()
            .map_err(|_| StoreError::logic("accumulator lock poisoned"))?;

        set.last_update = chunk.epoch;

        for row in set.rows.iter_mut() {
            row.absorb(chunk);
        }

        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct BundlePaths {
    pub fine: PathBuf,
    pub moderate: PathBuf,
    pub coarse: PathBuf,
}

impl BundlePaths {
    /// Derive the three store paths from one stem, for the common case
    /// of a single data directory.
    pub fn from_stem(stem: impl AsRef<Path>) -> Self {
        let stem = stem.as_ref();

        Self {
            fine: stem.with_extension("fine"),
            moderate: stem.with_extension("moderate"),
            coarse: stem.with_extension("coarse"),
        }
    }

    fn iter(&self) -> impl Iterator<Item = &PathBuf> + '_ {
        [&self.fine, &self.moderate, &self.coarse].into_iter()
    }
}

pub struct Bundle {
    fine: Series,
    moderate: Series,
    coarse: Series,
    accums: Arc<Mutex<AccumSet>>,
    writable: bool,
    clock: Box<dyn Clock>,
}

impl Bundle {
    pub fn open(paths: &BundlePaths, mode: OpenMode, finest_step: u32) -> Result<Self, StoreError> {
        Self::open_with_clock(paths, mode, finest_step, Box::new(WallClock))
    }

    pub fn open_with_clock(
        paths: &BundlePaths,
        mode: OpenMode,
        finest_step: u32,
        clock: Box<dyn Clock>,
    ) -> Result<Self, StoreError> {
        if finest_step == 0 {
            return Err(StoreError::out_of_range("finest time step must be positive"));
        }

        for path in paths.iter() {
            let len = path.as_os_str().len();

            if len == 0 || len > MAX_PATH_LEN {
                return Err(StoreError::out_of_range(format!(
                    "store path must be 1..={MAX_PATH_LEN} bytes"
                )));
            }
        }

        if mode == OpenMode::Create {
            for path in paths.iter() {
                remove_stale(path)?;
            }
        }

        let mut fine = Series::open(&paths.fine, mode, SeriesConfig::new(finest_step))?;

        let moderate = match Series::open(
            &paths.moderate,
            mode,
            SeriesConfig::new(finest_step * MODERATE_STEP_FACTOR),
        ) {
            Ok(store) => store,
            Err(err) => {
                discard(fine, &paths.fine);
                return Err(err);
            }
        };

        let coarse = match Series::open(
            &paths.coarse,
            mode,
            SeriesConfig::new(coarse_step(finest_step)),
        ) {
            Ok(store) => store,
            Err(err) => {
                discard(fine, &paths.fine);
                discard(moderate, &paths.moderate);
                return Err(err);
            }
        };

        info!(
            fine = fine.slot_duration(),
            moderate = moderate.slot_duration(),
            coarse = coarse.slot_duration(),
            "bundle opened"
        );

        let now = epoch_from_unix(clock.now())?;

        let accums = Arc::new(Mutex::new(AccumSet {
            rows: [
                Accumulator::seeded(&moderate, now),
                Accumulator::seeded(&coarse, now),
            ],
            last_update: now,
        }));

        fine.set_hooks(Box::new(ConsolidationHooks {
            accums: Arc::clone(&accums),
        }));

        Ok(Self {
            fine,
            moderate,
            coarse,
            accums,
            writable: mode.is_writable(),
            clock,
        })
    }

    /// Record one batch of samples at the current time. Pairs with an
    /// empty name are skipped; a failing slot write keeps its previous
    /// content and the batch continues.
    pub fn write(&mut self, samples: &[(&str, i64)]) -> Result<(), StoreError> {
        if !self.writable {
            return Err(StoreError::ReadOnly);
        }

        for (name, _) in samples {
            if name.len() > MAX_METRIC_NAME {
                return Err(StoreError::out_of_range(format!(
                    "metric name {name:?} exceeds {MAX_METRIC_NAME} bytes"
                )));
            }
        }

        let now = self.clock.now();
        let now_epoch = epoch_from_unix(now)?;

        if samples.iter().any(|(name, _)| !name.is_empty()) {
            self.fine.goto_epoch(now_epoch, false, true)?;

            for (name, value) in samples {
                if name.is_empty() {
                    continue;
                }

                if let Err(err) = self.fine.set_by_key(name, &[*value as SeriesValue]) {
                    warn!(%err, key = %name, "failed to set sample, slot keeps its previous content");
                }
            }
        }

        self.roll_over(now)
    }

    /// Flush any accumulator whose downstream epoch has rolled over.
    fn roll_over(&mut self, now: i64) -> Result<(), StoreError> {
        let mut set = self
            .accums
            .lock()
            .map_err(|_| StoreError::logic("accumulator lock poisoned"))?;

        let AccumSet { rows, last_update } = &mut *set;
        let last_update = *last_update;

        for (row, store) in rows
            .iter_mut()
            .zip([&mut self.moderate, &mut self.coarse])
        {
            let elapsed = now - row.last_flush;

            if elapsed < 0 {
                return Err(StoreError::logic(format!(
                    "clock ran backwards: now {now}, last consolidated flush {}",
                    row.last_flush
                )));
            }

            if elapsed >= store.slot_duration() as i64 {
                debug!(step = store.slot_duration(), "consolidated epoch rolled over");
                consolidated_flush(store, row, last_update, now)?;
            }
        }

        Ok(())
    }

    pub fn query(&mut self, req: &QueryRequest) -> Result<QueryReply, StoreError> {
        let now = self.clock.now();

        let store = match req.granularity {
            Granularity::Fine => &mut self.fine,
            Granularity::Moderate => &mut self.moderate,
            Granularity::Coarse => &mut self.coarse,
        };

        query::run(store, req, now)
    }

    /// Flush both accumulators and close all three stores. Residual fine
    /// samples still reach the fine store through its own close.
    pub fn close(mut self) -> Result<(), StoreError> {
        let now = self.clock.now();

        {
            let mut set = self
                .accums
                .lock()
                .map_err(|_| StoreError::logic("accumulator lock poisoned"))?;

            let AccumSet { rows, last_update } = &mut *set;

            for (row, store) in rows
                .iter_mut()
                .zip([&mut self.moderate, &mut self.coarse])
            {
                if let Err(err) = consolidated_flush(store, row, *last_update, now) {
                    warn!(%err, "failed to flush a consolidated store on close");
                }
            }
        }

        let fine = self.fine.close();
        let moderate = self.moderate.close();
        let coarse = self.coarse.close();

        fine.and(moderate).and(coarse)
    }
}

/// Write one accumulator into its downstream store at the epoch of the
/// last fine row it absorbed.
///
/// Columns the store already knows are addressed by index; freshly
/// discovered names register their columns here. A failure while
/// registering names leaves the accumulator zeroed with the unwritten
/// names intact, so the next rollover retries them without skewing the
/// mean.
fn consolidated_flush(
    store: &mut Series,
    accum: &mut Accumulator,
    last_update: Epoch,
    now: i64,
) -> Result<(), StoreError> {
    let epoch_current = store.normalize_epoch(epoch_from_unix(now)?);

    if accum.data.is_empty() {
        if !accum.new_metrics.is_empty() {
            return Err(StoreError::logic(
                "pending metric names with no accumulated data",
            ));
        }

        accum.last_flush = epoch_current as i64;
        return Ok(());
    }

    let epoch_to_write = store.normalize_epoch(last_update);

    store.goto_epoch(epoch_to_write, false, true)?;

    if epoch_to_write != 0 && epoch_to_write + store.slot_duration() < epoch_current {
        warn!(
            step = store.slot_duration(),
            from = epoch_to_write,
            to = epoch_current,
            "consolidated epochs were missed, leaving them unwritten"
        );
    }

    let known = (store.lowest_free_index() as usize).min(accum.data.len());

    for (i, value) in accum.data.iter().take(known).enumerate() {
        if let Err(err) = store.set_by_index(i as u32, &[*value]) {
            warn!(%err, index = i, "failed to write a consolidated value");
            break;
        }
    }

    let start = store.lowest_free_index() as usize;
    let mut failed_at = None;

    for (j, name) in accum.new_metrics.iter().enumerate() {
        let at = start + j;

        if at >= accum.data.len() {
            break;
        }

        if let Err(err) = store.set_by_key(name, &[accum.data[at]]) {
            warn!(
                %err,
                key = name.as_str(),
                "failed to register a consolidated metric, keeping the rest for the next flush"
            );
            failed_at = Some(j);
            break;
        }
    }

    if let Some(j) = failed_at {
        // zeroed values with a reset round counter behave like a fresh
        // buffer, so the retried mean stays unbiased; leaving last_flush
        // untouched makes the next write retry right away
        accum.data.iter_mut().for_each(|v| *v = 0);
        accum.new_metrics.drain(..j);
        accum.rounds = 0;

        return Ok(());
    }

    accum.data = Vec::new();
    accum.new_metrics.clear();
    accum.rounds = 0;
    accum.last_flush = epoch_current as i64;

    store.flush()
}

fn remove_stale(path: &Path) -> Result<(), StoreError> {
    match std::fs::remove_file(path) {
        Ok(()) => {
            info!(path = %path.display(), "removed existing store file");
            Ok(())
        }
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(StoreError::io(err)),
    }
}

fn discard(store: Series, path: &Path) {
    if let Err(err) = store.close() {
        warn!(%err, "failed to close a store while unwinding");
    }

    if let Err(err) = std::fs::remove_file(path) {
        warn!(%err, path = %path.display(), "failed to remove a store file while unwinding");
    }
}
