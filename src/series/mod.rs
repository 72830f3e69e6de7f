//! Single-granularity time-series store.
//!
//! An append-only, epoch-indexed, column-sparse table over the ordered
//! KV map. Each epoch's row lives in one in-memory chunk divided into
//! fixed-size fragments; fragments are compressed individually and
//! persisted under `<EPOCH>-<FRAG>` keys. Metric names map to dense
//! column indices that are allocated once and never reused.
//!
//! Epochs must be created in strictly increasing order. Loading an
//! existing epoch is always allowed; creating one in the past is not.

use std::path::Path;

use itertools::Itertools;
use tracing::{debug, info, trace, warn};

use crate::codec;
use crate::kv::KvMap;
use crate::model::{
    Epoch, MetricIndex, OpenMode, SeriesValue, StoreError, CHUNK_GROWTH, MAX_NUM_FRAGMENTS,
    SLOT_VALUE_LEN, UNKNOWN_FILL,
};
use crate::tags::{self, Bitmap, TagOp};

mod chunk;
pub(crate) mod schema;

use chunk::Chunk;

/// Store configuration. Fixed at creation; on reopen the persisted
/// values win over the requested ones.
#[derive(Debug, Clone, Copy)]
pub struct SeriesConfig {
    /// Seconds between consecutive epochs.
    pub slot_duration: u32,
    /// Slots per entry. The consolidation pipeline requires 1.
    pub values_per_entry: u16,
    /// Byte fill marking slots no sample ever reached.
    pub unknown_fill: u8,
}

impl SeriesConfig {
    pub fn new(slot_duration: u32) -> Self {
        Self {
            slot_duration,
            values_per_entry: 1,
            unknown_fill: UNKNOWN_FILL,
        }
    }
}

/// Row view handed to [`SeriesHooks::on_chunk_flush`] right before the
/// chunk buffer is released.
pub struct FlushedChunk<'a> {
    pub epoch: Epoch,
    pub data: &'a [u8],
    pub value_len: usize,
    pub unknown_fill: u8,
}

/// Observer seam for the consolidation pipeline. Invoked synchronously
/// from the store's write path; failures are logged and never abort the
/// operation that triggered them.
pub trait SeriesHooks {
    /// A key was mapped to a fresh column index.
    fn on_new_metric(&self, key: &str) -> Result<(), StoreError>;

    /// A chunk is about to be released after persisting its fragments.
    fn on_chunk_flush(&self, chunk: &FlushedChunk) -> Result<(), StoreError>;
}

pub struct Series {
    kv: KvMap,
    read_only: bool,
    slot_duration: u32,
    values_per_entry: u16,
    value_len: usize,
    unknown_fill: u8,
    lowest_free_index: MetricIndex,
    epoch_list: Vec<Epoch>,
    chunk: Chunk,
    hooks: Option<Box<dyn SeriesHooks>>,
}

impl Series {
    pub fn open(
        path: impl AsRef<Path>,
        mode: OpenMode,
        config: SeriesConfig,
    ) -> Result<Self, StoreError> {
        let kv = KvMap::open(path, mode)?;
        Self::from_kv(kv, config)
    }

    /// Volatile store for tests.
    pub fn in_memory(config: SeriesConfig) -> Result<Self, StoreError> {
        let kv = KvMap::memory()?;
        Self::from_kv(kv, config)
    }

    fn from_kv(kv: KvMap, config: SeriesConfig) -> Result<Self, StoreError> {
        if config.slot_duration == 0 {
            return Err(StoreError::out_of_range("slot duration must be positive"));
        }

        if config.values_per_entry == 0 {
            return Err(StoreError::out_of_range("values per entry must be positive"));
        }

        let read_only = !kv.is_writable();

        let lowest_free_index = load_or_init_u32(&kv, schema::LOWEST_FREE_INDEX, 0, read_only)?;
        let slot_duration =
            load_or_init_u32(&kv, schema::SLOT_DURATION, config.slot_duration, read_only)?;
        let num_epochs = load_or_init_u32(&kv, schema::NUM_EPOCHS, 0, read_only)?;
        let recent_epoch = load_or_init_u32(&kv, schema::RECENT_EPOCH, 0, read_only)?;

        let values_per_entry = match kv.get(schema::VALUES_PER_ENTRY)? {
            Some(raw) => schema::decode_u16(&raw)?,
            None if read_only => return Err(StoreError::corrupt("store has no metadata")),
            None => {
                kv.put(
                    schema::VALUES_PER_ENTRY,
                    &schema::encode_u16(config.values_per_entry),
                )?;
                config.values_per_entry
            }
        };

        let epoch_list = match kv.get(schema::EPOCH_LIST)? {
            Some(raw) => schema::decode_epoch_list(&raw)?,
            None => Vec::new(),
        };

        if slot_duration == 0 || values_per_entry == 0 {
            return Err(StoreError::corrupt("zero slot duration or entry width"));
        }

        if epoch_list.len() != num_epochs as usize {
            return Err(StoreError::corrupt(format!(
                "epoch list holds {} entries, metadata says {}",
                epoch_list.len(),
                num_epochs
            )));
        }

        if !epoch_list.iter().tuple_windows().all(|(a, b)| a < b) {
            return Err(StoreError::corrupt("epoch list is not strictly increasing"));
        }

        match epoch_list.last() {
            Some(last) if *last != recent_epoch => {
                return Err(StoreError::corrupt(format!(
                    "recent epoch {recent_epoch} does not match epoch list tail {last}"
                )));
            }
            None if recent_epoch != 0 => {
                return Err(StoreError::corrupt(
                    "recent epoch set on a store with no epochs",
                ));
            }
            _ => (),
        }

        info!(
            lowest_free_index,
            slot_duration, values_per_entry, "store opened"
        );

        Ok(Self {
            kv,
            read_only,
            slot_duration,
            values_per_entry,
            value_len: values_per_entry as usize * SLOT_VALUE_LEN,
            unknown_fill: config.unknown_fill,
            lowest_free_index,
            epoch_list,
            chunk: Chunk::new(),
            hooks: None,
        })
    }

    /// Install the consolidation observer. Only meaningful on the finest
    /// store of a bundle.
    pub fn set_hooks(&mut self, hooks: Box<dyn SeriesHooks>) {
        self.hooks = Some(hooks);
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub fn slot_duration(&self) -> u32 {
        self.slot_duration
    }

    pub fn values_per_entry(&self) -> u16 {
        self.values_per_entry
    }

    pub fn value_len(&self) -> usize {
        self.value_len
    }

    pub fn unknown_fill(&self) -> u8 {
        self.unknown_fill
    }

    /// The sentinel reported for slots no sample ever reached.
    pub fn unknown_value(&self) -> SeriesValue {
        SeriesValue::from_le_bytes([self.unknown_fill; SLOT_VALUE_LEN])
    }

    pub fn lowest_free_index(&self) -> MetricIndex {
        self.lowest_free_index
    }

    pub fn epoch_list(&self) -> &[Epoch] {
        &self.epoch_list
    }

    pub fn most_recent_epoch(&self) -> Option<Epoch> {
        self.epoch_list.last().copied()
    }

    /// Epoch currently targeted by the in-memory chunk, if any.
    pub fn current_epoch(&self) -> Option<Epoch> {
        self.chunk.epoch
    }

    pub fn normalize_epoch(&self, epoch: Epoch) -> Epoch {
        epoch - epoch % self.slot_duration
    }

    fn fragment_size(&self) -> usize {
        CHUNK_GROWTH * self.value_len
    }

    /// Target an epoch, flushing the current chunk first.
    ///
    /// An existing epoch is loaded fragment by fragment into memory. A
    /// missing epoch either fails (`fail_if_missing`, or when it lies in
    /// the past) or starts an empty chunk that will create the epoch on
    /// flush.
    pub fn goto_epoch(
        &mut self,
        epoch: Epoch,
        fail_if_missing: bool,
        growable: bool,
    ) -> Result<(), StoreError> {
        let epoch = self.normalize_epoch(epoch);

        if self.chunk.epoch == Some(epoch) {
            return Ok(());
        }

        self.flush_chunk()?;

        match self.kv.get(&schema::fragment_key(epoch, 0))? {
            Some(blob) => {
                debug!(epoch, "loading epoch");

                let mut data = codec::decompress(&blob)?;
                let mut fragment = 1u32;

                // fragments are stored densely, the first miss ends the row
                while let Some(blob) = self.kv.get(&schema::fragment_key(epoch, fragment))? {
                    data.extend_from_slice(&codec::decompress(&blob)?);
                    fragment += 1;
                }

                self.chunk.epoch = Some(epoch);
                self.chunk.data = data;
                self.chunk.growable = growable;
                self.chunk.new_epoch = false;

                Ok(())
            }
            None if fail_if_missing => Err(StoreError::NotFound),
            None => {
                if self.most_recent_epoch().is_some_and(|recent| epoch < recent) {
                    warn!(epoch, "refusing to create an epoch in the past");
                    return Err(StoreError::NotFound);
                }

                self.chunk.epoch = Some(epoch);
                self.chunk.data = Vec::new();
                self.chunk.growable = growable;
                self.chunk.new_epoch = true;

                Ok(())
            }
        }
    }

    /// Probe for an epoch without loading it or disturbing the current
    /// chunk.
    pub fn epoch_exists(&self, epoch: Epoch) -> Result<bool, StoreError> {
        let epoch = self.normalize_epoch(epoch);
        self.kv.exists(&schema::fragment_key(epoch, 0))
    }

    pub fn metric_index(&self, key: &str) -> Result<Option<MetricIndex>, StoreError> {
        match self.kv.get(&schema::metric_key(key))? {
            Some(raw) => Ok(Some(schema::decode_u32(&raw)?)),
            None => Ok(None),
        }
    }

    fn ensure_key_index(
        &mut self,
        key: &str,
        for_write: bool,
    ) -> Result<Option<MetricIndex>, StoreError> {
        if let Some(index) = self.metric_index(key)? {
            trace!(key, index, "key resolved");
            return Ok(Some(index));
        }

        if !for_write {
            return Ok(None);
        }

        let index = self.lowest_free_index;
        self.kv.put(&schema::metric_key(key), &schema::encode_u32(index))?;
        self.lowest_free_index += 1;

        info!(key, index, "new metric registered");

        if let Some(hooks) = self.hooks.as_ref() {
            if let Err(err) = hooks.on_new_metric(key) {
                warn!(%err, key, "new-metric hook failed, downstream stores may miss this key");
            }
        }

        self.kv.put(
            schema::LOWEST_FREE_INDEX,
            &schema::encode_u32(self.lowest_free_index),
        )?;

        Ok(Some(index))
    }

    /// Write an entry for a key, allocating its column index on first
    /// sight.
    pub fn set_by_key(&mut self, key: &str, value: &[SeriesValue]) -> Result<(), StoreError> {
        if self.read_only {
            return Err(StoreError::ReadOnly);
        }

        if self.chunk.epoch.is_none() {
            return Err(StoreError::logic("no epoch selected"));
        }

        let index = match self.ensure_key_index(key, true)? {
            Some(index) => index,
            None => return Err(StoreError::NotFound),
        };

        self.write_entry(index, value)
    }

    /// Write an entry at an already-mapped column index. The index is a
    /// read-only input; unmapped indices are rejected.
    pub fn set_by_index(&mut self, index: MetricIndex, value: &[SeriesValue]) -> Result<(), StoreError> {
        if self.read_only {
            return Err(StoreError::ReadOnly);
        }

        if self.chunk.epoch.is_none() {
            return Err(StoreError::logic("no epoch selected"));
        }

        if index >= self.lowest_free_index {
            return Err(StoreError::out_of_range(format!(
                "index {index} has no key mapping yet"
            )));
        }

        self.write_entry(index, value)
    }

    fn write_entry(&mut self, index: MetricIndex, value: &[SeriesValue]) -> Result<(), StoreError> {
        if value.len() != self.values_per_entry as usize {
            return Err(StoreError::out_of_range(format!(
                "entry holds {} slots, caller passed {}",
                self.values_per_entry,
                value.len()
            )));
        }

        let offset = self.prepare_write_offset(index)?;

        for (i, slot) in value.iter().enumerate() {
            let at = offset + i * SLOT_VALUE_LEN;
            self.chunk.data[at..at + SLOT_VALUE_LEN].copy_from_slice(&slot.to_le_bytes());
        }

        Ok(())
    }

    /// Resolve a column index into a byte offset inside the current
    /// chunk, materializing or growing fragments as needed.
    ///
    /// Fragments are kept dense: every fragment the target index skips
    /// over is materialized too, and sentinel padding counts as data
    /// that must reach disk.
    fn prepare_write_offset(&mut self, index: MetricIndex) -> Result<usize, StoreError> {
        let fragment = index as usize / CHUNK_GROWTH;

        if fragment >= MAX_NUM_FRAGMENTS {
            return Err(StoreError::out_of_range(format!(
                "fragment {fragment} exceeds the {MAX_NUM_FRAGMENTS} cap"
            )));
        }

        let fragment_size = self.fragment_size();

        if self.chunk.data.is_empty() {
            let epoch = self
                .chunk
                .epoch
                .ok_or_else(|| StoreError::logic("no epoch selected"))?;

            for k in 0..=fragment {
                match self.kv.get(&schema::fragment_key(epoch, k as u32))? {
                    Some(blob) => self.chunk.append_fragment(&codec::decompress(&blob)?)?,
                    None => self.chunk.grow_one_fragment(fragment_size, self.unknown_fill)?,
                }

                self.chunk.mark_changed(k);
            }
        } else if (index as usize + 1) * self.value_len > self.chunk.data.len() {
            if !self.chunk.growable {
                return Err(StoreError::out_of_range(format!(
                    "index {index} beyond a chunk of {} entries",
                    self.chunk.data.len() / self.value_len
                )));
            }

            while (index as usize + 1) * self.value_len > self.chunk.data.len() {
                self.chunk.grow_one_fragment(fragment_size, self.unknown_fill)?;
                self.chunk
                    .mark_changed(self.chunk.num_fragments(fragment_size) - 1);
            }

            debug!(len = self.chunk.data.len(), "chunk grown");
        }

        self.chunk.mark_changed(fragment);

        Ok(index as usize * self.value_len)
    }

    /// Read an entry from the loaded chunk. The returned slice borrows
    /// the chunk buffer and cannot outlive the next epoch switch.
    pub fn get_by_key(&self, key: &str) -> Result<&[u8], StoreError> {
        if self.chunk.data.is_empty() {
            return Err(StoreError::NotFound);
        }

        let index = self.metric_index(key)?.ok_or(StoreError::NotFound)?;

        self.get_by_index(index)
    }

    /// Read an entry at a column index. No growth happens on reads.
    pub fn get_by_index(&self, index: MetricIndex) -> Result<&[u8], StoreError> {
        if self.chunk.data.is_empty() {
            return Err(StoreError::NotFound);
        }

        let offset = index as usize * self.value_len;

        if offset + self.value_len > self.chunk.data.len() {
            return Err(StoreError::out_of_range(format!(
                "index {index} beyond a chunk of {} entries",
                self.chunk.data.len() / self.value_len
            )));
        }

        Ok(&self.chunk.data[offset..offset + self.value_len])
    }

    /// Persist the current chunk and release its buffer.
    ///
    /// New epochs are appended to the epoch list; appending one that is
    /// not strictly newer than the list tail is a logic fault. Fragment
    /// persistence failures are logged and skipped so one bad fragment
    /// cannot take down the rest of the row.
    pub(crate) fn flush_chunk(&mut self) -> Result<(), StoreError> {
        if self.chunk.data.is_empty() {
            self.chunk.reset();
            return Ok(());
        }

        let epoch = match self.chunk.epoch {
            Some(epoch) => epoch,
            None => {
                self.chunk.reset();
                return Ok(());
            }
        };

        if self.chunk.new_epoch {
            if let Some(recent) = self.most_recent_epoch() {
                if recent >= epoch {
                    return Err(StoreError::logic(format!(
                        "flushing epoch {epoch} behind the most recent {recent}"
                    )));
                }
            }

            self.epoch_list.push(epoch);

            if !self.read_only {
                self.put_logged(schema::EPOCH_LIST, &schema::encode_epoch_list(&self.epoch_list));
                self.put_logged(
                    schema::NUM_EPOCHS,
                    &schema::encode_u32(self.epoch_list.len() as u32),
                );
                self.put_logged(schema::RECENT_EPOCH, &schema::encode_u32(epoch));
            }
        }

        let fragment_size = self.fragment_size();
        let num_fragments = self.chunk.num_fragments(fragment_size);

        for i in 0..num_fragments {
            if self.read_only || !self.chunk.is_changed(i) {
                trace!(fragment = i, "skipping unchanged fragment");
                continue;
            }

            let start = i * fragment_size;
            let end = ((i + 1) * fragment_size).min(self.chunk.data.len());

            match codec::compress(&self.chunk.data[start..end]) {
                Ok(blob) => {
                    debug!(
                        fragment = i,
                        raw = end - start,
                        compressed = blob.len(),
                        "fragment compressed"
                    );

                    if let Err(err) = self.kv.put(&schema::fragment_key(epoch, i as u32), &blob) {
                        warn!(%err, fragment = i, "failed to persist fragment");
                    }
                }
                Err(err) => warn!(%err, fragment = i, "fragment compression failed"),
            }
        }

        if let Some(hooks) = self.hooks.as_ref() {
            let view = FlushedChunk {
                epoch,
                data: &self.chunk.data,
                value_len: self.value_len,
                unknown_fill: self.unknown_fill,
            };

            if let Err(err) = hooks.on_chunk_flush(&view) {
                warn!(%err, epoch, "chunk hook failed, downstream stores may miss this row");
            }
        }

        self.chunk.reset();

        Ok(())
    }

    fn put_logged(&self, key: &[u8], value: &[u8]) {
        if let Err(err) = self.kv.put(key, value) {
            warn!(%err, key = %String::from_utf8_lossy(key), "failed to persist metadata");
        }
    }

    /// Add a key's column index to a named tag.
    pub fn tag_metric(&mut self, key: &str, tag: &str) -> Result<(), StoreError> {
        let index = self.metric_index(key)?.ok_or(StoreError::NotFound)?;

        let mut map = self.load_tag(tag)?.unwrap_or_default();
        map.set(index);

        self.kv.put(&schema::tag_key(tag), &map.to_bytes())
    }

    fn load_tag(&self, tag: &str) -> Result<Option<Bitmap>, StoreError> {
        Ok(self
            .kv
            .get(&schema::tag_key(tag))?
            .map(|raw| Bitmap::from_bytes(&raw)))
    }

    fn max_tag_index(&self, cap: u32) -> Option<u32> {
        let top = self.lowest_free_index.checked_sub(1)?;
        Some(top.min(cap.checked_sub(1)?))
    }

    /// Member indices of one tag, capped at `cap` entries worth of index
    /// space.
    pub fn tag_indices(&self, tag: &str, cap: u32) -> Result<Vec<MetricIndex>, StoreError> {
        let map = self.load_tag(tag)?.ok_or(StoreError::NotFound)?;

        let Some(max) = self.max_tag_index(cap) else {
            return Ok(Vec::new());
        };

        Ok(map.ones(max).collect())
    }

    /// Fold several tags into one membership set. Missing tags are
    /// skipped; when none of the names exist the result is empty.
    pub fn consolidate_tags(
        &self,
        names: &[&str],
        op: TagOp,
        cap: u32,
    ) -> Result<Vec<MetricIndex>, StoreError> {
        let Some(max) = self.max_tag_index(cap) else {
            return Ok(Vec::new());
        };

        let mut maps = Vec::with_capacity(names.len());

        for name in names {
            match self.load_tag(name)? {
                Some(map) => maps.push(map),
                None => debug!(tag = %name, "skipping missing tag"),
            }
        }

        let folded = tags::consolidate(maps.into_iter(), op, max);

        Ok(folded.ones(max).collect())
    }

    /// Flush the current chunk and force disk durability.
    pub fn flush(&mut self) -> Result<(), StoreError> {
        if self.read_only {
            return Ok(());
        }

        self.flush_chunk()?;
        self.kv.sync()
    }

    /// Flush and release the store. Dropping without closing discards
    /// whatever the current chunk holds.
    pub fn close(mut self) -> Result<(), StoreError> {
        self.flush()
    }
}

fn load_or_init_u32(
    kv: &KvMap,
    key: &[u8],
    default: u32,
    read_only: bool,
) -> Result<u32, StoreError> {
    match kv.get(key)? {
        Some(raw) => schema::decode_u32(&raw),
        None if read_only => Err(StoreError::corrupt("store has no metadata")),
        None => {
            kv.put(key, &schema::encode_u32(default))?;
            Ok(default)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::decode_value;

    fn store(slot_duration: u32) -> Series {
        Series::in_memory(SeriesConfig::new(slot_duration)).unwrap()
    }

    #[test]
    fn normalize_aligns_down() {
        let series = store(60);

        assert_eq!(series.normalize_epoch(1000), 960);
        assert_eq!(series.normalize_epoch(960), 960);
        assert_eq!(series.normalize_epoch(59), 0);
    }

    #[test]
    fn set_get_within_one_epoch() {
        let mut series = store(60);

        series.goto_epoch(600, false, true).unwrap();
        series.set_by_key("m-1", &[7]).unwrap();
        series.set_by_key("m-2", &[42]).unwrap();

        assert_eq!(decode_value(series.get_by_key("m-1").unwrap()), 7);
        assert_eq!(decode_value(series.get_by_key("m-2").unwrap()), 42);
        assert!(matches!(
            series.get_by_key("m-3"),
            Err(StoreError::NotFound)
        ));
    }

    #[test]
    fn flush_then_reload_round_trips() {
        let mut series = store(60);

        series.goto_epoch(600, false, true).unwrap();
        series.set_by_key("m-1", &[7]).unwrap();
        series.flush().unwrap();

        assert_eq!(series.epoch_list(), &[600]);
        assert!(series.epoch_exists(600).unwrap());

        series.goto_epoch(600, true, false).unwrap();
        assert_eq!(decode_value(series.get_by_key("m-1").unwrap()), 7);
    }

    #[test]
    fn creating_epoch_in_the_past_is_rejected() {
        let mut series = store(60);

        series.goto_epoch(600, false, true).unwrap();
        series.set_by_key("m-1", &[1]).unwrap();
        series.flush().unwrap();

        assert!(matches!(
            series.goto_epoch(540, false, true),
            Err(StoreError::NotFound)
        ));
    }

    #[test]
    fn sparse_write_materializes_dense_fragments() {
        let mut series = store(60);

        // an earlier epoch allocates the column space so that "m-1" lands
        // on index 7000 and "m-2" becomes index 45000
        series.goto_epoch(540, false, true).unwrap();
        for i in 0..45_000u32 {
            let key = if i == 7_000 {
                "m-1".to_string()
            } else {
                format!("k-{i}")
            };
            series.set_by_key(&key, &[0]).unwrap();
        }
        series.flush().unwrap();

        series.goto_epoch(600, false, true).unwrap();
        series.set_by_key("m-1", &[7]).unwrap();
        series.set_by_key("m-2", &[42]).unwrap();
        assert_eq!(series.metric_index("m-2").unwrap(), Some(45_000));

        series.flush().unwrap();
        series.goto_epoch(600, true, false).unwrap();

        // the reload walks fragments 0..=4 consecutively, so the sparse
        // row densified to 50000 sentinel-padded entries
        assert_eq!(decode_value(series.get_by_key("m-1").unwrap()), 7);
        assert_eq!(decode_value(series.get_by_index(45_000).unwrap()), 42);
        assert_eq!(
            decode_value(series.get_by_index(44_999).unwrap()),
            series.unknown_value()
        );
        assert_eq!(
            decode_value(series.get_by_index(49_999).unwrap()),
            series.unknown_value()
        );
        assert!(series.get_by_index(50_000).is_err());
    }

    #[test]
    fn set_by_index_requires_a_mapping() {
        let mut series = store(60);

        series.goto_epoch(600, false, true).unwrap();

        assert!(matches!(
            series.set_by_index(0, &[1]),
            Err(StoreError::OutOfRange(_))
        ));

        series.set_by_key("m-1", &[1]).unwrap();
        series.set_by_index(0, &[2]).unwrap();

        assert_eq!(decode_value(series.get_by_key("m-1").unwrap()), 2);
    }

    #[test]
    fn indices_allocate_monotonically() {
        let mut series = store(60);

        series.goto_epoch(600, false, true).unwrap();
        series.set_by_key("a", &[1]).unwrap();
        series.set_by_key("b", &[2]).unwrap();
        series.set_by_key("c", &[3]).unwrap();

        assert_eq!(series.metric_index("a").unwrap(), Some(0));
        assert_eq!(series.metric_index("b").unwrap(), Some(1));
        assert_eq!(series.metric_index("c").unwrap(), Some(2));
        assert_eq!(series.lowest_free_index(), 3);
    }

    #[test]
    fn multi_slot_entries_round_trip() {
        let config = SeriesConfig {
            slot_duration: 60,
            values_per_entry: 2,
            unknown_fill: 0,
        };

        let mut series = Series::in_memory(config).unwrap();
        assert_eq!(series.value_len(), 16);

        series.goto_epoch(600, false, true).unwrap();
        series.set_by_key("m-1", &[7, 8]).unwrap();

        // entry width is enforced
        assert!(matches!(
            series.set_by_key("m-1", &[7]),
            Err(StoreError::OutOfRange(_))
        ));

        let entry = series.get_by_key("m-1").unwrap();
        assert_eq!(decode_value(&entry[..8]), 7);
        assert_eq!(decode_value(&entry[8..]), 8);
    }

    #[test]
    fn tags_compose() {
        let mut series = store(60);

        series.goto_epoch(600, false, true).unwrap();
        series.set_by_key("a", &[1]).unwrap();
        series.set_by_key("b", &[2]).unwrap();
        series.set_by_key("c", &[3]).unwrap();

        series.tag_metric("a", "red").unwrap();
        series.tag_metric("b", "red").unwrap();
        series.tag_metric("b", "blue").unwrap();
        series.tag_metric("c", "blue").unwrap();

        assert_eq!(series.tag_indices("red", 100).unwrap(), vec![0, 1]);

        assert_eq!(
            series
                .consolidate_tags(&["red", "blue"], TagOp::And, 100)
                .unwrap(),
            vec![1]
        );

        assert_eq!(
            series
                .consolidate_tags(&["red", "blue", "ghost"], TagOp::Or, 100)
                .unwrap(),
            vec![0, 1, 2]
        );

        assert!(series
            .consolidate_tags(&["ghost"], TagOp::Or, 100)
            .unwrap()
            .is_empty());
    }
}
