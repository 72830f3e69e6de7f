use crate::model::{Epoch, StoreError, MAX_NUM_FRAGMENTS};
use crate::tags::Bitmap;

/// In-memory image of one epoch's row: a contiguous byte buffer indexed
/// by `metric_index * value_len`. A store holds at most one live chunk;
/// switching epochs flushes it.
pub(crate) struct Chunk {
    pub(super) epoch: Option<Epoch>,
    pub(super) data: Vec<u8>,
    pub(super) growable: bool,
    pub(super) new_epoch: bool,
    changed: Bitmap,
}

impl Chunk {
    pub fn new() -> Self {
        Self {
            epoch: None,
            data: Vec::new(),
            growable: false,
            new_epoch: false,
            changed: Bitmap::with_bit_capacity(MAX_NUM_FRAGMENTS),
        }
    }

    pub fn reset(&mut self) {
        self.epoch = None;
        self.data = Vec::new();
        self.growable = false;
        self.new_epoch = false;
        self.changed.clear();
    }

    pub fn num_fragments(&self, fragment_size: usize) -> usize {
        self.data.len().div_ceil(fragment_size)
    }

    pub fn mark_changed(&mut self, fragment: usize) {
        self.changed.set(fragment as u32);
    }

    pub fn is_changed(&self, fragment: usize) -> bool {
        self.changed.get(fragment as u32)
    }

    /// Append one sentinel-filled fragment. The buffer is untouched when
    /// the reservation fails.
    pub fn grow_one_fragment(&mut self, fragment_size: usize, fill: u8) -> Result<(), StoreError> {
        let new_len = self.data.len() + fragment_size;

        self.data
            .try_reserve_exact(fragment_size)
            .map_err(|_| StoreError::OutOfMemory(new_len))?;

        self.data.resize(new_len, fill);

        Ok(())
    }

    /// Append a decompressed fragment loaded from disk.
    pub fn append_fragment(&mut self, bytes: &[u8]) -> Result<(), StoreError> {
        self.data
            .try_reserve_exact(bytes.len())
            .map_err(|_| StoreError::OutOfMemory(self.data.len() + bytes.len()))?;

        self.data.extend_from_slice(bytes);

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn growth_fills_with_sentinel() {
        let mut chunk = Chunk::new();

        chunk.grow_one_fragment(16, 0xAA).unwrap();
        chunk.grow_one_fragment(16, 0xAA).unwrap();

        assert_eq!(chunk.data.len(), 32);
        assert!(chunk.data.iter().all(|b| *b == 0xAA));
        assert_eq!(chunk.num_fragments(16), 2);
    }

    #[test]
    fn change_tracking_survives_growth() {
        let mut chunk = Chunk::new();

        chunk.grow_one_fragment(16, 0).unwrap();
        chunk.mark_changed(0);

        assert!(chunk.is_changed(0));
        assert!(!chunk.is_changed(1));

        chunk.reset();
        assert!(!chunk.is_changed(0));
        assert!(chunk.data.is_empty());
    }
}
