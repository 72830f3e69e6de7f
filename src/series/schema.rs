//! On-disk key schema and fixed-width value codecs.
//!
//! Every record of a store lives in one ordered map under these keys:
//!
//! - metadata singletons: `lowest_free_index`, `slot_duration`,
//!   `values_per_entry`, `num_epochs`, `recent_epoch`, `epoch_list`
//! - `key-<NAME>` -> u32 metric index
//! - `tag-<NAME>` -> raw bitmap image
//! - `<EPOCH>-<FRAG>` -> compressed fragment blob
//!
//! All integers are little-endian fixed width.

use crate::model::{Epoch, StoreError};

pub const LOWEST_FREE_INDEX: &[u8] = b"lowest_free_index";
pub const SLOT_DURATION: &[u8] = b"slot_duration";
pub const VALUES_PER_ENTRY: &[u8] = b"values_per_entry";
pub const NUM_EPOCHS: &[u8] = b"num_epochs";
pub const RECENT_EPOCH: &[u8] = b"recent_epoch";
pub const EPOCH_LIST: &[u8] = b"epoch_list";

pub fn metric_key(name: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(4 + name.len());
    key.extend_from_slice(b"key-");
    key.extend_from_slice(name.as_bytes());
    key
}

pub fn tag_key(name: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(4 + name.len());
    key.extend_from_slice(b"tag-");
    key.extend_from_slice(name.as_bytes());
    key
}

pub fn fragment_key(epoch: Epoch, fragment: u32) -> Vec<u8> {
    format!("{epoch}-{fragment}").into_bytes()
}

pub fn encode_u32(value: u32) -> [u8; 4] {
    value.to_le_bytes()
}

pub fn decode_u32(bytes: &[u8]) -> Result<u32, StoreError> {
    let fixed: [u8; 4] = bytes
        .try_into()
        .map_err(|_| StoreError::corrupt(format!("expected 4-byte value, got {}", bytes.len())))?;

    Ok(u32::from_le_bytes(fixed))
}

pub fn encode_u16(value: u16) -> [u8; 2] {
    value.to_le_bytes()
}

pub fn decode_u16(bytes: &[u8]) -> Result<u16, StoreError> {
    let fixed: [u8; 2] = bytes
        .try_into()
        .map_err(|_| StoreError::corrupt(format!("expected 2-byte value, got {}", bytes.len())))?;

    Ok(u16::from_le_bytes(fixed))
}

pub fn encode_epoch_list(epochs: &[Epoch]) -> Vec<u8> {
    epochs.iter().flat_map(|e| e.to_le_bytes()).collect()
}

pub fn decode_epoch_list(bytes: &[u8]) -> Result<Vec<Epoch>, StoreError> {
    if bytes.len() % 4 != 0 {
        return Err(StoreError::corrupt(format!(
            "epoch list length {} is not a multiple of 4",
            bytes.len()
        )));
    }

    Ok(bytes
        .chunks_exact(4)
        .map(|c| u32::from_le_bytes(c.try_into().unwrap()))
        .collect())
}
