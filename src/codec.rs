//! Block codec for chunk fragments.
//!
//! A fragment blob is a 4-byte little-endian uncompressed length followed
//! by a raw DEFLATE stream, so the decompressed size is recoverable from
//! the blob alone.

use std::io::{Read, Write};

use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use flate2::Compression;

use crate::model::{StoreError, CHUNK_LEN_PADDING};

const LEN_HEADER: usize = 4;

pub fn compress(src: &[u8]) -> Result<Vec<u8>, StoreError> {
    let mut out = Vec::with_capacity(LEN_HEADER + src.len() + CHUNK_LEN_PADDING);
    out.extend_from_slice(&(src.len() as u32).to_le_bytes());

    let mut encoder = DeflateEncoder::new(out, Compression::fast());
    encoder.write_all(src).map_err(StoreError::io)?;

    encoder.finish().map_err(StoreError::io)
}

pub fn decompressed_size(blob: &[u8]) -> Result<usize, StoreError> {
    if blob.len() < LEN_HEADER {
        return Err(StoreError::corrupt("fragment blob shorter than its header"));
    }

    let len = u32::from_le_bytes(blob[..LEN_HEADER].try_into().unwrap());

    Ok(len as usize)
}

pub fn decompress(blob: &[u8]) -> Result<Vec<u8>, StoreError> {
    let expected = decompressed_size(blob)?;

    let mut out = Vec::with_capacity(expected);
    DeflateDecoder::new(&blob[LEN_HEADER..])
        .read_to_end(&mut out)
        .map_err(StoreError::io)?;

    if out.len() != expected {
        return Err(StoreError::corrupt(format!(
            "fragment decompressed to {} bytes, header says {}",
            out.len(),
            expected
        )));
    }

    Ok(out)
}
