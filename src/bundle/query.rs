//! Range queries over one store of the bundle.
//!
//! A query names a time range and a set of metrics; the reply is a
//! dense grid covering every epoch of the range at the store's slot
//! duration. Epochs the store never flushed come back filled with the
//! unknown sentinel instead of being dropped.

use tracing::warn;

use crate::model::{decode_value, Epoch, Granularity, StoreError, MAX_METRIC_NAME};
use crate::series::Series;

use super::epoch_from_unix;

#[derive(Debug, Clone)]
pub struct QueryRequest {
    pub epoch_from: i64,
    pub epoch_to: i64,
    pub metrics: Vec<String>,
    pub granularity: Granularity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataPoint {
    pub epoch: i64,
    pub value: i64,
}

/// One row of points per requested metric, `epochs_num` points each.
#[derive(Debug, Clone)]
pub struct QueryReply {
    pub tuples: Vec<Vec<DataPoint>>,
    pub epochs_num: u32,
}

pub(crate) fn run(
    store: &mut Series,
    req: &QueryRequest,
    now: i64,
) -> Result<QueryReply, StoreError> {
    if req.metrics.is_empty() {
        return Ok(QueryReply {
            tuples: Vec::new(),
            epochs_num: 0,
        });
    }

    for name in &req.metrics {
        if name.len() > MAX_METRIC_NAME {
            return Err(StoreError::out_of_range(format!(
                "metric name {name:?} exceeds {MAX_METRIC_NAME} bytes"
            )));
        }
    }

    if req.epoch_from < 0 || req.epoch_from > req.epoch_to {
        return Err(StoreError::out_of_range(format!(
            "wrong epoch range {}..{}",
            req.epoch_from, req.epoch_to
        )));
    }

    // never read past the clock
    let epoch_to = req.epoch_to.min(now);

    if epoch_to < req.epoch_from {
        return Err(StoreError::out_of_range(format!(
            "epoch range {}..{} starts in the future",
            req.epoch_from, req.epoch_to
        )));
    }

    // pending writes must be visible to the epoch grid
    if !store.is_read_only() {
        store.flush_chunk()?;
    }

    let from = store.normalize_epoch(epoch_from_unix(req.epoch_from)?);
    let to = store.normalize_epoch(epoch_from_unix(epoch_to)?);
    let step = store.slot_duration();

    let count = ((to - from) / step + 1) as usize;
    let epochs: Vec<Epoch> = (0..count).map(|i| from + i as u32 * step).collect();

    let first = store.epoch_list().first().copied();
    let recent = store.most_recent_epoch();

    let empty: Vec<bool> = epochs
        .iter()
        .map(|e| match (first, recent) {
            (Some(first), Some(recent)) => {
                *e < first || *e > recent || store.epoch_list().binary_search(e).is_err()
            }
            _ => true,
        })
        .collect();

    let unknown = store.unknown_value() as i64;

    let mut tuples: Vec<Vec<DataPoint>> = req
        .metrics
        .iter()
        .map(|_| Vec::with_capacity(count))
        .collect();

    for (j, &epoch) in epochs.iter().enumerate() {
        let mut available = !empty[j];

        if available {
            if let Err(err) = store.goto_epoch(epoch, true, false) {
                warn!(%err, epoch, "listed epoch failed to load, treating it as empty");
                available = false;
            }
        }

        for (k, metric) in req.metrics.iter().enumerate() {
            let value = if available {
                match store.get_by_key(metric) {
                    Ok(bytes) => decode_value(bytes) as i64,
                    Err(_) => unknown,
                }
            } else {
                unknown
            };

            tuples[k].push(DataPoint {
                epoch: epoch as i64,
                value,
            });
        }
    }

    Ok(QueryReply {
        tuples,
        epochs_num: count as u32,
    })
}
