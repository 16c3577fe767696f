use super::index::{LeadSliceMap, SliceMap};
use super::store::{LeadSelector, SliceRequest, SliceRow, SliceSource, VerificationStore};
use super::types::ValueFilter;
use crate::error::{StoreError, VerificationError, VerificationResult};
use futures::stream::{FuturesUnordered, StreamExt};
use std::time::Instant;

/// Chunk sizes for one fetch, already capped by the store limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchPlan {
    pub epochs: usize,
    pub stations: usize,
}

impl BatchPlan {
    pub fn new(epoch_batch: usize, station_batch: usize, store_limit: usize) -> Self {
        let limit = store_limit.max(1);
        Self {
            epochs: epoch_batch.clamp(1, limit),
            stations: station_batch.clamp(1, limit),
        }
    }

}

/// Issues every station×epoch chunk at once and merges each as it completes. The first failed
/// chunk fails the fetch; the calls still in flight are dropped with it.
pub struct SliceFetcher<'a, S> {
    store: &'a S,
    plan: BatchPlan,
}

impl<'a, S: VerificationStore> SliceFetcher<'a, S> {
    pub fn new(store: &'a S, epoch_batch: usize, station_batch: usize) -> Self {
        let plan = BatchPlan::new(epoch_batch, station_batch, store.max_identifier_list());
        Self { store, plan }
    }

    pub async fn fetch_obs(
        &self,
        variable: &str,
        station_ids: &[String],
        epochs: &[i64],
        filter: Option<&ValueFilter>,
    ) -> VerificationResult<SliceMap> {
        let mut slice = SliceMap::new();
        self.fetch_rows(
            "fetch_obs_slice",
            SliceSource::Obs,
            variable,
            station_ids,
            epochs,
            filter,
            |rows| {
                for row in rows {
                    slice.insert(row.epoch, row.station, row.value);
                }
                Ok(())
            },
        )
        .await?;
        Ok(slice)
    }

    pub async fn fetch_model(
        &self,
        model: &str,
        leads: &LeadSelector,
        variable: &str,
        station_ids: &[String],
        epochs: &[i64],
        filter: Option<&ValueFilter>,
    ) -> VerificationResult<LeadSliceMap> {
        let mut index = LeadSliceMap::new();
        self.fetch_rows(
            "fetch_model_slice",
            SliceSource::Model { model, leads },
            variable,
            station_ids,
            epochs,
            filter,
            |rows| {
                for row in rows {
                    let lead = row.lead.ok_or_else(|| {
                        StoreError::Malformed(format!(
                            "model row for station {} at {} has no forecast lead",
                            row.station, row.epoch
                        ))
                    })?;
                    index.insert(lead, row.epoch, row.station, row.value);
                }
                Ok(())
            },
        )
        .await?;
        Ok(index)
    }

    #[allow(clippy::too_many_arguments)]
    async fn fetch_rows<F>(
        &self,
        operation: &'static str,
        source: SliceSource<'_>,
        variable: &str,
        station_ids: &[String],
        epochs: &[i64],
        filter: Option<&ValueFilter>,
        mut merge: F,
    ) -> VerificationResult<()>
    where
        F: FnMut(Vec<SliceRow>) -> Result<(), StoreError>,
    {
        if epochs.is_empty() || station_ids.is_empty() {
            return Ok(());
        }
        let started = Instant::now();
        let store = self.store;
        let mut pending = FuturesUnordered::new();
        let mut chunks = 0usize;
        for station_chunk in station_ids.chunks(self.plan.stations) {
            for epoch_chunk in epochs.chunks(self.plan.epochs) {
                let chunk = chunks;
                chunks += 1;
                let request = SliceRequest {
                    source: source.clone(),
                    variable,
                    station_ids: station_chunk,
                    epochs: epoch_chunk,
                    filter,
                };
                pending.push(async move {
                    let result = store.fetch_slice(&request).await;
                    (chunk, result)
                });
            }
        }

        let mut rows = 0usize;
        while let Some((chunk, result)) = pending.next().await {
            let batch =
                result.map_err(|err| VerificationError::data_source(operation, Some(chunk), err))?;
            rows += batch.len();
            merge(batch).map_err(|err| VerificationError::data_source(operation, Some(chunk), err))?;
        }

        tracing::debug!(
            operation,
            source = source.label(),
            chunks,
            rows,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "slice fetch complete"
        );
        Ok(())
    }
}
