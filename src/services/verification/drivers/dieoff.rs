use super::DriverContext;
use crate::error::VerificationResult;
use crate::services::verification::aggregator::{Aggregator, GroupSpec, LeadScope, SliceFilters};
use crate::services::verification::classify::PairKernel;
use crate::services::verification::index::{LeadSliceMap, SliceMap};
use crate::services::verification::store::{LeadSelector, VerificationStore};
use crate::services::verification::types::{GroupKey, Tally};
use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet, HashSet};

/// Groups by forecast lead. Observations are fetched once; model data a few leads at a time,
/// each chunk aggregated and dropped before the next one is requested.
pub async fn run<S, K>(ctx: &DriverContext<'_, S>, kernel: &K) -> VerificationResult<Vec<Tally<K::Stat>>>
where
    S: VerificationStore,
    K: PairKernel,
{
    let q = ctx.query;
    let inventory = ctx.inventory();
    let epochs = inventory.list_epochs(q.from_secs, q.to_secs).await?;
    let (Some(&first), Some(&last)) = (epochs.first(), epochs.last()) else {
        return Ok(Vec::new());
    };

    let leads = match q.forecast_lead {
        Some(lead) => vec![lead],
        None => {
            let step = ctx.config.dieoff_lead_step.max(1);
            inventory
                .list_forecast_leads(&q.model, first, last)
                .await?
                .into_iter()
                .filter(|lead| lead.rem_euclid(step) == 0)
                .collect()
        }
    };
    let chunks = lead_chunks(&leads, ctx.config.lead_chunk_size);
    let Some((head, rest)) = chunks.split_first() else {
        return Ok(Vec::new());
    };
    tracing::debug!(leads = leads.len(), chunks = chunks.len(), "dieoff lead plan");

    let filters = SliceFilters::none()
        .with_valid_hours(&q.valid_times_of_day)
        .with_cycle_hours(&q.utc_cycle_start)
        .with_single_cycle(q.single_cycle);

    let fetcher = ctx.fetcher();
    let head_selector = LeadSelector::AnyOf(head.to_vec());
    let (obs, head_model) = tokio::try_join!(
        ctx.fetch_obs(&fetcher, &epochs),
        ctx.fetch_model(&fetcher, &epochs, &head_selector)
    )?;

    let mut chunk_run = ChunkRun {
        kernel,
        obs: &obs,
        filters: &filters,
        epochs: &epochs,
        stations: &q.station_ids,
        by_lead: BTreeMap::new(),
        seen: HashSet::new(),
    };
    chunk_run.absorb(head, head_model);
    for chunk in rest {
        let model = ctx
            .fetch_model(&fetcher, &epochs, &LeadSelector::AnyOf(chunk.to_vec()))
            .await?;
        chunk_run.absorb(chunk, model);
    }
    Ok(chunk_run.by_lead.into_values().collect())
}

/// Splits the lead list into consecutive chunks of at most `size` leads.
pub fn lead_chunks(leads: &[i64], size: usize) -> Vec<&[i64]> {
    leads.chunks(size.max(1)).collect()
}

struct ChunkRun<'a, K: PairKernel> {
    kernel: &'a K,
    obs: &'a SliceMap,
    filters: &'a SliceFilters,
    epochs: &'a [i64],
    stations: &'a [String],
    by_lead: BTreeMap<i64, Tally<K::Stat>>,
    /// `(lead, epoch, station)` keys already aggregated by an earlier chunk.
    seen: HashSet<(i64, i64, String)>,
}

impl<K: PairKernel> ChunkRun<'_, K> {
    /// Aggregates one lead chunk; `model` is dropped on return.
    fn absorb(&mut self, chunk: &[i64], mut model: LeadSliceMap) {
        let dropped = model.drop_seen(&mut self.seen);
        if dropped > 0 {
            tracing::debug!(dropped, "model rows already aggregated by an earlier lead chunk");
        }
        // Leads the store reported beyond the requested ones still get their own group.
        let leads: BTreeSet<i64> = chunk.iter().copied().chain(model.leads()).collect();
        let groups: Vec<GroupSpec<'_>> = leads
            .into_iter()
            .map(|lead| GroupSpec {
                key: GroupKey::Lead(lead),
                epochs: self.epochs.to_vec(),
                leads: LeadScope::Fixed(lead),
                stations: self.stations,
            })
            .collect();
        let aggregator = Aggregator::new(self.kernel, self.obs, &model, self.filters);
        for (group, tally) in groups.iter().zip(aggregator.aggregate_all(&groups)) {
            let GroupKey::Lead(lead) = group.key else {
                continue;
            };
            match self.by_lead.entry(lead) {
                Entry::Vacant(slot) => {
                    slot.insert(tally);
                }
                Entry::Occupied(mut slot) => slot.get_mut().absorb(tally),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn leads_split_into_chunks_of_three() {
        let leads = [0, 3, 6, 9, 12];
        let chunks = lead_chunks(&leads, 3);
        assert_eq!(chunks, vec![&[0, 3, 6][..], &[9, 12][..]]);
    }

    #[test]
    fn zero_chunk_size_is_treated_as_one() {
        assert_eq!(lead_chunks(&[1, 2], 0).len(), 2);
        assert!(lead_chunks(&[], 3).is_empty());
    }
}
