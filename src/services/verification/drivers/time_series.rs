use super::DriverContext;
use crate::error::VerificationResult;
use crate::services::verification::aggregator::{Aggregator, GroupSpec, LeadScope, SliceFilters};
use crate::services::verification::classify::PairKernel;
use crate::services::verification::store::{LeadSelector, VerificationStore};
use crate::services::verification::types::{GroupKey, Tally};
use crate::time::bin_epoch;
use std::collections::BTreeMap;

pub async fn run<S, K>(ctx: &DriverContext<'_, S>, kernel: &K) -> VerificationResult<Vec<Tally<K::Stat>>>
where
    S: VerificationStore,
    K: PairKernel,
{
    let q = ctx.query;
    let lead = ctx.required_lead()?;
    ctx.ignore_filter("utc_cycle_start", !q.utc_cycle_start.is_empty());
    ctx.ignore_filter("single_cycle", q.single_cycle.is_some());

    let epochs = ctx.inventory().list_epochs(q.from_secs, q.to_secs).await?;
    if epochs.is_empty() {
        return Ok(Vec::new());
    }
    let (obs, model) = ctx.fetch_pair(&epochs, &LeadSelector::Exact(lead)).await?;

    let groups = bin_groups(&epochs, q.average.unwrap_or(0))
        .into_iter()
        .map(|(key, epochs)| GroupSpec {
            key: GroupKey::Epoch(key),
            epochs,
            leads: LeadScope::Fixed(lead),
            stations: &q.station_ids,
        })
        .collect::<Vec<_>>();

    let filters = SliceFilters::none().with_valid_hours(&q.valid_times_of_day);
    Ok(Aggregator::new(kernel, &obs, &model, &filters).aggregate_all(&groups))
}

/// Epochs (ascending) keyed by their bin.
pub fn bin_groups(epochs: &[i64], bin_secs: i64) -> BTreeMap<i64, Vec<i64>> {
    let mut groups: BTreeMap<i64, Vec<i64>> = BTreeMap::new();
    for &epoch in epochs {
        groups
            .entry(bin_epoch(epoch, bin_secs))
            .or_default()
            .push(epoch);
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unbinned_epochs_stay_separate() {
        let groups = bin_groups(&[100, 200, 300], 0);
        assert_eq!(groups.len(), 3);
        assert_eq!(groups[&200], vec![200]);
    }

    #[test]
    fn epochs_share_the_nearest_bin() {
        let groups = bin_groups(&[0, 1800, 3600, 5400, 7199], 3600);
        assert_eq!(groups[&0], vec![0]);
        assert_eq!(groups[&3600], vec![1800, 3600]);
        assert_eq!(groups[&7200], vec![5400, 7199]);
    }
}
