use super::DriverContext;
use crate::error::VerificationResult;
use crate::services::verification::aggregator::{Aggregator, GroupSpec, LeadScope, SliceFilters};
use crate::services::verification::classify::PairKernel;
use crate::services::verification::store::{LeadSelector, VerificationStore};
use crate::services::verification::types::{GroupKey, Tally};
use crate::time::hour_of_day;
use std::collections::BTreeMap;

pub async fn run<S, K>(ctx: &DriverContext<'_, S>, kernel: &K) -> VerificationResult<Vec<Tally<K::Stat>>>
where
    S: VerificationStore,
    K: PairKernel,
{
    let q = ctx.query;
    let lead = ctx.required_lead()?;
    ctx.ignore_filter("valid_times_of_day", !q.valid_times_of_day.is_empty());
    ctx.ignore_filter("utc_cycle_start", !q.utc_cycle_start.is_empty());
    ctx.ignore_filter("single_cycle", q.single_cycle.is_some());

    let epochs = ctx.inventory().list_epochs(q.from_secs, q.to_secs).await?;
    if epochs.is_empty() {
        return Ok(Vec::new());
    }
    let (obs, model) = ctx.fetch_pair(&epochs, &LeadSelector::Exact(lead)).await?;

    let groups = hour_groups(&epochs)
        .into_iter()
        .map(|(hour, epochs)| GroupSpec {
            key: GroupKey::HourOfDay(hour),
            epochs,
            leads: LeadScope::Fixed(lead),
            stations: &q.station_ids,
        })
        .collect::<Vec<_>>();

    let filters = SliceFilters::none();
    Ok(Aggregator::new(kernel, &obs, &model, &filters).aggregate_all(&groups))
}

pub fn hour_groups(epochs: &[i64]) -> BTreeMap<i64, Vec<i64>> {
    let mut groups: BTreeMap<i64, Vec<i64>> = BTreeMap::new();
    for &epoch in epochs {
        groups.entry(hour_of_day(epoch)).or_default().push(epoch);
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::{SECS_PER_DAY, SECS_PER_HOUR};

    #[test]
    fn only_hours_present_in_the_inventory_become_groups() {
        let day = 19_676 * SECS_PER_DAY;
        let epochs = [
            day,
            day + 6 * SECS_PER_HOUR,
            day + SECS_PER_DAY,
            day + SECS_PER_DAY + 6 * SECS_PER_HOUR,
        ];
        let groups = hour_groups(&epochs);
        assert_eq!(groups.keys().copied().collect::<Vec<_>>(), vec![0, 6]);
        assert_eq!(groups[&6], vec![epochs[1], epochs[3]]);
    }
}
