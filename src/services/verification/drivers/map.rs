use super::DriverContext;
use crate::error::VerificationResult;
use crate::services::verification::aggregator::{Aggregator, GroupSpec, LeadScope, SliceFilters};
use crate::services::verification::classify::PairKernel;
use crate::services::verification::store::{LeadSelector, VerificationStore};
use crate::services::verification::types::{GroupKey, Tally};

/// One group per station, sorted by id, over the whole epoch range.
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

    let mut stations = q.station_ids.clone();
    stations.sort();
    let groups = stations
        .iter()
        .map(|station| GroupSpec {
            key: GroupKey::Station(station.clone()),
            epochs: epochs.clone(),
            leads: LeadScope::Fixed(lead),
            stations: std::slice::from_ref(station),
        })
        .collect::<Vec<_>>();

    let filters = SliceFilters::none().with_valid_hours(&q.valid_times_of_day);
    Ok(Aggregator::new(kernel, &obs, &model, &filters).aggregate_all(&groups))
}
