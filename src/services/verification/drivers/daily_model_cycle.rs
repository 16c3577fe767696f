use super::DriverContext;
use crate::error::{VerificationError, VerificationResult};
use crate::services::verification::aggregator::{Aggregator, GroupSpec, LeadScope, SliceFilters};
use crate::services::verification::classify::PairKernel;
use crate::services::verification::store::{LeadSelector, VerificationStore};
use crate::services::verification::types::{GroupKey, Tally};

pub async fn run<S, K>(ctx: &DriverContext<'_, S>, kernel: &K) -> VerificationResult<Vec<Tally<K::Stat>>>
where
    S: VerificationStore,
    K: PairKernel,
{
    let q = ctx.query;
    if q.utc_cycle_start.is_empty() {
        return Err(VerificationError::validation(
            "daily_model_cycle queries require utc_cycle_start",
        ));
    }
    ctx.ignore_filter("forecast_lead", q.forecast_lead.is_some());
    ctx.ignore_filter("valid_times_of_day", !q.valid_times_of_day.is_empty());
    ctx.ignore_filter("single_cycle", q.single_cycle.is_some());

    let epochs = ctx.inventory().list_epochs(q.from_secs, q.to_secs).await?;
    if epochs.is_empty() {
        return Ok(Vec::new());
    }
    let max_lead = ctx.config.daily_cycle_max_lead;
    let (obs, model) = ctx.fetch_pair(&epochs, &LeadSelector::Below(max_lead)).await?;

    let groups = epochs
        .iter()
        .map(|&epoch| GroupSpec {
            key: GroupKey::CalendarCycle(epoch),
            epochs: vec![epoch],
            leads: LeadScope::All,
            stations: &q.station_ids,
        })
        .collect::<Vec<_>>();

    let filters = SliceFilters::none()
        .with_cycle_hours(&q.utc_cycle_start)
        .with_max_lead(max_lead);
    Ok(Aggregator::new(kernel, &obs, &model, &filters).aggregate_all(&groups))
}
