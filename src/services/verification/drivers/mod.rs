pub mod daily_model_cycle;
pub mod dieoff;
pub mod map;
pub mod time_series;
pub mod valid_time;

use super::classify::PairKernel;
use super::compact;
use super::fetcher::SliceFetcher;
use super::index::{LeadSliceMap, SliceMap};
use super::inventory::EpochInventory;
use super::store::{LeadSelector, VerificationStore};
use super::types::{PlotType, Tally, VerificationQuery};
use crate::config::EngineConfig;
use crate::error::{VerificationError, VerificationResult};

/// Request-scoped inputs shared by every driver. Nothing here outlives one call.
pub struct DriverContext<'a, S> {
    pub store: &'a S,
    pub config: &'a EngineConfig,
    pub query: &'a VerificationQuery,
}

impl<'a, S: VerificationStore> DriverContext<'a, S> {
    pub fn new(store: &'a S, config: &'a EngineConfig, query: &'a VerificationQuery) -> Self {
        Self {
            store,
            config,
            query,
        }
    }

    pub fn inventory(&self) -> EpochInventory<'a, S> {
        EpochInventory::new(self.store)
    }

    pub fn fetcher(&self) -> SliceFetcher<'a, S> {
        SliceFetcher::new(
            self.store,
            self.config.epoch_batch_size,
            self.config.station_batch_size,
        )
    }

    pub async fn fetch_obs(
        &self,
        fetcher: &SliceFetcher<'a, S>,
        epochs: &[i64],
    ) -> VerificationResult<SliceMap> {
        let q = self.query;
        fetcher
            .fetch_obs(&q.variable, &q.station_ids, epochs, q.obs_filter.as_ref())
            .await
    }

    pub async fn fetch_model(
        &self,
        fetcher: &SliceFetcher<'a, S>,
        epochs: &[i64],
        leads: &LeadSelector,
    ) -> VerificationResult<LeadSliceMap> {
        let q = self.query;
        fetcher
            .fetch_model(
                &q.model,
                leads,
                &q.variable,
                &q.station_ids,
                epochs,
                q.model_filter.as_ref(),
            )
            .await
    }

    /// Observation and model slices for the same epochs, fetched concurrently.
    pub async fn fetch_pair(
        &self,
        epochs: &[i64],
        leads: &LeadSelector,
    ) -> VerificationResult<(SliceMap, LeadSliceMap)> {
        let fetcher = self.fetcher();
        tokio::try_join!(
            self.fetch_obs(&fetcher, epochs),
            self.fetch_model(&fetcher, epochs, leads)
        )
    }

    pub fn required_lead(&self) -> VerificationResult<i64> {
        self.query.forecast_lead.ok_or_else(|| {
            VerificationError::validation(format!(
                "{} queries require forecast_lead",
                self.query.plot_type.as_str()
            ))
        })
    }

    /// Records a filter the driver does not apply so callers can see it was dropped.
    pub(crate) fn ignore_filter(&self, name: &'static str, is_set: bool) {
        if is_set {
            tracing::debug!(
                plot_type = self.query.plot_type.as_str(),
                filter = name,
                "filter not used by this plot type; ignoring"
            );
        }
    }
}

/// Runs the driver for `query.plot_type` and compacts its tallies.
pub async fn run<S, K>(ctx: &DriverContext<'_, S>, kernel: &K) -> VerificationResult<Vec<Tally<K::Stat>>>
where
    S: VerificationStore,
    K: PairKernel,
{
    let tallies = match ctx.query.plot_type {
        PlotType::TimeSeries => time_series::run(ctx, kernel).await?,
        PlotType::Dieoff => dieoff::run(ctx, kernel).await?,
        PlotType::ValidTime => valid_time::run(ctx, kernel).await?,
        PlotType::DailyModelCycle => daily_model_cycle::run(ctx, kernel).await?,
        PlotType::Map => map::run(ctx, kernel).await?,
    };
    compact::finalize(tallies)
}
