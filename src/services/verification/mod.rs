//! Forecast/observation verification engine.
//!
//! `VerificationService::execute` validates a query, runs the driver for its plot type under
//! the caller's deadline and cancellation token, and returns compacted tallies. Each call owns
//! all of its intermediate state; one service may serve many concurrent calls.

pub mod aggregator;
pub mod classify;
pub mod compact;
pub mod drivers;
pub mod fetcher;
pub mod index;
pub mod inventory;
pub mod memory_store;
pub mod pg_store;
pub mod store;
pub mod types;


use crate::config::EngineConfig;
use crate::error::{VerificationError, VerificationResult};
use classify::{ContingencyClassifier, ScalarKernel};
use drivers::DriverContext;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use store::{StoreCatalog, VerificationStore};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use types::{PlotType, QueryResult, QueryTallies, StatType, VerificationQuery};
use uuid::Uuid;

/// Per-call controls supplied by the caller.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub request_id: Uuid,
    pub deadline: Option<Duration>,
    pub cancel: CancellationToken,
}

impl RequestContext {
    pub fn new() -> Self {
        Self {
            request_id: Uuid::new_v4(),
            deadline: None,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::new()
    }
}

pub struct VerificationService<S> {
    store: Arc<S>,
    config: EngineConfig,
}

impl<S> Clone for VerificationService<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            config: self.config.clone(),
        }
    }
}

impl<S: VerificationStore> VerificationService<S> {
    pub fn new(store: Arc<S>, config: EngineConfig) -> Self {
        Self { store, config }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub async fn execute(
        &self,
        query: &VerificationQuery,
        ctx: RequestContext,
    ) -> VerificationResult<QueryResult> {
        let span = tracing::info_span!(
            "verification_query",
            request_id = %ctx.request_id,
            plot_type = query.plot_type.as_str(),
            stat_type = query.stat_type.as_str(),
            stations = query.station_ids.len(),
        );
        async move {
            let started = Instant::now();
            let deadline = ctx.deadline.or(self.config.query_timeout);
            let outcome = self.execute_bounded(query, deadline, &ctx.cancel).await;
            match &outcome {
                Ok(result) => tracing::info!(
                    groups = result.tallies.len(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "verification query complete"
                ),
                Err(err) => tracing::warn!(
                    code = err.code(),
                    error = %err,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "verification query failed"
                ),
            }
            outcome
        }
        .instrument(span)
        .await
    }

    async fn execute_bounded(
        &self,
        query: &VerificationQuery,
        deadline: Option<Duration>,
        cancel: &CancellationToken,
    ) -> VerificationResult<QueryResult> {
        let work = self.execute_unbounded(query);
        let bounded = async {
            match deadline {
                Some(limit) => tokio::time::timeout(limit, work)
                    .await
                    .map_err(|_| VerificationError::Timeout { deadline: limit })?,
                None => work.await,
            }
        };
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(VerificationError::Canceled),
            result = bounded => result,
        }
    }

    async fn execute_unbounded(&self, query: &VerificationQuery) -> VerificationResult<QueryResult> {
        validate_query(query)?;
        let catalog = self
            .store
            .catalog()
            .await
            .map_err(|err| VerificationError::data_source("catalog", None, err))?;
        validate_against_catalog(query, &catalog)?;

        let ctx = DriverContext::new(self.store.as_ref(), &self.config, query);
        let tallies = match query.stat_type {
            StatType::Ctc => {
                let threshold = query.threshold.ok_or_else(|| {
                    VerificationError::validation("ctc queries require a threshold")
                })?;
                QueryTallies::Ctc(drivers::run(&ctx, &ContingencyClassifier::new(threshold)).await?)
            }
            StatType::Sums => QueryTallies::Sums(drivers::run(&ctx, &ScalarKernel).await?),
        };
        Ok(QueryResult {
            plot_type: query.plot_type,
            tallies,
        })
    }
}

/// Structural checks that need no store access.
pub fn validate_query(query: &VerificationQuery) -> VerificationResult<()> {
    if query.station_ids.is_empty() {
        return Err(VerificationError::validation("station list is empty"));
    }
    let mut seen = HashSet::with_capacity(query.station_ids.len());
    for station in &query.station_ids {
        if station.trim().is_empty() {
            return Err(VerificationError::validation("station id is blank"));
        }
        if !seen.insert(station.as_str()) {
            return Err(VerificationError::validation(format!(
                "station {station} is listed more than once"
            )));
        }
    }
    if query.from_secs >= query.to_secs {
        return Err(VerificationError::validation(format!(
            "from_secs ({}) must be before to_secs ({})",
            query.from_secs, query.to_secs
        )));
    }
    if query.variable.trim().is_empty() {
        return Err(VerificationError::validation("variable is empty"));
    }
    if query.model.trim().is_empty() {
        return Err(VerificationError::validation("model is empty"));
    }
    if query.stat_type == StatType::Ctc && !query.threshold.is_some_and(f64::is_finite) {
        return Err(VerificationError::validation(
            "ctc queries require a finite threshold",
        ));
    }
    if let Some(average) = query.average {
        if average <= 0 {
            return Err(VerificationError::validation("average must be positive"));
        }
    }
    if let Some(lead) = query.forecast_lead {
        if lead < 0 {
            return Err(VerificationError::validation("forecast_lead must not be negative"));
        }
    }
    for (name, hours) in [
        ("valid_times_of_day", &query.valid_times_of_day),
        ("utc_cycle_start", &query.utc_cycle_start),
    ] {
        if let Some(hour) = hours.iter().find(|h| !(0..=23).contains(*h)) {
            return Err(VerificationError::validation(format!(
                "{name} hour {hour} is outside 0..=23"
            )));
        }
    }
    for filter in [&query.obs_filter, &query.model_filter].into_iter().flatten() {
        if filter.variable.trim().is_empty() || filter.min > filter.max {
            return Err(VerificationError::validation(format!(
                "value filter on {:?} needs a variable and min <= max",
                filter.variable
            )));
        }
    }
    match query.plot_type {
        PlotType::TimeSeries | PlotType::ValidTime | PlotType::Map
            if query.forecast_lead.is_none() =>
        {
            Err(VerificationError::validation(format!(
                "{} queries require forecast_lead",
                query.plot_type.as_str()
            )))
        }
        PlotType::DailyModelCycle if query.utc_cycle_start.is_empty() => Err(
            VerificationError::validation("daily_model_cycle queries require utc_cycle_start"),
        ),
        _ => Ok(()),
    }
}

pub fn validate_against_catalog(
    query: &VerificationQuery,
    catalog: &StoreCatalog,
) -> VerificationResult<()> {
    if !catalog.variables.contains(&query.variable) {
        return Err(VerificationError::validation(format!(
            "unknown variable {}",
            query.variable
        )));
    }
    if !catalog.models.contains(&query.model) {
        return Err(VerificationError::validation(format!(
            "unknown model {}",
            query.model
        )));
    }
    for filter in [&query.obs_filter, &query.model_filter].into_iter().flatten() {
        if !catalog.variables.contains(&filter.variable) {
            return Err(VerificationError::validation(format!(
                "unknown filter variable {}",
                filter.variable
            )));
        }
    }
    Ok(())
}
