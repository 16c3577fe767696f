//! PostgreSQL-backed store.
//!
//! Observations and model output live in two long tables keyed by valid time, station and
//! variable (plus model and lead for model output). Identifier lists are bound as arrays.

use super::memory_store::MemoryDataset;
use super::store::{LeadSelector, SliceRequest, SliceRow, SliceSource, StoreCatalog, VerificationStore};
use crate::error::StoreError;
use sqlx::PgPool;

pub const DEFAULT_MAX_IDENTIFIERS: usize = 100;

/// Every statement the store issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryTemplate {
    CreateObsTable,
    CreateModelTable,
    CreateObsIndex,
    CreateModelIndex,
    ObsVariables,
    ModelVariables,
    Models,
    DistinctEpochs,
    DistinctLeads,
    ObsSlice,
    ModelSlice,
    InsertObs,
    InsertModel,
}

impl QueryTemplate {
    pub const SCHEMA: [QueryTemplate; 4] = [
        QueryTemplate::CreateObsTable,
        QueryTemplate::CreateModelTable,
        QueryTemplate::CreateObsIndex,
        QueryTemplate::CreateModelIndex,
    ];

    pub fn sql(&self) -> &'static str {
        match self {
            QueryTemplate::CreateObsTable => {
                r#"
                CREATE TABLE IF NOT EXISTS obs (
                    fcst_valid_epoch BIGINT NOT NULL,
                    station TEXT NOT NULL,
                    variable TEXT NOT NULL,
                    value DOUBLE PRECISION,
                    PRIMARY KEY (variable, fcst_valid_epoch, station)
                )
                "#
            }
            QueryTemplate::CreateModelTable => {
                r#"
                CREATE TABLE IF NOT EXISTS model_output (
                    model TEXT NOT NULL,
                    fcst_valid_epoch BIGINT NOT NULL,
                    fcst_len BIGINT NOT NULL,
                    station TEXT NOT NULL,
                    variable TEXT NOT NULL,
                    value DOUBLE PRECISION,
                    PRIMARY KEY (model, variable, fcst_valid_epoch, fcst_len, station)
                )
                "#
            }
            QueryTemplate::CreateObsIndex => {
                "CREATE INDEX IF NOT EXISTS obs_epoch_idx ON obs (fcst_valid_epoch)"
            }
            QueryTemplate::CreateModelIndex => {
                "CREATE INDEX IF NOT EXISTS model_output_epoch_idx ON model_output (model, fcst_valid_epoch)"
            }
            QueryTemplate::ObsVariables => "SELECT DISTINCT variable FROM obs",
            QueryTemplate::ModelVariables => "SELECT DISTINCT variable FROM model_output",
            QueryTemplate::Models => "SELECT DISTINCT model FROM model_output",
            QueryTemplate::DistinctEpochs => {
                r#"
                SELECT DISTINCT fcst_valid_epoch
                FROM obs
                WHERE fcst_valid_epoch BETWEEN $1 AND $2
                ORDER BY fcst_valid_epoch
                "#
            }
            QueryTemplate::DistinctLeads => {
                r#"
                SELECT DISTINCT fcst_len
                FROM model_output
                WHERE model = $1
                  AND fcst_valid_epoch BETWEEN $2 AND $3
                ORDER BY fcst_len
                "#
            }
            QueryTemplate::ObsSlice => {
                r#"
                SELECT o.fcst_valid_epoch AS epoch,
                       NULL::BIGINT AS lead,
                       o.station,
                       CASE
                           WHEN $4::TEXT IS NULL THEN o.value
                           WHEN f.value >= $5 AND f.value <= $6 THEN o.value
                           ELSE NULL
                       END AS value
                FROM obs o
                LEFT JOIN obs f
                  ON f.fcst_valid_epoch = o.fcst_valid_epoch
                 AND f.station = o.station
                 AND f.variable = $4
                WHERE o.variable = $1
                  AND o.station = ANY($2)
                  AND o.fcst_valid_epoch = ANY($3)
                ORDER BY o.fcst_valid_epoch, o.station
                "#
            }
            QueryTemplate::ModelSlice => {
                r#"
                SELECT m.fcst_valid_epoch AS epoch,
                       m.fcst_len AS lead,
                       m.station,
                       CASE
                           WHEN $5::TEXT IS NULL THEN m.value
                           WHEN f.value >= $6 AND f.value <= $7 THEN m.value
                           ELSE NULL
                       END AS value
                FROM model_output m
                LEFT JOIN model_output f
                  ON f.model = m.model
                 AND f.fcst_valid_epoch = m.fcst_valid_epoch
                 AND f.fcst_len = m.fcst_len
                 AND f.station = m.station
                 AND f.variable = $5
                WHERE m.model = $1
                  AND m.variable = $2
                  AND m.station = ANY($3)
                  AND m.fcst_valid_epoch = ANY($4)
                  AND ($8::BIGINT[] IS NULL OR m.fcst_len = ANY($8))
                  AND ($9::BIGINT IS NULL OR m.fcst_len < $9)
                ORDER BY m.fcst_valid_epoch, m.fcst_len, m.station
                "#
            }
            QueryTemplate::InsertObs => {
                r#"
                INSERT INTO obs (fcst_valid_epoch, station, variable, value)
                VALUES ($1, $2, $3, $4)
                ON CONFLICT (variable, fcst_valid_epoch, station) DO UPDATE SET value = EXCLUDED.value
                "#
            }
            QueryTemplate::InsertModel => {
                r#"
                INSERT INTO model_output (model, fcst_valid_epoch, fcst_len, station, variable, value)
                VALUES ($1, $2, $3, $4, $5, $6)
                ON CONFLICT (model, variable, fcst_valid_epoch, fcst_len, station)
                DO UPDATE SET value = EXCLUDED.value
                "#
            }
        }
    }
}

#[derive(sqlx::FromRow)]
struct SliceRecord {
    epoch: i64,
    lead: Option<i64>,
    station: String,
    value: Option<f64>,
}

impl From<SliceRecord> for SliceRow {
    fn from(record: SliceRecord) -> Self {
        SliceRow {
            epoch: record.epoch,
            lead: record.lead,
            station: record.station,
            value: record.value,
        }
    }
}

/// Lead bounds as bind parameters: an explicit list and/or an exclusive upper limit.
fn lead_binds(selector: &LeadSelector) -> (Option<Vec<i64>>, Option<i64>) {
    match selector {
        LeadSelector::Exact(lead) => (Some(vec![*lead]), None),
        LeadSelector::AnyOf(leads) => (Some(leads.clone()), None),
        LeadSelector::Below(limit) => (None, Some(*limit)),
        LeadSelector::Any => (None, None),
    }
}

#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
    max_identifiers: usize,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            max_identifiers: DEFAULT_MAX_IDENTIFIERS,
        }
    }

    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        for template in QueryTemplate::SCHEMA {
            sqlx::query(template.sql()).execute(&self.pool).await?;
        }
        Ok(())
    }

    /// Writes a fixture dataset into the tables in one transaction.
    pub async fn load_dataset(&self, data: &MemoryDataset) -> Result<u64, StoreError> {
        let mut tx = self.pool.begin().await?;
        let mut written = 0u64;
        for record in &data.obs {
            for (variable, value) in &record.values {
                sqlx::query(QueryTemplate::InsertObs.sql())
                    .bind(record.epoch)
                    .bind(&record.station)
                    .bind(variable)
                    .bind(*value)
                    .execute(&mut *tx)
                    .await?;
                written += 1;
            }
        }
        for record in &data.model {
            for (variable, value) in &record.values {
                sqlx::query(QueryTemplate::InsertModel.sql())
                    .bind(&record.model)
                    .bind(record.epoch)
                    .bind(record.lead)
                    .bind(&record.station)
                    .bind(variable)
                    .bind(*value)
                    .execute(&mut *tx)
                    .await?;
                written += 1;
            }
        }
        tx.commit().await?;
        tracing::info!(rows = written, "fixture dataset loaded");
        Ok(written)
    }
}

impl VerificationStore for PgStore {
    fn max_identifier_list(&self) -> usize {
        self.max_identifiers
    }

    async fn catalog(&self) -> Result<StoreCatalog, StoreError> {
        let mut catalog = StoreCatalog::default();
        for template in [QueryTemplate::ObsVariables, QueryTemplate::ModelVariables] {
            let variables: Vec<String> = sqlx::query_scalar(template.sql())
                .fetch_all(&self.pool)
                .await?;
            catalog.variables.extend(variables);
        }
        let models: Vec<String> = sqlx::query_scalar(QueryTemplate::Models.sql())
            .fetch_all(&self.pool)
            .await?;
        catalog.models.extend(models);
        Ok(catalog)
    }

    async fn distinct_epochs(&self, from_secs: i64, to_secs: i64) -> Result<Vec<i64>, StoreError> {
        let epochs: Vec<i64> = sqlx::query_scalar(QueryTemplate::DistinctEpochs.sql())
            .bind(from_secs)
            .bind(to_secs)
            .fetch_all(&self.pool)
            .await?;
        Ok(epochs)
    }

    async fn distinct_leads(
        &self,
        model: &str,
        from_epoch: i64,
        to_epoch: i64,
    ) -> Result<Vec<i64>, StoreError> {
        let leads: Vec<i64> = sqlx::query_scalar(QueryTemplate::DistinctLeads.sql())
            .bind(model)
            .bind(from_epoch)
            .bind(to_epoch)
            .fetch_all(&self.pool)
            .await?;
        Ok(leads)
    }

    async fn fetch_slice(&self, request: &SliceRequest<'_>) -> Result<Vec<SliceRow>, StoreError> {
        if request.epochs.len() > self.max_identifiers
            || request.station_ids.len() > self.max_identifiers
        {
            return Err(StoreError::Query(format!(
                "identifier list exceeds {} entries",
                self.max_identifiers
            )));
        }
        let filter_variable = request.filter.map(|f| f.variable.as_str());
        let filter_min = request.filter.map(|f| f.min);
        let filter_max = request.filter.map(|f| f.max);

        let records: Vec<SliceRecord> = match &request.source {
            SliceSource::Obs => {
                sqlx::query_as(QueryTemplate::ObsSlice.sql())
                    .bind(request.variable)
                    .bind(request.station_ids)
                    .bind(request.epochs)
                    .bind(filter_variable)
                    .bind(filter_min)
                    .bind(filter_max)
                    .fetch_all(&self.pool)
                    .await?
            }
            SliceSource::Model { model, leads } => {
                let (lead_list, lead_limit) = lead_binds(leads);
                sqlx::query_as(QueryTemplate::ModelSlice.sql())
                    .bind(*model)
                    .bind(request.variable)
                    .bind(request.station_ids)
                    .bind(request.epochs)
                    .bind(filter_variable)
                    .bind(filter_min)
                    .bind(filter_max)
                    .bind(lead_list)
                    .bind(lead_limit)
                    .fetch_all(&self.pool)
                    .await?
            }
        };
        Ok(records.into_iter().map(SliceRow::from).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::services::verification::types::{PlotType, QueryTallies, VerificationQuery};
    use crate::services::verification::{RequestContext, VerificationService};
    use std::sync::Arc;

    #[test]
    fn lead_selectors_map_to_binds() {
        assert_eq!(lead_binds(&LeadSelector::Exact(6)), (Some(vec![6]), None));
        assert_eq!(lead_binds(&LeadSelector::Below(24)), (None, Some(24)));
        assert_eq!(lead_binds(&LeadSelector::Any), (None, None));
    }

    #[test]
    fn slice_templates_select_the_row_shape() {
        for template in [QueryTemplate::ObsSlice, QueryTemplate::ModelSlice] {
            let sql = template.sql();
            assert!(sql.contains("AS epoch"));
            assert!(sql.contains("AS lead"));
            assert!(sql.contains("AS value"));
        }
        assert!(QueryTemplate::ModelSlice.sql().contains("$9"));
    }

    #[tokio::test]
    async fn pg_store_runs_a_time_series_query() -> anyhow::Result<()> {
        if std::env::var("MATS_INTEGRATION_TEST").ok().as_deref() != Some("1") {
            return Ok(());
        }
        let Ok(url) = std::env::var("MATS_TEST_DATABASE_URL") else {
            return Ok(());
        };
        let pool = crate::db::connect_lazy(&url, 4)?;
        let store = PgStore::new(pool);
        store.ensure_schema().await?;

        let model = format!("TEST_{}", uuid::Uuid::new_v4().simple());
        let dataset = crate::test_support::scenario_dataset(&model);
        store.load_dataset(&dataset).await?;

        let service = VerificationService::new(Arc::new(store), EngineConfig::default());
        let query = VerificationQuery {
            plot_type: PlotType::TimeSeries,
            ..crate::test_support::scenario_query(&model)
        };
        let result = service.execute(&query, RequestContext::new()).await?;
        let QueryTallies::Ctc(tallies) = result.tallies else {
            anyhow::bail!("expected ctc tallies");
        };
        assert_eq!(tallies.len(), 1);
        assert_eq!(tallies[0].stats.miss, 1);
        assert_eq!(tallies[0].stats.false_alarm, 1);
        assert_eq!(tallies[0].n0, 2);
        Ok(())
    }
}
