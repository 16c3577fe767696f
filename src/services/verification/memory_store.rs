//! Deterministic in-process store backed by a JSON-loadable dataset.
//!
//! Used by the test-suite and by the binary's `--fixture` mode. Every `fetch_slice` call is
//! recorded so batching behaviour can be asserted.

use super::store::{
    LeadSelector, SliceRequest, SliceRow, SliceSource, StoreCatalog, VerificationStore,
};
use crate::error::StoreError;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

pub const DEFAULT_MAX_IDENTIFIERS: usize = 100;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ObsRecord {
    pub epoch: i64,
    pub station: String,
    /// Variable name to value; a `null` value is a present-but-null sample.
    #[serde(default)]
    pub values: BTreeMap<String, Option<f64>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelRecord {
    pub model: String,
    pub epoch: i64,
    pub lead: i64,
    pub station: String,
    #[serde(default)]
    pub values: BTreeMap<String, Option<f64>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MemoryDataset {
    #[serde(default)]
    pub obs: Vec<ObsRecord>,
    #[serde(default)]
    pub model: Vec<ModelRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchCall {
    pub source: &'static str,
    pub epochs: Vec<i64>,
    pub stations: Vec<String>,
    pub leads: Option<LeadSelector>,
}

#[derive(Debug)]
pub struct MemoryStore {
    data: MemoryDataset,
    max_identifiers: usize,
    latency: Option<Duration>,
    fail_on: Option<(&'static str, i64)>,
    ignore_lead_selector: bool,
    calls: Mutex<Vec<FetchCall>>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(MemoryDataset::default())
    }
}

impl MemoryStore {
    pub fn new(data: MemoryDataset) -> Self {
        Self {
            data,
            max_identifiers: DEFAULT_MAX_IDENTIFIERS,
            latency: None,
            fail_on: None,
            ignore_lead_selector: false,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn from_json_file(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let data: MemoryDataset = serde_json::from_str(&contents)?;
        Ok(Self::new(data))
    }

    pub fn with_obs(mut self, epoch: i64, station: &str, variable: &str, value: Option<f64>) -> Self {
        match self
            .data
            .obs
            .iter_mut()
            .find(|r| r.epoch == epoch && r.station == station)
        {
            Some(record) => {
                record.values.insert(variable.to_string(), value);
            }
            None => self.data.obs.push(ObsRecord {
                epoch,
                station: station.to_string(),
                values: BTreeMap::from([(variable.to_string(), value)]),
            }),
        }
        self
    }

    pub fn with_model(
        mut self,
        model: &str,
        epoch: i64,
        lead: i64,
        station: &str,
        variable: &str,
        value: Option<f64>,
    ) -> Self {
        match self.data.model.iter_mut().find(|r| {
            r.model == model && r.epoch == epoch && r.lead == lead && r.station == station
        }) {
            Some(record) => {
                record.values.insert(variable.to_string(), value);
            }
            None => self.data.model.push(ModelRecord {
                model: model.to_string(),
                epoch,
                lead,
                station: station.to_string(),
                values: BTreeMap::from([(variable.to_string(), value)]),
            }),
        }
        self
    }

    pub fn with_max_identifiers(mut self, max: usize) -> Self {
        self.max_identifiers = max.max(1);
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Makes any `source` ("obs" or "model") fetch whose epoch chunk contains `epoch` fail.
    pub fn failing_on(mut self, source: &'static str, epoch: i64) -> Self {
        self.fail_on = Some((source, epoch));
        self
    }

    /// Answers model fetches with every stored lead, whatever the request selected. Each row
    /// still reports its own lead.
    pub fn reporting_all_leads(mut self) -> Self {
        self.ignore_lead_selector = true;
        self
    }

    pub fn into_dataset(self) -> MemoryDataset {
        self.data
    }

    pub fn calls(&self) -> Vec<FetchCall> {
        self.calls
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn record_call(&self, request: &SliceRequest<'_>) {
        let leads = match &request.source {
            SliceSource::Obs => None,
            SliceSource::Model { leads, .. } => Some((*leads).clone()),
        };
        self.calls
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(FetchCall {
                source: request.source.label(),
                epochs: request.epochs.to_vec(),
                stations: request.station_ids.to_vec(),
                leads,
            });
    }

    fn select_rows(&self, request: &SliceRequest<'_>) -> Vec<SliceRow> {
        let epochs: HashSet<i64> = request.epochs.iter().copied().collect();
        let stations: HashSet<&str> = request.station_ids.iter().map(String::as_str).collect();
        let sample = |values: &BTreeMap<String, Option<f64>>| -> Option<Option<f64>> {
            let value = *values.get(request.variable)?;
            match request.filter {
                Some(filter) => {
                    let gate = values.get(&filter.variable).copied().flatten();
                    Some(if filter.admits(gate) { value } else { None })
                }
                None => Some(value),
            }
        };

        match &request.source {
            SliceSource::Obs => self
                .data
                .obs
                .iter()
                .filter(|r| epochs.contains(&r.epoch) && stations.contains(r.station.as_str()))
                .filter_map(|r| {
                    sample(&r.values).map(|value| SliceRow {
                        epoch: r.epoch,
                        lead: None,
                        station: r.station.clone(),
                        value,
                    })
                })
                .collect(),
            SliceSource::Model { model, leads } => self
                .data
                .model
                .iter()
                .filter(|r| {
                    r.model == *model
                        && (self.ignore_lead_selector || leads.admits(r.lead))
                        && epochs.contains(&r.epoch)
                        && stations.contains(r.station.as_str())
                })
                .filter_map(|r| {
                    sample(&r.values).map(|value| SliceRow {
                        epoch: r.epoch,
                        lead: Some(r.lead),
                        station: r.station.clone(),
                        value,
                    })
                })
                .collect(),
        }
    }
}

impl VerificationStore for MemoryStore {
    fn max_identifier_list(&self) -> usize {
        self.max_identifiers
    }

    async fn catalog(&self) -> Result<StoreCatalog, StoreError> {
        let mut catalog = StoreCatalog::default();
        for record in &self.data.obs {
            catalog.variables.extend(record.values.keys().cloned());
        }
        for record in &self.data.model {
            catalog.variables.extend(record.values.keys().cloned());
            catalog.models.insert(record.model.clone());
        }
        Ok(catalog)
    }

    async fn distinct_epochs(&self, from_secs: i64, to_secs: i64) -> Result<Vec<i64>, StoreError> {
        let epochs: BTreeSet<i64> = self
            .data
            .obs
            .iter()
            .map(|r| r.epoch)
            .filter(|epoch| *epoch >= from_secs && *epoch <= to_secs)
            .collect();
        Ok(epochs.into_iter().collect())
    }

    async fn distinct_leads(
        &self,
        model: &str,
        from_epoch: i64,
        to_epoch: i64,
    ) -> Result<Vec<i64>, StoreError> {
        let leads: BTreeSet<i64> = self
            .data
            .model
            .iter()
            .filter(|r| r.model == model && r.epoch >= from_epoch && r.epoch <= to_epoch)
            .map(|r| r.lead)
            .collect();
        Ok(leads.into_iter().collect())
    }

    async fn fetch_slice(&self, request: &SliceRequest<'_>) -> Result<Vec<SliceRow>, StoreError> {
        self.record_call(request);
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        if request.epochs.len() > self.max_identifiers
            || request.station_ids.len() > self.max_identifiers
        {
            return Err(StoreError::Query(format!(
                "identifier list exceeds {} entries (epochs={}, stations={})",
                self.max_identifiers,
                request.epochs.len(),
                request.station_ids.len()
            )));
        }
        if let Some((source, epoch)) = self.fail_on {
            if source == request.source.label() && request.epochs.contains(&epoch) {
                return Err(StoreError::Unreachable(format!(
                    "injected failure for {source} chunk containing {epoch}"
                )));
            }
        }
        Ok(self.select_rows(request))
    }
}
