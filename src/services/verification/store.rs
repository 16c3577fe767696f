use super::types::ValueFilter;
use crate::error::StoreError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::future::Future;

/// Which forecast leads a model slice covers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "value")]
pub enum LeadSelector {
    Exact(i64),
    AnyOf(Vec<i64>),
    /// All leads strictly below the limit.
    Below(i64),
    Any,
}

impl LeadSelector {
    pub fn admits(&self, lead: i64) -> bool {
        match self {
            LeadSelector::Exact(l) => lead == *l,
            LeadSelector::AnyOf(leads) => leads.contains(&lead),
            LeadSelector::Below(limit) => lead < *limit,
            LeadSelector::Any => true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SliceSource<'a> {
    Obs,
    Model {
        model: &'a str,
        leads: &'a LeadSelector,
    },
}

impl SliceSource<'_> {
    pub fn label(&self) -> &'static str {
        match self {
            SliceSource::Obs => "obs",
            SliceSource::Model { .. } => "model",
        }
    }
}

/// One bounded store call: a chunk of epochs for a set of stations.
#[derive(Debug, Clone)]
pub struct SliceRequest<'a> {
    pub source: SliceSource<'a>,
    pub variable: &'a str,
    pub station_ids: &'a [String],
    pub epochs: &'a [i64],
    pub filter: Option<&'a ValueFilter>,
}

/// A single stored sample. `value: None` is a row that exists but holds null.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SliceRow {
    pub epoch: i64,
    /// Lead the store actually matched; `None` for observations.
    pub lead: Option<i64>,
    pub station: String,
    pub value: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreCatalog {
    pub variables: BTreeSet<String>,
    pub models: BTreeSet<String>,
}

/// Identifier-list bounded queries. One driver call keeps many `fetch_slice` calls in flight.
pub trait VerificationStore: Send + Sync {
    /// Upper bound on the number of identifiers one call may carry.
    fn max_identifier_list(&self) -> usize;

    fn catalog(&self) -> impl Future<Output = Result<StoreCatalog, StoreError>> + Send;

    /// Distinct observation valid times in `[from_secs, to_secs]`, ascending.
    fn distinct_epochs(
        &self,
        from_secs: i64,
        to_secs: i64,
    ) -> impl Future<Output = Result<Vec<i64>, StoreError>> + Send;

    /// Distinct forecast leads (hours) for `model` in `[from_epoch, to_epoch]`, ascending.
    fn distinct_leads(
        &self,
        model: &str,
        from_epoch: i64,
        to_epoch: i64,
    ) -> impl Future<Output = Result<Vec<i64>, StoreError>> + Send;

    fn fetch_slice(
        &self,
        request: &SliceRequest<'_>,
    ) -> impl Future<Output = Result<Vec<SliceRow>, StoreError>> + Send;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lead_selector_admits() {
        assert!(LeadSelector::Exact(6).admits(6));
        assert!(!LeadSelector::Exact(6).admits(3));
        assert!(LeadSelector::AnyOf(vec![0, 3]).admits(3));
        assert!(!LeadSelector::AnyOf(vec![0, 3]).admits(6));
        assert!(LeadSelector::Below(24).admits(23));
        assert!(!LeadSelector::Below(24).admits(24));
        assert!(LeadSelector::Any.admits(240));
    }
}
