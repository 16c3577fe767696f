use super::classify::{usable, PairKernel};
use super::index::{LeadSliceMap, SliceMap};
use super::types::{GroupKey, Tally};
use crate::time::{cycle_hour, hour_of_day, init_epoch};
use std::collections::BTreeSet;

/// Epoch/lead predicates. Every configured filter must pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SliceFilters {
    pub valid_hours: Option<BTreeSet<i64>>,
    pub cycle_hours: Option<BTreeSet<i64>>,
    pub single_cycle: Option<i64>,
    pub max_lead_exclusive: Option<i64>,
}

impl SliceFilters {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn with_valid_hours(mut self, hours: &[i64]) -> Self {
        if !hours.is_empty() {
            self.valid_hours = Some(hours.iter().copied().collect());
        }
        self
    }

    pub fn with_cycle_hours(mut self, hours: &[i64]) -> Self {
        if !hours.is_empty() {
            self.cycle_hours = Some(hours.iter().copied().collect());
        }
        self
    }

    pub fn with_single_cycle(mut self, init_secs: Option<i64>) -> Self {
        self.single_cycle = init_secs;
        self
    }

    pub fn with_max_lead(mut self, exclusive: i64) -> Self {
        self.max_lead_exclusive = Some(exclusive);
        self
    }

    pub fn admits(&self, epoch: i64, lead: i64) -> bool {
        if let Some(hours) = &self.valid_hours {
            if !hours.contains(&hour_of_day(epoch)) {
                return false;
            }
        }
        if let Some(hours) = &self.cycle_hours {
            if !hours.contains(&cycle_hour(epoch, lead)) {
                return false;
            }
        }
        if let Some(init) = self.single_cycle {
            if init_epoch(epoch, lead) != init {
                return false;
            }
        }
        if let Some(limit) = self.max_lead_exclusive {
            if lead >= limit {
                return false;
            }
        }
        true
    }
}

/// Which model leads a group joins against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeadScope {
    Fixed(i64),
    /// Every lead present in the model index.
    All,
}

#[derive(Debug, Clone)]
pub struct GroupSpec<'a> {
    pub key: GroupKey,
    /// Candidate epochs, ascending. Also defines the reported min/max span.
    pub epochs: Vec<i64>,
    pub leads: LeadScope,
    pub stations: &'a [String],
}

/// Join and classify shared by every driver.
///
/// Walks a group's epochs ascending, then admitted leads ascending, then stations in caller
/// order, so sub-data rows for one epoch are always contiguous within a group.
pub struct Aggregator<'a, K> {
    kernel: &'a K,
    obs: &'a SliceMap,
    model: &'a LeadSliceMap,
    filters: &'a SliceFilters,
}

impl<'a, K: PairKernel> Aggregator<'a, K> {
    pub fn new(
        kernel: &'a K,
        obs: &'a SliceMap,
        model: &'a LeadSliceMap,
        filters: &'a SliceFilters,
    ) -> Self {
        Self {
            kernel,
            obs,
            model,
            filters,
        }
    }

    pub fn aggregate(&self, group: &GroupSpec<'_>) -> Tally<K::Stat> {
        let min_secs = group.epochs.first().copied().unwrap_or_default();
        let max_secs = group.epochs.last().copied().unwrap_or_default();
        let mut tally = Tally::empty(group.key.clone(), min_secs, max_secs);

        for &epoch in &group.epochs {
            let mut paired = false;
            match group.leads {
                LeadScope::Fixed(lead) => {
                    if let Some(model) = self.model.lead(lead) {
                        paired |= self.join(&mut tally, epoch, lead, model, group.stations);
                    }
                }
                LeadScope::All => {
                    for (lead, model) in self.model.iter() {
                        paired |= self.join(&mut tally, epoch, lead, model, group.stations);
                    }
                }
            }
            if paired {
                tally.n_times += 1;
            }
        }
        tally
    }

    pub fn aggregate_all(&self, groups: &[GroupSpec<'_>]) -> Vec<Tally<K::Stat>> {
        groups.iter().map(|group| self.aggregate(group)).collect()
    }

    fn join(
        &self,
        tally: &mut Tally<K::Stat>,
        epoch: i64,
        lead: i64,
        model: &SliceMap,
        stations: &[String],
    ) -> bool {
        if !self.filters.admits(epoch, lead) || !model.contains_epoch(epoch) {
            return false;
        }
        let mut paired = false;
        for station in stations {
            let Some(obs) = self.obs.get(epoch, station).and_then(usable) else {
                continue;
            };
            let Some(forecast) = model.get(epoch, station).and_then(usable) else {
                continue;
            };
            tally.record(epoch, self.kernel.evaluate(obs, forecast));
            paired = true;
        }
        paired
    }
}
