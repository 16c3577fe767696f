use super::classify::{ContingencyCounts, PairStatistic, ScalarSums};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlotType {
    TimeSeries,
    Dieoff,
    ValidTime,
    DailyModelCycle,
    Map,
}

impl PlotType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlotType::TimeSeries => "time_series",
            PlotType::Dieoff => "dieoff",
            PlotType::ValidTime => "valid_time",
            PlotType::DailyModelCycle => "daily_model_cycle",
            PlotType::Map => "map",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatType {
    #[default]
    Ctc,
    Sums,
}

impl StatType {
    pub fn as_str(&self) -> &'static str {
        match self {
            StatType::Ctc => "ctc",
            StatType::Sums => "sums",
        }
    }
}

/// Nulls a sample when another variable at the same station and epoch is outside `[min, max]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValueFilter {
    pub variable: String,
    pub min: f64,
    pub max: f64,
}

impl ValueFilter {
    pub fn admits(&self, value: Option<f64>) -> bool {
        matches!(value, Some(v) if v >= self.min && v <= self.max)
    }
}

/// One driver invocation, as handed over by the presentation layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationQuery {
    pub plot_type: PlotType,
    #[serde(default)]
    pub stat_type: StatType,
    pub variable: String,
    pub station_ids: Vec<String>,
    pub model: String,
    #[serde(default)]
    pub threshold: Option<f64>,
    pub from_secs: i64,
    pub to_secs: i64,
    #[serde(default)]
    pub forecast_lead: Option<i64>,
    /// Time-series bin width in seconds.
    #[serde(default)]
    pub average: Option<i64>,
    #[serde(default)]
    pub valid_times_of_day: Vec<i64>,
    #[serde(default)]
    pub utc_cycle_start: Vec<i64>,
    #[serde(default)]
    pub single_cycle: Option<i64>,
    #[serde(default)]
    pub obs_filter: Option<ValueFilter>,
    #[serde(default)]
    pub model_filter: Option<ValueFilter>,
}

/// The dimension a driver aggregates over. One variant per driver call.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(untagged)]
pub enum GroupKey {
    Epoch(i64),
    Lead(i64),
    HourOfDay(i64),
    CalendarCycle(i64),
    Station(String),
}

impl fmt::Display for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GroupKey::Epoch(v)
            | GroupKey::Lead(v)
            | GroupKey::HourOfDay(v)
            | GroupKey::CalendarCycle(v) => write!(f, "{v}"),
            GroupKey::Station(s) => f.write_str(s),
        }
    }
}

/// Per-epoch contribution recorded while a group is aggregated.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubDataRow<S> {
    pub epoch: i64,
    #[serde(flatten)]
    pub stats: S,
}

impl<S: fmt::Display> fmt::Display for SubDataRow<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{};{}", self.epoch, self.stats)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Tally<S> {
    pub group_key: GroupKey,
    #[serde(flatten)]
    pub stats: S,
    pub n0: u64,
    pub n_times: u64,
    pub min_secs: i64,
    pub max_secs: i64,
    pub sub_data: Vec<SubDataRow<S>>,
}

impl<S: PairStatistic> Tally<S> {
    pub fn empty(group_key: GroupKey, min_secs: i64, max_secs: i64) -> Self {
        Self {
            group_key,
            stats: S::default(),
            n0: 0,
            n_times: 0,
            min_secs,
            max_secs,
            sub_data: Vec::new(),
        }
    }

    pub fn record(&mut self, epoch: i64, stat: S) {
        self.stats.merge(&stat);
        self.n0 += 1;
        self.sub_data.push(SubDataRow { epoch, stats: stat });
    }

    /// Folds a second partial tally for the same key into this one.
    ///
    /// Sub-data is re-sorted by epoch afterwards (stable) so same-epoch rows stay contiguous.
    /// `n_times` is recounted from the merged rows since both parts may share epochs.
    pub fn absorb(&mut self, other: Tally<S>) {
        self.stats.merge(&other.stats);
        self.n0 += other.n0;
        self.min_secs = self.min_secs.min(other.min_secs);
        self.max_secs = self.max_secs.max(other.max_secs);
        self.sub_data.extend(other.sub_data);
        self.sub_data.sort_by_key(|row| row.epoch);
        self.n_times = distinct_epochs(&self.sub_data);
    }
}

fn distinct_epochs<S>(rows: &[SubDataRow<S>]) -> u64 {
    let mut count = 0;
    let mut last = None;
    for row in rows {
        if last != Some(row.epoch) {
            count += 1;
            last = Some(row.epoch);
        }
    }
    count
}

/// Result of one driver call, ordered ascending by group key.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "stat_type", content = "tallies", rename_all = "snake_case")]
pub enum QueryTallies {
    Ctc(Vec<Tally<ContingencyCounts>>),
    Sums(Vec<Tally<ScalarSums>>),
}

impl QueryTallies {
    pub fn len(&self) -> usize {
        match self {
            QueryTallies::Ctc(t) => t.len(),
            QueryTallies::Sums(t) => t.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryResult {
    pub plot_type: PlotType,
    #[serde(flatten)]
    pub tallies: QueryTallies,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_defaults_optional_fields() {
        let query: VerificationQuery = serde_json::from_value(serde_json::json!({
            "plot_type": "dieoff",
            "variable": "ceiling",
            "station_ids": ["KDEN"],
            "model": "HRRR",
            "threshold": 1000.0,
            "from_secs": 0,
            "to_secs": 86400
        }))
        .expect("query parses");
        assert_eq!(query.stat_type, StatType::Ctc);
        assert!(query.valid_times_of_day.is_empty());
        assert!(query.forecast_lead.is_none());
    }

    #[test]
    fn tally_serializes_flat_with_sub_data() {
        let mut tally: Tally<ContingencyCounts> = Tally::empty(GroupKey::Lead(6), 100, 200);
        tally.record(
            100,
            ContingencyCounts {
                miss: 1,
                ..Default::default()
            },
        );
        let value = serde_json::to_value(&tally).expect("serializes");
        assert_eq!(value["group_key"], 6);
        assert_eq!(value["miss"], 1);
        assert_eq!(value["n0"], 1);
        assert_eq!(value["sub_data"][0]["epoch"], 100);
        assert_eq!(value["sub_data"][0]["miss"], 1);
        assert_eq!(tally.sub_data[0].to_string(), "100;0;0;1;0");
    }

    #[test]
    fn absorb_keeps_epochs_contiguous() {
        let one = ContingencyCounts {
            hit: 1,
            ..Default::default()
        };
        let mut a: Tally<ContingencyCounts> = Tally::empty(GroupKey::Lead(3), 10, 20);
        a.record(10, one);
        a.record(20, one);
        let mut b: Tally<ContingencyCounts> = Tally::empty(GroupKey::Lead(3), 5, 15);
        b.record(10, one);
        a.absorb(b);
        let epochs: Vec<i64> = a.sub_data.iter().map(|r| r.epoch).collect();
        assert_eq!(epochs, vec![10, 10, 20]);
        assert_eq!(a.n0, 3);
        assert_eq!(a.n_times, 2);
        assert_eq!((a.min_secs, a.max_secs), (5, 20));
    }

    #[test]
    fn value_filter_rejects_missing_filter_variable() {
        let filter = ValueFilter {
            variable: "visibility".to_string(),
            min: 0.0,
            max: 5.0,
        };
        assert!(filter.admits(Some(5.0)));
        assert!(!filter.admits(Some(5.1)));
        assert!(!filter.admits(None));
    }
}
