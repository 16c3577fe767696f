use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Outcome {
    Hit,
    Miss,
    FalseAlarm,
    CorrectNegative,
}

/// Classifies one pair against a single threshold shared by both series.
///
/// The event is "value below threshold", so a hit means both the observation and the model
/// fell below it.
pub fn classify(obs: f64, model: f64, threshold: f64) -> Outcome {
    match (obs < threshold, model < threshold) {
        (true, true) => Outcome::Hit,
        (false, true) => Outcome::FalseAlarm,
        (true, false) => Outcome::Miss,
        (false, false) => Outcome::CorrectNegative,
    }
}

/// A present sample: the row existed and carried a finite value.
pub fn usable(value: Option<f64>) -> Option<f64> {
    value.filter(|v| v.is_finite())
}

/// Additive statistic accumulated per pair, per sub-data row and per group.
pub trait PairStatistic: Clone + Default + PartialEq + fmt::Debug + Serialize + Send {
    fn merge(&mut self, other: &Self);

    /// Whether two totals agree; used to check that compaction conserved the counts.
    fn agrees_with(&self, other: &Self) -> bool {
        self == other
    }
}

/// Evaluates one pair. Only called with values that passed `usable`.
pub trait PairKernel: Send + Sync {
    type Stat: PairStatistic;

    fn evaluate(&self, obs: f64, model: f64) -> Self::Stat;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContingencyCounts {
    pub hit: u64,
    #[serde(rename = "fa")]
    pub false_alarm: u64,
    pub miss: u64,
    #[serde(rename = "cn")]
    pub correct_negative: u64,
}

impl ContingencyCounts {
    pub fn total(&self) -> u64 {
        self.hit + self.false_alarm + self.miss + self.correct_negative
    }
}

impl From<Outcome> for ContingencyCounts {
    fn from(outcome: Outcome) -> Self {
        let mut counts = Self::default();
        match outcome {
            Outcome::Hit => counts.hit = 1,
            Outcome::FalseAlarm => counts.false_alarm = 1,
            Outcome::Miss => counts.miss = 1,
            Outcome::CorrectNegative => counts.correct_negative = 1,
        }
        counts
    }
}

impl PairStatistic for ContingencyCounts {
    fn merge(&mut self, other: &Self) {
        self.hit += other.hit;
        self.false_alarm += other.false_alarm;
        self.miss += other.miss;
        self.correct_negative += other.correct_negative;
    }
}

impl fmt::Display for ContingencyCounts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{};{};{};{}",
            self.hit, self.false_alarm, self.miss, self.correct_negative
        )
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ContingencyClassifier {
    pub threshold: f64,
}

impl ContingencyClassifier {
    pub fn new(threshold: f64) -> Self {
        Self { threshold }
    }
}

impl PairKernel for ContingencyClassifier {
    type Stat = ContingencyCounts;

    fn evaluate(&self, obs: f64, model: f64) -> ContingencyCounts {
        classify(obs, model, self.threshold).into()
    }
}

/// Partial sums from which bias, MAE and RMSE are derived downstream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ScalarSums {
    pub square_diff_sum: f64,
    pub n_sum: u64,
    pub obs_model_diff_sum: f64,
    pub model_sum: f64,
    pub obs_sum: f64,
    pub abs_sum: f64,
}

const SUM_TOLERANCE: f64 = 1e-9;

fn close(a: f64, b: f64) -> bool {
    (a - b).abs() <= SUM_TOLERANCE * a.abs().max(b.abs()).max(1.0)
}

impl PairStatistic for ScalarSums {
    fn merge(&mut self, other: &Self) {
        self.square_diff_sum += other.square_diff_sum;
        self.n_sum += other.n_sum;
        self.obs_model_diff_sum += other.obs_model_diff_sum;
        self.model_sum += other.model_sum;
        self.obs_sum += other.obs_sum;
        self.abs_sum += other.abs_sum;
    }

    // Float sums regroup during compaction, so exact equality is too strict.
    fn agrees_with(&self, other: &Self) -> bool {
        self.n_sum == other.n_sum
            && close(self.square_diff_sum, other.square_diff_sum)
            && close(self.obs_model_diff_sum, other.obs_model_diff_sum)
            && close(self.model_sum, other.model_sum)
            && close(self.obs_sum, other.obs_sum)
            && close(self.abs_sum, other.abs_sum)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ScalarKernel;

impl PairKernel for ScalarKernel {
    type Stat = ScalarSums;

    fn evaluate(&self, obs: f64, model: f64) -> ScalarSums {
        let diff = obs - model;
        ScalarSums {
            square_diff_sum: diff * diff,
            n_sum: 1,
            obs_model_diff_sum: diff,
            model_sum: model,
            obs_sum: obs,
            abs_sum: diff.abs(),
        }
    }
}
