use crate::services::verification::memory_store::{MemoryDataset, MemoryStore};
use crate::services::verification::types::{PlotType, StatType, VerificationQuery};
use crate::time::SECS_PER_DAY;

pub const VARIABLE: &str = "ceiling";
pub const MODEL: &str = "HRRR";
pub const SCENARIO_EPOCH: i64 = 1000;
pub const SCENARIO_LEAD: i64 = 6;

/// Midnight UTC, 2023-11-15.
pub const DAY0: i64 = 19_676 * SECS_PER_DAY;

pub fn station_ids(count: usize) -> Vec<String> {
    (0..count).map(|i| format!("K{i:03}")).collect()
}

/// obs A=5, B=15 and model A=12, B=8 at one epoch: one miss and one false alarm at threshold 10.
pub fn scenario_dataset(model: &str) -> MemoryDataset {
    let store = MemoryStore::default()
        .with_obs(SCENARIO_EPOCH, "A", VARIABLE, Some(5.0))
        .with_obs(SCENARIO_EPOCH, "B", VARIABLE, Some(15.0))
        .with_model(model, SCENARIO_EPOCH, SCENARIO_LEAD, "A", VARIABLE, Some(12.0))
        .with_model(model, SCENARIO_EPOCH, SCENARIO_LEAD, "B", VARIABLE, Some(8.0));
    store.into_dataset()
}

pub fn scenario_query(model: &str) -> VerificationQuery {
    VerificationQuery {
        plot_type: PlotType::TimeSeries,
        stat_type: StatType::Ctc,
        variable: VARIABLE.to_string(),
        station_ids: vec!["A".to_string(), "B".to_string()],
        model: model.to_string(),
        threshold: Some(10.0),
        from_secs: 0,
        to_secs: 2 * SCENARIO_EPOCH,
        forecast_lead: Some(SCENARIO_LEAD),
        average: None,
        valid_times_of_day: Vec::new(),
        utc_cycle_start: Vec::new(),
        single_cycle: None,
        obs_filter: None,
        model_filter: None,
    }
}

pub fn query(plot_type: PlotType, stations: Vec<String>, from_secs: i64, to_secs: i64) -> VerificationQuery {
    VerificationQuery {
        plot_type,
        station_ids: stations,
        from_secs,
        to_secs,
        ..scenario_query(MODEL)
    }
}
