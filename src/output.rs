use crate::error::VerificationError;
use crate::services::verification::classify::{ContingencyCounts, ScalarSums};
use crate::services::verification::types::{QueryResult, QueryTallies, Tally};
use anyhow::Result;
use std::io::Write;

pub fn render_json(result: &QueryResult, pretty: bool) -> Result<String> {
    Ok(if pretty {
        serde_json::to_string_pretty(result)?
    } else {
        serde_json::to_string(result)?
    })
}

/// Single-line JSON body for a failed query.
pub fn render_error(err: &VerificationError) -> Result<String> {
    Ok(serde_json::to_string(&err.to_public())?)
}

/// Flat column view of a statistic for tabular output.
pub trait StatColumns {
    fn headers() -> &'static [&'static str];
    fn values(&self) -> Vec<String>;
}

impl StatColumns for ContingencyCounts {
    fn headers() -> &'static [&'static str] {
        &["hit", "fa", "miss", "cn"]
    }

    fn values(&self) -> Vec<String> {
        vec![
            self.hit.to_string(),
            self.false_alarm.to_string(),
            self.miss.to_string(),
            self.correct_negative.to_string(),
        ]
    }
}

impl StatColumns for ScalarSums {
    fn headers() -> &'static [&'static str] {
        &[
            "square_diff_sum",
            "n_sum",
            "obs_model_diff_sum",
            "model_sum",
            "obs_sum",
            "abs_sum",
        ]
    }

    fn values(&self) -> Vec<String> {
        vec![
            self.square_diff_sum.to_string(),
            self.n_sum.to_string(),
            self.obs_model_diff_sum.to_string(),
            self.model_sum.to_string(),
            self.obs_sum.to_string(),
            self.abs_sum.to_string(),
        ]
    }
}

/// One line per tally; sub-data is summarised as a row count.
pub fn write_csv<W: Write>(result: &QueryResult, writer: W) -> Result<()> {
    let mut csv = csv::Writer::from_writer(writer);
    match &result.tallies {
        QueryTallies::Ctc(tallies) => write_tallies(&mut csv, tallies)?,
        QueryTallies::Sums(tallies) => write_tallies(&mut csv, tallies)?,
    }
    csv.flush()?;
    Ok(())
}

fn write_tallies<W: Write, S: StatColumns>(
    csv: &mut csv::Writer<W>,
    tallies: &[Tally<S>],
) -> Result<()> {
    let mut header = vec!["group_key"];
    header.extend_from_slice(S::headers());
    header.extend_from_slice(&["n0", "n_times", "min_secs", "max_secs", "sub_data_rows"]);
    csv.write_record(&header)?;
    for tally in tallies {
        let mut record = vec![tally.group_key.to_string()];
        record.extend(tally.stats.values());
        record.extend([
            tally.n0.to_string(),
            tally.n_times.to_string(),
            tally.min_secs.to_string(),
            tally.max_secs.to_string(),
            tally.sub_data.len().to_string(),
        ]);
        csv.write_record(&record)?;
    }
    Ok(())
}
