use crate::services::verification::types::VerificationQuery;
use crate::time::parse_epoch_arg;
use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Json,
    Csv,
}

#[derive(Parser, Debug, Clone)]
#[command(
    name = "mats-middle",
    version,
    about = "Forecast/observation verification statistics"
)]
pub struct Args {
    /// JSON file holding one verification query.
    #[arg(long)]
    pub query: Option<PathBuf>,
    /// Serve data from a JSON fixture instead of Postgres.
    #[arg(long, conflicts_with_all = ["init_schema", "seed"])]
    pub fixture: Option<PathBuf>,
    /// Overrides the query's from_secs (unix seconds or RFC 3339).
    #[arg(long, value_parser = parse_epoch_arg)]
    pub from: Option<i64>,
    /// Overrides the query's to_secs (unix seconds or RFC 3339).
    #[arg(long, value_parser = parse_epoch_arg)]
    pub to: Option<i64>,
    #[arg(long)]
    pub timeout_ms: Option<u64>,
    #[arg(long, value_enum, default_value_t = OutputFormat::Json)]
    pub format: OutputFormat,
    #[arg(long, default_value_t = false)]
    pub pretty: bool,
    /// Create the obs/model_output tables if missing.
    #[arg(long, default_value_t = false)]
    pub init_schema: bool,
    /// Load a JSON fixture into Postgres before running.
    #[arg(long)]
    pub seed: Option<PathBuf>,
}

impl Args {
    pub fn load_query(&self) -> Result<Option<VerificationQuery>> {
        let Some(path) = &self.query else {
            return Ok(None);
        };
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read query file {}", path.display()))?;
        let mut query: VerificationQuery = serde_json::from_str(&contents)
            .with_context(|| format!("failed to parse query file {}", path.display()))?;
        if let Some(from) = self.from {
            query.from_secs = from;
        }
        if let Some(to) = self.to {
            query.to_secs = to;
        }
        Ok(Some(query))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn window_flags_override_query_file() {
        let mut file = tempfile::NamedTempFile::new().expect("tempfile");
        write!(
            file,
            r#"{{"plot_type":"map","variable":"ceiling","station_ids":["A"],"model":"HRRR",
                "threshold":500,"from_secs":0,"to_secs":10,"forecast_lead":6}}"#
        )
        .expect("write");
        let args = Args::parse_from([
            "mats-middle",
            "--query",
            file.path().to_str().expect("utf8 path"),
            "--from",
            "2023-11-15T00:00:00Z",
            "--format",
            "csv",
        ]);
        let query = args.load_query().expect("load").expect("query present");
        assert_eq!(query.from_secs, 1_700_006_400);
        assert_eq!(query.to_secs, 10);
        assert_eq!(args.format, OutputFormat::Csv);
    }

    #[test]
    fn fixture_mode_rejects_postgres_only_flags() {
        for flag in ["--init-schema", "--seed=seed.json"] {
            let err = Args::try_parse_from(["mats-middle", "--fixture", "data.json", flag])
                .expect_err("conflicting flags");
            assert_eq!(err.kind(), clap::error::ErrorKind::ArgumentConflict);
        }
        assert!(Args::try_parse_from(["mats-middle", "--seed", "seed.json", "--init-schema"]).is_ok());
    }

    #[test]
    fn no_query_flag_means_no_query() {
        let args = Args::parse_from(["mats-middle", "--init-schema"]);
        assert!(args.load_query().expect("ok").is_none());
        assert!(args.init_schema);
    }
}
