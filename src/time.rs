use chrono::{DateTime, TimeZone, Utc};

pub const SECS_PER_HOUR: i64 = 3600;
pub const SECS_PER_DAY: i64 = 24 * SECS_PER_HOUR;

/// UTC hour of day (0..=23) for a valid-time epoch.
pub fn hour_of_day(epoch: i64) -> i64 {
    epoch.rem_euclid(SECS_PER_DAY) / SECS_PER_HOUR
}

/// Initialization time of the model run that produced `epoch` at forecast `lead` hours.
pub fn init_epoch(epoch: i64, lead_hours: i64) -> i64 {
    epoch - lead_hours * SECS_PER_HOUR
}

/// UTC hour at which the model run that produced `epoch` at `lead` was started.
pub fn cycle_hour(epoch: i64, lead_hours: i64) -> i64 {
    hour_of_day(init_epoch(epoch, lead_hours))
}

/// Rounds `epoch` to the nearest multiple of `bin_secs` (ties round up).
pub fn bin_epoch(epoch: i64, bin_secs: i64) -> i64 {
    if bin_secs <= 1 {
        return epoch;
    }
    bin_secs * (epoch + bin_secs / 2).div_euclid(bin_secs)
}

/// RFC 3339 rendering used in log fields; falls back to the raw number.
pub fn epoch_label(epoch: i64) -> String {
    match Utc.timestamp_opt(epoch, 0).single() {
        Some(ts) => ts.to_rfc3339(),
        None => epoch.to_string(),
    }
}

pub fn parse_epoch_arg(raw: &str) -> Result<i64, String> {
    let trimmed = raw.trim();
    if let Ok(secs) = trimmed.parse::<i64>() {
        return Ok(secs);
    }
    DateTime::parse_from_rfc3339(trimmed)
        .map(|ts| ts.with_timezone(&Utc).timestamp())
        .map_err(|_| format!("expected unix seconds or RFC 3339 timestamp, got {trimmed:?}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hour_of_day_handles_day_boundaries() {
        assert_eq!(hour_of_day(0), 0);
        assert_eq!(hour_of_day(13 * SECS_PER_HOUR + 59), 13);
        assert_eq!(hour_of_day(SECS_PER_DAY + 23 * SECS_PER_HOUR), 23);
        assert_eq!(hour_of_day(-SECS_PER_HOUR), 23);
    }

    #[test]
    fn cycle_hour_walks_back_by_lead() {
        let epoch = 1_700_006_400; // 2023-11-15T00:00:00Z
        assert_eq!(hour_of_day(epoch), 0);
        assert_eq!(cycle_hour(epoch, 6), 18);
        assert_eq!(cycle_hour(epoch, 24), 0);
        assert_eq!(init_epoch(epoch, 3), epoch - 3 * SECS_PER_HOUR);
    }

    #[test]
    fn bin_epoch_rounds_to_nearest_multiple() {
        assert_eq!(bin_epoch(3599, 3600), 3600);
        assert_eq!(bin_epoch(1799, 3600), 0);
        assert_eq!(bin_epoch(1800, 3600), 3600);
        assert_eq!(bin_epoch(7200, 3600), 7200);
        assert_eq!(bin_epoch(1234, 0), 1234);
    }

    #[test]
    fn parse_epoch_arg_accepts_numbers_and_rfc3339() {
        assert_eq!(parse_epoch_arg("1700006400"), Ok(1_700_006_400));
        assert_eq!(parse_epoch_arg("2023-11-15T00:00:00Z"), Ok(1_700_006_400));
        assert!(parse_epoch_arg("yesterday").is_err());
    }

    #[test]
    fn epoch_label_renders_rfc3339_or_raw() {
        assert_eq!(epoch_label(1_700_006_400), "2023-11-15T00:00:00+00:00");
        assert_eq!(epoch_label(i64::MAX), i64::MAX.to_string());
    }
}
