use super::classify::PairStatistic;
use super::types::{SubDataRow, Tally};
use crate::error::{VerificationError, VerificationResult};
use std::collections::HashSet;

/// Sums runs of same-epoch rows into one row each. An epoch that reappears after another
/// epoch is an invariant violation.
pub fn compact<S: PairStatistic>(rows: Vec<SubDataRow<S>>) -> VerificationResult<Vec<SubDataRow<S>>> {
    let mut out: Vec<SubDataRow<S>> = Vec::new();
    let mut finished: HashSet<i64> = HashSet::new();
    for row in rows {
        if let Some(current) = out.last_mut() {
            if current.epoch == row.epoch {
                current.stats.merge(&row.stats);
                continue;
            }
            finished.insert(current.epoch);
        }
        if finished.contains(&row.epoch) {
            return Err(VerificationError::invariant(format!(
                "sub_data rows for epoch {} are not contiguous",
                row.epoch
            )));
        }
        out.push(row);
    }
    Ok(out)
}

/// Compacts a tally's sub-data and checks the summary rows still add up to the tally.
pub fn compact_tally<S: PairStatistic>(mut tally: Tally<S>) -> VerificationResult<Tally<S>> {
    let rows = std::mem::take(&mut tally.sub_data);
    let compacted = compact(rows)?;
    let mut total = S::default();
    for row in &compacted {
        total.merge(&row.stats);
    }
    if !total.agrees_with(&tally.stats) {
        return Err(VerificationError::invariant(format!(
            "compacted sub_data for group {} does not match its totals",
            tally.group_key
        )));
    }
    tally.sub_data = compacted;
    Ok(tally)
}

/// Compacts every tally and checks group keys are unique and ascending.
pub fn finalize<S: PairStatistic>(tallies: Vec<Tally<S>>) -> VerificationResult<Vec<Tally<S>>> {
    let mut out = Vec::with_capacity(tallies.len());
    for tally in tallies {
        if let Some(previous) = out.last().map(|t: &Tally<S>| &t.group_key) {
            if *previous >= tally.group_key {
                return Err(VerificationError::invariant(format!(
                    "group keys out of order: {previous} then {}",
                    tally.group_key
                )));
            }
        }
        out.push(compact_tally(tally)?);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::verification::classify::{ContingencyCounts, Outcome};
    use crate::services::verification::types::GroupKey;
    use proptest::prelude::*;

    fn row(epoch: i64, outcome: Outcome) -> SubDataRow<ContingencyCounts> {
        SubDataRow {
            epoch,
            stats: outcome.into(),
        }
    }

    #[test]
    fn sums_runs_per_epoch() {
        let out = compact(vec![
            row(10, Outcome::Hit),
            row(10, Outcome::Miss),
            row(20, Outcome::FalseAlarm),
            row(30, Outcome::Hit),
            row(30, Outcome::Hit),
        ])
        .expect("contiguous");
        assert_eq!(out.len(), 3);
        assert_eq!(out[0].to_string(), "10;1;0;1;0");
        assert_eq!(out[1].to_string(), "20;0;1;0;0");
        assert_eq!(out[2].to_string(), "30;2;0;0;0");
    }

    #[test]
    fn empty_input_compacts_to_nothing() {
        let out = compact::<ContingencyCounts>(Vec::new()).expect("empty");
        assert!(out.is_empty());
    }

    #[test]
    fn interleaved_keys_are_an_invariant_violation() {
        let err = compact(vec![
            row(10, Outcome::Hit),
            row(20, Outcome::Hit),
            row(10, Outcome::Hit),
        ])
        .expect_err("non-contiguous");
        assert!(matches!(err, VerificationError::Invariant(_)));
    }

    #[test]
    fn tally_totals_are_checked() {
        let mut tally: Tally<ContingencyCounts> = Tally::empty(GroupKey::Epoch(10), 10, 10);
        tally.record(10, Outcome::Hit.into());
        tally.stats.hit += 1;
        assert!(matches!(
            compact_tally(tally),
            Err(VerificationError::Invariant(_))
        ));
    }

    #[test]
    fn finalize_rejects_duplicate_group_keys() {
        let a: Tally<ContingencyCounts> = Tally::empty(GroupKey::Lead(3), 0, 0);
        let b = a.clone();
        assert!(finalize(vec![a, b]).is_err());
    }

    fn sorted_rows() -> impl Strategy<Value = Vec<SubDataRow<ContingencyCounts>>> {
        prop::collection::vec((0i64..20, 0usize..4), 0..120).prop_map(|mut raw| {
            raw.sort_by_key(|(epoch, _)| *epoch);
            raw.into_iter()
                .map(|(epoch, cell)| {
                    let outcome = [
                        Outcome::Hit,
                        Outcome::Miss,
                        Outcome::FalseAlarm,
                        Outcome::CorrectNegative,
                    ][cell];
                    row(epoch, outcome)
                })
                .collect()
        })
    }

    proptest! {
        #[test]
        fn one_row_per_distinct_epoch(rows in sorted_rows()) {
            let distinct: HashSet<i64> = rows.iter().map(|r| r.epoch).collect();
            let out = compact(rows.clone()).expect("sorted input");
            prop_assert_eq!(out.len(), distinct.len());
            for summary in &out {
                let mut expected = ContingencyCounts::default();
                for r in rows.iter().filter(|r| r.epoch == summary.epoch) {
                    expected.merge(&r.stats);
                }
                prop_assert_eq!(summary.stats, expected);
            }
        }

        #[test]
        fn compaction_is_idempotent_on_contiguous_input(rows in sorted_rows()) {
            let once = compact(rows).expect("sorted input");
            let twice = compact(once.clone()).expect("already compacted");
            prop_assert_eq!(once, twice);
        }
    }
}
