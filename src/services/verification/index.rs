use std::collections::{BTreeMap, HashMap, HashSet};

/// Epoch/station lookup built from fetched rows.
///
/// A missing entry means the store returned no row (absent); `Some(None)` is a row that exists
/// but carries null. Neither is classified, but they are kept distinct.
#[derive(Debug, Default, Clone)]
pub struct SliceMap {
    by_epoch: HashMap<i64, HashMap<String, Option<f64>>>,
    rows: usize,
}

impl SliceMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Later rows for the same epoch and station replace earlier ones.
    pub fn insert(&mut self, epoch: i64, station: String, value: Option<f64>) {
        if self
            .by_epoch
            .entry(epoch)
            .or_default()
            .insert(station, value)
            .is_none()
        {
            self.rows += 1;
        }
    }

    pub fn get(&self, epoch: i64, station: &str) -> Option<Option<f64>> {
        self.by_epoch.get(&epoch)?.get(station).copied()
    }

    pub fn contains_epoch(&self, epoch: i64) -> bool {
        self.by_epoch.contains_key(&epoch)
    }

    pub fn len(&self) -> usize {
        self.rows
    }

    pub fn is_empty(&self) -> bool {
        self.rows == 0
    }
}

/// Model slices keyed by the lead each row reported.
#[derive(Debug, Default, Clone)]
pub struct LeadSliceMap {
    by_lead: BTreeMap<i64, SliceMap>,
}

impl LeadSliceMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, lead: i64, epoch: i64, station: String, value: Option<f64>) {
        self.by_lead
            .entry(lead)
            .or_default()
            .insert(epoch, station, value);
    }

    pub fn lead(&self, lead: i64) -> Option<&SliceMap> {
        self.by_lead.get(&lead)
    }

    /// Leads present in the index, ascending.
    pub fn leads(&self) -> impl Iterator<Item = i64> + '_ {
        self.by_lead.keys().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (i64, &SliceMap)> + '_ {
        self.by_lead.iter().map(|(lead, slice)| (*lead, slice))
    }

    pub fn len(&self) -> usize {
        self.by_lead.values().map(SliceMap::len).sum()
    }

    /// Removes every `(lead, epoch, station)` already in `seen` and records the rest there.
    /// Returns the number of rows removed.
    pub fn drop_seen(&mut self, seen: &mut HashSet<(i64, i64, String)>) -> usize {
        let mut dropped = 0;
        for (&lead, slice) in self.by_lead.iter_mut() {
            for (&epoch, stations) in slice.by_epoch.iter_mut() {
                stations.retain(|station, _| {
                    let fresh = seen.insert((lead, epoch, station.clone()));
                    if !fresh {
                        dropped += 1;
                    }
                    fresh
                });
            }
            slice.by_epoch.retain(|_, stations| !stations.is_empty());
            slice.rows = slice.by_epoch.values().map(HashMap::len).sum();
        }
        self.by_lead.retain(|_, slice| !slice.is_empty());
        dropped
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_and_null_are_distinct() {
        let mut slice = SliceMap::new();
        slice.insert(100, "A".to_string(), Some(3.0));
        slice.insert(100, "B".to_string(), None);
        assert_eq!(slice.get(100, "A"), Some(Some(3.0)));
        assert_eq!(slice.get(100, "B"), Some(None));
        assert_eq!(slice.get(100, "C"), None);
        assert_eq!(slice.get(200, "A"), None);
        assert_eq!(slice.len(), 2);
    }

    #[test]
    fn duplicate_rows_do_not_inflate_counts() {
        let mut slice = SliceMap::new();
        slice.insert(100, "A".to_string(), Some(3.0));
        slice.insert(100, "A".to_string(), Some(4.0));
        assert_eq!(slice.len(), 1);
        assert_eq!(slice.get(100, "A"), Some(Some(4.0)));
    }

    #[test]
    fn lead_index_keeps_reported_leads_apart() {
        let mut index = LeadSliceMap::new();
        index.insert(6, 100, "A".to_string(), Some(1.0));
        index.insert(3, 100, "A".to_string(), Some(2.0));
        assert_eq!(index.leads().collect::<Vec<_>>(), vec![3, 6]);
        assert_eq!(index.lead(3).and_then(|s| s.get(100, "A")), Some(Some(2.0)));
        assert!(index.lead(9).is_none());
        assert_eq!(index.len(), 2);
    }

    #[test]
    fn rows_seen_in_an_earlier_chunk_are_dropped() {
        let mut seen = HashSet::new();
        let mut first = LeadSliceMap::new();
        first.insert(3, 100, "A".to_string(), Some(1.0));
        first.insert(9, 100, "A".to_string(), Some(2.0));
        assert_eq!(first.drop_seen(&mut seen), 0);

        let mut second = LeadSliceMap::new();
        second.insert(9, 100, "A".to_string(), Some(2.0));
        second.insert(9, 100, "B".to_string(), Some(4.0));
        second.insert(12, 100, "A".to_string(), None);
        assert_eq!(second.drop_seen(&mut seen), 1);
        assert_eq!(second.leads().collect::<Vec<_>>(), vec![9, 12]);
        assert_eq!(second.lead(9).and_then(|s| s.get(100, "A")), None);
        assert_eq!(second.lead(9).and_then(|s| s.get(100, "B")), Some(Some(4.0)));
        assert_eq!(second.len(), 2);

        let mut third = LeadSliceMap::new();
        third.insert(3, 100, "A".to_string(), Some(1.0));
        assert_eq!(third.drop_seen(&mut seen), 1);
        assert!(third.is_empty());
        assert_eq!(third.leads().count(), 0);
    }
}
