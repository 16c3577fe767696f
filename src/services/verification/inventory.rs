use super::store::VerificationStore;
use crate::error::{VerificationError, VerificationResult};
use crate::time::epoch_label;

/// Distinct valid times and forecast leads available for a query window.
pub struct EpochInventory<'a, S> {
    store: &'a S,
}

impl<'a, S: VerificationStore> EpochInventory<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self { store }
    }

    /// Sorted distinct observation epochs in `[from_secs, to_secs]`. Empty when nothing exists.
    #[tracing::instrument(skip(self), level = "debug")]
    pub async fn list_epochs(&self, from_secs: i64, to_secs: i64) -> VerificationResult<Vec<i64>> {
        let mut epochs = self
            .store
            .distinct_epochs(from_secs, to_secs)
            .await
            .map_err(|err| VerificationError::data_source("list_epochs", None, err))?;
        epochs.sort_unstable();
        epochs.dedup();
        if let (Some(first), Some(last)) = (epochs.first(), epochs.last()) {
            tracing::debug!(
                count = epochs.len(),
                first = %epoch_label(*first),
                last = %epoch_label(*last),
                "epoch inventory loaded"
            );
        }
        Ok(epochs)
    }

    /// Sorted distinct lead hours stored for `model` between the two epochs.
    #[tracing::instrument(skip(self), level = "debug")]
    pub async fn list_forecast_leads(
        &self,
        model: &str,
        from_epoch: i64,
        to_epoch: i64,
    ) -> VerificationResult<Vec<i64>> {
        let mut leads = self
            .store
            .distinct_leads(model, from_epoch, to_epoch)
            .await
            .map_err(|err| VerificationError::data_source("list_forecast_leads", None, err))?;
        leads.sort_unstable();
        leads.dedup();
        Ok(leads)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::verification::memory_store::MemoryStore;

    #[tokio::test]
    async fn empty_window_is_not_an_error() {
        let store = MemoryStore::default().with_obs(100, "A", "ceiling", Some(1.0));
        let inventory = EpochInventory::new(&store);
        assert!(inventory.list_epochs(200, 300).await.expect("ok").is_empty());
    }

    #[tokio::test]
    async fn leads_are_sorted_and_distinct() {
        let store = MemoryStore::default()
            .with_model("HRRR", 100, 12, "A", "ceiling", Some(1.0))
            .with_model("HRRR", 100, 0, "A", "ceiling", Some(1.0))
            .with_model("HRRR", 200, 12, "A", "ceiling", Some(1.0));
        let inventory = EpochInventory::new(&store);
        assert_eq!(
            inventory
                .list_forecast_leads("HRRR", 100, 200)
                .await
                .expect("leads"),
            vec![0, 12]
        );
    }
}
