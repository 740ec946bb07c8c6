//! In-memory store implementation

use crate::error::{StoreError, StoreResult};
use crate::resolver;
use crate::traits::{ContractNegotiationStore, StateEntityStore};
use accord_types::{
    Clock, ContractAgreement, ContractNegotiation, Criterion, Lease, QuerySpec, StatefulEntity,
};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// In-memory store for development and testing.
///
/// Every handle acts as one lease holder. [`with_holder`](Self::with_holder)
/// creates another holder over the same entities, which is how tests model
/// several workers sharing a database.
pub struct InMemoryStateEntityStore<E> {
    lease_holder: String,
    lease_duration: Duration,
    clock: Arc<dyn Clock>,
    entities: Arc<RwLock<HashMap<String, E>>>,
}

impl<E> Clone for InMemoryStateEntityStore<E> {
    fn clone(&self) -> Self {
        Self {
            lease_holder: self.lease_holder.clone(),
            lease_duration: self.lease_duration,
            clock: Arc::clone(&self.clock),
            entities: Arc::clone(&self.entities),
        }
    }
}

impl<E: StatefulEntity> InMemoryStateEntityStore<E> {
    /// Create an empty store
    pub fn new(lease_holder: impl Into<String>, lease_duration: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            lease_holder: lease_holder.into(),
            lease_duration,
            clock,
            entities: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// A handle for another lease holder over the same entities
    pub fn with_holder(&self, lease_holder: impl Into<String>) -> Self {
        Self {
            lease_holder: lease_holder.into(),
            ..self.clone()
        }
    }

    pub fn lease_holder(&self) -> &str {
        &self.lease_holder
    }

    pub fn lease_duration(&self) -> Duration {
        self.lease_duration
    }

    /// Remove an entity regardless of its lease
    pub async fn delete_by_id(&self, id: &str) -> bool {
        self.entities.write().await.remove(id).is_some()
    }

    pub async fn len(&self) -> usize {
        self.entities.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entities.read().await.is_empty()
    }

    /// Snapshot of every stored entity, in ID order
    pub async fn all(&self) -> Vec<E> {
        let entities = self.entities.read().await;
        let mut all: Vec<E> = entities.values().cloned().collect();
        all.sort_by(|a, b| a.id().cmp(b.id()));
        all
    }

    fn is_claimable(&self, entity: &E, now: DateTime<Utc>) -> bool {
        match entity.lease() {
            None => true,
            Some(lease) => lease.is_expired(now),
        }
    }

    /// Fails when a live lease belongs to another holder.
    fn check_lease(&self, entity: &E, now: DateTime<Utc>) -> StoreResult<()> {
        match entity.lease() {
            Some(lease) if !lease.is_expired(now) && !lease.is_held_by(&self.lease_holder) => {
                Err(StoreError::LeaseConflict {
                    id: entity.id().to_string(),
                    holder: lease.leased_by.clone(),
                })
            }
            _ => Ok(()),
        }
    }

    fn new_lease(&self, now: DateTime<Utc>) -> Lease {
        Lease::new(self.lease_holder.clone(), now, self.lease_duration)
    }
}

#[async_trait]
impl<E: StatefulEntity> StateEntityStore<E> for InMemoryStateEntityStore<E> {
    async fn next_not_leased(&self, max: usize, criteria: &[Criterion]) -> StoreResult<Vec<E>> {
        resolver::validate_criteria::<E>(criteria)?;
        let now = self.clock.now();

        // the write lock makes selection and lease acquisition one step
        let mut entities = self.entities.write().await;
        let mut candidates = Vec::new();
        for entity in entities.values() {
            if self.is_claimable(entity, now) && resolver::matches(entity, criteria)? {
                candidates.push((entity.state_timestamp(), entity.id().to_string()));
            }
        }
        candidates.sort();
        candidates.truncate(max);

        let mut leased = Vec::with_capacity(candidates.len());
        for (_, id) in candidates {
            if let Some(entity) = entities.get_mut(&id) {
                entity.set_lease(Some(self.new_lease(now)));
                leased.push(entity.clone());
            }
        }

        if !leased.is_empty() {
            debug!(holder = %self.lease_holder, count = leased.len(), "Leased entities");
        }
        Ok(leased)
    }

    async fn find_by_id(&self, id: &str) -> StoreResult<Option<E>> {
        let entities = self.entities.read().await;
        Ok(entities.get(id).cloned())
    }

    async fn find_by_id_and_lease(&self, id: &str) -> StoreResult<E> {
        let now = self.clock.now();
        let mut entities = self.entities.write().await;
        let entity = entities
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        self.check_lease(entity, now)?;
        entity.set_lease(Some(self.new_lease(now)));
        Ok(entity.clone())
    }

    async fn save(&self, mut entity: E) -> StoreResult<()> {
        let now = self.clock.now();
        let mut entities = self.entities.write().await;
        if let Some(stored) = entities.get(entity.id()) {
            self.check_lease(stored, now)?;
        }
        entity.set_lease(None);
        entities.insert(entity.id().to_string(), entity);
        Ok(())
    }

    async fn break_lease(&self, entity: &E) -> StoreResult<()> {
        let now = self.clock.now();
        let mut entities = self.entities.write().await;
        let stored = entities
            .get_mut(entity.id())
            .ok_or_else(|| StoreError::NotFound(entity.id().to_string()))?;
        self.check_lease(stored, now)?;
        stored.set_lease(None);
        Ok(())
    }
}

#[async_trait]
impl ContractNegotiationStore for InMemoryStateEntityStore<ContractNegotiation> {
    async fn find_for_correlation_id(
        &self,
        correlation_id: &str,
    ) -> StoreResult<Option<ContractNegotiation>> {
        let entities = self.entities.read().await;
        Ok(entities
            .values()
            .find(|n| n.correlation_id.as_deref() == Some(correlation_id))
            .cloned())
    }

    async fn query_negotiations(&self, spec: &QuerySpec) -> StoreResult<Vec<ContractNegotiation>> {
        let entities = self.entities.read().await;
        Ok(resolver::resolve(entities.values().cloned(), spec)?)
    }

    async fn find_contract_agreement(
        &self,
        agreement_id: &str,
    ) -> StoreResult<Option<ContractAgreement>> {
        let entities = self.entities.read().await;
        Ok(entities
            .values()
            .filter_map(|n| n.contract_agreement())
            .find(|a| a.id == agreement_id)
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use accord_types::{
        ContractNegotiationState, ManualClock, NegotiationType, Operator, QueryError, SortOrder,
    };

    fn clock() -> Arc<ManualClock> {
        Arc::new(ManualClock::default())
    }

    fn store(clock: Arc<ManualClock>) -> InMemoryStateEntityStore<ContractNegotiation> {
        InMemoryStateEntityStore::new("worker-a", Duration::seconds(60), clock)
    }

    fn negotiation(id: &str, at: DateTime<Utc>) -> ContractNegotiation {
        ContractNegotiation::new(
            id,
            NegotiationType::Consumer,
            "provider",
            "http://provider",
            "dsp",
            at,
        )
    }

    #[tokio::test]
    async fn next_not_leased_never_hands_out_the_same_entity_twice() {
        let clock = clock();
        let store_a = store(clock.clone());
        let store_b = store_a.with_holder("worker-b");
        for i in 0..5 {
            store_a
                .save(negotiation(&format!("n-{i}"), clock.now()))
                .await
                .unwrap();
        }

        let (first, second) = tokio::join!(
            store_a.next_not_leased(3, &[]),
            store_b.next_not_leased(3, &[])
        );
        let mut ids: Vec<String> = first
            .unwrap()
            .into_iter()
            .chain(second.unwrap())
            .map(|n| n.core.id)
            .collect();
        assert_eq!(ids.len(), 5);
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 5);
    }

    #[tokio::test]
    async fn candidates_are_oldest_first_and_bounded() {
        let clock = clock();
        let store = store(clock.clone());
        let now = clock.now();
        store.save(negotiation("young", now)).await.unwrap();
        store
            .save(negotiation("old", now - Duration::seconds(10)))
            .await
            .unwrap();

        let batch = store.next_not_leased(1, &[]).await.unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].core.id, "old");
        assert!(batch[0].lease().is_some_and(|l| l.is_held_by("worker-a")));
    }

    #[tokio::test]
    async fn pending_and_filtered_entities_are_skipped() {
        let clock = clock();
        let store = store(clock.clone());
        let mut pending = negotiation("pending", clock.now());
        pending.core.pending = true;
        store.save(pending).await.unwrap();
        store.save(negotiation("ready", clock.now())).await.unwrap();

        let criteria = [
            Criterion::has_state(ContractNegotiationState::Initial.code()),
            Criterion::is_not_pending(),
        ];
        let batch = store.next_not_leased(10, &criteria).await.unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].core.id, "ready");
    }

    #[tokio::test]
    async fn expired_lease_is_reclaimed() {
        let clock = clock();
        let store_a = store(clock.clone());
        let store_b = store_a.with_holder("worker-b");
        store_a.save(negotiation("n-1", clock.now())).await.unwrap();

        assert_eq!(store_a.next_not_leased(1, &[]).await.unwrap().len(), 1);
        assert!(store_b.next_not_leased(1, &[]).await.unwrap().is_empty());

        clock.advance(Duration::seconds(61));
        let batch = store_b.next_not_leased(1, &[]).await.unwrap();
        assert_eq!(batch.len(), 1);
        assert!(batch[0].lease().is_some_and(|l| l.is_held_by("worker-b")));
    }

    #[tokio::test]
    async fn save_against_foreign_lease_is_rejected() {
        let clock = clock();
        let store_a = store(clock.clone());
        let store_b = store_a.with_holder("worker-b");
        store_a.save(negotiation("n-1", clock.now())).await.unwrap();
        let leased = store_a.find_by_id_and_lease("n-1").await.unwrap();

        let err = store_b.save(leased.clone()).await.unwrap_err();
        assert_eq!(
            err,
            StoreError::LeaseConflict {
                id: "n-1".to_string(),
                holder: "worker-a".to_string()
            }
        );
        assert!(matches!(
            store_b.find_by_id_and_lease("n-1").await,
            Err(StoreError::LeaseConflict { .. })
        ));

        store_a.save(leased).await.unwrap();
        let stored = store_a.find_by_id("n-1").await.unwrap().unwrap();
        assert!(stored.lease().is_none());
    }

    #[tokio::test]
    async fn break_lease_releases_without_changes() {
        let clock = clock();
        let store = store(clock.clone());
        store.save(negotiation("n-1", clock.now())).await.unwrap();
        let mut leased = store.next_not_leased(1, &[]).await.unwrap().remove(0);
        leased.core.state = 999;

        store.break_lease(&leased).await.unwrap();
        let stored = store.find_by_id("n-1").await.unwrap().unwrap();
        assert!(stored.lease().is_none());
        assert_eq!(stored.core.state, ContractNegotiationState::Initial.code());
    }

    #[tokio::test]
    async fn find_by_id_and_lease_missing_entity() {
        let store = store(clock());
        assert_eq!(
            store.find_by_id_and_lease("nope").await.unwrap_err(),
            StoreError::NotFound("nope".to_string())
        );
    }

    #[tokio::test]
    async fn unknown_criterion_field_is_invalid_query() {
        let store = store(clock());
        let err = store
            .next_not_leased(1, &[Criterion::new("colour", Operator::Eq, "red")])
            .await
            .unwrap_err();
        assert_eq!(
            err,
            StoreError::InvalidQuery(QueryError::UnknownField("colour".to_string()))
        );
    }

    #[tokio::test]
    async fn query_negotiations_rejects_unknown_sort_field() {
        let clock = clock();
        let store = store(clock.clone());
        store.save(negotiation("n-1", clock.now())).await.unwrap();
        let spec = QuerySpec::default().sorted_by("colour", SortOrder::Desc);
        assert!(matches!(
            store.query_negotiations(&spec).await,
            Err(StoreError::InvalidQuery(QueryError::UnknownSortField(_)))
        ));
    }

    #[tokio::test]
    async fn find_for_correlation_id() {
        let clock = clock();
        let store = store(clock.clone());
        store
            .save(negotiation("n-1", clock.now()).with_correlation_id("remote-1"))
            .await
            .unwrap();
        let found = store.find_for_correlation_id("remote-1").await.unwrap();
        assert_eq!(found.map(|n| n.core.id), Some("n-1".to_string()));
        assert!(store.find_for_correlation_id("remote-2").await.unwrap().is_none());
    }
}
