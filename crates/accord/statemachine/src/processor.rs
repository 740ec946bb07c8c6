//! Batch processors.

use accord_store::StateEntityStore;
use accord_types::{Criterion, StatefulEntity};
use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::{FutureExt, StreamExt};
use std::fmt::Display;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, error, info_span, warn, Instrument};

/// Work unit run by the [`StateMachineManager`](crate::StateMachineManager)
/// on every iteration.
#[async_trait]
pub trait Processor: Send + Sync {
    fn description(&self) -> &str;

    /// Process one batch, returning how many entities were handled.
    async fn process(&self) -> usize;
}

/// Action applied to one leased entity.
///
/// `Ok(true)` means the entity was handled and its new state persisted,
/// which also released the lease. `Ok(false)` means nothing changed.
pub type EntityAction<E, Err> =
    Arc<dyn Fn(E) -> BoxFuture<'static, Result<bool, Err>> + Send + Sync>;

/// Leases a batch matching `criteria` and runs `action` on each entity.
///
/// Entities matching the guard are marked pending instead. Every lease taken
/// is released on every path: the action's own save, `break_lease` when the
/// action reports no change, fails or panics.
pub struct ProcessorImpl<E, Err> {
    description: String,
    store: Arc<dyn StateEntityStore<E>>,
    criteria: Vec<Criterion>,
    batch_size: usize,
    action: EntityAction<E, Err>,
    guard: Arc<dyn Fn(&E) -> bool + Send + Sync>,
    max_concurrent: usize,
}

impl<E, Err> ProcessorImpl<E, Err>
where
    E: StatefulEntity,
    Err: Display + Send + 'static,
{
    pub fn new(
        description: impl Into<String>,
        store: Arc<dyn StateEntityStore<E>>,
        criteria: Vec<Criterion>,
        batch_size: usize,
        action: EntityAction<E, Err>,
    ) -> Self {
        Self {
            description: description.into(),
            store,
            criteria,
            batch_size,
            action,
            guard: Arc::new(|_: &E| false),
            max_concurrent: 1,
        }
    }

    /// Entities for which `guard` holds are set pending and skipped.
    pub fn with_guard(mut self, guard: Arc<dyn Fn(&E) -> bool + Send + Sync>) -> Self {
        self.guard = guard;
        self
    }

    /// Handle up to `max_concurrent` entities of one batch at a time.
    pub fn with_max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.max_concurrent = max_concurrent.max(1);
        self
    }

    async fn handle(&self, entity: E) -> bool {
        let entity_id = entity.id().to_string();

        if (self.guard)(&entity) {
            let mut guarded = entity;
            guarded.set_pending(true);
            if let Err(e) = self.store.save(guarded).await {
                warn!(entity_id = %entity_id, error = %e, "Failed to park guarded entity");
            }
            debug!(entity_id = %entity_id, "Entity guarded, set pending");
            return false;
        }

        let leased = entity.clone();
        let span = info_span!("process", description = %self.description, entity_id = %entity_id);
        let outcome = AssertUnwindSafe((self.action)(entity))
            .catch_unwind()
            .instrument(span)
            .await;

        match outcome {
            Ok(Ok(true)) => return true,
            Ok(Ok(false)) => {}
            Ok(Err(e)) => {
                error!(
                    description = %self.description,
                    entity_id = %entity_id,
                    error = %e,
                    "Action failed"
                );
            }
            Err(_) => {
                error!(
                    description = %self.description,
                    entity_id = %entity_id,
                    "Action panicked"
                );
            }
        }

        self.release(&leased).await;
        false
    }

    async fn release(&self, entity: &E) {
        if let Err(e) = self.store.break_lease(entity).await {
            warn!(entity_id = %entity.id(), error = %e, "Failed to break lease");
        }
    }
}

#[async_trait]
impl<E, Err> Processor for ProcessorImpl<E, Err>
where
    E: StatefulEntity,
    Err: Display + Send + 'static,
{
    fn description(&self) -> &str {
        &self.description
    }

    async fn process(&self) -> usize {
        let batch = match self
            .store
            .next_not_leased(self.batch_size, &self.criteria)
            .await
        {
            Ok(batch) => batch,
            Err(e) => {
                error!(description = %self.description, error = %e, "Failed to lease batch");
                return 0;
            }
        };

        futures::stream::iter(batch)
            .map(|entity| self.handle(entity))
            .buffer_unordered(self.max_concurrent)
            .filter(|processed| futures::future::ready(*processed))
            .count()
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use accord_store::InMemoryStateEntityStore;
    use accord_types::{ContractNegotiation, ManualClock, NegotiationType};
    use chrono::{Duration, Utc};
    use std::sync::atomic::{AtomicUsize, Ordering};

    type Store = InMemoryStateEntityStore<ContractNegotiation>;

    fn store() -> Store {
        InMemoryStateEntityStore::new(
            "worker",
            Duration::seconds(60),
            Arc::new(ManualClock::default()),
        )
    }

    async fn seed(store: &Store, ids: &[&str]) {
        for id in ids {
            let n = ContractNegotiation::new(
                *id,
                NegotiationType::Consumer,
                "provider",
                "http://provider",
                "dsp",
                Utc::now(),
            );
            store.save(n).await.unwrap();
        }
    }

    fn processor(
        store: &Store,
        action: EntityAction<ContractNegotiation, String>,
    ) -> ProcessorImpl<ContractNegotiation, String> {
        ProcessorImpl::new("test", Arc::new(store.clone()), vec![], 10, action)
    }

    async fn all_released(store: &Store) -> bool {
        store.all().await.iter().all(|n| n.lease().is_none())
    }

    #[tokio::test]
    async fn counts_only_handled_entities() {
        let store = store();
        seed(&store, &["a", "b", "c"]).await;
        let saver = store.clone();
        let action: EntityAction<ContractNegotiation, String> =
            Arc::new(move |mut n: ContractNegotiation| {
                let saver = saver.clone();
                async move {
                    if n.core.id == "b" {
                        return Ok(false);
                    }
                    n.core.error_detail = Some("handled".to_string());
                    saver.save(n).await.map_err(|e| e.to_string())?;
                    Ok::<bool, String>(true)
                }
                .boxed()
            });

        assert_eq!(processor(&store, action).process().await, 2);
        assert!(all_released(&store).await);
    }

    #[tokio::test]
    async fn lease_released_when_action_fails_or_panics() {
        let store = store();
        seed(&store, &["fails", "panics"]).await;
        let action: EntityAction<ContractNegotiation, String> =
            Arc::new(|n: ContractNegotiation| {
                async move {
                    if n.core.id == "panics" {
                        panic!("boom");
                    }
                    Err::<bool, String>("broken".to_string())
                }
                .boxed()
            });

        let processor = processor(&store, action).with_max_concurrent(2);
        assert_eq!(processor.process().await, 0);
        assert!(all_released(&store).await);

        // released entities are immediately claimable again
        assert_eq!(store.next_not_leased(10, &[]).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn guarded_entities_are_parked_pending() {
        let store = store();
        seed(&store, &["guarded", "free"]).await;
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let action: EntityAction<ContractNegotiation, String> =
            Arc::new(move |_: ContractNegotiation| {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Ok::<bool, String>(false) }.boxed()
            });

        let processor = processor(&store, action)
            .with_guard(Arc::new(|n: &ContractNegotiation| n.core.id == "guarded"));
        assert_eq!(processor.process().await, 0);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let guarded = store.find_by_id("guarded").await.unwrap().unwrap();
        assert!(guarded.is_pending());
        assert!(all_released(&store).await);
    }
}
