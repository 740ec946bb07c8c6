//! Retry-wrapped dispatch.

use crate::wait::WaitStrategy;
use accord_store::{StateEntityStore, StoreResult};
use accord_types::{Clock, DispatchFailure, DispatchResult, StatefulEntity};
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Classified result of one dispatch attempt.
///
/// Every variant except [`Delayed`](Self::Delayed) and
/// [`Abandoned`](Self::Abandoned) carries the entity as re-read from the
/// store after the send, and the caller must persist its follow-up state.
#[derive(Debug)]
pub enum RetryOutcome<E, T> {
    /// The retry delay has not elapsed, nothing was sent.
    Delayed(E),
    /// The entity disappeared while the send was in flight.
    Abandoned,
    Succeeded(E, T),
    /// Retryable failure with attempts left.
    Failed(E, DispatchFailure),
    /// Non-retryable failure.
    Fatal(E, DispatchFailure),
    /// Retryable failure on the last allowed attempt.
    Exhausted(E, DispatchFailure),
}

impl<E, T> RetryOutcome<E, T> {
    /// Whether the attempt counts as handled for the processor.
    pub fn processed(&self) -> bool {
        !matches!(self, Self::Delayed(_))
    }
}

/// Runs a send under the retry policy: retry limit counted by
/// `state_count`, and a wait strategy between attempts.
#[derive(Clone)]
pub struct EntityRetryProcessFactory {
    retry_limit: u32,
    wait_strategy: Arc<dyn WaitStrategy>,
    clock: Arc<dyn Clock>,
}

impl EntityRetryProcessFactory {
    pub fn new(
        retry_limit: u32,
        wait_strategy: Arc<dyn WaitStrategy>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            retry_limit,
            wait_strategy,
            clock,
        }
    }

    pub fn retry_limit(&self) -> u32 {
        self.retry_limit
    }

    /// A failure now would be the last allowed attempt.
    pub fn is_retry_exhausted<E: StatefulEntity>(&self, entity: &E) -> bool {
        entity.state_count().saturating_add(1) >= self.retry_limit
    }

    /// Entity re-entered after a failure and its delay has not elapsed.
    pub fn should_delay<E: StatefulEntity>(&self, entity: &E) -> bool {
        let attempt = entity.state_count();
        if attempt == 0 {
            return false;
        }
        let Ok(delay) = chrono::Duration::from_std(self.wait_strategy.retry_delay(attempt)) else {
            return true;
        };
        match entity.state_timestamp().checked_add_signed(delay) {
            Some(due) => self.clock.now() < due,
            None => true,
        }
    }

    /// Send, then classify the outcome against the entity re-read from `store`.
    pub async fn execute<E, T, F>(
        &self,
        description: &str,
        entity: E,
        store: &dyn StateEntityStore<E>,
        send: F,
    ) -> StoreResult<RetryOutcome<E, T>>
    where
        E: StatefulEntity,
        F: Future<Output = DispatchResult<T>> + Send,
    {
        if self.should_delay(&entity) {
            debug!(
                process = description,
                entity_id = %entity.id(),
                state_count = entity.state_count(),
                "Retry delay not elapsed"
            );
            return Ok(RetryOutcome::Delayed(entity));
        }

        let result = send.await;

        let Some(current) = store.find_by_id(entity.id()).await? else {
            debug!(process = description, entity_id = %entity.id(), "Entity vanished, abandoning");
            return Ok(RetryOutcome::Abandoned);
        };

        Ok(match result {
            Ok(value) => RetryOutcome::Succeeded(current, value),
            Err(failure) if failure.is_fatal() => {
                error!(
                    process = description,
                    entity_id = %current.id(),
                    error = %failure,
                    "Fatal error, not retrying"
                );
                RetryOutcome::Fatal(current, failure)
            }
            Err(failure) if self.is_retry_exhausted(&current) => {
                error!(
                    process = description,
                    entity_id = %current.id(),
                    attempts = current.state_count() + 1,
                    error = %failure,
                    "Retry limit exhausted"
                );
                RetryOutcome::Exhausted(current, failure)
            }
            Err(failure) => {
                warn!(
                    process = description,
                    entity_id = %current.id(),
                    state_count = current.state_count(),
                    error = %failure,
                    "Failed, will retry"
                );
                RetryOutcome::Failed(current, failure)
            }
        })
    }
}
