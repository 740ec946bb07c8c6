//! The single path through which negotiations change state.

use crate::error::NegotiationResult;
use crate::observe::{NegotiationObservable, TransitionKind};
use accord_store::ContractNegotiationStore;
use accord_types::{
    Clock, ContractAgreement, ContractNegotiation, ContractNegotiationState, StatefulEntity,
};
use std::sync::Arc;
use tracing::debug;

/// Applies a transition, persists it and then notifies listeners.
///
/// Saving releases the caller's lease. Listeners only ever see transitions
/// that were persisted.
pub struct TransitionFacade {
    store: Arc<dyn ContractNegotiationStore>,
    observable: Arc<NegotiationObservable>,
    clock: Arc<dyn Clock>,
}

impl TransitionFacade {
    pub fn new(
        store: Arc<dyn ContractNegotiationStore>,
        observable: Arc<NegotiationObservable>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            observable,
            clock,
        }
    }

    /// Persist a freshly created negotiation and report it as initiated.
    pub async fn initiate(
        &self,
        negotiation: ContractNegotiation,
    ) -> NegotiationResult<ContractNegotiation> {
        self.store.save(negotiation.clone()).await?;
        self.observable
            .notify(TransitionKind::Initiated, &negotiation)
            .await;
        Ok(negotiation)
    }

    /// Move to `state`. Re-entering the current state counts a retry.
    pub async fn transition_to(
        &self,
        mut negotiation: ContractNegotiation,
        state: ContractNegotiationState,
    ) -> NegotiationResult<ContractNegotiation> {
        negotiation.transition_to(state, self.clock.now())?;
        self.persist(negotiation, state).await
    }

    /// Attach the agreement and move to AGREED.
    pub async fn transition_agreed(
        &self,
        mut negotiation: ContractNegotiation,
        agreement: ContractAgreement,
    ) -> NegotiationResult<ContractNegotiation> {
        negotiation.transition_agreed(agreement, self.clock.now())?;
        self.persist(negotiation, ContractNegotiationState::Agreed)
            .await
    }

    /// Move to TERMINATED, recording `detail` when given.
    pub async fn transition_terminated(
        &self,
        mut negotiation: ContractNegotiation,
        detail: Option<String>,
    ) -> NegotiationResult<ContractNegotiation> {
        negotiation.transition_to(ContractNegotiationState::Terminated, self.clock.now())?;
        if let Some(detail) = detail {
            negotiation.set_error_detail(detail);
        }
        self.persist(negotiation, ContractNegotiationState::Terminated)
            .await
    }

    async fn persist(
        &self,
        negotiation: ContractNegotiation,
        state: ContractNegotiationState,
    ) -> NegotiationResult<ContractNegotiation> {
        self.store.save(negotiation.clone()).await?;
        debug!(
            negotiation_id = %negotiation.core.id,
            role = %negotiation.negotiation_type,
            state = %state,
            state_count = negotiation.core.state_count,
            "Transitioned"
        );
        self.observable
            .notify(TransitionKind::for_state(state), &negotiation)
            .await;
        Ok(negotiation)
    }
}
