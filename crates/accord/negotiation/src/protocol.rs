//! Inbound protocol service.
//!
//! Handles requests from the local application and messages from the
//! counterparty. Every handler leases the negotiation, checks that it belongs
//! to the expected role and that the transition is legal, clears the pending
//! flag and applies the transition through the [`TransitionFacade`]. A
//! rejected message releases the lease and leaves the negotiation unchanged.

use crate::error::{NegotiationError, NegotiationResult};
use crate::facade::TransitionFacade;
use accord_store::{ContractNegotiationStore, StoreError};
use accord_types::{
    Clock, ContractAgreement, ContractNegotiation, ContractNegotiationState as S, ContractOffer,
    MessagePayload, NegotiationEventType, NegotiationType, ProtocolMessage, StatefulEntity,
    TransitionError,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Local request to start negotiating for an offer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContractRequest {
    pub counter_party_id: String,
    pub counter_party_address: String,
    pub protocol: String,
    pub offer: ContractOffer,
}

pub struct ProtocolService {
    store: Arc<dyn ContractNegotiationStore>,
    facade: Arc<TransitionFacade>,
    clock: Arc<dyn Clock>,
}

impl ProtocolService {
    pub fn new(
        store: Arc<dyn ContractNegotiationStore>,
        facade: Arc<TransitionFacade>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            facade,
            clock,
        }
    }

    /// Create a consumer negotiation in INITIAL.
    #[instrument(skip_all, fields(counter_party_id = %request.counter_party_id))]
    pub async fn initiate(
        &self,
        request: ContractRequest,
    ) -> NegotiationResult<ContractNegotiation> {
        let negotiation = ContractNegotiation::new(
            Uuid::new_v4().to_string(),
            NegotiationType::Consumer,
            request.counter_party_id,
            request.counter_party_address,
            request.protocol,
            self.clock.now(),
        )
        .with_offer(request.offer);
        info!(negotiation_id = %negotiation.core.id, "Initiated negotiation");
        self.facade.initiate(negotiation).await
    }

    /// Provider side: the consumer's request creates the negotiation in
    /// REQUESTED. A repeated request for the same consumer id returns the
    /// existing negotiation.
    #[instrument(skip_all, fields(consumer_pid = %message.consumer_pid))]
    pub async fn notify_requested(
        &self,
        message: ProtocolMessage,
    ) -> NegotiationResult<ContractNegotiation> {
        let (offer, callback_address, consumer_id) = match message.payload {
            MessagePayload::ContractRequest {
                offer,
                callback_address,
                consumer_id,
            } => (offer, callback_address, consumer_id),
            other => return Err(unexpected_payload("ContractRequestMessage", &other)),
        };

        if let Some(existing) = self.store.find_for_correlation_id(&message.consumer_pid).await? {
            if existing.negotiation_type == NegotiationType::Provider {
                return Ok(existing);
            }
        }

        let negotiation = ContractNegotiation::new(
            Uuid::new_v4().to_string(),
            NegotiationType::Provider,
            consumer_id,
            callback_address,
            message.protocol,
            self.clock.now(),
        )
        .with_correlation_id(message.consumer_pid)
        .with_offer(offer);
        info!(negotiation_id = %negotiation.core.id, "Received contract request");
        self.facade.transition_to(negotiation, S::Requested).await
    }

    /// Consumer side: the provider's offer, REQUESTED or OFFERED → OFFERED.
    #[instrument(skip_all, fields(consumer_pid = %message.consumer_pid))]
    pub async fn notify_offered(
        &self,
        message: ProtocolMessage,
    ) -> NegotiationResult<ContractNegotiation> {
        let MessagePayload::ContractOffer { offer } = &message.payload else {
            return Err(unexpected_payload("ContractOfferMessage", &message.payload));
        };
        let offer = offer.clone();
        let mut negotiation = self.acquire(&message, NegotiationType::Consumer, S::Offered).await?;
        negotiation.add_offer(offer);
        if negotiation.correlation_id.is_none() {
            negotiation.correlation_id = message.provider_pid.clone();
        }
        self.finish(self.facade.transition_to(negotiation, S::Offered)).await
    }

    /// Provider side: the consumer accepted the last offer.
    #[instrument(skip_all, fields(provider_pid = ?message.provider_pid))]
    pub async fn notify_accepted(
        &self,
        message: ProtocolMessage,
    ) -> NegotiationResult<ContractNegotiation> {
        expect_event(&message, NegotiationEventType::Accepted)?;
        let negotiation = self.acquire(&message, NegotiationType::Provider, S::Accepted).await?;
        self.finish(self.facade.transition_to(negotiation, S::Accepted)).await
    }

    /// Consumer side: the provider's agreement.
    #[instrument(skip_all, fields(consumer_pid = %message.consumer_pid))]
    pub async fn notify_agreed(
        &self,
        message: ProtocolMessage,
    ) -> NegotiationResult<ContractNegotiation> {
        let MessagePayload::ContractAgreement { agreement } = &message.payload else {
            return Err(unexpected_payload("ContractAgreementMessage", &message.payload));
        };
        let agreement: ContractAgreement = agreement.clone();
        let negotiation = self.acquire(&message, NegotiationType::Consumer, S::Agreed).await?;
        if negotiation.contract_agreement().is_some() {
            self.release(&negotiation).await;
            return Err(TransitionError::AgreementAlreadySet(
                negotiation.core.id.clone(),
            )
            .into());
        }
        self.finish(self.facade.transition_agreed(negotiation, agreement)).await
    }

    /// Provider side: the consumer verified the agreement.
    #[instrument(skip_all, fields(provider_pid = ?message.provider_pid))]
    pub async fn notify_verified(
        &self,
        message: ProtocolMessage,
    ) -> NegotiationResult<ContractNegotiation> {
        if !matches!(message.payload, MessagePayload::AgreementVerification) {
            return Err(unexpected_payload(
                "ContractAgreementVerificationMessage",
                &message.payload,
            ));
        }
        let negotiation = self.acquire(&message, NegotiationType::Provider, S::Verified).await?;
        self.finish(self.facade.transition_to(negotiation, S::Verified)).await
    }

    /// Consumer side: the provider finalized the negotiation.
    #[instrument(skip_all, fields(consumer_pid = %message.consumer_pid))]
    pub async fn notify_finalized(
        &self,
        message: ProtocolMessage,
    ) -> NegotiationResult<ContractNegotiation> {
        expect_event(&message, NegotiationEventType::Finalized)?;
        let negotiation = self.acquire(&message, NegotiationType::Consumer, S::Finalized).await?;
        self.finish(self.facade.transition_to(negotiation, S::Finalized)).await
    }

    /// Either side: the counterparty terminated the negotiation.
    #[instrument(
        skip_all,
        fields(consumer_pid = %message.consumer_pid, provider_pid = ?message.provider_pid)
    )]
    pub async fn notify_terminated(
        &self,
        message: ProtocolMessage,
    ) -> NegotiationResult<ContractNegotiation> {
        let MessagePayload::Termination { reason, .. } = &message.payload else {
            return Err(unexpected_payload(
                "ContractNegotiationTerminationMessage",
                &message.payload,
            ));
        };
        let reason = reason.clone();
        let role = self.receiving_role(&message).await?;
        let negotiation = self.acquire(&message, role, S::Terminated).await?;
        self.finish(self.facade.transition_terminated(negotiation, reason)).await
    }

    /// Local decision to end a negotiation. The termination is sent to the
    /// counterparty by the TERMINATING action.
    #[instrument(skip(self, reason))]
    pub async fn terminate(
        &self,
        negotiation_id: &str,
        reason: impl Into<String>,
    ) -> NegotiationResult<ContractNegotiation> {
        let mut negotiation = self.lease(negotiation_id).await?;
        if let Err(e) = check_edge(&negotiation, S::Terminating) {
            self.release(&negotiation).await;
            return Err(e);
        }
        negotiation.set_pending(false);
        negotiation.set_error_detail(reason);
        self.finish(self.facade.transition_to(negotiation, S::Terminating)).await
    }

    /// Route a message to whichever role holds the negotiation it names.
    async fn receiving_role(
        &self,
        message: &ProtocolMessage,
    ) -> NegotiationResult<NegotiationType> {
        for role in [NegotiationType::Provider, NegotiationType::Consumer] {
            let Some(id) = message.process_id_for(role) else {
                continue;
            };
            if let Some(found) = self.store.find_by_id(id).await? {
                if found.negotiation_type == role {
                    return Ok(role);
                }
            }
        }
        Err(NegotiationError::NotFound(message.consumer_pid.clone()))
    }

    /// Lease the negotiation `message` is addressed to and validate it.
    async fn acquire(
        &self,
        message: &ProtocolMessage,
        role: NegotiationType,
        target: S,
    ) -> NegotiationResult<ContractNegotiation> {
        let id = message.process_id_for(role).ok_or_else(|| {
            NegotiationError::InvalidMessage(format!(
                "{} carries no process id for the {role}",
                message.type_name()
            ))
        })?;
        let mut negotiation = self.lease(id).await?;

        if negotiation.negotiation_type != role {
            self.release(&negotiation).await;
            return Err(NegotiationError::UnexpectedRole {
                id: negotiation.core.id.clone(),
                expected: role,
                actual: negotiation.negotiation_type,
            });
        }
        if let Err(e) = check_edge(&negotiation, target) {
            self.release(&negotiation).await;
            return Err(e);
        }

        negotiation.set_pending(false);
        info!(
            negotiation_id = %negotiation.core.id,
            message = message.type_name(),
            "Received protocol message"
        );
        Ok(negotiation)
    }

    async fn lease(&self, id: &str) -> NegotiationResult<ContractNegotiation> {
        self.store.find_by_id_and_lease(id).await.map_err(|e| match e {
            StoreError::NotFound(id) => NegotiationError::NotFound(id),
            other => other.into(),
        })
    }

    async fn release(&self, negotiation: &ContractNegotiation) {
        if let Err(e) = self.store.break_lease(negotiation).await {
            warn!(negotiation_id = %negotiation.core.id, error = %e, "Failed to break lease");
        }
    }

    /// Await a facade transition on a validated negotiation. The lease is
    /// released by the save, or by expiry if the save itself failed.
    async fn finish(
        &self,
        transition: impl std::future::Future<Output = NegotiationResult<ContractNegotiation>>,
    ) -> NegotiationResult<ContractNegotiation> {
        let result = transition.await;
        if let Err(e) = &result {
            warn!(error = %e, "Failed to apply inbound transition");
        }
        result
    }
}

fn check_edge(negotiation: &ContractNegotiation, target: S) -> NegotiationResult<()> {
    let current = negotiation.protocol_state()?;
    if current.can_transition_to(target) {
        Ok(())
    } else {
        Err(TransitionError::IllegalTransition {
            entity_id: negotiation.core.id.clone(),
            from: current.to_string(),
            to: target.to_string(),
        }
        .into())
    }
}

fn expect_event(
    message: &ProtocolMessage,
    expected: NegotiationEventType,
) -> NegotiationResult<()> {
    match &message.payload {
        MessagePayload::NegotiationEvent { event_type } if *event_type == expected => Ok(()),
        other => Err(unexpected_payload("ContractNegotiationEventMessage", other)),
    }
}

fn unexpected_payload(expected: &str, payload: &MessagePayload) -> NegotiationError {
    NegotiationError::InvalidMessage(format!(
        "expected {expected}, got {}",
        payload.type_name()
    ))
}
