//! Provider transition table.

use crate::error::NegotiationResult;
use crate::machine::{
    advance, process_terminating, send_in_state, NegotiationContext, StateAction, Step,
};
use accord_types::{
    ContractAgreement, ContractNegotiation, ContractNegotiationState as S, MessagePayload,
    NegotiationEventType, StatefulEntity,
};
use futures::future::BoxFuture;
use futures::FutureExt;
use std::sync::Arc;

pub(crate) const TRANSITIONS: &[(S, StateAction)] = &[
    (S::Requested, process_requested as StateAction),
    (S::Offering, process_offering as StateAction),
    (S::Accepted, process_accepted as StateAction),
    (S::Agreeing, process_agreeing as StateAction),
    (S::Verified, process_verified as StateAction),
    (S::Finalizing, process_finalizing as StateAction),
    (S::Terminating, process_terminating as StateAction),
];

fn process_requested(
    ctx: Arc<NegotiationContext>,
    negotiation: ContractNegotiation,
) -> BoxFuture<'static, NegotiationResult<bool>> {
    async move { advance(&ctx, negotiation, S::Offering).await }.boxed()
}

/// Answer the request with the last offer on record.
fn process_offering(
    ctx: Arc<NegotiationContext>,
    negotiation: ContractNegotiation,
) -> BoxFuture<'static, NegotiationResult<bool>> {
    async move {
        let Some(offer) = negotiation.last_contract_offer().cloned() else {
            ctx.facade
                .transition_terminated(negotiation, Some("No contract offer to send".into()))
                .await?;
            return Ok(true);
        };
        match send_in_state(&ctx, negotiation, S::Offering, MessagePayload::ContractOffer { offer })
            .await?
        {
            Step::Sent(current, _) => advance(&ctx, current, S::Offered).await,
            Step::Done(processed) => Ok(processed),
        }
    }
    .boxed()
}

fn process_accepted(
    ctx: Arc<NegotiationContext>,
    negotiation: ContractNegotiation,
) -> BoxFuture<'static, NegotiationResult<bool>> {
    async move { advance(&ctx, negotiation, S::Agreeing).await }.boxed()
}

/// Build the agreement from the accepted offer and send it. The agreement id
/// is derived from the negotiation id so every retry sends the same one.
fn process_agreeing(
    ctx: Arc<NegotiationContext>,
    negotiation: ContractNegotiation,
) -> BoxFuture<'static, NegotiationResult<bool>> {
    async move {
        let Some(offer) = negotiation.last_contract_offer().cloned() else {
            ctx.facade
                .transition_terminated(negotiation, Some("No contract offer to agree on".into()))
                .await?;
            return Ok(true);
        };
        let agreement = ContractAgreement {
            id: format!("agreement-{}", negotiation.id()),
            provider_id: ctx.participant_id.clone(),
            consumer_id: negotiation.counter_party_id.clone(),
            asset_id: offer.asset_id,
            policy: offer.policy,
            contract_signing_date: ctx.clock.now(),
        };
        let payload = MessagePayload::ContractAgreement {
            agreement: agreement.clone(),
        };
        match send_in_state(&ctx, negotiation, S::Agreeing, payload).await? {
            Step::Sent(current, _) => {
                ctx.facade.transition_agreed(current, agreement).await?;
                Ok(true)
            }
            Step::Done(processed) => Ok(processed),
        }
    }
    .boxed()
}

fn process_verified(
    ctx: Arc<NegotiationContext>,
    negotiation: ContractNegotiation,
) -> BoxFuture<'static, NegotiationResult<bool>> {
    async move { advance(&ctx, negotiation, S::Finalizing).await }.boxed()
}

fn process_finalizing(
    ctx: Arc<NegotiationContext>,
    negotiation: ContractNegotiation,
) -> BoxFuture<'static, NegotiationResult<bool>> {
    async move {
        let payload = MessagePayload::NegotiationEvent {
            event_type: NegotiationEventType::Finalized,
        };
        match send_in_state(&ctx, negotiation, S::Finalizing, payload).await? {
            Step::Sent(current, _) => advance(&ctx, current, S::Finalized).await,
            Step::Done(processed) => Ok(processed),
        }
    }
    .boxed()
}
