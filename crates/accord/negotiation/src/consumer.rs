//! Consumer transition table.

use crate::error::NegotiationResult;
use crate::machine::{
    advance, process_terminating, send_in_state, NegotiationContext, StateAction, Step,
};
use accord_types::{
    ContractNegotiation, ContractNegotiationState as S, MessagePayload, NegotiationEventType,
    StatefulEntity,
};
use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

pub(crate) const TRANSITIONS: &[(S, StateAction)] = &[
    (S::Initial, process_initial as StateAction),
    (S::Requesting, process_requesting as StateAction),
    (S::Offered, process_offered as StateAction),
    (S::Accepting, process_accepting as StateAction),
    (S::Agreed, process_agreed as StateAction),
    (S::Verifying, process_verifying as StateAction),
    (S::Terminating, process_terminating as StateAction),
];

fn process_initial(
    ctx: Arc<NegotiationContext>,
    negotiation: ContractNegotiation,
) -> BoxFuture<'static, NegotiationResult<bool>> {
    async move { advance(&ctx, negotiation, S::Requesting).await }.boxed()
}

/// Send the contract request. The response carries the provider's id for
/// the negotiation, which becomes the correlation id.
fn process_requesting(
    ctx: Arc<NegotiationContext>,
    negotiation: ContractNegotiation,
) -> BoxFuture<'static, NegotiationResult<bool>> {
    async move {
        let Some(offer) = negotiation.last_contract_offer().cloned() else {
            ctx.facade
                .transition_terminated(negotiation, Some("No contract offer to request".into()))
                .await?;
            return Ok(true);
        };
        let payload = MessagePayload::ContractRequest {
            offer,
            callback_address: ctx.callback_address.clone(),
            consumer_id: ctx.participant_id.clone(),
        };
        match send_in_state(&ctx, negotiation, S::Requesting, payload).await? {
            Step::Sent(mut current, response) => {
                if let Some(provider_pid) = provider_pid(&response) {
                    debug!(negotiation_id = %current.id(), provider_pid, "Correlated with provider");
                    current.correlation_id = Some(provider_pid.to_string());
                }
                advance(&ctx, current, S::Requested).await
            }
            Step::Done(processed) => Ok(processed),
        }
    }
    .boxed()
}

fn provider_pid(response: &Value) -> Option<&str> {
    response.get("provider_pid").and_then(Value::as_str)
}

fn process_offered(
    ctx: Arc<NegotiationContext>,
    negotiation: ContractNegotiation,
) -> BoxFuture<'static, NegotiationResult<bool>> {
    async move { advance(&ctx, negotiation, S::Accepting).await }.boxed()
}

fn process_accepting(
    ctx: Arc<NegotiationContext>,
    negotiation: ContractNegotiation,
) -> BoxFuture<'static, NegotiationResult<bool>> {
    async move {
        let payload = MessagePayload::NegotiationEvent {
            event_type: NegotiationEventType::Accepted,
        };
        match send_in_state(&ctx, negotiation, S::Accepting, payload).await? {
            Step::Sent(current, _) => advance(&ctx, current, S::Accepted).await,
            Step::Done(processed) => Ok(processed),
        }
    }
    .boxed()
}

fn process_agreed(
    ctx: Arc<NegotiationContext>,
    negotiation: ContractNegotiation,
) -> BoxFuture<'static, NegotiationResult<bool>> {
    async move { advance(&ctx, negotiation, S::Verifying).await }.boxed()
}

fn process_verifying(
    ctx: Arc<NegotiationContext>,
    negotiation: ContractNegotiation,
) -> BoxFuture<'static, NegotiationResult<bool>> {
    async move {
        match send_in_state(&ctx, negotiation, S::Verifying, MessagePayload::AgreementVerification)
            .await?
        {
            Step::Sent(current, _) => advance(&ctx, current, S::Verified).await,
            Step::Done(processed) => Ok(processed),
        }
    }
    .boxed()
}
