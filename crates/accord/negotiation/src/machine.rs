//! Role transition tables and the shared send path.

use crate::error::{NegotiationError, NegotiationResult};
use crate::facade::TransitionFacade;
use crate::{consumer, provider};
use accord_statemachine::{EntityAction, EntityRetryProcessFactory, Processor, ProcessorImpl, RetryOutcome};
use accord_store::{ContractNegotiationStore, StateEntityStore};
use accord_types::{
    Clock, ContractNegotiation, ContractNegotiationState, Criterion, DispatchResult,
    MessagePayload, NegotiationType, ProtocolMessage, StatefulEntity,
};
use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tracing::instrument;

/// Sends protocol messages to counterparties.
///
/// Implementations classify failures: [`DispatchFailure::retryable`] for
/// transport or temporary remote errors, [`DispatchFailure::fatal`] for
/// permanent rejections.
///
/// [`DispatchFailure::retryable`]: accord_types::DispatchFailure::retryable
/// [`DispatchFailure::fatal`]: accord_types::DispatchFailure::fatal
#[async_trait]
pub trait RemoteMessageDispatcher: Send + Sync {
    async fn dispatch(&self, message: ProtocolMessage) -> DispatchResult<Value>;
}

/// Predicate parking entities as pending instead of running their action.
pub type PendingGuard = Arc<dyn Fn(&ContractNegotiation) -> bool + Send + Sync>;

/// Collaborators available to every state action.
pub struct NegotiationContext {
    pub participant_id: String,
    pub callback_address: String,
    pub store: Arc<dyn ContractNegotiationStore>,
    pub entities: Arc<dyn StateEntityStore<ContractNegotiation>>,
    pub dispatcher: Arc<dyn RemoteMessageDispatcher>,
    pub facade: Arc<TransitionFacade>,
    pub retry: EntityRetryProcessFactory,
    pub clock: Arc<dyn Clock>,
}

/// Action run for every leased negotiation in one state.
pub type StateAction =
    fn(Arc<NegotiationContext>, ContractNegotiation) -> BoxFuture<'static, NegotiationResult<bool>>;

/// Which side of the protocol a state machine drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NegotiationRole {
    Consumer,
    Provider,
}

impl NegotiationRole {
    pub fn negotiation_type(self) -> NegotiationType {
        match self {
            Self::Consumer => NegotiationType::Consumer,
            Self::Provider => NegotiationType::Provider,
        }
    }

    /// The states this role acts on, with their actions.
    pub fn transitions(self) -> &'static [(ContractNegotiationState, StateAction)] {
        match self {
            Self::Consumer => consumer::TRANSITIONS,
            Self::Provider => provider::TRANSITIONS,
        }
    }

    /// One processor per state of the transition table.
    pub(crate) fn processors(
        self,
        context: &Arc<NegotiationContext>,
        batch_size: usize,
        max_concurrent: usize,
        guard: &PendingGuard,
    ) -> Vec<Arc<dyn Processor>> {
        self.transitions()
            .iter()
            .map(|&(state, handler)| {
                let criteria = vec![
                    Criterion::has_state(state.code()),
                    Criterion::is_not_pending(),
                    Criterion::has_type(self.negotiation_type()),
                ];
                let ctx = Arc::clone(context);
                let action: EntityAction<ContractNegotiation, NegotiationError> =
                    Arc::new(move |negotiation| handler(Arc::clone(&ctx), negotiation));
                let processor = ProcessorImpl::new(
                    format!("{self}:{state}"),
                    Arc::clone(&context.entities),
                    criteria,
                    batch_size,
                    action,
                )
                .with_guard(Arc::clone(guard))
                .with_max_concurrent(max_concurrent);
                Arc::new(processor) as Arc<dyn Processor>
            })
            .collect()
    }
}

impl fmt::Display for NegotiationRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Consumer => "consumer",
            Self::Provider => "provider",
        })
    }
}

/// Outcome of [`send_in_state`].
pub(crate) enum Step {
    /// Delivered. Carries the re-read entity and the counterparty's response;
    /// the caller applies the success transition.
    Sent(ContractNegotiation, Value),
    /// Failure paths already persisted, or nothing to do this tick.
    Done(bool),
}

/// Send `payload` for a negotiation in the "-ING" `state`.
///
/// A retryable failure re-enters `state`. A fatal failure or retry
/// exhaustion terminates the negotiation with the failure recorded.
#[instrument(
    skip_all,
    fields(negotiation_id = %negotiation.core.id, role = %negotiation.negotiation_type, state = %state)
)]
pub(crate) async fn send_in_state(
    ctx: &NegotiationContext,
    negotiation: ContractNegotiation,
    state: ContractNegotiationState,
    payload: MessagePayload,
) -> NegotiationResult<Step> {
    let message = ProtocolMessage::for_negotiation(&negotiation, payload);
    let type_name = message.type_name();
    let description = format!("send {type_name} to {}", negotiation.counter_party_address);

    let outcome = ctx
        .retry
        .execute(
            &description,
            negotiation,
            ctx.entities.as_ref(),
            ctx.dispatcher.dispatch(message),
        )
        .await?;

    let step = match outcome {
        RetryOutcome::Delayed(_) => Step::Done(false),
        RetryOutcome::Abandoned => Step::Done(true),
        RetryOutcome::Succeeded(current, response) => Step::Sent(current, response),
        RetryOutcome::Failed(current, _) => {
            ctx.facade.transition_to(current, state).await?;
            Step::Done(true)
        }
        RetryOutcome::Fatal(current, failure) => {
            ctx.facade
                .transition_terminated(current, Some(failure.failure_detail().to_string()))
                .await?;
            Step::Done(true)
        }
        RetryOutcome::Exhausted(current, failure) => {
            let detail = format!(
                "Failed to send {type_name} to counter party: {}",
                failure.failure_detail()
            );
            ctx.facade
                .transition_terminated(current, Some(detail))
                .await?;
            Step::Done(true)
        }
    };
    Ok(step)
}

/// Local decision: move straight to `to`.
pub(crate) async fn advance(
    ctx: &NegotiationContext,
    negotiation: ContractNegotiation,
    to: ContractNegotiationState,
) -> NegotiationResult<bool> {
    ctx.facade.transition_to(negotiation, to).await?;
    Ok(true)
}

/// TERMINATING, shared by both roles: notify the counterparty, then stop.
/// The message carries the reason and the policy of the last offer.
pub(crate) fn process_terminating(
    ctx: Arc<NegotiationContext>,
    negotiation: ContractNegotiation,
) -> BoxFuture<'static, NegotiationResult<bool>> {
    async move {
        let payload = MessagePayload::Termination {
            reason: negotiation.error_detail().map(str::to_string),
            policy: negotiation.last_contract_offer().map(|offer| offer.policy.clone()),
        };
        match send_in_state(&ctx, negotiation, ContractNegotiationState::Terminating, payload)
            .await?
        {
            Step::Sent(current, _) => {
                ctx.facade.transition_terminated(current, None).await?;
                Ok(true)
            }
            Step::Done(processed) => Ok(processed),
        }
    }
    .boxed()
}
