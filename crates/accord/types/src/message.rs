//! Protocol messages exchanged with a counterparty.

use crate::negotiation::{ContractNegotiation, NegotiationType};
use crate::policy::{ContractAgreement, ContractOffer, Policy};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Event kinds carried by a negotiation event message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NegotiationEventType {
    Accepted,
    Finalized,
}

/// Role-specific body of a protocol message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MessagePayload {
    ContractRequest {
        offer: ContractOffer,
        callback_address: String,
        consumer_id: String,
    },
    ContractOffer {
        offer: ContractOffer,
    },
    NegotiationEvent {
        event_type: NegotiationEventType,
    },
    ContractAgreement {
        agreement: ContractAgreement,
    },
    AgreementVerification,
    Termination {
        reason: Option<String>,
        policy: Option<Policy>,
    },
}

impl MessagePayload {
    /// Message type name, used in logs and failure details.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::ContractRequest { .. } => "ContractRequestMessage",
            Self::ContractOffer { .. } => "ContractOfferMessage",
            Self::NegotiationEvent { .. } => "ContractNegotiationEventMessage",
            Self::ContractAgreement { .. } => "ContractAgreementMessage",
            Self::AgreementVerification => "ContractAgreementVerificationMessage",
            Self::Termination { .. } => "ContractNegotiationTerminationMessage",
        }
    }
}

/// A message addressed to the counterparty of one negotiation.
///
/// `consumer_pid` and `provider_pid` are the two parties' identifiers for the
/// same negotiation. The provider pid is unknown until the provider answers
/// the initial request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProtocolMessage {
    pub id: String,
    pub protocol: String,
    pub counter_party_address: String,
    pub consumer_pid: String,
    pub provider_pid: Option<String>,
    pub payload: MessagePayload,
}

impl ProtocolMessage {
    /// Address `payload` to the counterparty of `negotiation`.
    pub fn for_negotiation(negotiation: &ContractNegotiation, payload: MessagePayload) -> Self {
        let own = negotiation.core.id.clone();
        let other = negotiation.correlation_id.clone();
        let (consumer_pid, provider_pid) = match negotiation.negotiation_type {
            NegotiationType::Consumer => (own, other),
            NegotiationType::Provider => (other.unwrap_or_default(), Some(own)),
        };
        Self {
            id: Uuid::new_v4().to_string(),
            protocol: negotiation.protocol.clone(),
            counter_party_address: negotiation.counter_party_address.clone(),
            consumer_pid,
            provider_pid,
            payload,
        }
    }

    pub fn type_name(&self) -> &'static str {
        self.payload.type_name()
    }

    /// The receiver's own identifier for the negotiation, if known.
    pub fn process_id_for(&self, receiver: NegotiationType) -> Option<&str> {
        match receiver {
            NegotiationType::Consumer => Some(self.consumer_pid.as_str()),
            NegotiationType::Provider => self.provider_pid.as_deref(),
        }
    }

    /// The sender's identifier for the negotiation, from the receiver's side.
    pub fn correlation_id_for(&self, receiver: NegotiationType) -> Option<&str> {
        match receiver {
            NegotiationType::Consumer => self.provider_pid.as_deref(),
            NegotiationType::Provider => Some(self.consumer_pid.as_str()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn pids_follow_the_sender_role() {
        let consumer = ContractNegotiation::new(
            "c-1",
            NegotiationType::Consumer,
            "provider",
            "http://provider",
            "dsp",
            Utc::now(),
        )
        .with_correlation_id("p-1");
        let msg = ProtocolMessage::for_negotiation(&consumer, MessagePayload::AgreementVerification);
        assert_eq!(msg.consumer_pid, "c-1");
        assert_eq!(msg.provider_pid.as_deref(), Some("p-1"));
        assert_eq!(msg.process_id_for(NegotiationType::Provider), Some("p-1"));
        assert_eq!(msg.correlation_id_for(NegotiationType::Provider), Some("c-1"));

        let provider = ContractNegotiation::new(
            "p-1",
            NegotiationType::Provider,
            "consumer",
            "http://consumer",
            "dsp",
            Utc::now(),
        )
        .with_correlation_id("c-1");
        let msg = ProtocolMessage::for_negotiation(
            &provider,
            MessagePayload::NegotiationEvent {
                event_type: NegotiationEventType::Finalized,
            },
        );
        assert_eq!(msg.consumer_pid, "c-1");
        assert_eq!(msg.provider_pid.as_deref(), Some("p-1"));
        assert_eq!(msg.type_name(), "ContractNegotiationEventMessage");
    }

    #[test]
    fn initial_request_has_no_provider_pid() {
        let consumer = ContractNegotiation::new(
            "c-1",
            NegotiationType::Consumer,
            "provider",
            "http://provider",
            "dsp",
            Utc::now(),
        );
        let msg = ProtocolMessage::for_negotiation(
            &consumer,
            MessagePayload::Termination {
                reason: None,
                policy: None,
            },
        );
        assert_eq!(msg.provider_pid, None);
        assert_eq!(msg.process_id_for(NegotiationType::Provider), None);
    }
}
