//! Contract negotiations and their protocol state graph.

use crate::entity::{EntityCore, StatefulEntity};
use crate::error::TransitionError;
use crate::policy::{ContractAgreement, ContractOffer};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

// ── Protocol states ──────────────────────────────────────────────────

/// Protocol states shared by both roles.
///
/// "-ING" states mean a local decision was taken and the outbound message is
/// not yet confirmed; the paired "-ED" state means it was sent, or that the
/// same kind of message was received from the counterparty.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ContractNegotiationState {
    Initial,
    Requesting,
    Requested,
    Offering,
    Offered,
    Accepting,
    Accepted,
    Agreeing,
    Agreed,
    Verifying,
    Verified,
    Finalizing,
    Finalized,
    Terminating,
    Terminated,
}

impl ContractNegotiationState {
    pub const ALL: [ContractNegotiationState; 15] = [
        Self::Initial,
        Self::Requesting,
        Self::Requested,
        Self::Offering,
        Self::Offered,
        Self::Accepting,
        Self::Accepted,
        Self::Agreeing,
        Self::Agreed,
        Self::Verifying,
        Self::Verified,
        Self::Finalizing,
        Self::Finalized,
        Self::Terminating,
        Self::Terminated,
    ];

    /// Persisted state code.
    pub fn code(self) -> i32 {
        match self {
            Self::Initial => 50,
            Self::Requesting => 100,
            Self::Requested => 200,
            Self::Offering => 300,
            Self::Offered => 400,
            Self::Accepting => 700,
            Self::Accepted => 800,
            Self::Agreeing => 825,
            Self::Agreed => 850,
            Self::Verifying => 1050,
            Self::Verified => 1100,
            Self::Finalizing => 1150,
            Self::Finalized => 1200,
            Self::Terminating => 1300,
            Self::Terminated => 1400,
        }
    }

    pub fn from_code(code: i32) -> Result<Self, TransitionError> {
        Self::ALL
            .into_iter()
            .find(|s| s.code() == code)
            .ok_or(TransitionError::UnknownState(code))
    }

    /// FINALIZED and TERMINATED are absorbing.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Finalized | Self::Terminated)
    }

    /// States reachable in one step, excluding re-entry and the failure edges.
    fn successors(self) -> &'static [ContractNegotiationState] {
        use ContractNegotiationState::*;
        match self {
            Initial => &[Requesting, Requested],
            Requesting => &[Requested],
            Requested => &[Offering, Offered],
            Offering => &[Offered],
            Offered => &[Offering, Accepting, Accepted],
            Accepting => &[Accepted],
            Accepted => &[Agreeing, Agreed],
            Agreeing => &[Agreed],
            Agreed => &[Verifying, Verified],
            Verifying => &[Verified],
            Verified => &[Finalizing, Finalized],
            Finalizing => &[Finalized],
            Terminating => &[Terminated],
            Finalized | Terminated => &[],
        }
    }

    /// Whether `self -> to` is an edge of the protocol graph.
    pub fn can_transition_to(self, to: ContractNegotiationState) -> bool {
        if self.is_terminal() {
            return false;
        }
        if self == to {
            return true;
        }
        if matches!(to, Self::Terminating | Self::Terminated) {
            return true;
        }
        self.successors().contains(&to)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Initial => "INITIAL",
            Self::Requesting => "REQUESTING",
            Self::Requested => "REQUESTED",
            Self::Offering => "OFFERING",
            Self::Offered => "OFFERED",
            Self::Accepting => "ACCEPTING",
            Self::Accepted => "ACCEPTED",
            Self::Agreeing => "AGREEING",
            Self::Agreed => "AGREED",
            Self::Verifying => "VERIFYING",
            Self::Verified => "VERIFIED",
            Self::Finalizing => "FINALIZING",
            Self::Finalized => "FINALIZED",
            Self::Terminating => "TERMINATING",
            Self::Terminated => "TERMINATED",
        }
    }
}

impl fmt::Display for ContractNegotiationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Role ─────────────────────────────────────────────────────────────

/// Which side of the negotiation this record belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NegotiationType {
    Consumer,
    Provider,
}

impl NegotiationType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Consumer => "CONSUMER",
            Self::Provider => "PROVIDER",
        }
    }
}

impl fmt::Display for NegotiationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Negotiation ──────────────────────────────────────────────────────

/// A durable negotiation between this participant and one counterparty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContractNegotiation {
    #[serde(flatten)]
    pub core: EntityCore,
    #[serde(rename = "type")]
    pub negotiation_type: NegotiationType,
    /// The counterparty's identifier for this negotiation, once known.
    pub correlation_id: Option<String>,
    pub counter_party_id: String,
    pub counter_party_address: String,
    pub protocol: String,
    /// Offers exchanged so far, oldest first.
    pub contract_offers: Vec<ContractOffer>,
    contract_agreement: Option<ContractAgreement>,
}

impl ContractNegotiation {
    /// Create a negotiation in INITIAL.
    pub fn new(
        id: impl Into<String>,
        negotiation_type: NegotiationType,
        counter_party_id: impl Into<String>,
        counter_party_address: impl Into<String>,
        protocol: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            core: EntityCore::new(id, ContractNegotiationState::Initial.code(), now),
            negotiation_type,
            correlation_id: None,
            counter_party_id: counter_party_id.into(),
            counter_party_address: counter_party_address.into(),
            protocol: protocol.into(),
            contract_offers: Vec::new(),
            contract_agreement: None,
        }
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    pub fn with_offer(mut self, offer: ContractOffer) -> Self {
        self.contract_offers.push(offer);
        self
    }

    /// Current protocol state. Unknown codes are reported as an error.
    pub fn protocol_state(&self) -> Result<ContractNegotiationState, TransitionError> {
        ContractNegotiationState::from_code(self.core.state)
    }

    pub fn last_contract_offer(&self) -> Option<&ContractOffer> {
        self.contract_offers.last()
    }

    pub fn add_offer(&mut self, offer: ContractOffer) {
        self.contract_offers.push(offer);
    }

    pub fn contract_agreement(&self) -> Option<&ContractAgreement> {
        self.contract_agreement.as_ref()
    }

    /// Move along one edge of the protocol graph.
    pub fn transition_to(
        &mut self,
        to: ContractNegotiationState,
        now: DateTime<Utc>,
    ) -> Result<(), TransitionError> {
        let from = self.protocol_state()?;
        if !from.can_transition_to(to) {
            return Err(TransitionError::IllegalTransition {
                entity_id: self.core.id.clone(),
                from: from.to_string(),
                to: to.to_string(),
            });
        }
        self.core.transition(to.code(), now);
        Ok(())
    }

    /// Attach the agreement and enter AGREED in one step.
    pub fn transition_agreed(
        &mut self,
        agreement: ContractAgreement,
        now: DateTime<Utc>,
    ) -> Result<(), TransitionError> {
        if self.contract_agreement.is_some() {
            return Err(TransitionError::AgreementAlreadySet(self.core.id.clone()));
        }
        self.transition_to(ContractNegotiationState::Agreed, now)?;
        self.contract_agreement = Some(agreement);
        Ok(())
    }
}

/// Core fields followed by the negotiation specific ones.
const NEGOTIATION_FIELDS: &[&str] = &[
    "id",
    "state",
    "state_count",
    "state_timestamp",
    "pending",
    "error_detail",
    "created_at",
    "updated_at",
    "type",
    "correlation_id",
    "counter_party_id",
    "counter_party_address",
    "protocol",
    "contract_agreement.id",
    "contract_agreement.asset_id",
];

impl StatefulEntity for ContractNegotiation {
    const FIELDS: &'static [&'static str] = NEGOTIATION_FIELDS;

    fn core(&self) -> &EntityCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut EntityCore {
        &mut self.core
    }

    fn field(&self, path: &str) -> Option<Value> {
        let optional = |v: Option<&String>| v.cloned().map(Value::from).unwrap_or(Value::Null);
        match path {
            "type" => Some(Value::from(self.negotiation_type.as_str())),
            "correlation_id" => Some(optional(self.correlation_id.as_ref())),
            "counter_party_id" => Some(Value::from(self.counter_party_id.clone())),
            "counter_party_address" => Some(Value::from(self.counter_party_address.clone())),
            "protocol" => Some(Value::from(self.protocol.clone())),
            "contract_agreement.id" => {
                Some(optional(self.contract_agreement.as_ref().map(|a| &a.id)))
            }
            "contract_agreement.asset_id" => {
                Some(optional(self.contract_agreement.as_ref().map(|a| &a.asset_id)))
            }
            other => self.core.field(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::Policy;
    use ContractNegotiationState::*;

    fn negotiation() -> ContractNegotiation {
        ContractNegotiation::new(
            "n-1",
            NegotiationType::Consumer,
            "provider",
            "http://provider/dsp",
            "dsp",
            Utc::now(),
        )
    }

    fn agreement() -> ContractAgreement {
        ContractAgreement {
            id: "agreement-1".to_string(),
            provider_id: "provider".to_string(),
            consumer_id: "consumer".to_string(),
            asset_id: "asset-1".to_string(),
            policy: Policy::for_target("asset-1"),
            contract_signing_date: Utc::now(),
        }
    }

    #[test]
    fn codes_round_trip_for_every_state() {
        for state in ContractNegotiationState::ALL {
            assert_eq!(ContractNegotiationState::from_code(state.code()), Ok(state));
        }
        assert!(ContractNegotiationState::from_code(42).is_err());
    }

    #[test]
    fn offering_never_reaches_agreed_directly() {
        assert!(!Offering.can_transition_to(Agreed));
        assert!(!Offering.can_transition_to(Accepted));
        assert!(Offering.can_transition_to(Offered));
        assert!(Offered.can_transition_to(Offering));
    }

    #[test]
    fn every_non_terminal_state_may_terminate() {
        for state in ContractNegotiationState::ALL {
            if state.is_terminal() {
                assert!(!state.can_transition_to(Terminated));
                assert!(!state.can_transition_to(state));
            } else {
                assert!(state.can_transition_to(Terminating));
                assert!(state.can_transition_to(Terminated));
            }
        }
    }

    #[test]
    fn only_listed_edges_are_reachable() {
        // every legal edge either re-enters, terminates, or moves forward in
        // protocol order (OFFERED -> OFFERING is the only backward edge)
        for from in ContractNegotiationState::ALL {
            for to in ContractNegotiationState::ALL {
                if !from.can_transition_to(to) {
                    continue;
                }
                let forward = to.code() >= from.code();
                let reoffer = from == Offered && to == Offering;
                assert!(forward || reoffer, "{from} -> {to}");
            }
        }
    }

    #[test]
    fn illegal_transition_is_rejected_without_mutation() {
        let mut n = negotiation();
        let err = n.transition_to(Agreed, Utc::now()).unwrap_err();
        assert!(matches!(err, TransitionError::IllegalTransition { .. }));
        assert_eq!(n.protocol_state(), Ok(Initial));
    }

    #[test]
    fn agreement_is_set_once() {
        let mut n = negotiation();
        for state in [Requesting, Requested, Offered, Accepting, Accepted] {
            n.transition_to(state, Utc::now()).unwrap();
        }
        n.transition_agreed(agreement(), Utc::now()).unwrap();
        assert_eq!(n.contract_agreement().map(|a| a.id.as_str()), Some("agreement-1"));

        let mut other = agreement();
        other.id = "agreement-2".to_string();
        assert_eq!(
            n.transition_agreed(other, Utc::now()),
            Err(TransitionError::AgreementAlreadySet("n-1".to_string()))
        );

        n.transition_to(Terminated, Utc::now()).unwrap();
        assert_eq!(n.contract_agreement().map(|a| a.id.as_str()), Some("agreement-1"));
    }

    #[test]
    fn fields_cover_declared_paths() {
        let n = negotiation();
        for path in ContractNegotiation::FIELDS {
            assert!(n.field(path).is_some(), "missing field {path}");
        }
        assert_eq!(n.field("type"), Some(Value::from("CONSUMER")));
        assert_eq!(n.field("state"), Some(Value::from(50)));
        assert_eq!(n.field("unknown"), None);
    }
}
