//! Offers, agreements and the usage policies they carry.
//!
//! Policy rules are kept as opaque JSON: evaluating them is not the engine's
//! concern, only carrying them faithfully between the parties.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Usage policy attached to an offer or agreement.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Policy {
    pub uid: Option<String>,
    #[serde(default)]
    pub permissions: Vec<Value>,
    #[serde(default)]
    pub prohibitions: Vec<Value>,
    #[serde(default)]
    pub obligations: Vec<Value>,
    pub target: Option<String>,
    pub assigner: Option<String>,
    pub assignee: Option<String>,
}

impl Policy {
    pub fn for_target(target: impl Into<String>) -> Self {
        Self {
            target: Some(target.into()),
            ..Default::default()
        }
    }

    pub fn with_permission(mut self, rule: Value) -> Self {
        self.permissions.push(rule);
        self
    }
}

/// A snapshot of what one party proposes. Never mutated once exchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContractOffer {
    pub id: String,
    pub asset_id: String,
    pub provider_id: String,
    pub policy: Policy,
}

impl ContractOffer {
    pub fn new(
        id: impl Into<String>,
        asset_id: impl Into<String>,
        provider_id: impl Into<String>,
        policy: Policy,
    ) -> Self {
        Self {
            id: id.into(),
            asset_id: asset_id.into(),
            provider_id: provider_id.into(),
            policy,
        }
    }
}

/// The agreed contract. Set once, at AGREED.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContractAgreement {
    pub id: String,
    pub provider_id: String,
    pub consumer_id: String,
    pub asset_id: String,
    pub policy: Policy,
    pub contract_signing_date: DateTime<Utc>,
}
