//! Lookup of agreed usage policies.

use crate::error::StoreResult;
use crate::traits::ContractNegotiationStore;
use accord_types::{ContractNegotiationState, Criterion, Operator, Policy, QuerySpec};
use async_trait::async_trait;
use std::sync::Arc;

/// Resolves the policy governing a contract agreement.
#[async_trait]
pub trait PolicyArchive: Send + Sync {
    /// Policy of the agreement, once its negotiation is FINALIZED.
    async fn find_policy_for_contract(&self, agreement_id: &str) -> StoreResult<Option<Policy>>;
}

/// [`PolicyArchive`] backed by the negotiation store.
pub struct StorePolicyArchive<S: ?Sized> {
    store: Arc<S>,
}

impl<S: ?Sized> StorePolicyArchive<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl<S> PolicyArchive for StorePolicyArchive<S>
where
    S: ContractNegotiationStore + ?Sized,
{
    async fn find_policy_for_contract(&self, agreement_id: &str) -> StoreResult<Option<Policy>> {
        let spec = QuerySpec::default()
            .filter(Criterion::new("contract_agreement.id", Operator::Eq, agreement_id))
            .filter(Criterion::has_state(ContractNegotiationState::Finalized.code()))
            .page(0, 1);
        let found = self.store.query_negotiations(&spec).await?;
        Ok(found
            .into_iter()
            .next()
            .and_then(|n| n.contract_agreement().map(|a| a.policy.clone())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{InMemoryStateEntityStore, StateEntityStore};
    use accord_types::{
        ContractAgreement, ContractNegotiation, ManualClock, NegotiationType, StatefulEntity,
    };
    use chrono::{Duration, Utc};
    use serde_json::json;

    fn agreed(id: &str, agreement_id: &str, finalize: bool) -> ContractNegotiation {
        let now = Utc::now();
        let mut n = ContractNegotiation::new(
            id,
            NegotiationType::Provider,
            "consumer",
            "http://consumer",
            "dsp",
            now,
        );
        for state in [
            ContractNegotiationState::Requested,
            ContractNegotiationState::Offered,
            ContractNegotiationState::Accepted,
        ] {
            n.transition_to(state, now).unwrap();
        }
        let policy = Policy::for_target("asset-1").with_permission(json!({ "action": "use" }));
        n.transition_agreed(
            ContractAgreement {
                id: agreement_id.to_string(),
                provider_id: "provider".to_string(),
                consumer_id: "consumer".to_string(),
                asset_id: "asset-1".to_string(),
                policy,
                contract_signing_date: now,
            },
            now,
        )
        .unwrap();
        if finalize {
            n.transition_to(ContractNegotiationState::Verified, now).unwrap();
            n.transition_to(ContractNegotiationState::Finalized, now).unwrap();
        }
        n
    }

    #[tokio::test]
    async fn only_finalized_agreements_are_archived() {
        let store = Arc::new(InMemoryStateEntityStore::new(
            "worker",
            Duration::seconds(60),
            Arc::new(ManualClock::default()),
        ));
        store.save(agreed("n-1", "agreement-1", true)).await.unwrap();
        store.save(agreed("n-2", "agreement-2", false)).await.unwrap();
        let archive = StorePolicyArchive::new(store.clone());

        let policy = archive.find_policy_for_contract("agreement-1").await.unwrap();
        assert_eq!(policy.and_then(|p| p.target), Some("asset-1".to_string()));
        assert!(archive
            .find_policy_for_contract("agreement-2")
            .await
            .unwrap()
            .is_none());
        assert!(archive.find_policy_for_contract("unknown").await.unwrap().is_none());

        let agreement = store.find_contract_agreement("agreement-2").await.unwrap();
        assert_eq!(agreement.map(|a| a.id), Some("agreement-2".to_string()));
        assert_eq!(
            store.find_by_id("n-2").await.unwrap().map(|n| n.state()),
            Some(ContractNegotiationState::Agreed.code())
        );
    }
}
