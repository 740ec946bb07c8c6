//! Store trait definitions

use crate::error::StoreResult;
use accord_types::{ContractAgreement, ContractNegotiation, Criterion, QuerySpec, StatefulEntity};
use async_trait::async_trait;

/// Storage for leased, stateful entities.
///
/// A store handle acts on behalf of one lease holder.
#[async_trait]
pub trait StateEntityStore<E: StatefulEntity>: Send + Sync {
    /// Lease up to `max` unleased entities matching all `criteria`.
    ///
    /// Entities whose lease has expired count as unleased. Candidates are
    /// returned oldest `state_timestamp` first and are leased to this holder
    /// before the call returns.
    async fn next_not_leased(&self, max: usize, criteria: &[Criterion]) -> StoreResult<Vec<E>>;

    /// Get an entity by ID, ignoring leases
    async fn find_by_id(&self, id: &str) -> StoreResult<Option<E>>;

    /// Get an entity by ID and lease it to this holder.
    ///
    /// Fails with `NotFound` or `LeaseConflict`.
    async fn find_by_id_and_lease(&self, id: &str) -> StoreResult<E>;

    /// Create or update an entity and release this holder's lease on it.
    ///
    /// Rejected with `LeaseConflict` while another holder's lease is live.
    async fn save(&self, entity: E) -> StoreResult<()>;

    /// Release this holder's lease without changing the entity.
    async fn break_lease(&self, entity: &E) -> StoreResult<()>;
}

/// Negotiation-specific lookups.
#[async_trait]
pub trait ContractNegotiationStore: StateEntityStore<ContractNegotiation> {
    /// Find a negotiation by the counterparty's identifier for it
    async fn find_for_correlation_id(
        &self,
        correlation_id: &str,
    ) -> StoreResult<Option<ContractNegotiation>>;

    /// Filter, sort and page negotiations
    async fn query_negotiations(&self, spec: &QuerySpec) -> StoreResult<Vec<ContractNegotiation>>;

    /// Find the agreement with the given ID on any negotiation
    async fn find_contract_agreement(
        &self,
        agreement_id: &str,
    ) -> StoreResult<Option<ContractAgreement>>;
}
