//! Engine assembly.

use crate::config::EngineConfig;
use crate::error::NegotiationResult;
use crate::facade::TransitionFacade;
use crate::machine::{NegotiationContext, NegotiationRole, PendingGuard, RemoteMessageDispatcher};
use crate::observe::{NegotiationListener, NegotiationObservable};
use crate::protocol::ProtocolService;
use accord_statemachine::{EntityRetryProcessFactory, StateMachineManager};
use accord_store::{
    ContractNegotiationStore, InMemoryStateEntityStore, PolicyArchive, StateEntityStore,
    StorePolicyArchive,
};
use accord_types::{Clock, ContractNegotiation, SystemClock};
use std::sync::Arc;
use tracing::info;

/// Collaborators injected into a [`NegotiationEngine`].
///
/// The engine never creates its store, so a store built by hand must lease
/// for `participant_id` over [`EngineConfig::lease_duration`].
/// [`EngineComponents::in_memory`] does this for the in-memory store.
pub struct EngineComponents<S> {
    pub store: Arc<S>,
    pub dispatcher: Arc<dyn RemoteMessageDispatcher>,
    pub listeners: Vec<Arc<dyn NegotiationListener>>,
    pub clock: Arc<dyn Clock>,
    pub pending_guard: PendingGuard,
}

impl<S> EngineComponents<S>
where
    S: ContractNegotiationStore + 'static,
{
    pub fn new(store: Arc<S>, dispatcher: Arc<dyn RemoteMessageDispatcher>) -> Self {
        Self {
            store,
            dispatcher,
            listeners: Vec::new(),
            clock: Arc::new(SystemClock),
            pending_guard: Arc::new(|_: &ContractNegotiation| false),
        }
    }

    pub fn with_listener(mut self, listener: Arc<dyn NegotiationListener>) -> Self {
        self.listeners.push(listener);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_pending_guard(mut self, guard: PendingGuard) -> Self {
        self.pending_guard = guard;
        self
    }
}

impl EngineComponents<InMemoryStateEntityStore<ContractNegotiation>> {
    /// An in-memory store leasing as `config.participant_id` for the
    /// configured lease duration, read through `clock`.
    pub fn in_memory(
        config: &EngineConfig,
        clock: Arc<dyn Clock>,
        dispatcher: Arc<dyn RemoteMessageDispatcher>,
    ) -> Self {
        let store = Arc::new(InMemoryStateEntityStore::new(
            config.participant_id.clone(),
            config.lease_duration(),
            Arc::clone(&clock),
        ));
        Self::new(store, dispatcher).with_clock(clock)
    }
}

/// One participant's negotiation engine: a consumer and a provider state
/// machine over the same store, plus the inbound protocol service.
pub struct NegotiationEngine {
    config: EngineConfig,
    store: Arc<dyn ContractNegotiationStore>,
    observable: Arc<NegotiationObservable>,
    protocol: Arc<ProtocolService>,
    policy_archive: Arc<dyn PolicyArchive>,
    consumer: StateMachineManager,
    provider: StateMachineManager,
}

impl NegotiationEngine {
    /// Validate `config` and wire the engine. Listener tasks are spawned
    /// here, so this must run inside a tokio runtime.
    pub fn new<S>(config: EngineConfig, components: EngineComponents<S>) -> NegotiationResult<Self>
    where
        S: ContractNegotiationStore + 'static,
    {
        config.validate()?;

        let store: Arc<dyn ContractNegotiationStore> = components.store.clone();
        let entities: Arc<dyn StateEntityStore<ContractNegotiation>> = components.store;
        let clock = components.clock;

        let mut observable = NegotiationObservable::new(config.observer.channel_capacity);
        for listener in components.listeners {
            observable.register(listener);
        }
        let observable = Arc::new(observable);

        let facade = Arc::new(TransitionFacade::new(
            Arc::clone(&store),
            Arc::clone(&observable),
            Arc::clone(&clock),
        ));
        let protocol = Arc::new(ProtocolService::new(
            Arc::clone(&store),
            Arc::clone(&facade),
            Arc::clone(&clock),
        ));
        let retry = EntityRetryProcessFactory::new(
            config.retry.limit,
            config.wait_strategy(),
            Arc::clone(&clock),
        );

        let context = Arc::new(NegotiationContext {
            participant_id: config.participant_id.clone(),
            callback_address: config.callback_address.clone(),
            store: Arc::clone(&store),
            entities,
            dispatcher: components.dispatcher,
            facade,
            retry,
            clock,
        });

        let consumer = Self::manager(&config, &context, NegotiationRole::Consumer, &components.pending_guard);
        let provider = Self::manager(&config, &context, NegotiationRole::Provider, &components.pending_guard);
        let policy_archive: Arc<dyn PolicyArchive> =
            Arc::new(StorePolicyArchive::new(Arc::clone(&store)));

        info!(
            participant_id = %config.participant_id,
            listeners = observable.listener_count(),
            "Negotiation engine created"
        );

        Ok(Self {
            config,
            store,
            observable,
            protocol,
            policy_archive,
            consumer,
            provider,
        })
    }

    fn manager(
        config: &EngineConfig,
        context: &Arc<NegotiationContext>,
        role: NegotiationRole,
        guard: &PendingGuard,
    ) -> StateMachineManager {
        role.processors(
            context,
            config.state_machine.batch_size,
            config.state_machine.max_concurrent,
            guard,
        )
        .into_iter()
        .fold(
            StateMachineManager::new(format!("{role}-negotiation"), config.iteration_wait()),
            StateMachineManager::processor,
        )
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn ContractNegotiationStore> {
        &self.store
    }

    pub fn protocol(&self) -> &Arc<ProtocolService> {
        &self.protocol
    }

    pub fn policy_archive(&self) -> &Arc<dyn PolicyArchive> {
        &self.policy_archive
    }

    /// Start both polling loops.
    pub async fn start(&self) {
        self.consumer.start().await;
        self.provider.start().await;
    }

    /// Stop both polling loops and drain queued listener events.
    pub async fn stop(&self) {
        self.consumer.stop().await;
        self.provider.stop().await;
        self.observable.flush().await;
    }

    /// One iteration of both state machines, outside the loop.
    pub async fn run_once(&self) -> usize {
        self.run_role_once(NegotiationRole::Consumer).await
            + self.run_role_once(NegotiationRole::Provider).await
    }

    pub async fn run_role_once(&self, role: NegotiationRole) -> usize {
        match role {
            NegotiationRole::Consumer => self.consumer.run_once().await,
            NegotiationRole::Provider => self.provider.run_once().await,
        }
    }

    /// Wait until listeners have seen every transition made so far.
    pub async fn flush_listeners(&self) {
        self.observable.flush().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use accord_types::{DispatchResult, ManualClock, ProtocolMessage};
    use async_trait::async_trait;
    use serde_json::{json, Value};

    struct Silent;

    #[async_trait]
    impl RemoteMessageDispatcher for Silent {
        async fn dispatch(&self, _: ProtocolMessage) -> DispatchResult<Value> {
            Ok(json!({}))
        }
    }

    #[tokio::test]
    async fn in_memory_components_use_the_configured_lease() {
        let mut config = EngineConfig {
            participant_id: "consumer".to_string(),
            ..Default::default()
        };
        config.lease.duration_ms = 5_000;
        let components =
            EngineComponents::in_memory(&config, Arc::new(ManualClock::default()), Arc::new(Silent));

        assert_eq!(components.store.lease_holder(), "consumer");
        assert_eq!(components.store.lease_duration(), chrono::Duration::seconds(5));

        let engine = NegotiationEngine::new(config, components).unwrap();
        assert_eq!(engine.config().lease.duration_ms, 5_000);
    }
}
