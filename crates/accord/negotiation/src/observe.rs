//! Transition listeners.
//!
//! Each registered listener gets its own bounded channel and subscriber task,
//! so a slow or failing listener never holds up the state machine or the
//! other listeners. Listener errors and panics are logged and dropped.

use accord_types::{ContractNegotiation, ContractNegotiationState};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::FutureExt;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tracing::{error, warn};

/// Failure reported by a listener.
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct ListenerError(pub String);

/// Which transition an event reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransitionKind {
    Initiated,
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

impl TransitionKind {
    /// Event for entering `state`. INITIAL is reported as `Initiated`.
    pub fn for_state(state: ContractNegotiationState) -> Self {
        use ContractNegotiationState as S;
        match state {
            S::Initial => Self::Initiated,
            S::Requesting => Self::Requesting,
            S::Requested => Self::Requested,
            S::Offering => Self::Offering,
            S::Offered => Self::Offered,
            S::Accepting => Self::Accepting,
            S::Accepted => Self::Accepted,
            S::Agreeing => Self::Agreeing,
            S::Agreed => Self::Agreed,
            S::Verifying => Self::Verifying,
            S::Verified => Self::Verified,
            S::Finalizing => Self::Finalizing,
            S::Finalized => Self::Finalized,
            S::Terminating => Self::Terminating,
            S::Terminated => Self::Terminated,
        }
    }
}

impl fmt::Display for TransitionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// A persisted transition, carrying the post-transition entity.
#[derive(Debug, Clone)]
pub struct NegotiationEvent {
    pub kind: TransitionKind,
    pub negotiation: ContractNegotiation,
    pub timestamp: DateTime<Utc>,
}

/// Callbacks for negotiation transitions. Every method defaults to a no-op.
#[async_trait]
pub trait NegotiationListener: Send + Sync {
    async fn initiated(&self, _negotiation: &ContractNegotiation) -> Result<(), ListenerError> {
        Ok(())
    }

    async fn requesting(&self, _negotiation: &ContractNegotiation) -> Result<(), ListenerError> {
        Ok(())
    }

    async fn requested(&self, _negotiation: &ContractNegotiation) -> Result<(), ListenerError> {
        Ok(())
    }

    async fn offering(&self, _negotiation: &ContractNegotiation) -> Result<(), ListenerError> {
        Ok(())
    }

    async fn offered(&self, _negotiation: &ContractNegotiation) -> Result<(), ListenerError> {
        Ok(())
    }

    async fn accepting(&self, _negotiation: &ContractNegotiation) -> Result<(), ListenerError> {
        Ok(())
    }

    async fn accepted(&self, _negotiation: &ContractNegotiation) -> Result<(), ListenerError> {
        Ok(())
    }

    async fn agreeing(&self, _negotiation: &ContractNegotiation) -> Result<(), ListenerError> {
        Ok(())
    }

    async fn agreed(&self, _negotiation: &ContractNegotiation) -> Result<(), ListenerError> {
        Ok(())
    }

    async fn verifying(&self, _negotiation: &ContractNegotiation) -> Result<(), ListenerError> {
        Ok(())
    }

    async fn verified(&self, _negotiation: &ContractNegotiation) -> Result<(), ListenerError> {
        Ok(())
    }

    async fn finalizing(&self, _negotiation: &ContractNegotiation) -> Result<(), ListenerError> {
        Ok(())
    }

    async fn finalized(&self, _negotiation: &ContractNegotiation) -> Result<(), ListenerError> {
        Ok(())
    }

    async fn terminating(&self, _negotiation: &ContractNegotiation) -> Result<(), ListenerError> {
        Ok(())
    }

    async fn terminated(&self, _negotiation: &ContractNegotiation) -> Result<(), ListenerError> {
        Ok(())
    }
}

async fn deliver(
    listener: &dyn NegotiationListener,
    event: &NegotiationEvent,
) -> Result<(), ListenerError> {
    let n = &event.negotiation;
    match event.kind {
        TransitionKind::Initiated => listener.initiated(n).await,
        TransitionKind::Requesting => listener.requesting(n).await,
        TransitionKind::Requested => listener.requested(n).await,
        TransitionKind::Offering => listener.offering(n).await,
        TransitionKind::Offered => listener.offered(n).await,
        TransitionKind::Accepting => listener.accepting(n).await,
        TransitionKind::Accepted => listener.accepted(n).await,
        TransitionKind::Agreeing => listener.agreeing(n).await,
        TransitionKind::Agreed => listener.agreed(n).await,
        TransitionKind::Verifying => listener.verifying(n).await,
        TransitionKind::Verified => listener.verified(n).await,
        TransitionKind::Finalizing => listener.finalizing(n).await,
        TransitionKind::Finalized => listener.finalized(n).await,
        TransitionKind::Terminating => listener.terminating(n).await,
        TransitionKind::Terminated => listener.terminated(n).await,
    }
}

enum Delivery {
    Event(Box<NegotiationEvent>),
    Flush(oneshot::Sender<()>),
}

/// Fans transition events out to the registered listeners.
pub struct NegotiationObservable {
    channel_capacity: usize,
    subscribers: Vec<mpsc::Sender<Delivery>>,
}

impl NegotiationObservable {
    pub fn new(channel_capacity: usize) -> Self {
        Self {
            channel_capacity: channel_capacity.max(1),
            subscribers: Vec::new(),
        }
    }

    /// Register a listener and spawn its subscriber task.
    ///
    /// Must be called within a tokio runtime.
    pub fn register(&mut self, listener: Arc<dyn NegotiationListener>) {
        let (tx, mut rx) = mpsc::channel::<Delivery>(self.channel_capacity);
        tokio::spawn(async move {
            while let Some(delivery) = rx.recv().await {
                match delivery {
                    Delivery::Event(event) => {
                        let result = AssertUnwindSafe(deliver(listener.as_ref(), &event))
                            .catch_unwind()
                            .await;
                        match result {
                            Ok(Ok(())) => {}
                            Ok(Err(e)) => warn!(
                                negotiation_id = %event.negotiation.core.id,
                                transition = %event.kind,
                                error = %e,
                                "Listener failed"
                            ),
                            Err(_) => error!(
                                negotiation_id = %event.negotiation.core.id,
                                transition = %event.kind,
                                "Listener panicked"
                            ),
                        }
                    }
                    Delivery::Flush(done) => {
                        let _ = done.send(());
                    }
                }
            }
        });
        self.subscribers.push(tx);
    }

    pub fn listener_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Queue `kind` for every listener.
    pub async fn notify(&self, kind: TransitionKind, negotiation: &ContractNegotiation) {
        if self.subscribers.is_empty() {
            return;
        }
        let event = NegotiationEvent {
            kind,
            negotiation: negotiation.clone(),
            timestamp: Utc::now(),
        };
        for subscriber in &self.subscribers {
            if subscriber
                .send(Delivery::Event(Box::new(event.clone())))
                .await
                .is_err()
            {
                warn!(transition = %kind, "Listener channel closed, event dropped");
            }
        }
    }

    /// Wait until every listener has handled all events queued so far.
    pub async fn flush(&self) {
        for subscriber in &self.subscribers {
            let (tx, rx) = oneshot::channel();
            if subscriber.send(Delivery::Flush(tx)).await.is_ok() {
                let _ = rx.await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use accord_types::NegotiationType;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<(TransitionKind, String)>>,
    }

    #[async_trait]
    impl NegotiationListener for Recorder {
        async fn requested(&self, n: &ContractNegotiation) -> Result<(), ListenerError> {
            self.seen
                .lock()
                .unwrap()
                .push((TransitionKind::Requested, n.core.id.clone()));
            Ok(())
        }

        async fn terminated(&self, n: &ContractNegotiation) -> Result<(), ListenerError> {
            self.seen
                .lock()
                .unwrap()
                .push((TransitionKind::Terminated, n.core.id.clone()));
            Ok(())
        }
    }

    struct Broken;

    #[async_trait]
    impl NegotiationListener for Broken {
        async fn requested(&self, _n: &ContractNegotiation) -> Result<(), ListenerError> {
            Err(ListenerError("unavailable".to_string()))
        }

        async fn terminated(&self, _n: &ContractNegotiation) -> Result<(), ListenerError> {
            panic!("listener bug");
        }
    }

    fn negotiation(id: &str) -> ContractNegotiation {
        ContractNegotiation::new(
            id,
            NegotiationType::Consumer,
            "provider",
            "http://provider",
            "dsp",
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn delivers_in_order_despite_failing_listeners() {
        let recorder = Arc::new(Recorder::default());
        let mut observable = NegotiationObservable::new(8);
        observable.register(Arc::new(Broken));
        observable.register(recorder.clone());

        observable.notify(TransitionKind::Requested, &negotiation("a")).await;
        observable.notify(TransitionKind::Terminated, &negotiation("a")).await;
        observable.notify(TransitionKind::Offered, &negotiation("a")).await;
        observable.notify(TransitionKind::Requested, &negotiation("b")).await;
        observable.flush().await;

        let seen = recorder.seen.lock().unwrap().clone();
        assert_eq!(
            seen,
            vec![
                (TransitionKind::Requested, "a".to_string()),
                (TransitionKind::Terminated, "a".to_string()),
                (TransitionKind::Requested, "b".to_string()),
            ]
        );
    }

    #[test]
    fn initial_state_maps_to_initiated() {
        assert_eq!(
            TransitionKind::for_state(ContractNegotiationState::Initial),
            TransitionKind::Initiated
        );
        assert_eq!(
            TransitionKind::for_state(ContractNegotiationState::Finalized),
            TransitionKind::Finalized
        );
    }
}
