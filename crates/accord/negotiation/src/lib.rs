//! Contract negotiation engine for Accord.
//!
//! A [`NegotiationEngine`] runs one polling loop per role over a shared
//! negotiation store:
//! - the consumer table drives INITIAL → REQUESTING → REQUESTED, the
//!   acceptance and the verification of the agreement
//! - the provider table drives the offer, the agreement and finalization
//!
//! Messages from the counterparty arrive through the [`ProtocolService`],
//! outside the loop. Every transition goes through the
//! [`TransitionFacade`], which persists the entity and then notifies the
//! registered [`NegotiationListener`]s over per-listener channels.

#![deny(unsafe_code)]
#![warn(rust_2018_idioms)]

pub mod config;
mod consumer;
mod engine;
pub mod error;
mod facade;
mod machine;
pub mod observe;
mod protocol;
mod provider;

pub use config::{EngineConfig, RetryStrategy};
pub use engine::{EngineComponents, NegotiationEngine};
pub use error::{ConfigError, NegotiationError, NegotiationResult};
pub use facade::TransitionFacade;
pub use machine::{NegotiationContext, NegotiationRole, PendingGuard, RemoteMessageDispatcher};
pub use observe::{ListenerError, NegotiationEvent, NegotiationListener, NegotiationObservable, TransitionKind};
pub use protocol::{ContractRequest, ProtocolService};
