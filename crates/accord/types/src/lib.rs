//! Domain types for Accord.
//!
//! This crate defines the vocabulary shared by the store, the state machine
//! and the negotiation engine:
//! - [`StatefulEntity`] and [`EntityCore`]: the leased, stateful record contract
//! - [`Lease`]: time-bounded exclusive claim on an entity
//! - [`ContractNegotiation`] and its protocol states
//! - [`ProtocolMessage`]: outbound/inbound counterparty messages
//! - [`Criterion`] and [`QuerySpec`]: store filter expressions
//! - [`DispatchFailure`]: classification of failed sends
//!
//! Nothing here performs I/O.

#![deny(unsafe_code)]
#![warn(rust_2018_idioms)]

pub mod clock;
pub mod dispatch;
pub mod entity;
pub mod error;
pub mod message;
pub mod negotiation;
pub mod policy;
pub mod query;

pub use clock::{Clock, ManualClock, SystemClock};
pub use dispatch::{DispatchFailure, DispatchResult, FailureKind};
pub use entity::{EntityCore, Lease, StatefulEntity};
pub use error::{QueryError, TransitionError};
pub use message::{MessagePayload, NegotiationEventType, ProtocolMessage};
pub use negotiation::{ContractNegotiation, ContractNegotiationState, NegotiationType};
pub use policy::{ContractAgreement, ContractOffer, Policy};
pub use query::{Criterion, Operator, QuerySpec, SortOrder};
