//! Lease-bearing entity store for Accord.
//!
//! The store is the only shared mutable resource of the engine. Claiming work
//! is an atomic "lease the next N matching entities" operation, and saving an
//! entity releases the lease held by the saving worker.
//!
//! [`InMemoryStateEntityStore`] is the reference implementation of the
//! contract; any persistent backend must behave the same way.

#![deny(unsafe_code)]
#![warn(rust_2018_idioms)]

mod archive;
mod error;
mod memory;
pub mod resolver;
mod traits;

pub use archive::{PolicyArchive, StorePolicyArchive};
pub use error::{StoreError, StoreResult};
pub use memory::InMemoryStateEntityStore;
pub use traits::{ContractNegotiationStore, StateEntityStore};
