//! Leased state-machine processing for Accord.
//!
//! A [`StateMachineManager`] runs a polling loop over a set of
//! [`Processor`]s. Each processor leases a batch of entities in one state,
//! applies the state's action and releases every lease it took, whatever the
//! action's outcome. Actions that talk to a counterparty go through the
//! [`EntityRetryProcessFactory`], which bounds retries by `state_count`.

#![deny(unsafe_code)]
#![warn(rust_2018_idioms)]

mod manager;
mod processor;
mod retry;
mod wait;

pub use manager::StateMachineManager;
pub use processor::{EntityAction, Processor, ProcessorImpl};
pub use retry::{EntityRetryProcessFactory, RetryOutcome};
pub use wait::{ExponentialWaitStrategy, FixedWaitStrategy, NoWaitStrategy, WaitStrategy};
