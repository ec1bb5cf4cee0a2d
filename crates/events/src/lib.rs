//! Event system for the workflow orchestrator
//!
//! This crate provides the event bus and event types used to announce
//! workflow progress to UI and other observers.

mod bus;
mod types;

pub use bus::{EventBus, Listener, Subscription};
pub use types::*;
