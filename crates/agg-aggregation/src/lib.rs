//! Aggregation Engine - onboarding, discovery and batched actions
//!
//! [`Aggregator`] is the single entry point. Its operations are spread
//! over the modules below as `impl Aggregator` blocks:
//!
//! - `onboarding` / `offboarding`: adding and removing plugins and devices
//! - `sources`, `connection_methods`, `aggregates`: catalogue reads and updates
//! - `rediscovery`, `system_state`: refreshing already onboarded inventory
//! - `reset`: Reset and SetDefaultBootOrder fanned out with [`batch`]
//!
//! Plugin calls go through [`contact::PluginContact`] over the
//! [`client::PluginClient`] seam; the resource graph walk lives in
//! [`traversal`].

pub mod admission;
pub mod aggregates;
pub mod aggregator;
pub mod batch;
pub mod cipher;
pub mod client;
pub mod connection_methods;
pub mod contact;
pub mod events;
pub mod failure;
pub mod health;
pub mod offboarding;
pub mod onboarding;
pub mod rediscovery;
pub mod reset;
pub mod sources;
pub mod system_state;
pub mod traversal;
pub mod validation;

#[cfg(test)]
mod testing;

pub use aggregator::{Aggregator, TaskInfo};
pub use batch::{run_batched, BatchOutcome};
pub use cipher::{CredentialCipher, Pbkdf2AesGcmCipher};
pub use client::{PluginClient, ReqwestPluginClient};
pub use events::{BroadcastPublisher, EventPublisher, EventType, PublishedEvent};
pub use failure::Failure;
pub use health::{PluginHealthChecker, PluginHealthMonitor};
pub use reset::SystemAction;
pub use system_state::SystemStateUpdate;
