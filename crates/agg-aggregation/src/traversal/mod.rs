//! Resource graph traversal
//!
//! A [`Discovery`] walks the resources a plugin exposes for one device,
//! starting from the Systems, inventory, Chassis and Managers roots. Keys are
//! namespaced by device UUID (see [`keys`]), each link is fetched at most
//! once per run, and progress is shared out along the way.

pub mod context;
pub mod engine;
pub mod keys;
pub mod links;
pub mod registries;
pub mod search_index;

pub use context::{Progress, TraversalContext};
pub use engine::Discovery;
pub use keys::{key_formation, resource_name, rewrite_with_uuid};
