//! Core types and utilities for the resource aggregation service
//!
//! # Modules
//!
//! - `config`: Environment loading and typed service configuration
//! - `error`: Error types and Result alias
//! - `response`: Status messages, error bodies and `RpcResponse`
//! - `types`: Persisted data model (Plugin, Target, AggregationSource, ...)

pub mod config;
pub mod error;
pub mod response;
pub mod types;

pub use config::AggregationConfig;
pub use error::{Error, Result};
pub use response::{ErrorArgs, RpcResponse, StatusMessage};
pub use types::*;
