//! # Redis Rule Adapter
//!
//! Persists access-control rules in a single Redis list and loads them back
//! into a policy model, with server-side scripted updates and filtered loads.

// Core modules
pub mod adapter;
pub mod config;
pub mod error;
pub mod model;
pub mod pattern;
pub mod rule_converter;
pub mod storage;
pub mod types;

// Re-export commonly used types
pub use adapter::RedisAdapter;
pub use config::{AdapterConfig, Network, PoolConfig, DEFAULT_KEY};
pub use error::{AdapterError, AdapterResult};
pub use model::{PolicyModel, PolicySink};
pub use rule_converter::RuleRecord;
pub use storage::{ConnectionPool, ConnectionProvider, MemoryStore, SharedConnection};
pub use types::{PolicyFilter, PolicyRule, Section};
