//! Broker clients and the shared agent runtime for HemoStat
//!
//! The broker is the only shared mutable state in the system: a pub/sub bus
//! plus a keyed store with TTL. Agents are otherwise stateless and resume
//! from the broker after a restart. `RedisBroker` is the production client;
//! `MemoryBroker` backs tests and single-process deployments.

pub mod agent;
pub mod broker;
pub mod memory;
pub mod redis;

pub use agent::{run_dispatcher, AgentContext, MessageHandler};
pub use broker::{get_json, push_json, set_json, Broker};
pub use memory::MemoryBroker;
pub use redis::RedisBroker;
