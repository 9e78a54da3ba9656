//! In-process publish/subscribe broker.
//!
//! Topics are split into append-only partition logs. Consumers join groups;
//! each group reads every record once, and within a group each partition is
//! owned by exactly one member.

pub mod broker;
pub mod codec;
pub mod config;
pub mod consumer;
mod delivery;
pub mod filter;
pub mod group;
pub mod log;
pub mod partitioner;
pub mod producer;
pub mod topics;

pub use broker::Broker;
pub use codec::*;
pub use config::*;
pub use consumer::*;
pub use producer::*;
pub use topics::*;
