//! Agent identity, metadata, and checkpoint storage for the Evoker project.
//!
//! An *agent* is one poker decision maker under population management. This
//! crate defines how agents are named, what durable metadata travels with
//! each checkpoint, the per-generation lifemark history that drives pruning,
//! and the [`AgentStore`] capability that the scheduler uses to create,
//! copy, cross over, and delete agents.

pub use self::{id::*, lifemark::*, meta::*, profile::*, store::*};

pub mod id;
pub mod lifemark;
pub mod meta;
pub mod profile;
pub mod store;
