use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::id::{AgentId, Family};

/// How an agent's initial model state came to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Lineage {
    /// Freshly initialized, no parents.
    Fresh,
    /// Crossover child of two reference-pool parents.
    Crossover {
        main: AgentId,
        secondary: AgentId,
    },
}

/// Durable metadata stored beside each agent checkpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentMeta {
    pub family: Family,
    /// Generations survived; mirrors the age encoded in the agent's id.
    pub age: u32,
    /// Learners train, reference copies are frozen.
    pub trainable: bool,
    pub lineage: Lineage,
    pub created_at: DateTime<Utc>,
}
