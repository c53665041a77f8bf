//! Learning subsystem
//!
//! Two complementary learners adapt retrieval from trajectory feedback:
//! - Pattern-level weights with EWC++ drift protection ([`sona`])
//! - Entry-level Q-values with two-phase ranking ([`memrl`])

pub mod memrl;
pub mod sona;
mod trajectory;

pub use memrl::{
    MemRlConfig, MemRlEngine, MemrlFeedbackOutcome, MemrlQueryRecord, RankedCandidate,
};
pub use sona::{
    DriftStatus, LearnReport, MaintenanceReport, PatternWeight, SonaConfig, SonaEngine,
    WeightCheckpoint,
};
pub use trajectory::Trajectory;
