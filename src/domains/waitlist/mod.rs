//! Waitlist domain: entries, scoring, and candidate matching.

pub mod matcher;
pub mod models;
pub mod scoring;
pub mod store;

pub use matcher::{find_candidates, RankedCandidate};
pub use scoring::ScoreWeights;
pub use store::PostgresWaitlistStore;
