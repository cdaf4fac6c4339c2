// src/matching/mod.rs
//! Client/candidate compatibility scoring.

pub mod profiles;
pub mod scorer;
pub mod weights;

pub use profiles::{CandidateProfile, ClientProfile, FactorScores, MatchResult};
pub use scorer::{find_top_matches, recommendation, score};
pub use weights::MATCH_WEIGHTS;
