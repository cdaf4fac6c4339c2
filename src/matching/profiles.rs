// src/matching/profiles.rs
//! Matching inputs and outputs.
//!
//! Profiles are supplied per-request by the API layer, not persisted here;
//! every field that real-world intake forms leave blank is an Option and the
//! scorer is total over all of them.

use serde::{Deserialize, Serialize};

/// A business looking for an accountant.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClientProfile {
    #[serde(default)]
    pub required_services: Vec<String>,
    pub location: Option<String>,
    #[serde(default)]
    pub accepts_remote: bool,
    pub budget_min: Option<f64>,
    pub budget_max: Option<f64>,
    pub communication_style: Option<String>,
    pub organization_size: Option<String>,
    pub urgency: Option<String>,
}

/// An accountant profile under consideration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CandidateProfile {
    pub name: String,
    #[serde(default)]
    pub specializations: Vec<String>,
    pub province: Option<String>,
    #[serde(default)]
    pub accepts_remote: bool,
    pub budget_min: Option<f64>,
    pub budget_max: Option<f64>,
    pub communication_style: Option<String>,
    pub firm_size: Option<String>,
    pub years_experience: Option<f64>,
    #[serde(default)]
    pub verified: bool,
    #[serde(default)]
    pub active: bool,
}

/// The six normalized sub-scores, before weighting.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FactorScores {
    pub specialization: f64,
    pub location: f64,
    pub budget: f64,
    pub communication: f64,
    pub firm_size: f64,
    pub urgency: f64,
}

/// Scored fit between one client and one candidate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchResult {
    pub candidate: String,
    /// Weighted total on the 0-100 scale.
    pub total: u32,
    pub factors: FactorScores,
    pub recommendation: String,
}
