// src/matching/scorer.rs
//! The weighted compatibility scorer.
//!
//! Six independently-computed factors, each normalized to [0,1], combined by
//! the fixed weights in `weights.rs`, scaled to 0-100 and labeled. Every
//! factor is total over missing fields (neutral scores, no failure path), so
//! one malformed candidate can never abort ranking of the rest.

use crate::matching::profiles::{CandidateProfile, ClientProfile, FactorScores, MatchResult};
use crate::matching::weights::MATCH_WEIGHTS;

/// Communication styles considered compatible without matching exactly,
/// checked in both directions.
const COMPATIBLE_STYLES: &[(&str, &str)] = &[
    ("formal", "professional"),
    ("casual", "friendly"),
    ("direct", "efficient"),
    ("collaborative", "consultative"),
];

/// Which candidate firm sizes fit which client organization size.
const SIZE_FIT: &[(&str, &[&str])] = &[
    ("startup", &["solo", "small"]),
    ("small", &["solo", "small", "medium"]),
    ("medium", &["small", "medium", "large"]),
    ("large", &["medium", "large", "big4"]),
    ("enterprise", &["large", "big4"]),
];

/// Score one candidate against one client.
pub fn score(client: &ClientProfile, candidate: &CandidateProfile) -> MatchResult {
    let factors = FactorScores {
        specialization: score_specialization(client, candidate),
        location: score_location(client, candidate),
        budget: score_budget(client, candidate),
        communication: score_communication(client, candidate),
        firm_size: score_firm_size(client, candidate),
        urgency: score_urgency(client, candidate),
    };

    let weighted = factors.specialization * MATCH_WEIGHTS.specialization
        + factors.location * MATCH_WEIGHTS.location
        + factors.budget * MATCH_WEIGHTS.budget
        + factors.communication * MATCH_WEIGHTS.communication
        + factors.firm_size * MATCH_WEIGHTS.firm_size
        + factors.urgency * MATCH_WEIGHTS.urgency;

    let total = (weighted * 100.0).round().clamp(0.0, 100.0) as u32;

    MatchResult {
        candidate: candidate.name.clone(),
        total,
        factors,
        recommendation: recommendation(total).to_string(),
    }
}

/// Rank candidates for a client: verified and active only, scored, stable
/// descending sort (equal scores keep their input order), first `limit`.
pub fn find_top_matches(
    client: &ClientProfile,
    candidates: &[CandidateProfile],
    limit: usize,
) -> Vec<MatchResult> {
    let mut results: Vec<MatchResult> = candidates
        .iter()
        .filter(|candidate| candidate.verified && candidate.active)
        .map(|candidate| score(client, candidate))
        .collect();

    results.sort_by(|a, b| b.total.cmp(&a.total));
    results.truncate(limit);
    results
}

/// Qualitative label thresholds on the 0-100 total.
pub fn recommendation(total: u32) -> &'static str {
    match total {
        90..=u32::MAX => "Excellent Match",
        80..=89 => "Very Good Match",
        70..=79 => "Good Match",
        60..=69 => "Fair Match",
        _ => "Poor Match",
    }
}

// ===== Factors =====

/// Fraction of the client's required services that substring-match some
/// candidate specialization, case-insensitive in either direction. Missing
/// requirements or an empty specialization list score zero.
fn score_specialization(client: &ClientProfile, candidate: &CandidateProfile) -> f64 {
    if client.required_services.is_empty() || candidate.specializations.is_empty() {
        return 0.0;
    }

    let specializations: Vec<String> = candidate
        .specializations
        .iter()
        .map(|s| s.to_lowercase())
        .collect();

    let matched = client
        .required_services
        .iter()
        .map(|service| service.to_lowercase())
        .filter(|service| {
            specializations
                .iter()
                .any(|spec| spec.contains(service.as_str()) || service.contains(spec.as_str()))
        })
        .count();

    matched as f64 / client.required_services.len() as f64
}

fn score_location(client: &ClientProfile, candidate: &CandidateProfile) -> f64 {
    if client.accepts_remote && candidate.accepts_remote {
        return 1.0;
    }

    if let (Some(location), Some(province)) = (&client.location, &candidate.province) {
        if !province.is_empty()
            && location.to_lowercase().contains(&province.to_lowercase())
        {
            return 0.9;
        }
    }

    if client.accepts_remote || candidate.accepts_remote {
        return 0.7;
    }

    0.3
}

/// Interval overlap of the two budget ranges, normalized by the average
/// range width and capped at 1.0. Disjoint ranges decay with the gap
/// relative to the client's ceiling. Any missing bound is neutral.
fn score_budget(client: &ClientProfile, candidate: &CandidateProfile) -> f64 {
    let (Some(client_min), Some(client_max), Some(candidate_min), Some(candidate_max)) = (
        client.budget_min,
        client.budget_max,
        candidate.budget_min,
        candidate.budget_max,
    ) else {
        return 0.5;
    };

    let overlap = client_max.min(candidate_max) - client_min.max(candidate_min);

    if overlap > 0.0 {
        let average_width = ((client_max - client_min) + (candidate_max - candidate_min)) / 2.0;
        if average_width <= 0.0 {
            return 1.0;
        }
        (overlap / average_width).min(1.0)
    } else {
        let distance = -overlap;
        if client_max <= 0.0 {
            return 0.0;
        }
        (1.0 - distance / client_max).max(0.0)
    }
}

fn score_communication(client: &ClientProfile, candidate: &CandidateProfile) -> f64 {
    let (Some(client_style), Some(candidate_style)) =
        (&client.communication_style, &candidate.communication_style)
    else {
        return 0.7;
    };

    let client_style = client_style.to_lowercase();
    let candidate_style = candidate_style.to_lowercase();

    if client_style == candidate_style {
        return 1.0;
    }

    let compatible = COMPATIBLE_STYLES.iter().any(|(a, b)| {
        (client_style == *a && candidate_style == *b)
            || (client_style == *b && candidate_style == *a)
    });

    if compatible {
        0.8
    } else {
        0.5
    }
}

fn score_firm_size(client: &ClientProfile, candidate: &CandidateProfile) -> f64 {
    let (Some(org_size), Some(firm_size)) = (&client.organization_size, &candidate.firm_size)
    else {
        return 0.7;
    };

    let org_size = org_size.to_lowercase();
    let firm_size = firm_size.to_lowercase();

    let fits = SIZE_FIT
        .iter()
        .find(|(size, _)| *size == org_size)
        .map(|(_, acceptable)| acceptable.contains(&firm_size.as_str()))
        .unwrap_or(false);

    if fits {
        1.0
    } else {
        0.4
    }
}

/// Urgent clients favor experienced candidates; flexible timelines score
/// well regardless of experience.
fn score_urgency(client: &ClientProfile, candidate: &CandidateProfile) -> f64 {
    let Some(urgency) = &client.urgency else {
        return 0.8;
    };

    match urgency.to_lowercase().as_str() {
        "urgent" | "immediate" => match candidate.years_experience {
            Some(years) if years >= 10.0 => 1.0,
            Some(years) if years >= 5.0 => 0.8,
            _ => 0.6,
        },
        "flexible" | "planning" => 0.9,
        _ => 0.8,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tax_client() -> ClientProfile {
        ClientProfile {
            required_services: vec!["Tax Planning".to_string()],
            location: Some("Toronto, ON".to_string()),
            accepts_remote: true,
            budget_min: Some(100.0),
            budget_max: Some(150.0),
            communication_style: Some("formal".to_string()),
            organization_size: Some("small".to_string()),
            urgency: Some("urgent".to_string()),
        }
    }

    fn seasoned_candidate() -> CandidateProfile {
        CandidateProfile {
            name: "Jane Doe CPA".to_string(),
            specializations: vec!["Tax Planning & Compliance".to_string()],
            province: Some("ON".to_string()),
            accepts_remote: true,
            budget_min: Some(140.0),
            budget_max: Some(200.0),
            communication_style: Some("professional".to_string()),
            firm_size: Some("small".to_string()),
            years_experience: Some(12.0),
            verified: true,
            active: true,
        }
    }

    #[test]
    fn specialization_substring_matches_either_direction() {
        let sub_score = score_specialization(&tax_client(), &seasoned_candidate());
        assert_eq!(sub_score, 1.0);

        // Reverse containment: broad requirement, narrow specialization.
        let mut client = tax_client();
        client.required_services = vec!["Corporate Tax Planning Services".to_string()];
        let mut candidate = seasoned_candidate();
        candidate.specializations = vec!["Tax Planning".to_string()];
        assert_eq!(score_specialization(&client, &candidate), 1.0);
    }

    #[test]
    fn budget_overlap_normalizes_by_average_width() {
        // Overlap [140,150] = 10; widths 50 and 60 average 55.
        let sub_score = score_budget(&tax_client(), &seasoned_candidate());
        assert!((sub_score - 10.0 / 55.0).abs() < 1e-9);
        assert!(sub_score > 0.0 && sub_score <= 1.0);
    }

    #[test]
    fn disjoint_budgets_decay_with_distance() {
        let mut candidate = seasoned_candidate();
        candidate.budget_min = Some(225.0);
        candidate.budget_max = Some(300.0);

        // Gap of 75 against a client ceiling of 150.
        let sub_score = score_budget(&tax_client(), &candidate);
        assert!((sub_score - 0.5).abs() < 1e-9);

        let mut missing = seasoned_candidate();
        missing.budget_max = None;
        assert_eq!(score_budget(&tax_client(), &missing), 0.5);
    }

    #[test]
    fn communication_pairs_are_checked_both_ways() {
        let client = tax_client();
        let candidate = seasoned_candidate();
        assert_eq!(score_communication(&client, &candidate), 0.8);

        let mut swapped_client = tax_client();
        swapped_client.communication_style = Some("professional".to_string());
        let mut swapped_candidate = seasoned_candidate();
        swapped_candidate.communication_style = Some("formal".to_string());
        assert_eq!(score_communication(&swapped_client, &swapped_candidate), 0.8);
    }

    #[test]
    fn recommendation_thresholds() {
        assert_eq!(recommendation(95), "Excellent Match");
        assert_eq!(recommendation(90), "Excellent Match");
        assert_eq!(recommendation(89), "Very Good Match");
        assert_eq!(recommendation(75), "Good Match");
        assert_eq!(recommendation(60), "Fair Match");
        assert_eq!(recommendation(59), "Poor Match");
    }

    #[test]
    fn malformed_candidate_still_scores_in_range() {
        let empty = CandidateProfile {
            name: "Blank".to_string(),
            verified: true,
            active: true,
            ..Default::default()
        };

        let result = score(&tax_client(), &empty);
        assert!(result.total <= 100);
        assert_eq!(result.factors.specialization, 0.0);

        // And it never poisons the ranking of the others.
        let ranked = find_top_matches(&tax_client(), &[empty, seasoned_candidate()], 10);
        assert_eq!(ranked.len(), 2);
        assert_eq!(ranked[0].candidate, "Jane Doe CPA");
    }

    #[test]
    fn ranking_is_deterministic_and_stable_on_ties() {
        let mut first = seasoned_candidate();
        first.name = "First".to_string();
        let mut second = seasoned_candidate();
        second.name = "Second".to_string();
        let candidates = vec![first, second];

        let run_a = find_top_matches(&tax_client(), &candidates, 10);
        let run_b = find_top_matches(&tax_client(), &candidates, 10);

        let names_a: Vec<_> = run_a.iter().map(|r| r.candidate.as_str()).collect();
        let names_b: Vec<_> = run_b.iter().map(|r| r.candidate.as_str()).collect();
        assert_eq!(names_a, names_b);
        // Equal scores preserve input order.
        assert_eq!(names_a, vec!["First", "Second"]);
        assert_eq!(run_a[0].total, run_a[1].total);
    }

    #[test]
    fn unverified_and_inactive_candidates_are_filtered() {
        let mut unverified = seasoned_candidate();
        unverified.verified = false;
        let mut inactive = seasoned_candidate();
        inactive.active = false;

        let ranked = find_top_matches(&tax_client(), &[unverified, inactive], 10);
        assert!(ranked.is_empty());
    }

    #[test]
    fn urgency_rewards_experience_only_when_urgent() {
        let client = tax_client();
        assert_eq!(score_urgency(&client, &seasoned_candidate()), 1.0);

        let mut junior = seasoned_candidate();
        junior.years_experience = Some(2.0);
        assert_eq!(score_urgency(&client, &junior), 0.6);

        let mut flexible = tax_client();
        flexible.urgency = Some("flexible".to_string());
        assert_eq!(score_urgency(&flexible, &junior), 0.9);

        let mut unspecified = tax_client();
        unspecified.urgency = None;
        assert_eq!(score_urgency(&unspecified, &junior), 0.8);
    }
}
