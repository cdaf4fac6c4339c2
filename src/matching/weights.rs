// src/matching/weights.rs

/// Fixed factor weights for the compatibility score. These are documented
/// constants, not tunables: they are not learned and not configurable at
/// runtime.
pub const MATCH_WEIGHTS: Weights = Weights {
    specialization: 0.35,
    location: 0.20,
    budget: 0.15,
    communication: 0.12,
    firm_size: 0.10,
    urgency: 0.08,
};

#[derive(Debug, Clone, Copy)]
pub struct Weights {
    pub specialization: f64,
    pub location: f64,
    pub budget: f64,
    pub communication: f64,
    pub firm_size: f64,
    pub urgency: f64,
}

impl Weights {
    pub fn sum(&self) -> f64 {
        self.specialization
            + self.location
            + self.budget
            + self.communication
            + self.firm_size
            + self.urgency
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn weights_sum_to_one() {
        assert!((MATCH_WEIGHTS.sum() - 1.0).abs() < 1e-9);
    }
}
