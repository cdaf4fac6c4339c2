// src/identity.rs
//! Stable dedup keys for scraped professionals.
//!
//! Every scraper funnels parsed names through here before touching the
//! database. The key is a digest over (normalized name, province) so that
//! honorifics, initials, punctuation and casing collapse to one identity
//! while same-named people in different provinces stay distinct.

use sha2::{Digest, Sha256};

/// Title tokens that carry no identity information.
const HONORIFICS: &[&str] = &["mr", "mrs", "ms", "dr", "prof", "mme", "me"];

/// Normalize a person's name for identity purposes: lower-case, split on
/// anything non-alphabetic, drop honorifics and single-letter initials,
/// concatenate what remains. "John D. SMITH" and "john smith" normalize
/// identically.
pub fn normalize_name(name: &str) -> String {
    name.to_lowercase()
        .split(|c: char| !c.is_alphabetic())
        .filter(|token| token.len() > 1 && !HONORIFICS.contains(token))
        .collect()
}

/// Compute the identity key for a (full name, province) pair.
///
/// Deterministic SHA-256 hex digest. The province is part of the input so
/// two John Smiths in ON and BC never share a key.
pub fn identity_hash(full_name: &str, province: &str) -> String {
    let normalized = format!(
        "{}|{}",
        normalize_name(full_name),
        province.trim().to_lowercase()
    );

    let mut hasher = Sha256::new();
    hasher.update(normalized.as_bytes());
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_punctuation_case_and_initials() {
        assert_eq!(normalize_name("John D. SMITH"), "johnsmith");
        assert_eq!(normalize_name("O'Brien, Mary-Anne"), "brienmaryanne");
        assert_eq!(normalize_name("Dr. Jane Doe"), "janedoe");
    }

    #[test]
    fn honorific_and_case_variants_collapse() {
        assert_eq!(
            identity_hash("John D. SMITH", "ON"),
            identity_hash("john smith", "ON")
        );
        assert_eq!(
            identity_hash("Mrs. Jane Doe", "QC"),
            identity_hash("JANE DOE", "QC")
        );
    }

    #[test]
    fn province_keeps_same_names_apart() {
        assert_ne!(
            identity_hash("John Smith", "ON"),
            identity_hash("John Smith", "BC")
        );
        assert_eq!(
            identity_hash("John Smith", "on"),
            identity_hash("John Smith", " ON ")
        );
    }

    #[test]
    fn hash_is_deterministic_hex() {
        let a = identity_hash("Alice Tremblay", "QC");
        let b = identity_hash("Alice Tremblay", "QC");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
