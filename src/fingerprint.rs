// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

//! Session fingerprinting for scan deduplication.
//!
//! A fingerprint is a SHA-256 over the canonical configuration plus the
//! sorted set of discovered item identities (slug + version). Scores are
//! deliberately excluded: a rescore of the same catalog state must not
//! change a session's identity.

use sha2::{Digest, Sha256};

use crate::types::{ScanConfig, ScanItem};

/// Compute the deterministic fingerprint of a completed session.
///
/// Item order does not matter; identities are sorted before hashing. An
/// empty result set still fingerprints deterministically, so two empty
/// scans with identical configuration merge like any other pair.
pub fn fingerprint(config: &ScanConfig, items: &[ScanItem]) -> String {
    let mut identities: Vec<String> = items
        .iter()
        .map(|item| format!("{}@{}", item.slug, item.version))
        .collect();
    identities.sort();

    let mut hasher = Sha256::new();
    // ScanConfig serializes with a stable field order, and defaults are
    // normalized at construction, so the JSON form is canonical.
    let config_json =
        serde_json::to_string(config).expect("ScanConfig serialization is infallible");
    hasher.update(config_json.as_bytes());
    for identity in &identities {
        hasher.update(b"\n");
        hasher.update(identity.as_bytes());
    }

    hex_encode(&hasher.finalize())
}

fn hex_encode(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AnalysisStatus, ScanConfig};

    fn item(slug: &str, version: &str, score: u8) -> ScanItem {
        ScanItem {
            session_id: 1,
            slug: slug.to_string(),
            name: slug.to_string(),
            version: version.to_string(),
            score,
            installations: 5000,
            days_since_update: 100,
            tested_wp_version: "6.4".into(),
            author_trusted: false,
            is_risky_category: false,
            is_user_facing: false,
            is_duplicate: false,
            risk_tags: vec![],
            security_flags: vec![],
            feature_flags: vec![],
            download_link: String::new(),
            analysis: AnalysisStatus::None,
            findings: None,
        }
    }

    #[test]
    fn test_fingerprint_deterministic() {
        let config = ScanConfig::default();
        let items = vec![item("a-plugin", "1.0", 10), item("b-plugin", "2.1", 60)];

        assert_eq!(fingerprint(&config, &items), fingerprint(&config, &items));
    }

    #[test]
    fn test_fingerprint_order_independent() {
        let config = ScanConfig::default();
        let forward = vec![item("a-plugin", "1.0", 10), item("b-plugin", "2.1", 60)];
        let reversed = vec![item("b-plugin", "2.1", 60), item("a-plugin", "1.0", 10)];

        assert_eq!(
            fingerprint(&config, &forward),
            fingerprint(&config, &reversed)
        );
    }

    #[test]
    fn test_fingerprint_ignores_scores() {
        let config = ScanConfig::default();
        let low = vec![item("a-plugin", "1.0", 10)];
        let high = vec![item("a-plugin", "1.0", 95)];

        assert_eq!(fingerprint(&config, &low), fingerprint(&config, &high));
    }

    #[test]
    fn test_fingerprint_sensitive_to_version() {
        let config = ScanConfig::default();
        let v1 = vec![item("a-plugin", "1.0", 10)];
        let v2 = vec![item("a-plugin", "1.1", 10)];

        assert_ne!(fingerprint(&config, &v1), fingerprint(&config, &v2));
    }

    #[test]
    fn test_fingerprint_sensitive_to_config() {
        let items = vec![item("a-plugin", "1.0", 10)];
        let defaults = ScanConfig::default();
        let filtered = ScanConfig {
            min_installs: 10_000,
            ..Default::default()
        };

        assert_ne!(
            fingerprint(&defaults, &items),
            fingerprint(&filtered, &items)
        );
    }

    #[test]
    fn test_empty_result_set_fingerprints() {
        let config = ScanConfig::default();
        let a = fingerprint(&config, &[]);
        let b = fingerprint(&config, &[]);
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }
}
