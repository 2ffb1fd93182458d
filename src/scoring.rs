// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Haukka - Vulnerability Probability Scoring
 * Heuristic point scoring of catalog candidates from metadata and
 * changelog signals. Deterministic given identical input.
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary
 */

use crate::discovery::CandidateMeta;

/// WordPress core version the compatibility penalty is measured against.
const CURRENT_WP_VERSION: f32 = 6.7;

/// Category tags with an elevated intrinsic attack surface.
const RISKY_TAGS: &[&str] = &[
    // E-commerce & payment
    "ecommerce", "woocommerce", "payment", "gateway", "stripe", "paypal", "checkout", "cart",
    "shop",
    // Forms & input
    "form", "contact", "input", "survey", "quiz", "poll", "booking", "reservation",
    // File operations
    "upload", "file", "image", "gallery", "media", "download", "import", "export", "backup",
    // User management
    "login", "register", "membership", "user", "profile", "admin", "role", "authentication",
];

/// Tags indicating functionality exposed to anonymous site visitors.
const USER_FACING_TAGS: &[&str] = &[
    "chat", "contact", "form", "gallery", "slider", "calendar", "booking", "appointment",
    "event", "social", "share", "comment", "review", "forum", "membership", "profile", "login",
    "register", "ecommerce", "shop", "cart", "product", "checkout", "newsletter", "popup",
    "banner", "map", "faq", "survey", "poll", "quiz", "ticket", "support", "download",
    "frontend", "video", "audio", "player",
];

/// Changelog words hinting at past security churn.
const SECURITY_KEYWORDS: &[&str] = &[
    "xss", "sql", "injection", "security", "vulnerability", "exploit", "csrf", "rce", "ssrf",
    "lfi", "rfi", "idor", "xxe", "deserialization", "bypass", "fix", "patched", "sanitize",
    "escape", "harden", "nonce", "validation",
];

/// Changelog words hinting at fresh, unproven attack surface.
const FEATURE_KEYWORDS: &[&str] = &[
    "added", "new", "feature", "introduced", "implementation", "shortcode", "widget", "export",
    "upload",
];

/// Tags that accept direct user input and earn the user-input bonus.
const USER_INPUT_TAGS: &[&str] = &[
    "form", "contact", "input", "chat", "comment", "review", "upload", "profile",
];

/// Evaluation of one candidate: the score plus the flags the runner
/// persists on the resulting scan item.
#[derive(Debug, Clone, Default)]
pub struct Evaluation {
    pub score: u8,
    pub risk_tags: Vec<String>,
    pub security_flags: Vec<String>,
    pub feature_flags: Vec<String>,
    pub is_risky_category: bool,
    pub is_user_facing: bool,
    pub author_trusted: bool,
}

/// Scoring seam. Pure and deterministic: identical input yields an
/// identical evaluation, which the fingerprint design depends on.
pub trait Scorer: Send + Sync {
    fn evaluate(&self, meta: &CandidateMeta, days_since_update: u32) -> Evaluation;
}

/// Production heuristic scorer.
///
/// Scoring breakdown (clamped to 100):
/// - code rot (maintenance latency): max 40 pts
/// - attack surface (risky category tags): max 30 pts
/// - developer neglect (support thread health): max 15 pts
/// - technical debt (tested-against version lag): max 15 pts
/// - reputation (rating below 3.5/5): 10 pts
/// - user-input bonus 5 pts, fresh-release reward -5 pts
#[derive(Debug, Default)]
pub struct HeuristicScorer;

impl HeuristicScorer {
    fn matched_tags(meta: &CandidateMeta) -> Vec<String> {
        let name = meta.name.to_lowercase();
        let desc = meta.short_description.to_lowercase();
        RISKY_TAGS
            .iter()
            .filter(|tag| {
                meta.tags.iter().any(|t| t == *tag) || name.contains(*tag) || desc.contains(*tag)
            })
            .map(|tag| tag.to_string())
            .collect()
    }

    fn user_facing(meta: &CandidateMeta) -> bool {
        let name = meta.name.to_lowercase();
        let desc = meta.short_description.to_lowercase();
        USER_FACING_TAGS
            .iter()
            .any(|tag| meta.tags.iter().any(|t| t == *tag) || name.contains(*tag) || desc.contains(*tag))
    }

    /// Keyword scan over the most recent changelog slice. Only the head is
    /// inspected so years-old entries don't dominate the signal.
    fn analyze_changelog(changelog: &str) -> (Vec<String>, Vec<String>) {
        let recent = changelog
            .get(..changelog.len().min(2000))
            .unwrap_or(changelog)
            .to_lowercase();
        let words: std::collections::HashSet<&str> = recent.split_whitespace().collect();

        let security = SECURITY_KEYWORDS
            .iter()
            .filter(|kw| words.contains(**kw))
            .map(|kw| kw.to_string())
            .collect();
        let features = FEATURE_KEYWORDS
            .iter()
            .filter(|kw| words.contains(**kw))
            .map(|kw| kw.to_string())
            .collect();
        (security, features)
    }

    fn compatibility_penalty(tested: &str) -> u32 {
        let ver_str = tested.split('-').next().unwrap_or(tested);
        let mut parts = ver_str.split('.');
        let parsed = match (parts.next(), parts.next()) {
            (Some(major), Some(minor)) => format!("{major}.{minor}").parse::<f32>().ok(),
            (Some(major), None) => major.parse::<f32>().ok(),
            _ => None,
        };
        match parsed {
            Some(ver) if ver < CURRENT_WP_VERSION - 0.5 => 15,
            Some(_) => 0,
            // Unknown compatibility is risky too.
            None => 10,
        }
    }
}

impl Scorer for HeuristicScorer {
    fn evaluate(&self, meta: &CandidateMeta, days_since_update: u32) -> Evaluation {
        let matched_tags = Self::matched_tags(meta);
        let (security_flags, feature_flags) = Self::analyze_changelog(&meta.changelog);

        let mut score: u32 = 0;

        // 1. Code rot
        if days_since_update > 730 {
            score += 40;
        } else if days_since_update > 365 {
            score += 25;
        } else if days_since_update > 180 {
            score += 15;
        }

        // 2. Attack surface
        score += (matched_tags.len() as u32 * 3).min(30);

        // 3. Developer neglect
        let support_rate = if meta.support_threads > 0 {
            (meta.support_threads_resolved * 100) / meta.support_threads
        } else {
            0
        };
        if support_rate < 20 {
            score += 15;
        } else if support_rate < 50 {
            score += 10;
        }

        // 4. Technical debt
        score += Self::compatibility_penalty(&meta.tested);

        // 5. Reputation (catalog ratings are on a 0-100 scale)
        let rating = meta.rating.min(100) as f32 / 20.0;
        if rating < 3.5 {
            score += 10;
        }

        // User-input bonus
        if matched_tags
            .iter()
            .any(|tag| USER_INPUT_TAGS.contains(&tag.as_str()))
        {
            score += 5;
        }

        // Active maintenance reward
        if days_since_update < 14 {
            score = score.saturating_sub(5);
        }

        let author = meta.author.to_lowercase();
        let author_trusted = author.contains("automattic") || author.contains("wordpress.org");

        Evaluation {
            score: score.min(100) as u8,
            is_risky_category: !matched_tags.is_empty(),
            is_user_facing: Self::user_facing(meta),
            risk_tags: matched_tags,
            security_flags,
            feature_flags,
            author_trusted,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(tags: &[&str], days_tested: &str) -> CandidateMeta {
        CandidateMeta {
            slug: "test-plugin".into(),
            name: "Test Plugin".into(),
            version: "1.0".into(),
            active_installs: 5000,
            last_updated: None,
            tags: tags.iter().map(|t| t.to_string()).collect(),
            short_description: String::new(),
            tested: days_tested.into(),
            author: "someone".into(),
            rating: 90,
            support_threads: 10,
            support_threads_resolved: 9,
            changelog: String::new(),
            download_link: String::new(),
        }
    }

    #[test]
    fn test_abandoned_plugin_scores_high() {
        let scorer = HeuristicScorer;
        let fresh = scorer.evaluate(&meta(&[], "6.7"), 10);
        let abandoned = scorer.evaluate(&meta(&[], "6.7"), 900);
        assert!(abandoned.score >= fresh.score + 40);
    }

    #[test]
    fn test_risky_tags_raise_attack_surface() {
        let scorer = HeuristicScorer;
        let plain = scorer.evaluate(&meta(&[], "6.7"), 100);
        let risky = scorer.evaluate(&meta(&["upload", "payment", "login"], "6.7"), 100);
        assert!(risky.score > plain.score);
        assert!(risky.is_risky_category);
        assert_eq!(risky.risk_tags.len(), 3);
    }

    #[test]
    fn test_deterministic() {
        let scorer = HeuristicScorer;
        let candidate = meta(&["form"], "5.8");
        let a = scorer.evaluate(&candidate, 400);
        let b = scorer.evaluate(&candidate, 400);
        assert_eq!(a.score, b.score);
        assert_eq!(a.risk_tags, b.risk_tags);
    }

    #[test]
    fn test_score_clamped_to_100() {
        let scorer = HeuristicScorer;
        let mut candidate = meta(RISKY_TAGS, "?");
        candidate.rating = 10;
        candidate.support_threads = 100;
        candidate.support_threads_resolved = 0;
        let eval = scorer.evaluate(&candidate, 2000);
        assert_eq!(eval.score, 100);
    }

    #[test]
    fn test_changelog_keywords_extracted() {
        let scorer = HeuristicScorer;
        let mut candidate = meta(&[], "6.7");
        candidate.changelog = "1.2: fix xss vulnerability ; added new shortcode".into();
        let eval = scorer.evaluate(&candidate, 10);
        assert!(eval.security_flags.contains(&"xss".to_string()));
        assert!(eval.feature_flags.contains(&"shortcode".to_string()));
    }

    #[test]
    fn test_trusted_author_detected() {
        let scorer = HeuristicScorer;
        let mut candidate = meta(&[], "6.7");
        candidate.author = "<a href=\"https://automattic.com\">Automattic</a>".into();
        assert!(scorer.evaluate(&candidate, 10).author_trusted);
    }

    #[test]
    fn test_user_facing_detection() {
        let scorer = HeuristicScorer;
        let eval = scorer.evaluate(&meta(&["slider"], "6.7"), 10);
        assert!(eval.is_user_facing);
        assert!(!eval.is_risky_category);
    }
}
