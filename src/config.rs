// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Haukka - Configuration
 * Application configuration from environment variables and the persisted
 * static-analysis rules configuration
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary
 */

use std::collections::BTreeSet;
use std::path::PathBuf;

use anyhow::Result;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::types::Severity;

/// Application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub server_port: u16,
    pub server_host: String,
    /// State file for the session store.
    pub state_path: PathBuf,
    /// Rules configuration file for the analysis engine.
    pub rules_path: PathBuf,
    /// Working directory for downloaded packages and engine output.
    pub work_dir: PathBuf,
    /// Bounded concurrency of the bulk analysis worker pool.
    pub bulk_concurrency: usize,
    /// Hard per-item timeout for analysis engine invocations.
    pub item_timeout_secs: u64,
    /// Per-page retry attempts against the discovery source.
    pub page_retries: u32,
}

impl Default for AppConfig {
    fn default() -> Self {
        let data_dir = PathBuf::from(".haukka");
        Self {
            server_port: 8710,
            server_host: "127.0.0.1".to_string(),
            state_path: data_dir.join("state.json"),
            rules_path: data_dir.join("rules.json"),
            work_dir: data_dir.join("work"),
            bulk_concurrency: 4,
            item_timeout_secs: 300,
            page_retries: 3,
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables with sensible defaults
    ///
    /// Supports the following environment variables:
    /// - HAUKKA_PORT: HTTP server port
    /// - HAUKKA_HOST: HTTP server bind address
    /// - HAUKKA_DATA_DIR: base directory for state, rules and downloads
    /// - HAUKKA_BULK_CONCURRENCY: bulk analysis worker pool size
    /// - HAUKKA_ITEM_TIMEOUT: per-item analysis timeout in seconds
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(port) = std::env::var("HAUKKA_PORT") {
            config.server_port = port
                .parse()
                .map_err(|_| anyhow::anyhow!("Invalid HAUKKA_PORT value"))?;
        }

        if let Ok(host) = std::env::var("HAUKKA_HOST") {
            config.server_host = host;
        }

        if let Ok(dir) = std::env::var("HAUKKA_DATA_DIR") {
            let base = PathBuf::from(dir);
            config.state_path = base.join("state.json");
            config.rules_path = base.join("rules.json");
            config.work_dir = base.join("work");
        }

        if let Ok(concurrency) = std::env::var("HAUKKA_BULK_CONCURRENCY") {
            config.bulk_concurrency = concurrency
                .parse()
                .map_err(|_| anyhow::anyhow!("Invalid HAUKKA_BULK_CONCURRENCY value"))?;
        }

        if let Ok(timeout) = std::env::var("HAUKKA_ITEM_TIMEOUT") {
            config.item_timeout_secs = timeout
                .parse()
                .map_err(|_| anyhow::anyhow!("Invalid HAUKKA_ITEM_TIMEOUT value"))?;
        }

        Ok(config)
    }
}

/// Registry rulesets the analysis engine can pull. The id doubles as the
/// registry path passed to the engine.
pub const REGISTRY_RULESETS: &[(&str, &str)] = &[
    ("p/php", "PHP language security rules"),
    ("p/wordpress", "WordPress-specific security rules"),
    ("p/security-audit", "Generic security audit ruleset"),
    ("p/secrets", "Hardcoded secret detection"),
];

/// A user-defined analysis rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomRule {
    pub id: String,
    pub pattern: String,
    pub message: String,
    pub severity: Severity,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct RulesState {
    disabled_rulesets: BTreeSet<String>,
    disabled_rules: BTreeSet<String>,
    custom_rules: Vec<CustomRule>,
}

/// Snapshot of the rules configuration for API responses.
#[derive(Debug, Clone, Serialize)]
pub struct RulesetView {
    pub id: String,
    pub description: String,
    pub enabled: bool,
}

/// Persisted configuration of enabled analysis rules. Checked by the bulk
/// analysis orchestrator as a launch precondition.
pub struct RulesConfig {
    state: RwLock<RulesState>,
    path: Option<PathBuf>,
}

impl RulesConfig {
    pub fn in_memory() -> Self {
        Self {
            state: RwLock::new(RulesState::default()),
            path: None,
        }
    }

    pub fn load(path: PathBuf) -> Result<Self> {
        let state = match std::fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => RulesState::default(),
            Err(err) => return Err(err.into()),
        };
        info!("Rules configuration loaded from {:?}", path);
        Ok(Self {
            state: RwLock::new(state),
            path: Some(path),
        })
    }

    fn persist(&self, state: &RulesState) -> Result<()> {
        if let Some(path) = &self.path {
            if let Some(dir) = path.parent() {
                std::fs::create_dir_all(dir)?;
            }
            std::fs::write(path, serde_json::to_vec(state)?)?;
        }
        Ok(())
    }

    /// Bulk analysis precondition: at least one registry ruleset or one
    /// custom rule must be enabled.
    pub fn has_enabled_rules(&self) -> bool {
        let state = self.state.read();
        let any_ruleset = REGISTRY_RULESETS
            .iter()
            .any(|(id, _)| !state.disabled_rulesets.contains(*id));
        let any_custom = state
            .custom_rules
            .iter()
            .any(|rule| !state.disabled_rules.contains(&rule.id));
        any_ruleset || any_custom
    }

    /// Registry paths currently enabled, in declaration order.
    pub fn enabled_rulesets(&self) -> Vec<String> {
        let state = self.state.read();
        REGISTRY_RULESETS
            .iter()
            .filter(|(id, _)| !state.disabled_rulesets.contains(*id))
            .map(|(id, _)| id.to_string())
            .collect()
    }

    pub fn rulesets(&self) -> Vec<RulesetView> {
        let state = self.state.read();
        REGISTRY_RULESETS
            .iter()
            .map(|(id, description)| RulesetView {
                id: id.to_string(),
                description: description.to_string(),
                enabled: !state.disabled_rulesets.contains(*id),
            })
            .collect()
    }

    /// Flip a ruleset and return its new enabled state.
    pub fn toggle_ruleset(&self, id: &str) -> Result<bool> {
        if !REGISTRY_RULESETS.iter().any(|(known, _)| *known == id) {
            anyhow::bail!("unknown ruleset: {id}");
        }
        let mut state = self.state.write();
        let enabled = if state.disabled_rulesets.contains(id) {
            state.disabled_rulesets.remove(id);
            true
        } else {
            state.disabled_rulesets.insert(id.to_string());
            false
        };
        self.persist(&state)?;
        Ok(enabled)
    }

    pub fn add_custom_rule(&self, rule: CustomRule) -> Result<()> {
        let mut state = self.state.write();
        if state.custom_rules.iter().any(|r| r.id == rule.id) {
            anyhow::bail!("rule with id '{}' already exists", rule.id);
        }
        state.custom_rules.push(rule);
        self.persist(&state)
    }

    pub fn custom_rules(&self) -> Vec<CustomRule> {
        self.state.read().custom_rules.clone()
    }

    pub fn remove_custom_rule(&self, id: &str) -> Result<bool> {
        let mut state = self.state.write();
        let before = state.custom_rules.len();
        state.custom_rules.retain(|r| r.id != id);
        let removed = state.custom_rules.len() != before;
        if removed {
            self.persist(&state)?;
        }
        Ok(removed)
    }
}
