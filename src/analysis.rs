// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Haukka - Static Analysis Engine
 * Deep source analysis of a single package: download, extract, run Semgrep
 * with the configured rulesets and parse its JSON findings
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary
 */

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::config::RulesConfig;
use crate::errors::EngineError;
use crate::types::{ScanItem, Severity};

/// One static-analysis finding in a package's source.
#[derive(Debug, Clone)]
pub struct Finding {
    pub severity: Severity,
    pub rule_id: String,
    pub message: String,
    pub file: String,
    pub line: u32,
    pub snippet: String,
}

/// Seam to the deep-analysis backend. Treated by the orchestrator as an
/// opaque, slow, failure-prone black box; timeouts are enforced by the
/// caller, not the engine.
#[async_trait]
pub trait AnalysisEngine: Send + Sync {
    async fn analyze(&self, item: &ScanItem) -> Result<Vec<Finding>, EngineError>;
}

// Semgrep --json output, reduced to the fields we keep.
#[derive(Debug, Deserialize)]
struct SemgrepOutput {
    #[serde(default)]
    results: Vec<SemgrepResult>,
}

#[derive(Debug, Deserialize)]
struct SemgrepResult {
    check_id: String,
    path: String,
    start: SemgrepPosition,
    extra: SemgrepExtra,
}

#[derive(Debug, Deserialize)]
struct SemgrepPosition {
    line: u32,
}

#[derive(Debug, Deserialize)]
struct SemgrepExtra {
    #[serde(default)]
    severity: String,
    #[serde(default)]
    message: String,
    #[serde(default)]
    lines: String,
}

/// Removes a per-item working directory when dropped. Cleanup must not live
/// inside the analysis future: the orchestrator drops that future on
/// timeout, and an inline cleanup step would be dropped with it, leaking
/// the extracted package on disk.
struct WorkDirGuard {
    path: PathBuf,
}

impl WorkDirGuard {
    fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

impl Drop for WorkDirGuard {
    fn drop(&mut self) {
        let path = std::mem::take(&mut self.path);
        tokio::task::spawn_blocking(move || {
            if let Err(err) = std::fs::remove_dir_all(&path) {
                if err.kind() != std::io::ErrorKind::NotFound {
                    warn!("Failed to clean work dir {:?}: {}", path, err);
                }
            }
        });
    }
}

/// Production engine: fetches the package archive, extracts it into the
/// working directory and shells out to `semgrep --json`.
pub struct SemgrepEngine {
    client: reqwest::Client,
    rules: Arc<RulesConfig>,
    work_dir: PathBuf,
}

impl SemgrepEngine {
    pub fn new(rules: Arc<RulesConfig>, work_dir: PathBuf) -> Self {
        Self {
            client: reqwest::Client::new(),
            rules,
            work_dir,
        }
    }

    /// Check for the semgrep binary. Called once at startup so a missing
    /// installation is reported before the first bulk launch fails.
    pub async fn check_available() -> bool {
        Command::new("semgrep")
            .arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map(|status| status.success())
            .unwrap_or(false)
    }

    /// Slugs become path components and command arguments; reject anything
    /// outside the catalog's own slug alphabet.
    fn validate_slug(slug: &str) -> Result<(), EngineError> {
        let ok = !slug.is_empty()
            && slug
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if ok {
            Ok(())
        } else {
            Err(EngineError::Failed(format!("invalid slug: {slug:?}")))
        }
    }

    async fn download_archive(&self, item: &ScanItem, zip_path: &Path) -> Result<(), EngineError> {
        if item.download_link.is_empty() {
            return Err(EngineError::Download("no download link".into()));
        }
        let response = self
            .client
            .get(&item.download_link)
            .send()
            .await
            .map_err(|err| EngineError::Download(err.to_string()))?;
        if !response.status().is_success() {
            return Err(EngineError::Download(format!(
                "archive fetch returned {}",
                response.status()
            )));
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|err| EngineError::Download(err.to_string()))?;
        tokio::fs::write(zip_path, &bytes)
            .await
            .map_err(|err| EngineError::Download(err.to_string()))?;
        Ok(())
    }

    async fn extract_archive(zip_path: &Path, source_dir: &Path) -> Result<(), EngineError> {
        let output = Command::new("unzip")
            .arg("-o")
            .arg("-q")
            .arg(zip_path)
            .arg("-d")
            .arg(source_dir)
            .output()
            .await
            .map_err(|err| EngineError::Failed(format!("unzip unavailable: {err}")))?;
        if !output.status.success() {
            return Err(EngineError::Failed(format!(
                "archive extraction failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(())
    }

    /// Materialize enabled custom rules as a semgrep YAML config file.
    /// Returns None when no custom rules are enabled.
    async fn write_custom_rules(&self, dir: &Path) -> Result<Option<PathBuf>, EngineError> {
        let rules = self.rules.custom_rules();
        if rules.is_empty() {
            return Ok(None);
        }
        let mut yaml = String::from("rules:\n");
        for rule in &rules {
            let severity = match rule.severity {
                Severity::Error => "ERROR",
                Severity::Warning => "WARNING",
                Severity::Info => "INFO",
            };
            yaml.push_str(&format!(
                "  - id: {}\n    pattern: {}\n    message: {}\n    severity: {}\n    languages: [php]\n",
                rule.id,
                serde_json::to_string(&rule.pattern).unwrap_or_default(),
                serde_json::to_string(&rule.message).unwrap_or_default(),
                severity,
            ));
        }
        let path = dir.join("custom_rules.yaml");
        tokio::fs::write(&path, yaml)
            .await
            .map_err(|err| EngineError::Failed(err.to_string()))?;
        Ok(Some(path))
    }

    fn parse_output(stdout: &[u8]) -> Result<Vec<Finding>, EngineError> {
        let output: SemgrepOutput = serde_json::from_slice(stdout)
            .map_err(|err| EngineError::Failed(format!("unparseable engine output: {err}")))?;
        Ok(output
            .results
            .into_iter()
            .map(|result| Finding {
                severity: Severity::parse(&result.extra.severity),
                rule_id: result.check_id,
                message: result.extra.message,
                file: result.path,
                line: result.start.line,
                snippet: result.extra.lines,
            })
            .collect())
    }
}

#[async_trait]
impl AnalysisEngine for SemgrepEngine {
    async fn analyze(&self, item: &ScanItem) -> Result<Vec<Finding>, EngineError> {
        Self::validate_slug(&item.slug)?;

        let package_dir = self.work_dir.join(&item.slug);
        let source_dir = package_dir.join("source");
        let zip_path = package_dir.join(format!("{}.zip", item.slug));

        tokio::fs::create_dir_all(&source_dir)
            .await
            .map_err(|err| EngineError::Failed(err.to_string()))?;
        let _cleanup = WorkDirGuard::new(package_dir.clone());

        async {
            self.download_archive(item, &zip_path).await?;
            Self::extract_archive(&zip_path, &source_dir).await?;

            let mut cmd = Command::new("semgrep");
            if let Some(custom) = self.write_custom_rules(&package_dir).await? {
                cmd.arg("--config").arg(custom);
            }
            for ruleset in self.rules.enabled_rulesets() {
                cmd.arg("--config").arg(ruleset);
            }
            cmd.arg("--json")
                .arg("--quiet")
                .arg("--no-git-ignore")
                .arg(&source_dir)
                .stdin(Stdio::null());

            debug!("Running analysis engine for {}", item.slug);
            let output = cmd
                .output()
                .await
                .map_err(|err| EngineError::Failed(format!("engine unavailable: {err}")))?;

            // Semgrep exits 0 when clean and 1 when findings exist; anything
            // else without parseable JSON is a real failure.
            match Self::parse_output(&output.stdout) {
                Ok(findings) => Ok(findings),
                Err(_) if !output.status.success() => Err(EngineError::Failed(format!(
                    "engine exited with {}: {}",
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                ))),
                Err(err) => Err(err),
            }
        }
        .await
    }
}
