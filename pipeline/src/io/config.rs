//! Engine configuration (`engine.toml`).

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::advisor::AdvisorLimits;
use crate::core::route::{CapabilityDictionary, RouteCompiler};

/// Engine configuration (TOML).
///
/// Missing fields fall back to defaults, so an empty file is a valid config.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct EngineConfig {
    /// When the property/advisor pass runs relative to requests.
    pub analysis: AnalysisMode,

    /// Capability dictionary used to gate operation names at compile time.
    pub capabilities: CapabilityDictionary,

    pub advisor: AdvisorConfig,

    pub properties: PropertiesConfig,

    pub preconditions: PreconditionsConfig,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisMode {
    /// Run before `handle` returns (after latency is recorded).
    Inline,
    /// Spawn onto the tokio runtime after each request.
    #[default]
    Background,
    /// Only when `Engine::run_analysis` is called explicitly.
    Off,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AdvisorConfig {
    pub default_page_limit: usize,
    pub max_page_limit: usize,
}

impl Default for AdvisorConfig {
    fn default() -> Self {
        let limits = AdvisorLimits::default();
        Self {
            default_page_limit: limits.default_page_limit,
            max_page_limit: limits.max_page_limit,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct PropertiesConfig {
    /// Scan prefix when no route declares a scan and no scope is set.
    pub default_scan_prefix: String,
    /// Explicit scan prefix per property id.
    pub scopes: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct PreconditionsConfig {
    /// Literal prepended to a route's first path variable.
    pub key_prefix: String,
    /// Explicit key expression per route id, e.g. `"order:" + OrderId`.
    pub keys: BTreeMap<String, String>,
}

impl EngineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.advisor.default_page_limit == 0 {
            return Err(anyhow!("advisor.default_page_limit must be > 0"));
        }
        if self.advisor.max_page_limit == 0 {
            return Err(anyhow!("advisor.max_page_limit must be > 0"));
        }
        if self.advisor.default_page_limit > self.advisor.max_page_limit {
            return Err(anyhow!(
                "advisor.default_page_limit ({}) exceeds advisor.max_page_limit ({})",
                self.advisor.default_page_limit,
                self.advisor.max_page_limit
            ));
        }
        if self.preconditions.key_prefix.contains('"') {
            return Err(anyhow!("preconditions.key_prefix must not contain '\"'"));
        }
        for (route, key) in &self.preconditions.keys {
            if key.trim().is_empty() {
                return Err(anyhow!("preconditions.keys.{route} must not be empty"));
            }
        }
        Ok(())
    }

    pub fn advisor_limits(&self) -> AdvisorLimits {
        AdvisorLimits {
            default_page_limit: self.advisor.default_page_limit,
            max_page_limit: self.advisor.max_page_limit,
        }
    }

    pub fn route_compiler(&self) -> RouteCompiler {
        RouteCompiler {
            capabilities: self.capabilities.clone(),
            precondition_key_prefix: self.preconditions.key_prefix.clone(),
            precondition_keys: self.preconditions.keys.clone(),
        }
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `EngineConfig::default()`.
pub fn load_config(path: &Path) -> Result<EngineConfig> {
    if !path.exists() {
        let cfg = EngineConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: EngineConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &EngineConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}
