//! Configuration management for Arbor
//!
//! Repository-level settings live in `.arbor/config.toml`: protected files,
//! engine limits, budget defaults, completion-gate checks and model choice.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::types::{Phase, Severity, Specialization};
use crate::Result;

/// Repository-level Arbor configuration
///
/// Loaded from `.arbor/config.toml` in the repo root.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArborConfig {
    /// Files/directories that agents cannot modify
    #[serde(default = "default_protected_files")]
    pub protected_files: Vec<String>,

    /// Per-agent loop limits
    #[serde(default)]
    pub engine: EngineDefaults,

    /// Budget defaults
    #[serde(default)]
    pub budget: BudgetDefaults,

    /// Completion gate checks
    #[serde(default)]
    pub gate: GateConfig,

    /// Model selection
    #[serde(default)]
    pub models: ModelConfig,
}

/// Default loop execution parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineDefaults {
    /// Maximum reasoning iterations per agent
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,

    /// Phase a root agent starts in
    #[serde(default)]
    pub start_phase: Phase,

    /// Maximum recursion depth (root is depth 0)
    #[serde(default = "default_max_depth")]
    pub max_depth: u32,

    #[serde(default = "default_reasoning_timeout_secs")]
    pub reasoning_timeout_secs: u64,

    #[serde(default = "default_tool_timeout_secs")]
    pub tool_timeout_secs: u64,

    /// Maximum tokens per reasoning response
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Extended thinking budget in tokens, None disables thinking
    #[serde(default)]
    pub thinking_budget: Option<u32>,
}

/// Budget defaults
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BudgetDefaults {
    /// Root ceiling in USD when none is given on the command line
    #[serde(default = "default_ceiling_usd")]
    pub default_ceiling_usd: f64,

    /// Share of the parent's remaining budget a child gets when it asks for none
    #[serde(default = "default_child_fraction")]
    pub child_default_fraction: f64,
}

/// Completion gate configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateConfig {
    /// Compilation command; failures always block. None means auto-detect.
    #[serde(default)]
    pub compile: Option<String>,

    /// Broader checks run after compilation passes. Empty means auto-detect.
    #[serde(default)]
    pub checks: Vec<CheckSpec>,

    /// Per-check timeout
    #[serde(default = "default_check_timeout_secs")]
    pub timeout_secs: u64,
}

/// A validation check command and the severity its failures carry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckSpec {
    pub name: String,
    pub command: String,
    #[serde(default)]
    pub severity: Severity,
    /// Only run for these specializations; empty runs for every agent
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub specializations: Vec<Specialization>,
}

impl CheckSpec {
    pub fn new(name: impl Into<String>, command: impl Into<String>, severity: Severity) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            severity,
            specializations: Vec::new(),
        }
    }

    pub fn only_for(mut self, specializations: impl IntoIterator<Item = Specialization>) -> Self {
        self.specializations = specializations.into_iter().collect();
        self
    }

    /// Whether the check runs for an agent with this hint; no hint runs everything
    pub fn applies_to(&self, specialization: Option<Specialization>) -> bool {
        match specialization {
            Some(spec) if !self.specializations.is_empty() => self.specializations.contains(&spec),
            _ => true,
        }
    }
}

/// Model configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Default model to use
    #[serde(default = "default_model")]
    pub default: String,

    /// Environment variable containing API key
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
}

/// Supported programming languages
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Language {
    Rust,
    Python,
    JavaScript,
}

// Default value providers
fn default_protected_files() -> Vec<String> {
    vec![
        ".git".to_string(),
        ".arbor".to_string(),
        ".env".to_string(),
        "Cargo.lock".to_string(),
        ".secrets".to_string(),
    ]
}

fn default_max_iterations() -> u32 {
    25
}

fn default_max_depth() -> u32 {
    3
}

fn default_reasoning_timeout_secs() -> u64 {
    300
}

fn default_tool_timeout_secs() -> u64 {
    120
}

fn default_max_tokens() -> u32 {
    16000
}

fn default_ceiling_usd() -> f64 {
    5.0
}

fn default_child_fraction() -> f64 {
    0.5
}

fn default_check_timeout_secs() -> u64 {
    600
}

fn default_model() -> String {
    "sonnet".to_string()
}

fn default_api_key_env() -> String {
    "ANTHROPIC_API_KEY".to_string()
}

impl ArborConfig {
    /// Load configuration from `.arbor/config.toml` or use defaults
    pub fn load_or_default(repo_root: &Path) -> Result<Self> {
        let config_path = repo_root.join(".arbor/config.toml");

        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            let config: Self = toml::from_str(&content).map_err(|e| {
                crate::ArborError::Config(format!("Failed to parse {}: {}", config_path.display(), e))
            })?;
            config.validate()?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Write default configuration to `.arbor/config.toml`
    pub fn write_default(repo_root: &Path) -> Result<()> {
        let config_dir = repo_root.join(".arbor");
        std::fs::create_dir_all(&config_dir)?;

        let config_path = config_dir.join("config.toml");
        let content = Self::default().to_toml()?;
        std::fs::write(&config_path, content)?;
        Ok(())
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| crate::ArborError::Config(format!("Failed to serialize config: {}", e)))
    }

    /// Reject values the engine cannot honor
    pub fn validate(&self) -> Result<()> {
        if self.engine.max_iterations == 0 {
            return Err(crate::ArborError::Config(
                "engine.max_iterations must be at least 1".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.budget.child_default_fraction) {
            return Err(crate::ArborError::Config(format!(
                "budget.child_default_fraction must be between 0 and 1, got {}",
                self.budget.child_default_fraction
            )));
        }
        if self.budget.default_ceiling_usd < 0.0 {
            return Err(crate::ArborError::Config(
                "budget.default_ceiling_usd cannot be negative".to_string(),
            ));
        }
        Ok(())
    }

    /// Detect the primary programming language of a repository
    pub fn detect_language(repo_root: &Path) -> Option<Language> {
        if repo_root.join("Cargo.toml").exists() {
            Some(Language::Rust)
        } else if repo_root.join("pyproject.toml").exists() {
            Some(Language::Python)
        } else if repo_root.join("package.json").exists() {
            Some(Language::JavaScript)
        } else {
            None
        }
    }

    /// Default gate checks for a language
    pub fn default_gate_for_language(lang: Language) -> GateConfig {
        match lang {
            Language::Rust => GateConfig {
                compile: Some("cargo check --all-targets".to_string()),
                checks: vec![
                    CheckSpec::new("tests", "cargo test", Severity::Critical),
                    CheckSpec::new("clippy", "cargo clippy -- -D warnings", Severity::High),
                ],
                timeout_secs: default_check_timeout_secs(),
            },
            Language::Python => GateConfig {
                compile: Some("python -m compileall -q .".to_string()),
                checks: vec![
                    CheckSpec::new("tests", "pytest -q", Severity::Critical),
                    CheckSpec::new("ruff", "ruff check .", Severity::High),
                ],
                timeout_secs: default_check_timeout_secs(),
            },
            Language::JavaScript => GateConfig {
                compile: Some("npm run build --if-present".to_string()),
                checks: vec![
                    CheckSpec::new("tests", "npm test", Severity::Critical),
                    CheckSpec::new("lint", "npm run lint --if-present", Severity::High),
                ],
                timeout_secs: default_check_timeout_secs(),
            },
        }
    }

    /// Gate configuration with auto-detected defaults filled in
    pub fn effective_gate(&self, repo_root: &Path) -> GateConfig {
        let detected = Self::detect_language(repo_root).map(Self::default_gate_for_language);
        let mut gate = self.gate.clone();
        if let Some(detected) = detected {
            if gate.compile.is_none() {
                gate.compile = detected.compile;
            }
            if gate.checks.is_empty() {
                gate.checks = detected.checks;
            }
        }
        gate
    }
}

impl Default for ArborConfig {
    fn default() -> Self {
        Self {
            protected_files: default_protected_files(),
            engine: EngineDefaults::default(),
            budget: BudgetDefaults::default(),
            gate: GateConfig::default(),
            models: ModelConfig::default(),
        }
    }
}

impl Default for EngineDefaults {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            start_phase: Phase::Explore,
            max_depth: default_max_depth(),
            reasoning_timeout_secs: default_reasoning_timeout_secs(),
            tool_timeout_secs: default_tool_timeout_secs(),
            max_tokens: default_max_tokens(),
            thinking_budget: None,
        }
    }
}

impl Default for BudgetDefaults {
    fn default() -> Self {
        Self {
            default_ceiling_usd: default_ceiling_usd(),
            child_default_fraction: default_child_fraction(),
        }
    }
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            compile: None,
            checks: Vec::new(),
            timeout_secs: default_check_timeout_secs(),
        }
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            default: default_model(),
            api_key_env: default_api_key_env(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_without_file() {
        let dir = TempDir::new().unwrap();
        let config = ArborConfig::load_or_default(dir.path()).unwrap();
        assert_eq!(config, ArborConfig::default());
        assert_eq!(config.engine.max_iterations, 25);
        assert_eq!(config.engine.start_phase, Phase::Explore);
    }

    #[test]
    fn test_write_then_load() {
        let dir = TempDir::new().unwrap();
        ArborConfig::write_default(dir.path()).unwrap();
        assert!(dir.path().join(".arbor/config.toml").exists());
        let config = ArborConfig::load_or_default(dir.path()).unwrap();
        assert_eq!(config, ArborConfig::default());
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join(".arbor")).unwrap();
        std::fs::write(
            dir.path().join(".arbor/config.toml"),
            r#"
[engine]
max_iterations = 7
start_phase = "PLAN"

[[gate.checks]]
name = "audit"
command = "cargo audit"
severity = "critical"
"#,
        )
        .unwrap();

        let config = ArborConfig::load_or_default(dir.path()).unwrap();
        assert_eq!(config.engine.max_iterations, 7);
        assert_eq!(config.engine.start_phase, Phase::Plan);
        assert_eq!(config.engine.max_depth, 3);
        assert_eq!(config.gate.checks.len(), 1);
        assert_eq!(config.gate.checks[0].severity, Severity::Critical);
        assert_eq!(config.budget.child_default_fraction, 0.5);
    }

    #[test]
    fn test_invalid_fraction_rejected() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join(".arbor")).unwrap();
        std::fs::write(
            dir.path().join(".arbor/config.toml"),
            "[budget]\nchild_default_fraction = 1.5\n",
        )
        .unwrap();
        assert!(ArborConfig::load_or_default(dir.path()).is_err());
    }

    #[test]
    fn test_effective_gate_detects_rust() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("Cargo.toml"), "[package]\nname = \"x\"\n").unwrap();
        let gate = ArborConfig::default().effective_gate(dir.path());
        assert_eq!(gate.compile.as_deref(), Some("cargo check --all-targets"));
        assert!(gate.checks.iter().any(|c| c.name == "tests"));
    }

    #[test]
    fn test_effective_gate_unknown_language() {
        let dir = TempDir::new().unwrap();
        let gate = ArborConfig::default().effective_gate(dir.path());
        assert!(gate.compile.is_none());
        assert!(gate.checks.is_empty());
    }
}
