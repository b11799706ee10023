use crate::error::{Error, Result};
use crate::handlers::HandlerSpec;
use crate::probe::{FactSource, HostProbe};
use crate::registry::ActionRegistry;
use crate::rules::{RuleDef, RuleSet};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

pub const CONFIG_FILE: &str = "rulecycle.yaml";

// ---------------------------------------------------------------------------
// ConfigWarning / WarnLevel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigWarning {
    pub level: WarnLevel,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarnLevel {
    Warning,
    Error,
}

// ---------------------------------------------------------------------------
// ScheduleConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScheduleConfig {
    #[serde(default = "default_min_interval")]
    pub min_interval_secs: u64,
    #[serde(default = "default_max_interval")]
    pub max_interval_secs: u64,
    /// Upper bound on a single handler run. `None` waits indefinitely.
    #[serde(default)]
    pub handler_timeout_secs: Option<u64>,
}

fn default_min_interval() -> u64 {
    180
}

fn default_max_interval() -> u64 {
    420
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            min_interval_secs: default_min_interval(),
            max_interval_secs: default_max_interval(),
            handler_timeout_secs: None,
        }
    }
}

impl ScheduleConfig {
    pub fn validate(&self) -> Result<()> {
        if self.min_interval_secs > self.max_interval_secs {
            return Err(Error::Config(format!(
                "schedule.min_interval_secs ({}) exceeds max_interval_secs ({})",
                self.min_interval_secs, self.max_interval_secs
            )));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// MemoryConfig / AuditConfig
// ---------------------------------------------------------------------------

/// Whether exclusion memory outlives the process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct MemoryConfig {
    #[serde(default)]
    pub persist: bool,
    #[serde(default)]
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AuditConfig {
    #[serde(default = "default_audit_path")]
    pub path: PathBuf,
}

fn default_audit_path() -> PathBuf {
    PathBuf::from("rulecycle-audit.jsonl")
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            path: default_audit_path(),
        }
    }
}

// ---------------------------------------------------------------------------
// Config (top-level)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub memory: MemoryConfig,
    #[serde(default)]
    pub audit: AuditConfig,
    #[serde(default)]
    pub facts: BTreeMap<String, FactSource>,
    #[serde(default)]
    pub actions: BTreeMap<String, HandlerSpec>,
    #[serde(default)]
    pub rules: Vec<RuleDef>,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read {}: {e}", path.display())))?;
        let mut cfg = Self::from_yaml(&data)?;
        cfg.resolve_paths(path.parent().unwrap_or(Path::new(".")));
        Ok(cfg)
    }

    pub fn from_yaml(data: &str) -> Result<Self> {
        let cfg: Config = serde_yaml::from_str(data)?;
        Ok(cfg)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let data = serde_yaml::to_string(self)?;
        crate::io::atomic_write(path, data.as_bytes())
    }

    /// Relative audit/memory paths are taken relative to the config file.
    fn resolve_paths(&mut self, base: &Path) {
        if self.audit.path.is_relative() {
            self.audit.path = base.join(&self.audit.path);
        }
        if let Some(p) = self.memory.path.as_mut() {
            if p.is_relative() {
                *p = base.join(&*p);
            }
        }
    }

    // -----------------------------------------------------------------------
    // Component construction (fatal on error)
    // -----------------------------------------------------------------------

    pub fn rule_set(&self) -> Result<RuleSet> {
        RuleSet::from_defs(&self.rules)
    }

    pub fn registry(&self) -> Result<ActionRegistry> {
        ActionRegistry::from_specs(&self.actions)
    }

    pub fn probe(&self) -> HostProbe {
        HostProbe::new(self.facts.clone())
    }

    // -----------------------------------------------------------------------
    // Validation
    // -----------------------------------------------------------------------

    pub fn validate(&self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();
        let error = |message: String| ConfigWarning {
            level: WarnLevel::Error,
            message,
        };
        let warning = |message: String| ConfigWarning {
            level: WarnLevel::Warning,
            message,
        };

        if let Err(e) = self.schedule.validate() {
            warnings.push(error(e.to_string()));
        }
        if let Err(e) = self.rule_set() {
            warnings.push(error(e.to_string()));
        }
        if self.memory.persist && self.memory.path.is_none() {
            warnings.push(error("memory.persist is set but memory.path is missing".into()));
        }

        // Every rule needs a handler, or selecting it fails every time.
        let rule_ids: BTreeSet<&str> = self.rules.iter().map(|r| r.id.as_str()).collect();
        for id in &rule_ids {
            if !self.actions.contains_key(*id) {
                warnings.push(error(format!("rule '{id}' has no action in actions")));
            }
        }
        for id in self.actions.keys() {
            if !rule_ids.contains(id.as_str()) {
                warnings.push(warning(format!("action '{id}' is never selected by a rule")));
            }
        }

        for rule in &self.rules {
            for fact in rule.when.referenced_facts() {
                if !self.facts.contains_key(fact) {
                    warnings.push(warning(format!(
                        "rule '{}' reads fact '{fact}' which no probe provides",
                        rule.id
                    )));
                }
            }
        }

        for (id, spec) in &self.actions {
            if let HandlerSpec::Command { command, .. } = spec {
                if command.trim().is_empty() {
                    warnings.push(warning(format!("action '{id}' has an empty command")));
                }
            }
        }
        for (name, source) in &self.facts {
            if let FactSource::CommandSucceeds { command, .. } = source {
                if command.trim().is_empty() {
                    warnings.push(warning(format!("fact '{name}' has an empty command")));
                }
            }
        }

        warnings
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
