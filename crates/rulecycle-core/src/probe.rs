//! State probes: where snapshots come from.
//!
//! `HostProbe` evaluates a configured set of fact sources against the local
//! machine. Every source is best-effort: a source that cannot be evaluated
//! reports `false` (or is left out), so probing never fails a cycle.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::shell::run_shell;
use crate::snapshot::{Fact, StateSnapshot};

const DEFAULT_PROBE_TIMEOUT_SECS: u64 = 10;

/// Produces one snapshot per cycle. May have side effects (spawning
/// processes, reading the filesystem).
pub trait StateProbe: Send + Sync {
    fn observe(&self) -> StateSnapshot;
}

// ---------------------------------------------------------------------------
// FactSource
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FactSource {
    PathExists { path: PathBuf },
    /// True when the command exits 0 within the timeout.
    CommandSucceeds {
        command: String,
        #[serde(default)]
        timeout_secs: Option<u64>,
    },
    BinaryAvailable { name: String },
    /// Text value of an environment variable; omitted when unset.
    Env { var: String },
    Value { value: Fact },
}

impl FactSource {
    fn observe(&self, name: &str) -> Option<Fact> {
        match self {
            FactSource::PathExists { path } => Some(Fact::Bool(path.exists())),
            FactSource::CommandSucceeds {
                command,
                timeout_secs,
            } => {
                let timeout =
                    Duration::from_secs(timeout_secs.unwrap_or(DEFAULT_PROBE_TIMEOUT_SECS));
                let outcome = run_shell(command, Some(timeout));
                if !outcome.success() {
                    tracing::debug!(fact = name, result = %outcome.describe(), "probe command did not succeed");
                }
                Some(Fact::Bool(outcome.success()))
            }
            FactSource::BinaryAvailable { name: bin } => Some(Fact::Bool(which::which(bin).is_ok())),
            FactSource::Env { var } => match std::env::var(var) {
                Ok(v) => Some(Fact::Text(v)),
                Err(e) => {
                    tracing::debug!(fact = name, var = %var, error = %e, "env fact not set");
                    None
                }
            },
            FactSource::Value { value } => Some(value.clone()),
        }
    }
}

// ---------------------------------------------------------------------------
// HostProbe
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct HostProbe {
    sources: BTreeMap<String, FactSource>,
}

impl HostProbe {
    pub fn new(sources: BTreeMap<String, FactSource>) -> Self {
        Self { sources }
    }

    pub fn fact_names(&self) -> impl Iterator<Item = &str> {
        self.sources.keys().map(String::as_str)
    }
}

impl StateProbe for HostProbe {
    fn observe(&self) -> StateSnapshot {
        let mut builder = StateSnapshot::builder();
        for (name, source) in &self.sources {
            if let Some(fact) = source.observe(name) {
                builder.insert(name.clone(), fact);
            }
        }
        builder.build()
    }
}

/// Always returns the same snapshot.
#[derive(Debug, Clone, Default)]
pub struct StaticProbe(pub StateSnapshot);

impl StateProbe for StaticProbe {
    fn observe(&self) -> StateSnapshot {
        self.0.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn host_probe_collects_facts() {
        let dir = TempDir::new().unwrap();
        let present = dir.path().join("present");
        std::fs::write(&present, b"").unwrap();

        let yaml = format!(
            r#"
present:
  type: path_exists
  path: {}
absent:
  type: path_exists
  path: {}
ok:
  type: command_succeeds
  command: "true"
bad:
  type: command_succeeds
  command: "exit 1"
role:
  type: value
  value: web
"#,
            present.display(),
            dir.path().join("absent").display()
        );
        let sources: BTreeMap<String, FactSource> = serde_yaml::from_str(&yaml).unwrap();
        let snap = HostProbe::new(sources).observe();

        assert!(snap.get_bool("present"));
        assert!(!snap.get_bool("absent"));
        assert!(snap.get_bool("ok"));
        assert!(!snap.get_bool("bad"));
        assert_eq!(snap.get("role"), Some(&Fact::Text("web".into())));
    }

    #[test]
    fn unset_env_is_omitted() {
        let mut sources = BTreeMap::new();
        sources.insert(
            "ghost".to_string(),
            FactSource::Env {
                var: "RULECYCLE_TEST_SURELY_UNSET_VAR".into(),
            },
        );
        let snap = HostProbe::new(sources).observe();
        assert!(!snap.contains("ghost"));
    }

    #[test]
    fn sh_is_available() {
        let mut sources = BTreeMap::new();
        sources.insert(
            "sh".to_string(),
            FactSource::BinaryAvailable { name: "sh".into() },
        );
        assert!(HostProbe::new(sources).observe().get_bool("sh"));
    }
}
