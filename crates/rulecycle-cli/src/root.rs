use rulecycle_core::config::CONFIG_FILE;
use std::path::{Path, PathBuf};

/// Resolve the config file path.
///
/// Priority:
/// 1. `--config` flag / `RULECYCLE_CONFIG` env var (passed in as `explicit`)
/// 2. Walk upward from `cwd` looking for `rulecycle.yaml`
/// 3. `~/.config/rulecycle/rulecycle.yaml` if it exists
/// 4. Fall back to `cwd/rulecycle.yaml`
pub fn resolve_config(explicit: Option<&Path>) -> PathBuf {
    if let Some(p) = explicit {
        return p.to_path_buf();
    }

    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));

    let mut dir = cwd.clone();
    loop {
        let candidate = dir.join(CONFIG_FILE);
        if candidate.is_file() {
            return candidate;
        }
        match dir.parent() {
            Some(p) => dir = p.to_path_buf(),
            None => break,
        }
    }

    if let Some(home) = home::home_dir() {
        let candidate = home.join(".config/rulecycle").join(CONFIG_FILE);
        if candidate.is_file() {
            return candidate;
        }
    }

    cwd.join(CONFIG_FILE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn explicit_config_wins() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("custom.yaml");
        assert_eq!(resolve_config(Some(&path)), path);
    }

    #[test]
    fn fallback_names_config_file() {
        let resolved = resolve_config(None);
        assert!(resolved.ends_with(CONFIG_FILE));
    }
}
