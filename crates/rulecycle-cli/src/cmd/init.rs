use anyhow::Context;
use rulecycle_core::io::write_if_missing;
use std::path::Path;

const STARTER_CONFIG: &str = r#"# rulecycle configuration
#
# Every cycle the daemon waits a random interval, probes the facts below,
# and runs at most one eligible rule it has not run before.

schedule:
  min_interval_secs: 180
  max_interval_secs: 420
  handler_timeout_secs: 300

memory:
  # Keep the set of already-run rules across restarts.
  persist: false
  path: rulecycle-memory.redb

audit:
  path: rulecycle-audit.jsonl

facts:
  apt_installed:
    type: path_exists
    path: /usr/bin/apt
  sshd_running:
    type: command_succeeds
    command: systemctl is-active --quiet sshd
    timeout_secs: 5

actions:
  note-apt:
    type: log
    message: apt is installed on this host
  note-sshd:
    type: append_file
    path: rulecycle-notes.txt
    line: sshd was running
  uptime:
    type: command
    command: uptime
    timeout_secs: 10

rules:
  - id: note-apt
    weight: 1
    when:
      type: fact_true
      fact: apt_installed
  - id: note-sshd
    weight: 3
    when:
      type: fact_true
      fact: sshd_running
  - id: uptime
    weight: 1
"#;

pub fn run(config: &Path) -> anyhow::Result<()> {
    let written = write_if_missing(config, STARTER_CONFIG.as_bytes())
        .with_context(|| format!("failed to write {}", config.display()))?;
    if written {
        println!("Wrote {}", config.display());
    } else {
        println!("{} already exists; left unchanged.", config.display());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rulecycle_core::config::Config;

    #[test]
    fn starter_config_is_valid() {
        let cfg = Config::from_yaml(STARTER_CONFIG).unwrap();
        assert!(cfg.validate().is_empty(), "{:?}", cfg.validate());
        assert_eq!(cfg.rule_set().unwrap().len(), 3);
    }
}
