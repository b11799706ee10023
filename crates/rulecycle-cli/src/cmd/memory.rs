use super::load_config;
use crate::output::{print_json, print_table};
use anyhow::Context;
use clap::Subcommand;
use rulecycle_core::memory::MemoryStore;
use std::path::Path;

#[derive(Subcommand)]
pub enum MemorySubcommand {
    /// List rule ids that will not be selected again
    List,

    /// Forget every excluded id (stop the daemon first)
    Clear,
}

pub fn run(config_path: &Path, subcmd: MemorySubcommand, json: bool) -> anyhow::Result<()> {
    let config = load_config(config_path)?;
    if !config.memory.persist {
        anyhow::bail!(
            "exclusion memory is not persisted (memory.persist: false); \
             it only lives inside a running daemon"
        );
    }
    let path = config
        .memory
        .path
        .as_deref()
        .context("memory.persist is set but memory.path is missing")?;
    let store = MemoryStore::open(path)
        .with_context(|| format!("failed to open {}", path.display()))?;

    match subcmd {
        MemorySubcommand::List => {
            let entries = store.list()?;
            if json {
                let value: Vec<_> = entries
                    .iter()
                    .map(|(id, at)| serde_json::json!({ "id": id, "selected_at": at }))
                    .collect();
                return print_json(&value);
            }
            if entries.is_empty() {
                println!("No rules excluded.");
                return Ok(());
            }
            let rows = entries
                .iter()
                .map(|(id, at)| vec![id.clone(), at.format("%Y-%m-%d %H:%M:%S UTC").to_string()])
                .collect();
            print_table(&["ID", "SELECTED"], rows);
        }
        MemorySubcommand::Clear => {
            let n = store.clear()?;
            if json {
                print_json(&serde_json::json!({ "cleared": n }))?;
            } else {
                println!("Cleared {n} excluded rule(s).");
            }
        }
    }
    Ok(())
}
