use super::load_config;
use crate::output::{print_json, print_table};
use anyhow::Context;
use rulecycle_core::audit::read_records;
use std::path::Path;

pub fn run(config_path: &Path, limit: Option<usize>, json: bool) -> anyhow::Result<()> {
    let config = load_config(config_path)?;
    let mut records = read_records(&config.audit.path)
        .with_context(|| format!("failed to read {}", config.audit.path.display()))?;
    if let Some(n) = limit {
        let skip = records.len().saturating_sub(n);
        records.drain(..skip);
    }

    if json {
        return print_json(&records);
    }
    if records.is_empty() {
        println!("No actions recorded.");
        return Ok(());
    }
    let rows = records
        .iter()
        .map(|r| {
            vec![
                r.timestamp.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
                r.action_id.clone(),
            ]
        })
        .collect();
    print_table(&["TIME", "ACTION"], rows);
    Ok(())
}
