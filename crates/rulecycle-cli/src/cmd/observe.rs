use super::{load_config, open_memory};
use crate::output::{print_json, print_table};
use rulecycle_core::engine::SelectionEngine;
use rulecycle_core::probe::StateProbe;
use std::path::Path;
use std::sync::Arc;

pub fn run(config_path: &Path, json: bool) -> anyhow::Result<()> {
    let config = load_config(config_path)?;
    let snapshot = config.probe().observe();

    if json {
        return print_json(&snapshot);
    }
    if snapshot.is_empty() {
        println!("No facts observed.");
        return Ok(());
    }
    let rows = snapshot
        .iter()
        .map(|(name, fact)| vec![name.to_string(), fact.kind().to_string(), fact.to_string()])
        .collect();
    print_table(&["FACT", "TYPE", "VALUE"], rows);
    Ok(())
}

/// Read-only preview of the next selection. Exclusion memory is consulted
/// but never written.
pub fn eligible(config_path: &Path, json: bool) -> anyhow::Result<()> {
    let config = load_config(config_path)?;
    let rules = Arc::new(config.rule_set()?);
    let memory = open_memory(&config)?;
    let engine = SelectionEngine::new(rules, memory);
    let snapshot = config.probe().observe();
    let candidates = engine.candidates(&snapshot);

    if json {
        let value = serde_json::json!({
            "candidates": candidates,
            "excluded": engine.memory().ids(),
        });
        return print_json(&value);
    }

    if candidates.is_empty() {
        println!("No eligible rules.");
    } else {
        let rows = candidates
            .iter()
            .map(|c| {
                vec![
                    c.id.to_string(),
                    c.weight.to_string(),
                    format!("{:.1}%", c.probability * 100.0),
                ]
            })
            .collect();
        print_table(&["ID", "WEIGHT", "CHANCE"], rows);
    }
    let excluded = engine.memory().ids();
    if !excluded.is_empty() {
        println!("\nAlready run: {}", excluded.join(", "));
    }
    Ok(())
}
