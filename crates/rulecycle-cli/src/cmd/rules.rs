use super::load_config;
use crate::output::{print_json, print_table};
use std::path::Path;

pub fn run(config_path: &Path, json: bool) -> anyhow::Result<()> {
    let config = load_config(config_path)?;
    // Compile to surface bad weights or patterns before listing.
    config.rule_set()?;

    if json {
        return print_json(&config.rules);
    }

    if config.rules.is_empty() {
        println!("No rules configured.");
        return Ok(());
    }

    let rows = config
        .rules
        .iter()
        .map(|r| {
            let action = config
                .actions
                .get(&r.id)
                .map(|spec| spec.kind().to_string())
                .unwrap_or_else(|| "(missing)".to_string());
            let facts = r.when.referenced_facts().join(",");
            vec![r.id.clone(), r.weight.to_string(), action, facts]
        })
        .collect();
    print_table(&["ID", "WEIGHT", "ACTION", "FACTS"], rows);
    Ok(())
}
