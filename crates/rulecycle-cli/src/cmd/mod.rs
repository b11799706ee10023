pub mod audit;
pub mod check;
pub mod init;
pub mod memory;
pub mod observe;
pub mod rules;
pub mod run;

use anyhow::Context;
use rulecycle_core::config::Config;
use rulecycle_core::memory::ExclusionMemory;
use std::path::Path;

pub(crate) fn load_config(path: &Path) -> anyhow::Result<Config> {
    Config::load(path).with_context(|| format!("failed to load config {}", path.display()))
}

/// Exclusion memory as configured: persisted in redb, or fresh for this
/// process.
pub(crate) fn open_memory(config: &Config) -> anyhow::Result<ExclusionMemory> {
    if !config.memory.persist {
        return Ok(ExclusionMemory::new());
    }
    let path = config
        .memory
        .path
        .as_deref()
        .context("memory.persist is set but memory.path is missing")?;
    ExclusionMemory::persistent(path)
        .with_context(|| format!("failed to open exclusion memory {}", path.display()))
}
