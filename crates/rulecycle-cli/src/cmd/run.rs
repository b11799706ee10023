use super::{load_config, open_memory};
use crate::output::print_json;
use anyhow::Context;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rulecycle_core::audit::JsonlAuditLog;
use rulecycle_core::config::WarnLevel;
use rulecycle_core::engine::SelectionEngine;
use rulecycle_core::scheduler::Scheduler;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

pub fn run(
    config_path: &Path,
    cycles: Option<u64>,
    seed: Option<u64>,
    json: bool,
) -> anyhow::Result<()> {
    let config = load_config(config_path)?;

    let errors: Vec<_> = config
        .validate()
        .into_iter()
        .filter(|w| w.level == WarnLevel::Error)
        .collect();
    if !errors.is_empty() {
        for e in &errors {
            eprintln!("[error] {}", e.message);
        }
        anyhow::bail!("refusing to start: config has {} error(s)", errors.len());
    }

    let rules = Arc::new(config.rule_set()?);
    let registry = config.registry()?;
    let memory = open_memory(&config)?;
    let engine = match seed {
        Some(s) => SelectionEngine::with_rng(rules, memory, StdRng::seed_from_u64(s)),
        None => SelectionEngine::new(rules, memory),
    };
    let sink = JsonlAuditLog::open(&config.audit.path)
        .with_context(|| format!("failed to open audit log {}", config.audit.path.display()))?;

    let mut scheduler = Scheduler::new(
        engine,
        registry,
        Arc::new(config.probe()),
        sink,
        config.schedule.clone(),
    )?;
    if let Some(n) = cycles {
        scheduler = scheduler.with_max_cycles(n);
    }
    if let Some(s) = seed {
        scheduler = scheduler.with_jitter_seed(s);
    }

    tracing::info!(
        config = %config_path.display(),
        rules = config.rules.len(),
        audit = %config.audit.path.display(),
        persist_memory = config.memory.persist,
        "rulecycle starting"
    );

    let rt = tokio::runtime::Runtime::new().context("failed to start tokio runtime")?;
    let summary = rt.block_on(async move {
        let (tx, rx) = watch::channel(false);
        tokio::spawn(wait_for_shutdown(tx));
        scheduler.run(rx).await
    });
    // Don't wait on handlers that outlived their timeout.
    rt.shutdown_timeout(Duration::from_secs(1));

    if json {
        print_json(&summary)?;
    } else {
        println!(
            "{} cycle(s): {} executed, {} failed, {} idle",
            summary.cycles, summary.executed, summary.failed, summary.idle
        );
    }
    Ok(())
}

/// Flip the shutdown flag on Ctrl-C or SIGTERM. If signal handling cannot be
/// installed the sender is held forever so the loop keeps running.
async fn wait_for_shutdown(tx: watch::Sender<bool>) {
    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "cannot listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    tokio::select! {
        _ = ctrl_c => tracing::info!("received Ctrl-C, shutting down"),
        _ = terminate => tracing::info!("received SIGTERM, shutting down"),
    }
    let _ = tx.send(true);
    // Keep the sender alive; dropping it also stops the loop.
    std::future::pending::<()>().await;
}
