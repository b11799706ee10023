//! Condition-gated, weighted, non-repeating action selection.
//!
//! Each cycle a `StateProbe` produces a `StateSnapshot`; the
//! `SelectionEngine` picks at most one eligible `Rule` it has never picked
//! before; the `ActionRegistry` maps the rule id to a `Handler`; successful
//! runs are appended to an `AuditSink`. `Scheduler` drives that cycle on a
//! randomized interval until shut down.

pub mod audit;
pub mod condition;
pub mod config;
pub mod engine;
pub mod error;
pub mod handlers;
pub mod io;
pub mod memory;
pub mod probe;
pub mod registry;
pub mod rules;
pub mod scheduler;
pub mod shell;
pub mod snapshot;

pub use engine::{Selection, SelectionEngine};
pub use error::{Error, Result};
pub use registry::{ActionRegistry, Handler};
pub use rules::{Rule, RuleSet};
pub use scheduler::{CycleOutcome, RunSummary, Scheduler};
pub use snapshot::{Fact, StateSnapshot};
