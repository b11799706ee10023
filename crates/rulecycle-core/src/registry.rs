//! Static mapping from action id to handler.
//!
//! The registry is filled once at startup and then shared read-only with the
//! scheduler. The engine never looks inside a handler; it only calls `run`.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::{Error, Result};

/// The opaque unit of work executed when a rule is selected.
pub trait Handler: Send + Sync {
    /// Run to completion. Any failure is reported as `Error::Action`.
    fn run(&self) -> Result<()>;
}

impl<F> Handler for F
where
    F: Fn() -> Result<()> + Send + Sync,
{
    fn run(&self) -> Result<()> {
        self()
    }
}

#[derive(Default, Clone)]
pub struct ActionRegistry {
    handlers: BTreeMap<String, Arc<dyn Handler>>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, id: impl Into<String>, handler: Arc<dyn Handler>) -> Result<()> {
        let id = id.into();
        if self.handlers.contains_key(&id) {
            return Err(Error::DuplicateAction(id));
        }
        self.handlers.insert(id, handler);
        Ok(())
    }

    pub fn resolve(&self, id: &str) -> Result<Arc<dyn Handler>> {
        self.handlers
            .get(id)
            .cloned()
            .ok_or_else(|| Error::UnknownAction(id.to_string()))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.handlers.contains_key(id)
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl std::fmt::Debug for ActionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.handlers.keys()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn resolve_runs_registered_handler() {
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        let mut reg = ActionRegistry::new();
        reg.register(
            "count",
            Arc::new(move || -> Result<()> {
                h.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
        )
        .unwrap();

        reg.resolve("count").unwrap().run().unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unknown_id_is_an_error() {
        let reg = ActionRegistry::new();
        let err = reg.resolve("ghost").err().unwrap();
        assert!(matches!(err, Error::UnknownAction(ref id) if id == "ghost"));
    }

    #[test]
    fn double_registration_rejected() {
        let mut reg = ActionRegistry::new();
        reg.register("a", Arc::new(|| -> Result<()> { Ok(()) })).unwrap();
        let err = reg.register("a", Arc::new(|| -> Result<()> { Ok(()) })).unwrap_err();
        assert!(err.is_config());
    }
}
