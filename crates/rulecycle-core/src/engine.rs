//! Selection engine: condition filtering, exclusion, weighted choice.
//!
//! Each call to `select` picks at most one rule. Weights are mapped to
//! integer ticks before sampling (see `weight_ticks`). A chosen id is
//! written to exclusion memory before `select` returns, so a crash between
//! selection and execution still counts the rule as used (at most once per
//! memory lifetime).

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use rand::distributions::{Distribution, WeightedIndex};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Serialize;

use crate::condition::EvalError;
use crate::error::Error;
use crate::memory::ExclusionMemory;
use crate::rules::{Rule, RuleSet};
use crate::snapshot::StateSnapshot;

// ---------------------------------------------------------------------------
// Selection
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "action_id", rename_all = "snake_case")]
pub enum Selection {
    /// Nothing eligible this cycle. A normal outcome.
    None,
    Chosen(String),
}

impl Selection {
    pub fn chosen(&self) -> Option<&str> {
        match self {
            Selection::Chosen(id) => Some(id),
            Selection::None => None,
        }
    }
}

/// An eligible rule and its share of the total eligible weight.
#[derive(Debug, Clone, Serialize)]
pub struct Candidate<'a> {
    pub id: &'a str,
    pub weight: f64,
    pub probability: f64,
}

// ---------------------------------------------------------------------------
// SelectionEngine
// ---------------------------------------------------------------------------

pub struct SelectionEngine {
    rules: Arc<RuleSet>,
    memory: ExclusionMemory,
    rng: StdRng,
}

impl SelectionEngine {
    pub fn new(rules: Arc<RuleSet>, memory: ExclusionMemory) -> Self {
        Self::with_rng(rules, memory, StdRng::from_entropy())
    }

    /// Use a caller-supplied generator, e.g. `StdRng::seed_from_u64` for
    /// reproducible runs.
    pub fn with_rng(rules: Arc<RuleSet>, memory: ExclusionMemory, rng: StdRng) -> Self {
        Self { rules, memory, rng }
    }

    pub fn rules(&self) -> &RuleSet {
        &self.rules
    }

    pub fn memory(&self) -> &ExclusionMemory {
        &self.memory
    }

    pub fn is_excluded(&self, id: &str) -> bool {
        self.memory.contains(id)
    }

    /// Rules whose condition holds for `state` and that are not excluded,
    /// in rule-set order.
    pub fn eligible(&self, state: &StateSnapshot) -> Vec<&Rule> {
        eligible_rules(&self.rules, &self.memory, state)
    }

    /// Eligible rules annotated with the probability `select` would give
    /// them.
    pub fn candidates(&self, state: &StateSnapshot) -> Vec<Candidate<'_>> {
        let eligible = self.eligible(state);
        let ticks = weight_ticks(eligible.iter().map(|r| r.weight()));
        let total: u64 = ticks.iter().sum();
        eligible
            .into_iter()
            .zip(ticks)
            .map(|(r, t)| Candidate {
                id: r.id(),
                weight: r.weight(),
                probability: t as f64 / total as f64,
            })
            .collect()
    }

    /// Pick one eligible rule with probability proportional to its weight and
    /// exclude it from all later selections.
    pub fn select(&mut self, state: &StateSnapshot) -> Selection {
        let eligible = eligible_rules(&self.rules, &self.memory, state);
        if eligible.is_empty() {
            tracing::debug!("no eligible candidate");
            return Selection::None;
        }

        let ticks = weight_ticks(eligible.iter().map(|r| r.weight()));
        let sampler = match WeightedIndex::new(&ticks) {
            Ok(s) => s,
            Err(e) => {
                tracing::error!(error = %e, "eligible weights are unusable");
                return Selection::None;
            }
        };
        let n = eligible.len();
        let id = eligible[sampler.sample(&mut self.rng)].id().to_string();

        if let Err(e) = self.memory.insert(&id) {
            tracing::error!(action_id = %id, error = %e, "failed to persist exclusion");
        }
        tracing::debug!(action_id = %id, eligible = n, "selected");
        Selection::Chosen(id)
    }
}

/// Integer share of each weight, relative to the largest. Every positive
/// weight gets at least one tick, and the total never exceeds 2^62, so the
/// sum neither overflows nor absorbs small weights the way an f64 running
/// total does.
fn weight_ticks(weights: impl Iterator<Item = f64> + Clone) -> Vec<u64> {
    let n = weights.clone().count().max(1) as u64;
    let max = weights.clone().fold(0.0_f64, f64::max);
    if max <= 0.0 || !max.is_finite() {
        return weights.map(|_| 1).collect();
    }
    let scale = ((1u64 << 62) / n).min(1u64 << 52) as f64;
    weights
        .map(|w| ((w / max) * scale).round().max(1.0) as u64)
        .collect()
}

fn eligible_rules<'a>(
    rules: &'a RuleSet,
    memory: &ExclusionMemory,
    state: &StateSnapshot,
) -> Vec<&'a Rule> {
    rules
        .iter()
        .filter(|rule| !memory.contains(rule.id()))
        .filter(|rule| condition_holds(rule, state))
        .collect()
}

/// Evaluate a rule's condition. Errors and panics count as "false" for this
/// cycle and are logged.
fn condition_holds(rule: &Rule, state: &StateSnapshot) -> bool {
    let result = panic::catch_unwind(AssertUnwindSafe(|| rule.condition().evaluate(state)))
        .unwrap_or_else(|_| Err(EvalError("condition panicked".into())));
    match result {
        Ok(b) => b,
        Err(EvalError(reason)) => {
            let err = Error::ConditionEvaluation {
                rule: rule.id().to_string(),
                reason,
            };
            tracing::warn!(action_id = %rule.id(), "{err}; skipping rule this cycle");
            false
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::condition::EvalError;
    use std::collections::HashMap;

    fn engine(rules: Vec<Rule>, seed: u64) -> SelectionEngine {
        let set = Arc::new(RuleSet::from_rules(rules).unwrap());
        SelectionEngine::with_rng(set, ExclusionMemory::new(), StdRng::seed_from_u64(seed))
    }

    fn flag_rules() -> Vec<Rule> {
        vec![
            Rule::from_fn("r1", 1.0, |s| s.get_bool("flag")),
            Rule::from_fn("r2", 1.0, |_| true),
        ]
    }

    #[test]
    fn end_to_end_flag_scenario() {
        let mut e = engine(flag_rules(), 7);
        let state = StateSnapshot::builder().fact("flag", false).build();

        assert_eq!(e.select(&state), Selection::Chosen("r2".into()));
        assert_eq!(e.select(&state), Selection::None);
        assert!(!e.is_excluded("r1"));
    }

    #[test]
    fn never_returns_ineligible_ids() {
        for seed in 0..200 {
            let mut e = engine(
                vec![
                    Rule::from_fn("off", 100.0, |_| false),
                    Rule::from_fn("on-a", 1.0, |_| true),
                    Rule::from_fn("on-b", 2.0, |_| true),
                ],
                seed,
            );
            let picked = e.select(&StateSnapshot::empty());
            assert_ne!(picked.chosen(), Some("off"));
            assert!(picked.chosen().is_some());
        }
    }

    #[test]
    fn exclusion_is_permanent() {
        let mut e = engine(
            vec![
                Rule::from_fn("a", 1.0, |_| true),
                Rule::from_fn("b", 1.0, |_| true),
                Rule::from_fn("c", 1.0, |_| true),
            ],
            3,
        );
        let state = StateSnapshot::empty();
        let mut seen = Vec::new();
        while let Selection::Chosen(id) = e.select(&state) {
            assert!(!seen.contains(&id), "{id} selected twice");
            seen.push(id);
        }
        seen.sort();
        assert_eq!(seen, vec!["a", "b", "c"]);
        assert_eq!(e.select(&state), Selection::None);
    }

    #[test]
    fn empty_eligible_set_leaves_memory_unchanged() {
        let mut e = engine(vec![Rule::from_fn("x", 1.0, |s| s.get_bool("go"))], 1);
        assert_eq!(e.select(&StateSnapshot::empty()), Selection::None);
        assert!(e.memory().is_empty());
    }

    #[test]
    fn all_eligible_already_excluded_returns_none() {
        let mut e = engine(vec![Rule::from_fn("x", 1.0, |_| true)], 1);
        e.select(&StateSnapshot::empty());
        let before = e.memory().len();
        assert_eq!(e.select(&StateSnapshot::empty()), Selection::None);
        assert_eq!(e.memory().len(), before);
    }

    #[test]
    fn empty_ruleset_selects_nothing() {
        let mut e = engine(Vec::new(), 1);
        assert_eq!(e.select(&StateSnapshot::empty()), Selection::None);
    }

    #[test]
    fn failing_condition_skips_only_that_rule() {
        let mut e = engine(
            vec![
                Rule::try_from_fn("broken", 1000.0, |_| Err(EvalError("probe gap".into()))),
                Rule::from_fn("fine", 1.0, |_| true),
            ],
            11,
        );
        assert_eq!(e.select(&StateSnapshot::empty()), Selection::Chosen("fine".into()));
        assert!(!e.is_excluded("broken"));
    }

    #[test]
    fn panicking_condition_is_treated_as_false() {
        let mut e = engine(
            vec![
                Rule::from_fn("panics", 1.0, |_| panic!("bad predicate")),
                Rule::from_fn("ok", 1.0, |_| true),
            ],
            5,
        );
        assert_eq!(e.select(&StateSnapshot::empty()), Selection::Chosen("ok".into()));
    }

    #[test]
    fn weights_are_proportional() {
        let mut rng = StdRng::seed_from_u64(42);
        let set = Arc::new(
            RuleSet::from_rules(vec![
                Rule::from_fn("A", 1.0, |_| true),
                Rule::from_fn("B", 3.0, |_| true),
            ])
            .unwrap(),
        );
        let mut counts: HashMap<String, u32> = HashMap::new();
        let trials = 20_000;
        for _ in 0..trials {
            // fresh memory per trial
            let child = StdRng::from_rng(&mut rng).unwrap();
            let mut e = SelectionEngine::with_rng(set.clone(), ExclusionMemory::new(), child);
            let id = e.select(&StateSnapshot::empty()).chosen().unwrap().to_string();
            *counts.entry(id).or_default() += 1;
        }
        let a = f64::from(counts["A"]);
        let b = f64::from(counts["B"]);
        let ratio = b / a;
        assert!((2.7..3.3).contains(&ratio), "B/A ratio was {ratio}");
    }

    #[test]
    fn every_positive_weight_gets_a_tick() {
        let ticks = weight_ticks([1.0, 1e-17, 5e-324, 0.5].into_iter());
        assert_eq!(ticks[0], 1u64 << 52);
        assert_eq!(ticks[1], 1);
        assert_eq!(ticks[2], 1);
        assert_eq!(ticks[3], 1u64 << 51);
    }

    #[test]
    fn ticks_stay_summable_for_many_rules() {
        let weights = vec![f64::MAX; 10_000];
        let ticks = weight_ticks(weights.into_iter());
        let total = ticks.iter().try_fold(0u64, |acc, t| acc.checked_add(*t));
        assert!(total.is_some());
    }

    #[test]
    fn tiny_weight_keeps_nonzero_probability() {
        let e = engine(
            vec![
                Rule::from_fn("big", 1.0, |_| true),
                Rule::from_fn("tiny", 1e-17, |_| true),
            ],
            1,
        );
        let c = e.candidates(&StateSnapshot::empty());
        let tiny = c.iter().find(|c| c.id == "tiny").unwrap();
        assert!(tiny.probability > 0.0);
    }

    #[test]
    fn small_weight_is_sampled_while_large_is_eligible() {
        // 1e-4 of the mass: expected ~20 hits in 200k draws
        let mut rng = StdRng::seed_from_u64(99);
        let set = Arc::new(
            RuleSet::from_rules(vec![
                Rule::from_fn("big", 1.0, |_| true),
                Rule::from_fn("small", 1e-4, |_| true),
            ])
            .unwrap(),
        );
        let mut small = 0;
        for _ in 0..200_000 {
            let child = StdRng::from_rng(&mut rng).unwrap();
            let mut e = SelectionEngine::with_rng(set.clone(), ExclusionMemory::new(), child);
            if e.select(&StateSnapshot::empty()).chosen() == Some("small") {
                small += 1;
            }
        }
        assert!(small > 0);
    }

    #[test]
    fn huge_weights_do_not_overflow() {
        let mut e = engine(
            vec![
                Rule::from_fn("a", 1e308, |_| true),
                Rule::from_fn("b", 1e308, |_| true),
            ],
            4,
        );
        let c = e.candidates(&StateSnapshot::empty());
        assert!(c.iter().all(|c| (c.probability - 0.5).abs() < 1e-12));
        assert!(e.select(&StateSnapshot::empty()).chosen().is_some());
        assert!(e.select(&StateSnapshot::empty()).chosen().is_some());
        assert_eq!(e.select(&StateSnapshot::empty()), Selection::None);
    }

    #[test]
    fn candidates_sum_to_one() {
        let e = engine(
            vec![
                Rule::from_fn("a", 1.0, |_| true),
                Rule::from_fn("b", 3.0, |_| true),
                Rule::from_fn("c", 5.0, |_| false),
            ],
            1,
        );
        let c = e.candidates(&StateSnapshot::empty());
        assert_eq!(c.len(), 2);
        let total: f64 = c.iter().map(|c| c.probability).sum();
        assert!((total - 1.0).abs() < 1e-12);
        assert!((c[1].probability - 0.75).abs() < 1e-12);
    }
}
