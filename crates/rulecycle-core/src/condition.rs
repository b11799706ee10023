//! Rule conditions: the `Predicate` seam and the declarative condition
//! language used in configuration files.
//!
//! A `Condition` is the serialized form (tagged YAML). It is compiled once at
//! load time into a `CompiledCondition`, which is what rules hold at runtime.
//! Regex patterns are compiled during that step, so a bad pattern is a load
//! error rather than a per-cycle evaluation error.

use crate::error::{Error, Result};
use crate::snapshot::{Fact, StateSnapshot};
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error as ThisError;

// ---------------------------------------------------------------------------
// Predicate
// ---------------------------------------------------------------------------

/// Reason a predicate could not produce an answer for a snapshot.
#[derive(Debug, Clone, PartialEq, ThisError)]
#[error("{0}")]
pub struct EvalError(pub String);

/// A pure test over a `StateSnapshot`.
///
/// Implementations must not mutate anything observable. Returning `Err` marks
/// the owning rule ineligible for the current cycle only.
pub trait Predicate: Send + Sync {
    fn evaluate(&self, state: &StateSnapshot) -> std::result::Result<bool, EvalError>;
}

/// Adapter for infallible closures.
pub struct FnPredicate<F>(pub F);

impl<F> Predicate for FnPredicate<F>
where
    F: Fn(&StateSnapshot) -> bool + Send + Sync,
{
    fn evaluate(&self, state: &StateSnapshot) -> std::result::Result<bool, EvalError> {
        Ok((self.0)(state))
    }
}

/// Adapter for fallible closures.
pub struct TryFnPredicate<F>(pub F);

impl<F> Predicate for TryFnPredicate<F>
where
    F: Fn(&StateSnapshot) -> std::result::Result<bool, EvalError> + Send + Sync,
{
    fn evaluate(&self, state: &StateSnapshot) -> std::result::Result<bool, EvalError> {
        (self.0)(state)
    }
}

// ---------------------------------------------------------------------------
// Condition (configuration form)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompareOp {
    Gt,
    Ge,
    Lt,
    Le,
}

impl CompareOp {
    fn apply(self, lhs: f64, rhs: f64) -> bool {
        match self {
            CompareOp::Gt => lhs > rhs,
            CompareOp::Ge => lhs >= rhs,
            CompareOp::Lt => lhs < rhs,
            CompareOp::Le => lhs <= rhs,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Condition {
    #[default]
    Always,
    Never,
    /// True only when the fact is the boolean `true`.
    FactTrue { fact: String },
    Equals { fact: String, value: Fact },
    Exists { fact: String },
    Compare { fact: String, op: CompareOp, value: f64 },
    Matches { fact: String, pattern: String },
    All { of: Vec<Condition> },
    Any { of: Vec<Condition> },
    Not { condition: Box<Condition> },
}

impl Condition {
    /// Compile into the runtime form. `rule_id` is only used in error messages.
    pub fn compile(&self, rule_id: &str) -> Result<CompiledCondition> {
        Ok(match self {
            Condition::Always => CompiledCondition::Always,
            Condition::Never => CompiledCondition::Never,
            Condition::FactTrue { fact } => CompiledCondition::FactTrue(fact.clone()),
            Condition::Equals { fact, value } => CompiledCondition::Equals {
                fact: fact.clone(),
                value: value.clone(),
            },
            Condition::Exists { fact } => CompiledCondition::Exists(fact.clone()),
            Condition::Compare { fact, op, value } => {
                if !value.is_finite() {
                    return Err(Error::InvalidRule {
                        id: rule_id.to_string(),
                        reason: format!("compare on '{fact}' uses non-finite value"),
                    });
                }
                CompiledCondition::Compare {
                    fact: fact.clone(),
                    op: *op,
                    value: *value,
                }
            }
            Condition::Matches { fact, pattern } => {
                let re = Regex::new(pattern).map_err(|e| Error::InvalidRule {
                    id: rule_id.to_string(),
                    reason: format!("bad pattern for fact '{fact}': {e}"),
                })?;
                CompiledCondition::Matches {
                    fact: fact.clone(),
                    pattern: re,
                }
            }
            Condition::All { of } => CompiledCondition::All(
                of.iter()
                    .map(|c| c.compile(rule_id))
                    .collect::<Result<Vec<_>>>()?,
            ),
            Condition::Any { of } => CompiledCondition::Any(
                of.iter()
                    .map(|c| c.compile(rule_id))
                    .collect::<Result<Vec<_>>>()?,
            ),
            Condition::Not { condition } => {
                CompiledCondition::Not(Box::new(condition.compile(rule_id)?))
            }
        })
    }

    /// Every fact name this condition reads, in declaration order.
    pub fn referenced_facts(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_facts(&mut out);
        out
    }

    fn collect_facts<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Condition::Always | Condition::Never => {}
            Condition::FactTrue { fact }
            | Condition::Equals { fact, .. }
            | Condition::Exists { fact }
            | Condition::Compare { fact, .. }
            | Condition::Matches { fact, .. } => out.push(fact),
            Condition::All { of } | Condition::Any { of } => {
                for c in of {
                    c.collect_facts(out);
                }
            }
            Condition::Not { condition } => condition.collect_facts(out),
        }
    }
}

// ---------------------------------------------------------------------------
// CompiledCondition
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub enum CompiledCondition {
    Always,
    Never,
    FactTrue(String),
    Equals { fact: String, value: Fact },
    Exists(String),
    Compare { fact: String, op: CompareOp, value: f64 },
    Matches { fact: String, pattern: Regex },
    All(Vec<CompiledCondition>),
    Any(Vec<CompiledCondition>),
    Not(Box<CompiledCondition>),
}

impl Predicate for CompiledCondition {
    fn evaluate(&self, state: &StateSnapshot) -> std::result::Result<bool, EvalError> {
        match self {
            CompiledCondition::Always => Ok(true),
            CompiledCondition::Never => Ok(false),
            CompiledCondition::FactTrue(fact) => Ok(state.get_bool(fact)),
            CompiledCondition::Equals { fact, value } => {
                Ok(state.get(fact).is_some_and(|v| v == value))
            }
            CompiledCondition::Exists(fact) => Ok(state.contains(fact)),
            CompiledCondition::Compare { fact, op, value } => match state.get(fact) {
                Some(Fact::Number(n)) => Ok(op.apply(*n, *value)),
                Some(other) => Err(EvalError(format!(
                    "fact '{fact}' is {}, expected number",
                    other.kind()
                ))),
                None => Err(EvalError(format!("fact '{fact}' was not observed"))),
            },
            CompiledCondition::Matches { fact, pattern } => match state.get(fact) {
                Some(Fact::Text(s)) => Ok(pattern.is_match(s)),
                Some(other) => Err(EvalError(format!(
                    "fact '{fact}' is {}, expected text",
                    other.kind()
                ))),
                None => Ok(false),
            },
            CompiledCondition::All(of) => {
                for c in of {
                    if !c.evaluate(state)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            CompiledCondition::Any(of) => {
                for c in of {
                    if c.evaluate(state)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            CompiledCondition::Not(inner) => Ok(!inner.evaluate(state)?),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn compile(yaml: &str) -> CompiledCondition {
        let c: Condition = serde_yaml::from_str(yaml).unwrap();
        c.compile("test").unwrap()
    }

    fn snap() -> StateSnapshot {
        StateSnapshot::builder()
            .fact("flag", true)
            .fact("load", 0.75)
            .fact("os", "debian 12")
            .build()
    }

    #[test]
    fn fact_true_and_missing() {
        assert!(compile("type: fact_true\nfact: flag").evaluate(&snap()).unwrap());
        assert!(!compile("type: fact_true\nfact: nope").evaluate(&snap()).unwrap());
    }

    #[test]
    fn equals_compares_typed_values() {
        let c = compile("type: equals\nfact: os\nvalue: debian 12");
        assert!(c.evaluate(&snap()).unwrap());
        let c = compile("type: equals\nfact: flag\nvalue: false");
        assert!(!c.evaluate(&snap()).unwrap());
    }

    #[test]
    fn compare_on_wrong_type_is_an_error() {
        let c = compile("type: compare\nfact: os\nop: gt\nvalue: 1");
        let err = c.evaluate(&snap()).unwrap_err();
        assert!(err.0.contains("expected number"), "{err}");
    }

    #[test]
    fn compare_on_missing_fact_is_an_error() {
        let c = compile("type: compare\nfact: disk\nop: lt\nvalue: 1");
        assert!(c.evaluate(&snap()).is_err());
    }

    #[test]
    fn compare_numbers() {
        assert!(compile("type: compare\nfact: load\nop: ge\nvalue: 0.75")
            .evaluate(&snap())
            .unwrap());
        assert!(!compile("type: compare\nfact: load\nop: lt\nvalue: 0.5")
            .evaluate(&snap())
            .unwrap());
    }

    #[test]
    fn matches_uses_regex() {
        let c = compile("type: matches\nfact: os\npattern: '^debian'");
        assert!(c.evaluate(&snap()).unwrap());
    }

    #[test]
    fn bad_regex_fails_compile() {
        let c: Condition = serde_yaml::from_str("type: matches\nfact: os\npattern: '('").unwrap();
        let err = c.compile("r9").unwrap_err();
        assert!(err.is_config());
        assert!(err.to_string().contains("r9"));
    }

    #[test]
    fn combinators_nest() {
        let c = compile(
            r#"
type: all
of:
  - type: fact_true
    fact: flag
  - type: not
    condition:
      type: exists
      fact: ssh
  - type: any
    of:
      - type: never
      - type: always
"#,
        );
        assert!(c.evaluate(&snap()).unwrap());
    }

    #[test]
    fn combinator_propagates_child_error() {
        let c = compile(
            "type: any\nof:\n  - type: compare\n    fact: os\n    op: gt\n    value: 1\n",
        );
        assert!(c.evaluate(&snap()).is_err());
    }

    #[test]
    fn referenced_facts_walks_tree() {
        let c: Condition = serde_yaml::from_str(
            "type: all\nof:\n  - type: exists\n    fact: a\n  - type: not\n    condition:\n      type: fact_true\n      fact: b\n",
        )
        .unwrap();
        assert_eq!(c.referenced_facts(), vec!["a", "b"]);
    }

    #[test]
    fn closures_are_predicates() {
        let p = FnPredicate(|s: &StateSnapshot| s.get_bool("flag"));
        assert!(p.evaluate(&snap()).unwrap());
        let p = TryFnPredicate(|_: &StateSnapshot| -> std::result::Result<bool, EvalError> {
            Err(EvalError("boom".into()))
        });
        assert_eq!(p.evaluate(&snap()).unwrap_err().0, "boom");
    }
}
