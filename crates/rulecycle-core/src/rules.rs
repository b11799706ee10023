use crate::condition::{Condition, EvalError, FnPredicate, Predicate, TryFnPredicate};
use crate::error::{Error, Result};
use crate::snapshot::StateSnapshot;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

// ---------------------------------------------------------------------------
// RuleDef (configuration form)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuleDef {
    pub id: String,
    pub weight: f64,
    #[serde(default)]
    pub when: Condition,
}

// ---------------------------------------------------------------------------
// Rule
// ---------------------------------------------------------------------------

/// A named, weighted, condition-gated candidate action.
#[derive(Clone)]
pub struct Rule {
    id: String,
    weight: f64,
    condition: Arc<dyn Predicate>,
}

impl Rule {
    pub fn new(id: impl Into<String>, weight: f64, condition: impl Predicate + 'static) -> Self {
        Self {
            id: id.into(),
            weight,
            condition: Arc::new(condition),
        }
    }

    pub fn from_fn<F>(id: impl Into<String>, weight: f64, f: F) -> Self
    where
        F: Fn(&StateSnapshot) -> bool + Send + Sync + 'static,
    {
        Self::new(id, weight, FnPredicate(f))
    }

    pub fn try_from_fn<F>(id: impl Into<String>, weight: f64, f: F) -> Self
    where
        F: Fn(&StateSnapshot) -> std::result::Result<bool, EvalError> + Send + Sync + 'static,
    {
        Self::new(id, weight, TryFnPredicate(f))
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn weight(&self) -> f64 {
        self.weight
    }

    pub fn condition(&self) -> &dyn Predicate {
        self.condition.as_ref()
    }

    fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(Error::InvalidRule {
                id: self.id.clone(),
                reason: "id must not be empty".into(),
            });
        }
        if !self.weight.is_finite() || self.weight <= 0.0 {
            return Err(Error::InvalidWeight {
                id: self.id.clone(),
                weight: self.weight,
            });
        }
        Ok(())
    }
}

impl fmt::Debug for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rule")
            .field("id", &self.id)
            .field("weight", &self.weight)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// RuleSet
// ---------------------------------------------------------------------------

/// Ordered, validated, immutable collection of rules.
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    rules: Vec<Rule>,
    index: HashMap<String, usize>,
}

impl RuleSet {
    /// Validate and index `rules`. Order is preserved.
    pub fn from_rules(rules: Vec<Rule>) -> Result<Self> {
        let mut index = HashMap::with_capacity(rules.len());
        for (i, rule) in rules.iter().enumerate() {
            rule.validate()?;
            if index.insert(rule.id.clone(), i).is_some() {
                return Err(Error::DuplicateRule(rule.id.clone()));
            }
        }
        Ok(Self { rules, index })
    }

    /// Compile configuration-form rules.
    pub fn from_defs(defs: &[RuleDef]) -> Result<Self> {
        let rules = defs
            .iter()
            .map(|d| Ok(Rule::new(d.id.clone(), d.weight, d.when.compile(&d.id)?)))
            .collect::<Result<Vec<_>>>()?;
        Self::from_rules(rules)
    }

    /// Parse a YAML sequence of rule definitions.
    pub fn from_yaml(data: &str) -> Result<Self> {
        let defs: Vec<RuleDef> = serde_yaml::from_str(data)?;
        Self::from_defs(&defs)
    }

    /// Load a standalone rules file.
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read {}: {e}", path.display())))?;
        Self::from_yaml(&data)
    }

    pub fn get(&self, id: &str) -> Option<&Rule> {
        self.index.get(id).map(|&i| &self.rules[i])
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Rule> {
        self.rules.iter()
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.rules.iter().map(|r| r.id.as_str())
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

impl<'a> IntoIterator for &'a RuleSet {
    type Item = &'a Rule;
    type IntoIter = std::slice::Iter<'a, Rule>;

    fn into_iter(self) -> Self::IntoIter {
        self.rules.iter()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn yaml_rules_load_in_order() {
        let set = RuleSet::from_yaml(
            r#"
- id: second
  weight: 2
  when:
    type: fact_true
    fact: flag
- id: first
  weight: 0.5
"#,
        )
        .unwrap();
        assert_eq!(set.ids().collect::<Vec<_>>(), vec!["second", "first"]);
        assert_eq!(set.get("first").unwrap().weight(), 0.5);
    }

    #[test]
    fn missing_when_means_always() {
        let set = RuleSet::from_yaml("- id: a\n  weight: 1\n").unwrap();
        let rule = set.get("a").unwrap();
        assert!(rule.condition().evaluate(&StateSnapshot::empty()).unwrap());
    }

    #[test]
    fn duplicate_id_rejected() {
        let err = RuleSet::from_yaml("- id: a\n  weight: 1\n- id: a\n  weight: 2\n").unwrap_err();
        assert!(matches!(err, Error::DuplicateRule(ref id) if id == "a"));
        assert!(err.is_config());
    }

    #[test]
    fn zero_and_negative_weights_rejected() {
        for w in ["0", "-1", ".nan", ".inf"] {
            let err = RuleSet::from_yaml(&format!("- id: a\n  weight: {w}\n")).unwrap_err();
            assert!(matches!(err, Error::InvalidWeight { .. }), "weight {w}: {err}");
        }
    }

    #[test]
    fn empty_id_rejected() {
        let err = RuleSet::from_rules(vec![Rule::from_fn(" ", 1.0, |_| true)]).unwrap_err();
        assert!(matches!(err, Error::InvalidRule { .. }));
    }

    #[test]
    fn malformed_yaml_is_config_error() {
        let err = RuleSet::from_yaml("- id: a\n  wieght: 1\n").unwrap_err();
        assert!(err.is_config(), "{err}");
    }

    #[test]
    fn unreadable_source_fails() {
        let dir = TempDir::new().unwrap();
        let err = RuleSet::load(&dir.path().join("missing.yaml")).unwrap_err();
        assert!(err.is_config());
        assert!(err.to_string().contains("missing.yaml"));
    }

    #[test]
    fn empty_ruleset_is_valid() {
        let set = RuleSet::from_yaml("[]").unwrap();
        assert!(set.is_empty());
    }
}
