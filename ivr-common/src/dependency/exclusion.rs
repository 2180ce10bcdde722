// ivr-common/src/dependency/exclusion.rs
use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::model::ModuleId;

fn pattern_matches(pattern: &str, value: &str) -> bool {
    if pattern == "*" {
        return true;
    }
    match pattern.split_once('*') {
        None => pattern == value,
        Some((prefix, suffix)) => {
            value.len() >= prefix.len() + suffix.len()
                && value.starts_with(prefix)
                && value.ends_with(suffix)
        }
    }
}

/// Excludes modules (or single artifacts of them) from a subtree. Each field is
/// an exact name, `*`, or a single-`*` glob such as `commons-*`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ExcludeRule {
    #[serde(default = "any")]
    pub org: String,
    #[serde(default = "any")]
    pub module: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact: Option<String>,
}

fn any() -> String {
    "*".to_string()
}

impl ExcludeRule {
    pub fn module(org: impl Into<String>, module: impl Into<String>) -> Self {
        Self {
            org: org.into(),
            module: module.into(),
            artifact: None,
        }
    }

    /// Rules naming an artifact only drop that artifact, never the module.
    pub fn excludes_module(&self, id: &ModuleId) -> bool {
        self.artifact.is_none()
            && pattern_matches(&self.org, &id.organisation)
            && pattern_matches(&self.module, &id.name)
    }

    pub fn excludes_artifact(&self, id: &ModuleId, artifact: &str) -> bool {
        pattern_matches(&self.org, &id.organisation)
            && pattern_matches(&self.module, &id.name)
            && self
                .artifact
                .as_deref()
                .is_none_or(|pattern| pattern_matches(pattern, artifact))
    }
}

impl fmt::Display for ExcludeRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.org, self.module)?;
        if let Some(artifact) = &self.artifact {
            write!(f, "!{artifact}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExclusionSet(BTreeSet<ExcludeRule>);

impl ExclusionSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, rule: ExcludeRule) {
        self.0.insert(rule);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ExcludeRule> {
        self.0.iter()
    }

    pub fn excludes_module(&self, id: &ModuleId) -> bool {
        self.0.iter().any(|rule| rule.excludes_module(id))
    }

    pub fn excludes_artifact(&self, id: &ModuleId, artifact: &str) -> bool {
        self.0.iter().any(|rule| rule.excludes_artifact(id, artifact))
    }

    /// Rules present in both sets. A module reached by several paths is only
    /// excluded when every path excludes it.
    pub fn intersection(&self, other: &ExclusionSet) -> ExclusionSet {
        ExclusionSet(self.0.intersection(&other.0).cloned().collect())
    }

    pub fn is_subset(&self, other: &ExclusionSet) -> bool {
        self.0.is_subset(&other.0)
    }
}

impl FromIterator<ExcludeRule> for ExclusionSet {
    fn from_iter<T: IntoIterator<Item = ExcludeRule>>(iter: T) -> Self {
        ExclusionSet(iter.into_iter().collect())
    }
}

/// Exclusions inherited by a child: everything its ancestors excluded plus its
/// own. Set union, so the merge is associative and order-independent.
pub fn merge_exclusions(parent: &ExclusionSet, child: &ExclusionSet) -> ExclusionSet {
    ExclusionSet(parent.0.union(&child.0).cloned().collect())
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn wildcard_rules() {
        let rule = ExcludeRule::module("org.apache", "commons-*");
        assert!(rule.excludes_module(&ModuleId::new("org.apache", "commons-io")));
        assert!(!rule.excludes_module(&ModuleId::new("org.apache", "log4j")));
        let any_org = ExcludeRule::module("*", "junit");
        assert!(any_org.excludes_module(&ModuleId::new("junit", "junit")));
    }

    #[test]
    fn artifact_rules_do_not_drop_modules() {
        let rule = ExcludeRule {
            org: "org".into(),
            module: "lib".into(),
            artifact: Some("lib-sources".into()),
        };
        let id = ModuleId::new("org", "lib");
        assert!(!rule.excludes_module(&id));
        assert!(rule.excludes_artifact(&id, "lib-sources"));
        assert!(!rule.excludes_artifact(&id, "lib"));
    }

    #[test]
    fn intersection_keeps_common_rules() {
        let a: ExclusionSet = [ExcludeRule::module("a", "*"), ExcludeRule::module("b", "*")]
            .into_iter()
            .collect();
        let b: ExclusionSet = [ExcludeRule::module("b", "*")].into_iter().collect();
        assert_eq!(a.intersection(&b), b);
        assert!(b.is_subset(&a));
    }

    fn set_strategy() -> impl Strategy<Value = ExclusionSet> {
        prop::collection::vec(("[a-c]", "[x-z*]"), 0..4).prop_map(|rules| {
            rules
                .into_iter()
                .map(|(org, module)| ExcludeRule::module(org, module))
                .collect()
        })
    }

    proptest! {
        #[test]
        fn merge_is_associative(a in set_strategy(), b in set_strategy(), c in set_strategy()) {
            prop_assert_eq!(
                merge_exclusions(&merge_exclusions(&a, &b), &c),
                merge_exclusions(&a, &merge_exclusions(&b, &c))
            );
        }

        #[test]
        fn merge_is_order_independent(a in set_strategy(), b in set_strategy()) {
            prop_assert_eq!(merge_exclusions(&a, &b), merge_exclusions(&b, &a));
        }
    }
}
