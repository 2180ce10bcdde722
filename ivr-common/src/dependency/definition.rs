// ivr-common/src/dependency/definition.rs
use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::exclusion::ExclusionSet;
use crate::error::{IvrError, Result};
use crate::model::{ModuleId, VersionConstraint};

pub const DEFAULT_CONF: &str = "default";

/// One `from->to` clause of a configuration mapping.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConfMappingRule {
    pub from: Vec<String>,
    pub to: Vec<String>,
}

/// Maps master configurations to dependency configurations, e.g.
/// `compile->default;test->runtime,test`. `*` on the left matches any master
/// configuration, `@` on the right means "same name as the master", `*` on
/// the right means every configuration of the dependency. A clause without
/// `->` maps a configuration onto its namesake.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConfMapping(Vec<ConfMappingRule>);

fn split_confs(list: &str) -> Vec<String> {
    list.split(',')
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .map(str::to_string)
        .collect()
}

impl ConfMapping {
    pub fn parse(s: &str) -> Result<Self> {
        let mut rules = Vec::new();
        for clause in s.split(';').map(str::trim).filter(|c| !c.is_empty()) {
            let (from, to) = match clause.split_once("->") {
                Some((from, to)) => (split_confs(from), split_confs(to)),
                None => (split_confs(clause), vec!["@".to_string()]),
            };
            if from.is_empty() || to.is_empty() {
                return Err(IvrError::Config(format!(
                    "invalid configuration mapping clause '{clause}'"
                )));
            }
            rules.push(ConfMappingRule { from, to });
        }
        if rules.is_empty() {
            return Err(IvrError::Config(format!(
                "empty configuration mapping '{s}'"
            )));
        }
        Ok(Self(rules))
    }

    pub fn rules(&self) -> &[ConfMappingRule] {
        &self.0
    }

    /// Dependency configurations required when the master is in `master_conf`.
    /// `@` is substituted; `*` is passed through for the caller to expand.
    pub fn targets(&self, master_conf: &str) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        for rule in &self.0 {
            if rule.from.iter().any(|f| f == "*" || f == master_conf) {
                for to in &rule.to {
                    if to == "@" {
                        out.insert(master_conf.to_string());
                    } else {
                        out.insert(to.clone());
                    }
                }
            }
        }
        out
    }

    /// Master configurations named explicitly on the left-hand side.
    pub fn master_confs(&self) -> impl Iterator<Item = &str> {
        self.0
            .iter()
            .flat_map(|r| r.from.iter())
            .map(String::as_str)
            .filter(|c| *c != "*")
    }
}

impl Default for ConfMapping {
    fn default() -> Self {
        Self(vec![ConfMappingRule {
            from: vec!["*".to_string()],
            to: vec![DEFAULT_CONF.to_string()],
        }])
    }
}

impl fmt::Display for ConfMapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let clauses: Vec<String> = self
            .0
            .iter()
            .map(|r| format!("{}->{}", r.from.join(","), r.to.join(",")))
            .collect();
        f.write_str(&clauses.join(";"))
    }
}

impl Serialize for ConfMapping {
    fn serialize<S: serde::Serializer>(&self, s: S) -> std::result::Result<S::Ok, S::Error> {
        s.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ConfMapping {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(d)?;
        ConfMapping::parse(&s).map_err(serde::de::Error::custom)
    }
}

/// A dependency as declared by a descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyConstraint {
    pub id: ModuleId,
    pub constraint: VersionConstraint,
    pub conf: ConfMapping,
    /// Exact pin: overrides every non-forced constraint on the same module.
    pub force: bool,
    pub transitive: bool,
    pub excludes: ExclusionSet,
}

impl DependencyConstraint {
    pub fn new(id: ModuleId, constraint: VersionConstraint) -> Self {
        Self {
            id,
            constraint,
            conf: ConfMapping::default(),
            force: false,
            transitive: true,
            excludes: ExclusionSet::new(),
        }
    }

    pub fn forced(mut self) -> Self {
        self.force = true;
        self
    }

    pub fn with_conf(mut self, conf: ConfMapping) -> Self {
        self.conf = conf;
        self
    }
}

impl fmt::Display for DependencyConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{};{}", self.id, self.constraint)?;
        if self.force {
            write!(f, " (forced)")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mapping_targets() {
        let m = ConfMapping::parse("compile->default; test->runtime,test").unwrap();
        assert_eq!(
            m.targets("compile").into_iter().collect::<Vec<_>>(),
            vec!["default"]
        );
        assert_eq!(
            m.targets("test").into_iter().collect::<Vec<_>>(),
            vec!["runtime", "test"]
        );
        assert!(m.targets("docs").is_empty());
    }

    #[test]
    fn same_name_and_wildcards() {
        let m = ConfMapping::parse("*->@").unwrap();
        assert_eq!(
            m.targets("runtime").into_iter().collect::<Vec<_>>(),
            vec!["runtime"]
        );
        let bare = ConfMapping::parse("runtime").unwrap();
        assert_eq!(
            bare.targets("runtime").into_iter().collect::<Vec<_>>(),
            vec!["runtime"]
        );
        assert_eq!(bare.master_confs().collect::<Vec<_>>(), vec!["runtime"]);
    }

    #[test]
    fn default_mapping_targets_default() {
        let m = ConfMapping::default();
        assert_eq!(m.to_string(), "*->default");
        assert!(m.targets("anything").contains(DEFAULT_CONF));
    }

    #[test]
    fn rejects_empty_sides() {
        assert!(ConfMapping::parse("->x").is_err());
        assert!(ConfMapping::parse("a->").is_err());
        assert!(ConfMapping::parse(" ; ").is_err());
    }
}
