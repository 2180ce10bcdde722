// ivr-common/src/model/descriptor.rs
// Module descriptors: the TOML document describing one module revision.
//
//   [module]
//   organisation = "org.acme"
//   name = "app"
//   revision = "1.0"
//
//   [[configurations]]
//   name = "runtime"
//   extends = ["default"]
//
//   [[dependencies]]
//   org = "org.acme"
//   name = "lib"
//   rev = "[1.0,2.0)"
//   conf = "runtime->default"
//
//   [[artifacts]]
//   name = "app"
//   type = "jar"
//   ext = "jar"

use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::artifact::ArtifactSpec;
use super::module::{check_coordinate, ModuleId, ModuleRevision, Revision};
use super::version::VersionConstraint;
use crate::dependency::{
    ConfMapping, DependencyConstraint, ExcludeRule, ExclusionSet, DEFAULT_CONF,
};
use crate::error::{IvrError, Result};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    #[default]
    Integration,
    Milestone,
    Release,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Status::Integration => "integration",
            Status::Milestone => "milestone",
            Status::Release => "release",
        })
    }
}

impl FromStr for Status {
    type Err = IvrError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "integration" => Ok(Status::Integration),
            "milestone" => Ok(Status::Milestone),
            "release" => Ok(Status::Release),
            other => Err(IvrError::malformed(
                "module.status",
                format!("unknown status '{other}'"),
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Configuration {
    pub name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extends: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl Configuration {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            extends: Vec::new(),
            description: None,
        }
    }
}

/// Metadata for one module revision. Immutable once loaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Descriptor {
    pub module: ModuleRevision,
    pub status: Status,
    pub description: Option<String>,
    pub configurations: Vec<Configuration>,
    pub dependencies: Vec<DependencyConstraint>,
    pub artifacts: Vec<ArtifactSpec>,
    pub excludes: ExclusionSet,
}

// --- raw TOML shape -------------------------------------------------------

#[derive(Debug, Default, Serialize, Deserialize)]
struct RawDescriptor {
    module: Option<RawModule>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    configurations: Vec<Configuration>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    dependencies: Vec<RawDependency>,
    #[serde(default)]
    artifacts: Option<Vec<ArtifactSpec>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    excludes: Vec<ExcludeRule>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct RawModule {
    #[serde(alias = "org", alias = "organization")]
    organisation: Option<String>,
    name: Option<String>,
    revision: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct RawDependency {
    #[serde(alias = "organisation", alias = "organization")]
    org: Option<String>,
    name: Option<String>,
    rev: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    conf: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    force: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    transitive: Option<bool>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    exclude: Vec<ExcludeRule>,
}

fn required(value: Option<String>, field: &str) -> Result<String> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v.trim().to_string()),
        Some(_) => Err(IvrError::malformed(field, "must not be empty")),
        None => Err(IvrError::malformed(field, "missing required field")),
    }
}

/// A required field that ends up as a path segment.
fn coordinate(value: Option<String>, field: &str) -> Result<String> {
    let value = required(value, field)?;
    check_coordinate(field, &value)?;
    Ok(value)
}

impl Descriptor {
    /// Parses and validates a descriptor document.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(bytes)
            .map_err(|e| IvrError::malformed("<document>", format!("not valid UTF-8: {e}")))?;
        let raw: RawDescriptor = toml::from_str(text)
            .map_err(|e| IvrError::malformed("<document>", e.message().to_string()))?;
        Self::from_raw(raw)
    }

    fn from_raw(raw: RawDescriptor) -> Result<Self> {
        let module = raw
            .module
            .ok_or_else(|| IvrError::malformed("module", "missing [module] section"))?;
        let organisation = coordinate(module.organisation, "module.organisation")?;
        let name = coordinate(module.name, "module.name")?;
        let revision = coordinate(module.revision, "module.revision")?;
        if VersionConstraint::parse(&revision).map_or(true, |c| c.is_dynamic()) {
            return Err(IvrError::malformed(
                "module.revision",
                format!("'{revision}' is not a static revision"),
            ));
        }
        let status = match module.status {
            Some(s) => s.parse()?,
            None => Status::default(),
        };

        let configurations = if raw.configurations.is_empty() {
            vec![Configuration::new(DEFAULT_CONF)]
        } else {
            raw.configurations
        };
        let mut seen = HashSet::new();
        for (i, conf) in configurations.iter().enumerate() {
            if conf.name.is_empty() {
                return Err(IvrError::malformed(
                    format!("configurations[{i}].name"),
                    "must not be empty",
                ));
            }
            if !seen.insert(conf.name.as_str()) {
                return Err(IvrError::malformed(
                    format!("configurations[{i}].name"),
                    format!("duplicate configuration '{}'", conf.name),
                ));
            }
        }
        for (i, conf) in configurations.iter().enumerate() {
            if let Some(unknown) = conf.extends.iter().find(|e| !seen.contains(e.as_str())) {
                return Err(IvrError::malformed(
                    format!("configurations[{i}].extends"),
                    format!("extends unknown configuration '{unknown}'"),
                ));
            }
        }

        let mut dependencies = Vec::with_capacity(raw.dependencies.len());
        for (i, dep) in raw.dependencies.into_iter().enumerate() {
            let field = |f: &str| format!("dependencies[{i}].{f}");
            let org = coordinate(dep.org, &field("org"))?;
            let dep_name = coordinate(dep.name, &field("name"))?;
            let rev = required(dep.rev, &field("rev"))?;
            let constraint = VersionConstraint::parse(&rev)
                .map_err(|e| IvrError::malformed(field("rev"), e.to_string()))?;
            if dep.force && constraint.is_dynamic() {
                return Err(IvrError::malformed(
                    field("force"),
                    format!("a forced dependency needs a static revision, got '{rev}'"),
                ));
            }
            let conf = match dep.conf {
                Some(c) => ConfMapping::parse(&c)
                    .map_err(|e| IvrError::malformed(field("conf"), e.to_string()))?,
                None => ConfMapping::default(),
            };
            if let Some(unknown) = conf.master_confs().find(|c| !seen.contains(c)) {
                return Err(IvrError::malformed(
                    field("conf"),
                    format!("maps undeclared configuration '{unknown}'"),
                ));
            }
            dependencies.push(DependencyConstraint {
                id: ModuleId::new(org, dep_name),
                constraint,
                conf,
                force: dep.force,
                transitive: dep.transitive.unwrap_or(true),
                excludes: dep.exclude.into_iter().collect(),
            });
        }

        let artifacts = match raw.artifacts {
            Some(list) => {
                for (i, artifact) in list.iter().enumerate() {
                    if artifact.name.is_empty() {
                        return Err(IvrError::malformed(
                            format!("artifacts[{i}].name"),
                            "must not be empty",
                        ));
                    }
                    if let Some(unknown) = artifact
                        .confs
                        .iter()
                        .find(|c| c.as_str() != "*" && !seen.contains(c.as_str()))
                    {
                        return Err(IvrError::malformed(
                            format!("artifacts[{i}].confs"),
                            format!("published in undeclared configuration '{unknown}'"),
                        ));
                    }
                }
                list
            }
            // no [[artifacts]] at all: one jar named after the module
            None => vec![ArtifactSpec::new(name.clone(), "jar", "jar")],
        };

        let descriptor = Descriptor {
            module: ModuleRevision {
                id: ModuleId::new(organisation, name),
                revision: Revision::new(revision),
            },
            status,
            description: module.description,
            configurations,
            dependencies,
            artifacts,
            excludes: raw.excludes.into_iter().collect(),
        };
        debug!(
            "Parsed descriptor {} ({} dependencies, {} artifacts)",
            descriptor.module,
            descriptor.dependencies.len(),
            descriptor.artifacts.len()
        );
        Ok(descriptor)
    }

    /// Canonical TOML rendering; parses back to an equal descriptor.
    pub fn to_toml_string(&self) -> Result<String> {
        let raw = RawDescriptor {
            module: Some(RawModule {
                organisation: Some(self.module.id.organisation.clone()),
                name: Some(self.module.id.name.clone()),
                revision: Some(self.module.revision.to_string()),
                status: Some(self.status.to_string()),
                description: self.description.clone(),
            }),
            configurations: self.configurations.clone(),
            dependencies: self
                .dependencies
                .iter()
                .map(|d| RawDependency {
                    org: Some(d.id.organisation.clone()),
                    name: Some(d.id.name.clone()),
                    rev: Some(d.constraint.to_string()),
                    conf: Some(d.conf.to_string()),
                    force: d.force,
                    transitive: (!d.transitive).then_some(false),
                    exclude: d.excludes.iter().cloned().collect(),
                })
                .collect(),
            artifacts: Some(self.artifacts.clone()),
            excludes: self.excludes.iter().cloned().collect(),
        };
        toml::to_string_pretty(&raw)
            .map_err(|e| IvrError::Generic(format!("failed to render descriptor: {e}")))
    }

    /// Canonical rendering as bytes, the form written to repositories.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        self.to_toml_string().map(String::into_bytes)
    }

    pub fn id(&self) -> &ModuleId {
        &self.module.id
    }

    pub fn has_conf(&self, name: &str) -> bool {
        self.configurations.iter().any(|c| c.name == name)
    }

    pub fn conf_names(&self) -> impl Iterator<Item = &str> {
        self.configurations.iter().map(|c| c.name.as_str())
    }

    /// The configuration plus everything it extends, transitively.
    pub fn active_confs(&self, conf: &str) -> Result<BTreeSet<String>> {
        if !self.has_conf(conf) {
            return Err(IvrError::NotFound(format!(
                "configuration '{conf}' not declared by {}",
                self.module
            )));
        }
        let mut active = BTreeSet::new();
        let mut stack = vec![conf.to_string()];
        while let Some(name) = stack.pop() {
            if !active.insert(name.clone()) {
                continue;
            }
            if let Some(c) = self.configurations.iter().find(|c| c.name == name) {
                stack.extend(c.extends.iter().cloned());
            }
        }
        Ok(active)
    }

    /// Replaces `*` in a set of requested configurations with every declared one.
    pub fn expand_confs(&self, requested: &BTreeSet<String>) -> BTreeSet<String> {
        if requested.contains("*") {
            self.conf_names().map(str::to_string).collect()
        } else {
            requested.clone()
        }
    }

    /// Dependencies that apply when this module is used in `conf`, in
    /// declaration order, with the configurations each one is needed in.
    pub fn dependencies_for(
        &self,
        conf: &str,
    ) -> Result<Vec<(&DependencyConstraint, BTreeSet<String>)>> {
        let active = self.active_confs(conf)?;
        Ok(self
            .dependencies
            .iter()
            .filter_map(|dep| {
                let targets: BTreeSet<String> = active
                    .iter()
                    .flat_map(|master| dep.conf.targets(master))
                    .collect();
                (!targets.is_empty()).then_some((dep, targets))
            })
            .collect())
    }

    /// Artifacts published in any of `confs` (and the configurations they extend).
    pub fn artifacts_for(&self, confs: &BTreeSet<String>) -> Result<Vec<&ArtifactSpec>> {
        let mut active = BTreeSet::new();
        for conf in self.expand_confs(confs) {
            active.extend(self.active_confs(&conf)?);
        }
        Ok(self
            .artifacts
            .iter()
            .filter(|a| a.in_confs(active.iter()))
            .collect())
    }
}

impl FromStr for Descriptor {
    type Err = IvrError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s.as_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const APP: &str = r#"
[module]
organisation = "org.acme"
name = "app"
revision = "1.0"
status = "release"

[[configurations]]
name = "default"

[[configurations]]
name = "runtime"
extends = ["default"]

[[configurations]]
name = "test"
extends = ["runtime"]

[[dependencies]]
org = "org.acme"
name = "lib"
rev = "[1.0,2.0)"
conf = "default->default"

[[dependencies]]
org = "org.acme"
name = "util"
rev = "1.0"
conf = "runtime->default"
force = true

[[dependencies]]
org = "junit"
name = "junit"
rev = "4.13"
conf = "test->default"
transitive = false

[[dependencies.exclude]]
org = "org.hamcrest"

[[artifacts]]
name = "app"
type = "jar"
ext = "jar"
confs = ["default"]

[[artifacts]]
name = "app-tests"
type = "jar"
ext = "jar"
confs = ["test"]

[[excludes]]
org = "commons-logging"
module = "*"
"#;

    #[test]
    fn parses_full_descriptor() {
        let d = Descriptor::parse(APP.as_bytes()).unwrap();
        assert_eq!(d.module, ModuleRevision::new("org.acme", "app", "1.0"));
        assert_eq!(d.status, Status::Release);
        assert_eq!(d.configurations.len(), 3);
        assert_eq!(d.dependencies.len(), 3);
        assert!(d.dependencies[1].force);
        assert!(!d.dependencies[2].transitive);
        assert_eq!(d.dependencies[2].excludes.len(), 1);
        assert!(d
            .excludes
            .excludes_module(&ModuleId::new("commons-logging", "commons-logging")));
    }

    #[test]
    fn dependencies_follow_configuration_inheritance() {
        let d = Descriptor::parse(APP.as_bytes()).unwrap();
        let names = |conf: &str| -> Vec<String> {
            d.dependencies_for(conf)
                .unwrap()
                .into_iter()
                .map(|(dep, _)| dep.id.name.clone())
                .collect()
        };
        assert_eq!(names("default"), vec!["lib"]);
        assert_eq!(names("runtime"), vec!["lib", "util"]);
        assert_eq!(names("test"), vec!["lib", "util", "junit"]);
        assert!(d.dependencies_for("docs").is_err());
    }

    #[test]
    fn artifacts_follow_configurations() {
        let d = Descriptor::parse(APP.as_bytes()).unwrap();
        let confs = |c: &str| BTreeSet::from([c.to_string()]);
        assert_eq!(d.artifacts_for(&confs("runtime")).unwrap().len(), 1);
        assert_eq!(d.artifacts_for(&confs("test")).unwrap().len(), 2);
        assert_eq!(d.artifacts_for(&confs("*")).unwrap().len(), 2);
    }

    #[test]
    fn minimal_descriptor_gets_defaults() {
        let d: Descriptor = r#"
[module]
org = "org.acme"
name = "tiny"
revision = "0.1"
"#
        .parse()
        .unwrap();
        assert_eq!(d.conf_names().collect::<Vec<_>>(), vec![DEFAULT_CONF]);
        assert_eq!(d.artifacts, vec![ArtifactSpec::new("tiny", "jar", "jar")]);
        assert_eq!(d.status, Status::Integration);
    }

    fn malformed_field(doc: &str) -> String {
        match Descriptor::parse(doc.as_bytes()) {
            Err(IvrError::MalformedDescriptor { field, .. }) => field,
            other => panic!("expected MalformedDescriptor, got {other:?}"),
        }
    }

    #[test]
    fn reports_offending_field() {
        assert_eq!(
            malformed_field("[module]\norganisation = \"o\"\nname = \"n\"\n"),
            "module.revision"
        );
        assert_eq!(malformed_field("title = 1\n"), "module");
        assert_eq!(
            malformed_field(
                "[module]\norg = \"o\"\nname = \"n\"\nrevision = \"1\"\n\
                 [[dependencies]]\norg = \"o\"\nname = \"x\"\nrev = \"[1.0,\"\n"
            ),
            "dependencies[0].rev"
        );
        assert_eq!(
            malformed_field(
                "[module]\norg = \"o\"\nname = \"n\"\nrevision = \"1\"\n\
                 [[dependencies]]\norg = \"o\"\nname = \"x\"\nrev = \"1.+\"\nforce = true\n"
            ),
            "dependencies[0].force"
        );
        assert_eq!(
            malformed_field(
                "[module]\norg = \"o\"\nname = \"n\"\nrevision = \"1\"\n\
                 [[dependencies]]\norg = \"o\"\nname = \"x\"\nrev = \"1\"\nconf = \"compile->default\"\n"
            ),
            "dependencies[0].conf"
        );
        assert_eq!(
            malformed_field("[module]\norg = \"o\"\nname = \"n\"\nrevision = \"[1,2]\"\n"),
            "module.revision"
        );
        assert_eq!(malformed_field("not toml at all ["), "<document>");
    }

    #[test]
    fn coordinates_must_stay_inside_their_directory() {
        assert_eq!(
            malformed_field("[module]\norganisation = \"..\"\nname = \"n\"\nrevision = \"1\"\n"),
            "module.organisation"
        );
        assert_eq!(
            malformed_field("[module]\norg = \"o\"\nname = \"a/b\"\nrevision = \"1\"\n"),
            "module.name"
        );
        assert_eq!(
            malformed_field("[module]\norg = \"o\"\nname = \"n\"\nrevision = \"../1\"\n"),
            "module.revision"
        );
        assert_eq!(
            malformed_field(
                "[module]\norg = \"o\"\nname = \"n\"\nrevision = \"1\"\n\
                 [[dependencies]]\norg = \".hidden\"\nname = \"x\"\nrev = \"1\"\n"
            ),
            "dependencies[0].org"
        );
        assert_eq!(
            malformed_field(
                "[module]\norg = \"o\"\nname = \"n\"\nrevision = \"1\"\n\
                 [[dependencies]]\norg = \"o\"\nname = \"..\\\\x\"\nrev = \"1\"\n"
            ),
            "dependencies[0].name"
        );
    }

    #[test]
    fn canonical_rendering_parses_back() {
        let d = Descriptor::parse(APP.as_bytes()).unwrap();
        let rendered = d.to_toml_string().unwrap();
        assert_eq!(Descriptor::parse(rendered.as_bytes()).unwrap(), d);
    }
}
