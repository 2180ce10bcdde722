// ivr-core/src/listing.rs
use ivr_common::model::{ModuleId, ModuleRevision};
use ivr_common::VersionConstraint;

/// Which published revisions `listmodules` reports. An unset field or `*`
/// matches anything; otherwise organisation and module compare exactly.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModuleFilter {
    pub organisation: Option<String>,
    pub module: Option<String>,
    pub revision: Option<VersionConstraint>,
}

fn field_matches(pattern: Option<&str>, value: &str) -> bool {
    pattern.map_or(true, |p| p == "*" || p == value)
}

impl ModuleFilter {
    pub fn matches_id(&self, id: &ModuleId) -> bool {
        field_matches(self.organisation.as_deref(), &id.organisation)
            && field_matches(self.module.as_deref(), &id.name)
    }

    pub fn matches(&self, module: &ModuleRevision) -> bool {
        self.matches_id(&module.id)
            && self
                .revision
                .as_ref()
                .map_or(true, |c| c.matches(&module.revision))
    }
}
