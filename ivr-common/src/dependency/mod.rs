pub mod definition;
pub mod exclusion;

pub use definition::{ConfMapping, ConfMappingRule, DependencyConstraint, DEFAULT_CONF};
pub use exclusion::{merge_exclusions, ExcludeRule, ExclusionSet};
