// ivr-net/src/fetcher.rs
use async_trait::async_trait;
use ivr_common::error::{IvrError, Result};
use ivr_common::model::{ArtifactSpec, Descriptor, ModuleId, ModuleRevision, Revision};
use ivr_common::VersionConstraint;

/// Source of descriptors and artifact bytes. Failures are reported as
/// `NotFound` when the repository does not know the item and `Network` for
/// anything transient.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Short human-readable name used in logs.
    fn name(&self) -> &str;

    /// Every module the repository publishes, sorted.
    async fn list_modules(&self) -> Result<Vec<ModuleId>>;

    async fn list_revisions(&self, id: &ModuleId) -> Result<Vec<Revision>>;

    /// Descriptor of the best revision matching `constraint`, together with
    /// the raw bytes it was parsed from.
    async fn fetch_descriptor(
        &self,
        id: &ModuleId,
        constraint: &VersionConstraint,
    ) -> Result<(Descriptor, Vec<u8>)>;

    async fn fetch_artifact(
        &self,
        module: &ModuleRevision,
        artifact: &ArtifactSpec,
    ) -> Result<Vec<u8>>;
}

/// Picks the revision a constraint refers to. Static constraints are taken
/// as-is without listing.
pub async fn select_revision<F>(
    fetcher: &F,
    id: &ModuleId,
    constraint: &VersionConstraint,
) -> Result<Revision>
where
    F: Fetcher + ?Sized,
{
    if let Some(exact) = constraint.exact() {
        return Ok(exact.clone());
    }
    let known = fetcher.list_revisions(id).await?;
    constraint.best_match(known.iter()).ok_or_else(|| {
        IvrError::NotFound(format!(
            "no revision of {id} matches '{constraint}' in {} (known: {})",
            fetcher.name(),
            known
                .iter()
                .map(Revision::to_string)
                .collect::<Vec<_>>()
                .join(", ")
        ))
    })
}

/// Parses fetched descriptor bytes and checks they describe what was asked for.
pub fn parse_fetched_descriptor(expected: &ModuleRevision, bytes: &[u8]) -> Result<Descriptor> {
    let descriptor = Descriptor::parse(bytes)
        .map_err(|e| e.context(format!("descriptor of {expected}")))?;
    if descriptor.module != *expected {
        return Err(IvrError::malformed(
            "module",
            format!(
                "repository returned {} when {} was requested",
                descriptor.module, expected
            ),
        ));
    }
    Ok(descriptor)
}
