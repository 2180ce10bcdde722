use clap::Args;
use colored::Colorize;
use ivr_common::error::Result;
use ivr_common::model::ModuleId;
use ivr_common::VersionConstraint;
use ivr_core::Session;
use tracing::instrument;

#[derive(Args, Debug)]
pub struct FindRevision {
    /// Module as organisation#name
    pub module: String,

    /// Revision constraint, e.g. "[1.0,2.0)" or "latest.release"
    #[arg(default_value = "latest.integration")]
    pub constraint: String,
}

impl FindRevision {
    #[instrument(skip(self, session), fields(module = %self.module, constraint = %self.constraint))]
    pub async fn run(&self, session: &Session) -> Result<()> {
        let id = ModuleId::parse(&self.module)?;
        let constraint = VersionConstraint::parse(&self.constraint)?;
        match session.find_revision(&id, &constraint).await? {
            Some(revision) => println!("{}", id.revision(revision)),
            None => println!(
                "{} no revision of {} matches {}",
                "Warning:".yellow(),
                id,
                constraint
            ),
        }
        Ok(())
    }
}
