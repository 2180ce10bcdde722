use clap::Args;
use colored::Colorize;
use ivr_common::error::Result;
use ivr_common::model::ModuleId;
use ivr_core::{BuildNumberOptions, Session};
use tracing::instrument;

#[derive(Args, Debug)]
pub struct BuildNumber {
    /// Module as organisation#name
    pub module: String,

    /// Only revisions starting with this prefix count, e.g. "1.2"
    #[arg(long, default_value = "")]
    pub prefix: String,

    /// Build number to start from when nothing is published
    #[arg(long, default_value_t = 0)]
    pub default_build_number: u64,

    /// Separator between the prefix and the build number
    #[arg(long, default_value = ".")]
    pub separator: String,
}

impl BuildNumber {
    #[instrument(skip(self, session), fields(module = %self.module, prefix = %self.prefix))]
    pub async fn run(&self, session: &Session) -> Result<()> {
        let id = ModuleId::parse(&self.module)?;
        let options = BuildNumberOptions {
            prefix: self.prefix.clone(),
            default_build_number: self.default_build_number,
            separator: self.separator.clone(),
        };
        let next = session.build_number(&id, &options).await?;
        match &next.revision {
            Some(revision) => println!(
                "{} {} (build {})",
                "Latest:".bold(),
                id.revision(revision.clone()),
                next.build_number
                    .map_or_else(|| "none".to_string(), |n| n.to_string())
            ),
            None => println!("{} nothing published for {}", "Latest:".bold(), id),
        }
        println!(
            "{} {} (build {})",
            "Next:".bold(),
            id.revision(next.new_revision.clone()).to_string().green(),
            next.new_build_number
        );
        Ok(())
    }
}
