use std::path::PathBuf;

use clap::Args;
use colored::Colorize;
use ivr_common::error::Result;
use ivr_common::model::{Revision, Status};
use ivr_core::publish::DEFAULT_ARTIFACT_PATTERN;
use ivr_core::{PublishOptions, Session};
use tracing::instrument;

#[derive(Args, Debug)]
pub struct Publish {
    /// Root of the filesystem repository to publish into
    #[arg(short, long)]
    pub repository: PathBuf,

    /// Descriptor of the module to publish
    #[arg(default_value = "ivr.toml")]
    pub descriptor: PathBuf,

    /// Directory holding the artifact files
    #[arg(long, default_value = ".")]
    pub artifacts_dir: PathBuf,

    /// Where each artifact is found under --artifacts-dir
    #[arg(short, long, default_value = DEFAULT_ARTIFACT_PATTERN)]
    pub pattern: String,

    /// Publish under this revision instead of the descriptor's
    #[arg(long)]
    pub revision: Option<String>,

    /// integration, milestone or release
    #[arg(long)]
    pub status: Option<String>,

    /// Replace a revision that is already published
    #[arg(long)]
    pub overwrite: bool,
}

impl Publish {
    #[instrument(skip(self, _session), fields(repository = %self.repository.display()))]
    pub async fn run(&self, _session: &Session) -> Result<()> {
        let mut options = PublishOptions::new(&self.repository, &self.descriptor, &self.artifacts_dir);
        options.pattern = self.pattern.clone();
        options.overwrite = self.overwrite;
        options.revision = self.revision.as_deref().map(Revision::new);
        options.status = self.status.as_deref().map(str::parse::<Status>).transpose()?;

        let published = ivr_core::publish(&options)?;
        println!(
            "{}{} {} to {}",
            "==> ".bold().blue(),
            "Published".bold(),
            published.to_string().green(),
            self.repository.display()
        );
        Ok(())
    }
}
