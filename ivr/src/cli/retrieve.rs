use std::path::PathBuf;

use clap::Args;
use colored::Colorize;
use ivr_common::error::Result;
use ivr_core::{RetrieveOptions, Session, Strictness};
use tracing::instrument;

use crate::cli::ResolutionArgs;

#[derive(Args, Debug)]
pub struct Retrieve {
    #[command(flatten)]
    pub resolution: ResolutionArgs,

    /// Destination pattern, e.g. lib/[conf]/[artifact]-[revision].[ext]
    #[arg(short, long)]
    pub pattern: Option<String>,

    /// Directory the pattern is relative to
    #[arg(long, default_value = ".")]
    pub base_dir: PathBuf,

    /// Let a later artifact replace an earlier one at the same destination
    #[arg(long)]
    pub overwrite: bool,

    /// Keep the copies that succeeded when some artifacts fail
    #[arg(long)]
    pub partial: bool,

    /// Delete files under the destination that were not retrieved
    #[arg(long)]
    pub sync: bool,
}

impl Retrieve {
    #[instrument(skip(self, session), fields(descriptor = %self.resolution.descriptor.display(), conf = %self.resolution.conf))]
    pub async fn run(&self, session: &Session) -> Result<()> {
        let root = self.resolution.load_descriptor()?;
        let options = self.resolution.options(session)?;
        let graph = session.resolve(&root, &options).await?;

        let pattern = self
            .pattern
            .clone()
            .unwrap_or_else(|| session.config().retrieve_pattern.clone());
        let mut retrieve_options = RetrieveOptions::new(pattern, &self.base_dir);
        retrieve_options.overwrite = self.overwrite;
        retrieve_options.sync = self.sync;
        if self.partial {
            retrieve_options.strictness = Strictness::Partial;
        }

        let report = ivr_core::retrieve(&graph, session.cache(), &retrieve_options)?;
        for path in &report.written {
            println!("{} {}", "copied".green(), path.display());
        }
        for path in &report.removed {
            println!("{} {}", "removed".yellow(), path.display());
        }
        println!(
            "{}{} {} written, {} up to date, {} removed",
            "==> ".bold().blue(),
            "Retrieved".bold(),
            report.written.len(),
            report.up_to_date.len(),
            report.removed.len()
        );
        Ok(())
    }
}
