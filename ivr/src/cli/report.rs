use std::path::PathBuf;

use clap::Args;
use colored::Colorize;
use ivr_common::error::Result;
use ivr_core::{ResolutionReport, Session};
use tracing::instrument;

use crate::cli::ResolutionArgs;

#[derive(Args, Debug)]
pub struct Report {
    #[command(flatten)]
    pub resolution: ResolutionArgs,

    /// Write the JSON report here instead of stdout
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

impl Report {
    #[instrument(skip(self, session), fields(descriptor = %self.resolution.descriptor.display(), conf = %self.resolution.conf))]
    pub async fn run(&self, session: &Session) -> Result<()> {
        let root = self.resolution.load_descriptor()?;
        let options = self.resolution.options(session)?;
        let graph = session.resolve(&root, &options).await?;

        let report = ResolutionReport::build(&graph, Some(session.cache()))?;
        match &self.output {
            Some(output) => {
                report.write_to(output)?;
                println!(
                    "{}{} {} module(s) to {}",
                    "==> ".bold().blue(),
                    "Reported".bold(),
                    report.modules.len(),
                    output.display()
                );
            }
            None => println!("{}", report.to_json()?),
        }
        Ok(())
    }
}
