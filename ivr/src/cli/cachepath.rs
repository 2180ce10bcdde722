use std::path::PathBuf;

use clap::Args;
use ivr_common::error::Result;
use ivr_core::Session;
use tracing::{debug, instrument};

use crate::cli::ResolutionArgs;

#[derive(Args, Debug)]
pub struct Cachepath {
    #[command(flatten)]
    pub resolution: ResolutionArgs,

    /// Write the classpath to this file instead of stdout
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

impl Cachepath {
    #[instrument(skip(self, session), fields(descriptor = %self.resolution.descriptor.display(), conf = %self.resolution.conf))]
    pub async fn run(&self, session: &Session) -> Result<()> {
        let root = self.resolution.load_descriptor()?;
        let options = self.resolution.options(session)?;
        let graph = session.resolve(&root, &options).await?;

        let paths = ivr_core::cachepath(&graph, session.cache())?;
        let joined = ivr_core::join_cachepath(&paths)?;
        debug!("Cache path has {} entries", paths.len());
        match &self.output {
            Some(output) => {
                ivr_aio::atomic_write_file(output, joined.to_string_lossy().as_bytes())?;
                println!("Wrote {} path(s) to {}", paths.len(), output.display());
            }
            None => println!("{}", joined.to_string_lossy()),
        }
        Ok(())
    }
}
