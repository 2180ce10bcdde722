use std::path::PathBuf;

use clap::Args;
use colored::Colorize;
use ivr_common::error::{IvrError, Result};
use ivr_common::model::ModuleId;
use ivr_core::buildlist::{find_descriptors, load_descriptors};
use ivr_core::{build_list, BuildListOptions, Session};
use tracing::instrument;

#[derive(Args, Debug)]
pub struct BuildList {
    /// Descriptor files, or directories searched for --descriptor-name
    #[arg(required = true)]
    pub paths: Vec<PathBuf>,

    /// File name of the descriptors found in directories
    #[arg(long, default_value = "ivr.toml")]
    pub descriptor_name: String,

    /// Only this module (organisation#name) and what it depends on
    #[arg(long, value_name = "MODULE")]
    pub root: Option<String>,

    /// With --root, only its direct dependencies
    #[arg(long, requires = "root")]
    pub only_direct: bool,

    /// Only this module (organisation#name) and what depends on it
    #[arg(long, value_name = "MODULE")]
    pub leaf: Option<String>,

    /// List dependents before their dependencies
    #[arg(long)]
    pub reverse: bool,

    /// error, warn or ignore
    #[arg(long, value_name = "STRATEGY")]
    pub circular: Option<String>,
}

impl BuildList {
    #[instrument(skip(self, session))]
    pub async fn run(&self, session: &Session) -> Result<()> {
        let files = find_descriptors(&self.paths, &self.descriptor_name);
        if files.is_empty() {
            return Err(IvrError::Config(format!(
                "no {} found under the given paths",
                self.descriptor_name
            )));
        }
        let options = BuildListOptions {
            root: self.root.as_deref().map(ModuleId::parse).transpose()?,
            only_direct: self.only_direct,
            leaf: self.leaf.as_deref().map(ModuleId::parse).transpose()?,
            reverse: self.reverse,
            circular: match &self.circular {
                Some(circular) => circular.parse()?,
                None => session.config().circular,
            },
        };

        let ordered = build_list(load_descriptors(&files)?, &options)?;
        println!(
            "{}{} {} module(s)",
            "==> ".bold().blue(),
            "Build order of".bold(),
            ordered.len()
        );
        for (i, descriptor) in ordered.iter().enumerate() {
            println!("{:>3}. {}", i + 1, descriptor.module.to_string().green());
        }
        Ok(())
    }
}
