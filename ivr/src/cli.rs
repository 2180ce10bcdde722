// ivr/src/cli.rs
//! Defines the command-line argument structure using clap.
use std::path::PathBuf;

use clap::{ArgAction, Args, Parser, Subcommand};
use ivr_common::error::Result;
use ivr_common::model::Descriptor;
use ivr_core::{ResolveOptions, Session};

pub mod buildlist;
pub mod buildnumber;
pub mod cachepath;
pub mod clean_cache;
pub mod findrevision;
pub mod info;
pub mod listmodules;
pub mod publish;
pub mod report;
pub mod resolve;
pub mod retrieve;

use crate::cli::buildlist::BuildList;
use crate::cli::buildnumber::BuildNumber;
use crate::cli::cachepath::Cachepath;
use crate::cli::clean_cache::CleanCache;
use crate::cli::findrevision::FindRevision;
use crate::cli::info::Info;
use crate::cli::listmodules::ListModules;
use crate::cli::publish::Publish;
use crate::cli::report::Report;
use crate::cli::resolve::Resolve;
use crate::cli::retrieve::Retrieve;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None, name = "ivr", bin_name = "ivr")]
#[command(propagate_version = true)]
pub struct CliArgs {
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Settings file to read instead of ./ivr-settings.toml
    #[arg(long, global = true, value_name = "FILE")]
    pub settings: Option<PathBuf>,

    /// Use only what is already in the cache
    #[arg(long, global = true)]
    pub offline: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    Resolve(Resolve),
    Retrieve(Retrieve),
    Cachepath(Cachepath),
    CleanCache(CleanCache),
    Info(Info),
    #[command(name = "findrevision")]
    FindRevision(FindRevision),
    Report(Report),
    Publish(Publish),
    #[command(name = "buildnumber")]
    BuildNumber(BuildNumber),
    #[command(name = "listmodules")]
    ListModules(ListModules),
    #[command(name = "buildlist")]
    BuildList(BuildList),
}

impl Command {
    pub async fn run(&self, session: &Session) -> Result<()> {
        match self {
            Self::Resolve(command) => command.run(session).await,
            Self::Retrieve(command) => command.run(session).await,
            Self::Cachepath(command) => command.run(session).await,
            Self::CleanCache(command) => command.run(session).await,
            Self::Info(command) => command.run(session).await,
            Self::FindRevision(command) => command.run(session).await,
            Self::Report(command) => command.run(session).await,
            Self::Publish(command) => command.run(session).await,
            Self::BuildNumber(command) => command.run(session).await,
            Self::ListModules(command) => command.run(session).await,
            Self::BuildList(command) => command.run(session).await,
        }
    }
}

/// Arguments shared by every command that resolves a descriptor.
#[derive(Args, Debug, Clone)]
pub struct ResolutionArgs {
    /// Descriptor of the module to resolve
    #[arg(default_value = "ivr.toml")]
    pub descriptor: PathBuf,

    /// Configuration of the module to resolve
    #[arg(short, long, default_value = "default")]
    pub conf: String,

    /// latest-revision, latest-compatible or strict
    #[arg(long, value_name = "MANAGER")]
    pub conflict_manager: Option<String>,

    /// error, warn or ignore
    #[arg(long, value_name = "STRATEGY")]
    pub circular: Option<String>,
}

impl ResolutionArgs {
    pub fn options(&self, session: &Session) -> Result<ResolveOptions> {
        let mut options = session.resolve_options(self.conf.clone());
        if let Some(manager) = &self.conflict_manager {
            options.conflict_manager = manager.parse()?;
        }
        if let Some(circular) = &self.circular {
            options.circular = circular.parse()?;
        }
        Ok(options)
    }

    pub fn load_descriptor(&self) -> Result<Descriptor> {
        let bytes = ivr_aio::read_to_bytes(&self.descriptor)?;
        Descriptor::parse(&bytes)
            .map_err(|e| e.context(format!("reading {}", self.descriptor.display())))
    }
}
