use std::path::PathBuf;

use clap::Args;
use colored::Colorize;
use ivr_common::error::{IvrError, Result};
use ivr_common::model::{Descriptor, ModuleId};
use ivr_common::VersionConstraint;
use ivr_core::Session;
use prettytable::{format, Cell, Row, Table};
use tracing::{debug, instrument};

#[derive(Args, Debug)]
pub struct Info {
    /// Descriptor file to describe
    #[arg(default_value = "ivr.toml", conflicts_with = "module")]
    pub descriptor: PathBuf,

    /// Describe a published module (organisation#name) instead of a file
    #[arg(long, value_name = "MODULE")]
    pub module: Option<String>,

    /// Revision constraint used with --module
    #[arg(long, default_value = "latest.integration", requires = "module")]
    pub rev: String,
}

impl Info {
    #[instrument(skip(self, session))]
    pub async fn run(&self, session: &Session) -> Result<()> {
        let descriptor = match &self.module {
            Some(module) => {
                let id = ModuleId::parse(module)?;
                let constraint = VersionConstraint::parse(&self.rev)?;
                published_descriptor(session, &id, &constraint).await?
            }
            None => {
                let bytes = ivr_aio::read_to_bytes(&self.descriptor)?;
                Descriptor::parse(&bytes)
                    .map_err(|e| e.context(format!("reading {}", self.descriptor.display())))?
            }
        };
        print_descriptor(&descriptor);
        Ok(())
    }
}

async fn published_descriptor(
    session: &Session,
    id: &ModuleId,
    constraint: &VersionConstraint,
) -> Result<Descriptor> {
    if !session.config().offline {
        let (descriptor, _) = session.fetcher().fetch_descriptor(id, constraint).await?;
        return Ok(descriptor);
    }
    debug!("Offline, describing {} from the cache", id);
    let revision = session
        .find_revision(id, constraint)
        .await?
        .ok_or_else(|| IvrError::NotFound(format!("no cached revision of {id} matches {constraint}")))?;
    let module = id.revision(revision);
    let entry = session
        .cache()
        .get(&module)?
        .ok_or_else(|| IvrError::NotFound(format!("{module} is not cached")))?;
    let (descriptor, _) = entry.read_descriptor()?;
    Ok(descriptor)
}

fn print_descriptor(descriptor: &Descriptor) {
    println!(
        "{} {}",
        descriptor.module.to_string().green().bold(),
        format!("({})", descriptor.status).dimmed()
    );
    if let Some(description) = &descriptor.description {
        println!("{description}");
    }

    println!("\n{}", "Configurations".blue().bold());
    for conf in &descriptor.configurations {
        let mut line = format!("  {}", conf.name);
        if !conf.extends.is_empty() {
            line.push_str(&format!(" extends {}", conf.extends.join(",")));
        }
        if let Some(description) = &conf.description {
            line.push_str(&format!(" - {description}"));
        }
        println!("{line}");
    }

    println!("\n{}", "Dependencies".blue().bold());
    if descriptor.dependencies.is_empty() {
        println!("  none");
    } else {
        let mut table = Table::new();
        table.set_format(*format::consts::FORMAT_NO_BORDER_LINE_SEPARATOR);
        table.add_row(Row::new(vec![
            Cell::new("Module").style_spec("b"),
            Cell::new("Revision").style_spec("b"),
            Cell::new("Conf").style_spec("b"),
            Cell::new("Flags").style_spec("b"),
        ]));
        for dep in &descriptor.dependencies {
            let mut flags = Vec::new();
            if dep.force {
                flags.push("force".to_string());
            }
            if !dep.transitive {
                flags.push("intransitive".to_string());
            }
            if !dep.excludes.is_empty() {
                flags.push(format!("{} exclude(s)", dep.excludes.len()));
            }
            table.add_row(Row::new(vec![
                Cell::new(&dep.id.to_string()),
                Cell::new(&dep.constraint.to_string()),
                Cell::new(&dep.conf.to_string()),
                Cell::new(&flags.join(", ")),
            ]));
        }
        table.printstd();
    }

    println!("\n{}", "Artifacts".blue().bold());
    if descriptor.artifacts.is_empty() {
        println!("  none");
    }
    for artifact in &descriptor.artifacts {
        let confs: Vec<&str> = artifact.confs.iter().map(String::as_str).collect();
        if confs.is_empty() {
            println!("  {} [{}]", artifact.file_name(), artifact.kind);
        } else {
            println!(
                "  {} [{}] in {}",
                artifact.file_name(),
                artifact.kind,
                confs.join(",")
            );
        }
    }

    if !descriptor.excludes.is_empty() {
        println!("\n{}", "Excludes".blue().bold());
        for rule in descriptor.excludes.iter() {
            println!("  {rule}");
        }
    }
}
