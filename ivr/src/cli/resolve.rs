use clap::Args;
use colored::Colorize;
use ivr_common::error::Result;
use ivr_core::{ResolvedGraph, Session};
use prettytable::{format, Cell, Row, Table};
use tracing::instrument;

use crate::cli::ResolutionArgs;

#[derive(Args, Debug)]
pub struct Resolve {
    #[command(flatten)]
    pub resolution: ResolutionArgs,

    /// Resolve the graph without downloading artifacts
    #[arg(long)]
    pub no_download: bool,
}

impl Resolve {
    #[instrument(skip(self, session), fields(descriptor = %self.resolution.descriptor.display(), conf = %self.resolution.conf))]
    pub async fn run(&self, session: &Session) -> Result<()> {
        let root = self.resolution.load_descriptor()?;
        let mut options = self.resolution.options(session)?;
        options.download = !self.no_download;

        let graph = session.resolve(&root, &options).await?;
        print_graph(&graph);
        Ok(())
    }
}

/// Prints the resolved modules as a table followed by the evicted revisions.
pub fn print_graph(graph: &ResolvedGraph) {
    println!(
        "{}{} {} [{}]",
        "==> ".bold().blue(),
        "Resolved".bold(),
        graph.root.to_string().green(),
        graph.conf
    );

    let dependencies: Vec<_> = graph.dependencies().collect();
    if dependencies.is_empty() {
        println!("{}", "No dependencies".yellow());
    } else {
        let mut table = Table::new();
        table.set_format(*format::consts::FORMAT_NO_BORDER_LINE_SEPARATOR);
        table.add_row(Row::new(vec![
            Cell::new("Module").style_spec("b"),
            Cell::new("Revision").style_spec("b"),
            Cell::new("Status").style_spec("b"),
            Cell::new("Confs").style_spec("b"),
            Cell::new("Artifacts").style_spec("b"),
        ]));
        for node in &dependencies {
            let confs: Vec<&str> = node.confs.iter().map(String::as_str).collect();
            table.add_row(Row::new(vec![
                Cell::new(&node.module.id.to_string()),
                Cell::new(node.module.revision.as_str()).style_spec("Fg"),
                Cell::new(&node.status.to_string()),
                Cell::new(&confs.join(",")),
                Cell::new(&node.artifacts.len().to_string()),
            ]));
        }
        table.printstd();
    }

    for eviction in &graph.evicted {
        println!(
            "{} {} evicted by {}",
            "evicted".yellow(),
            eviction.module,
            eviction.evicted_by.revision.as_str().green()
        );
    }
    println!(
        "{} module(s), {} evicted",
        dependencies.len(),
        graph.evicted.len()
    );
}
