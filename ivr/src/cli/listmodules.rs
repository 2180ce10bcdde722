use clap::Args;
use colored::Colorize;
use ivr_common::error::Result;
use ivr_common::VersionConstraint;
use ivr_core::{ModuleFilter, Session};
use prettytable::{format, Cell, Row, Table};
use tracing::instrument;

#[derive(Args, Debug)]
pub struct ListModules {
    /// Organisation to list, or * for any
    #[arg(long, default_value = "*")]
    pub org: String,

    /// Module name to list, or * for any
    #[arg(long, default_value = "*")]
    pub module: String,

    /// Only revisions matching this constraint
    #[arg(long)]
    pub rev: Option<String>,
}

impl ListModules {
    #[instrument(skip(self, session), fields(org = %self.org, module = %self.module))]
    pub async fn run(&self, session: &Session) -> Result<()> {
        let filter = ModuleFilter {
            organisation: Some(self.org.clone()),
            module: Some(self.module.clone()),
            revision: self.rev.as_deref().map(VersionConstraint::parse).transpose()?,
        };
        let found = session.list_modules(&filter).await?;
        if found.is_empty() {
            println!("{}", "No matching modules".yellow());
            return Ok(());
        }

        let mut table = Table::new();
        table.set_format(*format::consts::FORMAT_NO_BORDER_LINE_SEPARATOR);
        table.add_row(Row::new(vec![
            Cell::new("Module").style_spec("b"),
            Cell::new("Revision").style_spec("b"),
        ]));
        for module in &found {
            table.add_row(Row::new(vec![
                Cell::new(&module.id.to_string()),
                Cell::new(module.revision.as_str()).style_spec("Fg"),
            ]));
        }
        table.printstd();
        println!("{} module revision(s)", found.len());
        Ok(())
    }
}
