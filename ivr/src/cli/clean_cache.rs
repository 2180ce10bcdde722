//! Contains the logic for the `clean-cache` command.
use std::time::Duration;

use clap::Args;
use colored::Colorize;
use ivr_common::error::Result;
use ivr_common::model::ModuleId;
use ivr_core::{EvictOptions, Session};
use tracing::{debug, instrument};

#[derive(Args, Debug)]
pub struct CleanCache {
    /// Evict entries not used for this long, e.g. "30days"
    #[arg(long, value_parser = humantime::parse_duration, value_name = "DURATION")]
    pub older_than: Option<Duration>,

    /// Evict every cached revision of one module (organisation#name)
    #[arg(long, value_name = "MODULE")]
    pub module: Option<String>,

    /// Evict least recently used entries until the cache fits, in bytes
    #[arg(long, value_name = "BYTES")]
    pub max_size: Option<u64>,
}

impl CleanCache {
    #[instrument(skip(self, session))]
    pub async fn run(&self, session: &Session) -> Result<()> {
        let cache = session.cache();
        let selective =
            self.older_than.is_some() || self.module.is_some() || self.max_size.is_some();

        if !selective {
            debug!("Removing every entry under {}", cache.root().display());
            let removed = cache.clean_all().await?;
            println!(
                "{}{} removed {} cached module(s)",
                "==> ".bold().blue(),
                "Cache cleaned:".bold(),
                removed
            );
            return Ok(());
        }

        let module = self.module.as_deref().map(ModuleId::parse).transpose()?;
        let options = EvictOptions {
            older_than: self.older_than,
            module,
            max_total_size: self.max_size,
        };
        let evicted = cache.evict_with(&options).await?;
        for module in &evicted {
            println!("{} {}", "evicted".yellow(), module);
        }
        println!(
            "{}{} {} module(s), {} remaining in cache",
            "==> ".bold().blue(),
            "Evicted".bold(),
            evicted.len(),
            format_size(cache.size())
        );
        Ok(())
    }
}

fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KiB", "MiB", "GiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}
