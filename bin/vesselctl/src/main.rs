//! ---
//! vsl_section: "05-networking-external-interfaces"
//! vsl_subsection: "binary"
//! vsl_type: "source"
//! vsl_scope: "code"
//! vsl_description: "Control CLI for administrators of the release catalog."
//! vsl_version: "v0.0.0-prealpha"
//! vsl_owner: "tbd"
//! ---
use std::cmp::Ordering;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand};
use vessel_catalog::Catalog;
use vessel_common::{ServerConfig, StorageConfig};
use vessel_logging as logging;
use vessel_versioning::{compare, VersionInfo};

mod product;
mod release;

#[derive(Debug, Parser)]
#[command(
    author,
    disable_version_flag = true,
    about = "Vessel release catalog administration",
    long_about = None
)]
struct Cli {
    #[arg(
        short = 'V',
        long = "version",
        action = ArgAction::SetTrue,
        help = "Print extended version information and exit"
    )]
    version: bool,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(subcommand, about = "Product management")]
    Product(product::ProductCommand),
    #[command(subcommand, about = "Release inspection")]
    Release(release::ReleaseCommand),
    #[command(about = "Compare two versions (prints -1, 0 or 1)")]
    Compare { left: String, right: String },
}

/// Options shared by commands that open the catalog.
#[derive(Debug, Args)]
pub struct CatalogOptions {
    /// Configuration file naming the catalog database.
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,
    /// Catalog database, overriding the configuration.
    #[arg(long, value_name = "FILE", env = "VESSEL_DATABASE")]
    pub database: Option<PathBuf>,
    /// Print JSON instead of text.
    #[arg(long)]
    pub json: bool,
}

impl CatalogOptions {
    pub fn open(&self) -> Result<Catalog> {
        let storage = self.storage()?;
        let database = self.database.clone().unwrap_or(storage.database);
        Catalog::open(&database, storage.busy_timeout)
            .with_context(|| format!("failed to open catalog {}", database.display()))
    }

    fn storage(&self) -> Result<StorageConfig> {
        if self.database.is_some() && self.config.is_none() {
            return Ok(StorageConfig::default());
        }
        let mut candidates = Vec::new();
        if let Some(path) = &self.config {
            candidates.push(path.clone());
        }
        candidates.push(PathBuf::from("configs/vesseld.toml"));
        candidates.push(PathBuf::from("configs/vesseld.example.toml"));
        Ok(ServerConfig::load(&candidates)?.storage)
    }
}

fn main() -> Result<()> {
    logging::init_cli();
    let cli = Cli::parse();
    if cli.version {
        println!("{}", VersionInfo::current().extended());
        return Ok(());
    }
    let Some(command) = cli.command else {
        anyhow::bail!("no command given; see --help");
    };
    match command {
        Commands::Product(cmd) => product::run(cmd)?,
        Commands::Release(cmd) => release::run(cmd)?,
        Commands::Compare { left, right } => {
            let ordering = compare(&left, &right)?;
            println!("{}", ordering_sign(ordering));
        }
    }
    Ok(())
}

fn ordering_sign(ordering: Ordering) -> i8 {
    match ordering {
        Ordering::Less => -1,
        Ordering::Equal => 0,
        Ordering::Greater => 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn compare_command_parses() {
        let cli = Cli::try_parse_from(["vesselctl", "compare", "1.0", "1.0.0"]).unwrap();
        assert!(matches!(cli.command, Some(Commands::Compare { .. })));
        assert_eq!(ordering_sign(compare("1.0", "1.0.0").unwrap()), 0);
        assert_eq!(ordering_sign(compare("1.9", "1.10").unwrap()), -1);
    }
}
