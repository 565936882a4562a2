//! ---
//! vsl_section: "05-networking-external-interfaces"
//! vsl_subsection: "binary"
//! vsl_type: "source"
//! vsl_scope: "code"
//! vsl_description: "Control CLI for administrators of the release catalog."
//! vsl_version: "v0.0.0-prealpha"
//! vsl_owner: "tbd"
//! ---
use anyhow::Result;
use clap::{Args, Subcommand};
use vessel_catalog::{Catalog, ReleaseRecord};

use crate::CatalogOptions;

#[derive(Debug, Subcommand)]
pub enum ReleaseCommand {
    /// List releases of a product, oldest version first.
    List(ReleaseArgs),
    /// Show the latest release of a product and its per-platform paths.
    Latest(ReleaseArgs),
}

#[derive(Debug, Args)]
pub struct ReleaseArgs {
    identifier: String,
    #[command(flatten)]
    catalog: CatalogOptions,
}

pub fn run(command: ReleaseCommand) -> Result<()> {
    match command {
        ReleaseCommand::List(args) => {
            let catalog = args.catalog.open()?;
            let records = catalog
                .list_releases(&args.identifier)?
                .into_iter()
                .map(|release| with_paths(&catalog, release))
                .collect::<Result<Vec<_>>>()?;
            print_records(&records, args.catalog.json)
        }
        ReleaseCommand::Latest(args) => {
            let catalog = args.catalog.open()?;
            let latest = catalog.get_latest(&args.identifier)?;
            let record = with_paths(&catalog, latest)?;
            print_records(&[record], args.catalog.json)
        }
    }
}

fn with_paths(catalog: &Catalog, release: vessel_catalog::Release) -> Result<ReleaseRecord> {
    let paths = catalog.release_paths(&release)?;
    Ok(ReleaseRecord { release, paths })
}

fn print_records(records: &[ReleaseRecord], json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(records)?);
        return Ok(());
    }
    for record in records {
        println!(
            "{} {} ({})",
            record.release.product,
            record.release.version,
            record.release.created_at.to_rfc3339()
        );
        for path in &record.paths {
            println!(
                "    {:<8} installer={} dist={}",
                path.operating_system,
                path.installer_path.display(),
                path.dist_path.display()
            );
        }
    }
    Ok(())
}
