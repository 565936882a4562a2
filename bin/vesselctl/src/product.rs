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
use vessel_catalog::Product;
use vessel_logging::{log_stage_event, LogContext, StageOutcome};

use crate::CatalogOptions;

#[derive(Debug, Subcommand)]
pub enum ProductCommand {
    /// Create a product.
    Add(ProductAdd),
    /// Change a product's display name.
    Rename(ProductAdd),
    /// Delete a product without releases.
    Remove(ProductRef),
    /// List every product.
    List(CatalogOptions),
}

#[derive(Debug, Args)]
pub struct ProductAdd {
    /// Unique product identifier.
    identifier: String,
    /// Display name.
    name: String,
    #[command(flatten)]
    catalog: CatalogOptions,
}

#[derive(Debug, Args)]
pub struct ProductRef {
    identifier: String,
    #[command(flatten)]
    catalog: CatalogOptions,
}

pub fn run(command: ProductCommand) -> Result<()> {
    match command {
        ProductCommand::Add(args) => {
            let product = args.catalog.open()?.create_product(&args.identifier, &args.name)?;
            audit("product.created", &product.identifier, "product created");
            print_products(&[product], args.catalog.json)
        }
        ProductCommand::Rename(args) => {
            let product = args.catalog.open()?.rename_product(&args.identifier, &args.name)?;
            audit("product.renamed", &product.identifier, "product renamed");
            print_products(&[product], args.catalog.json)
        }
        ProductCommand::Remove(args) => {
            args.catalog.open()?.delete_product(&args.identifier)?;
            audit("product.removed", &args.identifier, "product removed");
            println!("removed {}", args.identifier);
            Ok(())
        }
        ProductCommand::List(options) => {
            let products = options.open()?.list_products()?;
            print_products(&products, options.json)
        }
    }
}

fn audit(event: &str, identifier: &str, message: &str) {
    let ctx = LogContext::new().with_product(identifier);
    log_stage_event(Some(&ctx), event, message, StageOutcome::Success);
}

fn print_products(products: &[Product], json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(products)?);
        return Ok(());
    }
    for product in products {
        println!(
            "{:<24} {:<32} {}",
            product.identifier,
            product.name,
            product.created_at.to_rfc3339()
        );
    }
    Ok(())
}
