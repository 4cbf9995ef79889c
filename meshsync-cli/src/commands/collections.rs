//! `meshsync collections` — the collection table the engine is built with.

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use meshsync_core::config;
use meshsync_core::registry::SYNTHETIC_SERVICE_ENTRY_COLLECTION;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

/// Arguments for `meshsync collections`.
#[derive(Args, Debug)]
pub struct CollectionsArgs {
    /// Output machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Serialize)]
struct CollectionJson {
    collection: String,
    type_name: String,
    group: String,
    version: String,
    controller: &'static str,
    required_fields: Vec<String>,
}

#[derive(Tabled)]
struct CollectionRow {
    #[tabled(rename = "Collection")]
    collection: String,
    #[tabled(rename = "Type")]
    type_name: String,
    #[tabled(rename = "API")]
    api: String,
    #[tabled(rename = "Controller")]
    controller: String,
    #[tabled(rename = "Required")]
    required: String,
}

impl CollectionsArgs {
    pub fn run(self) -> Result<()> {
        let config = config::load().context("failed to load meshsync config")?;
        let rows: Vec<CollectionJson> = config
            .registry()
            .iter()
            .map(|d| CollectionJson {
                collection: d.collection.to_string(),
                type_name: d.type_name.clone(),
                group: d.group.clone(),
                version: d.version.clone(),
                controller: if d.collection.0 == SYNTHETIC_SERVICE_ENTRY_COLLECTION {
                    "incremental"
                } else {
                    "generic"
                },
                required_fields: d.required_fields.clone(),
            })
            .collect();

        if self.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&rows)
                    .context("failed to serialize collections JSON")?
            );
            return Ok(());
        }

        println!(
            "meshsync v{} | {} collections | domain {}",
            env!("CARGO_PKG_VERSION"),
            rows.len(),
            config.domain_suffix.bold(),
        );
        let table_rows: Vec<CollectionRow> = rows
            .into_iter()
            .map(|row| CollectionRow {
                collection: row.collection,
                type_name: row.type_name,
                api: format!("{}/{}", row.group, row.version),
                controller: row.controller.to_string(),
                required: if row.required_fields.is_empty() {
                    "-".to_string()
                } else {
                    row.required_fields.join(", ")
                },
            })
            .collect();
        let mut table = Table::new(table_rows);
        table.with(Style::rounded());
        println!("{table}");
        Ok(())
    }
}
