//! `meshsync apply` — run batch files through a fresh in-process pipeline.
//!
//! Nothing is persisted: the pipeline, its ledger and its pusher live only
//! for the duration of the command. Useful to check what a batch sequence
//! would do to a daemon before dropping it into the batches directory.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

use meshsync_core::{batch, config, ConfigRecord, Event};
use meshsync_engine::{ApplyOutcome, ConfigReader, ConfigSink, MemoryPusher, Pipeline, PushSignal};

/// Arguments for `meshsync apply`.
#[derive(Args, Debug)]
pub struct ApplyArgs {
    /// Batch files, applied in the order given.
    #[arg(required = true)]
    pub files: Vec<PathBuf>,

    /// Output machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Serialize)]
struct FileOutcome {
    file: String,
    #[serde(flatten)]
    outcome: ApplyOutcome,
}

#[derive(Debug, Serialize)]
struct ApplyReport {
    batches: Vec<FileOutcome>,
    /// Signals the pusher actually received, in delivery order.
    pushed: Vec<PushSignal>,
    synced: bool,
    pending_collections: Vec<String>,
    version: String,
    records: Vec<ConfigRecord>,
}

#[derive(Tabled)]
struct EventRow {
    #[tabled(rename = "Batch")]
    batch: String,
    #[tabled(rename = "Event")]
    event: String,
    #[tabled(rename = "Key")]
    key: String,
    #[tabled(rename = "Version")]
    version: String,
}

#[derive(Tabled)]
struct SignalRow {
    #[tabled(rename = "Push")]
    kind: String,
    #[tabled(rename = "Scope")]
    scope: String,
    #[tabled(rename = "Detail")]
    detail: String,
}

impl ApplyArgs {
    pub fn run(self) -> Result<()> {
        let config = config::load().context("failed to load meshsync config")?;
        let pusher = Arc::new(MemoryPusher::new());
        let pipeline = Pipeline::new(&config, Some(pusher.clone()));

        let mut batches = Vec::with_capacity(self.files.len());
        let mut touched = BTreeSet::new();
        for path in &self.files {
            let change = batch::load_batch_at(path)
                .with_context(|| format!("failed to read batch {}", path.display()))?;
            let outcome = pipeline
                .apply(&change)
                .with_context(|| format!("failed to apply batch {}", path.display()))?;
            touched.insert(outcome.type_name.clone());
            batches.push(FileOutcome {
                file: path.display().to_string(),
                outcome,
            });
        }

        let mut records = Vec::new();
        for type_name in &touched {
            let listed = pipeline
                .list(type_name, "")
                .with_context(|| format!("failed to list '{type_name}'"))?;
            records.extend(listed.iter().map(|r| r.as_ref().clone()));
        }

        let report = ApplyReport {
            batches,
            pushed: pusher.take(),
            synced: pipeline.has_synced(),
            pending_collections: pipeline
                .pending_collections()
                .into_iter()
                .map(|c| c.0)
                .collect(),
            version: pipeline.version(),
            records,
        };

        if self.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&report).context("failed to serialize apply JSON")?
            );
        } else {
            print_report(&report);
        }
        Ok(())
    }
}

fn print_report(report: &ApplyReport) {
    let separator = "■".repeat(67).bright_black().to_string();

    for entry in &report.batches {
        let outcome = &entry.outcome;
        let mode = if outcome.incremental { "incremental" } else { "full" };
        let mut line = format!(
            "✓ {} → {} ({mode}, {} applied",
            entry.file, outcome.collection, outcome.applied
        );
        if outcome.discarded > 0 {
            line.push_str(&format!(", {}", format!("{} discarded", outcome.discarded).yellow()));
        }
        line.push(')');
        println!("{line}");
    }
    println!("{separator}");

    let event_rows: Vec<EventRow> = report
        .batches
        .iter()
        .flat_map(|entry| {
            entry.outcome.events.iter().map(move |e| EventRow {
                batch: short_name(&entry.file),
                event: event_label(e.event),
                key: e.key.to_string(),
                version: e.resource_version.clone(),
            })
        })
        .collect();
    if event_rows.is_empty() {
        println!("No events.");
    } else {
        let mut table = Table::new(event_rows);
        table.with(Style::rounded());
        println!("{table}");
    }

    if report.pushed.is_empty() {
        println!("No push signals.");
    } else {
        let rows: Vec<SignalRow> = report.pushed.iter().map(signal_row).collect();
        let mut table = Table::new(rows);
        table.with(Style::rounded());
        println!("{table}");
    }
    println!("{separator}");

    let readiness = if report.synced {
        "SYNCED".green().bold().to_string()
    } else {
        format!(
            "{} ({} pending)",
            "NOT SYNCED".yellow().bold(),
            report.pending_collections.len()
        )
    };
    let version = if report.version.is_empty() {
        "ledger disabled".bright_black().to_string()
    } else {
        report.version.clone()
    };
    println!("{readiness} | {} records | version {version}", report.records.len());
}

fn signal_row(signal: &PushSignal) -> SignalRow {
    match signal {
        PushSignal::Full(full) => SignalRow {
            kind: "FULL".to_string(),
            scope: join_or_dash(full.namespaces.iter()),
            detail: join_or_dash(full.collections.iter()),
        },
        PushSignal::Narrow(update) => SignalRow {
            kind: "NARROW".to_string(),
            scope: update.namespace.clone(),
            detail: format!("{} ({} endpoints)", update.hostname, update.endpoints.len()),
        },
    }
}

fn event_label(event: Event) -> String {
    match event {
        Event::Add => "ADD".to_string(),
        Event::Update => "UPDATE".to_string(),
        Event::Remove => "REMOVE".to_string(),
    }
}

fn join_or_dash<'a>(items: impl Iterator<Item = &'a String>) -> String {
    let joined = items.map(String::as_str).collect::<Vec<_>>().join(", ");
    if joined.is_empty() {
        "-".to_string()
    } else {
        joined
    }
}

fn short_name(file: &str) -> String {
    std::path::Path::new(file)
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| file.to_string())
}
