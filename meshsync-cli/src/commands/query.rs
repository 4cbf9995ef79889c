//! `meshsync list` / `meshsync get` — read records from the running daemon.

use anyhow::{anyhow, Context, Result};
use clap::Args;
use serde_json::Value;

use meshsync_core::split_name;
use meshsync_daemon::{request_get, request_list, DaemonError};

/// Arguments for `meshsync list`.
#[derive(Args, Debug)]
pub struct ListArgs {
    /// Record type, e.g. `virtual-service`.
    pub type_name: String,

    /// Restrict to one namespace (all namespaces when omitted).
    #[arg(long, short = 'n')]
    pub namespace: Option<String>,
}

impl ListArgs {
    pub fn run(self) -> Result<()> {
        let home = dirs::home_dir().context("could not determine home directory")?;
        let records = request_list(&home, &self.type_name, self.namespace.as_deref())
            .map_err(not_running_hint)
            .with_context(|| format!("failed to list '{}'", self.type_name))?;
        print_value(&records)
    }
}

/// Arguments for `meshsync get`.
#[derive(Args, Debug)]
pub struct GetArgs {
    /// Record type, e.g. `gateway`.
    pub type_name: String,

    /// `namespace/name` of the record.
    pub name: String,
}

impl GetArgs {
    pub fn run(self) -> Result<()> {
        let home = dirs::home_dir().context("could not determine home directory")?;
        let (namespace, name) = split_name(&self.name);
        let record = request_get(&home, &self.type_name, &namespace, &name)
            .map_err(not_running_hint)
            .with_context(|| format!("failed to get '{}/{}'", self.type_name, self.name))?;
        if record.is_null() {
            return Err(anyhow!("{} '{}' not found", self.type_name, self.name));
        }
        print_value(&record)
    }
}

fn not_running_hint(err: DaemonError) -> anyhow::Error {
    match err {
        DaemonError::DaemonNotRunning { .. } => {
            anyhow!("{err}; start it with 'meshsync daemon start'")
        }
        other => other.into(),
    }
}

fn print_value(value: &Value) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(value).context("failed to render JSON")?
    );
    Ok(())
}
