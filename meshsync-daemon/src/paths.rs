use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEBOUNCE_WINDOW: Duration = Duration::from_millis(500);

pub const DAEMON_SOCKET: &str = "daemon.sock";

pub fn meshsync_root(home: &Path) -> PathBuf {
    home.join(".meshsync")
}

/// Directory source: every `*.yaml` dropped here is one change batch.
pub fn batches_dir(home: &Path) -> PathBuf {
    meshsync_root(home).join("batches")
}

pub fn socket_path(home: &Path) -> PathBuf {
    meshsync_root(home).join(DAEMON_SOCKET)
}

pub fn ledger_path(home: &Path) -> PathBuf {
    meshsync_engine::ledger::store_path_at(home)
}
