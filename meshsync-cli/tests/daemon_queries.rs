use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::thread::sleep;
use std::time::{Duration, Instant};

use serde_json::Value;
use tempfile::TempDir;

fn meshsync_bin_path() -> PathBuf {
    if let Ok(path) = std::env::var("CARGO_BIN_EXE_meshsync") {
        return PathBuf::from(path);
    }

    let this_test = std::env::current_exe().expect("current_exe");
    let deps_dir = this_test.parent().expect("deps dir");
    let debug_dir = deps_dir.parent().expect("debug dir");
    debug_dir.join("meshsync")
}

struct DaemonProcess {
    child: Child,
    binary: PathBuf,
    home: PathBuf,
}

impl DaemonProcess {
    fn start(binary: PathBuf, home: PathBuf) -> Self {
        let child = Command::new(&binary)
            .env("HOME", &home)
            .env("USERPROFILE", &home)
            .args(["daemon", "start"])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .expect("spawn daemon");

        Self {
            child,
            binary,
            home,
        }
    }

    fn stop(&mut self) {
        let _ = Command::new(&self.binary)
            .env("HOME", &self.home)
            .env("USERPROFILE", &self.home)
            .args(["daemon", "stop"])
            .status();

        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            if let Ok(Some(_)) = self.child.try_wait() {
                return;
            }
            sleep(Duration::from_millis(50));
        }

        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

impl Drop for DaemonProcess {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_json(binary: &Path, home: &Path, args: &[&str]) -> Option<Value> {
    let output = Command::new(binary)
        .env("HOME", home)
        .env("USERPROFILE", home)
        .args(args)
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    serde_json::from_slice(&output.stdout).ok()
}

fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        sleep(Duration::from_millis(100));
    }
    false
}

fn listed(binary: &Path, home: &Path, type_name: &str) -> usize {
    run_json(binary, home, &["list", type_name])
        .and_then(|v| v.as_array().map(Vec::len))
        .unwrap_or(0)
}

#[test]
fn daemon_serves_batches_dropped_into_its_directory() {
    let home = TempDir::new().expect("home");
    let batches = home.path().join(".meshsync").join("batches");
    fs::create_dir_all(&batches).expect("batches dir");
    fs::write(
        batches.join("01-sidecars.yaml"),
        r#"
collection: istio/networking/v1alpha3/sidecars
objects:
  - metadata:
      name: prod/default
      version: "1"
    body:
      egress: []
"#,
    )
    .expect("write startup batch");

    let binary = meshsync_bin_path();
    let mut daemon = DaemonProcess::start(binary.clone(), home.path().to_path_buf());

    let running = wait_until(Duration::from_secs(10), || {
        run_json(&binary, home.path(), &["daemon", "status"])
            .and_then(|v| v.get("running").and_then(Value::as_bool))
            .unwrap_or(false)
    });
    assert!(running, "daemon did not report running");
    assert!(
        wait_until(Duration::from_secs(10), || listed(&binary, home.path(), "sidecar") == 1),
        "startup batch was not applied"
    );

    let record = run_json(&binary, home.path(), &["get", "sidecar", "prod/default"])
        .expect("get sidecar");
    assert_eq!(record["resource_version"], "1");
    assert_eq!(record["namespace"], "prod");

    fs::write(
        batches.join("02-sidecars.yaml"),
        r#"
collection: istio/networking/v1alpha3/sidecars
incremental: true
objects:
  - metadata:
      name: staging/default
      version: "1"
    body:
      egress: []
"#,
    )
    .expect("write follow-up batch");
    assert!(
        wait_until(Duration::from_secs(10), || listed(&binary, home.path(), "sidecar") == 2),
        "watched batch was not applied"
    );

    let status = run_json(&binary, home.path(), &["daemon", "status"]).expect("status");
    assert!(status["batches_applied"].as_u64().unwrap_or(0) >= 2);
    assert!(!status["version"].as_str().unwrap_or_default().is_empty());

    daemon.stop();
    assert!(wait_until(Duration::from_secs(3), || {
        run_json(&binary, home.path(), &["daemon", "status"])
            .and_then(|v| v.get("running").and_then(Value::as_bool))
            .map(|running| !running)
            .unwrap_or(false)
    }));
}
