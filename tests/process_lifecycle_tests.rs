//! Process lifecycle tests
//!
//! Verify that a timed-out or failed external step takes its whole process
//! tree down with it, so no orphaned transfer keeps writing into the data
//! directory after the run has aborted.

use std::fs;
use std::thread;
use std::time::{Duration, Instant};

use pitr_bootstrap::{CommandRunner, PitrError, SystemRunner, ToolArgs};
use tempfile::TempDir;

/// `sh -c <script>`
struct Shell {
    script: String,
    purpose: &'static str,
}

impl Shell {
    fn new(purpose: &'static str, script: impl Into<String>) -> Self {
        Self {
            script: script.into(),
            purpose,
        }
    }
}

impl ToolArgs for Shell {
    fn program(&self) -> &str {
        "sh"
    }

    fn to_cli_args(&self) -> Vec<String> {
        vec!["-c".to_string(), self.script.clone()]
    }

    fn purpose(&self) -> &str {
        self.purpose
    }
}

/// Check if a process is alive (not dead or zombie)
fn is_process_alive(pid: u32) -> bool {
    use nix::sys::signal;
    use nix::unistd::Pid;

    if signal::kill(Pid::from_raw(pid as i32), None).is_err() {
        return false;
    }

    // 'Z' = zombie, 'X' = dead
    if let Ok(stat) = fs::read_to_string(format!("/proc/{}/stat", pid)) {
        let fields: Vec<&str> = stat.split_whitespace().collect();
        if fields.len() > 2 {
            return !matches!(fields[2], "Z" | "X");
        }
    }
    true
}

/// Wait for a process to die with timeout
fn wait_for_process_death(pid: u32, timeout: Duration) -> bool {
    let start = Instant::now();
    while start.elapsed() < timeout {
        if !is_process_alive(pid) {
            return true;
        }
        thread::sleep(Duration::from_millis(50));
    }
    false
}

fn read_pid(path: &std::path::Path) -> u32 {
    let start = Instant::now();
    loop {
        if let Ok(text) = fs::read_to_string(path) {
            if let Ok(pid) = text.trim().parse() {
                return pid;
            }
        }
        assert!(
            start.elapsed() < Duration::from_secs(5),
            "child never reported its pid"
        );
        thread::sleep(Duration::from_millis(20));
    }
}

#[test]
fn test_timeout_kills_grandchildren() {
    let dir = TempDir::new().unwrap();
    let pid_file = dir.path().join("sleeper.pid");
    let script = format!("sleep 1000 & echo $! > {}; wait", pid_file.display());

    let runner = SystemRunner::new(Duration::from_millis(500));
    let err = runner
        .run(&Shell::new("restore full backup", script))
        .unwrap_err();

    assert!(matches!(err, PitrError::Timeout { .. }));
    let sleeper = read_pid(&pid_file);
    assert!(
        wait_for_process_death(sleeper, Duration::from_secs(3)),
        "background sleep should die with its process group"
    );
}

#[test]
fn test_failed_consumer_stops_producer_tree() {
    let dir = TempDir::new().unwrap();
    let pid_file = dir.path().join("producer.pid");
    let producer = Shell::new(
        "fetch backup from object storage",
        format!(
            "sleep 1000 & echo $! > {}; echo chunk; wait",
            pid_file.display()
        ),
    );
    let consumer = Shell::new("extract backup", "read line; exit 5");

    let runner = SystemRunner::new(Duration::from_secs(30));
    let start = Instant::now();
    let err = runner
        .run_pipeline("stream backup from object storage", &producer, &consumer)
        .unwrap_err();

    assert!(start.elapsed() < Duration::from_secs(20));
    assert!(matches!(
        err,
        PitrError::CommandFailed {
            exit_code: Some(5),
            ..
        }
    ));
    let sleeper = read_pid(&pid_file);
    assert!(
        wait_for_process_death(sleeper, Duration::from_secs(3)),
        "producer's children should die with the failed pipeline"
    );
}
