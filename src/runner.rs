//! External command execution
//!
//! All tool invocations go through a [`CommandRunner`]. The production
//! implementation, [`SystemRunner`]:
//!
//! - renders the invocation with every argument shell-quoted and logs it
//!   before anything runs
//! - spawns the tool as the leader of its own process group and tracks it
//!   until reaped (see [`process_guard`](crate::process_guard))
//! - captures stdout and stderr interleaved into one combined output
//! - kills the process group when the wall-clock timeout elapses
//! - classifies a nonzero exit as ignorable (output matches the tool's
//!   ignore pattern) or fatal
//!
//! There is no retry. A fatal outcome is returned as an error and the caller
//! aborts the run.

use std::borrow::Cow;
use std::io::{self, PipeReader, Read};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{error, info, warn};
use regex::Regex;

use crate::error::{PitrError, Result};
use crate::process_guard::{self, ToolProcessGroup};
use crate::tool_traits::ToolArgs;

/// Default per-invocation wall-clock bound.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(600);

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Outcome of a single external invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandResult {
    /// Whether the tool exited with status 0.
    pub success: bool,
    /// Exit code (None if terminated by signal).
    pub exit_code: Option<i32>,
    /// Interleaved stdout and stderr.
    pub output: String,
    /// Whether the invocation was skipped by dry-run mode.
    pub dry_run: bool,
}

impl CommandResult {
    fn skipped() -> Self {
        Self {
            success: true,
            exit_code: Some(0),
            output: String::new(),
            dry_run: true,
        }
    }
}

/// Executes typed tool invocations.
pub trait CommandRunner {
    /// Run one tool to completion.
    fn run(&self, args: &dyn ToolArgs) -> Result<CommandResult>;

    /// Run `producer | consumer` as two concurrent processes.
    ///
    /// If either side fails the other is killed and a single error is
    /// returned for the composed step.
    fn run_pipeline(
        &self,
        purpose: &str,
        producer: &dyn ToolArgs,
        consumer: &dyn ToolArgs,
    ) -> Result<CommandResult>;

    /// Whether destructive invocations are only logged.
    fn is_dry_run(&self) -> bool {
        false
    }
}

/// Render an invocation with every component individually shell-quoted.
pub fn render_command(args: &dyn ToolArgs) -> String {
    let mut rendered = quote(args.program());
    for arg in args.to_cli_args() {
        rendered.push(' ');
        rendered.push_str(&quote(&arg));
    }
    rendered
}

/// Render `producer | consumer`.
pub fn render_pipeline(producer: &dyn ToolArgs, consumer: &dyn ToolArgs) -> String {
    format!("{} | {}", render_command(producer), render_command(consumer))
}

fn quote(s: &str) -> String {
    shell_escape::escape(Cow::Borrowed(s)).into_owned()
}

/// Decide whether a finished invocation is a success, an ignorable failure
/// or a fatal failure.
pub fn classify(
    purpose: &str,
    command: &str,
    ignore_pattern: Option<&str>,
    status: ExitStatus,
    output: String,
) -> Result<CommandResult> {
    let result = CommandResult {
        success: status.success(),
        exit_code: status.code(),
        output,
        dry_run: false,
    };

    if result.success {
        return Ok(result);
    }

    if let Some(pattern) = ignore_pattern.filter(|p| !p.is_empty()) {
        if Regex::new(pattern)?.is_match(&result.output) {
            warn!(
                "Ignoring failure of {} (output matched {:?})",
                purpose, pattern
            );
            return Ok(result);
        }
    }

    error!("{}", result.output.trim_end());
    Err(PitrError::CommandFailed {
        purpose: purpose.to_string(),
        command: command.to_string(),
        exit_code: result.exit_code,
        output: result.output,
    })
}

/// Runs tools as real child processes.
#[derive(Debug, Clone)]
pub struct SystemRunner {
    timeout: Duration,
    dry_run: bool,
}

impl Default for SystemRunner {
    fn default() -> Self {
        Self::new(DEFAULT_TIMEOUT)
    }
}

impl SystemRunner {
    /// Create a runner with the given per-invocation timeout.
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            dry_run: false,
        }
    }

    /// Only log destructive invocations instead of running them.
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    fn timeout_error(&self, purpose: &str, command: &str) -> PitrError {
        PitrError::Timeout {
            purpose: purpose.to_string(),
            command: command.to_string(),
            seconds: self.timeout.as_secs(),
        }
    }
}

impl CommandRunner for SystemRunner {
    fn run(&self, args: &dyn ToolArgs) -> Result<CommandResult> {
        let command = render_command(args);
        if self.dry_run && args.is_destructive() {
            info!("[DRY RUN] Skipped {}: {}", args.purpose(), command);
            return Ok(CommandResult::skipped());
        }
        log_invocation(args.purpose(), &command, args);

        let (reader, writer) = io::pipe()?;
        let mut child = spawn_tool(
            args,
            &command,
            Stdio::null(),
            Stdio::from(writer.try_clone()?),
            Stdio::from(writer),
        )?;
        let collector = collect_output(reader);
        let deadline = Instant::now() + self.timeout;

        let status = match wait_until(&mut child, deadline) {
            Ok(Some(status)) => status,
            Ok(None) => {
                let _ = terminate(&mut child);
                let output = join_output(collector);
                error!("{}", output.trim_end());
                return Err(self.timeout_error(args.purpose(), &command));
            }
            Err(e) => {
                let _ = terminate(&mut child);
                return Err(e.into());
            }
        };
        process_guard::untrack(child.id());

        let output = join_output(collector);
        classify(args.purpose(), &command, args.ignore_pattern(), status, output)
    }

    fn run_pipeline(
        &self,
        purpose: &str,
        producer: &dyn ToolArgs,
        consumer: &dyn ToolArgs,
    ) -> Result<CommandResult> {
        let command = render_pipeline(producer, consumer);
        if self.dry_run && (producer.is_destructive() || consumer.is_destructive()) {
            info!("[DRY RUN] Skipped {}: {}", purpose, command);
            return Ok(CommandResult::skipped());
        }
        log_invocation(purpose, &command, producer);

        let (reader, writer) = io::pipe()?;
        let producer_command = render_command(producer);
        let mut upstream = spawn_tool(
            producer,
            &producer_command,
            Stdio::null(),
            Stdio::piped(),
            Stdio::from(writer.try_clone()?),
        )?;
        let stream = match upstream.stdout.take() {
            Some(stream) => stream,
            None => {
                let _ = terminate(&mut upstream);
                return Err(PitrError::config(format!(
                    "{} produced no output stream",
                    producer.program()
                )));
            }
        };

        let consumer_command = render_command(consumer);
        let stderr_writer = match writer.try_clone() {
            Ok(w) => w,
            Err(e) => {
                let _ = terminate(&mut upstream);
                return Err(e.into());
            }
        };
        let mut downstream = match spawn_tool(
            consumer,
            &consumer_command,
            Stdio::from(stream),
            Stdio::from(writer),
            Stdio::from(stderr_writer),
        ) {
            Ok(child) => child,
            Err(e) => {
                let _ = terminate(&mut upstream);
                return Err(e);
            }
        };
        let collector = collect_output(reader);
        let deadline = Instant::now() + self.timeout;

        let mut upstream_status: Option<ExitStatus> = None;
        let mut downstream_status: Option<ExitStatus> = None;
        let mut first_failure: Option<ExitStatus> = None;
        loop {
            let polled = poll_exit(&mut upstream, &mut upstream_status)
                .and_then(|()| poll_exit(&mut downstream, &mut downstream_status));
            if let Err(e) = polled {
                stop_unfinished(&mut upstream, upstream_status);
                stop_unfinished(&mut downstream, downstream_status);
                return Err(e.into());
            }

            match (upstream_status, downstream_status) {
                (Some(_), Some(_)) => break,
                (Some(up), None) if !up.success() => {
                    warn!("{} failed, stopping {}", producer.program(), consumer.program());
                    first_failure = Some(up);
                    terminate(&mut downstream)?;
                    break;
                }
                (None, Some(down)) if !down.success() => {
                    warn!("{} failed, stopping {}", consumer.program(), producer.program());
                    first_failure = Some(down);
                    terminate(&mut upstream)?;
                    break;
                }
                _ => {}
            }

            if Instant::now() >= deadline {
                stop_unfinished(&mut upstream, upstream_status);
                stop_unfinished(&mut downstream, downstream_status);
                let output = join_output(collector);
                error!("{}", output.trim_end());
                return Err(self.timeout_error(purpose, &command));
            }
            thread::sleep(POLL_INTERVAL);
        }
        process_guard::untrack(upstream.id());
        process_guard::untrack(downstream.id());

        let output = join_output(collector);
        // Report the stage that failed first; the other one was killed
        let status = match (first_failure, upstream_status, downstream_status) {
            (Some(failed), _, _) => failed,
            (None, Some(up), _) if !up.success() => up,
            (None, _, Some(down)) => down,
            _ => return Err(PitrError::config(format!("{} did not finish", command))),
        };
        let ignore = producer.ignore_pattern().or(consumer.ignore_pattern());
        classify(purpose, &command, ignore, status, output)
    }

    fn is_dry_run(&self) -> bool {
        self.dry_run
    }
}

fn log_invocation(purpose: &str, command: &str, args: &dyn ToolArgs) {
    let env_keys: Vec<String> = args.get_env_vars().into_iter().map(|(k, _)| k).collect();
    if env_keys.is_empty() {
        info!("{}: {}", purpose, command);
    } else {
        info!("{}: {} env={:?}", purpose, command, env_keys);
    }
}

/// Spawn a tool in its own process group and register it.
///
/// The `Command` is dropped before returning so the parent holds no copy of
/// the output pipe's write end.
fn spawn_tool(
    args: &dyn ToolArgs,
    rendered: &str,
    stdin: Stdio,
    stdout: Stdio,
    stderr: Stdio,
) -> Result<Child> {
    let mut cmd = Command::new(args.program());
    cmd.args(args.to_cli_args())
        .stdin(stdin)
        .stdout(stdout)
        .stderr(stderr)
        .as_group_leader();
    for (key, value) in args.get_env_vars() {
        cmd.env(key, value);
    }

    let child = cmd.spawn().map_err(|source| PitrError::Spawn {
        command: rendered.to_string(),
        source,
    })?;
    process_guard::track(child.id());
    Ok(child)
}

fn collect_output(mut reader: PipeReader) -> JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        if let Err(e) = reader.read_to_end(&mut buf) {
            warn!("Failed to read command output: {}", e);
        }
        buf
    })
}

fn join_output(collector: JoinHandle<Vec<u8>>) -> String {
    let bytes = collector.join().unwrap_or_default();
    String::from_utf8_lossy(&bytes).into_owned()
}

fn wait_until(child: &mut Child, deadline: Instant) -> io::Result<Option<ExitStatus>> {
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Some(status));
        }
        if Instant::now() >= deadline {
            return Ok(None);
        }
        thread::sleep(POLL_INTERVAL);
    }
}

/// Kill a child's process group and reap it.
fn terminate(child: &mut Child) -> io::Result<ExitStatus> {
    let pid = child.id();
    process_guard::kill_group(pid);
    let _ = child.kill();
    let status = child.wait();
    process_guard::untrack(pid);
    status
}

/// Record a pipeline side's exit status once it has finished.
fn poll_exit(child: &mut Child, status: &mut Option<ExitStatus>) -> io::Result<()> {
    if status.is_none() {
        *status = child.try_wait()?;
    }
    Ok(())
}

/// Kill and reap a pipeline side unless it was already reaped; a reaped
/// leader's pid may have been reused.
fn stop_unfinished(child: &mut Child, status: Option<ExitStatus>) {
    if status.is_none() {
        let _ = terminate(child);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::process::ExitStatusExt;

    struct Sh {
        script: String,
        ignore: Option<String>,
        destructive: bool,
    }

    impl Sh {
        fn new(script: &str) -> Self {
            Self {
                script: script.to_string(),
                ignore: None,
                destructive: true,
            }
        }
    }

    impl ToolArgs for Sh {
        fn program(&self) -> &str {
            "sh"
        }

        fn to_cli_args(&self) -> Vec<String> {
            vec!["-c".to_string(), self.script.clone()]
        }

        fn purpose(&self) -> &str {
            "test script"
        }

        fn ignore_pattern(&self) -> Option<&str> {
            self.ignore.as_deref()
        }

        fn is_destructive(&self) -> bool {
            self.destructive
        }
    }

    #[test]
    fn test_render_command_quotes_each_argument() {
        let args = Sh::new("echo 'hello world'; exit 0");
        let rendered = render_command(&args);
        assert!(rendered.starts_with("sh -c '"));
        assert!(rendered.contains("hello world"));

        let plain = Sh::new("true");
        assert_eq!(render_command(&plain), "sh -c true");
    }

    #[test]
    fn test_classify_success() {
        let status = ExitStatus::from_raw(0);
        let result = classify("noop", "true", None, status, "ok".to_string()).unwrap();
        assert!(result.success);
        assert_eq!(result.exit_code, Some(0));
    }

    #[test]
    fn test_classify_ignorable_failure() {
        // Raw wait status 256 is exit code 1
        let status = ExitStatus::from_raw(256);
        let result = classify(
            "fix ownership",
            "chown -R mysql /var/lib/mysql",
            Some("No such file"),
            status,
            "chown: cannot access '#sql-1': No such file or directory".to_string(),
        )
        .unwrap();
        assert!(!result.success);
        assert_eq!(result.exit_code, Some(1));
    }

    #[test]
    fn test_classify_empty_pattern_is_fatal() {
        let status = ExitStatus::from_raw(256);
        let err = classify("step", "false", Some(""), status, String::new()).unwrap_err();
        assert!(matches!(err, PitrError::CommandFailed { exit_code: Some(1), .. }));
    }

    #[test]
    fn test_classify_invalid_pattern() {
        let status = ExitStatus::from_raw(256);
        let err = classify("step", "false", Some("("), status, String::new()).unwrap_err();
        assert!(matches!(err, PitrError::Pattern(_)));
    }

    #[test]
    fn test_run_captures_combined_output() {
        let runner = SystemRunner::default();
        let result = runner.run(&Sh::new("echo out; echo err >&2")).unwrap();
        assert!(result.success);
        assert!(result.output.contains("out"));
        assert!(result.output.contains("err"));
    }

    #[test]
    fn test_run_failure_is_fatal() {
        let runner = SystemRunner::default();
        let err = runner.run(&Sh::new("echo broken; exit 3")).unwrap_err();
        match err {
            PitrError::CommandFailed {
                exit_code, output, ..
            } => {
                assert_eq!(exit_code, Some(3));
                assert!(output.contains("broken"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_run_failure_matching_pattern_is_ignored() {
        let runner = SystemRunner::default();
        let mut args = Sh::new("echo 'Warning: already stopped' >&2; exit 1");
        args.ignore = Some("already stopped".to_string());
        let result = runner.run(&args).unwrap();
        assert!(!result.success);
    }

    #[test]
    fn test_run_timeout_kills_process() {
        let runner = SystemRunner::new(Duration::from_millis(200));
        let started = Instant::now();
        let err = runner.run(&Sh::new("sleep 30")).unwrap_err();
        assert!(matches!(err, PitrError::Timeout { .. }));
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn test_run_missing_program_is_spawn_error() {
        struct Missing;
        impl ToolArgs for Missing {
            fn program(&self) -> &str {
                "/nonexistent/pitr-tool"
            }
            fn to_cli_args(&self) -> Vec<String> {
                vec![]
            }
            fn purpose(&self) -> &str {
                "missing tool"
            }
        }
        let err = SystemRunner::default().run(&Missing).unwrap_err();
        assert!(matches!(err, PitrError::Spawn { .. }));
    }

    #[test]
    fn test_dry_run_skips_destructive_only() {
        let runner = SystemRunner::default().with_dry_run(true);
        assert!(runner.is_dry_run());

        let skipped = runner.run(&Sh::new("exit 9")).unwrap();
        assert!(skipped.dry_run);

        let mut read_only = Sh::new("echo datadir /var/lib/mysql/");
        read_only.destructive = false;
        let result = runner.run(&read_only).unwrap();
        assert!(!result.dry_run);
        assert!(result.output.contains("/var/lib/mysql/"));
    }

    #[test]
    fn test_pipeline_streams_between_processes() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("stream.out");
        let consumer = Sh::new(&format!("cat > '{}'", target.display()));

        let result = SystemRunner::default()
            .run_pipeline("stream", &Sh::new("printf 'chunk-1\\nchunk-2\\n'"), &consumer)
            .unwrap();

        assert!(result.success);
        let written = std::fs::read_to_string(&target).unwrap();
        assert_eq!(written, "chunk-1\nchunk-2\n");
    }

    #[test]
    fn test_pipeline_producer_failure_stops_consumer() {
        let started = Instant::now();
        let err = SystemRunner::default()
            .run_pipeline(
                "stream",
                &Sh::new("echo 'connection refused' >&2; exit 7"),
                &Sh::new("sleep 30"),
            )
            .unwrap_err();

        match err {
            PitrError::CommandFailed {
                exit_code, output, ..
            } => {
                assert_eq!(exit_code, Some(7));
                assert!(output.contains("connection refused"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn test_pipeline_consumer_failure_is_fatal() {
        let err = SystemRunner::default()
            .run_pipeline("stream", &Sh::new("sleep 30"), &Sh::new("exit 4"))
            .unwrap_err();
        assert!(matches!(err, PitrError::CommandFailed { exit_code: Some(4), .. }));
    }

    #[test]
    fn test_pipeline_timeout() {
        let err = SystemRunner::new(Duration::from_millis(200))
            .run_pipeline("stream", &Sh::new("sleep 30"), &Sh::new("cat >/dev/null"))
            .unwrap_err();
        assert!(matches!(err, PitrError::Timeout { .. }));
    }

    #[test]
    fn test_stop_unfinished_kills_only_running_side() {
        let mut finished = Command::new("sh").args(["-c", "exit 0"]).spawn().unwrap();
        let finished_status = Some(finished.wait().unwrap());
        let mut running = Command::new("sh")
            .args(["-c", "sleep 60"])
            .as_group_leader()
            .spawn()
            .unwrap();
        process_guard::track(running.id());

        stop_unfinished(&mut finished, finished_status);
        stop_unfinished(&mut running, None);

        assert!(running.try_wait().unwrap().is_some());
    }
}
