// ==================================================================================
// `tool` module: running one external program with a timeout and cancellation
// ==================================================================================
use crate::error::{PipelineError, PipelineResult};
use crate::pool::CancelToken;
use anyhow::{anyhow, Result};
use std::ffi::OsStr;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// An external program plus the arguments that always precede the per-call ones
/// (e.g. `perl pal2nal.pl`).
#[derive(Debug, Clone)]
pub struct ToolSpec {
    pub program: PathBuf,
    pub leading_args: Vec<String>,
}

impl ToolSpec {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        ToolSpec {
            program: program.into(),
            leading_args: Vec::new(),
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.leading_args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Short name used in logs and failure reasons.
    pub fn name(&self) -> String {
        let script = self.leading_args.iter().find(|a| {
            !a.starts_with('-')
                && !a.contains(char::is_whitespace)
                && Path::new(a.as_str()).extension().is_some()
        });
        let shown = script.map(Path::new).unwrap_or(self.program.as_path());
        shown
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.program.display().to_string())
    }

    /// Fails unless the program resolves on `PATH` or is an existing file.
    pub fn ensure_available(&self) -> Result<()> {
        let found = if self.program.components().count() > 1 {
            self.program.is_file()
        } else {
            which::which(&self.program).is_ok()
        };
        if found {
            Ok(())
        } else {
            Err(anyhow!(
                "Error: '{}' executable not found.\nPlease ensure it is installed and in your system's PATH environment variable.",
                self.program.display()
            ))
        }
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.leading_args);
        cmd
    }
}

/// Per-invocation limits shared by every unit of one stage.
#[derive(Debug, Clone, Default)]
pub struct RunLimits {
    pub timeout: Option<Duration>,
    pub cancel: CancelToken,
}

impl RunLimits {
    /// `0` seconds disables the timeout.
    pub fn new(timeout_secs: u64, cancel: CancelToken) -> Self {
        RunLimits {
            timeout: (timeout_secs > 0).then(|| Duration::from_secs(timeout_secs)),
            cancel,
        }
    }
}

fn redirect(path: Option<&Path>) -> PipelineResult<Stdio> {
    Ok(match path {
        Some(p) => Stdio::from(File::create(p)?),
        None => Stdio::null(),
    })
}

/// Each tool leads its own process group so wrapper scripts can be stopped
/// together with whatever they forked.
#[cfg(unix)]
fn own_process_group(cmd: &mut Command) {
    use std::os::unix::process::CommandExt;
    cmd.process_group(0);
}

#[cfg(not(unix))]
fn own_process_group(_cmd: &mut Command) {}

#[cfg(unix)]
fn stop(child: &mut Child) {
    // The group id equals the child's pid (see `own_process_group`).
    let rc = unsafe { libc::killpg(child.id() as libc::pid_t, libc::SIGKILL) };
    if rc != 0 {
        warn!(error = %std::io::Error::last_os_error(), "failed to kill process group");
        let _ = child.kill();
    }
    let _ = child.wait();
}

#[cfg(not(unix))]
fn stop(child: &mut Child) {
    if let Err(e) = child.kill() {
        warn!(error = %e, "failed to kill child process");
    }
    let _ = child.wait();
}

fn last_line(path: &Path) -> Option<String> {
    let text = fs::read_to_string(path).ok()?;
    text.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .last()
        .map(str::to_string)
}

/// Runs `tool` with `args` appended, sending stdout and stderr to the given
/// files (or discarding them). Blocks until the process exits, the timeout
/// elapses or the cancel token is set; in the last two cases the process is
/// killed.
pub fn run_tool<I, S>(
    tool: &ToolSpec,
    args: I,
    stdout_to: Option<&Path>,
    stderr_to: Option<&Path>,
    limits: &RunLimits,
) -> PipelineResult<()>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let name = tool.name();
    if limits.cancel.is_cancelled() {
        return Err(PipelineError::Cancelled { tool: name });
    }

    let mut cmd = tool.command();
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(redirect(stdout_to)?)
        .stderr(redirect(stderr_to)?);
    own_process_group(&mut cmd);
    debug!(command = ?cmd, "executing");

    let mut child = cmd.spawn().map_err(|e| PipelineError::ExternalTool {
        tool: name.clone(),
        status: "spawn failure".to_string(),
        detail: Some(e.to_string()),
    })?;

    let start = Instant::now();
    let status = loop {
        if let Some(status) = child.try_wait()? {
            break status;
        }
        if limits.cancel.is_cancelled() {
            stop(&mut child);
            return Err(PipelineError::Cancelled { tool: name });
        }
        if let Some(timeout) = limits.timeout {
            if start.elapsed() >= timeout {
                stop(&mut child);
                return Err(PipelineError::Timeout { tool: name, after: timeout });
            }
        }
        thread::sleep(POLL_INTERVAL);
    };

    if status.success() {
        Ok(())
    } else {
        Err(PipelineError::ExternalTool {
            tool: name,
            status: status.to_string(),
            detail: stderr_to.and_then(last_line),
        })
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn test_stdout_is_captured() {
        let dir = tempfile::TempDir::new().unwrap();
        let out = dir.path().join("out.txt");
        run_tool(&ToolSpec::new("echo"), ["hello"], Some(&out), None, &RunLimits::default()).unwrap();
        assert_eq!(fs::read_to_string(&out).unwrap(), "hello\n");
    }

    #[test]
    fn test_nonzero_exit_reports_last_stderr_line() {
        let dir = tempfile::TempDir::new().unwrap();
        let log = dir.path().join("err.log");
        let tool = ToolSpec::new("sh").with_args(["-c", "echo first >&2; echo 'bad codon' >&2; exit 3"]);
        let err = run_tool(&tool, Vec::<&str>::new(), None, Some(&log), &RunLimits::default()).unwrap_err();
        match err {
            PipelineError::ExternalTool { tool, status, detail } => {
                assert_eq!(tool, "sh");
                assert!(status.contains('3'));
                assert_eq!(detail.as_deref(), Some("bad codon"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_hung_tool_is_killed_after_timeout() {
        let limits = RunLimits {
            timeout: Some(Duration::from_millis(200)),
            cancel: CancelToken::new(),
        };
        let start = Instant::now();
        let err = run_tool(&ToolSpec::new("sleep"), ["30"], None, None, &limits).unwrap_err();
        assert!(matches!(err, PipelineError::Timeout { .. }));
        assert!(start.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn test_timeout_also_kills_forked_descendants() {
        let dir = tempfile::TempDir::new().unwrap();
        let marker = dir.path().join("marker");
        let script = format!("(sleep 2; touch '{}'); true", marker.display());
        let tool = ToolSpec::new("sh").with_args(["-c".to_string(), script]);
        let limits = RunLimits {
            timeout: Some(Duration::from_millis(300)),
            cancel: CancelToken::new(),
        };

        let err = run_tool(&tool, Vec::<&str>::new(), None, None, &limits).unwrap_err();
        assert!(matches!(err, PipelineError::Timeout { .. }));
        thread::sleep(Duration::from_secs(3));
        assert!(!marker.exists(), "subshell outlived the timed-out tool");
    }

    #[test]
    fn test_cancelled_token_kills_running_tool() {
        let limits = RunLimits::new(0, CancelToken::new());
        let cancel = limits.cancel.clone();
        let canceller = thread::spawn(move || {
            thread::sleep(Duration::from_millis(150));
            cancel.cancel();
        });
        let err = run_tool(&ToolSpec::new("sleep"), ["30"], None, None, &limits).unwrap_err();
        canceller.join().unwrap();
        assert!(matches!(err, PipelineError::Cancelled { .. }));
    }

    #[test]
    fn test_missing_program_is_spawn_failure() {
        let err = run_tool(
            &ToolSpec::new("definitely-not-a-real-tool-xyz"),
            Vec::<&str>::new(),
            None,
            None,
            &RunLimits::default(),
        )
        .unwrap_err();
        assert!(matches!(err, PipelineError::ExternalTool { .. }));
        assert!(ToolSpec::new("definitely-not-a-real-tool-xyz").ensure_available().is_err());
        assert!(ToolSpec::new("sh").ensure_available().is_ok());
    }

    #[test]
    fn test_name_prefers_script_argument() {
        let tool = ToolSpec::new("perl").with_args(["/opt/pal2nal/pal2nal.pl"]);
        assert_eq!(tool.name(), "pal2nal.pl");
        assert_eq!(ToolSpec::new("/usr/bin/mafft").with_args(["--auto"]).name(), "mafft");
    }
}
