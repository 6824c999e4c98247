//! Process supervision
//!
//! Spawns the runtime with a piped stdin and a single merged stdout/stderr
//! pipe, and owns the termination sequence. The merged pipe is drained by a
//! dedicated thread so no byte ever waits in a userspace buffer.

use std::ffi::OsString;
use std::fmt;
use std::io::{self, Read};
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, instrument, warn};

use crate::config::RunConfig;
use crate::runner::ProcessError;
use crate::toolchain::Toolchain;
use crate::types::{HostOs, TerminationOutcome, exit_code};

/// Pending output chunks between the reader thread and the streamer
const OUTPUT_CHANNEL_CAPACITY: usize = 1024;
/// Pending stdin writes per process
const STDIN_CHANNEL_CAPACITY: usize = 64;

/// Program and arguments handed to the OS
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    pub program: OsString,
    pub args: Vec<OsString>,
}

/// How a program is launched on this host
pub trait LaunchStrategy: fmt::Debug + Send + Sync {
    fn launch_spec(&self, program: &Path, args: &[String]) -> LaunchSpec;
}

/// Execute the program directly
#[derive(Debug, Clone, Copy, Default)]
pub struct DirectLaunch;

impl LaunchStrategy for DirectLaunch {
    fn launch_spec(&self, program: &Path, args: &[String]) -> LaunchSpec {
        LaunchSpec {
            program: program.as_os_str().to_owned(),
            args: args.iter().map(OsString::from).collect(),
        }
    }
}

/// Execute the program through a shell (`cmd /c` on Windows), which keeps
/// console pipes responsive there
#[derive(Debug, Clone)]
pub struct ShellLaunch {
    shell: OsString,
    flag: OsString,
}

impl ShellLaunch {
    pub fn new(shell: impl Into<OsString>, flag: impl Into<OsString>) -> Self {
        Self {
            shell: shell.into(),
            flag: flag.into(),
        }
    }

    pub fn cmd() -> Self {
        Self::new("cmd", "/c")
    }
}

impl LaunchStrategy for ShellLaunch {
    fn launch_spec(&self, program: &Path, args: &[String]) -> LaunchSpec {
        let mut full = Vec::with_capacity(args.len() + 2);
        full.push(self.flag.clone());
        full.push(program.as_os_str().to_owned());
        full.extend(args.iter().map(OsString::from));
        LaunchSpec {
            program: self.shell.clone(),
            args: full,
        }
    }
}

/// Pick the launch strategy for the running host
pub fn host_launch_strategy() -> Arc<dyn LaunchStrategy> {
    match HostOs::detect() {
        HostOs::Windows => Arc::new(ShellLaunch::cmd()),
        _ => Arc::new(DirectLaunch),
    }
}

/// Observer of a process's exit code
#[derive(Debug, Clone)]
pub struct ExitWatch(watch::Receiver<Option<i32>>);

impl ExitWatch {
    /// Exit code if the process has already exited
    pub fn code(&self) -> Option<i32> {
        *self.0.borrow()
    }

    /// Wait for the exit code.
    ///
    /// Returns `None` only if the process was reaped without a status.
    pub async fn wait(&mut self) -> Option<i32> {
        let observed = self.0.wait_for(Option::is_some).await.map(|code| *code);
        observed.unwrap_or_else(|_| *self.0.borrow())
    }
}

#[cfg(test)]
impl ExitWatch {
    /// A watch whose process has not exited yet
    pub(crate) fn pending() -> (watch::Sender<Option<i32>>, Self) {
        let (tx, rx) = watch::channel(None);
        (tx, Self(rx))
    }
}

/// Sender side of a process's standard input
#[derive(Debug, Clone)]
pub struct StdinSender(mpsc::Sender<Vec<u8>>);

impl StdinSender {
    /// Queue bytes for the child's stdin; they are written and flushed in order.
    ///
    /// Never waits: when the program stops reading and the queue is full the
    /// bytes are rejected with [`ProcessError::StdinFull`].
    pub fn write(&self, data: &[u8]) -> Result<(), ProcessError> {
        self.0.try_send(data.to_vec()).map_err(|e| match e {
            TrySendError::Full(_) => ProcessError::StdinFull,
            TrySendError::Closed(_) => ProcessError::StdinClosed,
        })
    }
}

/// Merged stdout/stderr of a spawned process
#[derive(Debug)]
pub struct OutputStream {
    rx: mpsc::Receiver<io::Result<Vec<u8>>>,
}

impl OutputStream {
    /// Next chunk in production order; `None` at end of stream
    pub async fn next_chunk(&mut self) -> Option<io::Result<Vec<u8>>> {
        self.rx.recv().await
    }
}

#[cfg(test)]
impl OutputStream {
    pub(crate) fn from_receiver(rx: mpsc::Receiver<io::Result<Vec<u8>>>) -> Self {
        Self { rx }
    }
}

/// Ownership handle of a running process
#[derive(Debug)]
pub struct ProcessHandle {
    pid: Option<u32>,
    stdin: Option<StdinSender>,
    kill: Option<oneshot::Sender<()>>,
    exit: ExitWatch,
}

impl ProcessHandle {
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Stdin sender, unless input was closed
    pub fn stdin(&self) -> Option<StdinSender> {
        self.stdin.clone()
    }

    /// Observer of the exit code
    pub fn exit_watch(&self) -> ExitWatch {
        self.exit.clone()
    }

    pub fn has_exited(&self) -> bool {
        self.exit.code().is_some()
    }

    /// Drop the stdin sender so the child sees end of input
    pub fn close_input(&mut self) {
        if self.stdin.take().is_some() {
            debug!(pid = ?self.pid, "closed stdin");
        }
    }

    /// Close input, send the kill signal and wait up to `grace` for exit.
    ///
    /// Idempotent; never fails and never waits longer than `grace`.
    #[instrument(skip(self), fields(pid = ?self.pid))]
    pub async fn terminate(&mut self, grace: Duration) -> TerminationOutcome {
        self.close_input();

        if let Some(code) = self.exit.code() {
            self.kill = None;
            return TerminationOutcome::AlreadyExited(code);
        }

        if let Some(kill) = self.kill.take() {
            // The reaper may already be gone if the child just exited
            let _ = kill.send(());
        }

        match tokio::time::timeout(grace, self.exit.wait()).await {
            Ok(Some(code)) => {
                debug!(code, "process terminated");
                TerminationOutcome::Exited(code)
            }
            Ok(None) => {
                warn!("process reaped without an exit status");
                TerminationOutcome::Uncertain
            }
            Err(_) => {
                warn!(?grace, "process did not exit within the grace period");
                TerminationOutcome::Uncertain
            }
        }
    }
}

/// A freshly spawned process: its handle and its merged output
#[derive(Debug)]
pub struct SpawnedProcess {
    pub handle: ProcessHandle,
    pub output: OutputStream,
}

/// Launches runtime processes
#[derive(Debug, Clone)]
pub struct Supervisor {
    strategy: Arc<dyn LaunchStrategy>,
    read_buffer: usize,
}

impl Supervisor {
    pub fn new(strategy: Arc<dyn LaunchStrategy>, read_buffer: usize) -> Self {
        Self {
            strategy,
            read_buffer: read_buffer.max(1),
        }
    }

    /// Supervisor using the strategy detected for this host
    pub fn for_host(read_buffer: usize) -> Self {
        Self::new(host_launch_strategy(), read_buffer)
    }

    /// Runtime arguments: configured flags, class path, entry name
    pub fn runtime_args(run: &RunConfig, workspace: &Path, entry: &str) -> Vec<String> {
        let mut args = run.args.clone();
        args.push("-cp".to_owned());
        args.push(workspace.to_string_lossy().into_owned());
        args.push(entry.to_owned());
        args
    }

    /// Launch the compiled program `entry` from `workspace`
    pub fn spawn(
        &self,
        toolchain: &Toolchain,
        run: &RunConfig,
        workspace: &Path,
        entry: &str,
    ) -> Result<SpawnedProcess, ProcessError> {
        let args = Self::runtime_args(run, workspace, entry);
        self.spawn_program(&toolchain.runtime, &args, workspace)
    }

    /// Launch an arbitrary program with piped stdin and merged output
    #[instrument(skip(self, args))]
    pub fn spawn_program(
        &self,
        program: &Path,
        args: &[String],
        cwd: &Path,
    ) -> Result<SpawnedProcess, ProcessError> {
        let spec = self.strategy.launch_spec(program, args);
        debug!(?spec, "spawning process");

        let (reader, writer) = io::pipe().map_err(ProcessError::Pipe)?;
        let writer_err = writer.try_clone().map_err(ProcessError::Pipe)?;

        // The command owns the parent's copies of the pipe writer; it must be
        // dropped right after spawning or the reader never sees end of stream.
        let mut child = {
            let mut command = Command::new(&spec.program);
            command
                .args(&spec.args)
                .current_dir(cwd)
                .stdin(Stdio::piped())
                .stdout(writer)
                .stderr(writer_err)
                .kill_on_drop(true);
            #[cfg(unix)]
            command.process_group(0);
            command.spawn().map_err(ProcessError::SpawnFailed)?
        };

        let pid = child.id();
        let stdin = child.stdin.take().ok_or(ProcessError::StdinClosed)?;

        let (output_tx, output_rx) = mpsc::channel(OUTPUT_CHANNEL_CAPACITY);
        let read_buffer = self.read_buffer;
        std::thread::Builder::new()
            .name(format!("javarena-output-{}", pid.unwrap_or_default()))
            .spawn(move || drain(reader, output_tx, read_buffer))
            .map_err(ProcessError::Io)?;

        let stdin_tx = spawn_stdin_writer(stdin, pid);

        let (exit_tx, exit_rx) = watch::channel(None);
        let (kill_tx, kill_rx) = oneshot::channel::<()>();
        tokio::spawn(async move {
            let status = tokio::select! {
                status = child.wait() => status,
                _ = kill_rx => {
                    if let Some(pid) = pid {
                        kill_tree(pid).await;
                    }
                    if let Err(e) = child.start_kill() {
                        debug!(?pid, error = %e, "kill signal not delivered");
                    }
                    child.wait().await
                }
            };
            // Descendants left behind would keep the output pipe open
            #[cfg(unix)]
            if let Some(pid) = pid {
                kill_tree(pid).await;
            }
            let code = match status {
                Ok(status) => exit_code(status),
                Err(e) => {
                    warn!(?pid, error = %e, "failed to reap process");
                    -1
                }
            };
            debug!(?pid, code, "process exited");
            exit_tx.send_replace(Some(code));
        });

        debug!(?pid, "process spawned");

        Ok(SpawnedProcess {
            handle: ProcessHandle {
                pid,
                stdin: Some(StdinSender(stdin_tx)),
                kill: Some(kill_tx),
                exit: ExitWatch(exit_rx),
            },
            output: OutputStream { rx: output_rx },
        })
    }
}

/// Kill `pid` together with every process it started.
///
/// Children are spawned as process group leaders, so the whole group is
/// signalled. A group that is already gone is not an error.
#[cfg(unix)]
pub(crate) async fn kill_tree(pid: u32) {
    let Ok(pgid) = i32::try_from(pid) else {
        return;
    };
    // SAFETY: kill(2) has no memory-safety preconditions
    let rc = unsafe { libc::kill(-pgid, libc::SIGKILL) };
    if rc == -1 {
        let err = io::Error::last_os_error();
        if err.raw_os_error() != Some(libc::ESRCH) {
            debug!(pid, error = %err, "process group kill failed");
        }
    }
}

/// Kill `pid` together with every process it started (`taskkill /T /F`)
#[cfg(windows)]
pub(crate) async fn kill_tree(pid: u32) {
    let status = Command::new("taskkill")
        .args(["/T", "/F", "/PID"])
        .arg(pid.to_string())
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await;
    match status {
        Ok(status) if status.success() => {}
        Ok(status) => debug!(pid, %status, "taskkill reported failure"),
        Err(e) => debug!(pid, error = %e, "failed to run taskkill"),
    }
}

#[cfg(not(any(unix, windows)))]
pub(crate) async fn kill_tree(_pid: u32) {}

/// Forward stdin writes to the child, flushing after each one.
///
/// The child sees end of input once every sender is dropped.
fn spawn_stdin_writer(
    mut stdin: tokio::process::ChildStdin,
    pid: Option<u32>,
) -> mpsc::Sender<Vec<u8>> {
    let (tx, mut rx) = mpsc::channel::<Vec<u8>>(STDIN_CHANNEL_CAPACITY);
    tokio::spawn(async move {
        while let Some(data) = rx.recv().await {
            let written = match stdin.write_all(&data).await {
                Ok(()) => stdin.flush().await,
                Err(e) => Err(e),
            };
            if let Err(e) = written {
                debug!(?pid, error = %e, "stdin closed by child");
                break;
            }
        }
    });
    tx
}

/// Blocking read loop over the merged output pipe
fn drain(mut reader: io::PipeReader, tx: mpsc::Sender<io::Result<Vec<u8>>>, read_buffer: usize) {
    let mut buf = vec![0u8; read_buffer];
    loop {
        match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => {
                if tx.blocking_send(Ok(buf[..n].to_vec())).is_err() {
                    // streamer is gone
                    break;
                }
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                let _ = tx.blocking_send(Err(e));
                break;
            }
        }
    }
}
