//! PTY process handle.
//!
//! This module provides the core PTY spawning and I/O functionality.
//! A [`PtyProcess`] owns one interactive child process and its
//! pseudo-terminal for the whole lifetime of a terminal session.

use std::future::Future;
use std::io::{Read, Write};
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use portable_pty::{native_pty_system, Child, ChildKiller, CommandBuilder, MasterPty, PtySize};
use thiserror::Error;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::config::{SessionConfig, DEFAULT_COLS, DEFAULT_ROWS};

/// Unique identifier for a session.
pub type SessionId = String;

/// Receiving end of a process's output chunks.
///
/// The channel closes once the pty reports end-of-file, which is how the
/// owner learns that the process has exited.
pub type OutputReceiver = mpsc::UnboundedReceiver<Vec<u8>>;

/// Environment directive that keeps the wrapped program's output unbuffered.
pub const UNBUFFERED_ENV: (&str, &str) = ("PYTHONUNBUFFERED", "1");

/// Buffer size for reading from PTY.
const READ_BUFFER_SIZE: usize = 4096;

/// Polls for exit after the process group has been hung up.
const HANGUP_GRACE_POLLS: u32 = 10;
const HANGUP_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Errors that can occur during session operations.
#[derive(Error, Debug)]
pub enum SessionError {
    /// Failed to spawn the PTY.
    #[error("failed to spawn PTY: {0}")]
    SpawnFailed(String),

    /// Failed to write to the PTY.
    #[error("failed to write to PTY: {0}")]
    WriteFailed(String),

    /// Failed to resize the PTY.
    #[error("failed to resize PTY: {0}")]
    ResizeFailed(String),

    /// Failed to kill the session.
    #[error("failed to kill session: {0}")]
    KillFailed(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Status of a session's process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    /// Process exited on its own with a code.
    Exited(i32),
    /// Process was terminated by the session.
    Killed,
    /// Process is gone but its status could not be collected.
    Terminated,
}

/// Parameters for starting a process on a new pty.
#[derive(Debug, Clone, PartialEq)]
pub struct SpawnOptions {
    /// Program to run.
    pub command: String,
    /// Program arguments.
    pub args: Vec<String>,
    /// Initial terminal width.
    pub cols: u16,
    /// Initial terminal height.
    pub rows: u16,
    /// Working directory; the daemon's own when `None`.
    pub cwd: Option<PathBuf>,
    /// Extra environment variables on top of the inherited environment.
    pub env: Vec<(String, String)>,
    /// Value of TERM for the child.
    pub term: String,
}

impl SpawnOptions {
    /// Options for running `command` at the default 80x24 size.
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            args: Vec::new(),
            cols: DEFAULT_COLS,
            rows: DEFAULT_ROWS,
            cwd: None,
            env: Vec::new(),
            term: "xterm-color".to_string(),
        }
    }

    /// Build options from the session section of the configuration.
    pub fn from_config(config: &SessionConfig) -> Self {
        Self {
            command: config.command.clone(),
            args: config.args.clone(),
            cols: config.cols,
            rows: config.rows,
            cwd: config.cwd.clone(),
            env: config.env.clone(),
            term: config.term.clone(),
        }
    }

    /// Set the program arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Set the initial terminal size.
    pub fn size(mut self, cols: u16, rows: u16) -> Self {
        self.cols = cols;
        self.rows = rows;
        self
    }

    /// Set the working directory.
    pub fn cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    /// Add an environment variable.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    fn command_builder(&self) -> CommandBuilder {
        let mut cmd = CommandBuilder::new(&self.command);
        cmd.args(&self.args);

        // CommandBuilder would otherwise fall back to the home directory.
        let cwd = self
            .cwd
            .clone()
            .or_else(|| std::env::current_dir().ok());
        if let Some(dir) = cwd {
            cmd.cwd(dir);
        }

        cmd.env("TERM", &self.term);
        cmd.env(UNBUFFERED_ENV.0, UNBUFFERED_ENV.1);
        for (key, value) in &self.env {
            cmd.env(key, value);
        }

        cmd
    }
}

/// Operations the session bridge needs from a terminal process.
///
/// [`PtyProcess`] is the production implementation; the trait exists so the
/// bridge can be driven against other processes in tests.
pub trait PtyHandle: Send + Sync + 'static {
    /// Session identifier used in logs.
    fn id(&self) -> &SessionId;

    /// Writes bytes to the process input. A no-op once the process is gone.
    fn write<'a>(
        &'a self,
        data: &'a [u8],
    ) -> Pin<Box<dyn Future<Output = Result<(), SessionError>> + Send + 'a>>;

    /// Resizes the terminal. A no-op once the process is gone.
    fn resize(
        &self,
        cols: u16,
        rows: u16,
    ) -> Pin<Box<dyn Future<Output = Result<(), SessionError>> + Send + '_>>;

    /// Terminates the process and releases the pty. Idempotent.
    fn kill(
        &self,
    ) -> Pin<Box<dyn Future<Output = Result<SessionStatus, SessionError>> + Send + '_>>;

    /// Returns the current terminal size as `(cols, rows)`.
    fn size(&self) -> (u16, u16);
}

type SharedWriter = Arc<Mutex<Option<Box<dyn Write + Send>>>>;
type SharedChild = Arc<Mutex<Box<dyn Child + Send + Sync>>>;

/// A child process attached to a pseudo-terminal.
///
/// Output is read on a blocking thread and delivered through the
/// [`OutputReceiver`] returned by [`PtyProcess::spawn`], in the order the
/// process produced it.
pub struct PtyProcess {
    /// Unique session identifier.
    id: SessionId,

    /// The PTY master handle; taken on kill.
    master: Mutex<Option<Box<dyn MasterPty + Send>>>,

    /// The writer for the PTY; taken on kill.
    writer: SharedWriter,

    /// The child process.
    child: SharedChild,

    /// Cleared when output reaches EOF or the process is killed.
    running: Arc<AtomicBool>,

    /// Set by the first call to kill.
    killed: AtomicBool,

    /// Status recorded by kill, returned to later callers.
    status: Mutex<Option<SessionStatus>>,

    /// Current terminal size.
    size: Mutex<(u16, u16)>,

    /// Process ID.
    pid: Option<u32>,
}

impl PtyProcess {
    /// Spawns a process on a new pty and starts reading its output.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(options: &SpawnOptions) -> Result<(Self, OutputReceiver), SessionError> {
        let id = Uuid::new_v4().to_string();

        let pty_system = native_pty_system();
        let pair = pty_system
            .openpty(PtySize {
                rows: options.rows,
                cols: options.cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| SessionError::SpawnFailed(e.to_string()))?;

        let child = pair
            .slave
            .spawn_command(options.command_builder())
            .map_err(|e| {
                SessionError::SpawnFailed(format!("{}: {}", options.command, e))
            })?;

        // The child holds its own copy of the slave side.
        drop(pair.slave);

        let pid = child.process_id();

        let writer = pair
            .master
            .take_writer()
            .map_err(|e| SessionError::SpawnFailed(e.to_string()))?;
        let reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| SessionError::SpawnFailed(e.to_string()))?;

        let (output_tx, output_rx) = mpsc::unbounded_channel();
        let running = Arc::new(AtomicBool::new(true));

        start_read_loop(reader, output_tx, Arc::clone(&running), id.clone());

        tracing::info!(
            session_id = %id,
            pid = ?pid,
            command = %options.command,
            cols = options.cols,
            rows = options.rows,
            "Spawned PTY process"
        );

        let process = PtyProcess {
            id,
            master: Mutex::new(Some(pair.master)),
            writer: Arc::new(Mutex::new(Some(writer))),
            child: Arc::new(Mutex::new(child)),
            running,
            killed: AtomicBool::new(false),
            status: Mutex::new(None),
            size: Mutex::new((options.cols, options.rows)),
            pid,
        };

        Ok((process, output_rx))
    }

    /// Returns the session ID.
    pub fn id(&self) -> &SessionId {
        &self.id
    }

    /// Returns the process ID, if available.
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Returns the current terminal size.
    pub fn size(&self) -> (u16, u16) {
        *self.size.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns whether the process is still producing output.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Writes data to the PTY (stdin).
    ///
    /// Silently does nothing if the process has already exited.
    pub async fn write(&self, data: &[u8]) -> Result<(), SessionError> {
        if !self.is_running() {
            tracing::trace!(session_id = %self.id, "Dropping input for exited process");
            return Ok(());
        }

        let writer = Arc::clone(&self.writer);
        let running = Arc::clone(&self.running);
        let data = data.to_vec();

        // A child that stops reading its input can fill the pty buffer; keep
        // the blocking write off the async workers.
        tokio::task::spawn_blocking(move || {
            let mut guard = writer.lock().unwrap_or_else(PoisonError::into_inner);
            let result = match guard.as_mut() {
                Some(writer) => writer
                    .write_all(&data)
                    .and_then(|()| writer.flush())
                    .map_err(|e| SessionError::WriteFailed(e.to_string())),
                None => Ok(()),
            };
            // kill() skips a writer that is busy here; release it on the way out.
            if !running.load(Ordering::SeqCst) {
                guard.take();
            }
            result
        })
        .await
        .map_err(|e| SessionError::WriteFailed(e.to_string()))?
    }

    /// Resizes the PTY to the given dimensions.
    ///
    /// Silently does nothing if the process has already exited.
    pub fn resize(&self, cols: u16, rows: u16) -> Result<(), SessionError> {
        if !self.is_running() {
            return Ok(());
        }

        let master = self.master.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(master) = master.as_ref() else {
            return Ok(());
        };

        master
            .resize(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| SessionError::ResizeFailed(e.to_string()))?;

        *self.size.lock().unwrap_or_else(PoisonError::into_inner) = (cols, rows);

        tracing::debug!(
            session_id = %self.id,
            cols = cols,
            rows = rows,
            "Resized PTY"
        );

        Ok(())
    }

    /// Kills the process and releases the pty.
    ///
    /// The first call hangs up the process group, terminates the child and
    /// reaps it, then kills whatever is left in the group. Later calls return
    /// the recorded status without signalling again.
    ///
    /// A write blocked on a full pty does not hold this up: once the child
    /// side of the pty is closed the write fails and releases the writer.
    pub async fn kill(&self) -> Result<SessionStatus, SessionError> {
        if self.killed.swap(true, Ordering::SeqCst) {
            let status = *self.status.lock().unwrap_or_else(PoisonError::into_inner);
            return Ok(status.unwrap_or(SessionStatus::Terminated));
        }

        let output_ended = !self.running.swap(false, Ordering::SeqCst);

        // The child must go before the writer lock is touched; a stuck write
        // holds it until the slave side closes.
        let child = Arc::clone(&self.child);
        let pid = self.pid;
        let status = tokio::task::spawn_blocking(move || reap(&child, pid, output_ended))
            .await
            .map_err(|e| SessionError::KillFailed(e.to_string()))??;

        self.master
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Ok(mut writer) = self.writer.try_lock() {
            writer.take();
        }
        *self.status.lock().unwrap_or_else(PoisonError::into_inner) = Some(status);

        tracing::info!(
            session_id = %self.id,
            status = ?status,
            "PTY process released"
        );

        Ok(status)
    }
}

impl PtyHandle for PtyProcess {
    fn id(&self) -> &SessionId {
        &self.id
    }

    fn write<'a>(
        &'a self,
        data: &'a [u8],
    ) -> Pin<Box<dyn Future<Output = Result<(), SessionError>> + Send + 'a>> {
        Box::pin(PtyProcess::write(self, data))
    }

    fn resize(
        &self,
        cols: u16,
        rows: u16,
    ) -> Pin<Box<dyn Future<Output = Result<(), SessionError>> + Send + '_>> {
        Box::pin(std::future::ready(PtyProcess::resize(self, cols, rows)))
    }

    fn kill(
        &self,
    ) -> Pin<Box<dyn Future<Output = Result<SessionStatus, SessionError>> + Send + '_>> {
        Box::pin(PtyProcess::kill(self))
    }

    fn size(&self) -> (u16, u16) {
        PtyProcess::size(self)
    }
}

impl Drop for PtyProcess {
    fn drop(&mut self) {
        if self.killed.load(Ordering::SeqCst) {
            return;
        }

        // Owner never called kill; make sure the child does not outlive us.
        tracing::debug!(session_id = %self.id, "Dropping live PTY process");
        hangup_process_group(self.pid);
        let mut child = self.child.lock().unwrap_or_else(PoisonError::into_inner);
        if child.try_wait().ok().flatten().is_none() {
            let _ = child.kill();
            let _ = child.wait();
        }
        kill_process_group(self.pid);
    }
}

/// Reads process output until EOF and forwards it in order.
///
/// EOF arrives once every holder of the slave side is gone. kill() clears
/// the child's process group so that background jobs do not keep the loop
/// alive; a process that moved to another group still can.
fn start_read_loop(
    mut reader: Box<dyn Read + Send>,
    output_tx: mpsc::UnboundedSender<Vec<u8>>,
    running: Arc<AtomicBool>,
    session_id: SessionId,
) {
    tokio::task::spawn_blocking(move || {
        let mut buffer = [0u8; READ_BUFFER_SIZE];

        loop {
            match reader.read(&mut buffer) {
                Ok(0) => {
                    tracing::debug!(session_id = %session_id, "PTY EOF - process exited");
                    break;
                }
                Ok(n) => {
                    if output_tx.send(buffer[..n].to_vec()).is_err() {
                        tracing::debug!(session_id = %session_id, "Output receiver dropped");
                        break;
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    // Linux reports EIO once the slave side is closed.
                    tracing::debug!(
                        session_id = %session_id,
                        error = %e,
                        "PTY read ended"
                    );
                    break;
                }
            }
        }

        running.store(false, Ordering::SeqCst);
    });
}

/// Terminates and reaps the child, then kills the rest of its process group.
fn reap(
    child: &SharedChild,
    pid: Option<u32>,
    output_ended: bool,
) -> Result<SessionStatus, SessionError> {
    let status = reap_child(child, pid, output_ended);
    kill_process_group(pid);
    status
}

/// Terminates and reaps the child, returning how it ended.
fn reap_child(
    child: &SharedChild,
    pid: Option<u32>,
    output_ended: bool,
) -> Result<SessionStatus, SessionError> {
    let mut child = child.lock().unwrap_or_else(PoisonError::into_inner);

    if let Some(status) = child.try_wait()? {
        return Ok(SessionStatus::Exited(status.exit_code() as i32));
    }

    // EOF can arrive a moment before the child is reapable.
    if output_ended {
        for _ in 0..HANGUP_GRACE_POLLS {
            std::thread::sleep(HANGUP_POLL_INTERVAL);
            if let Some(status) = child.try_wait()? {
                return Ok(SessionStatus::Exited(status.exit_code() as i32));
            }
        }
    }

    hangup_process_group(pid);
    for _ in 0..HANGUP_GRACE_POLLS {
        std::thread::sleep(HANGUP_POLL_INTERVAL);
        if child.try_wait()?.is_some() {
            return Ok(SessionStatus::Killed);
        }
    }

    child
        .kill()
        .map_err(|e| SessionError::KillFailed(e.to_string()))?;
    child
        .wait()
        .map_err(|e| SessionError::KillFailed(e.to_string()))?;

    Ok(SessionStatus::Killed)
}

/// Sends SIGHUP to the child's process group, as a closing terminal would.
#[cfg(unix)]
fn hangup_process_group(pid: Option<u32>) {
    signal_process_group(pid, nix::sys::signal::Signal::SIGHUP);
}

/// Sends SIGKILL to whatever is left of the child's process group.
#[cfg(unix)]
fn kill_process_group(pid: Option<u32>) {
    signal_process_group(pid, nix::sys::signal::Signal::SIGKILL);
}

#[cfg(unix)]
fn signal_process_group(pid: Option<u32>, signal: nix::sys::signal::Signal) {
    use nix::sys::signal::killpg;
    use nix::unistd::Pid;

    let Some(pid) = pid else {
        return;
    };
    // The child leads its own session, so its pid is the group id.
    if let Err(e) = killpg(Pid::from_raw(pid as i32), signal) {
        tracing::trace!(pid = pid, signal = %signal, error = %e, "Process group already gone");
    }
}

#[cfg(not(unix))]
fn hangup_process_group(_pid: Option<u32>) {}

#[cfg(not(unix))]
fn kill_process_group(_pid: Option<u32>) {}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::timeout;

    fn sh() -> SpawnOptions {
        SpawnOptions::new("/bin/sh")
    }

    /// Collects output until `marker` shows up or the deadline passes.
    async fn read_until(rx: &mut OutputReceiver, marker: &str) -> Option<String> {
        let mut seen = String::new();
        for _ in 0..50 {
            match timeout(Duration::from_millis(100), rx.recv()).await {
                Ok(Some(data)) => {
                    seen.push_str(&String::from_utf8_lossy(&data));
                    if seen.contains(marker) {
                        return Some(seen);
                    }
                }
                Ok(None) => return None,
                Err(_) => {}
            }
        }
        None
    }

    #[test]
    fn test_spawn_options_builder() {
        let options = SpawnOptions::new("python")
            .args(["-u", "run_interactive.py"])
            .size(120, 40)
            .cwd("/tmp")
            .env("LANG", "C.UTF-8");

        assert_eq!(options.command, "python");
        assert_eq!(options.args, vec!["-u", "run_interactive.py"]);
        assert_eq!((options.cols, options.rows), (120, 40));
        assert_eq!(options.cwd, Some(PathBuf::from("/tmp")));
        assert_eq!(options.env, vec![("LANG".to_string(), "C.UTF-8".to_string())]);
    }

    #[test]
    fn test_spawn_options_from_config() {
        let config = SessionConfig::default();
        let options = SpawnOptions::from_config(&config);
        assert_eq!(options.command, config.command);
        assert_eq!(options.args, config.args);
        assert_eq!((options.cols, options.rows), (80, 24));
        assert_eq!(options.term, "xterm-color");
    }

    #[tokio::test]
    async fn test_spawn_default_size() {
        let (process, _rx) = PtyProcess::spawn(&sh()).unwrap();

        assert!(process.is_running());
        assert_eq!(process.size(), (80, 24));
        assert!(process.pid().is_some());
        assert_eq!(process.id().len(), 36);

        process.kill().await.unwrap();
    }

    #[tokio::test]
    async fn test_spawn_missing_executable() {
        let result = PtyProcess::spawn(&SpawnOptions::new("/nonexistent/webterm-program"));
        assert!(matches!(result, Err(SessionError::SpawnFailed(_))));
    }

    #[tokio::test]
    async fn test_write_reaches_process() {
        let (process, mut rx) = PtyProcess::spawn(&sh()).unwrap();

        process.write(b"echo write_marker_$((40+2))\n").await.unwrap();

        let output = read_until(&mut rx, "write_marker_42").await;
        assert!(output.is_some(), "Did not receive expected output");

        process.kill().await.unwrap();
    }

    #[tokio::test]
    async fn test_unbuffered_env_is_set() {
        let (process, mut rx) = PtyProcess::spawn(&sh().env("WEBTERM_TEST", "xyz")).unwrap();

        process
            .write(b"echo env:$PYTHONUNBUFFERED:$WEBTERM_TEST:$TERM\n")
            .await
            .unwrap();

        let output = read_until(&mut rx, "env:1:xyz:xterm-color").await;
        assert!(output.is_some(), "Child did not see the expected environment");

        process.kill().await.unwrap();
    }

    #[tokio::test]
    async fn test_cwd_is_applied() {
        let dir = tempfile::TempDir::new().unwrap();
        let marker = dir.path().file_name().unwrap().to_string_lossy().to_string();
        let (process, mut rx) = PtyProcess::spawn(&sh().cwd(dir.path())).unwrap();

        process.write(b"pwd\n").await.unwrap();

        assert!(read_until(&mut rx, &marker).await.is_some());

        process.kill().await.unwrap();
    }

    #[tokio::test]
    async fn test_resize_updates_size() {
        let (process, mut rx) = PtyProcess::spawn(&sh()).unwrap();

        process.resize(120, 40).unwrap();
        assert_eq!(process.size(), (120, 40));

        process.write(b"stty size\n").await.unwrap();
        assert!(read_until(&mut rx, "40 120").await.is_some());

        process.kill().await.unwrap();
    }

    #[tokio::test]
    async fn test_kill_is_idempotent() {
        let (process, _rx) = PtyProcess::spawn(&sh()).unwrap();

        let first = process.kill().await.unwrap();
        assert_eq!(first, SessionStatus::Killed);
        assert!(!process.is_running());

        let second = process.kill().await.unwrap();
        assert_eq!(second, first);
    }

    #[tokio::test]
    async fn test_kill_closes_output() {
        let (process, mut rx) = PtyProcess::spawn(&sh()).unwrap();

        process.kill().await.unwrap();

        // Drain whatever the shell printed; the channel must then close.
        let closed = timeout(Duration::from_secs(5), async {
            while rx.recv().await.is_some() {}
        })
        .await;
        assert!(closed.is_ok(), "Output channel did not close after kill");
    }

    #[tokio::test]
    async fn test_write_and_resize_after_kill_are_noops() {
        let (process, _rx) = PtyProcess::spawn(&sh()).unwrap();
        process.kill().await.unwrap();

        assert!(process.write(b"hello\n").await.is_ok());
        assert!(process.resize(100, 50).is_ok());
        assert_eq!(process.size(), (80, 24));
    }

    #[tokio::test]
    async fn test_natural_exit_closes_output_and_reports_code() {
        let (process, mut rx) = PtyProcess::spawn(&sh()).unwrap();

        process.write(b"exit 42\n").await.unwrap();

        let closed = timeout(Duration::from_secs(5), async {
            while rx.recv().await.is_some() {}
        })
        .await;
        assert!(closed.is_ok(), "Output channel did not close on exit");
        assert!(!process.is_running());

        // Writes after exit are silently dropped.
        assert!(process.write(b"echo late\n").await.is_ok());

        let status = process.kill().await.unwrap();
        assert_eq!(status, SessionStatus::Exited(42));
    }

    #[tokio::test]
    async fn test_kill_completes_while_write_is_blocked() {
        let options = SpawnOptions::new("/bin/sleep").args(["60"]);
        let (process, _rx) = PtyProcess::spawn(&options).unwrap();
        let process = Arc::new(process);

        // Complete lines fill the line discipline and then the pty buffer;
        // sleep never reads them.
        let flood = "0123456789abcdef\n".repeat(64 * 1024).into_bytes();
        let writer = {
            let process = Arc::clone(&process);
            tokio::spawn(async move { process.write(&flood).await })
        };
        tokio::time::sleep(Duration::from_millis(200)).await;

        let status = timeout(Duration::from_secs(10), process.kill())
            .await
            .expect("kill waited on a blocked write")
            .unwrap();
        assert_eq!(status, SessionStatus::Killed);

        let write = timeout(Duration::from_secs(10), writer)
            .await
            .expect("blocked write never returned");
        assert!(write.is_ok());
    }

    #[tokio::test]
    async fn test_kill_clears_process_group() {
        // The background sleep ignores SIGHUP and keeps the terminal open.
        let options = SpawnOptions::new("/bin/sh")
            .args(["-c", "trap '' HUP; sleep 60 & echo started; exec sleep 60"]);
        let (process, mut rx) = PtyProcess::spawn(&options).unwrap();
        assert!(read_until(&mut rx, "started").await.is_some());

        process.kill().await.unwrap();

        let closed = timeout(Duration::from_secs(5), async {
            while rx.recv().await.is_some() {}
        })
        .await;
        assert!(closed.is_ok(), "Output stayed open while a group member held the pty");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_drop_reaps_child() {
        use nix::errno::Errno;
        use nix::sys::signal::kill;
        use nix::unistd::Pid;

        let (process, _rx) = PtyProcess::spawn(&sh()).unwrap();
        let pid = Pid::from_raw(process.pid().unwrap() as i32);

        drop(process);

        // A zombie would still answer signal 0.
        assert_eq!(kill(pid, None), Err(Errno::ESRCH));
    }

    #[tokio::test]
    async fn test_output_order_preserved() {
        let (process, mut rx) = PtyProcess::spawn(&sh()).unwrap();

        process
            .write(b"for i in 1 2 3 4 5; do echo line_$i; done; echo done_$((6*7))\n")
            .await
            .unwrap();

        let output = read_until(&mut rx, "done_42").await.unwrap();
        let positions: Vec<usize> = (1..=5)
            .map(|i| output.rfind(&format!("line_{}\r\n", i)).unwrap())
            .collect();
        assert!(positions.windows(2).all(|w| w[0] < w[1]));

        process.kill().await.unwrap();
    }
}
