//! Child process runner with a wall-clock timeout and bounded output capture.
//!
//! Shared by the code executor, the package installer and the command-pipe
//! generator. Callers own the classification of the returned output.
//!
//! On Unix the child leads its own process group. The whole group is killed on
//! timeout and again once the direct child has been reaped, so processes it
//! started cannot outlive the call or keep the output pipes open.

use std::io::{Read, Write};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, error, instrument, warn};
use wait_timeout::ChildExt;

/// How long to keep draining pipes after the direct child is gone.
const DRAIN_GRACE: Duration = Duration::from_secs(2);

/// Captured output of a finished (or killed) child.
#[derive(Debug)]
pub struct ProcessOutput {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub stdout_truncated: usize,
    pub stderr_truncated: usize,
    pub timed_out: bool,
    /// Time from just before spawn until the child was reaped.
    pub elapsed: Duration,
}

impl ProcessOutput {
    /// Stdout decoded with replacement characters, plus a truncation notice.
    pub fn stdout_text(&self) -> String {
        decode(&self.stdout, self.stdout_truncated, "stdout")
    }

    /// Stderr decoded with replacement characters, plus a truncation notice.
    pub fn stderr_text(&self) -> String {
        decode(&self.stderr, self.stderr_truncated, "stderr")
    }
}

fn decode(bytes: &[u8], truncated: usize, label: &str) -> String {
    let mut text = String::from_utf8_lossy(bytes).into_owned();
    if truncated > 0 {
        text.push_str(&format!("\n[{label} truncated {truncated} bytes]\n"));
    }
    text
}

/// Run `cmd`, feeding `stdin` if given, and kill it once `timeout` elapses.
///
/// Both pipes are drained on reader threads while the child runs so a chatty
/// child cannot deadlock on a full pipe. At most `output_limit_bytes` of each
/// stream are kept. Spawn failures are returned as errors carrying the
/// underlying `std::io::Error`.
#[instrument(skip_all, fields(timeout_secs = timeout.as_secs(), output_limit_bytes = output_limit_bytes))]
pub fn run_with_timeout(
    mut cmd: Command,
    stdin: Option<&[u8]>,
    timeout: Duration,
    output_limit_bytes: usize,
) -> Result<ProcessOutput> {
    if stdin.is_some() {
        cmd.stdin(Stdio::piped());
    } else {
        cmd.stdin(Stdio::null());
    }
    cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        cmd.process_group(0);
    }

    debug!(program = ?cmd.get_program(), "spawning child process");
    let started = Instant::now();
    let mut child = match cmd.spawn() {
        Ok(c) => c,
        Err(e) => {
            error!(err = %e, "failed to spawn command");
            return Err(e).context("spawn command");
        }
    };

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("stdout was not piped"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("stderr was not piped"))?;

    let stdout_drain = Drain::start(stdout, output_limit_bytes);
    let stderr_drain = Drain::start(stderr, output_limit_bytes);

    // Written off-thread so a child that never reads stdin cannot block the timeout.
    let stdin_handle = match stdin {
        Some(input) => {
            let mut child_stdin = child
                .stdin
                .take()
                .ok_or_else(|| anyhow!("stdin was not piped"))?;
            let input = input.to_vec();
            Some(thread::spawn(move || {
                // Dropping the handle closes the pipe so the child sees EOF.
                if let Err(e) = child_stdin.write_all(&input) {
                    warn!(err = %e, "child closed stdin early");
                }
            }))
        }
        None => None,
    };

    let mut timed_out = false;
    let status = match child.wait_timeout(timeout).context("wait for command")? {
        Some(status) => status,
        None => {
            warn!(
                timeout_secs = timeout.as_secs(),
                "command timed out, killing"
            );
            timed_out = true;
            kill_tree(&mut child);
            child.wait().context("wait command after kill")?
        }
    };
    let elapsed = started.elapsed();
    // Stragglers from the child's group would otherwise hold the pipes open.
    kill_group(child.id());

    if let Some(handle) = stdin_handle
        && handle.join().is_err()
    {
        warn!("stdin writer panicked");
    }
    let (stdout, stdout_truncated) = stdout_drain.finish(DRAIN_GRACE).context("drain stdout")?;
    let (stderr, stderr_truncated) = stderr_drain.finish(DRAIN_GRACE).context("drain stderr")?;

    if stdout_truncated > 0 || stderr_truncated > 0 {
        warn!(stdout_truncated, stderr_truncated, "output truncated");
    }

    debug!(exit_code = ?status.code(), timed_out, elapsed_ms = elapsed.as_millis() as u64, "command finished");
    Ok(ProcessOutput {
        status,
        stdout,
        stderr,
        stdout_truncated,
        stderr_truncated,
        timed_out,
        elapsed,
    })
}

/// Kill the child's process group, then the child itself.
fn kill_tree(child: &mut Child) {
    kill_group(child.id());
    if let Err(e) = child.kill() {
        debug!(err = %e, "direct child already exited");
    }
}

#[cfg(unix)]
fn kill_group(pid: u32) {
    use nix::errno::Errno;
    use nix::sys::signal::{Signal, killpg};
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(pid) else {
        warn!(pid, "pid out of range, cannot signal process group");
        return;
    };
    match killpg(Pid::from_raw(raw), Signal::SIGKILL) {
        Ok(()) => debug!(pgid = raw, "killed process group"),
        // Nothing left in the group.
        Err(Errno::ESRCH) => {}
        Err(e) => warn!(pgid = raw, err = %e, "failed to kill process group"),
    }
}

#[cfg(not(unix))]
fn kill_group(_pid: u32) {}

/// Bytes kept from one stream and the count of bytes dropped past the limit.
#[derive(Debug, Default)]
struct Captured {
    buf: Vec<u8>,
    truncated: usize,
}

/// A reader thread filling a shared buffer until EOF.
struct Drain {
    captured: Arc<Mutex<Captured>>,
    done: mpsc::Receiver<Result<()>>,
}

impl Drain {
    fn start<R: Read + Send + 'static>(reader: R, limit: usize) -> Self {
        let captured = Arc::new(Mutex::new(Captured::default()));
        let (tx, done) = mpsc::channel();
        let sink = Arc::clone(&captured);
        thread::spawn(move || {
            // The receiver may already have given up waiting.
            let _ = tx.send(read_stream_limited(reader, limit, &sink));
        });
        Self { captured, done }
    }

    /// Wait up to `grace` for EOF, then take whatever was captured.
    ///
    /// A reader still blocked after `grace` is left detached; its pipe is held
    /// by a process that escaped the group kill.
    fn finish(self, grace: Duration) -> Result<(Vec<u8>, usize)> {
        match self.done.recv_timeout(grace) {
            Ok(result) => result?,
            Err(RecvTimeoutError::Timeout) => {
                warn!(grace_ms = grace.as_millis() as u64, "pipe still open after child exit, keeping partial output");
            }
            Err(RecvTimeoutError::Disconnected) => {
                return Err(anyhow!("output reader thread panicked"));
            }
        }
        let mut captured = self.captured.lock().unwrap_or_else(PoisonError::into_inner);
        let captured = std::mem::take(&mut *captured);
        Ok((captured.buf, captured.truncated))
    }
}

fn read_stream_limited<R: Read>(mut reader: R, limit: usize, sink: &Mutex<Captured>) -> Result<()> {
    let mut chunk = [0u8; 8192];

    loop {
        let n = reader.read(&mut chunk).context("read output")?;
        if n == 0 {
            break;
        }
        let mut captured = sink.lock().unwrap_or_else(PoisonError::into_inner);
        let remaining = limit.saturating_sub(captured.buf.len());
        let keep = n.min(remaining);
        captured.buf.extend_from_slice(&chunk[..keep]);
        captured.truncated += n - keep;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_stream_limited_counts_dropped_bytes() {
        let data = vec![b'x'; 20_000];
        let sink = Mutex::new(Captured::default());
        read_stream_limited(&data[..], 1_000, &sink).expect("read");
        let captured = sink.into_inner().expect("lock");
        assert_eq!(captured.buf.len(), 1_000);
        assert_eq!(captured.truncated, 19_000);
    }

    #[test]
    fn drain_returns_full_stream_at_eof() {
        let drain = Drain::start(&b"hello"[..], 100);
        let (kept, truncated) = drain.finish(Duration::from_secs(5)).expect("drain");
        assert_eq!(kept, b"hello");
        assert_eq!(truncated, 0);
    }

    #[test]
    fn decode_replaces_invalid_utf8_and_notes_truncation() {
        let text = decode(&[b'o', b'k', 0xff], 3, "stdout");
        assert!(text.starts_with("ok\u{fffd}"));
        assert!(text.contains("[stdout truncated 3 bytes]"));
    }

    #[cfg(unix)]
    #[test]
    fn captures_streams_separately() {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg("echo out; echo err 1>&2; exit 3");
        let output = run_with_timeout(cmd, None, Duration::from_secs(10), 1_000).expect("run");
        assert_eq!(output.status.code(), Some(3));
        assert_eq!(output.stdout_text(), "out\n");
        assert_eq!(output.stderr_text(), "err\n");
        assert!(!output.timed_out);
    }

    #[cfg(unix)]
    #[test]
    fn feeds_stdin_to_child() {
        let cmd = Command::new("cat");
        let output =
            run_with_timeout(cmd, Some(&b"hello"[..]), Duration::from_secs(10), 1_000).expect("run");
        assert!(output.status.success());
        assert_eq!(output.stdout_text(), "hello");
    }

    #[cfg(unix)]
    #[test]
    fn kills_child_after_timeout() {
        let mut cmd = Command::new("sleep");
        cmd.arg("5");
        let output =
            run_with_timeout(cmd, None, Duration::from_millis(200), 1_000).expect("run");
        assert!(output.timed_out);
        assert!(output.elapsed < Duration::from_secs(5));
    }

    #[cfg(unix)]
    #[test]
    fn timeout_kills_grandchildren_holding_pipes() {
        let mut cmd = Command::new("sh");
        // Not `exec`: sleep runs as a grandchild sharing the output pipes.
        cmd.arg("-c").arg("sleep 8; echo late");
        let started = Instant::now();
        let output =
            run_with_timeout(cmd, None, Duration::from_millis(300), 1_000).expect("run");
        assert!(output.timed_out);
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(output.stdout_text(), "");
    }

    #[cfg(unix)]
    #[test]
    fn background_child_does_not_block_clean_exit() {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg("sleep 8 & echo started");
        let started = Instant::now();
        let output = run_with_timeout(cmd, None, Duration::from_secs(10), 1_000).expect("run");
        assert!(output.status.success());
        assert!(!output.timed_out);
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(output.stdout_text(), "started\n");
    }

    #[test]
    fn spawn_failure_keeps_io_error() {
        let cmd = Command::new("definitely-not-a-real-binary-7f3a");
        let err = run_with_timeout(cmd, None, Duration::from_secs(1), 100).unwrap_err();
        let io = err.downcast_ref::<std::io::Error>().expect("io error");
        assert_eq!(io.kind(), std::io::ErrorKind::NotFound);
    }
}
