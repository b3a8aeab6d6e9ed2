// ABOUTME: Attached start: stdio FIFOs, raw terminal mode, signal forwarding and console resize.
// ABOUTME: A byte-level matcher on stdin recognizes the detach sequence without stopping the task.

use crossterm::terminal::{self, disable_raw_mode, enable_raw_mode};
use nix::sys::signal::Signal;
use nix::sys::stat::Mode;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::unix::pipe;
use tokio::sync::mpsc;

use crate::error::{Error, Result};
use crate::runtime::{ExitStatus, TaskIo, TaskOps};
use crate::types::ContainerId;

pub const DEFAULT_DETACH_KEYS: &str = "ctrl-p,ctrl-q";

/// Time output pumps get to drain after the task exits.
const DRAIN_GRACE: Duration = Duration::from_millis(250);

/// Signals never forwarded to the container.
const NOT_FORWARDED: &[Signal] = &[
    Signal::SIGCHLD,
    Signal::SIGURG,
    Signal::SIGPIPE,
    Signal::SIGWINCH,
    Signal::SIGKILL,
    Signal::SIGSTOP,
    Signal::SIGILL,
    Signal::SIGFPE,
    Signal::SIGSEGV,
    Signal::SIGBUS,
    Signal::SIGTRAP,
    Signal::SIGABRT,
];

/// Parse a detach sequence such as `ctrl-p,ctrl-q` or `a,ctrl-@`.
pub fn parse_detach_keys(spec: &str) -> Result<Vec<u8>> {
    let invalid = || Error::InvalidArgument(format!("invalid detach keys {:?}", spec));
    if spec.is_empty() {
        return Err(invalid());
    }
    spec.split(',')
        .map(|key| {
            if let Some(c) = key.strip_prefix("ctrl-") {
                match c.as_bytes() {
                    [b @ b'a'..=b'z'] => Ok(b - b'a' + 1),
                    [b'@'] => Ok(0),
                    [b @ (b'[' | b'\\' | b']' | b'^' | b'_')] => Ok(b - b'[' + 27),
                    _ => Err(invalid()),
                }
            } else {
                match key.as_bytes() {
                    [b] if b.is_ascii() => Ok(*b),
                    _ => Err(invalid()),
                }
            }
        })
        .collect()
}

/// Outcome of feeding one byte to the matcher.
#[derive(Debug, PartialEq, Eq)]
pub enum Matched {
    /// Bytes to send to the container.
    Pass(Vec<u8>),
    /// Part of the sequence seen; nothing to send yet.
    Pending,
    Detach,
}

/// Byte-level state machine recognizing the detach sequence.
#[derive(Debug, Clone)]
pub struct DetachMatcher {
    keys: Vec<u8>,
    matched: usize,
}

impl DetachMatcher {
    pub fn new(keys: Vec<u8>) -> Self {
        Self { keys, matched: 0 }
    }

    pub fn feed(&mut self, byte: u8) -> Matched {
        if self.keys.get(self.matched) == Some(&byte) {
            self.matched += 1;
            if self.matched == self.keys.len() {
                self.matched = 0;
                return Matched::Detach;
            }
            return Matched::Pending;
        }
        // A broken prefix goes through unchanged, followed by this byte.
        let mut out: Vec<u8> = self.keys[..self.matched].to_vec();
        self.matched = 0;
        if self.keys.first() == Some(&byte) {
            self.matched = 1;
        } else {
            out.push(byte);
        }
        if out.is_empty() { Matched::Pending } else { Matched::Pass(out) }
    }
}

/// RAII guard that restores terminal mode on drop.
pub struct RawModeGuard {
    _private: (),
}

impl RawModeGuard {
    pub fn new() -> Result<Self> {
        enable_raw_mode().map_err(Error::Io)?;
        Ok(Self { _private: () })
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        let _ = disable_raw_mode();
    }
}

/// FIFOs in the state directory wired to a task.
#[derive(Debug, Clone)]
pub struct Fifos {
    pub stdin: Option<PathBuf>,
    pub stdout: PathBuf,
    pub stderr: Option<PathBuf>,
}

impl Fifos {
    /// Create the FIFOs for `id`; a terminal merges stderr into stdout.
    pub fn create(state_dir: &Path, id: &ContainerId, stdin: bool, tty: bool) -> Result<Self> {
        let make = |suffix: &str| -> Result<PathBuf> {
            let path = state_dir.join(format!("{}-{}", id.short(), suffix));
            match nix::unistd::mkfifo(&path, Mode::from_bits_truncate(0o600)) {
                Ok(()) | Err(nix::errno::Errno::EEXIST) => Ok(path),
                Err(e) => Err(Error::SystemBroken(format!(
                    "failed to create fifo {}: {}",
                    path.display(),
                    e
                ))),
            }
        };
        Ok(Self {
            stdin: if stdin { Some(make("stdin")?) } else { None },
            stdout: make("stdout")?,
            stderr: if tty { None } else { Some(make("stderr")?) },
        })
    }

    pub fn task_io(&self, terminal: bool) -> TaskIo {
        let path = |p: &Option<PathBuf>| p.as_ref().map(|p| p.display().to_string()).unwrap_or_default();
        TaskIo {
            stdin: path(&self.stdin),
            stdout: self.stdout.display().to_string(),
            stderr: path(&self.stderr),
            terminal,
        }
    }

    /// Remove the FIFO files.
    pub fn remove(&self) {
        let paths = self.stdin.iter().chain(Some(&self.stdout)).chain(self.stderr.iter());
        for path in paths {
            if let Err(e) = std::fs::remove_file(path)
                && e.kind() != std::io::ErrorKind::NotFound
            {
                tracing::debug!("failed to remove {}: {}", path.display(), e);
            }
        }
    }
}

/// Opened FIFO ends. Open before the task is created so the shim finds a peer.
pub struct AttachIo {
    stdin: Option<pipe::Sender>,
    stdout: pipe::Receiver,
    stderr: Option<pipe::Receiver>,
}

impl AttachIo {
    pub fn open(fifos: &Fifos) -> Result<Self> {
        let mut options = pipe::OpenOptions::new();
        options.read_write(true);
        Ok(Self {
            stdin: fifos
                .stdin
                .as_ref()
                .map(|p| options.open_sender(p))
                .transpose()
                .map_err(Error::Io)?,
            stdout: options.open_receiver(&fifos.stdout).map_err(Error::Io)?,
            stderr: fifos
                .stderr
                .as_ref()
                .map(|p| options.open_receiver(p))
                .transpose()
                .map_err(Error::Io)?,
        })
    }
}

/// How an attached session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachOutcome {
    Exited(ExitStatus),
    Detached,
}

enum Event {
    Signal(i32),
    Resize(u16, u16),
    Detach,
}

async fn pump<Rd, W>(mut from: Rd, mut to: W)
where
    Rd: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = [0u8; 4096];
    loop {
        match from.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                if to.write_all(&buf[..n]).await.is_err() || to.flush().await.is_err() {
                    break;
                }
            }
            Err(e) => {
                tracing::debug!("attach stream closed: {}", e);
                break;
            }
        }
    }
}

async fn pump_stdin(mut to: pipe::Sender, keys: Vec<u8>, events: mpsc::UnboundedSender<Event>) {
    let mut stdin = tokio::io::stdin();
    let mut matcher = DetachMatcher::new(keys);
    let mut buf = [0u8; 1024];
    loop {
        let n = match stdin.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => n,
        };
        let mut out = Vec::with_capacity(n);
        for &byte in &buf[..n] {
            match matcher.feed(byte) {
                Matched::Pass(bytes) => out.extend(bytes),
                Matched::Pending => {}
                Matched::Detach => {
                    let _ = to.write_all(&out).await;
                    let _ = events.send(Event::Detach);
                    return;
                }
            }
        }
        if to.write_all(&out).await.is_err() {
            break;
        }
    }
}

fn forward_signals(events: &mpsc::UnboundedSender<Event>) {
    use tokio::signal::unix::{SignalKind, signal};

    for sig in Signal::iterator().filter(|s| !NOT_FORWARDED.contains(s)) {
        let mut stream = match signal(SignalKind::from_raw(sig as i32)) {
            Ok(stream) => stream,
            Err(e) => {
                tracing::debug!("not forwarding {}: {}", sig, e);
                continue;
            }
        };
        let events = events.clone();
        tokio::spawn(async move {
            while stream.recv().await.is_some() {
                if events.send(Event::Signal(sig as i32)).is_err() {
                    break;
                }
            }
        });
    }
}

fn watch_resize(events: &mpsc::UnboundedSender<Event>) {
    use tokio::signal::unix::{SignalKind, signal};

    let mut stream = match signal(SignalKind::window_change()) {
        Ok(stream) => stream,
        Err(e) => {
            tracing::warn!("failed to watch terminal size: {}", e);
            return;
        }
    };
    let events = events.clone();
    tokio::spawn(async move {
        while stream.recv().await.is_some() {
            if let Ok((cols, rows)) = terminal::size()
                && events.send(Event::Resize(cols, rows)).is_err()
            {
                break;
            }
        }
    });
}

/// Relay stdio and signals for a started task until it exits or the user detaches.
pub async fn attach<R>(
    runtime: &R,
    namespace: &str,
    id: &ContainerId,
    io: AttachIo,
    tty: bool,
    detach_keys: &str,
) -> Result<AttachOutcome>
where
    R: TaskOps + ?Sized,
{
    let keys = parse_detach_keys(detach_keys)?;
    let _raw = if tty && std::io::IsTerminal::is_terminal(&std::io::stdin()) {
        Some(RawModeGuard::new()?)
    } else {
        None
    };

    let (events_tx, mut events) = mpsc::unbounded_channel();
    let mut pumps = Vec::new();
    pumps.push(tokio::spawn(pump(io.stdout, tokio::io::stdout())));
    if let Some(stderr) = io.stderr {
        pumps.push(tokio::spawn(pump(stderr, tokio::io::stderr())));
    }
    let stdin_pump = io
        .stdin
        .map(|sender| tokio::spawn(pump_stdin(sender, keys, events_tx.clone())));

    if tty {
        if let Ok((cols, rows)) = terminal::size()
            && let Err(e) = runtime.resize_pty(namespace, id, cols, rows).await
        {
            tracing::debug!("initial resize of {} failed: {}", id.short(), e);
        }
        watch_resize(&events_tx);
    } else {
        forward_signals(&events_tx);
    }
    drop(events_tx);

    let wait = runtime.wait_task(namespace, id);
    tokio::pin!(wait);

    let outcome = loop {
        tokio::select! {
            exit = &mut wait => break AttachOutcome::Exited(exit?),
            Some(event) = events.recv() => match event {
                Event::Signal(signo) => {
                    tracing::debug!("forwarding signal {} to {}", signo, id.short());
                    if let Err(e) = runtime.kill_task(namespace, id, signo, false).await {
                        tracing::warn!("failed to forward signal {}: {}", signo, e);
                    }
                }
                Event::Resize(cols, rows) => {
                    if let Err(e) = runtime.resize_pty(namespace, id, cols, rows).await {
                        tracing::debug!("resize of {} failed: {}", id.short(), e);
                    }
                }
                Event::Detach => break AttachOutcome::Detached,
            },
        }
    };

    if let Some(handle) = stdin_pump {
        handle.abort();
    }
    for handle in pumps {
        if matches!(outcome, AttachOutcome::Exited(_)) {
            let abort = handle.abort_handle();
            if tokio::time::timeout(DRAIN_GRACE, handle).await.is_err() {
                abort.abort();
            }
        } else {
            handle.abort();
        }
    }
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed_all(matcher: &mut DetachMatcher, bytes: &[u8]) -> (Vec<u8>, bool) {
        let mut out = Vec::new();
        for &b in bytes {
            match matcher.feed(b) {
                Matched::Pass(bytes) => out.extend(bytes),
                Matched::Pending => {}
                Matched::Detach => return (out, true),
            }
        }
        (out, false)
    }

    #[test]
    fn default_keys_are_ctrl_p_ctrl_q() {
        assert_eq!(parse_detach_keys(DEFAULT_DETACH_KEYS).unwrap(), vec![0x10, 0x11]);
        assert_eq!(parse_detach_keys("a,ctrl-@,ctrl-[").unwrap(), vec![b'a', 0, 27]);
        assert!(parse_detach_keys("ctrl-").is_err());
        assert!(parse_detach_keys("ab").is_err());
        assert!(parse_detach_keys("").is_err());
    }

    #[test]
    fn sequence_detaches_and_swallows_its_bytes() {
        let mut m = DetachMatcher::new(vec![0x10, 0x11]);
        let (out, detached) = feed_all(&mut m, b"ls\x10\x11rest");
        assert!(detached);
        assert_eq!(out, b"ls");
    }

    #[test]
    fn broken_prefix_is_passed_through() {
        let mut m = DetachMatcher::new(vec![0x10, 0x11]);
        let (out, detached) = feed_all(&mut m, b"\x10x");
        assert!(!detached);
        assert_eq!(out, b"\x10x");
    }

    #[test]
    fn repeated_first_key_restarts_the_match() {
        let mut m = DetachMatcher::new(vec![0x10, 0x11]);
        let (out, detached) = feed_all(&mut m, b"\x10\x10\x11");
        assert!(detached);
        assert_eq!(out, b"\x10");
    }

    #[test]
    fn winch_and_child_signals_are_not_forwarded() {
        assert!(NOT_FORWARDED.contains(&Signal::SIGWINCH));
        assert!(NOT_FORWARDED.contains(&Signal::SIGCHLD));
        assert!(!NOT_FORWARDED.contains(&Signal::SIGTERM));
    }

    #[test]
    fn fifos_live_in_the_state_dir() {
        let dir = tempfile::tempdir().unwrap();
        let id = ContainerId::generate();
        let fifos = Fifos::create(dir.path(), &id, true, true).unwrap();
        assert!(fifos.stderr.is_none());
        let io = fifos.task_io(true);
        assert!(io.stdin.starts_with(&dir.path().display().to_string()));
        assert!(io.stderr.is_empty());
        fifos.remove();
        assert!(!fifos.stdout.exists());
    }
}
