// ABOUTME: Directory-scoped exclusive locks for the on-disk stores.
// ABOUTME: flock on the directory fd, falling back to an O_EXCL sentinel file with pid liveness.

use chrono::{DateTime, Utc};
use nix::errno::Errno;
use nix::fcntl::{Flock, FlockArg};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use super::StoreError;

/// Name of the sentinel file used when flock is unavailable.
const SENTINEL_NAME: &str = ".lock";

/// How long to wait on a sentinel lock before giving up.
const SENTINEL_WAIT: Duration = Duration::from_secs(10);

const SENTINEL_POLL: Duration = Duration::from_millis(50);

/// Information about who holds a sentinel lock.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockInfo {
    /// Hostname of the machine that holds the lock.
    pub holder: String,
    /// Process ID of the lock holder.
    pub pid: u32,
    /// When the lock was acquired.
    pub started_at: DateTime<Utc>,
}

impl LockInfo {
    /// Create new lock info for the current process.
    pub fn new() -> Self {
        Self {
            holder: current_host(),
            pid: std::process::id(),
            started_at: Utc::now(),
        }
    }

    /// A lock is stale when its holder on this host is gone, or it is older than an hour.
    pub fn is_stale(&self) -> bool {
        if self.holder == current_host() && !pid_alive(self.pid) {
            return true;
        }
        let age = Utc::now() - self.started_at;
        age.num_hours() >= 1
    }
}

impl Default for LockInfo {
    fn default() -> Self {
        Self::new()
    }
}

fn current_host() -> String {
    gethostname::gethostname().to_string_lossy().into_owned()
}

fn pid_alive(pid: u32) -> bool {
    let Ok(raw) = i32::try_from(pid) else {
        return false;
    };
    // Signal 0 only checks for existence; EPERM still means the process exists.
    match nix::sys::signal::kill(nix::unistd::Pid::from_raw(raw), None) {
        Ok(()) => true,
        Err(Errno::ESRCH) => false,
        Err(_) => true,
    }
}

/// An exclusive advisory lock, released on drop (including unwinding).
#[derive(Debug)]
pub struct DirLock {
    _inner: LockInner,
}

#[derive(Debug)]
enum LockInner {
    Flock(Flock<File>),
    Sentinel(SentinelLock),
}

impl DirLock {
    /// Block until an exclusive lock on `path` is held. `path` may be a directory or a file.
    pub fn acquire(path: &Path) -> Result<Self, StoreError> {
        let file = File::open(path)
            .map_err(|e| StoreError::io(format!("failed to open {} for locking", path.display()), e))?;

        match Flock::lock(file, FlockArg::LockExclusive) {
            Ok(flock) => Ok(Self {
                _inner: LockInner::Flock(flock),
            }),
            Err((_, Errno::ENOLCK | Errno::EOPNOTSUPP | Errno::ENOSYS)) => {
                tracing::debug!(
                    "flock unsupported on {}, using sentinel lockfile",
                    path.display()
                );
                let sentinel = SentinelLock::acquire(&sentinel_path(path), SENTINEL_WAIT)?;
                Ok(Self {
                    _inner: LockInner::Sentinel(sentinel),
                })
            }
            Err((_, errno)) => Err(StoreError::io(
                format!("failed to lock {}", path.display()),
                std::io::Error::from(errno),
            )),
        }
    }
}

impl DirLock {
    /// Like [`DirLock::acquire`], but waits on the blocking pool so async workers keep running.
    pub async fn acquire_async(path: PathBuf) -> Result<Self, StoreError> {
        let context = format!("failed to lock {}", path.display());
        tokio::task::spawn_blocking(move || Self::acquire(&path))
            .await
            .map_err(|e| StoreError::io(context, std::io::Error::other(e)))?
    }
}

fn sentinel_path(path: &Path) -> PathBuf {
    if path.is_dir() {
        path.join(SENTINEL_NAME)
    } else {
        let mut name = path.as_os_str().to_owned();
        name.push(SENTINEL_NAME);
        PathBuf::from(name)
    }
}

/// Lock held by the existence of a file created with `O_CREAT|O_EXCL`.
#[derive(Debug)]
pub struct SentinelLock {
    path: PathBuf,
}

impl SentinelLock {
    /// Create the sentinel, breaking it if its holder is gone. Waits up to `wait`.
    pub fn acquire(path: &Path, wait: Duration) -> Result<Self, StoreError> {
        let deadline = Instant::now() + wait;
        loop {
            match OpenOptions::new().write(true).create_new(true).open(path) {
                Ok(mut file) => {
                    let info = serde_json::to_vec(&LockInfo::new()).map_err(|e| {
                        StoreError::Metadata {
                            path: path.to_path_buf(),
                            source: e,
                        }
                    })?;
                    file.write_all(&info)
                        .map_err(|e| StoreError::io(format!("failed to write {}", path.display()), e))?;
                    return Ok(Self {
                        path: path.to_path_buf(),
                    });
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    let existing = std::fs::read(path)
                        .ok()
                        .and_then(|b| serde_json::from_slice::<LockInfo>(&b).ok());

                    if let Some(ref info) = existing
                        && info.is_stale()
                    {
                        tracing::warn!(
                            "breaking stale lock {} held by {} (pid {})",
                            path.display(),
                            info.holder,
                            info.pid
                        );
                        let _ = std::fs::remove_file(path);
                        continue;
                    }

                    if Instant::now() >= deadline {
                        let (holder, pid) = existing
                            .map(|i| (i.holder, i.pid))
                            .unwrap_or_else(|| ("unknown".to_string(), 0));
                        return Err(StoreError::LockBusy {
                            path: path.to_path_buf(),
                            holder,
                            pid,
                        });
                    }
                    std::thread::sleep(SENTINEL_POLL);
                }
                Err(e) => {
                    return Err(StoreError::io(
                        format!("failed to create {}", path.display()),
                        e,
                    ));
                }
            }
        }
    }
}

impl Drop for SentinelLock {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            tracing::warn!("failed to remove lock file {}: {}", self.path.display(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dir_lock_can_be_reacquired_after_drop() {
        let dir = tempfile::tempdir().unwrap();
        {
            let _lock = DirLock::acquire(dir.path()).unwrap();
        }
        let _again = DirLock::acquire(dir.path()).unwrap();
    }

    #[tokio::test]
    async fn waiting_for_a_held_lock_does_not_block_the_runtime() {
        let dir = tempfile::tempdir().unwrap();
        let held = DirLock::acquire(dir.path()).unwrap();

        let waiter = tokio::spawn(DirLock::acquire_async(dir.path().to_path_buf()));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());

        drop(held);
        waiter.await.unwrap().unwrap();
    }

    #[test]
    fn sentinel_is_exclusive_and_removed_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".lock");

        let held = SentinelLock::acquire(&path, Duration::ZERO).unwrap();
        let err = SentinelLock::acquire(&path, Duration::from_millis(100)).unwrap_err();
        assert!(matches!(err, StoreError::LockBusy { .. }));

        drop(held);
        assert!(!path.exists());
        let _again = SentinelLock::acquire(&path, Duration::ZERO).unwrap();
    }

    #[test]
    fn sentinel_breaks_lock_of_dead_process() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".lock");
        let dead = LockInfo {
            holder: current_host(),
            pid: u32::MAX,
            started_at: Utc::now(),
        };
        std::fs::write(&path, serde_json::to_vec(&dead).unwrap()).unwrap();

        let lock = SentinelLock::acquire(&path, Duration::ZERO).unwrap();
        let info: LockInfo = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(info.pid, std::process::id());
        drop(lock);
    }

    #[test]
    fn old_locks_are_stale() {
        let info = LockInfo {
            holder: "elsewhere".to_string(),
            pid: 1,
            started_at: Utc::now() - chrono::Duration::hours(2),
        };
        assert!(info.is_stale());

        let fresh = LockInfo {
            holder: "elsewhere".to_string(),
            pid: 1,
            started_at: Utc::now(),
        };
        assert!(!fresh.is_stale());
    }
}
