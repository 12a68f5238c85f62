//! Path-scoped exclusive locks.
//!
//! Two layers: an in-process registry so threads of this process queue up on
//! the same path, and an `fs2` advisory lock on a sidecar file next to the
//! source so other processes do too. Both are released when the guard drops.

use fs2::FileExt;
use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Condvar, Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

use crate::error::Error;

const POLL_INTERVAL: Duration = Duration::from_millis(25);

/// `/dir/report.pdf` → `/dir/.report.pdf.tidyguard.lock`
pub fn lock_path_for(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{}.tidyguard.lock", name))
}

pub struct PathLocks {
    held: Mutex<HashSet<PathBuf>>,
    released: Condvar,
    timeout: Duration,
}

impl PathLocks {
    pub fn new(timeout: Duration) -> Self {
        Self {
            held: Mutex::new(HashSet::new()),
            released: Condvar::new(),
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn registry(&self) -> MutexGuard<'_, HashSet<PathBuf>> {
        self.held.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Block until `path` is exclusively ours or the timeout passes.
    pub fn acquire(&self, path: &Path) -> Result<PathLockGuard<'_>, Error> {
        let started = Instant::now();
        let deadline = started + self.timeout;
        let key = path.to_path_buf();

        {
            let mut held = self.registry();
            while held.contains(&key) {
                let now = Instant::now();
                if now >= deadline {
                    return Err(Error::LockTimeout {
                        path: key,
                        waited: started.elapsed(),
                    });
                }
                held = self
                    .released
                    .wait_timeout(held, deadline - now)
                    .map(|(guard, _)| guard)
                    .unwrap_or_else(|poisoned| poisoned.into_inner().0);
            }
            held.insert(key.clone());
        }

        // From here on the guard owns the registry entry and releases it on any exit.
        let mut guard = PathLockGuard {
            locks: self,
            path: key,
            lock_file: None,
        };

        let sidecar = lock_path_for(path);
        let file = loop {
            let file = OpenOptions::new()
                .create(true)
                .truncate(false)
                .write(true)
                .open(&sidecar)?;
            loop {
                match file.try_lock_exclusive() {
                    Ok(()) => break,
                    Err(e) if is_contended(&e) => {
                        if Instant::now() >= deadline {
                            return Err(Error::LockTimeout {
                                path: guard.path.clone(),
                                waited: started.elapsed(),
                            });
                        }
                        trace!("Waiting for lock on {}", sidecar.display());
                        thread::sleep(POLL_INTERVAL);
                    }
                    Err(e) => return Err(Error::Io(e)),
                }
            }
            // The previous holder unlinks the sidecar before unlocking, so a lock
            // won on an unlinked inode is stale and must be retaken on the new file.
            if still_linked(&file, &sidecar) {
                break file;
            }
            trace!("Lock file {} was replaced, retrying", sidecar.display());
        };
        debug!("Acquired lock on {}", path.display());
        guard.lock_file = Some((file, sidecar));
        Ok(guard)
    }

    pub fn is_held(&self, path: &Path) -> bool {
        self.registry().contains(path)
    }
}

#[cfg(unix)]
fn still_linked(file: &File, sidecar: &Path) -> bool {
    use std::os::unix::fs::MetadataExt;
    match (file.metadata(), fs::metadata(sidecar)) {
        (Ok(held), Ok(current)) => held.dev() == current.dev() && held.ino() == current.ino(),
        _ => false,
    }
}

/// Sidecars are never unlinked here, so the open handle is always current.
#[cfg(not(unix))]
fn still_linked(_file: &File, _sidecar: &Path) -> bool {
    true
}

fn is_contended(e: &io::Error) -> bool {
    e.kind() == io::ErrorKind::WouldBlock
        || e.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}

#[must_use]
pub struct PathLockGuard<'a> {
    locks: &'a PathLocks,
    path: PathBuf,
    lock_file: Option<(File, PathBuf)>,
}

impl PathLockGuard<'_> {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for PathLockGuard<'_> {
    fn drop(&mut self) {
        if let Some((file, sidecar)) = self.lock_file.take() {
            // Unlink while still locked; waiters on this inode notice and reopen.
            #[cfg(unix)]
            {
                if let Err(e) = fs::remove_file(&sidecar) {
                    if e.kind() != io::ErrorKind::NotFound {
                        debug!("Failed to remove lock file {}: {}", sidecar.display(), e);
                    }
                }
            }
            #[cfg(not(unix))]
            let _ = &sidecar;
            let _ = fs2::FileExt::unlock(&file);
        }
        let mut held = self.locks.registry();
        held.remove(&self.path);
        drop(held);
        self.locks.released.notify_all();
    }
}
