//! File locking and atomic writes for shared state under `.studysync/`.
//!
//! Several processes of the same user (one `watch` per course, plus ad-hoc
//! `task` commands) read and write the task document and the suppression map
//! concurrently. Every such file is guarded by a sibling `<file>.lock`
//! taken with fs2/flock, and replaced with a temp file + rename so readers
//! never observe a partial write.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use fs2::FileExt;
use tempfile::NamedTempFile;

use crate::error::{Error, Result};

/// Default lock timeout in milliseconds
pub const DEFAULT_LOCK_TIMEOUT_MS: u64 = 5000;

const LOCK_RETRY_INTERVAL_MS: u64 = 20;

fn is_lock_contended(err: &io::Error) -> bool {
    if err.kind() == io::ErrorKind::WouldBlock {
        return true;
    }

    // Windows reports sharing violations instead of WouldBlock.
    #[cfg(windows)]
    {
        matches!(err.raw_os_error(), Some(32) | Some(33))
    }
    #[cfg(not(windows))]
    {
        false
    }
}

fn open_lock_file(path: &Path) -> Result<File> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    Ok(OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)?)
}

/// A file lock guard that releases the lock when dropped
pub struct FileLock {
    file: File,
}

impl FileLock {
    /// Acquire an exclusive lock, retrying until `timeout_ms` elapses.
    pub fn acquire(path: impl AsRef<Path>, timeout_ms: u64) -> Result<Self> {
        let path = path.as_ref();
        let file = open_lock_file(path)?;

        let start = Instant::now();
        let timeout = Duration::from_millis(timeout_ms);
        let retry_interval = Duration::from_millis(LOCK_RETRY_INTERVAL_MS);

        loop {
            match file.try_lock_exclusive() {
                Ok(()) => return Ok(FileLock { file }),
                Err(e) if is_lock_contended(&e) => {
                    if start.elapsed() >= timeout {
                        return Err(Error::LockFailed(path.to_path_buf()));
                    }
                    std::thread::sleep(retry_interval);
                }
                Err(e) => return Err(Error::Io(e)),
            }
        }
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}

/// Lock file guarding `path`.
pub fn lock_path_for(path: &Path) -> PathBuf {
    PathBuf::from(format!("{}.lock", path.display()))
}

/// Atomically replace `path` with `data`.
///
/// Does not lock; pair with [`FileLock`] when other processes may write.
pub fn write_atomic(path: impl AsRef<Path>, data: &[u8]) -> Result<()> {
    let path = path.as_ref();
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&parent)?;

    // Temp file must live on the same filesystem for the rename to be atomic.
    let mut temp = NamedTempFile::new_in(&parent)?;
    temp.write_all(data)?;
    temp.as_file().sync_all()?;
    temp.persist(path).map_err(|err| Error::Io(err.error))?;
    Ok(())
}

/// Read `path` while holding `<path>.lock`. Missing files read as `None`.
pub fn read_locked(path: impl AsRef<Path>, timeout_ms: u64) -> Result<Option<Vec<u8>>> {
    let path = path.as_ref();
    let _lock = FileLock::acquire(lock_path_for(path), timeout_ms)?;
    match fs::read(path) {
        Ok(data) => Ok(Some(data)),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(Error::Io(err)),
    }
}

/// Read-modify-write `path` under one lock acquisition.
///
/// `mutate` receives the current contents (`None` when the file does not
/// exist) and returns the bytes to store plus a value handed back to the
/// caller. Returning `None` bytes leaves the file untouched.
pub fn update_locked<T, F>(path: impl AsRef<Path>, timeout_ms: u64, mutate: F) -> Result<T>
where
    F: FnOnce(Option<Vec<u8>>) -> Result<(Option<Vec<u8>>, T)>,
{
    let path = path.as_ref();
    let _lock = FileLock::acquire(lock_path_for(path), timeout_ms)?;
    let current = match fs::read(path) {
        Ok(data) => Some(data),
        Err(err) if err.kind() == io::ErrorKind::NotFound => None,
        Err(err) => return Err(Error::Io(err)),
    };
    let (next, value) = mutate(current)?;
    if let Some(next) = next {
        write_atomic(path, &next)?;
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Barrier};
    use std::thread;
    use tempfile::TempDir;

    #[test]
    fn lock_is_exclusive_until_dropped() {
        let temp_dir = TempDir::new().unwrap();
        let lock_path = temp_dir.path().join("store.json.lock");

        let lock = FileLock::acquire(&lock_path, 1000).unwrap();
        assert!(lock_path.exists());
        assert!(matches!(
            FileLock::acquire(&lock_path, 50),
            Err(Error::LockFailed(_))
        ));

        drop(lock);
        assert!(FileLock::acquire(&lock_path, 50).is_ok());
    }

    #[test]
    fn atomic_write_overwrites() {
        let temp_dir = TempDir::new().unwrap();
        let file_path = temp_dir.path().join("nested").join("tasks.json");

        write_atomic(&file_path, b"[]").unwrap();
        assert_eq!(fs::read_to_string(&file_path).unwrap(), "[]");

        write_atomic(&file_path, b"[1]").unwrap();
        assert_eq!(fs::read_to_string(&file_path).unwrap(), "[1]");
    }

    #[test]
    fn read_locked_missing_file_is_none() {
        let temp_dir = TempDir::new().unwrap();
        let file_path = temp_dir.path().join("absent.json");
        assert!(read_locked(&file_path, 1000).unwrap().is_none());

        write_atomic(&file_path, b"{}").unwrap();
        assert_eq!(read_locked(&file_path, 1000).unwrap().unwrap(), b"{}");
    }

    #[test]
    fn update_locked_skips_write_when_unchanged() {
        let temp_dir = TempDir::new().unwrap();
        let file_path = temp_dir.path().join("map.json");

        let seen = update_locked(&file_path, 1000, |current| Ok((None, current.is_none()))).unwrap();
        assert!(seen);
        assert!(!file_path.exists());
    }

    #[test]
    fn concurrent_updates_do_not_lose_increments() {
        let temp_dir = TempDir::new().unwrap();
        let file_path = temp_dir.path().join("counter");

        let threads = 8;
        let barrier = Arc::new(Barrier::new(threads));
        let done = Arc::new(AtomicUsize::new(0));
        let mut handles = Vec::with_capacity(threads);

        for _ in 0..threads {
            let barrier = Arc::clone(&barrier);
            let done = Arc::clone(&done);
            let file_path = file_path.clone();
            handles.push(thread::spawn(move || {
                barrier.wait();
                update_locked(&file_path, 5000, |current| {
                    let value: u64 = current
                        .map(|bytes| String::from_utf8(bytes).unwrap().parse().unwrap())
                        .unwrap_or(0);
                    Ok((Some((value + 1).to_string().into_bytes()), ()))
                })
                .unwrap();
                done.fetch_add(1, Ordering::SeqCst);
            }));
        }

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(done.load(Ordering::SeqCst), threads);
        assert_eq!(fs::read_to_string(&file_path).unwrap(), threads.to_string());
    }
}
