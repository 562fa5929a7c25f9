pub mod lock {
    use crate::fmq::store::store::StoreError;
    use log::{trace, warn};
    use std::fs::{self, OpenOptions};
    use std::io::{ErrorKind, Write};
    use std::path::{Path, PathBuf};
    use std::process;
    use std::thread;
    use std::time::{Duration, Instant};
    use sysinfo::{System, SystemExt};

    const POLL_INTERVAL: Duration = Duration::from_millis(5);

    ///
    /// An exclusive lock on a queue, held as long as the object lives.
    /// The lock is a file created with O_EXCL that holds the owner's pid
    /// and user name.  A lock file whose owning process no longer exists
    /// is considered stale and is broken.
    ///
    #[derive(Debug)]
    pub struct QueueLock {
        path: PathBuf,
    }

    impl QueueLock {
        ///
        /// Acquire the lock at `lock_path`, waiting at most `timeout`
        /// for another holder to let go.
        ///
        pub fn acquire(lock_path: &Path, timeout: Duration) -> Result<QueueLock, StoreError> {
            let started = Instant::now();
            loop {
                match OpenOptions::new()
                    .write(true)
                    .create_new(true)
                    .open(lock_path)
                {
                    Ok(mut file) => {
                        let owner = format!("{} {}\n", process::id(), whoami::username());
                        if let Err(e) = file.write_all(owner.as_bytes()) {
                            let _ = fs::remove_file(lock_path);
                            return Err(StoreError::Lock(format!(
                                "{}: {}",
                                lock_path.display(),
                                e
                            )));
                        }
                        trace!("Locked {}", lock_path.display());
                        return Ok(QueueLock {
                            path: lock_path.to_path_buf(),
                        });
                    }
                    Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                        if let Some(pid) = lock_owner(lock_path) {
                            if !process_alive(pid) {
                                warn!(
                                    "Breaking stale lock {} held by dead process {}",
                                    lock_path.display(),
                                    pid
                                );
                                let _ = fs::remove_file(lock_path);
                                continue;
                            }
                        }
                        if started.elapsed() >= timeout {
                            return Err(StoreError::Lock(format!(
                                "timed out waiting for {}",
                                lock_path.display()
                            )));
                        }
                        thread::sleep(POLL_INTERVAL);
                    }
                    Err(e) => {
                        return Err(StoreError::Lock(format!(
                            "{}: {}",
                            lock_path.display(),
                            e
                        )));
                    }
                }
            }
        }
    }

    impl Drop for QueueLock {
        fn drop(&mut self) {
            if let Err(e) = fs::remove_file(&self.path) {
                warn!("Unable to remove lock file {}: {}", self.path.display(), e);
            }
        }
    }

    // The pid recorded in a lock file.  None if the file is gone or
    // the owner has not finished writing it yet.
    //
    fn lock_owner(lock_path: &Path) -> Option<i64> {
        let contents = fs::read_to_string(lock_path).ok()?;
        contents.split_whitespace().next()?.parse::<i64>().ok()
    }

    fn process_alive(pid: i64) -> bool {
        if pid == process::id() as i64 {
            return true;
        }
        let mut system = System::new();
        system.refresh_processes();
        system.get_processes().keys().any(|p| *p as i64 == pid)
    }

    #[cfg(test)]
    mod lock_test {
        use super::*;
        use tempfile::tempdir;

        #[test]
        fn lock_released_on_drop() {
            let dir = tempdir().unwrap();
            let path = dir.path().join("q.lock");
            {
                let _lock = QueueLock::acquire(&path, Duration::from_secs(1)).unwrap();
                assert!(path.exists());
            }
            assert!(!path.exists());
        }
        #[test]
        fn held_lock_times_out() {
            let dir = tempdir().unwrap();
            let path = dir.path().join("q.lock");
            let _held = QueueLock::acquire(&path, Duration::from_secs(1)).unwrap();
            let second = QueueLock::acquire(&path, Duration::from_millis(30));
            match second {
                Err(StoreError::Lock(_)) => {}
                other => panic!("expected lock timeout, got {:?}", other),
            }
        }
        #[test]
        fn stale_lock_is_broken() {
            let dir = tempdir().unwrap();
            let path = dir.path().join("q.lock");
            // No process has a pid this large on Linux.
            fs::write(&path, "2147483600 nobody\n").unwrap();
            let lock = QueueLock::acquire(&path, Duration::from_secs(1));
            assert!(lock.is_ok());
        }
    }
}
