use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::lock_api::ArcMutexGuard;
use parking_lot::{Mutex, RawMutex};

/// One mutex per container path, created on demand.
///
/// The table itself is locked only to find or create an entry, never while
/// a path lock is held, so work on different paths proceeds independently.
/// Entries are removed once the last holder releases them.
#[derive(Default)]
pub struct PathLocks {
    locks: Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>,
}

impl PathLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Block until the lock for `path` is held.
    pub fn lock(&self, path: &Path) -> PathGuard<'_> {
        let lock = {
            let mut locks = self.locks.lock();
            locks.entry(path.to_path_buf()).or_default().clone()
        };

        PathGuard {
            locks: self,
            path: path.to_path_buf(),
            guard: Some(lock.lock_arc()),
        }
    }

    /// Number of paths currently locked or waited on
    pub fn len(&self) -> usize {
        self.locks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub struct PathGuard<'a> {
    locks: &'a PathLocks,
    path: PathBuf,
    guard: Option<ArcMutexGuard<RawMutex, ()>>,
}

impl Drop for PathGuard<'_> {
    fn drop(&mut self) {
        // Release our clone of the Arc before checking whether anyone else
        // still holds or waits on this path.
        drop(self.guard.take());

        let mut locks = self.locks.locks.lock();
        if let Some(lock) = locks.get(&self.path) {
            if Arc::strong_count(lock) == 1 {
                locks.remove(&self.path);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;

    #[test]
    fn same_path_is_exclusive() {
        let locks = Arc::new(PathLocks::new());
        let inside = Arc::new(AtomicUsize::new(0));
        let max_inside = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let locks = locks.clone();
                let inside = inside.clone();
                let max_inside = max_inside.clone();
                thread::spawn(move || {
                    let _guard = locks.lock(Path::new("/srv/a.zip"));
                    let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                    max_inside.fetch_max(now, Ordering::SeqCst);
                    thread::sleep(Duration::from_millis(5));
                    inside.fetch_sub(1, Ordering::SeqCst);
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(max_inside.load(Ordering::SeqCst), 1);
        assert!(locks.is_empty());
    }

    #[test]
    fn different_paths_do_not_block() {
        let locks = PathLocks::new();
        let _a = locks.lock(Path::new("/srv/a.zip"));
        let _b = locks.lock(Path::new("/srv/b.zip"));
        assert_eq!(locks.len(), 2);
    }

    #[test]
    fn released_on_drop() {
        let locks = PathLocks::new();
        {
            let _guard = locks.lock(Path::new("/srv/a.zip"));
            assert_eq!(locks.len(), 1);
        }
        assert!(locks.is_empty());
        let _again = locks.lock(Path::new("/srv/a.zip"));
    }
}
