use crate::errors::{
    ConfigError,
    Result,
    SearchError,
};
use std::path::{
    Path,
    PathBuf,
};
use std::time::{
    Duration,
    Instant,
    SystemTime,
};
use tracing::{
    debug,
    info,
    warn,
};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Lock on a shared cache file, held while the lock directory exists.
///
/// Creating a directory is atomic on every platform we care about, so the
/// first process to create it owns the lock. The directory is removed when
/// the guard is dropped.
#[derive(Debug)]
pub struct DirLock {
    path: PathBuf,
}

impl DirLock {
    /// Takes the lock at `path`, polling until `timeout` elapses.
    pub fn acquire(path: impl AsRef<Path>, timeout: Duration) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let start = Instant::now();
        loop {
            match std::fs::create_dir(&path) {
                Ok(()) => {
                    debug!("Acquired lock {}", path.display());
                    return Ok(Self { path });
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    if start.elapsed() >= timeout {
                        return Err(SearchError::LockTimeout { path }.into());
                    }
                    std::thread::sleep(POLL_INTERVAL);
                }
                Err(source) => return Err(ConfigError::Io { path, source }.into()),
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for DirLock {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_dir(&self.path) {
            warn!("Unable to release lock {}: {}", self.path.display(), e);
        }
    }
}

/// Blocks readers until nobody holds the lock at `path`.
pub fn wait_unlocked(path: impl AsRef<Path>, timeout: Duration) -> Result<()> {
    let path = path.as_ref();
    let start = Instant::now();
    while path.exists() {
        if start.elapsed() >= timeout {
            return Err(SearchError::LockTimeout {
                path: path.to_path_buf(),
            }
            .into());
        }
        std::thread::sleep(POLL_INTERVAL);
    }
    Ok(())
}

fn lock_path(cache: &Path) -> PathBuf {
    let mut name = cache.as_os_str().to_os_string();
    name.push(".lock");
    PathBuf::from(name)
}

fn modified(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}

fn is_stale(cache: &Path, sources: &[PathBuf]) -> bool {
    let Some(cache_time) = modified(cache) else {
        return true;
    };
    sources
        .iter()
        .filter_map(|x| modified(x))
        .any(|source_time| source_time > cache_time)
}

/// Rebuilds `cache` with `build` when it is missing or older than any of
/// `sources`. Returns whether this call rebuilt it.
///
/// The rebuild runs under a [`DirLock`] next to the cache file, staleness is
/// checked again once the lock is held so that concurrent callers only
/// rebuild once.
pub fn rebuild_if_stale<F>(
    cache: &Path,
    sources: &[PathBuf],
    timeout: Duration,
    build: F,
) -> Result<bool>
where
    F: FnOnce(&Path) -> Result<()>,
{
    let lock = lock_path(cache);
    wait_unlocked(&lock, timeout)?;
    if !is_stale(cache, sources) {
        return Ok(false);
    }

    let _guard = DirLock::acquire(&lock, timeout)?;
    if !is_stale(cache, sources) {
        debug!("{} rebuilt by another process", cache.display());
        return Ok(false);
    }
    info!("Rebuilding stale cache {}", cache.display());
    build(cache)?;
    Ok(true)
}
