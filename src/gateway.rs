use std::future::Future;
use std::io;
use std::path::Path;
use tokio::fs;
use tracing::warn;

use crate::entry::MARKDOWN_MARKER;

/// Reads and writes entry content and lists journal directories.
///
/// The controller is the only caller. Implementations may block or not; every
/// returned future must be `Send` so flushes can run on background tasks.
pub trait Gateway: Send + Sync + 'static {
    /// File names (not paths) of the regular files directly inside `dir`,
    /// in the order the backing store yields them.
    fn list(&self, dir: &Path) -> impl Future<Output = io::Result<Vec<String>>> + Send;

    fn read(&self, path: &Path) -> impl Future<Output = io::Result<String>> + Send;

    fn write(&self, path: &Path, content: &str) -> impl Future<Output = io::Result<()>> + Send;

    /// Creates an empty file at `path`. Fails with `AlreadyExists` when the
    /// store already holds that name, under its own case rules; never
    /// truncates.
    fn create_new(&self, path: &Path) -> impl Future<Output = io::Result<()>> + Send;
}

// Local filesystem through tokio's async fs
#[derive(Debug, Clone, Copy, Default)]
pub struct FsGateway;

impl Gateway for FsGateway {
    async fn list(&self, dir: &Path) -> io::Result<Vec<String>> {
        let mut names = Vec::new();
        let mut entries = fs::read_dir(dir).await?;

        while let Some(entry) = entries.next_entry().await? {
            // Symlinks are followed so a linked entry still counts as a file
            let is_file = match entry.file_type().await {
                Ok(kind) if kind.is_symlink() => fs::metadata(entry.path())
                    .await
                    .map(|m| m.is_file())
                    .unwrap_or(false),
                Ok(kind) => kind.is_file(),
                Err(_) => false,
            };
            if !is_file {
                continue;
            }
            let name = entry.file_name();
            match name.to_str() {
                Some(name) => names.push(name.to_string()),
                None if name.to_string_lossy().contains(MARKDOWN_MARKER) => {
                    warn!(name = %name.to_string_lossy(), "skipping entry with a non UTF-8 file name");
                }
                None => {}
            }
        }

        Ok(names)
    }

    async fn read(&self, path: &Path) -> io::Result<String> {
        fs::read_to_string(path).await
    }

    async fn write(&self, path: &Path, content: &str) -> io::Result<()> {
        fs::write(path, content).await
    }

    async fn create_new(&self, path: &Path) -> io::Result<()> {
        fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod memory {
    use super::*;
    use std::collections::{HashMap, HashSet};
    use std::path::PathBuf;
    use std::sync::Mutex;
    use std::time::Duration;

    // One gateway call, recorded when the call starts
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum Op {
        List(PathBuf),
        Read(PathBuf),
        Write(PathBuf, String),
        Create(PathBuf),
    }

    #[derive(Default)]
    struct Inner {
        // Insertion ordered so listings are deterministic
        files: Vec<(PathBuf, String)>,
        dirs: HashSet<PathBuf>,
        ops: Vec<Op>,
        fail_list: HashSet<PathBuf>,
        fail_read: HashSet<PathBuf>,
        fail_write: HashSet<PathBuf>,
        write_delay: HashMap<PathBuf, Duration>,
        // Treat names differing only in case as the same file
        fold_case: bool,
    }

    // In-memory gateway for controller tests
    #[derive(Default)]
    pub struct MemoryGateway {
        inner: Mutex<Inner>,
    }

    impl MemoryGateway {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with_files(dir: &str, files: &[(&str, &str)]) -> Self {
            let gateway = Self::new();
            gateway.add_dir(dir);
            for (name, content) in files {
                gateway.put(Path::new(dir).join(name), content);
            }
            gateway
        }

        pub fn add_dir(&self, dir: &str) {
            self.lock().dirs.insert(PathBuf::from(dir));
        }

        pub fn put(&self, path: impl Into<PathBuf>, content: &str) {
            let path = path.into();
            let mut inner = self.lock();
            if let Some(parent) = path.parent() {
                inner.dirs.insert(parent.to_path_buf());
            }
            match inner.files.iter_mut().find(|(p, _)| *p == path) {
                Some(slot) => slot.1 = content.to_string(),
                None => inner.files.push((path, content.to_string())),
            }
        }

        pub fn remove(&self, path: impl AsRef<Path>) {
            self.lock().files.retain(|(p, _)| p != path.as_ref());
        }

        pub fn content(&self, path: impl AsRef<Path>) -> Option<String> {
            self.lock()
                .files
                .iter()
                .find(|(p, _)| p == path.as_ref())
                .map(|(_, c)| c.clone())
        }

        pub fn ops(&self) -> Vec<Op> {
            self.lock().ops.clone()
        }

        pub fn writes(&self) -> Vec<(PathBuf, String)> {
            self.ops()
                .into_iter()
                .filter_map(|op| match op {
                    Op::Write(path, content) => Some((path, content)),
                    _ => None,
                })
                .collect()
        }

        pub fn clear_ops(&self) {
            self.lock().ops.clear();
        }

        pub fn fail_list(&self, dir: impl Into<PathBuf>) {
            self.lock().fail_list.insert(dir.into());
        }

        pub fn fail_read(&self, path: impl Into<PathBuf>) {
            self.lock().fail_read.insert(path.into());
        }

        pub fn fail_write(&self, path: impl Into<PathBuf>) {
            self.lock().fail_write.insert(path.into());
        }

        pub fn heal_write(&self, path: impl AsRef<Path>) {
            self.lock().fail_write.remove(path.as_ref());
        }

        pub fn fold_case(&self) {
            self.lock().fold_case = true;
        }

        pub fn delay_write(&self, path: impl Into<PathBuf>, delay: Duration) {
            self.lock().write_delay.insert(path.into(), delay);
        }

        fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
            self.inner.lock().expect("memory gateway mutex")
        }
    }

    fn denied(path: &Path) -> io::Error {
        io::Error::new(
            io::ErrorKind::PermissionDenied,
            format!("injected failure for {}", path.display()),
        )
    }

    impl Gateway for MemoryGateway {
        async fn list(&self, dir: &Path) -> io::Result<Vec<String>> {
            let mut inner = self.lock();
            inner.ops.push(Op::List(dir.to_path_buf()));
            if inner.fail_list.contains(dir) {
                return Err(denied(dir));
            }
            if !inner.dirs.contains(dir) {
                return Err(io::Error::new(io::ErrorKind::NotFound, "no such directory"));
            }
            Ok(inner
                .files
                .iter()
                .filter(|(p, _)| p.parent() == Some(dir))
                .filter_map(|(p, _)| p.file_name().and_then(|n| n.to_str()).map(String::from))
                .collect())
        }

        async fn read(&self, path: &Path) -> io::Result<String> {
            let mut inner = self.lock();
            inner.ops.push(Op::Read(path.to_path_buf()));
            if inner.fail_read.contains(path) {
                return Err(denied(path));
            }
            inner
                .files
                .iter()
                .find(|(p, _)| p == path)
                .map(|(_, c)| c.clone())
                .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no such file"))
        }

        async fn write(&self, path: &Path, content: &str) -> io::Result<()> {
            let delay = {
                let mut inner = self.lock();
                inner.ops.push(Op::Write(path.to_path_buf(), content.to_string()));
                if inner.fail_write.contains(path) {
                    return Err(denied(path));
                }
                inner.write_delay.get(path).copied()
            };
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            self.put(path, content);
            Ok(())
        }

        async fn create_new(&self, path: &Path) -> io::Result<()> {
            let mut inner = self.lock();
            inner.ops.push(Op::Create(path.to_path_buf()));
            if inner.fail_write.contains(path) {
                return Err(denied(path));
            }
            let fold_case = inner.fold_case;
            let same = |p: &PathBuf| match (p.file_name(), path.file_name()) {
                _ if p.parent() != path.parent() => false,
                (Some(a), Some(b)) if fold_case => {
                    a.to_string_lossy().to_lowercase() == b.to_string_lossy().to_lowercase()
                }
                (a, b) => a == b,
            };
            if inner.files.iter().any(|(p, _)| same(p)) {
                return Err(io::Error::new(io::ErrorKind::AlreadyExists, "file exists"));
            }
            if let Some(parent) = path.parent() {
                inner.dirs.insert(parent.to_path_buf());
            }
            inner.files.push((path.to_path_buf(), String::new()));
            Ok(())
        }
    }
}
