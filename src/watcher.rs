use anyhow::{Context, Result};
use notify::{Config, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::entry::is_candidate;

const DEBOUNCE_WINDOW: Duration = Duration::from_millis(500);
const DEBOUNCE_RETENTION: Duration = Duration::from_secs(5);

// Drops repeated events for the same path inside the debounce window
#[derive(Debug, Default)]
pub struct Debouncer {
    last_seen: HashMap<PathBuf, Instant>,
}

impl Debouncer {
    pub fn should_fire(&mut self, path: &Path, now: Instant) -> bool {
        // Clean up old entries periodically
        if self.last_seen.len() > 100 {
            self.last_seen
                .retain(|_, last| now.duration_since(*last) < DEBOUNCE_RETENTION);
        }

        if let Some(last) = self.last_seen.get(path) {
            if now.duration_since(*last) < DEBOUNCE_WINDOW {
                return false;
            }
        }
        self.last_seen.insert(path.to_path_buf(), now);
        true
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.last_seen.len()
    }
}

/// Watches a journal directory and reports changed entry files.
///
/// Dropping the watcher stops the notifications and closes the channel.
pub struct DirectoryWatcher {
    _watcher: RecommendedWatcher,
}

impl DirectoryWatcher {
    pub fn start(directory: &Path, changes: mpsc::UnboundedSender<PathBuf>) -> Result<Self> {
        let debouncer = Arc::new(Mutex::new(Debouncer::default()));

        let mut watcher = RecommendedWatcher::new(
            move |res: std::result::Result<notify::Event, notify::Error>| {
                let Ok(event) = res else {
                    return;
                };
                if !matches!(
                    event.kind,
                    notify::EventKind::Create(_)
                        | notify::EventKind::Modify(_)
                        | notify::EventKind::Remove(_)
                ) {
                    return;
                }

                for path in event.paths.iter() {
                    let candidate = path
                        .file_name()
                        .and_then(|n| n.to_str())
                        .is_some_and(is_candidate);
                    if !candidate {
                        continue;
                    }
                    let fire = debouncer
                        .lock()
                        .expect("debounce map mutex")
                        .should_fire(path, Instant::now());
                    if fire {
                        debug!(path = %path.display(), kind = ?event.kind, "journal file changed");
                        let _ = changes.send(path.clone());
                    }
                }
            },
            Config::default(),
        )
        .context("creating file watcher")?;

        watcher
            .watch(directory, RecursiveMode::NonRecursive)
            .with_context(|| format!("watching {}", directory.display()))?;

        info!(directory = %directory.display(), "watching journal directory");
        Ok(Self { _watcher: watcher })
    }
}
