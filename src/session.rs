use chrono::NaiveDate;
use serde::Serialize;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::entry::{EntryView, MARKDOWN_MARKER, SEPARATOR};
use crate::error::{JournalError, Result};
use crate::flush::{FlushQueue, FlushTicket};
use crate::gateway::Gateway;
use crate::index::{build_index, JournalIndex};

const EVENT_CAPACITY: usize = 64;

const UNTITLED: &str = "Untitled";

// Give up on a new entry after this many names turn out to be taken
const MAX_CREATE_ATTEMPTS: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    // No directory, or a directory without entries
    Empty,
    // Index built, nothing loaded yet
    Loading,
    Active,
}

/// The entry currently open in the editor.
///
/// `buffer` is the source of truth until it is flushed; `dirty` is set by edits
/// and cleared once a flush for the buffer has been issued.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveSession {
    pub index: usize,
    pub path: PathBuf,
    pub buffer: String,
    pub dirty: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadFailure {
    pub index: usize,
    pub path: String,
    pub error: String,
}

// Gateway failures surfaced to the shell as flags
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatus {
    pub scan_error: Option<String>,
    pub load_error: Option<LoadFailure>,
    pub save_error: Option<String>,
}

// Change notifications for the presentation shell
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum SessionEvent {
    IndexRebuilt { directory: String, count: usize },
    ScanFailed { directory: String, error: String },
    EntryLoaded { index: usize, path: String, recovered: bool },
    LoadFailed { index: usize, path: String, error: String },
    Saved { path: String },
    SaveFailed { path: String, content: String, error: String },
    EntryRemoved { path: String, unsaved: Option<String> },
    EntryCreated { index: usize, path: String },
}

// Snapshot of everything the sidebar, editor and preview render
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionView {
    pub directory: Option<String>,
    pub entries: Vec<EntryView>,
    pub active_index: Option<usize>,
    pub buffer: Option<String>,
    pub dirty: bool,
    pub phase: Phase,
    pub status: SessionStatus,
    pub unsaved: Vec<String>,
}

/// Owns the journal index and the active session.
///
/// The only component that touches entry content. Intents are applied one at
/// a time by the caller; gateway failures are recorded in [`SessionStatus`]
/// and published as [`SessionEvent`]s instead of being returned.
pub struct JournalController<G: Gateway> {
    gateway: Arc<G>,
    flush: FlushQueue<G>,
    index: JournalIndex,
    active: Option<ActiveSession>,
    status: SessionStatus,
    events: broadcast::Sender<SessionEvent>,
}

impl<G: Gateway> JournalController<G> {
    pub fn new(gateway: G) -> Self {
        Self::from_shared(Arc::new(gateway))
    }

    pub fn from_shared(gateway: Arc<G>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            flush: FlushQueue::new(Arc::clone(&gateway), events.clone()),
            gateway,
            index: JournalIndex::default(),
            active: None,
            status: SessionStatus::default(),
            events,
        }
    }

    /// Dropping the receiver ends the subscription.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub fn index(&self) -> &JournalIndex {
        &self.index
    }

    pub fn directory(&self) -> Option<&Path> {
        self.index.directory()
    }

    pub fn active(&self) -> Option<&ActiveSession> {
        self.active.as_ref()
    }

    pub fn active_index(&self) -> Option<usize> {
        self.active.as_ref().map(|a| a.index)
    }

    pub fn buffer(&self) -> Option<&str> {
        self.active.as_ref().map(|a| a.buffer.as_str())
    }

    pub fn status(&self) -> &SessionStatus {
        &self.status
    }

    pub fn phase(&self) -> Phase {
        if self.active.is_some() {
            Phase::Active
        } else if self.index.directory().is_none() || self.index.is_empty() {
            Phase::Empty
        } else {
            Phase::Loading
        }
    }

    pub fn view(&self) -> SessionView {
        SessionView {
            directory: self
                .index
                .directory()
                .map(|d| d.to_string_lossy().into_owned()),
            entries: self.index.views(),
            active_index: self.active_index(),
            buffer: self.buffer().map(String::from),
            dirty: self.active.as_ref().is_some_and(|a| a.dirty),
            phase: self.phase(),
            status: self.status.clone(),
            unsaved: self
                .flush
                .unsaved_paths()
                .iter()
                .map(|p| p.to_string_lossy().into_owned())
                .collect(),
        }
    }

    /// Re-seeds the controller from `dir`: flushes the outgoing buffer,
    /// rebuilds the index and loads the most recent entry.
    ///
    /// Returns `false` when the directory cannot be listed; the previous index
    /// and session are then left as they were.
    pub async fn select_directory(&mut self, dir: impl Into<PathBuf>) -> bool {
        let dir = dir.into();
        info!(directory = %dir.display(), "journal directory selected");

        let names = match self.scan(&dir).await {
            Ok(names) => names,
            Err(err) => {
                self.report_scan_failure(&dir, err);
                return false;
            }
        };

        self.flush_outgoing().await;
        self.active = None;
        self.status = SessionStatus::default();
        self.install_index(build_index(&dir, names));

        if !self.index.is_empty() {
            self.activate(0).await;
        }
        true
    }

    /// Rebuilds the index for the current directory without re-seeding the
    /// session. The active entry is tracked by path; if it is gone, the most
    /// recent entry is loaded in its place.
    pub async fn refresh(&mut self) -> bool {
        let Some(dir) = self.index.directory().map(Path::to_path_buf) else {
            return false;
        };

        let names = match self.scan(&dir).await {
            Ok(names) => names,
            Err(err) => {
                self.report_scan_failure(&dir, err);
                return false;
            }
        };

        self.status.scan_error = None;
        self.install_index(build_index(&dir, names));

        let repointed = self
            .active
            .as_ref()
            .map(|active| self.index.position(&active.path));

        match repointed {
            Some(Some(index)) => {
                if let Some(active) = self.active.as_mut() {
                    active.index = index;
                }
                self.status.load_error = None;
            }
            Some(None) => {
                if let Some(removed) = self.active.take() {
                    warn!(
                        path = %removed.path.display(),
                        dirty = removed.dirty,
                        "active entry disappeared from the journal directory"
                    );
                    if removed.dirty {
                        self.flush
                            .retain(removed.path.clone(), removed.buffer.clone());
                    }
                    self.emit(SessionEvent::EntryRemoved {
                        path: removed.path.to_string_lossy().into_owned(),
                        unsaved: removed.dirty.then_some(removed.buffer),
                    });
                }
                if !self.index.is_empty() {
                    self.activate(0).await;
                }
            }
            None => {
                if !self.index.is_empty() {
                    self.activate(0).await;
                }
            }
        }
        true
    }

    /// Makes entry `index` active. Selecting the active entry does nothing.
    pub async fn select_entry(&mut self, index: usize) -> bool {
        if self.active_index() == Some(index) {
            debug!(index, "entry already active");
            return true;
        }
        if index >= self.index.len() {
            warn!(index, len = self.index.len(), "entry index out of range");
            return false;
        }
        self.activate(index).await
    }

    /// Replaces the buffer. Nothing is written until a save or a switch.
    pub fn edit_buffer(&mut self, text: impl Into<String>) -> bool {
        match self.active.as_mut() {
            Some(active) => {
                active.buffer = text.into();
                active.dirty = true;
                true
            }
            None => {
                warn!("edit ignored, no active entry");
                false
            }
        }
    }

    /// Writes the buffer for the active entry and waits for the result. The
    /// buffer is kept whatever the outcome.
    pub async fn save(&mut self) -> bool {
        let Some(active) = self.active.as_mut() else {
            warn!("save ignored, no active entry");
            return false;
        };

        let path = active.path.clone();
        let ticket = self.flush.enqueue(path.clone(), active.buffer.clone());
        active.dirty = false;

        match ticket.finished().await {
            Ok(()) => {
                info!(path = %path.display(), "entry saved");
                self.status.save_error = None;
                true
            }
            Err(err) => {
                self.status.save_error = Some(err.to_string());
                if let Some(active) = self.active.as_mut().filter(|a| a.path == path) {
                    active.dirty = true;
                }
                false
            }
        }
    }

    /// Creates `<title>_<date>.md` with empty content and makes it active.
    pub async fn create_entry(&mut self, title: Option<&str>, date: NaiveDate) -> bool {
        let Some(dir) = self.index.directory().map(Path::to_path_buf) else {
            let err = JournalError::NoDirectory;
            warn!(error = %err, "cannot create entry");
            return false;
        };

        let mut names = match self.scan(&dir).await {
            Ok(names) => names,
            Err(err) => {
                self.report_scan_failure(&dir, err);
                return false;
            }
        };

        self.flush_outgoing().await;

        // Names holding unsaved content stay reserved for it
        let mut taken = names.clone();
        taken.extend(
            self.flush
                .unsaved_paths()
                .iter()
                .filter(|p| p.parent() == Some(dir.as_path()))
                .filter_map(|p| p.file_name()?.to_str().map(String::from)),
        );

        let mut attempts = 0;
        let (file_name, path) = loop {
            let file_name = unique_file_name(title, date, &taken);
            let path = dir.join(&file_name);
            self.flush.settle(&path).await;

            match self.gateway.create_new(&path).await {
                Ok(()) => break (file_name, path),
                Err(err)
                    if err.kind() == io::ErrorKind::AlreadyExists
                        && attempts < MAX_CREATE_ATTEMPTS =>
                {
                    debug!(path = %path.display(), "entry name already taken");
                    taken.push(file_name);
                    attempts += 1;
                }
                Err(source) => {
                    let err = JournalError::Write { path, source };
                    error!(error = %err, "cannot create entry");
                    self.status.save_error = Some(err.to_string());
                    return false;
                }
            }
        };

        names.push(file_name);
        self.install_index(build_index(&dir, names));

        let Some(index) = self.index.position(&path) else {
            error!(path = %path.display(), "new entry missing from rebuilt index");
            self.active = None;
            return false;
        };

        info!(index, path = %path.display(), "entry created");
        self.active = Some(ActiveSession {
            index,
            path: path.clone(),
            buffer: String::new(),
            dirty: false,
        });
        self.status.load_error = None;

        let path = path.to_string_lossy().into_owned();
        self.emit(SessionEvent::EntryCreated {
            index,
            path: path.clone(),
        });
        self.emit(SessionEvent::EntryLoaded {
            index,
            path,
            recovered: false,
        });
        true
    }

    /// Flushes a dirty buffer and waits for every queued write to finish.
    pub async fn shutdown(&mut self) {
        if self.active.as_ref().is_some_and(|a| a.dirty) {
            let _ = self.enqueue_active();
        }
        self.flush.settle_all().await;
        info!("journal session closed");
    }

    // Flush, then read, then swap. The buffer is only replaced once the new
    // content is in hand, so it never mixes two entries.
    async fn activate(&mut self, index: usize) -> bool {
        let Some(entry) = self.index.get(index) else {
            return false;
        };
        let path = entry.path.clone();

        self.flush_outgoing().await;

        match self.load(&path).await {
            Ok((buffer, recovered)) => {
                info!(index, path = %path.display(), recovered, "entry loaded");
                self.active = Some(ActiveSession {
                    index,
                    path: path.clone(),
                    buffer,
                    dirty: recovered,
                });
                self.status.load_error = None;
                self.emit(SessionEvent::EntryLoaded {
                    index,
                    path: path.to_string_lossy().into_owned(),
                    recovered,
                });
                true
            }
            Err(err) => {
                error!(index, error = %err, "entry could not be loaded, active entry unchanged");
                let failure = LoadFailure {
                    index,
                    path: path.to_string_lossy().into_owned(),
                    error: err.to_string(),
                };
                self.emit(SessionEvent::LoadFailed {
                    index,
                    path: failure.path.clone(),
                    error: failure.error.clone(),
                });
                self.status.load_error = Some(failure);
                false
            }
        }
    }

    // Reads see every write already queued for the path. A buffer whose last
    // flush failed wins over the stale copy on disk.
    async fn load(&self, path: &Path) -> Result<(String, bool)> {
        self.flush.settle(path).await;

        if let Some(buffer) = self.flush.retained(path) {
            warn!(path = %path.display(), "restoring buffer from failed flush");
            return Ok((buffer, true));
        }

        self.gateway
            .read(path)
            .await
            .map(|buffer| (buffer, false))
            .map_err(|source| JournalError::Read {
                path: path.to_path_buf(),
                source,
            })
    }

    async fn scan(&self, dir: &Path) -> Result<Vec<String>> {
        self.gateway
            .list(dir)
            .await
            .map_err(|source| JournalError::Scan {
                path: dir.to_path_buf(),
                source,
            })
    }

    fn enqueue_active(&mut self) -> Option<FlushTicket> {
        let active = self.active.as_mut()?;
        let ticket = self
            .flush
            .enqueue(active.path.clone(), active.buffer.clone());
        active.dirty = false;
        Some(ticket)
    }

    // The outgoing write is issued before anything else touches the gateway
    async fn flush_outgoing(&mut self) {
        if let Some(mut ticket) = self.enqueue_active() {
            ticket.issued().await;
        }
    }

    fn install_index(&mut self, index: JournalIndex) {
        let directory = index
            .directory()
            .map(|d| d.to_string_lossy().into_owned())
            .unwrap_or_default();
        info!(directory = %directory, count = index.len(), "journal index rebuilt");
        self.index = index;
        self.emit(SessionEvent::IndexRebuilt {
            directory,
            count: self.index.len(),
        });
    }

    fn report_scan_failure(&mut self, dir: &Path, err: JournalError) {
        warn!(error = %err, "directory scan failed, keeping current session");
        self.status.scan_error = Some(err.to_string());
        self.emit(SessionEvent::ScanFailed {
            directory: dir.to_string_lossy().into_owned(),
            error: err.to_string(),
        });
    }

    fn emit(&self, event: SessionEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }
}

// Utility: Make a title safe to embed in `<title>_<date>.md`
fn sanitize_title(title: &str) -> String {
    let sanitized: String = title
        .chars()
        .filter(|c| *c != '\u{00A0}' && *c != '\u{FEFF}')
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' | '.' => '-',
            c if c == SEPARATOR => '-',
            _ => c,
        })
        .collect();

    let trimmed = sanitized.trim();
    if trimmed.is_empty() {
        UNTITLED.to_string()
    } else {
        trimmed.to_string()
    }
}

// First free `<title>_<date>.md`, then `<title>-2_<date>.md`, and so on
fn unique_file_name(title: Option<&str>, date: NaiveDate, taken: &[String]) -> String {
    let base = sanitize_title(title.unwrap_or(""));
    let date = date.format("%Y-%m-%d").to_string();

    let mut candidate = format!("{base}{SEPARATOR}{date}{MARKDOWN_MARKER}");
    let mut counter = 2;
    while taken.iter().any(|name| name.eq_ignore_ascii_case(&candidate)) {
        candidate = format!("{base}-{counter}{SEPARATOR}{date}{MARKDOWN_MARKER}");
        counter += 1;
    }
    candidate
}
