use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::entry::{is_candidate, Entry, EntryView};

/// Ordered list of entries for one directory snapshot, most recent first.
///
/// Rebuilt wholesale on every scan; never patched in place.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JournalIndex {
    directory: Option<PathBuf>,
    entries: Vec<Entry>,
}

impl JournalIndex {
    pub fn directory(&self) -> Option<&Path> {
        self.directory.as_deref()
    }

    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    pub fn get(&self, index: usize) -> Option<&Entry> {
        self.entries.get(index)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn position(&self, path: &Path) -> Option<usize> {
        self.entries.iter().position(|e| e.path == path)
    }

    pub fn views(&self) -> Vec<EntryView> {
        self.entries.iter().map(EntryView::from).collect()
    }
}

/// Builds the index for `dir` from a raw listing of file names.
///
/// Names without the markdown marker are dropped, the rest are parsed and
/// stably sorted by date, most recent first, with undated entries last in
/// listing order. A name listed twice is kept once.
pub fn build_index<I, S>(dir: &Path, file_names: I) -> JournalIndex
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut seen = HashSet::new();
    let mut entries = Vec::new();

    for name in file_names {
        let name: &str = name.as_ref();
        if !is_candidate(name) || !seen.insert(name.to_string()) {
            continue;
        }
        if let Some(entry) = Entry::from_file_name(dir, name) {
            entries.push(entry);
        }
    }

    // Vec::sort_by is stable; equal dates keep scan order
    entries.sort_by(|a, b| a.date.cmp_recent_first(&b.date));

    JournalIndex {
        directory: Some(dir.to_path_buf()),
        entries,
    }
}
