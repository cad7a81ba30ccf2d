//! Shared storage the firmware and the simulator exchange values through.
//!
//! A medium is a short list of text rows guarded by exclusive access. Every
//! row is an independent single-slot mailbox: a write replaces whatever was
//! there, a read returns the latest value, and a blank row means "nothing
//! written". There is no queue and no history.

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::SimError;

/// Row storage with scoped mutual exclusion.
pub trait Medium: Send + Sync {
    /// Runs `f` with exclusive access to the rows. Changes made by `f` are
    /// stored before access is released, and access is released on every
    /// exit path.
    fn transact<R>(&self, f: impl FnOnce(&mut Vec<String>) -> R) -> Result<R, SimError>;
}

/// In-process medium for single-process use and tests.
#[derive(Debug, Default)]
pub struct MemoryMedium {
    rows: Mutex<Vec<String>>,
}

impl MemoryMedium {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a medium already holding `rows`.
    pub fn with_rows<I, S>(rows: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            rows: Mutex::new(rows.into_iter().map(Into::into).collect()),
        }
    }
}

impl Medium for MemoryMedium {
    fn transact<R>(&self, f: impl FnOnce(&mut Vec<String>) -> R) -> Result<R, SimError> {
        let mut rows = self.rows.lock();
        Ok(f(&mut rows))
    }
}

/// Cross-process medium backed by a text file with an advisory lock.
///
/// The layout is one record per line, compatible with the firmware's
/// simulator BSP which reads the same files.
#[derive(Debug, Clone)]
pub struct FileMedium {
    path: PathBuf,
}

impl FileMedium {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn open(&self) -> Result<File, SimError> {
        if let Some(dir) = self.path.parent() {
            if !dir.as_os_str().is_empty() {
                fs::create_dir_all(dir)?;
            }
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.path)?;
        Ok(file)
    }
}

impl Medium for FileMedium {
    fn transact<R>(&self, f: impl FnOnce(&mut Vec<String>) -> R) -> Result<R, SimError> {
        let mut file = self.open()?;
        // Unlocked when `file` is dropped.
        file.lock()?;

        let mut text = String::new();
        file.read_to_string(&mut text)?;
        let before: Vec<String> = text.lines().map(str::to_owned).collect();

        let mut rows = before.clone();
        let out = f(&mut rows);

        if rows != before {
            let mut body = rows.join("\n");
            if !rows.is_empty() {
                body.push('\n');
            }
            file.set_len(0)?;
            file.seek(SeekFrom::Start(0))?;
            file.write_all(body.as_bytes())?;
            file.flush()?;
        }
        Ok(out)
    }
}

/// One row of a medium, the unit the rest of the crate reads and writes.
#[derive(Debug)]
pub struct Slot<M> {
    medium: Arc<M>,
    index: usize,
}

impl<M> Clone for Slot<M> {
    fn clone(&self) -> Self {
        Self {
            medium: Arc::clone(&self.medium),
            index: self.index,
        }
    }
}

impl<M: Medium> Slot<M> {
    pub fn new(medium: Arc<M>, index: usize) -> Self {
        Self { medium, index }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn medium(&self) -> &Arc<M> {
        &self.medium
    }

    /// Returns the stored value, or `None` if the row is missing or blank.
    pub fn read(&self) -> Result<Option<String>, SimError> {
        self.transact(|cell| cell.clone())
    }

    /// Replaces the stored value.
    pub fn write(&self, value: impl Into<String>) -> Result<(), SimError> {
        let value = value.into();
        self.transact(|cell| *cell = Some(value))
    }

    /// Blanks the row so the next read observes "nothing written".
    pub fn clear(&self) -> Result<(), SimError> {
        self.transact(|cell| *cell = None)
    }

    /// Runs a read-then-optionally-write sequence on this row under one lock.
    pub fn transact<R>(&self, f: impl FnOnce(&mut Option<String>) -> R) -> Result<R, SimError> {
        let index = self.index;
        self.medium.transact(|rows| {
            let mut cell = rows
                .get(index)
                .filter(|row| !row.trim().is_empty())
                .cloned();
            let original = cell.clone();
            let out = f(&mut cell);
            if cell != original {
                match cell {
                    Some(value) => store(rows, index, value),
                    None => blank(rows, index),
                }
            }
            out
        })
    }
}

/// Writes `value` into row `index`, padding with blank rows as needed.
pub(crate) fn store(rows: &mut Vec<String>, index: usize, value: String) {
    if rows.len() <= index {
        rows.resize(index + 1, String::new());
    }
    rows[index] = value;
}

/// Blanks row `index`, then drops blank rows left at the end so a
/// cleared single-row medium is an empty file again.
fn blank(rows: &mut Vec<String>, index: usize) {
    if let Some(row) = rows.get_mut(index) {
        row.clear();
    }
    while rows.last().is_some_and(|row| row.trim().is_empty()) {
        rows.pop();
    }
}
