//! Swap / backup / rollback engine for the active personality file.
//!
//! Manages exactly one file on disk. The file is in one of two states:
//!
//! - `Original` — no marker line (or the file is absent);
//! - `Swapped` — the first line is the literal swap marker.
//!
//! A single backup slot holds the bytes captured the moment the file first
//! left the `Original` state. Swapping again while already swapped replaces
//! the content but never touches the backup, so the backup always reflects
//! the last bytes that were genuinely original. Rollback copies the backup
//! back and leaves it in place — restoring is repeatable.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

/// Sentinel first line of a swapped file.
pub const SWAP_MARKER: &str = "<!-- opensoul:swapped -->";

/// Logical state of the active file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwapState {
    Original,
    Swapped,
}

/// Status report for the active file and its backup slot.
#[derive(Debug, Clone)]
pub struct SwapStatus {
    pub path: PathBuf,
    pub state: SwapState,
    pub has_backup: bool,
    /// First non-empty line after the marker, when swapped.
    pub preview: Option<String>,
}

/// The engine, bound to explicit paths so tests can point it anywhere.
pub struct SwapEngine {
    soul_file: PathBuf,
    backup_file: PathBuf,
}

impl SwapEngine {
    pub fn new(soul_file: impl Into<PathBuf>, backup_file: impl Into<PathBuf>) -> Self {
        Self {
            soul_file: soul_file.into(),
            backup_file: backup_file.into(),
        }
    }

    /// Current state of the active file.
    pub fn state(&self) -> SwapState {
        match std::fs::read_to_string(&self.soul_file) {
            Ok(content) if first_line(&content) == SWAP_MARKER => SwapState::Swapped,
            _ => SwapState::Original,
        }
    }

    /// Replace the active file with `content`, marked as swapped.
    ///
    /// When the file exists in the `Original` state its bytes are first
    /// copied verbatim to the backup slot — the only circumstance under
    /// which the backup is ever written. Returns whether a backup was
    /// written by this call.
    pub fn swap(&self, content: &str) -> Result<bool> {
        ensure_parent(&self.soul_file)?;

        let backed_up = if self.soul_file.exists() && self.state() == SwapState::Original {
            ensure_parent(&self.backup_file)?;
            std::fs::copy(&self.soul_file, &self.backup_file).with_context(|| {
                format!("Failed to back up to {}", self.backup_file.display())
            })?;
            true
        } else {
            false
        };

        let marked = format!("{}\n{}", SWAP_MARKER, content);
        std::fs::write(&self.soul_file, marked)
            .with_context(|| format!("Failed to write {}", self.soul_file.display()))?;

        Ok(backed_up)
    }

    /// Restore the backup onto the active file.
    ///
    /// Returns `false` when no backup exists (expected, not an error); the
    /// active file is not touched in that case. The backup is never
    /// cleared, so rollback is repeatable.
    pub fn rollback(&self) -> Result<bool> {
        if !self.backup_file.exists() {
            return Ok(false);
        }

        ensure_parent(&self.soul_file)?;
        std::fs::copy(&self.backup_file, &self.soul_file).with_context(|| {
            format!("Failed to restore backup onto {}", self.soul_file.display())
        })?;
        Ok(true)
    }

    /// Report the current state of the active file and backup slot.
    pub fn status(&self) -> SwapStatus {
        let state = self.state();
        let preview = match state {
            SwapState::Swapped => std::fs::read_to_string(&self.soul_file)
                .ok()
                .and_then(|content| preview_line(&content)),
            SwapState::Original => None,
        };

        SwapStatus {
            path: self.soul_file.clone(),
            state,
            has_backup: self.backup_file.exists(),
            preview,
        }
    }

    pub fn backup_path(&self) -> &Path {
        &self.backup_file
    }
}

fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory {}", parent.display()))?;
        }
    }
    Ok(())
}

fn first_line(content: &str) -> &str {
    content.split('\n').next().unwrap_or("").trim_end_matches('\r')
}

/// First non-empty line after the marker, truncated for display.
fn preview_line(content: &str) -> Option<String> {
    content
        .lines()
        .skip(1)
        .find(|line| !line.trim().is_empty())
        .map(|line| {
            let line = line.trim();
            if line.chars().count() > 80 {
                let head: String = line.chars().take(77).collect();
                format!("{}...", head)
            } else {
                line.to_string()
            }
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn engine(tmp: &TempDir) -> SwapEngine {
        SwapEngine::new(
            tmp.path().join("SOUL.md"),
            tmp.path().join("backup/original.md"),
        )
    }

    #[test]
    fn first_swap_backs_up_original_once() {
        let tmp = TempDir::new().unwrap();
        let e = engine(&tmp);
        std::fs::write(tmp.path().join("SOUL.md"), "the original soul").unwrap();

        assert!(e.swap("pirate persona").unwrap());
        // Subsequent swaps never touch the backup.
        assert!(!e.swap("wizard persona").unwrap());
        assert!(!e.swap("poet persona").unwrap());

        let backup = std::fs::read_to_string(e.backup_path()).unwrap();
        assert_eq!(backup, "the original soul");

        let active = std::fs::read_to_string(tmp.path().join("SOUL.md")).unwrap();
        assert_eq!(active, format!("{}\npoet persona", SWAP_MARKER));
    }

    #[test]
    fn rollback_restores_byte_exact_original() {
        let tmp = TempDir::new().unwrap();
        let e = engine(&tmp);
        let original = "line one\nline two\n";
        std::fs::write(tmp.path().join("SOUL.md"), original).unwrap();

        e.swap("first").unwrap();
        e.swap("second").unwrap();
        assert!(e.rollback().unwrap());

        let restored = std::fs::read_to_string(tmp.path().join("SOUL.md")).unwrap();
        assert_eq!(restored, original);
        assert_eq!(e.state(), SwapState::Original);

        // Repeatable: the backup was not consumed.
        assert!(e.rollback().unwrap());
        let restored = std::fs::read_to_string(tmp.path().join("SOUL.md")).unwrap();
        assert_eq!(restored, original);
    }

    #[test]
    fn rollback_without_backup_signals_and_mutates_nothing() {
        let tmp = TempDir::new().unwrap();
        let e = engine(&tmp);
        std::fs::write(tmp.path().join("SOUL.md"), "untouched").unwrap();

        assert!(!e.rollback().unwrap());
        let content = std::fs::read_to_string(tmp.path().join("SOUL.md")).unwrap();
        assert_eq!(content, "untouched");
    }

    #[test]
    fn swap_with_no_existing_file_skips_backup() {
        let tmp = TempDir::new().unwrap();
        let e = engine(&tmp);

        assert!(!e.swap("brand new").unwrap());
        assert!(!e.backup_path().exists());
        assert_eq!(e.state(), SwapState::Swapped);
    }

    #[test]
    fn swap_creates_missing_parent_directory() {
        let tmp = TempDir::new().unwrap();
        let e = SwapEngine::new(
            tmp.path().join("deep/nested/SOUL.md"),
            tmp.path().join("deep/backup.md"),
        );

        e.swap("content").unwrap();
        assert!(tmp.path().join("deep/nested/SOUL.md").exists());
    }

    #[test]
    fn rollback_resets_backup_epoch() {
        let tmp = TempDir::new().unwrap();
        let e = engine(&tmp);
        std::fs::write(tmp.path().join("SOUL.md"), "first original").unwrap();

        e.swap("persona a").unwrap();
        e.rollback().unwrap();

        // Back in Original state: the next swap captures a fresh backup.
        std::fs::write(tmp.path().join("SOUL.md"), "second original").unwrap();
        assert!(e.swap("persona b").unwrap());
        let backup = std::fs::read_to_string(e.backup_path()).unwrap();
        assert_eq!(backup, "second original");
    }

    #[test]
    fn status_reports_state_backup_and_preview() {
        let tmp = TempDir::new().unwrap();
        let e = engine(&tmp);

        let s = e.status();
        assert_eq!(s.state, SwapState::Original);
        assert!(!s.has_backup);
        assert!(s.preview.is_none());

        std::fs::write(tmp.path().join("SOUL.md"), "original").unwrap();
        e.swap("# Pirate Captain\n\nSpeaks in nautical idiom.").unwrap();

        let s = e.status();
        assert_eq!(s.state, SwapState::Swapped);
        assert!(s.has_backup);
        assert_eq!(s.preview.as_deref(), Some("# Pirate Captain"));
    }
}
