//! Scoped edits of the istgt configuration file.

use std::{
    fs,
    path::{Path, PathBuf},
};

use tracing::{error, info};

use crate::VolumeError;

const STORAGE_MARKER: &str = "LUN0 Storage";

/// Rewrites the `LUN0 Storage` line and restores it on drop unless committed.
#[derive(Debug)]
pub struct StorageLineGuard {
    path: PathBuf,
    index: usize,
    previous: String,
    committed: bool,
}

impl StorageLineGuard {
    /// Replace the storage line with `  LUN0 Storage <size> 32k`.
    pub fn apply(path: &Path, size: &str) -> Result<Self, VolumeError> {
        let content = fs::read_to_string(path)?;
        let Some((index, previous)) = content
            .lines()
            .enumerate()
            .find(|(_, line)| line.contains(STORAGE_MARKER))
            .map(|(index, line)| (index, line.to_string()))
        else {
            return Err(VolumeError::Config(format!(
                "failed to get the storage details from '{}'",
                path.display()
            )));
        };

        replace_line(path, index, &format!("  {} {} 32k", STORAGE_MARKER, size))?;
        info!(path = %path.display(), size, "updated istgt storage line");
        Ok(Self {
            path: path.to_path_buf(),
            index,
            previous,
            committed: false,
        })
    }

    /// Keep the new line.
    pub fn commit(mut self) {
        self.committed = true;
    }
}

impl Drop for StorageLineGuard {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        info!(path = %self.path.display(), "reverting istgt storage line");
        if let Err(revert_error) = replace_line(&self.path, self.index, &self.previous) {
            error!(path = %self.path.display(), error = %revert_error, "failed to revert istgt configuration");
        }
    }
}

fn replace_line(path: &Path, index: usize, replacement: &str) -> Result<(), VolumeError> {
    let content = fs::read_to_string(path)?;
    let mut lines: Vec<&str> = content.lines().collect();
    let Some(slot) = lines.get_mut(index) else {
        return Err(VolumeError::Config(format!("line {} missing from '{}'", index + 1, path.display())));
    };
    *slot = replacement;
    let mut updated = lines.join("\n");
    if content.ends_with('\n') {
        updated.push('\n');
    }
    fs::write(path, updated)?;
    Ok(())
}
