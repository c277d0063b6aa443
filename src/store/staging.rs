use std::fs::{self, File};
use std::path::{Path, PathBuf};

use log::{debug, warn};

use crate::error::{Result, SpliceError};

/// A sibling temp file that replaces `final_path` by rename on
/// [`StagedFile::commit`]. Dropped uncommitted, the temp file is removed.
#[derive(Debug)]
pub(crate) struct StagedFile {
    tmp_path: PathBuf,
    final_path: PathBuf,
    armed: bool,
}

impl StagedFile {
    fn new(final_path: &Path) -> Self {
        let name = final_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let tmp_path = final_path.with_file_name(format!(".{name}.splice-tmp"));
        StagedFile {
            tmp_path,
            final_path: final_path.to_path_buf(),
            armed: true,
        }
    }

    /// Stage an empty file the caller writes through the returned handle.
    pub(crate) fn create(final_path: &Path) -> Result<(Self, File)> {
        let staged = Self::new(final_path);
        let file = File::create(&staged.tmp_path)
            .map_err(|e| SpliceError::io(&staged.tmp_path, e))?;
        debug!("staging {} at {}", final_path.display(), staged.tmp_path.display());
        Ok((staged, file))
    }

    /// Stage a byte copy of `final_path`.
    pub(crate) fn copy_of(final_path: &Path) -> Result<Self> {
        let staged = Self::new(final_path);
        fs::copy(final_path, &staged.tmp_path)
            .map_err(|e| SpliceError::io(&staged.tmp_path, e))?;
        debug!("staged copy of {} at {}", final_path.display(), staged.tmp_path.display());
        Ok(staged)
    }

    pub(crate) fn tmp_path(&self) -> &Path {
        &self.tmp_path
    }

    /// fsync the temp file and rename it over the final path.
    pub(crate) fn commit(mut self) -> Result<()> {
        File::open(&self.tmp_path)
            .and_then(|f| f.sync_all())
            .map_err(|e| SpliceError::io(&self.tmp_path, e))?;
        fs::rename(&self.tmp_path, &self.final_path)
            .map_err(|e| SpliceError::io(&self.final_path, e))?;
        self.armed = false;
        Ok(())
    }
}

impl Drop for StagedFile {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        if let Err(e) = fs::remove_file(&self.tmp_path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("could not remove {}: {e}", self.tmp_path.display());
            }
        }
    }
}
