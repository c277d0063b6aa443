//! Row/column addressed access to a spectrum table on disk.
//!
//! ```text
//!   open_store(path, mode)
//!        │  dispatch by extension
//!        ├──────────────► FitsStore      memory-mapped, patched in place
//!        └──────────────► BufferedStore  parquet / json / csv, rewritten on close
//! ```

mod buffered;
mod fits;
mod staging;

use std::path::Path;

use log::debug;

use crate::data::loader::TableFormat;
use crate::data::mask::ChannelMask;
use crate::data::model::{ArrayColumn, SplicedColumn};
use crate::error::{Result, SpliceError};

pub use buffered::BufferedStore;
pub use fits::FitsStore;

/// How changes to a writable store reach the file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CommitMode {
    /// Patch the file directly. A failure part-way leaves earlier rows
    /// modified.
    #[default]
    InPlace,
    /// Patch a sibling copy and rename it over the file on close.
    Atomic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    ReadOnly,
    ReadWrite(CommitMode),
}

impl OpenMode {
    pub fn is_writable(self) -> bool {
        matches!(self, OpenMode::ReadWrite(_))
    }
}

/// An open spectrum table.
///
/// Reads address one row of one column. Writes are limited to the spliced
/// columns and only touch the channels selected by a mask. Dropping a store
/// without calling [`SpectrumStore::close`] releases it without committing.
pub trait SpectrumStore {
    fn path(&self) -> &Path;

    fn num_rows(&self) -> usize;

    /// Channels per row, shared by all array columns.
    fn num_channels(&self) -> usize;

    fn spec_num(&self, row: usize) -> Result<i64>;

    fn tg_m(&self, row: usize) -> Result<i64>;

    fn read_array(&self, column: ArrayColumn, row: usize) -> Result<Vec<f64>>;

    /// Overwrite `column[row][c] = values[c]` for every channel selected by
    /// `mask`. Returns the number of channels written.
    fn write_masked(
        &mut self,
        column: SplicedColumn,
        row: usize,
        mask: &ChannelMask,
        values: &[f64],
    ) -> Result<usize>;

    /// Flush and release. For writable stores this is the commit point.
    fn close(self: Box<Self>) -> Result<()>;
}

/// Open the spectrum table at `path`, choosing the backend from the file
/// extension.
pub fn open_store(path: &Path, mode: OpenMode) -> Result<Box<dyn SpectrumStore>> {
    let format = TableFormat::from_path(path).map_err(|e| SpliceError::from_loader(path, e))?;
    debug!("opening {} as {format:?} ({mode:?})", path.display());

    let store: Box<dyn SpectrumStore> = match format {
        TableFormat::Fits => Box::new(FitsStore::open(path, mode)?),
        other => Box::new(BufferedStore::open(path, other, mode)?),
    };
    Ok(store)
}

fn check_row(path: &Path, row: usize, num_rows: usize) -> Result<()> {
    if row < num_rows {
        Ok(())
    } else {
        Err(SpliceError::format(
            path,
            format!("row {row} out of range for a table of {num_rows} rows"),
        ))
    }
}

fn check_values(
    path: &Path,
    column: SplicedColumn,
    values: &[f64],
    num_channels: usize,
) -> Result<()> {
    if values.len() == num_channels {
        Ok(())
    } else {
        Err(SpliceError::format(
            path,
            format!(
                "{} replacement has {} channels, table has {num_channels}",
                column.name(),
                values.len()
            ),
        ))
    }
}

fn read_only_error(path: &Path) -> SpliceError {
    SpliceError::io(
        path,
        std::io::Error::new(std::io::ErrorKind::PermissionDenied, "table is opened read-only"),
    )
}
