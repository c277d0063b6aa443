use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use log::{debug, info};

use super::staging::StagedFile;
use super::{OpenMode, SpectrumStore, check_row, check_values, read_only_error};
use crate::data::loader::{Document, TableFormat, load_file, save_document};
use crate::data::mask::ChannelMask;
use crate::data::model::{ArrayColumn, SpectralTable, SplicedColumn};
use crate::error::{Result, SpliceError};

/// A Parquet, JSON or CSV table held in memory.
///
/// These formats cannot be patched in place, so a writable store is
/// rewritten as a whole on close, through a sibling temp file and a
/// rename. A store with no changes is never rewritten.
pub struct BufferedStore {
    path: PathBuf,
    format: TableFormat,
    table: SpectralTable,
    document: Document,
    writable: bool,
    dirty: bool,
}

impl BufferedStore {
    pub fn open(path: &Path, format: TableFormat, mode: OpenMode) -> Result<BufferedStore> {
        // surface missing/unreadable files as I/O errors rather than parse errors
        std::fs::metadata(path).map_err(|e| SpliceError::io(path, e))?;

        let (table, document) =
            load_file(path, format).map_err(|e| SpliceError::from_loader(path, e))?;
        debug!(
            "{}: loaded {} rows x {} channels",
            path.display(),
            table.len(),
            table.num_channels()
        );

        Ok(BufferedStore {
            path: path.to_path_buf(),
            format,
            table,
            document,
            writable: mode.is_writable(),
            dirty: false,
        })
    }

    /// The current in-memory table, including uncommitted changes.
    pub fn table(&self) -> &SpectralTable {
        &self.table
    }
}

impl SpectrumStore for BufferedStore {
    fn path(&self) -> &Path {
        &self.path
    }

    fn num_rows(&self) -> usize {
        self.table.len()
    }

    fn num_channels(&self) -> usize {
        self.table.num_channels()
    }

    fn spec_num(&self, row: usize) -> Result<i64> {
        check_row(&self.path, row, self.table.len())?;
        Ok(self.table.rows[row].spec_num)
    }

    fn tg_m(&self, row: usize) -> Result<i64> {
        check_row(&self.path, row, self.table.len())?;
        Ok(self.table.rows[row].tg_m)
    }

    fn read_array(&self, column: ArrayColumn, row: usize) -> Result<Vec<f64>> {
        check_row(&self.path, row, self.table.len())?;
        Ok(self.table.rows[row].array(column).to_vec())
    }

    fn write_masked(
        &mut self,
        column: SplicedColumn,
        row: usize,
        mask: &ChannelMask,
        values: &[f64],
    ) -> Result<usize> {
        if !self.writable {
            return Err(read_only_error(&self.path));
        }
        check_row(&self.path, row, self.table.len())?;
        check_values(&self.path, column, values, self.table.num_channels())?;

        let written = mask.apply(self.table.rows[row].spliced_mut(column), values);
        self.dirty |= written > 0;
        Ok(written)
    }

    fn close(self: Box<Self>) -> Result<()> {
        if !(self.writable && self.dirty) {
            return Ok(());
        }

        let (staged, file) = StagedFile::create(&self.path)?;
        let mut writer = BufWriter::new(file);
        save_document(&mut writer, &self.document, &self.table).map_err(|e| {
            SpliceError::from_loader(&self.path, e.context("writing spliced table"))
        })?;
        writer
            .flush()
            .map_err(|e| SpliceError::io(staged.tmp_path(), e))?;
        drop(writer);
        staged.commit()?;
        info!("rewrote {} ({:?})", self.path.display(), self.format);
        Ok(())
    }
}
