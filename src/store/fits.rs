use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use anyhow::{Context, bail, ensure};
use log::{debug, info};
use memmap2::{Mmap, MmapMut};

use super::staging::StagedFile;
use super::{CommitMode, OpenMode, SpectrumStore, check_row, check_values, read_only_error};
use crate::data::mask::ChannelMask;
use crate::data::model::{ArrayColumn, SPEC_NUM, SPECTRUM_TABLE, SplicedColumn, TG_M};
use crate::error::{Result, SpliceError};
use crate::fits::bintable::{BinTableColumn, BinTableLayout, NumericType};
use crate::fits::find_bintable;

// ---------------------------------------------------------------------------
// Layout of the spectrum columns inside the mapped file
// ---------------------------------------------------------------------------

/// Where one field lives inside each row.
#[derive(Debug, Clone, Copy)]
struct FieldSlot {
    offset: usize,
    ty: NumericType,
}

#[derive(Debug, Clone)]
struct SpectrumLayout {
    data_offset: usize,
    row_len: usize,
    num_rows: usize,
    channels: usize,
    spec_num: FieldSlot,
    tg_m: FieldSlot,
    /// Indexed in [`ArrayColumn::ALL`] order.
    arrays: [FieldSlot; 4],
}

impl SpectrumLayout {
    fn resolve(bytes: &[u8]) -> anyhow::Result<SpectrumLayout> {
        let located = find_bintable(bytes, SPECTRUM_TABLE)?;
        let layout = &located.layout;

        let spec_num = scalar_slot(layout, SPEC_NUM)?;
        let tg_m = scalar_slot(layout, TG_M)?;

        let channels = array_column(layout, ArrayColumn::BinLo.name())?.format.repeat;
        let mut arrays = [spec_num; 4];
        for (slot, column) in arrays.iter_mut().zip(ArrayColumn::ALL) {
            let (found, ty) = array_slot(layout, column.name())?;
            ensure!(
                found.format.repeat == channels,
                "column '{}' has {} channels but '{}' has {channels}",
                column.name(),
                found.format.repeat,
                ArrayColumn::BinLo.name()
            );
            *slot = FieldSlot {
                offset: found.offset,
                ty,
            };
        }

        Ok(SpectrumLayout {
            data_offset: located.data_offset,
            row_len: layout.row_len,
            num_rows: layout.num_rows,
            channels,
            spec_num,
            tg_m,
            arrays,
        })
    }

    fn array(&self, column: ArrayColumn) -> FieldSlot {
        match column {
            ArrayColumn::BinLo => self.arrays[0],
            ArrayColumn::BinHi => self.arrays[1],
            ArrayColumn::Counts => self.arrays[2],
            ArrayColumn::StatErr => self.arrays[3],
        }
    }

    /// Byte range of element `channel` of `slot` in `row`.
    fn element(&self, slot: FieldSlot, row: usize, channel: usize) -> std::ops::Range<usize> {
        let start = self.data_offset + row * self.row_len + slot.offset + channel * slot.ty.width();
        start..start + slot.ty.width()
    }
}

fn array_column<'a>(
    layout: &'a BinTableLayout,
    name: &str,
) -> anyhow::Result<&'a BinTableColumn> {
    let column = layout
        .column(name)
        .with_context(|| format!("table '{SPECTRUM_TABLE}' has no '{name}' column"))?;
    if column.scaled {
        bail!("column '{name}' uses TSCAL/TZERO scaling, which is not supported");
    }
    Ok(column)
}

fn array_slot<'a>(
    layout: &'a BinTableLayout,
    name: &str,
) -> anyhow::Result<(&'a BinTableColumn, NumericType)> {
    let column = array_column(layout, name)?;
    let ty = column.format.code.numeric().with_context(|| {
        format!("column '{name}' has non-numeric format {}", column.format)
    })?;
    Ok((column, ty))
}

fn scalar_slot(layout: &BinTableLayout, name: &str) -> anyhow::Result<FieldSlot> {
    let (column, ty) = array_slot(layout, name)?;
    ensure!(
        ty.is_integer() && column.format.repeat == 1,
        "column '{name}' must be a scalar integer, found {}",
        column.format
    );
    Ok(FieldSlot {
        offset: column.offset,
        ty,
    })
}

// ---------------------------------------------------------------------------
// FitsStore
// ---------------------------------------------------------------------------

enum Mapping {
    ReadOnly(Mmap),
    ReadWrite(MmapMut),
}

impl Mapping {
    fn bytes(&self) -> &[u8] {
        match self {
            Mapping::ReadOnly(map) => &map[..],
            Mapping::ReadWrite(map) => &map[..],
        }
    }
}

/// A FITS spectrum file accessed through a memory map.
///
/// Writable stores patch the mapped bytes directly; nothing else in the
/// file is rewritten.
pub struct FitsStore {
    path: PathBuf,
    map: Mapping,
    layout: SpectrumLayout,
    staged: Option<StagedFile>,
    dirty: bool,
}

impl FitsStore {
    pub fn open(path: &Path, mode: OpenMode) -> Result<FitsStore> {
        let staged = match mode {
            OpenMode::ReadWrite(CommitMode::Atomic) => Some(StagedFile::copy_of(path)?),
            _ => None,
        };
        let mapped_path = staged
            .as_ref()
            .map(|s| s.tmp_path().to_path_buf())
            .unwrap_or_else(|| path.to_path_buf());

        let map = if mode.is_writable() {
            let file = OpenOptions::new()
                .read(true)
                .write(true)
                .open(&mapped_path)
                .map_err(|e| SpliceError::io(path, e))?;
            // SAFETY: the file must not be truncated by another process while
            // mapped; concurrent invocations on one target are unsupported.
            let map = unsafe { MmapMut::map_mut(&file) }.map_err(|e| SpliceError::io(path, e))?;
            Mapping::ReadWrite(map)
        } else {
            let file = File::open(path).map_err(|e| SpliceError::io(path, e))?;
            // SAFETY: as above, the source is only read.
            let map = unsafe { Mmap::map(&file) }.map_err(|e| SpliceError::io(path, e))?;
            Mapping::ReadOnly(map)
        };

        let layout =
            SpectrumLayout::resolve(map.bytes()).map_err(|e| SpliceError::from_loader(path, e))?;
        debug!(
            "{}: {} rows x {} channels, data at byte {}",
            path.display(),
            layout.num_rows,
            layout.channels,
            layout.data_offset
        );

        Ok(FitsStore {
            path: path.to_path_buf(),
            map,
            layout,
            staged,
            dirty: false,
        })
    }

    fn read_scalar(&self, slot: FieldSlot, row: usize) -> Result<i64> {
        check_row(&self.path, row, self.layout.num_rows)?;
        let bytes = &self.map.bytes()[self.layout.element(slot, row, 0)];
        slot.ty
            .read_i64(bytes)
            .ok_or_else(|| SpliceError::format(&self.path, "scalar column is not integer"))
    }
}

impl SpectrumStore for FitsStore {
    fn path(&self) -> &Path {
        &self.path
    }

    fn num_rows(&self) -> usize {
        self.layout.num_rows
    }

    fn num_channels(&self) -> usize {
        self.layout.channels
    }

    fn spec_num(&self, row: usize) -> Result<i64> {
        self.read_scalar(self.layout.spec_num, row)
    }

    fn tg_m(&self, row: usize) -> Result<i64> {
        self.read_scalar(self.layout.tg_m, row)
    }

    fn read_array(&self, column: ArrayColumn, row: usize) -> Result<Vec<f64>> {
        check_row(&self.path, row, self.layout.num_rows)?;
        let slot = self.layout.array(column);
        let bytes = self.map.bytes();
        Ok((0..self.layout.channels)
            .map(|c| slot.ty.read_f64(&bytes[self.layout.element(slot, row, c)]))
            .collect())
    }

    fn write_masked(
        &mut self,
        column: SplicedColumn,
        row: usize,
        mask: &ChannelMask,
        values: &[f64],
    ) -> Result<usize> {
        check_row(&self.path, row, self.layout.num_rows)?;
        check_values(&self.path, column, values, self.layout.channels)?;
        let slot = self.layout.array(column.into());
        let map = match &mut self.map {
            Mapping::ReadWrite(map) => map,
            Mapping::ReadOnly(_) => return Err(read_only_error(&self.path)),
        };

        let mut written = 0;
        for c in mask.indices().filter(|&c| c < values.len()) {
            slot.ty.write_f64(&mut map[self.layout.element(slot, row, c)], values[c]);
            written += 1;
        }
        self.dirty |= written > 0;
        Ok(written)
    }

    fn close(self: Box<Self>) -> Result<()> {
        let FitsStore {
            path,
            map,
            staged,
            dirty,
            ..
        } = *self;

        if let Mapping::ReadWrite(map) = &map {
            if dirty {
                map.flush().map_err(|e| SpliceError::io(&path, e))?;
            }
        }
        drop(map);

        match staged {
            Some(staged) if dirty => {
                staged.commit()?;
                info!("committed {} by rename", path.display());
            }
            // an untouched staged copy is discarded on drop
            _ => {}
        }
        Ok(())
    }
}
