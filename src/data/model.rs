use std::fmt;

use serde::Serialize;

// ---------------------------------------------------------------------------
// Column names
// ---------------------------------------------------------------------------

/// Name of the table holding the spectra inside a multi-table file.
pub const SPECTRUM_TABLE: &str = "spectrum";

pub const SPEC_NUM: &str = "spec_num";
pub const TG_M: &str = "tg_m";

/// A per-channel array column of the spectrum table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArrayColumn {
    BinLo,
    BinHi,
    Counts,
    StatErr,
}

impl ArrayColumn {
    pub const ALL: [ArrayColumn; 4] = [
        ArrayColumn::BinLo,
        ArrayColumn::BinHi,
        ArrayColumn::Counts,
        ArrayColumn::StatErr,
    ];

    pub fn name(self) -> &'static str {
        match self {
            ArrayColumn::BinLo => "bin_lo",
            ArrayColumn::BinHi => "bin_hi",
            ArrayColumn::Counts => "counts",
            ArrayColumn::StatErr => "stat_err",
        }
    }
}

impl fmt::Display for ArrayColumn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The only columns a splice is allowed to overwrite.
///
/// Stores take this type for writes, so the binning columns can never be
/// addressed for mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SplicedColumn {
    Counts,
    StatErr,
}

impl SplicedColumn {
    pub const ALL: [SplicedColumn; 2] = [SplicedColumn::Counts, SplicedColumn::StatErr];

    pub fn name(self) -> &'static str {
        ArrayColumn::from(self).name()
    }
}

impl From<SplicedColumn> for ArrayColumn {
    fn from(col: SplicedColumn) -> Self {
        match col {
            SplicedColumn::Counts => ArrayColumn::Counts,
            SplicedColumn::StatErr => ArrayColumn::StatErr,
        }
    }
}

// ---------------------------------------------------------------------------
// SpectrumRow – one diffraction order of one spectrum
// ---------------------------------------------------------------------------

/// A single row of the spectrum table.
#[derive(Debug, Clone, PartialEq)]
pub struct SpectrumRow {
    /// Spectrum identifier, only reported.
    pub spec_num: i64,
    /// Diffraction order.
    pub tg_m: i64,
    /// Lower channel boundaries, in instrument units.
    pub bin_lo: Vec<f64>,
    /// Upper channel boundaries – same length as `bin_lo`.
    pub bin_hi: Vec<f64>,
    pub counts: Vec<f64>,
    pub stat_err: Vec<f64>,
}

impl SpectrumRow {
    pub fn array(&self, column: ArrayColumn) -> &[f64] {
        match column {
            ArrayColumn::BinLo => &self.bin_lo,
            ArrayColumn::BinHi => &self.bin_hi,
            ArrayColumn::Counts => &self.counts,
            ArrayColumn::StatErr => &self.stat_err,
        }
    }

    pub fn spliced_mut(&mut self, column: SplicedColumn) -> &mut Vec<f64> {
        match column {
            SplicedColumn::Counts => &mut self.counts,
            SplicedColumn::StatErr => &mut self.stat_err,
        }
    }

    /// Number of channels, taken from `bin_lo`.
    pub fn num_channels(&self) -> usize {
        self.bin_lo.len()
    }
}

// ---------------------------------------------------------------------------
// SpectralTable – all rows of a file
// ---------------------------------------------------------------------------

/// The complete spectrum table of one file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SpectralTable {
    pub rows: Vec<SpectrumRow>,
}

impl SpectralTable {
    /// Build a table, checking that every array column of every row has
    /// the same channel count.
    pub fn from_rows(rows: Vec<SpectrumRow>) -> Result<Self, String> {
        let expected = rows.first().map(SpectrumRow::num_channels).unwrap_or(0);
        for (i, row) in rows.iter().enumerate() {
            for column in ArrayColumn::ALL {
                let len = row.array(column).len();
                if len != expected {
                    return Err(format!(
                        "Row {i}: '{column}' has {len} channels, expected {expected}"
                    ));
                }
            }
        }
        Ok(SpectralTable { rows })
    }

    /// Number of rows (spectral orders).
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn num_channels(&self) -> usize {
        self.rows.first().map(SpectrumRow::num_channels).unwrap_or(0)
    }
}

// ---------------------------------------------------------------------------
// Splice report
// ---------------------------------------------------------------------------

/// Outcome of splicing one row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RowSplice {
    pub spec_num: i64,
    pub tg_m: i64,
    pub overwritten: usize,
}

impl fmt::Display for RowSplice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "overwriting {} channels for spectrum number {}, order = {}",
            self.overwritten, self.spec_num, self.tg_m
        )
    }
}

/// Per-row outcome of a whole splice, in table order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SpliceReport {
    pub rows: Vec<RowSplice>,
}

impl SpliceReport {
    /// Total channels overwritten across all rows.
    pub fn total_overwritten(&self) -> usize {
        self.rows.iter().map(|r| r.overwritten).sum()
    }
}
