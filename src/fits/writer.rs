use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};

use super::bintable::{ColumnFormat, NumericType};
use super::header::{BLOCK_LEN, CARD_LEN, CardValue, format_card, padded_len};
use crate::data::model::{ArrayColumn, SpectralTable};

/// On-disk element type for each spectrum column.
///
/// The default follows the usual grating PHA layout: 16-bit `SPEC_NUM` and
/// `TG_M`, double-precision bins, 32-bit integer counts, single-precision
/// errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpectrumColumnTypes {
    pub spec_num: NumericType,
    pub tg_m: NumericType,
    pub bin_lo: NumericType,
    pub bin_hi: NumericType,
    pub counts: NumericType,
    pub stat_err: NumericType,
}

impl Default for SpectrumColumnTypes {
    fn default() -> Self {
        Self {
            spec_num: NumericType::I16,
            tg_m: NumericType::I16,
            bin_lo: NumericType::F64,
            bin_hi: NumericType::F64,
            counts: NumericType::I32,
            stat_err: NumericType::F32,
        }
    }
}

impl SpectrumColumnTypes {
    pub fn array(&self, column: ArrayColumn) -> NumericType {
        match column {
            ArrayColumn::BinLo => self.bin_lo,
            ArrayColumn::BinHi => self.bin_hi,
            ArrayColumn::Counts => self.counts,
            ArrayColumn::StatErr => self.stat_err,
        }
    }
}

/// Encode `table` as a FITS file: an empty primary HDU followed by a
/// `SPECTRUM` binary table.
pub fn encode_spectrum_table(table: &SpectralTable, types: &SpectrumColumnTypes) -> Vec<u8> {
    let channels = table.num_channels();

    let mut columns: Vec<(&str, ColumnFormat)> = vec![
        ("SPEC_NUM", ColumnFormat::new(1, types.spec_num.code())),
        ("TG_M", ColumnFormat::new(1, types.tg_m.code())),
    ];
    for column in ArrayColumn::ALL {
        columns.push((
            upper(column),
            ColumnFormat::new(channels, types.array(column).code()),
        ));
    }
    let row_len = types.spec_num.width()
        + types.tg_m.width()
        + ArrayColumn::ALL
            .iter()
            .map(|&column| channels * types.array(column).width())
            .sum::<usize>();

    let mut out = header_block(&[
        ("SIMPLE", CardValue::Logical(true)),
        ("BITPIX", CardValue::Integer(8)),
        ("NAXIS", CardValue::Integer(0)),
        ("EXTEND", CardValue::Logical(true)),
    ]);

    let mut cards = vec![
        ("XTENSION".to_string(), CardValue::Text("BINTABLE".into())),
        ("BITPIX".to_string(), CardValue::Integer(8)),
        ("NAXIS".to_string(), CardValue::Integer(2)),
        ("NAXIS1".to_string(), CardValue::Integer(row_len as i64)),
        ("NAXIS2".to_string(), CardValue::Integer(table.len() as i64)),
        ("PCOUNT".to_string(), CardValue::Integer(0)),
        ("GCOUNT".to_string(), CardValue::Integer(1)),
        ("TFIELDS".to_string(), CardValue::Integer(columns.len() as i64)),
    ];
    for (n, (name, format)) in columns.iter().enumerate() {
        let n = n + 1;
        cards.push((format!("TTYPE{n}"), CardValue::Text(name.to_string())));
        cards.push((format!("TFORM{n}"), CardValue::Text(format.to_string())));
        if name.starts_with("BIN_") {
            cards.push((format!("TUNIT{n}"), CardValue::Text("angstrom".into())));
        }
    }
    cards.push(("EXTNAME".to_string(), CardValue::Text("SPECTRUM".into())));
    out.extend(header_block(&cards));

    let data_start = out.len();
    let mut row_buf = vec![0u8; row_len];
    for row in &table.rows {
        let mut at = 0;
        types.spec_num.write_i64(&mut row_buf[at..at + types.spec_num.width()], row.spec_num);
        at += types.spec_num.width();
        types.tg_m.write_i64(&mut row_buf[at..at + types.tg_m.width()], row.tg_m);
        at += types.tg_m.width();
        for column in ArrayColumn::ALL {
            let ty = types.array(column);
            for &value in row.array(column) {
                ty.write_f64(&mut row_buf[at..at + ty.width()], value);
                at += ty.width();
            }
        }
        out.extend_from_slice(&row_buf);
    }
    out.resize(data_start + padded_len(out.len() - data_start), 0);
    out
}

/// Write `table` to `path` as a FITS spectrum file.
pub fn write_spectrum_table(
    path: &Path,
    table: &SpectralTable,
    types: &SpectrumColumnTypes,
) -> Result<()> {
    let bytes = encode_spectrum_table(table, types);
    let mut file = std::fs::File::create(path)
        .with_context(|| format!("creating {}", path.display()))?;
    file.write_all(&bytes)
        .with_context(|| format!("writing {}", path.display()))?;
    file.sync_all()
        .with_context(|| format!("syncing {}", path.display()))?;
    Ok(())
}

fn upper(column: ArrayColumn) -> &'static str {
    match column {
        ArrayColumn::BinLo => "BIN_LO",
        ArrayColumn::BinHi => "BIN_HI",
        ArrayColumn::Counts => "COUNTS",
        ArrayColumn::StatErr => "STAT_ERR",
    }
}

fn header_block<K: AsRef<str>>(cards: &[(K, CardValue)]) -> Vec<u8> {
    let mut out = Vec::with_capacity(BLOCK_LEN);
    for (keyword, value) in cards {
        out.extend(format_card(keyword.as_ref(), value).bytes());
    }
    out.extend(format!("{:<CARD_LEN$}", "END").bytes());
    out.resize(padded_len(out.len()), b' ');
    out
}
