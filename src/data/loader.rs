use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use arrow::array::{
    Array, ArrayRef, AsArray, FixedSizeListBuilder, Float64Builder, LargeListBuilder,
    ListBuilder,
};
use arrow::compute::cast;
use arrow::datatypes::{DataType, Float64Type, Int64Type, SchemaRef};
use arrow::record_batch::RecordBatch;
use parquet::arrow::ArrowWriter;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use serde_json::Value as JsonValue;

use super::model::{
    ArrayColumn, SPEC_NUM, SPECTRUM_TABLE, SpectralTable, SpectrumRow, SplicedColumn, TG_M,
};

// ---------------------------------------------------------------------------
// Format detection
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableFormat {
    Fits,
    Parquet,
    Json,
    Csv,
}

impl TableFormat {
    /// Pick the format from the file extension.
    ///
    /// Supported formats:
    /// * `.fits` / `.fit` / `.fts` / `.pha` / `.pha2` – FITS with a `SPECTRUM` binary table
    /// * `.parquet` / `.pq` – one row per order, array columns as lists
    /// * `.json` – `[{ "tg_m": 1, "bin_lo": [...], ... }, ...]`
    /// * `.csv`  – array columns hold semicolon-separated numbers
    pub fn from_path(path: &Path) -> Result<TableFormat> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_ascii_lowercase();

        match ext.as_str() {
            "fits" | "fit" | "fts" | "pha" | "pha2" => Ok(TableFormat::Fits),
            "parquet" | "pq" => Ok(TableFormat::Parquet),
            "json" => Ok(TableFormat::Json),
            "csv" => Ok(TableFormat::Csv),
            other => bail!("Unsupported file extension: .{other}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Document – the parsed file, kept so it can be written back
// ---------------------------------------------------------------------------

/// Everything read from a buffered file. Only the spliced columns are
/// replaced when it is saved; every other column or key is written back
/// as it was read.
#[derive(Debug, Clone)]
pub enum Document {
    Parquet {
        schema: SchemaRef,
        batches: Vec<RecordBatch>,
    },
    Json {
        root: JsonValue,
    },
    Csv {
        headers: Vec<String>,
        records: Vec<csv::StringRecord>,
    },
}

/// Load a buffered (non-FITS) table and its document.
pub fn load_file(path: &Path, format: TableFormat) -> Result<(SpectralTable, Document)> {
    match format {
        TableFormat::Parquet => load_parquet(path),
        TableFormat::Json => load_json(path),
        TableFormat::Csv => load_csv(path),
        TableFormat::Fits => bail!("FITS tables are memory-mapped, not loaded"),
    }
}

/// Serialize `document` with the spliced columns taken from `table`.
pub fn save_document<W: Write + Send>(
    writer: W,
    document: &Document,
    table: &SpectralTable,
) -> Result<()> {
    match document {
        Document::Parquet { schema, batches } => save_parquet(writer, schema, batches, table),
        Document::Json { root } => save_json(writer, root, table),
        Document::Csv { headers, records } => save_csv(writer, headers, records, table),
    }
}

fn build_table(rows: Vec<SpectrumRow>) -> Result<SpectralTable> {
    SpectralTable::from_rows(rows).map_err(anyhow::Error::msg)
}

// ---------------------------------------------------------------------------
// JSON
// ---------------------------------------------------------------------------

/// Expected JSON schema (records-oriented, optionally wrapped in an object
/// under `"spectrum"`):
///
/// ```json
/// [
///   {
///     "spec_num": 1,
///     "tg_m": -1,
///     "bin_lo": [1.0, 1.005, ...],
///     "bin_hi": [1.005, 1.01, ...],
///     "counts": [0, 3, ...],
///     "stat_err": [1.87, 2.94, ...]
///   },
///   ...
/// ]
/// ```
fn load_json(path: &Path) -> Result<(SpectralTable, Document)> {
    let text = std::fs::read_to_string(path).context("reading JSON file")?;
    let root: JsonValue = serde_json::from_str(&text).context("parsing JSON")?;

    let mut rows = Vec::new();
    for (i, rec) in json_records(&root)?.iter().enumerate() {
        let obj = rec
            .as_object()
            .with_context(|| format!("Row {i} is not a JSON object"))?;

        let spec_num = json_integer(obj.get(SPEC_NUM), i, SPEC_NUM)?;
        let tg_m = json_integer(obj.get(TG_M), i, TG_M)?;
        let [bin_lo, bin_hi, counts, stat_err] = ArrayColumn::ALL
            .map(|col| json_array_to_f64(obj.get(col.name()), i, col.name()));

        rows.push(SpectrumRow {
            spec_num,
            tg_m,
            bin_lo: bin_lo?,
            bin_hi: bin_hi?,
            counts: counts?,
            stat_err: stat_err?,
        });
    }

    Ok((build_table(rows)?, Document::Json { root }))
}

fn json_records(root: &JsonValue) -> Result<&Vec<JsonValue>> {
    let records = if root.is_object() {
        root.get(SPECTRUM_TABLE)
            .with_context(|| format!("Expected a top-level array or a '{SPECTRUM_TABLE}' key"))?
    } else {
        root
    };
    records
        .as_array()
        .context("Expected a JSON array of spectrum rows")
}

fn json_records_mut(root: &mut JsonValue) -> Result<&mut Vec<JsonValue>> {
    let records = if root.is_object() {
        root.get_mut(SPECTRUM_TABLE)
            .with_context(|| format!("Expected a top-level array or a '{SPECTRUM_TABLE}' key"))?
    } else {
        root
    };
    records
        .as_array_mut()
        .context("Expected a JSON array of spectrum rows")
}

fn json_integer(val: Option<&JsonValue>, row: usize, col: &str) -> Result<i64> {
    let val = val.with_context(|| format!("Row {row}: missing '{col}'"))?;
    if let Some(i) = val.as_i64() {
        return Ok(i);
    }
    match val.as_f64() {
        Some(f) if f.fract() == 0.0 => Ok(f as i64),
        _ => bail!("Row {row}: '{col}' is not an integer"),
    }
}

fn json_array_to_f64(val: Option<&JsonValue>, row: usize, col: &str) -> Result<Vec<f64>> {
    let arr = val
        .and_then(|v| v.as_array())
        .with_context(|| format!("Row {row}: missing or invalid '{col}' array"))?;

    arr.iter()
        .enumerate()
        .map(|(j, v)| {
            v.as_f64()
                .with_context(|| format!("Row {row}, {col}[{j}]: not a number"))
        })
        .collect()
}

/// Integral values go back out as JSON integers so untouched-looking
/// count arrays stay integer arrays.
fn f64_to_json(v: f64) -> JsonValue {
    if v.fract() == 0.0 && v.abs() < 9.0e15 {
        JsonValue::from(v as i64)
    } else {
        serde_json::Number::from_f64(v)
            .map(JsonValue::Number)
            .unwrap_or(JsonValue::Null)
    }
}

/// Same number, with NaN equal to NaN.
fn same_value(previous: Option<f64>, value: f64) -> bool {
    previous.is_some_and(|p| p == value || (p.is_nan() && value.is_nan()))
}

/// The new array for one spliced key. Elements whose value did not change
/// keep their original JSON number.
fn patch_json_array(original: Option<&JsonValue>, values: &[f64]) -> JsonValue {
    let original = original.and_then(JsonValue::as_array);
    let patched = values
        .iter()
        .enumerate()
        .map(|(c, &v)| match original.and_then(|o| o.get(c)) {
            Some(prev) if same_value(prev.as_f64(), v) => prev.clone(),
            _ => f64_to_json(v),
        })
        .collect();
    JsonValue::Array(patched)
}

fn save_json<W: Write>(writer: W, root: &JsonValue, table: &SpectralTable) -> Result<()> {
    let mut root = root.clone();
    let records = json_records_mut(&mut root)?;
    for (i, (rec, row)) in records.iter_mut().zip(&table.rows).enumerate() {
        let obj = rec
            .as_object_mut()
            .with_context(|| format!("Row {i} is not a JSON object"))?;
        for col in SplicedColumn::ALL {
            let values = patch_json_array(obj.get(col.name()), row.array(col.into()));
            obj.insert(col.name().to_string(), values);
        }
    }
    serde_json::to_writer_pretty(writer, &root).context("writing JSON")?;
    Ok(())
}

// ---------------------------------------------------------------------------
// CSV
// ---------------------------------------------------------------------------

/// CSV layout: header row with column names. Array columns contain
/// semicolon-separated numbers: `"1.0;1.005;1.01"`. Other columns are kept
/// verbatim.
fn load_csv(path: &Path) -> Result<(SpectralTable, Document)> {
    let mut reader = csv::Reader::from_path(path).context("opening CSV")?;
    let headers: Vec<String> = reader
        .headers()
        .context("reading CSV headers")?
        .iter()
        .map(|h| h.to_string())
        .collect();

    let spec_num_idx = csv_column(&headers, SPEC_NUM)?;
    let tg_m_idx = csv_column(&headers, TG_M)?;
    let array_idx = ArrayColumn::ALL.map(|col| csv_column(&headers, col.name()));
    let [lo_idx, hi_idx, counts_idx, err_idx] = array_idx;
    let (lo_idx, hi_idx, counts_idx, err_idx) = (lo_idx?, hi_idx?, counts_idx?, err_idx?);

    let mut rows = Vec::new();
    let mut records = Vec::new();

    for (row_no, result) in reader.records().enumerate() {
        let record = result.with_context(|| format!("CSV row {row_no}"))?;
        let field = |idx: usize| record.get(idx).unwrap_or("");

        rows.push(SpectrumRow {
            spec_num: parse_integer(field(spec_num_idx), row_no, SPEC_NUM)?,
            tg_m: parse_integer(field(tg_m_idx), row_no, TG_M)?,
            bin_lo: parse_semicolon_floats(field(lo_idx), row_no, "bin_lo")?,
            bin_hi: parse_semicolon_floats(field(hi_idx), row_no, "bin_hi")?,
            counts: parse_semicolon_floats(field(counts_idx), row_no, "counts")?,
            stat_err: parse_semicolon_floats(field(err_idx), row_no, "stat_err")?,
        });
        records.push(record);
    }

    Ok((build_table(rows)?, Document::Csv { headers, records }))
}

fn csv_column(headers: &[String], name: &str) -> Result<usize> {
    headers
        .iter()
        .position(|h| h.trim().eq_ignore_ascii_case(name))
        .with_context(|| format!("CSV missing '{name}' column"))
}

fn parse_integer(s: &str, row: usize, col: &str) -> Result<i64> {
    let s = s.trim();
    if let Ok(i) = s.parse::<i64>() {
        return Ok(i);
    }
    match s.parse::<f64>() {
        Ok(f) if f.fract() == 0.0 => Ok(f as i64),
        _ => bail!("Row {row}, {col}: '{s}' is not an integer"),
    }
}

fn parse_semicolon_floats(s: &str, row: usize, col: &str) -> Result<Vec<f64>> {
    if s.trim().is_empty() {
        return Ok(Vec::new());
    }
    s.split(';')
        .enumerate()
        .map(|(j, tok)| {
            tok.trim()
                .parse::<f64>()
                .with_context(|| format!("Row {row}, {col}[{j}]: '{tok}' is not a number"))
        })
        .collect()
}

/// Re-join one array field. Tokens whose value did not change keep their
/// original text.
fn patch_semicolon_floats(original: &str, values: &[f64]) -> String {
    let tokens: Vec<&str> = if original.trim().is_empty() {
        Vec::new()
    } else {
        original.split(';').collect()
    };
    values
        .iter()
        .enumerate()
        .map(|(c, &v)| match tokens.get(c) {
            Some(tok) if same_value(tok.trim().parse().ok(), v) => tok.to_string(),
            _ => v.to_string(),
        })
        .collect::<Vec<_>>()
        .join(";")
}

fn save_csv<W: Write>(
    writer: W,
    headers: &[String],
    records: &[csv::StringRecord],
    table: &SpectralTable,
) -> Result<()> {
    let counts_idx = csv_column(headers, SplicedColumn::Counts.name())?;
    let err_idx = csv_column(headers, SplicedColumn::StatErr.name())?;

    let mut out = csv::Writer::from_writer(writer);
    out.write_record(headers).context("writing CSV headers")?;
    for (record, row) in records.iter().zip(&table.rows) {
        let fields: Vec<String> = record
            .iter()
            .enumerate()
            .map(|(idx, value)| {
                if idx == counts_idx {
                    patch_semicolon_floats(value, &row.counts)
                } else if idx == err_idx {
                    patch_semicolon_floats(value, &row.stat_err)
                } else {
                    value.to_string()
                }
            })
            .collect();
        out.write_record(&fields).context("writing CSV row")?;
    }
    out.flush().context("flushing CSV")?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Parquet
// ---------------------------------------------------------------------------

/// Load a Parquet file holding a spectrum table.
///
/// Expected schema:
/// - `spec_num`, `tg_m`: any integer type
/// - `bin_lo`, `bin_hi`, `counts`, `stat_err`: List, LargeList or
///   FixedSizeList of Float32/Float64/Int32/Int64
/// - Any other columns are carried through untouched
fn load_parquet(path: &Path) -> Result<(SpectralTable, Document)> {
    let file = std::fs::File::open(path).context("opening parquet file")?;
    let builder = ParquetRecordBatchReaderBuilder::try_new(file)
        .context("reading parquet metadata")?;
    let schema = builder.schema().clone();
    let reader = builder.build().context("building parquet reader")?;

    let mut rows = Vec::new();
    let mut batches = Vec::new();

    for batch_result in reader {
        let batch = batch_result.context("reading parquet record batch")?;

        let spec_num = integer_column(&batch, SPEC_NUM)?;
        let tg_m = integer_column(&batch, TG_M)?;
        let arrays = ArrayColumn::ALL.map(|col| parquet_column(&batch, col.name()));
        let [bin_lo, bin_hi, counts, stat_err] = arrays;
        let (bin_lo, bin_hi, counts, stat_err) = (bin_lo?, bin_hi?, counts?, stat_err?);

        for row in 0..batch.num_rows() {
            let global = rows.len();
            let list = |col: &ArrayRef, name: &str| {
                extract_f64_list(col, row)
                    .with_context(|| format!("Row {global}: failed to read '{name}'"))
            };
            let scalar = |col: &ArrayRef, name: &str| -> Result<i64> {
                let values = col.as_primitive::<Int64Type>();
                if values.is_null(row) {
                    bail!("Row {global}: null '{name}'");
                }
                Ok(values.value(row))
            };

            rows.push(SpectrumRow {
                spec_num: scalar(&spec_num, SPEC_NUM)?,
                tg_m: scalar(&tg_m, TG_M)?,
                bin_lo: list(&bin_lo, "bin_lo")?,
                bin_hi: list(&bin_hi, "bin_hi")?,
                counts: list(&counts, "counts")?,
                stat_err: list(&stat_err, "stat_err")?,
            });
        }
        batches.push(batch);
    }

    Ok((build_table(rows)?, Document::Parquet { schema, batches }))
}

fn column_index(batch: &RecordBatch, name: &str) -> Result<usize> {
    batch
        .schema()
        .fields()
        .iter()
        .position(|f| f.name().eq_ignore_ascii_case(name))
        .with_context(|| format!("Parquet file missing '{name}' column"))
}

fn parquet_column(batch: &RecordBatch, name: &str) -> Result<ArrayRef> {
    Ok(batch.column(column_index(batch, name)?).clone())
}

/// An integer column normalised to Int64.
fn integer_column(batch: &RecordBatch, name: &str) -> Result<ArrayRef> {
    let col = parquet_column(batch, name)?;
    if !col.data_type().is_integer() {
        bail!("'{name}' must be an integer column, got {:?}", col.data_type());
    }
    cast(&col, &DataType::Int64).with_context(|| format!("casting '{name}' to Int64"))
}

/// Extract a `Vec<f64>` from a list column at the given row.
fn extract_f64_list(col: &ArrayRef, row: usize) -> Result<Vec<f64>> {
    if col.is_null(row) {
        bail!("null value in list column");
    }

    let values_array = match col.data_type() {
        DataType::List(_) => col.as_list::<i32>().value(row),
        DataType::LargeList(_) => col.as_list::<i64>().value(row),
        DataType::FixedSizeList(_, _) => col.as_fixed_size_list().value(row),
        other => bail!("Expected List, LargeList or FixedSizeList column, got {other:?}"),
    };

    let inner = values_array.data_type();
    if !(inner.is_floating() || inner.is_integer()) {
        bail!("List inner type is {inner:?}, expected a numeric type");
    }
    let values = cast(&values_array, &DataType::Float64).context("casting list values")?;
    Ok(values
        .as_primitive::<Float64Type>()
        .iter()
        .map(|v| v.unwrap_or(f64::NAN))
        .collect())
}

/// Rebuild one spliced column for the rows `[start, start + len)` with the
/// list kind of `original`, then cast back to its exact type.
fn rebuild_list_column(
    original: &ArrayRef,
    rows: &[SpectrumRow],
    column: SplicedColumn,
) -> Result<ArrayRef> {
    let target_type = original.data_type();
    let rebuilt: ArrayRef = match target_type {
        DataType::List(_) => {
            let mut builder = ListBuilder::new(Float64Builder::new());
            for row in rows {
                builder.values().append_slice(row.array(column.into()));
                builder.append(true);
            }
            Arc::new(builder.finish())
        }
        DataType::LargeList(_) => {
            let mut builder = LargeListBuilder::new(Float64Builder::new());
            for row in rows {
                builder.values().append_slice(row.array(column.into()));
                builder.append(true);
            }
            Arc::new(builder.finish())
        }
        DataType::FixedSizeList(_, size) => {
            let mut builder = FixedSizeListBuilder::new(Float64Builder::new(), *size);
            for row in rows {
                builder.values().append_slice(row.array(column.into()));
                builder.append(true);
            }
            Arc::new(builder.finish())
        }
        other => bail!("cannot rebuild '{}' of type {other:?}", column.name()),
    };
    cast(&rebuilt, target_type)
        .with_context(|| format!("casting rebuilt '{}' to {target_type:?}", column.name()))
}

fn save_parquet<W: Write + Send>(
    writer: W,
    schema: &SchemaRef,
    batches: &[RecordBatch],
    table: &SpectralTable,
) -> Result<()> {
    let mut out = ArrowWriter::try_new(writer, schema.clone(), None)
        .context("creating parquet writer")?;

    let mut start = 0;
    for batch in batches {
        let rows = table
            .rows
            .get(start..start + batch.num_rows())
            .context("table has fewer rows than the parquet file")?;

        let mut columns = batch.columns().to_vec();
        for col in SplicedColumn::ALL {
            let idx = column_index(batch, col.name())?;
            columns[idx] = rebuild_list_column(&columns[idx], rows, col)?;
        }
        let patched = RecordBatch::try_new(batch.schema(), columns)
            .context("assembling patched record batch")?;
        out.write(&patched).context("writing parquet record batch")?;
        start += batch.num_rows();
    }

    out.close().context("closing parquet writer")?;
    Ok(())
}
