use std::io::Write;
use std::path::Path;

use log::{info, warn};

use crate::data::mask::{ChannelMask, WavelengthWindow};
use crate::data::model::{ArrayColumn, RowSplice, SpliceReport, SplicedColumn, TG_M};
use crate::error::{Result, SpliceError};
use crate::store::{CommitMode, OpenMode, SpectrumStore, open_store};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SpliceOptions {
    pub commit: CommitMode,
}

/// Overwrite `counts` and `stat_err` of `target` with the values from
/// `source` for every channel whose `[bin_lo * tg_m, bin_hi * tg_m]` span
/// lies inside `[wavelength_low, wavelength_high]`. Progress lines go to
/// stdout.
pub fn splice(
    target: &Path,
    source: &Path,
    wavelength_low: f64,
    wavelength_high: f64,
) -> Result<SpliceReport> {
    let window = WavelengthWindow::new(wavelength_low, wavelength_high)?;
    let stdout = std::io::stdout();
    let mut progress = stdout.lock();
    splice_files(target, source, &window, &SpliceOptions::default(), &mut progress)
}

/// Open both files, splice, and commit the target.
///
/// The target is opened first and the source second. Either handle is
/// released on every error path; the target is only committed when every
/// row succeeded.
pub fn splice_files(
    target_path: &Path,
    source_path: &Path,
    window: &WavelengthWindow,
    options: &SpliceOptions,
    progress: &mut dyn Write,
) -> Result<SpliceReport> {
    let mut target = open_store(target_path, OpenMode::ReadWrite(options.commit))?;
    let source = open_store(source_path, OpenMode::ReadOnly)?;

    let report = splice_tables(target.as_mut(), source.as_ref(), window, progress)?;

    target.close()?;
    source.close()?;
    Ok(report)
}

/// The splice itself, over already-open stores.
///
/// Binning is compared across the whole table before the first write, so a
/// mismatch leaves the target untouched.
pub fn splice_tables(
    target: &mut dyn SpectrumStore,
    source: &dyn SpectrumStore,
    window: &WavelengthWindow,
    progress: &mut dyn Write,
) -> Result<SpliceReport> {
    check_same_binning(target, source)?;

    let mut report = SpliceReport::default();
    for row in 0..target.num_rows() {
        let spec_num = target.spec_num(row)?;
        let tg_m = target.tg_m(row)?;
        let bin_lo = target.read_array(ArrayColumn::BinLo, row)?;
        let bin_hi = target.read_array(ArrayColumn::BinHi, row)?;

        let mask = ChannelMask::for_row(&bin_lo, &bin_hi, tg_m, window);
        if mask.count() > 0 {
            for column in SplicedColumn::ALL {
                let values = source.read_array(column.into(), row)?;
                target.write_masked(column, row, &mask, &values)?;
            }
        }

        let outcome = RowSplice {
            spec_num,
            tg_m,
            overwritten: mask.count(),
        };
        writeln!(progress, "{outcome}")
            .map_err(|e| SpliceError::io(Path::new("<progress>"), e))?;
        info!("{}: row {row}: {outcome}", target.path().display());
        report.rows.push(outcome);
    }

    if report.total_overwritten() == 0 {
        warn!(
            "no channel of {} lies inside [{}, {}]; nothing spliced",
            target.path().display(),
            window.low(),
            window.high()
        );
    }
    Ok(report)
}

/// Require identical `tg_m`, `bin_lo` and `bin_hi`, row for row. Two NaNs
/// at the same position count as equal.
pub fn check_same_binning(target: &dyn SpectrumStore, source: &dyn SpectrumStore) -> Result<()> {
    if target.num_rows() != source.num_rows() {
        return Err(SpliceError::ShapeMismatch {
            what: "row count",
            target: target.num_rows(),
            source_value: source.num_rows(),
        });
    }
    if target.num_channels() != source.num_channels() {
        return Err(SpliceError::ShapeMismatch {
            what: "channel count",
            target: target.num_channels(),
            source_value: source.num_channels(),
        });
    }

    for row in 0..target.num_rows() {
        let (t, s) = (target.tg_m(row)?, source.tg_m(row)?);
        if t != s {
            return Err(SpliceError::ColumnMismatch {
                column: TG_M,
                row,
                channel: 0,
                target: t as f64,
                source_value: s as f64,
            });
        }

        for column in [ArrayColumn::BinLo, ArrayColumn::BinHi] {
            let t = target.read_array(column, row)?;
            let s = source.read_array(column, row)?;
            let differs = t
                .iter()
                .zip(&s)
                .position(|(a, b)| !(a == b || (a.is_nan() && b.is_nan())));
            if let Some(channel) = differs {
                return Err(SpliceError::ColumnMismatch {
                    column: column.name(),
                    row,
                    channel,
                    target: t[channel],
                    source_value: s[channel],
                });
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::TempDir;

    use super::*;
    use crate::data::model::{SpectralTable, SpectrumRow};
    use crate::fits::bintable::NumericType;
    use crate::fits::writer::{SpectrumColumnTypes, write_spectrum_table};

    type TestResult = std::result::Result<(), Box<dyn std::error::Error>>;

    fn row(spec_num: i64, tg_m: i64, counts: &[f64], stat_err: &[f64]) -> SpectrumRow {
        SpectrumRow {
            spec_num,
            tg_m,
            bin_lo: vec![1.0, 2.0, 3.0],
            bin_hi: vec![2.0, 3.0, 4.0],
            counts: counts.to_vec(),
            stat_err: stat_err.to_vec(),
        }
    }

    fn target_table() -> SpectralTable {
        SpectralTable::from_rows(vec![
            row(1, 1, &[10.0, 20.0, 30.0], &[1.0, 2.0, 3.0]),
            row(1, 2, &[11.0, 21.0, 31.0], &[1.5, 2.5, 3.5]),
        ])
        .unwrap()
    }

    fn source_table() -> SpectralTable {
        SpectralTable::from_rows(vec![
            row(1, 1, &[99.0, 98.0, 97.0], &[9.0, 8.0, 7.0]),
            row(1, 2, &[89.0, 88.0, 87.0], &[0.5, 0.25, 0.125]),
        ])
        .unwrap()
    }

    struct Fixture {
        _tmp: TempDir,
        target: std::path::PathBuf,
        source: std::path::PathBuf,
    }

    fn fixture(target: &SpectralTable, source: &SpectralTable) -> Result<Fixture> {
        let tmp = TempDir::new().map_err(|e| SpliceError::io(Path::new("tmp"), e))?;
        let target_path = tmp.path().join("target.pha2");
        let source_path = tmp.path().join("source.pha2");
        let types = SpectrumColumnTypes::default();
        write_spectrum_table(&target_path, target, &types)
            .map_err(|e| SpliceError::from_loader(&target_path, e))?;
        write_spectrum_table(&source_path, source, &types)
            .map_err(|e| SpliceError::from_loader(&source_path, e))?;
        Ok(Fixture {
            _tmp: tmp,
            target: target_path,
            source: source_path,
        })
    }

    fn run(fx: &Fixture, low: f64, high: f64, commit: CommitMode) -> Result<(SpliceReport, String)> {
        let window = WavelengthWindow::new(low, high)?;
        let mut out: Vec<u8> = Vec::new();
        let report = splice_files(
            &fx.target,
            &fx.source,
            &window,
            &SpliceOptions { commit },
            &mut out,
        )?;
        Ok((report, String::from_utf8_lossy(&out).into_owned()))
    }

    fn read_back(path: &Path, column: ArrayColumn, row: usize) -> Result<Vec<f64>> {
        let store = open_store(path, OpenMode::ReadOnly)?;
        store.read_array(column, row)
    }

    #[test]
    fn splices_fully_contained_channels_only() -> TestResult {
        let single = |counts: &[f64]| {
            SpectralTable::from_rows(vec![row(1, 1, counts, &[1.0, 1.0, 1.0])]).unwrap()
        };
        let fx = fixture(&single(&[10.0, 20.0, 30.0]), &single(&[99.0, 98.0, 97.0]))?;

        let (report, output) = run(&fx, 2.0, 4.0, CommitMode::InPlace)?;

        assert_eq!(read_back(&fx.target, ArrayColumn::Counts, 0)?, vec![10.0, 98.0, 97.0]);
        assert_eq!(report.rows[0].overwritten, 2);
        assert_eq!(
            output,
            "overwriting 2 channels for spectrum number 1, order = 1\n"
        );
        Ok(())
    }

    #[test]
    fn full_window_makes_target_equal_source() -> TestResult {
        let fx = fixture(&target_table(), &source_table())?;
        // order 2 spans m*lambda 2..8
        let (report, _) = run(&fx, 0.0, 100.0, CommitMode::InPlace)?;
        assert_eq!(report.total_overwritten(), 6);

        for r in 0..2 {
            for column in [ArrayColumn::Counts, ArrayColumn::StatErr] {
                assert_eq!(
                    read_back(&fx.target, column, r)?,
                    read_back(&fx.source, column, r)?,
                    "row {r} {column}"
                );
            }
        }

        // a second identical splice changes nothing
        let once = fs::read(&fx.target)?;
        run(&fx, 0.0, 100.0, CommitMode::InPlace)?;
        assert_eq!(fs::read(&fx.target)?, once);
        Ok(())
    }

    #[test]
    fn disjoint_window_is_a_no_op() -> TestResult {
        let fx = fixture(&target_table(), &source_table())?;
        let before = fs::read(&fx.target)?;

        let (report, output) = run(&fx, 100.0, 200.0, CommitMode::InPlace)?;

        assert!(report.rows.iter().all(|r| r.overwritten == 0));
        assert_eq!(output.lines().count(), 2);
        assert!(output.lines().all(|l| l.starts_with("overwriting 0 channels")));
        assert_eq!(fs::read(&fx.target)?, before);
        Ok(())
    }

    #[test]
    fn order_scaling_selects_different_channels_per_row() -> TestResult {
        let fx = fixture(&target_table(), &source_table())?;
        // row 0 (m=1): spans 1-2, 2-3, 3-4 -> channels 1, 2
        // row 1 (m=2): spans 2-4, 4-6, 6-8 -> channel 0
        let (report, _) = run(&fx, 2.0, 4.0, CommitMode::InPlace)?;

        assert_eq!(report.rows[0].overwritten, 2);
        assert_eq!(report.rows[1].overwritten, 1);
        assert_eq!(read_back(&fx.target, ArrayColumn::Counts, 1)?, vec![89.0, 21.0, 31.0]);
        assert_eq!(read_back(&fx.target, ArrayColumn::StatErr, 1)?, vec![0.5, 2.5, 3.5]);
        Ok(())
    }

    #[test]
    fn binning_columns_are_never_modified() -> TestResult {
        let fx = fixture(&target_table(), &source_table())?;
        let before = open_store(&fx.target, OpenMode::ReadOnly)?;
        let snapshot: Vec<_> = (0..2)
            .map(|r| {
                (
                    before.spec_num(r).unwrap(),
                    before.tg_m(r).unwrap(),
                    before.read_array(ArrayColumn::BinLo, r).unwrap(),
                    before.read_array(ArrayColumn::BinHi, r).unwrap(),
                )
            })
            .collect();
        drop(before);

        run(&fx, 0.0, 100.0, CommitMode::InPlace)?;

        let after = open_store(&fx.target, OpenMode::ReadOnly)?;
        for (r, (spec_num, tg_m, lo, hi)) in snapshot.into_iter().enumerate() {
            assert_eq!(after.spec_num(r)?, spec_num);
            assert_eq!(after.tg_m(r)?, tg_m);
            assert_eq!(after.read_array(ArrayColumn::BinLo, r)?, lo);
            assert_eq!(after.read_array(ArrayColumn::BinHi, r)?, hi);
        }
        Ok(())
    }

    #[test]
    fn mismatched_orders_abort_before_any_write() -> TestResult {
        let mut source = source_table();
        source.rows[1].tg_m = 3;
        let fx = fixture(&target_table(), &source)?;
        let before = fs::read(&fx.target)?;

        let err = run(&fx, 0.0, 100.0, CommitMode::InPlace).unwrap_err();

        assert!(
            matches!(err, SpliceError::ColumnMismatch { column: "tg_m", row: 1, .. }),
            "{err}"
        );
        assert_eq!(err.exit_code(), 3);
        assert_eq!(fs::read(&fx.target)?, before);
        Ok(())
    }

    #[test]
    fn mismatched_bins_or_row_count_are_rejected() -> TestResult {
        let mut source = source_table();
        source.rows[0].bin_hi[2] = 4.0000001;
        let fx = fixture(&target_table(), &source)?;
        let err = run(&fx, 0.0, 100.0, CommitMode::InPlace).unwrap_err();
        assert!(
            matches!(err, SpliceError::ColumnMismatch { column: "bin_hi", row: 0, channel: 2, .. }),
            "{err}"
        );

        let mut source = source_table();
        source.rows.pop();
        let fx = fixture(&target_table(), &source)?;
        let before = fs::read(&fx.target)?;
        let err = run(&fx, 0.0, 100.0, CommitMode::InPlace).unwrap_err();
        assert!(matches!(err, SpliceError::ShapeMismatch { what: "row count", .. }), "{err}");
        assert_eq!(fs::read(&fx.target)?, before);
        Ok(())
    }

    #[test]
    fn missing_source_is_an_io_error_and_target_is_untouched() -> TestResult {
        let fx = fixture(&target_table(), &source_table())?;
        let before = fs::read(&fx.target)?;
        fs::remove_file(&fx.source)?;

        let err = run(&fx, 0.0, 100.0, CommitMode::Atomic).unwrap_err();
        assert!(matches!(err, SpliceError::Io { .. }), "{err}");
        assert_eq!(fs::read(&fx.target)?, before);

        let leftovers: Vec<_> = fs::read_dir(fx.target.parent().unwrap())?
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".splice-tmp"))
            .collect();
        assert!(leftovers.is_empty());
        Ok(())
    }

    #[test]
    fn atomic_commit_matches_in_place_result() -> TestResult {
        let in_place = fixture(&target_table(), &source_table())?;
        let atomic = fixture(&target_table(), &source_table())?;

        run(&in_place, 2.0, 4.0, CommitMode::InPlace)?;
        run(&atomic, 2.0, 4.0, CommitMode::Atomic)?;

        assert_eq!(fs::read(&in_place.target)?, fs::read(&atomic.target)?);
        let names: Vec<String> = fs::read_dir(atomic.target.parent().unwrap())?
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect();
        assert!(names.iter().all(|n| !n.ends_with(".splice-tmp")), "{names:?}");
        Ok(())
    }

    #[test]
    fn mixed_column_types_are_converted_on_write() -> TestResult {
        let tmp = TempDir::new()?;
        let target = tmp.path().join("target.fits");
        let source = tmp.path().join("source.fits");
        write_spectrum_table(&target, &target_table(), &SpectrumColumnTypes::default())?;
        let float_counts = SpectrumColumnTypes {
            counts: NumericType::F64,
            ..SpectrumColumnTypes::default()
        };
        let mut src = source_table();
        src.rows[0].counts = vec![99.7, 98.2, 97.9];
        write_spectrum_table(&source, &src, &float_counts)?;

        let window = WavelengthWindow::new(2.0, 4.0)?;
        splice_files(&target, &source, &window, &SpliceOptions::default(), &mut std::io::sink())?;

        // 32-bit integer counts truncate the source's fractional values
        assert_eq!(read_back(&target, ArrayColumn::Counts, 0)?, vec![10.0, 98.0, 97.0]);
        Ok(())
    }

    #[test]
    fn nan_bins_compare_equal() -> TestResult {
        let mut target = target_table();
        let mut source = source_table();
        target.rows[0].bin_lo[0] = f64::NAN;
        source.rows[0].bin_lo[0] = f64::NAN;
        let fx = fixture(&target, &source)?;

        let (report, _) = run(&fx, 2.0, 4.0, CommitMode::InPlace)?;
        assert_eq!(report.rows[0].overwritten, 2);
        Ok(())
    }

    #[test]
    fn json_target_with_fits_source() -> TestResult {
        let tmp = TempDir::new()?;
        let target = tmp.path().join("target.json");
        let source = tmp.path().join("source.fits");
        fs::write(
            &target,
            r#"[{"spec_num": 1, "tg_m": 1, "bin_lo": [1, 2, 3], "bin_hi": [2, 3, 4],
                 "counts": [10, 20, 30], "stat_err": [1, 1, 1]}]"#,
        )?;
        let src = SpectralTable::from_rows(vec![row(1, 1, &[99.0, 98.0, 97.0], &[2.0, 2.0, 2.0])])?;
        write_spectrum_table(&source, &src, &SpectrumColumnTypes::default())?;

        let window = WavelengthWindow::new(2.0, 4.0)?;
        splice_files(&target, &source, &window, &SpliceOptions::default(), &mut std::io::sink())?;

        let written: serde_json::Value = serde_json::from_str(&fs::read_to_string(&target)?)?;
        assert_eq!(written[0]["counts"], serde_json::json!([10, 98, 97]));
        assert_eq!(written[0]["stat_err"], serde_json::json!([1, 2, 2]));
        Ok(())
    }

    #[test]
    fn buffered_target_is_not_rewritten_when_nothing_is_spliced() -> TestResult {
        let tmp = TempDir::new()?;
        let source = tmp.path().join("source.fits");
        let src = SpectralTable::from_rows(vec![row(1, 1, &[99.0, 98.0, 97.0], &[2.0, 2.0, 2.0])])?;
        write_spectrum_table(&source, &src, &SpectrumColumnTypes::default())?;

        let targets = [
            (
                "target.json",
                "[{\"spec_num\":1,\"tg_m\":1,\"bin_lo\":[1,2,3],\"bin_hi\":[2,3,4],\
                  \"counts\":[10.0,20,30],\"stat_err\":[1,1,1]}]",
            ),
            (
                "target.csv",
                "spec_num,tg_m,bin_lo,bin_hi,counts,stat_err\n1,1,1;2;3,2;3;4,10.0;20;30,1;1;1\n",
            ),
        ];
        for (name, contents) in targets {
            let target = tmp.path().join(name);
            fs::write(&target, contents)?;

            let window = WavelengthWindow::new(100.0, 200.0)?;
            for commit in [CommitMode::InPlace, CommitMode::Atomic] {
                let report = splice_files(
                    &target,
                    &source,
                    &window,
                    &SpliceOptions { commit },
                    &mut std::io::sink(),
                )?;
                assert_eq!(report.total_overwritten(), 0);
                assert_eq!(fs::read_to_string(&target)?, contents, "{name}");
            }
        }

        let leftovers: Vec<String> = fs::read_dir(tmp.path())?
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .filter(|n| n.ends_with(".splice-tmp"))
            .collect();
        assert!(leftovers.is_empty(), "{leftovers:?}");
        Ok(())
    }

    #[test]
    fn invalid_window_is_rejected_before_opening_files() {
        let err = splice(Path::new("does-not-exist.fits"), Path::new("nope.fits"), 4.0, 2.0)
            .unwrap_err();
        assert!(matches!(err, SpliceError::InvalidWindow { .. }), "{err}");
        assert_eq!(err.exit_code(), 2);
    }
}
