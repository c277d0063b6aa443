use std::path::Path;
use std::process::{Command, Output};
use std::{fs, io};

use specsplice::data::model::{ArrayColumn, SpectralTable, SpectrumRow};
use specsplice::fits::writer::{SpectrumColumnTypes, write_spectrum_table};
use specsplice::{OpenMode, SpectrumStore, open_store};
use tempfile::TempDir;

type TestResult = Result<(), Box<dyn std::error::Error>>;

fn cli_bin() -> &'static str {
    env!("CARGO_BIN_EXE_specsplice")
}

fn run_cli(args: &[&str]) -> io::Result<Output> {
    Command::new(cli_bin()).args(args).output()
}

fn path_str(path: &Path) -> &str {
    path.to_str().expect("temp paths are UTF-8")
}

fn write_pair(
    dir: &Path,
    source_orders: &[i64],
) -> Result<(String, String), Box<dyn std::error::Error>> {
    let table = |orders: &[i64], counts: [f64; 3]| {
        SpectralTable::from_rows(
            orders
                .iter()
                .map(|&tg_m| SpectrumRow {
                    spec_num: 3,
                    tg_m,
                    bin_lo: vec![1.0, 2.0, 3.0],
                    bin_hi: vec![2.0, 3.0, 4.0],
                    counts: counts.to_vec(),
                    stat_err: vec![1.0, 1.0, 1.0],
                })
                .collect(),
        )
    };
    let target = dir.join("target.fits");
    let source = dir.join("source.fits");
    let types = SpectrumColumnTypes::default();
    write_spectrum_table(&target, &table(&[-1, 1], [10.0, 20.0, 30.0])?, &types)?;
    write_spectrum_table(&source, &table(source_orders, [99.0, 98.0, 97.0])?, &types)?;
    Ok((path_str(&target).to_string(), path_str(&source).to_string()))
}

#[test]
fn splices_and_prints_one_line_per_order() -> TestResult {
    let tmp = TempDir::new()?;
    let (target, source) = write_pair(tmp.path(), &[-1, 1])?;

    let output = run_cli(&[&target, &source, "2", "4"])?;
    assert!(
        output.status.success(),
        "stdout:\n{}\nstderr:\n{}",
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr)
    );

    let stdout = String::from_utf8(output.stdout)?;
    assert_eq!(
        stdout,
        "overwriting 0 channels for spectrum number 3, order = -1\n\
         overwriting 2 channels for spectrum number 3, order = 1\n"
    );

    let store: Box<dyn SpectrumStore> = open_store(Path::new(&target), OpenMode::ReadOnly)?;
    assert_eq!(store.read_array(ArrayColumn::Counts, 1)?, vec![10.0, 98.0, 97.0]);
    Ok(())
}

#[test]
fn negative_window_reaches_negative_orders() -> TestResult {
    let tmp = TempDir::new()?;
    let (target, source) = write_pair(tmp.path(), &[-1, 1])?;

    let output = run_cli(&["--atomic", &target, &source, "-4", "-1"])?;
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    let stdout = String::from_utf8(output.stdout)?;
    assert!(
        stdout.starts_with("overwriting 3 channels for spectrum number 3, order = -1\n"),
        "{stdout}"
    );
    Ok(())
}

#[test]
fn invalid_window_exits_with_usage_code_before_opening_files() -> TestResult {
    let output = run_cli(&["missing-target.fits", "missing-source.fits", "5", "5"])?;
    assert_eq!(output.status.code(), Some(2));
    let stderr = String::from_utf8(output.stderr)?;
    assert!(stderr.contains("invalid wavelength window"), "{stderr}");
    Ok(())
}

#[test]
fn structural_mismatch_exits_with_validation_code() -> TestResult {
    let tmp = TempDir::new()?;
    let (target, source) = write_pair(tmp.path(), &[-2, 2])?;
    let before = fs::read(&target)?;

    let output = run_cli(&[&target, &source, "0", "100"])?;
    assert_eq!(output.status.code(), Some(3));
    assert!(output.stdout.is_empty());
    assert_eq!(fs::read(&target)?, before);
    Ok(())
}

#[test]
fn missing_file_exits_with_io_code() -> TestResult {
    let tmp = TempDir::new()?;
    let (target, _) = write_pair(tmp.path(), &[-1, 1])?;
    let missing = tmp.path().join("nope.fits");

    let output = run_cli(&[&target, path_str(&missing), "0", "100"])?;
    assert_eq!(output.status.code(), Some(4));
    Ok(())
}

#[test]
fn report_file_lists_every_row() -> TestResult {
    let tmp = TempDir::new()?;
    let (target, source) = write_pair(tmp.path(), &[-1, 1])?;
    let report = tmp.path().join("report.json");

    let output = run_cli(&[&target, &source, "1", "4", "--report", path_str(&report)])?;
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

    let json: serde_json::Value = serde_json::from_str(&fs::read_to_string(&report)?)?;
    assert_eq!(
        json,
        serde_json::json!({
            "rows": [
                {"spec_num": 3, "tg_m": -1, "overwritten": 0},
                {"spec_num": 3, "tg_m": 1, "overwritten": 3}
            ]
        })
    );
    Ok(())
}
