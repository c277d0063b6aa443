use std::path::{Path, PathBuf};
use std::sync::Arc;

use arrow::array::{Float64Builder, Int16Array, ListBuilder, StringArray};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use parquet::arrow::ArrowWriter;

use specsplice::data::model::{ArrayColumn, SpectralTable, SpectrumRow};
use specsplice::fits::writer::{SpectrumColumnTypes, write_spectrum_table};

const CHANNELS: usize = 2048;
const BIN_START: f64 = 1.0;
const BIN_WIDTH: f64 = 0.01;

/// Minimal deterministic PRNG (xoshiro256**)
struct SimpleRng {
    state: [u64; 4],
}

impl SimpleRng {
    fn new(seed: u64) -> Self {
        let mut s = [0u64; 4];
        let mut x = seed;
        for slot in &mut s {
            x = x.wrapping_mul(6364136223846793005).wrapping_add(1);
            *slot = x;
        }
        SimpleRng { state: s }
    }

    fn next_u64(&mut self) -> u64 {
        let result = (self.state[1].wrapping_mul(5))
            .rotate_left(7)
            .wrapping_mul(9);
        let t = self.state[1] << 17;
        self.state[2] ^= self.state[0];
        self.state[3] ^= self.state[1];
        self.state[1] ^= self.state[2];
        self.state[0] ^= self.state[3];
        self.state[2] ^= t;
        self.state[3] = self.state[3].rotate_left(45);
        result
    }

    fn next_f64(&mut self) -> f64 {
        (self.next_u64() >> 11) as f64 / (1u64 << 53) as f64
    }

    /// Box-Muller transform for normal distribution
    fn gauss(&mut self, mean: f64, std_dev: f64) -> f64 {
        let u1 = self.next_f64().max(1e-15);
        let u2 = self.next_f64();
        let z = (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos();
        mean + std_dev * z
    }

    /// Poisson-like draw via the normal approximation, clamped at zero.
    fn counts(&mut self, expected: f64) -> f64 {
        self.gauss(expected, expected.sqrt()).round().max(0.0)
    }
}

fn gaussian(x: f64, mu: f64, sigma: f64, amplitude: f64) -> f64 {
    amplitude * (-(x - mu).powi(2) / (2.0 * sigma.powi(2))).exp()
}

/// Expected counts at wavelength `lambda` (angstrom) for an exposure scale.
fn model(lambda: f64, exposure: f64) -> f64 {
    let lines = [(6.65, 0.01, 40.0), (8.42, 0.012, 25.0), (12.13, 0.015, 60.0), (15.01, 0.02, 90.0)];
    let continuum = 2.0 + 0.2 * lambda;
    let signal: f64 = lines
        .iter()
        .map(|&(mu, sigma, amp)| gaussian(lambda, mu, sigma, amp))
        .sum();
    exposure * (continuum + signal)
}

/// One row per order `±1..=±3`, identical binning across the two exposures.
fn generate_table(exposure: f64, rng: &mut SimpleRng) -> SpectralTable {
    let bin_lo: Vec<f64> = (0..CHANNELS).map(|i| BIN_START + i as f64 * BIN_WIDTH).collect();
    let bin_hi: Vec<f64> = bin_lo.iter().map(|lo| lo + BIN_WIDTH).collect();

    let mut rows = Vec::new();
    for tg_m in [-3i64, -2, -1, 1, 2, 3] {
        // higher orders are fainter
        let efficiency = 1.0 / (tg_m.abs() as f64).powi(2);
        let counts: Vec<f64> = bin_lo
            .iter()
            .zip(&bin_hi)
            .map(|(lo, hi)| rng.counts(model(0.5 * (lo + hi), exposure * efficiency)))
            .collect();
        // Gehrels approximation, as used for grating spectra
        let stat_err = counts.iter().map(|c| 1.0 + (c + 0.75f64).sqrt()).collect();

        rows.push(SpectrumRow {
            spec_num: 1,
            tg_m,
            bin_lo: bin_lo.clone(),
            bin_hi: bin_hi.clone(),
            counts,
            stat_err,
        });
    }

    SpectralTable::from_rows(rows).expect("generated rows share one channel count")
}

fn write_parquet(path: &Path, table: &SpectralTable) {
    let list = |column: ArrayColumn| {
        let mut builder = ListBuilder::new(Float64Builder::new());
        for row in &table.rows {
            builder.values().append_slice(row.array(column));
            builder.append(true);
        }
        builder.finish()
    };
    let [bin_lo, bin_hi, counts, stat_err] = ArrayColumn::ALL.map(list);

    let spec_num = Int16Array::from_iter_values(table.rows.iter().map(|r| r.spec_num as i16));
    let tg_m = Int16Array::from_iter_values(table.rows.iter().map(|r| r.tg_m as i16));
    let tg_part = StringArray::from(vec!["MEG"; table.len()]);

    let list_type = DataType::List(Arc::new(Field::new("item", DataType::Float64, true)));
    let schema = Arc::new(Schema::new(vec![
        Field::new("spec_num", DataType::Int16, false),
        Field::new("tg_m", DataType::Int16, false),
        Field::new("tg_part", DataType::Utf8, false),
        Field::new("bin_lo", list_type.clone(), false),
        Field::new("bin_hi", list_type.clone(), false),
        Field::new("counts", list_type.clone(), false),
        Field::new("stat_err", list_type, false),
    ]));

    let batch = RecordBatch::try_new(
        schema.clone(),
        vec![
            Arc::new(spec_num),
            Arc::new(tg_m),
            Arc::new(tg_part),
            Arc::new(bin_lo),
            Arc::new(bin_hi),
            Arc::new(counts),
            Arc::new(stat_err),
        ],
    )
    .expect("Failed to create RecordBatch");

    let file = std::fs::File::create(path).expect("Failed to create output file");
    let mut writer = ArrowWriter::try_new(file, schema, None).expect("Failed to create writer");
    writer.write(&batch).expect("Failed to write batch");
    writer.close().expect("Failed to close writer");
}

fn main() {
    let out_dir = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."));
    std::fs::create_dir_all(&out_dir).expect("Failed to create output directory");

    let mut rng = SimpleRng::new(42);
    let target = generate_table(1.0, &mut rng);
    let source = generate_table(4.0, &mut rng);

    let types = SpectrumColumnTypes::default();
    for (name, table) in [("target", &target), ("source", &source)] {
        let fits_path = out_dir.join(format!("sample_{name}.pha2"));
        write_spectrum_table(&fits_path, table, &types).expect("Failed to write FITS file");
        write_parquet(&out_dir.join(format!("sample_{name}.parquet")), table);
    }

    let lambda_max = BIN_START + CHANNELS as f64 * BIN_WIDTH;
    println!(
        "Wrote {} orders ({CHANNELS} channels each, {BIN_START}-{lambda_max:.2} A) \
         as sample_target/sample_source .pha2 and .parquet to {}",
        target.len(),
        out_dir.display()
    );
}
