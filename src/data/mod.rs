/// Data layer: core types, channel selection, and buffered file formats.
///
/// Architecture:
/// ```text
///  .parquet / .json / .csv          .fits / .pha2
///        │                                │
///        ▼                                │
///   ┌──────────┐                          │
///   │  loader   │  parse file → SpectralTable + Document
///   └──────────┘                          │
///        │                                │
///        ▼                                ▼
///   ┌──────────────┐            (memory-mapped rows, see `store`)
///   │ SpectrumRow   │  bin_lo, bin_hi, counts, stat_err per order
///   └──────────────┘
///        │
///        ▼
///   ┌──────────┐
///   │   mask    │  m·λ window → ChannelMask → masked copy
///   └──────────┘
/// ```

pub mod loader;
pub mod mask;
pub mod model;
