//! Splice `counts` and `stat_err` between two binned spectral tables over a
//! wavelength window.
//!
//! Target and source must share the same binning (`tg_m`, `bin_lo`,
//! `bin_hi`). Every channel whose `[bin_lo * tg_m, bin_hi * tg_m]` span lies
//! inside the window is copied from source to target; nothing else in the
//! target changes.

pub mod data;
pub mod error;
pub mod fits;
pub mod splice;
pub mod store;

pub use data::mask::{ChannelMask, WavelengthWindow};
pub use data::model::{RowSplice, SpliceReport};
pub use error::{ErrorCategory, Result, SpliceError};
pub use splice::{SpliceOptions, splice, splice_files, splice_tables};
pub use store::{CommitMode, OpenMode, SpectrumStore, open_store};
