//! Minimal FITS support: enough of the standard to locate a binary table
//! extension by name, address its rows and columns in place, and write new
//! spectrum files.
//!
//! ```text
//!  primary HDU │ ext HDU 1 │ ext HDU 2 ('SPECTRUM', BINTABLE) │ ...
//!  ┌────────┬──────┐┌────────┬──────┐┌────────┬───────────────────────┐
//!  │ header │ data ││ header │ data ││ header │ row 0 │ row 1 │ ...   │
//!  └────────┴──────┘└────────┴──────┘└────────┴───────────────────────┘
//!   each part padded to 2880-byte blocks, values big-endian
//! ```

pub mod bintable;
pub mod header;
pub mod writer;

use anyhow::{Context, Result, bail, ensure};

use bintable::BinTableLayout;
use header::{BLOCK_LEN, CardValue, Header};

/// A binary table found inside a FITS byte stream.
#[derive(Debug, Clone)]
pub struct LocatedTable {
    pub header: Header,
    pub layout: BinTableLayout,
    /// Absolute byte offset of the first row.
    pub data_offset: usize,
}

/// Walk the HDUs of `bytes` and return the first `BINTABLE` extension
/// whose `EXTNAME` matches `extname`, ignoring case.
pub fn find_bintable(bytes: &[u8], extname: &str) -> Result<LocatedTable> {
    let primary = Header::parse(bytes).context("reading primary header")?;
    ensure!(
        primary.get("SIMPLE") == Some(&CardValue::Logical(true)),
        "not a FITS file: primary header lacks SIMPLE = T"
    );

    let mut offset = next_hdu(0, &primary)?;
    let mut index = 1;
    while offset < bytes.len() {
        let header = Header::parse(&bytes[offset..])
            .with_context(|| format!("reading header of HDU {index}"))?;
        let data_offset = offset + header.byte_len();

        let is_bintable = header.text("XTENSION").map(str::trim) == Some("BINTABLE");
        let name_matches = header
            .text("EXTNAME")
            .is_some_and(|n| n.trim().eq_ignore_ascii_case(extname));

        if is_bintable && name_matches {
            let layout = BinTableLayout::from_header(&header)
                .with_context(|| format!("reading layout of table '{extname}'"))?;
            let end = data_offset
                .checked_add(layout.data_len()?)
                .context("table size overflows")?;
            ensure!(
                end <= bytes.len(),
                "table '{extname}' is truncated: {} rows of {} bytes do not fit in the file",
                layout.num_rows,
                layout.row_len
            );
            return Ok(LocatedTable {
                header,
                layout,
                data_offset,
            });
        }

        offset = next_hdu(offset, &header)?;
        index += 1;
    }

    bail!("no BINTABLE extension named '{extname}'")
}

/// Offset of the HDU after the one whose header starts at `offset`.
fn next_hdu(offset: usize, header: &Header) -> Result<usize> {
    let data_len = header.data_len()?;
    data_len
        .checked_next_multiple_of(BLOCK_LEN)
        .and_then(|padded| offset.checked_add(header.byte_len())?.checked_add(padded))
        .context("HDU size overflows")
}
