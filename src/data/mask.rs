use crate::error::{Result, SpliceError};

// ---------------------------------------------------------------------------
// WavelengthWindow – the closed interval selecting channels
// ---------------------------------------------------------------------------

/// Closed wavelength interval `[low, high]` with `low < high`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WavelengthWindow {
    low: f64,
    high: f64,
}

impl WavelengthWindow {
    /// Rejects `low >= high`, and NaN on either side since the comparison
    /// cannot hold.
    pub fn new(low: f64, high: f64) -> Result<Self> {
        if low < high {
            Ok(Self { low, high })
        } else {
            Err(SpliceError::InvalidWindow { low, high })
        }
    }

    pub fn low(&self) -> f64 {
        self.low
    }

    pub fn high(&self) -> f64 {
        self.high
    }

    /// Whether the channel span `[lo, hi]` lies entirely inside the window.
    /// Both edges are inclusive; partial overlap does not count.
    pub fn contains_span(&self, lo: f64, hi: f64) -> bool {
        lo >= self.low && hi <= self.high
    }
}

// ---------------------------------------------------------------------------
// Order scaling
// ---------------------------------------------------------------------------

/// Convert bin boundaries to physical wavelength for diffraction order
/// `tg_m` (`m * lambda`).
pub fn scale_by_order(bins: &[f64], tg_m: i64) -> Vec<f64> {
    let m = tg_m as f64;
    bins.iter().map(|&b| b * m).collect()
}

// ---------------------------------------------------------------------------
// ChannelMask – which channels of one row get spliced
// ---------------------------------------------------------------------------

/// Boolean selection over the channels of one row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelMask {
    selected: Vec<bool>,
}

impl ChannelMask {
    /// Select channel `c` when `[mlam_lo[c], mlam_hi[c]]` is inside `window`.
    ///
    /// Both slices must have the same length.
    pub fn from_spans(mlam_lo: &[f64], mlam_hi: &[f64], window: &WavelengthWindow) -> Self {
        debug_assert_eq!(mlam_lo.len(), mlam_hi.len());
        let selected = mlam_lo
            .iter()
            .zip(mlam_hi)
            .map(|(&lo, &hi)| window.contains_span(lo, hi))
            .collect();
        ChannelMask { selected }
    }

    /// Build the mask for a row straight from its bins and order.
    pub fn for_row(bin_lo: &[f64], bin_hi: &[f64], tg_m: i64, window: &WavelengthWindow) -> Self {
        let mlam_lo = scale_by_order(bin_lo, tg_m);
        let mlam_hi = scale_by_order(bin_hi, tg_m);
        Self::from_spans(&mlam_lo, &mlam_hi, window)
    }

    pub fn len(&self) -> usize {
        self.selected.len()
    }

    pub fn is_empty(&self) -> bool {
        self.selected.is_empty()
    }

    pub fn is_selected(&self, channel: usize) -> bool {
        self.selected.get(channel).copied().unwrap_or(false)
    }

    /// Number of selected channels.
    pub fn count(&self) -> usize {
        self.selected.iter().filter(|&&s| s).count()
    }

    /// Indices of the selected channels, ascending.
    pub fn indices(&self) -> impl Iterator<Item = usize> + '_ {
        self.selected
            .iter()
            .enumerate()
            .filter(|(_, &s)| s)
            .map(|(i, _)| i)
    }

    /// `dst[c] = src[c]` for every selected channel; returns how many were
    /// copied. Channels beyond the shorter slice are ignored.
    pub fn apply(&self, dst: &mut [f64], src: &[f64]) -> usize {
        let mut copied = 0;
        for c in self.indices() {
            if let (Some(d), Some(&s)) = (dst.get_mut(c), src.get(c)) {
                *d = s;
                copied += 1;
            }
        }
        copied
    }
}
