use log::{debug, log_enabled, Level};
use ndarray::{Array2, ArrayBase, ArrayView2, DataMut, Ix2, Zip};

use crate::{alloc, is_missing, DataType, PccError};

/// An operand after missing-value classification.
///
/// `values` is the zero-filled data, `mask` holds 1.0 where the original
/// element was present and 0.0 where it was missing. `unit` carries the same
/// numbers as `mask` but is kept as its own buffer: it is the multiplicand
/// that restricts the *other* operand's sums to positions valid here.
pub struct MaskedOperand<'a> {
    pub values: ArrayView2<'a, DataType>,
    pub mask: Array2<DataType>,
    pub unit: Array2<DataType>,
}

impl MaskedOperand<'_> {
    pub fn nrows(&self) -> usize {
        self.values.nrows()
    }

    /// Length of the contraction axis.
    pub fn ncols(&self) -> usize {
        self.values.ncols()
    }

    /// Number of entries that were missing before zero-filling.
    pub fn missing_count(&self) -> usize {
        self.mask.iter().filter(|&&m| m == 0.0).count()
    }
}

/// Classify every element of `data`, replacing missing entries with `0.0` in
/// place.
///
/// After this call the positions of the missing entries survive only in the
/// returned mask. Running it again on the same data finds nothing missing and
/// leaves the data as it is.
pub fn build_masks<S>(data: &mut ArrayBase<S, Ix2>) -> Result<MaskedOperand<'_>, PccError>
where
    S: DataMut<Elem = DataType>,
{
    let (rows, cols) = data.dim();
    let mut mask = alloc::zeroed("presence mask", rows, cols)?;
    let mut unit = alloc::zeroed("unit matrix", rows, cols)?;

    Zip::from(&mut *data)
        .and(&mut mask)
        .and(&mut unit)
        .par_for_each(|x, m, u| {
            if is_missing(*x) {
                *x = 0.0;
            } else {
                *m = 1.0;
                *u = 1.0;
            }
        });

    let data: &ArrayBase<S, Ix2> = data;
    let masked = MaskedOperand {
        values: data.view(),
        mask,
        unit,
    };
    if log_enabled!(Level::Debug) {
        debug!(
            "masked {}x{} operand: {} missing entries",
            rows,
            cols,
            masked.missing_count()
        );
    }
    Ok(masked)
}
