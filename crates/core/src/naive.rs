use ndarray::{Array2, ArrayBase, ArrayView1, Data, Ix2};
use rayon::prelude::*;

use crate::pearson::zero_variance_cutoff;
use crate::{alloc, is_missing, DataType, PccError};

/// Pearson correlation of two rows over the positions where neither is
/// missing, computed with a mean pass followed by a centered pass.
///
/// Returns 0 when fewer than two positions are valid or either restricted
/// row is constant up to rounding, using the same cutoff as the GEMM path.
pub fn pair(x: ArrayView1<'_, DataType>, y: ArrayView1<'_, DataType>) -> DataType {
    let mut count = 0usize;
    let mut sum_x = 0.0;
    let mut sum_y = 0.0;
    let mut sq_x = 0.0;
    let mut sq_y = 0.0;
    for (&xv, &yv) in x.iter().zip(y.iter()) {
        if !is_missing(xv) && !is_missing(yv) {
            count += 1;
            sum_x += xv;
            sum_y += yv;
            sq_x += xv * xv;
            sq_y += yv * yv;
        }
    }
    if count < 2 {
        return 0.0;
    }

    let mean_x = sum_x / count as DataType;
    let mean_y = sum_y / count as DataType;
    let mut cov = 0.0;
    let mut ss_x = 0.0;
    let mut ss_y = 0.0;
    for (&xv, &yv) in x.iter().zip(y.iter()) {
        if !is_missing(xv) && !is_missing(yv) {
            let dx = xv - mean_x;
            let dy = yv - mean_y;
            cov += dx * dy;
            ss_x += dx * dx;
            ss_y += dy * dy;
        }
    }

    let count = count as DataType;
    if ss_x <= zero_variance_cutoff(count, sq_x) || ss_y <= zero_variance_cutoff(count, sq_y) {
        return 0.0;
    }
    (cov / (ss_x.sqrt() * ss_y.sqrt())).clamp(-1.0, 1.0)
}

/// Row-by-row reference for [`crate::pearson::correlation_cross_matrix`].
///
/// Inputs are read as-is; missing entries are skipped per pair.
pub fn correlation_cross_matrix<S1, S2>(
    lhs: &ArrayBase<S1, Ix2>,
    rhs: &ArrayBase<S2, Ix2>,
) -> Result<Array2<DataType>, PccError>
where
    S1: Data<Elem = DataType> + Sync,
    S2: Data<Elem = DataType> + Sync,
{
    let (lhs_rows, lhs_cols) = lhs.dim();
    let (rhs_rows, rhs_cols) = rhs.dim();
    if lhs_cols != rhs_cols {
        return Err(PccError::ShapeMismatch {
            what: "B",
            actual_rows: rhs_rows,
            actual_cols: rhs_cols,
            expected: format!("{} columns to match A", lhs_cols),
        });
    }

    let mut corr = alloc::zeroed("correlation matrix", lhs_rows, rhs_rows)?;
    corr.axis_iter_mut(ndarray::Axis(0))
        .into_par_iter()
        .enumerate()
        .for_each(|(i, mut out_row)| {
            let row_i = lhs.row(i);
            for j in 0..rhs_rows {
                out_row[j] = pair(row_i, rhs.row(j));
            }
        });

    Ok(corr)
}
