// Pearson correlation between every row of A and every row of B, with
// missing entries excluded pairwise.
//
// For one row pair over the N positions valid in both rows:
//   r = (N Σxy - Σx Σy) / sqrt((N Σx² - (Σx)²) (N Σy² - (Σy)²))
// Every restricted sum is a product against a 0/1 matrix once missing
// entries are zero-filled, so the whole m x p grid costs five GEMMs plus
// elementwise work.

use log::{debug, trace};
use ndarray::linalg::general_mat_mul;
use ndarray::{Array2, ArrayBase, ArrayView2, Data, DataMut, Ix2, Zip};

use crate::mask::{build_masks, MaskedOperand};
use crate::{alloc, DataType, PccError};

/// Per-cell sums over the positions valid in both rows.
///
/// Every matrix is `m x p`.
pub struct Accumulators {
    /// Jointly valid positions.
    pub n: Array2<DataType>,
    pub sa: Array2<DataType>,
    pub sb: Array2<DataType>,
    pub saa: Array2<DataType>,
    pub sbb: Array2<DataType>,
    pub sab: Array2<DataType>,
}

/// `left . right^T`, contracting over the trailing axis of both operands.
fn gemm_nt(
    what: &'static str,
    left: &ArrayView2<'_, DataType>,
    right: &ArrayView2<'_, DataType>,
) -> Result<Array2<DataType>, PccError> {
    let mut out = alloc::zeroed(what, left.nrows(), right.nrows())?;
    general_mat_mul(1.0, left, &right.t(), 0.0, &mut out);
    debug!(
        "{}: {}x{} . ({}x{})^T",
        what,
        left.nrows(),
        left.ncols(),
        right.nrows(),
        right.ncols()
    );
    trace!("{} =\n{}", what, out);
    Ok(out)
}

fn squared(what: &'static str, x: &ArrayView2<'_, DataType>) -> Result<Array2<DataType>, PccError> {
    let (rows, cols) = x.dim();
    let mut out = alloc::zeroed(what, rows, cols)?;
    Zip::from(&mut out).and(x).par_for_each(|o, &v| *o = v * v);
    Ok(out)
}

fn check_contraction(a_cols: usize, b_rows: usize, b_cols: usize) -> Result<(), PccError> {
    if a_cols != b_cols {
        return Err(PccError::ShapeMismatch {
            what: "B",
            actual_rows: b_rows,
            actual_cols: b_cols,
            expected: format!("{} columns to match A", a_cols),
        });
    }
    Ok(())
}

impl Accumulators {
    /// Run the five GEMM stages.
    ///
    /// Both operands must already be zero-filled, so a missing entry adds
    /// nothing to `SAB` and the unit matrices restrict the other sums.
    pub fn compute(a: &MaskedOperand<'_>, b: &MaskedOperand<'_>) -> Result<Self, PccError> {
        check_contraction(a.ncols(), b.nrows(), b.ncols())?;

        let n = gemm_nt("N", &a.mask.view(), &b.mask.view())?;

        let aa = squared("AA", &a.values)?;
        let bb = squared("BB", &b.values)?;

        let sa = gemm_nt("SA", &a.values, &b.unit.view())?;
        let sb = gemm_nt("SB", &a.unit.view(), &b.values)?;

        let saa = gemm_nt("SAA", &aa.view(), &b.unit.view())?;
        let sbb = gemm_nt("SBB", &a.unit.view(), &bb.view())?;
        drop(aa);
        drop(bb);

        let sab = gemm_nt("SAB", &a.values, &b.values)?;

        Ok(Accumulators {
            n,
            sa,
            sb,
            saa,
            sbb,
            sab,
        })
    }

    pub fn dim(&self) -> (usize, usize) {
        self.n.dim()
    }

    /// Assemble the coefficients into `out`, consuming the sums.
    ///
    /// The numerator and the two variance terms are built in place in the
    /// `sab`, `saa` and `sbb` buffers.
    pub fn combine_into<S>(self, out: &mut ArrayBase<S, Ix2>) -> Result<(), PccError>
    where
        S: DataMut<Elem = DataType>,
    {
        let (m, p) = self.dim();
        if out.dim() != (m, p) {
            return Err(PccError::ShapeMismatch {
                what: "output",
                actual_rows: out.nrows(),
                actual_cols: out.ncols(),
                expected: format!("{}x{}", m, p),
            });
        }

        let Accumulators {
            n,
            sa,
            sb,
            mut saa,
            mut sbb,
            mut sab,
        } = self;

        // N*SAB - SA*SB
        Zip::from(&mut sab)
            .and(&n)
            .and(&sa)
            .and(&sb)
            .par_for_each(|num, &cnt, &sa, &sb| *num = cnt * *num - sa * sb);

        // N*SAA - SA^2 and N*SBB - SB^2
        Zip::from(&mut saa)
            .and(&n)
            .and(&sa)
            .par_for_each(|da, &cnt, &s| *da = variance_term(cnt, *da, s));
        Zip::from(&mut sbb)
            .and(&n)
            .and(&sb)
            .par_for_each(|db, &cnt, &s| *db = variance_term(cnt, *db, s));
        drop(sa);
        drop(sb);
        trace!("NUM =\n{}", sab);

        Zip::from(out)
            .and(&n)
            .and(&sab)
            .and(&saa)
            .and(&sbb)
            .par_for_each(|r, &cnt, &num, &da, &db| *r = coefficient(cnt, num, da, db));

        Ok(())
    }
}

/// Multiple of `count * EPSILON` under which a restricted variance, relative
/// to the sum of squares it came from, is rounding residue.
const VARIANCE_NOISE_FACTOR: DataType = 4.0;

/// Largest centered sum of squares that still counts as zero variance for
/// `count` observations whose raw sum of squares is `sum_sq`.
///
/// Summing `count` terms leaves an error of up to a few `count * EPSILON`
/// times `sum_sq`, so a constant row like `0.1` never cancels exactly.
#[inline]
pub fn zero_variance_cutoff(count: DataType, sum_sq: DataType) -> DataType {
    VARIANCE_NOISE_FACTOR * DataType::EPSILON * count * sum_sq
}

/// `N*SAA - SA^2`, or exactly 0 when it is within rounding of zero.
#[inline]
fn variance_term(count: DataType, sum_sq: DataType, sum: DataType) -> DataType {
    let scaled = count * sum_sq;
    let term = scaled - sum * sum;
    if term <= zero_variance_cutoff(count, scaled) {
        0.0
    } else {
        term
    }
}

/// One correlation cell from its count, numerator and variance terms.
///
/// Fewer than two joint observations, or a zero restricted variance, yields
/// 0. Otherwise the result is clamped to `[-1, 1]`.
#[inline]
pub fn coefficient(count: DataType, num: DataType, da: DataType, db: DataType) -> DataType {
    if count < 2.0 || da <= 0.0 || db <= 0.0 {
        return 0.0;
    }
    (num / (da.sqrt() * db.sqrt())).clamp(-1.0, 1.0)
}

/// Correlate rows of `a` (m x n) with rows of `b` (p x n) into a caller-owned
/// `m x p` buffer.
///
/// Missing entries of `a` and `b` are overwritten with `0.0`.
pub fn correlation_cross_matrix_into<S1, S2, S3>(
    a: &mut ArrayBase<S1, Ix2>,
    b: &mut ArrayBase<S2, Ix2>,
    out: &mut ArrayBase<S3, Ix2>,
) -> Result<(), PccError>
where
    S1: DataMut<Elem = DataType>,
    S2: DataMut<Elem = DataType>,
    S3: DataMut<Elem = DataType>,
{
    check_contraction(a.ncols(), b.nrows(), b.ncols())?;
    if out.dim() != (a.nrows(), b.nrows()) {
        return Err(PccError::ShapeMismatch {
            what: "output",
            actual_rows: out.nrows(),
            actual_cols: out.ncols(),
            expected: format!("{}x{}", a.nrows(), b.nrows()),
        });
    }

    let masked_a = build_masks(a)?;
    let masked_b = build_masks(b)?;
    let acc = Accumulators::compute(&masked_a, &masked_b)?;
    drop(masked_a);
    drop(masked_b);

    acc.combine_into(out)
}

/// Like [`correlation_cross_matrix_into`] but allocates the result.
pub fn correlation_cross_matrix_in_place<S1, S2>(
    a: &mut ArrayBase<S1, Ix2>,
    b: &mut ArrayBase<S2, Ix2>,
) -> Result<Array2<DataType>, PccError>
where
    S1: DataMut<Elem = DataType>,
    S2: DataMut<Elem = DataType>,
{
    check_contraction(a.ncols(), b.nrows(), b.ncols())?;
    let mut corr = alloc::zeroed("correlation matrix", a.nrows(), b.nrows())?;
    correlation_cross_matrix_into(a, b, &mut corr)?;
    Ok(corr)
}

/// Correlate rows of `lhs` with rows of `rhs`, leaving both inputs untouched.
pub fn correlation_cross_matrix<S1, S2>(
    lhs: &ArrayBase<S1, Ix2>,
    rhs: &ArrayBase<S2, Ix2>,
) -> Result<Array2<DataType>, PccError>
where
    S1: Data<Elem = DataType>,
    S2: Data<Elem = DataType>,
{
    check_contraction(lhs.ncols(), rhs.nrows(), rhs.ncols())?;
    let mut a = alloc::copied("A", lhs)?;
    let mut b = alloc::copied("B", rhs)?;
    correlation_cross_matrix_in_place(&mut a, &mut b)
}

/// Correlation between every pair of rows of `data`. The result is symmetric.
pub fn correlation_matrix<S>(data: &ArrayBase<S, Ix2>) -> Result<Array2<DataType>, PccError>
where
    S: Data<Elem = DataType>,
{
    let mut a = alloc::copied("A", data)?;
    let masked = build_masks(&mut a)?;
    let acc = Accumulators::compute(&masked, &masked)?;
    drop(masked);

    let rows = acc.dim().0;
    let mut corr = alloc::zeroed("correlation matrix", rows, rows)?;
    acc.combine_into(&mut corr)?;
    Ok(corr)
}
