use ndarray::{Array2, ArrayBase, Data, Ix2};

use crate::{DataType, PccError};

/// Allocate a zero-filled `rows x cols` matrix, reporting exhaustion instead
/// of aborting the process.
pub fn zeroed(what: &'static str, rows: usize, cols: usize) -> Result<Array2<DataType>, PccError> {
    let fail = || PccError::Allocation { what, rows, cols };
    let len = rows.checked_mul(cols).ok_or_else(fail)?;

    let mut buf: Vec<DataType> = Vec::new();
    buf.try_reserve_exact(len).map_err(|_| fail())?;
    buf.resize(len, 0.0);

    Array2::from_shape_vec((rows, cols), buf).map_err(|_| fail())
}

/// Fallible copy of `src` into a fresh standard-layout matrix.
pub fn copied<S>(what: &'static str, src: &ArrayBase<S, Ix2>) -> Result<Array2<DataType>, PccError>
where
    S: Data<Elem = DataType>,
{
    let (rows, cols) = src.dim();
    let mut out = zeroed(what, rows, cols)?;
    out.assign(src);
    Ok(out)
}
