use std::path::Path;

use log::info;
use ndarray::Array2;
use rand::{rngs::StdRng, SeedableRng};

use crate::{alloc, io, DataType, PccError};

/// Shapes and seed used when an operand file has to be synthesized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperandsConfig {
    /// Rows of A.
    pub m: usize,
    /// Shared sample count.
    pub n: usize,
    /// Rows of B.
    pub p: usize,
    /// A is drawn from `seed`, B from `seed + 1`.
    pub seed: u64,
}

impl Default for OperandsConfig {
    fn default() -> Self {
        OperandsConfig {
            m: 64,
            n: 16,
            p: 32,
            seed: 1,
        }
    }
}

/// How B's stored shape relates to the `p x n` layout the engine expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BLayout {
    /// Stored `p x n`.
    RowsAreVectors,
    /// Stored `n x p`; must be transposed first.
    ColumnsAreVectors,
}

/// Decide B's layout from A's sample count `n` and B's stored shape.
pub fn reconcile_b_shape(n: usize, b_rows: usize, b_cols: usize) -> Result<BLayout, PccError> {
    if b_cols == n {
        Ok(BLayout::RowsAreVectors)
    } else if b_rows == n {
        Ok(BLayout::ColumnsAreVectors)
    } else {
        Err(PccError::ShapeMismatch {
            what: "B",
            actual_rows: b_rows,
            actual_cols: b_cols,
            expected: format!("{} rows or columns to match A", n),
        })
    }
}

/// A and B ready for the correlation engine: both have the samples on the
/// trailing axis.
pub struct Operands {
    pub a: Array2<DataType>,
    pub b: Array2<DataType>,
    pub b_transposed: bool,
    pub a_synthesized: bool,
    pub b_synthesized: bool,
}

impl Operands {
    /// `(m, n, p)`
    pub fn dims(&self) -> (usize, usize, usize) {
        (self.a.nrows(), self.a.ncols(), self.b.nrows())
    }
}

/// Load A and B from their files, synthesizing any that do not exist, and
/// bring B into `p x n` layout.
pub fn load_operands(
    path_a: impl AsRef<Path>,
    path_b: impl AsRef<Path>,
    config: &OperandsConfig,
) -> Result<Operands, PccError> {
    let mut rng_a = StdRng::seed_from_u64(config.seed);
    let (a, a_synthesized) = io::load_or_synthesize(path_a, config.m, config.n, &mut rng_a)?;
    let n = a.ncols();

    let mut rng_b = StdRng::seed_from_u64(config.seed.wrapping_add(1));
    let (b, b_synthesized) = io::load_or_synthesize(path_b, config.p, n, &mut rng_b)?;

    let (b, b_transposed) = match reconcile_b_shape(n, b.nrows(), b.ncols())? {
        BLayout::RowsAreVectors => (b, false),
        BLayout::ColumnsAreVectors => {
            info!(
                "transposing {}x{} B so samples lie on the trailing axis",
                b.nrows(),
                b.ncols()
            );
            (alloc::copied("transposed B", &b.t())?, true)
        }
    };

    Ok(Operands {
        a,
        b,
        b_transposed,
        a_synthesized,
        b_synthesized,
    })
}
