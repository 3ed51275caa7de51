pub mod alloc;
pub mod error;
pub mod io;
pub mod mask;
pub mod naive;
pub mod operands;
pub mod pearson;

pub use error::PccError;
pub use mask::{build_masks, MaskedOperand};
pub use operands::{load_operands, reconcile_b_shape, BLayout, Operands, OperandsConfig};
pub use pearson::{
    correlation_cross_matrix, correlation_cross_matrix_in_place, correlation_cross_matrix_into,
    correlation_matrix, Accumulators,
};

/// Element type of every matrix in the crate.
#[cfg(not(feature = "single-precision"))]
pub type DataType = f64;

/// Element type of every matrix in the crate.
#[cfg(feature = "single-precision")]
pub type DataType = f32;

/// Sentinel marking an absent observation.
pub const MISSING: DataType = DataType::NAN;

/// Returns true when `value` is the missing-value sentinel.
#[inline]
pub fn is_missing(value: DataType) -> bool {
    value.is_nan()
}
