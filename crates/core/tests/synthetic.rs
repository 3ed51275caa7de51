use approx::assert_abs_diff_eq;
use mpcc::{
    build_masks, correlation_cross_matrix, correlation_cross_matrix_in_place,
    correlation_cross_matrix_into, correlation_matrix, naive, Accumulators, DataType, PccError,
    MISSING,
};
use ndarray::{array, Array2};
use rand::{rngs::StdRng, Rng, SeedableRng};

#[cfg(not(feature = "single-precision"))]
const TOL: DataType = 1e-9;
#[cfg(feature = "single-precision")]
const TOL: DataType = 1e-4;

fn random_matrix(rows: usize, cols: usize, missing_rate: f64, seed: u64) -> Array2<DataType> {
    let mut rng = StdRng::seed_from_u64(seed);
    Array2::from_shape_fn((rows, cols), |_| {
        if rng.gen::<f64>() < missing_rate {
            MISSING
        } else {
            rng.gen::<DataType>() * 10.0 - 5.0
        }
    })
}

fn assert_all_close(lhs: &Array2<DataType>, rhs: &Array2<DataType>) {
    assert_eq!(lhs.dim(), rhs.dim());
    for ((idx, &l), &r) in lhs.indexed_iter().zip(rhs.iter()) {
        assert!((l - r).abs() <= TOL, "cell {:?}: {} vs {}", idx, l, r);
    }
}

#[test]
fn perfect_negative_correlation_with_missing_entry() {
    let a = array![[1.0, 2.0, 3.0], [4.0, 5.0, MISSING]];
    let b = array![[3.0, 2.0, 1.0]];

    let p = correlation_cross_matrix(&a, &b).expect("correlation");
    assert_eq!(p.dim(), (2, 1));
    assert_abs_diff_eq!(p[[0, 0]], -1.0, epsilon = TOL);
    assert_abs_diff_eq!(p[[1, 0]], -1.0, epsilon = TOL);
}

#[test]
fn matches_pairwise_reference_without_missing_data() {
    let a = random_matrix(7, 20, 0.0, 11);
    let b = random_matrix(5, 20, 0.0, 12);

    let fast = correlation_cross_matrix(&a, &b).expect("matrix method");
    let slow = naive::correlation_cross_matrix(&a, &b).expect("naive method");
    assert_all_close(&fast, &slow);
}

#[test]
fn matches_pairwise_reference_with_missing_data() {
    let a = random_matrix(9, 30, 0.15, 21);
    let b = random_matrix(6, 30, 0.15, 22);

    let fast = correlation_cross_matrix(&a, &b).expect("matrix method");
    let slow = naive::correlation_cross_matrix(&a, &b).expect("naive method");
    assert_all_close(&fast, &slow);
}

#[test]
fn joint_counts_stay_within_sample_count() {
    let mut a = random_matrix(6, 12, 0.2, 31);
    let mut b = random_matrix(4, 12, 0.2, 32);
    a.row_mut(0).fill(1.5);
    b.row_mut(0).fill(-0.5);
    let complete_a: Vec<bool> = a.rows().into_iter().map(|r| r.iter().all(|v| !v.is_nan())).collect();
    let complete_b: Vec<bool> = b.rows().into_iter().map(|r| r.iter().all(|v| !v.is_nan())).collect();

    let masked_a = build_masks(&mut a).expect("mask A");
    let masked_b = build_masks(&mut b).expect("mask B");
    let acc = Accumulators::compute(&masked_a, &masked_b).expect("accumulate");

    assert_eq!(acc.dim(), (6, 4));
    for ((i, j), &count) in acc.n.indexed_iter() {
        assert!(count >= 0.0 && count <= 12.0, "N[{},{}] = {}", i, j, count);
        if complete_a[i] && complete_b[j] {
            assert_eq!(count, 12.0);
        }
    }
    assert_eq!(acc.n[[0, 0]], 12.0);
}

#[test]
fn coefficients_are_bounded() {
    let mut a = random_matrix(10, 25, 0.1, 41);
    let mut b = random_matrix(8, 25, 0.1, 42);
    // Rows that are constant, or vary far below their magnitude, cancel
    // almost completely in the variance terms.
    a.row_mut(0).fill(0.3);
    for (k, v) in a.row_mut(1).iter_mut().enumerate() {
        *v = 0.1 + 1e-7 * k as DataType;
    }
    for (k, v) in b.row_mut(0).iter_mut().enumerate() {
        *v = 0.7 - 1e-7 * k as DataType;
    }
    b.row_mut(1).fill(0.123456789);

    let p = correlation_cross_matrix(&a, &b).expect("correlation");
    let slow = naive::correlation_cross_matrix(&a, &b).expect("naive method");
    for (&r, &q) in p.iter().zip(slow.iter()) {
        assert!(r.is_finite() && q.is_finite());
        assert!(r.abs() <= 1.0, "coefficient {} out of range", r);
        assert!(q.abs() <= 1.0, "reference coefficient {} out of range", q);
    }
    assert_eq!(p.row(0).to_vec(), vec![0.0; 8]);
    assert_eq!(p.column(1).to_vec(), vec![0.0; 10]);
}

#[test]
fn self_correlation_is_symmetric_with_unit_diagonal() {
    let data = random_matrix(8, 16, 0.1, 51);

    let p = correlation_matrix(&data).expect("correlation");
    assert_eq!(p.dim(), (8, 8));
    for i in 0..8 {
        assert_abs_diff_eq!(p[[i, i]], 1.0, epsilon = TOL);
        for j in 0..8 {
            assert_abs_diff_eq!(p[[i, j]], p[[j, i]], epsilon = TOL);
        }
    }

    let cross = correlation_cross_matrix(&data, &data).expect("cross correlation");
    assert_all_close(&p, &cross);
}

#[test]
fn constant_rows_yield_zero() {
    let a = array![[2.0, 2.0, 2.0, 2.0], [1.0, 2.0, 3.0, 4.0]];
    let b = array![[5.0, 5.0, 5.0, 5.0], [4.0, 1.0, 3.0, 2.0]];

    let p = correlation_cross_matrix(&a, &b).expect("correlation");
    assert_eq!(p[[0, 0]], 0.0);
    assert_eq!(p[[0, 1]], 0.0);
    assert_eq!(p[[1, 0]], 0.0);
    assert!(p.iter().all(|v| v.is_finite()));
}

/// Row 0 repeats `value`, row 1 is a ramp. With `gaps`, two entries of each
/// row are missing.
fn constant_and_ramp(value: DataType, n: usize, gaps: bool, descending: bool) -> Array2<DataType> {
    Array2::from_shape_fn((2, n), |(row, col)| {
        if gaps && (col == 1 || col == n - 2) {
            return MISSING;
        }
        match (row, descending) {
            (0, _) => value,
            (_, false) => col as DataType,
            (_, true) => (n - col) as DataType * 0.5,
        }
    })
}

#[test]
fn inexact_constant_rows_yield_zero() {
    for &n in &[7usize, 10, 13, 100] {
        for &value in &[0.1, 0.3, 0.7, 0.123456789] {
            for &gaps in &[false, true] {
                let a = constant_and_ramp(value, n, gaps, false);
                let b = constant_and_ramp(0.17, n, false, true);
                let case = format!("value {} n {} gaps {}", value, n, gaps);

                let p = correlation_cross_matrix(&a, &b).expect("correlation");
                assert_eq!(p[[0, 0]], 0.0, "{}", case);
                assert_eq!(p[[0, 1]], 0.0, "{}", case);
                assert_eq!(p[[1, 0]], 0.0, "{}", case);
                assert_abs_diff_eq!(p[[1, 1]], -1.0, epsilon = TOL);
                assert!(p.iter().all(|r| r.abs() <= 1.0), "{}: {}", case, p);

                let slow = naive::correlation_cross_matrix(&a, &b).expect("naive method");
                assert_eq!(slow[[0, 0]], 0.0, "{}", case);
                assert_eq!(slow[[0, 1]], 0.0, "{}", case);
                assert_eq!(slow[[1, 0]], 0.0, "{}", case);

                let own = correlation_matrix(&a).expect("self correlation");
                assert_eq!(own[[0, 0]], 0.0, "{}", case);
                assert_eq!(own[[0, 1]], 0.0, "{}", case);
                assert_abs_diff_eq!(own[[1, 1]], 1.0, epsilon = TOL);
            }
        }
    }
}

#[test]
fn single_joint_observation_yields_zero() {
    let a = array![[MISSING, MISSING, 7.0, MISSING], [1.0, 2.0, 4.0, 8.0]];
    let b = array![[3.0, 1.0, 2.0, 9.0]];

    let p = correlation_cross_matrix(&a, &b).expect("correlation");
    assert_eq!(p[[0, 0]], 0.0);
    assert!(p[[1, 0]] != 0.0);
}

#[test]
fn fully_missing_row_yields_zero() {
    let a = array![[MISSING, MISSING, MISSING], [1.0, 3.0, 2.0]];
    let b = array![[1.0, 2.0, 3.0], [MISSING, MISSING, MISSING]];

    let p = correlation_cross_matrix(&a, &b).expect("correlation");
    assert_eq!(p[[0, 0]], 0.0);
    assert_eq!(p[[0, 1]], 0.0);
    assert_eq!(p[[1, 1]], 0.0);
    assert_abs_diff_eq!(p[[1, 0]], 0.5, epsilon = TOL);
}

#[test]
fn mismatched_sample_counts_are_rejected() {
    let a = Array2::<DataType>::zeros((3, 4));
    let b = Array2::<DataType>::zeros((2, 5));

    let err = correlation_cross_matrix(&a, &b).unwrap_err();
    assert!(matches!(err, PccError::ShapeMismatch { what: "B", .. }));
    assert_eq!(err.code(), 2);

    let err = naive::correlation_cross_matrix(&a, &b).unwrap_err();
    assert!(matches!(err, PccError::ShapeMismatch { .. }));
}

#[test]
fn caller_buffer_must_match_result_shape() {
    let mut a = random_matrix(3, 6, 0.0, 61);
    let mut b = random_matrix(2, 6, 0.0, 62);

    let mut wrong = Array2::<DataType>::zeros((2, 3));
    let err = correlation_cross_matrix_into(&mut a, &mut b, &mut wrong).unwrap_err();
    assert!(matches!(err, PccError::ShapeMismatch { what: "output", .. }));

    let mut out = Array2::<DataType>::zeros((3, 2));
    correlation_cross_matrix_into(&mut a, &mut b, &mut out).expect("correlation");
    let expected = naive::correlation_cross_matrix(&a, &b).expect("naive");
    assert_all_close(&out, &expected);
}

#[test]
fn borrowed_inputs_are_untouched_but_in_place_inputs_are_zero_filled() {
    let a = array![[1.0, MISSING, 3.0, 4.0]];
    let b = array![[MISSING, 2.0, 1.0, 0.5]];

    let borrowed = correlation_cross_matrix(&a, &b).expect("correlation");
    assert!(a[[0, 1]].is_nan());
    assert!(b[[0, 0]].is_nan());

    let mut a_owned = a.clone();
    let mut b_owned = b.clone();
    let in_place = correlation_cross_matrix_in_place(&mut a_owned, &mut b_owned).expect("correlation");
    assert_eq!(a_owned[[0, 1]], 0.0);
    assert_eq!(b_owned[[0, 0]], 0.0);
    assert_all_close(&borrowed, &in_place);
}

#[test]
fn masking_twice_finds_nothing_missing() {
    let mut data = array![[1.0, MISSING], [MISSING, 4.0]];
    {
        let first = build_masks(&mut data).expect("mask");
        assert_eq!(first.missing_count(), 2);
        assert_eq!(first.mask, array![[1.0, 0.0], [0.0, 1.0]]);
        assert_eq!(first.unit, first.mask);
    }
    assert_eq!(data, array![[1.0, 0.0], [0.0, 4.0]]);

    let second = build_masks(&mut data).expect("mask");
    assert_eq!(second.missing_count(), 0);
    assert!(second.mask.iter().all(|&v| v == 1.0));
    assert!(second.unit.iter().all(|&v| v == 1.0));
    drop(second);
    assert_eq!(data, array![[1.0, 0.0], [0.0, 4.0]]);
}

#[test]
fn missing_count_is_exact_for_wide_operands() {
    let cols = 1 << 12;
    let mut data = Array2::<DataType>::from_elem((3, cols), 1.5);
    data[[0, 0]] = MISSING;
    data[[2, cols - 1]] = MISSING;
    data[[1, 17]] = MISSING;

    let masked = build_masks(&mut data).expect("mask");
    assert_eq!(masked.missing_count(), 3);
    assert_eq!(masked.mask.len() - masked.missing_count(), 3 * cols - 3);
}

#[test]
fn oversized_buffers_report_allocation_failure() {
    let err = mpcc::alloc::zeroed("huge", usize::MAX, 2).unwrap_err();
    assert!(matches!(err, PccError::Allocation { what: "huge", rows: usize::MAX, cols: 2 }));
    assert_eq!(err.code(), 1);

    let err = mpcc::alloc::zeroed("huge", usize::MAX / 4, 1).unwrap_err();
    assert!(matches!(err, PccError::Allocation { cols: 1, .. }));

    let empty = mpcc::alloc::zeroed("empty", 0, 5).expect("empty matrix");
    assert_eq!(empty.dim(), (0, 5));
}
