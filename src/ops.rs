use faer::{MatMut, MatRef};
use faer_entity::ComplexField;
use reborrow::*;

/// Returns the maximum absolute column sum of the upper triangular part of `matrix`.
pub(crate) fn norm_l1_upper<E: ComplexField>(matrix: MatRef<'_, E>) -> E::Real {
    let mut norm = E::Real::faer_zero();
    for j in 0..matrix.ncols() {
        let mut sum = E::Real::faer_zero();
        for i in 0..Ord::min(j + 1, matrix.nrows()) {
            sum = sum.faer_add(matrix.read(i, j).faer_abs());
        }
        // written this way so that a nan column propagates
        if !(sum <= norm) {
            norm = sum;
        }
    }
    norm
}

/// Stores $I - \mathrm{triu}(T)$ in `dst`.
pub(crate) fn identity_minus_upper<E: ComplexField>(dst: MatMut<'_, E>, triangular_upper: MatRef<'_, E>) {
    let mut dst = dst;
    let n = triangular_upper.nrows();
    for j in 0..n {
        for i in 0..j {
            dst.write(i, j, triangular_upper.read(i, j).faer_neg());
        }
        dst.write(j, j, E::faer_one().faer_sub(triangular_upper.read(j, j)));
        for i in j + 1..n {
            dst.write(i, j, E::faer_zero());
        }
    }
}

/// Stores $\alpha\,\mathrm{triu}(\mathrm{src})$ in `dst`.
pub(crate) fn scale_upper<E: ComplexField>(dst: MatMut<'_, E>, src: MatRef<'_, E>, alpha: E::Real) {
    let mut dst = dst;
    let n = src.nrows();
    for j in 0..n {
        for i in 0..j + 1 {
            dst.write(i, j, src.read(i, j).faer_scale_real(alpha));
        }
        for i in j + 1..n {
            dst.write(i, j, E::faer_zero());
        }
    }
}

/// Copies the upper triangular part of `src` to `dst`, and zeros the strictly lower part.
pub(crate) fn copy_upper<E: ComplexField>(dst: MatMut<'_, E>, src: MatRef<'_, E>) {
    let mut dst = dst;
    let n = src.nrows();
    for j in 0..n {
        for i in 0..j + 1 {
            dst.write(i, j, src.read(i, j));
        }
        for i in j + 1..n {
            dst.write(i, j, E::faer_zero());
        }
    }
}

/// Stores the identity matrix in `dst`.
pub(crate) fn set_identity<E: ComplexField>(dst: MatMut<'_, E>) {
    let mut dst = dst;
    dst.fill_zero();
    for j in 0..Ord::min(dst.nrows(), dst.ncols()) {
        dst.write(j, j, E::faer_one());
    }
}

/// Zeros the strictly lower triangular part of `dst`.
pub(crate) fn zero_strictly_lower<E: ComplexField>(dst: MatMut<'_, E>) {
    let mut dst = dst;
    for j in 0..dst.ncols() {
        for i in j + 1..dst.nrows() {
            dst.rb_mut().write(i, j, E::faer_zero());
        }
    }
}

#[cfg(feature = "perf-warn")]
pub(crate) fn is_col_major<E: ComplexField>(matrix: MatRef<'_, E>) -> bool {
    matrix.row_stride().unsigned_abs() == 1 || matrix.nrows() <= 1
}
