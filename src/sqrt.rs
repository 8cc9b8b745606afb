use equator::assert;
use faer::{MatMut, MatRef};
use faer_entity::ComplexField;

/// Computes the principal square root $S$ of the upper triangular matrix $T$, such that $S$ is
/// upper triangular and
/// $$SS = T,$$
/// and stores the result in `out`.
///
/// The diagonal of $S$ holds the principal square roots of the diagonal entries of $T$, and the
/// remaining entries are computed one column at a time, from the diagonal upwards.
///
/// Only the upper triangular part of `triangular_upper` is accessed. The strictly lower
/// triangular part of `out` is set to zero.
///
/// For real types, the diagonal of $T$ must be nonnegative, otherwise the result is filled with
/// `NaN`s. If two diagonal entries of $T$ are zero, the result may not be finite.
///
/// # Panics
///
/// Panics if `triangular_upper` is not square, or if `out` does not have the same dimensions.
#[track_caller]
pub fn sqrt_triangular_upper<E: ComplexField>(out: MatMut<'_, E>, triangular_upper: MatRef<'_, E>) {
    let n = triangular_upper.nrows();
    assert!(all(
        triangular_upper.ncols() == n,
        out.nrows() == n,
        out.ncols() == n,
    ));

    let mut out = out;
    let t = triangular_upper;

    for j in 0..n {
        out.write(j, j, t.read(j, j).faer_sqrt());
        for i in j + 1..n {
            out.write(i, j, E::faer_zero());
        }
    }

    //     S00 s01
    // S =     s11
    //
    // S00 s01 + s01 s11 = t01
    // (S00 + s11 I) s01 = t01 - ...
    //
    // solved entry by entry, from the bottom up
    for j in 1..n {
        let sjj = out.read(j, j);
        for i in (0..j).rev() {
            let mut acc = E::faer_zero();
            for k in i + 1..j {
                acc = acc.faer_add(out.read(i, k).faer_mul(out.read(k, j)));
            }
            let denom = out.read(i, i).faer_add(sjj);
            out.write(i, j, t.read(i, j).faer_sub(acc).faer_mul(denom.faer_inv()));
        }
    }
}
