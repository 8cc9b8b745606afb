use crate::ops;
use dyn_stack::{PodStack, SizeOverflow, StackReq};
use equator::assert;
use faer::{
    linalg::{
        matmul::triangular::{self, BlockStructure},
        temp_mat_req, temp_mat_uninit, triangular_solve,
    },
    MatMut, MatRef, Parallelism,
};
use faer_entity::{ComplexField, Entity};
use reborrow::*;

/// Cost of computing $A^p$ by binary powering, for a nonnegative integer $p$.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct BinaryPoweringCost {
    /// Number of times a power of the base is multiplied into the result.
    pub applyings: usize,
    /// Number of squarings of the base, $\lfloor \log_2 p \rfloor$.
    ///
    /// This is `-1` when `p` is zero, and negative when `p < 1`.
    pub squarings: i32,
}

/// Decomposes the exponent `p` into the number of squarings and the number of applyings needed
/// by binary powering.
///
/// `p` is decomposed through its binary floating point representation. The number of applyings is
/// the number of binary digits of the integer part of `p` that are set.
///
/// # Panics
///
/// Panics if `p` is negative or not finite.
#[track_caller]
pub fn binary_powering_cost(p: f64) -> BinaryPoweringCost {
    assert!(all(p >= 0.0, p.is_finite()));

    let (_, exp) = libm::frexp(p);
    let squarings = exp - 1;

    let mut p = p;
    let mut applyings = 0;
    loop {
        let (_, exp) = libm::frexp(p);
        if exp <= 0 {
            break;
        }
        p -= libm::ldexp(0.5, exp);
        applyings += 1;
    }

    BinaryPoweringCost {
        applyings,
        squarings,
    }
}

/// Computes the size and alignment of the workspace required by [`pow_triangular_int`].
pub fn pow_triangular_int_req<E: Entity>(
    dim: usize,
    parallelism: Parallelism,
) -> Result<StackReq, SizeOverflow> {
    let _ = parallelism;
    StackReq::try_all_of([temp_mat_req::<E>(dim, dim)?; 2])
}

/// Multiplies `acc` on the left by the upper triangular matrix `lhs`, using `tmp` as scratch
/// space.
fn mul_upper_in_place<E: ComplexField>(
    acc: MatMut<'_, E>,
    acc_structure: BlockStructure,
    lhs: MatRef<'_, E>,
    tmp: MatMut<'_, E>,
    parallelism: Parallelism,
) {
    let mut acc = acc;
    let mut tmp = tmp;
    triangular::matmul(
        tmp.rb_mut(),
        acc_structure,
        lhs,
        BlockStructure::TriangularUpper,
        acc.rb(),
        acc_structure,
        None,
        E::faer_one(),
        parallelism,
    );
    if acc_structure == BlockStructure::TriangularUpper {
        ops::copy_upper(acc, tmp.rb());
    } else {
        acc.copy_from(tmp.rb());
    }
}

/// Computes $T^k$ for the upper triangular matrix $T$ and the integer $k$ by binary powering, and
/// stores the result in `out`.
///
/// Negative exponents invert $T$ first, through a triangular solve. $T^0$ is the identity.
///
/// Only the upper triangular part of `triangular_upper` is accessed. The strictly lower
/// triangular part of `out` is set to zero.
///
/// # Panics
///
/// - Panics if `triangular_upper` is not square, or if `out` does not have the same dimensions.
/// - Panics if the provided memory in `stack` is insufficient (see [`pow_triangular_int_req`]).
#[track_caller]
pub fn pow_triangular_int<E: ComplexField>(
    out: MatMut<'_, E>,
    triangular_upper: MatRef<'_, E>,
    k: i64,
    parallelism: Parallelism,
    stack: PodStack<'_>,
) {
    let n = triangular_upper.nrows();
    assert!(all(
        triangular_upper.ncols() == n,
        out.nrows() == n,
        out.ncols() == n,
    ));

    let mut out = out;
    let (mut base, stack) = temp_mat_uninit::<E>(n, n, stack);
    let (mut tmp, _) = temp_mat_uninit::<E>(n, n, stack);

    if k < 0 {
        ops::set_identity(base.rb_mut());
        triangular_solve::solve_upper_triangular_in_place(
            triangular_upper,
            base.rb_mut(),
            parallelism,
        );
        ops::zero_strictly_lower(base.rb_mut());
    } else {
        ops::copy_upper(base.rb_mut(), triangular_upper);
    }

    ops::set_identity(out.rb_mut());
    let mut k = k.unsigned_abs();
    while k > 0 {
        if k % 2 == 1 {
            mul_upper_in_place(
                out.rb_mut(),
                BlockStructure::TriangularUpper,
                base.rb(),
                tmp.rb_mut(),
                parallelism,
            );
        }
        k /= 2;
        if k > 0 {
            triangular::matmul(
                tmp.rb_mut(),
                BlockStructure::TriangularUpper,
                base.rb(),
                BlockStructure::TriangularUpper,
                base.rb(),
                BlockStructure::TriangularUpper,
                None,
                E::faer_one(),
                parallelism,
            );
            ops::copy_upper(base.rb_mut(), tmp.rb());
        }
    }
}

/// Computes $T^k B$ for the upper triangular matrix $T$, the integer $k$ and the matrix $B$, and
/// stores the result in `out`.
///
/// When `rhs` has fewer columns than $T$, the powers of $T$ are only formed while squaring is
/// cheaper than applying $T$ to `rhs` directly, as estimated by [`binary_powering_cost`].
/// Otherwise $T^k$ is formed explicitly.
///
/// # Panics
///
/// - Panics if `triangular_upper` is not square, if `rhs.nrows() != triangular_upper.ncols()`,
///   or if `out` does not have the same dimensions as `rhs`.
/// - Panics if the provided memory in `stack` is insufficient (see
///   [`pow_triangular_int_apply_req`]).
#[track_caller]
pub fn pow_triangular_int_apply<E: ComplexField>(
    out: MatMut<'_, E>,
    triangular_upper: MatRef<'_, E>,
    rhs: MatRef<'_, E>,
    k: i64,
    parallelism: Parallelism,
    stack: PodStack<'_>,
) {
    let n = triangular_upper.nrows();
    assert!(all(
        triangular_upper.ncols() == n,
        rhs.nrows() == n,
        out.nrows() == n,
        out.ncols() == rhs.ncols(),
    ));

    let mut out = out;
    let m = rhs.ncols();

    if m >= n {
        let (mut pow, stack) = temp_mat_uninit::<E>(n, n, stack);
        pow_triangular_int(pow.rb_mut(), triangular_upper, k, parallelism, stack);
        triangular::matmul(
            out.rb_mut(),
            BlockStructure::Rectangular,
            pow.rb(),
            BlockStructure::TriangularUpper,
            rhs,
            BlockStructure::Rectangular,
            None,
            E::faer_one(),
            parallelism,
        );
        return;
    }

    let (mut base, stack) = temp_mat_uninit::<E>(n, n, stack);
    let (mut square, stack) = temp_mat_uninit::<E>(n, n, stack);
    let (mut tmp, _) = temp_mat_uninit::<E>(n, m, stack);

    if k < 0 {
        ops::set_identity(base.rb_mut());
        triangular_solve::solve_upper_triangular_in_place(
            triangular_upper,
            base.rb_mut(),
            parallelism,
        );
        ops::zero_strictly_lower(base.rb_mut());
    } else {
        ops::copy_upper(base.rb_mut(), triangular_upper);
    }

    out.copy_from(rhs);
    let mut k = k.unsigned_abs();

    // squaring the base costs n^3/3 flops, while applying it costs n^2 m / 2.
    // keep squaring as long as the remaining applications outweigh the squarings.
    loop {
        let cost = binary_powering_cost(k as f64);
        let remaining = k as f64 - cost.applyings as f64;
        if cost.squarings <= 0 || (m as f64) * remaining <= (n as f64) * cost.squarings as f64 {
            break;
        }
        if k % 2 == 1 {
            mul_upper_in_place(
                out.rb_mut(),
                BlockStructure::Rectangular,
                base.rb(),
                tmp.rb_mut(),
                parallelism,
            );
        }
        k /= 2;
        triangular::matmul(
            square.rb_mut(),
            BlockStructure::TriangularUpper,
            base.rb(),
            BlockStructure::TriangularUpper,
            base.rb(),
            BlockStructure::TriangularUpper,
            None,
            E::faer_one(),
            parallelism,
        );
        ops::copy_upper(base.rb_mut(), square.rb());
    }

    for _ in 0..k {
        mul_upper_in_place(
            out.rb_mut(),
            BlockStructure::Rectangular,
            base.rb(),
            tmp.rb_mut(),
            parallelism,
        );
    }
}

/// Computes the size and alignment of the workspace required by [`pow_triangular_int_apply`].
pub fn pow_triangular_int_apply_req<E: Entity>(
    dim: usize,
    rhs_ncols: usize,
    parallelism: Parallelism,
) -> Result<StackReq, SizeOverflow> {
    if rhs_ncols >= dim {
        StackReq::try_all_of([
            temp_mat_req::<E>(dim, dim)?,
            pow_triangular_int_req::<E>(dim, parallelism)?,
        ])
    } else {
        StackReq::try_all_of([
            temp_mat_req::<E>(dim, dim)?,
            temp_mat_req::<E>(dim, dim)?,
            temp_mat_req::<E>(dim, rhs_ncols)?,
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;
    use dyn_stack::GlobalPodBuffer;
    use equator::assert;
    use faer::Mat;

    fn random_upper(n: usize) -> Mat<f64> {
        Mat::from_fn(n, n, |i, j| {
            if i == j {
                0.5 + rand::random::<f64>()
            } else if i < j {
                (rand::random::<f64>() - 0.5) / n as f64
            } else {
                0.0
            }
        })
    }

    fn naive_pow(t: &Mat<f64>, k: usize) -> Mat<f64> {
        let n = t.nrows();
        let mut acc = Mat::<f64>::identity(n, n);
        for _ in 0..k {
            acc = &acc * t;
        }
        acc
    }

    #[test]
    fn test_binary_powering_cost() {
        assert_eq!(
            binary_powering_cost(0.0),
            BinaryPoweringCost {
                applyings: 0,
                squarings: -1
            },
        );
        assert_eq!(
            binary_powering_cost(1.0),
            BinaryPoweringCost {
                applyings: 1,
                squarings: 0
            },
        );
        assert_eq!(
            binary_powering_cost(13.0),
            BinaryPoweringCost {
                applyings: 3,
                squarings: 3
            },
        );
        assert_eq!(
            binary_powering_cost(16.0),
            BinaryPoweringCost {
                applyings: 1,
                squarings: 4
            },
        );
        // the fractional part is never applied
        assert_eq!(
            binary_powering_cost(5.75),
            BinaryPoweringCost {
                applyings: 2,
                squarings: 2
            },
        );
        assert_eq!(binary_powering_cost(0.25).squarings, -2);
    }

    #[test]
    fn test_pow_int() {
        for n in [0, 1, 2, 5, 12] {
            let t = random_upper(n);
            for k in [0i64, 1, 2, 3, 7, 10] {
                let mut out = Mat::<f64>::zeros(n, n);
                pow_triangular_int(
                    out.as_mut(),
                    t.as_ref(),
                    k,
                    Parallelism::None,
                    PodStack::new(&mut GlobalPodBuffer::new(
                        pow_triangular_int_req::<f64>(n, Parallelism::None).unwrap(),
                    )),
                );
                let target = naive_pow(&t, k as usize);
                for j in 0..n {
                    for i in 0..n {
                        assert_approx_eq!(out.read(i, j), target.read(i, j), 1e-12);
                    }
                }
            }
        }
    }

    #[test]
    fn test_pow_int_negative() {
        let n = 6;
        let t = random_upper(n);
        let mut inv3 = Mat::<f64>::zeros(n, n);
        pow_triangular_int(
            inv3.as_mut(),
            t.as_ref(),
            -3,
            Parallelism::None,
            PodStack::new(&mut GlobalPodBuffer::new(
                pow_triangular_int_req::<f64>(n, Parallelism::None).unwrap(),
            )),
        );

        let prod = &inv3 * &naive_pow(&t, 3);
        for j in 0..n {
            for i in 0..n {
                let target = if i == j { 1.0 } else { 0.0 };
                assert_approx_eq!(prod.read(i, j), target, 1e-10);
            }
        }
    }

    #[test]
    fn test_pow_int_apply() {
        let n = 9;
        let t = random_upper(n);
        for m in [1, 3, 9, 12] {
            let rhs = Mat::<f64>::from_fn(n, m, |_, _| rand::random::<f64>());
            for k in [0i64, 1, 6, 21, -4] {
                let mut out = Mat::<f64>::zeros(n, m);
                pow_triangular_int_apply(
                    out.as_mut(),
                    t.as_ref(),
                    rhs.as_ref(),
                    k,
                    Parallelism::None,
                    PodStack::new(&mut GlobalPodBuffer::new(
                        pow_triangular_int_apply_req::<f64>(n, m, Parallelism::None).unwrap(),
                    )),
                );

                let mut pow = Mat::<f64>::zeros(n, n);
                pow_triangular_int(
                    pow.as_mut(),
                    t.as_ref(),
                    k,
                    Parallelism::None,
                    PodStack::new(&mut GlobalPodBuffer::new(
                        pow_triangular_int_req::<f64>(n, Parallelism::None).unwrap(),
                    )),
                );
                let target = &pow * &rhs;

                for j in 0..m {
                    for i in 0..n {
                        assert_approx_eq!(out.read(i, j), target.read(i, j), 1e-9);
                    }
                }
            }
        }
    }
}
