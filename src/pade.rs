use crate::{ops, scalar::PowField};
use dyn_stack::{PodStack, SizeOverflow, StackReq};
use equator::assert;
use faer::{
    linalg::{temp_mat_req, temp_mat_uninit, triangular_solve},
    MatMut, MatRef, Parallelism,
};
use faer_entity::{ComplexField, Entity, RealField};
use reborrow::*;

/// Floating point precision class, used to select the Padé degree thresholds.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Precision {
    /// IEEE single precision, 24 bit mantissa.
    Single,
    /// IEEE double precision, 53 bit mantissa.
    Double,
    /// x87 extended precision, 64 bit mantissa.
    Extended,
    /// Double-double arithmetic, 106 bit mantissa.
    DoubleDouble,
    /// IEEE quadruple precision, 113 bit mantissa.
    Quadruple,
}

const MAX_NORM_SINGLE: &[f64] = &[
    2.8064004e-1, // degree 3
    4.3386528e-1,
];

const MAX_NORM_DOUBLE: &[f64] = &[
    1.884160592658218e-2, // degree 3
    6.038881904059573e-2,
    1.239917516308172e-1,
    1.999045567181744e-1,
    2.789358995219730e-1,
];

const MAX_NORM_EXTENDED: &[f64] = &[
    6.3854693117491799460e-3, // degree 3
    2.6394893435456973676e-2,
    6.4216043030404063729e-2,
    1.1701165502926694307e-1,
    1.7904284231268670284e-1,
    2.4471944416607995472e-1,
];

const MAX_NORM_DOUBLE_DOUBLE: &[f64] = &[
    1.0007161601787493236741409687186e-4, // degree 3
    1.0007161601787493236741409687186e-3,
    4.7069769360887572939882574746264e-3,
    1.3220386624169159689406653101695e-2,
    2.8063482381631737920612944054906e-2,
    4.9625993951953473052385361085058e-2,
    7.7367040706027886224557538328171e-2,
    1.1016843812851143391275867258512e-1,
];

const MAX_NORM_QUADRUPLE: &[f64] = &[
    5.524506147036624377378713555116378e-5, // degree 3
    6.640600568157479679823602193345995e-4,
    3.227716520106894279249709728084626e-3,
    9.619593944683432960546978734646284e-3,
    2.134595382433742403911124458161147e-2,
    3.908166513900489428442993794761185e-2,
    6.266780814639442865832535460550138e-2,
    9.134603732914548552537150753385375e-2,
];

impl Precision {
    /// Returns the precision class of a floating point type with the given number of mantissa
    /// digits.
    #[inline]
    pub fn from_mantissa_digits(digits: u32) -> Self {
        match digits {
            0..=24 => Precision::Single,
            25..=53 => Precision::Double,
            54..=64 => Precision::Extended,
            65..=106 => Precision::DoubleDouble,
            _ => Precision::Quadruple,
        }
    }

    /// Returns the precision class of `E`.
    #[inline]
    pub fn of<E: PowField>() -> Self {
        Self::from_mantissa_digits(E::MANTISSA_DIGITS)
    }

    /// Returns the norm thresholds, starting with degree `3`.
    #[inline]
    pub fn max_norms(self) -> &'static [f64] {
        match self {
            Precision::Single => MAX_NORM_SINGLE,
            Precision::Double => MAX_NORM_DOUBLE,
            Precision::Extended => MAX_NORM_EXTENDED,
            Precision::DoubleDouble => MAX_NORM_DOUBLE_DOUBLE,
            Precision::Quadruple => MAX_NORM_QUADRUPLE,
        }
    }

    /// Returns the largest tabulated Padé degree.
    #[inline]
    pub fn max_pade_degree(self) -> usize {
        self.max_norms().len() + 2
    }

    /// Returns the largest value of $\|I - T\|_1$ for which a Padé approximant is accurate to
    /// working precision.
    #[inline]
    pub fn max_norm_for_pade(self) -> f64 {
        let norms = self.max_norms();
        norms[norms.len() - 1]
    }
}

/// Returns the smallest Padé degree for which the approximant of $(I - X)^p$ is accurate to the
/// given precision, where `norm` is $\|X\|_1$.
///
/// If `norm` exceeds every tabulated threshold, returns [`Precision::max_pade_degree`] plus one.
/// The result is non-decreasing with respect to `norm`.
#[inline]
pub fn pade_degree(norm: f64, precision: Precision) -> usize {
    let max_norms = precision.max_norms();
    let mut degree = 3;
    while degree <= precision.max_pade_degree() {
        if norm <= max_norms[degree - 3] {
            break;
        }
        degree += 1;
    }
    degree
}

/// Computes the size and alignment of the workspace required by [`compute_pade`].
pub fn compute_pade_req<E: Entity>(
    dim: usize,
    parallelism: Parallelism,
) -> Result<StackReq, SizeOverflow> {
    let _ = parallelism;
    temp_mat_req::<E>(dim, dim)
}

#[inline(always)]
fn real<E: ComplexField>(value: usize) -> E::Real {
    E::Real::faer_from_f64(value as f64)
}

/// Evaluates the Padé approximant of degree `degree` of $(I - X)^p$, where $X$ is the upper
/// triangular matrix `i_minus_t`, and stores the result in `out`.
///
/// The approximant is the continued fraction expansion of $(I - X)^p$ truncated after
/// `2 * degree` terms, evaluated bottom-up with one triangular solve per term.
///
/// Only the upper triangular part of `i_minus_t` is accessed. The strictly lower triangular part
/// of `out` is set to zero.
///
/// # Panics
///
/// - Panics if `i_minus_t` is not square, or if `out` does not have the same dimensions.
/// - Panics if `degree` is zero.
/// - Panics if the provided memory in `stack` is insufficient (see [`compute_pade_req`]).
#[track_caller]
pub fn compute_pade<E: PowField>(
    out: MatMut<'_, E>,
    degree: usize,
    i_minus_t: MatRef<'_, E>,
    p: E::Real,
    parallelism: Parallelism,
    stack: PodStack<'_>,
) {
    let n = i_minus_t.nrows();
    assert!(all(
        degree > 0,
        i_minus_t.ncols() == n,
        out.nrows() == n,
        out.ncols() == n,
    ));

    let mut out = out;
    let (mut denom, _) = temp_mat_uninit::<E>(n, n, stack);

    let mut i = 2 * degree;
    ops::scale_upper(
        out.rb_mut(),
        i_minus_t,
        p.faer_sub(real::<E>(degree)).faer_div(real::<E>(2 * i - 2)),
    );

    i -= 1;
    while i > 0 {
        // denom = I + R
        ops::copy_upper(denom.rb_mut(), out.rb());
        for j in 0..n {
            denom.write(j, j, denom.read(j, j).faer_add(E::faer_one()));
        }

        let coeff = if i == 1 {
            p.faer_neg()
        } else if i % 2 == 1 {
            p.faer_neg()
                .faer_sub(real::<E>(i / 2))
                .faer_div(real::<E>(2 * i))
        } else {
            p.faer_sub(real::<E>(i / 2)).faer_div(real::<E>(2 * i - 2))
        };

        // R = (I + R)^-1 (coeff X)
        ops::scale_upper(out.rb_mut(), i_minus_t, coeff);
        triangular_solve::solve_upper_triangular_in_place(denom.rb(), out.rb_mut(), parallelism);

        i -= 1;
    }

    for j in 0..n {
        out.write(j, j, out.read(j, j).faer_add(E::faer_one()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;
    use dyn_stack::GlobalPodBuffer;
    use equator::assert;
    use faer::{complex_native::c64, mat, Mat};

    #[test]
    fn test_precision_classes() {
        assert_eq!(Precision::of::<f32>(), Precision::Single);
        assert_eq!(Precision::of::<f64>(), Precision::Double);
        assert_eq!(Precision::of::<c64>(), Precision::Double);
        assert_eq!(Precision::from_mantissa_digits(64), Precision::Extended);
        assert_eq!(Precision::from_mantissa_digits(106), Precision::DoubleDouble);
        assert_eq!(Precision::from_mantissa_digits(113), Precision::Quadruple);

        assert_eq!(Precision::Single.max_pade_degree(), 4);
        assert_eq!(Precision::Double.max_pade_degree(), 7);
        assert_eq!(Precision::Extended.max_pade_degree(), 8);
        assert_eq!(Precision::DoubleDouble.max_pade_degree(), 10);
        assert_eq!(Precision::Quadruple.max_pade_degree(), 10);

        assert_eq!(Precision::Double.max_norm_for_pade(), 2.789358995219730e-1);
        assert_eq!(Precision::Single.max_norm_for_pade(), 4.3386528e-1);
    }

    #[test]
    fn test_pade_degree_lookup() {
        assert_eq!(pade_degree(0.0, Precision::Double), 3);
        assert_eq!(pade_degree(1.884160592658218e-2, Precision::Double), 3);
        assert_eq!(pade_degree(1.9e-2, Precision::Double), 4);
        assert_eq!(pade_degree(0.15, Precision::Double), 6);
        assert_eq!(pade_degree(0.27, Precision::Double), 7);
        assert_eq!(pade_degree(0.3, Precision::Double), 8);
        assert_eq!(pade_degree(0.3, Precision::Single), 4);
        assert_eq!(pade_degree(0.5, Precision::Single), 5);
    }

    #[test]
    fn test_pade_degree_monotonic() {
        for precision in [
            Precision::Single,
            Precision::Double,
            Precision::Extended,
            Precision::DoubleDouble,
            Precision::Quadruple,
        ] {
            let mut prev = pade_degree(0.0, precision);
            for k in 1..=1000 {
                let norm = k as f64 * 5e-4;
                let degree = pade_degree(norm, precision);
                assert!(degree >= prev);
                assert!(degree <= precision.max_pade_degree() + 1);
                prev = degree;
            }
        }
    }

    #[test]
    fn test_pade_diagonal() {
        // for a diagonal X, the approximant acts on each entry independently
        let p = 0.3;
        let x = mat![[0.05, 0.0, 0.0], [0.0, -0.1, 0.0], [0.0, 0.0, 0.2]];
        let degree = pade_degree(0.2, Precision::Double);

        let mut out = Mat::<f64>::zeros(3, 3);
        compute_pade(
            out.as_mut(),
            degree,
            x.as_ref(),
            p,
            Parallelism::None,
            PodStack::new(&mut GlobalPodBuffer::new(
                compute_pade_req::<f64>(3, Parallelism::None).unwrap(),
            )),
        );

        for i in 0..3 {
            let target = f64::powf(1.0 - x.read(i, i), p);
            assert_approx_eq!(out.read(i, i), target, 1e-13);
        }
        assert_eq!(out.read(0, 1), 0.0);
        assert_eq!(out.read(2, 0), 0.0);
    }

    #[test]
    fn test_pade_upper_triangular() {
        // (I - X)^2 is matched exactly by every degree
        let x = mat![[0.1, 0.05, -0.02], [0.0, -0.05, 0.03], [0.0, 0.0, 0.08]];
        let mut i_minus_x = Mat::<f64>::zeros(3, 3);
        ops::identity_minus_upper(i_minus_x.as_mut(), x.as_ref());
        let target = &i_minus_x * &i_minus_x;

        let mut out = Mat::<f64>::zeros(3, 3);
        compute_pade(
            out.as_mut(),
            3,
            x.as_ref(),
            2.0,
            Parallelism::None,
            PodStack::new(&mut GlobalPodBuffer::new(
                compute_pade_req::<f64>(3, Parallelism::None).unwrap(),
            )),
        );

        for j in 0..3 {
            for i in 0..3 {
                assert_approx_eq!(out.read(i, j), target.read(i, j), 1e-14);
            }
        }
    }
}
