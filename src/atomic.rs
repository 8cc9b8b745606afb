use crate::{
    ops,
    pade::{compute_pade, compute_pade_req, pade_degree, Precision},
    scalar::PowField,
    sqrt::sqrt_triangular_upper,
    unwind::{unwinder, unwinding_number},
    PowError,
};
use dyn_stack::{PodStack, SizeOverflow, StackReq};
use equator::assert;
use faer::{
    linalg::{
        matmul::triangular::{self, BlockStructure},
        temp_mat_req, temp_mat_uninit,
    },
    MatMut, MatRef, Parallelism,
};
use faer_entity::{ComplexField, Entity};
use reborrow::*;

/// Matrix power tuning parameters.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub struct PowParams {
    /// Maximum number of square roots taken before the computation is considered to have failed.
    pub max_square_roots: usize,
}

impl Default for PowParams {
    #[inline]
    fn default() -> Self {
        Self {
            max_square_roots: 64,
        }
    }
}

/// Info about the computation of a matrix power.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct PowInfo {
    /// Number of square roots taken before evaluating the Padé approximant.
    pub square_roots: usize,
    /// Degree of the Padé approximant, or `0` if the power was computed in closed form.
    pub pade_degree: usize,
}

/// Computes the size and alignment of the workspace required by [`pow_triangular`].
pub fn pow_triangular_req<E: Entity>(
    dim: usize,
    parallelism: Parallelism,
) -> Result<StackReq, SizeOverflow> {
    if dim <= 2 {
        return Ok(StackReq::empty());
    }
    let mat = temp_mat_req::<E>(dim, dim)?;
    StackReq::try_all_of([
        mat,
        mat,
        mat,
        StackReq::try_any_of([compute_pade_req::<E>(dim, parallelism)?, mat])?,
    ])
}

/// Overwrites the diagonal and first superdiagonal of `out` with those of $T^p$, using closed
/// form expressions that only depend on the corresponding entries of $T$.
fn pow_diag_superdiag<E: PowField>(out: MatMut<'_, E>, t: MatRef<'_, E>, p: E::Real) {
    let n = t.nrows();
    if n == 0 {
        return;
    }

    let mut out = out;
    let half = E::Real::faer_from_f64(0.5);
    let two = E::Real::faer_from_f64(2.0);

    let mut prev = t.read(0, 0);
    let mut log_prev = prev.ln();
    out.write(0, 0, prev.pow_real(p));

    for i in 1..n {
        let curr = t.read(i, i);
        let log_curr = curr.ln();
        let pow_prev = out.read(i - 1, i - 1);
        let pow_curr = curr.pow_real(p);
        out.write(i, i, pow_curr);

        let abs_prev = prev.faer_abs();
        let abs_curr = curr.faer_abs();

        let divided_difference = if prev.faer_real() == curr.faer_real()
            && prev.faer_imag() == curr.faer_imag()
        {
            curr.pow_real(p.faer_sub(E::Real::faer_one()))
                .faer_scale_real(p)
        } else if abs_prev.faer_mul(two) < abs_curr || abs_curr.faer_mul(two) < abs_prev {
            pow_curr
                .faer_sub(pow_prev)
                .faer_mul(curr.faer_sub(prev).faer_inv())
        } else {
            // eigenvalues are close, so the divided difference above would cancel
            let u = unwinding_number(log_curr, log_prev);
            let w = unwinder(curr, prev, u);
            log_curr
                .faer_add(log_prev)
                .faer_scale_real(p.faer_mul(half))
                .exp()
                .faer_scale_real(two)
                .faer_mul(w.faer_scale_real(p).sinh())
                .faer_mul(curr.faer_sub(prev).faer_inv())
        };
        out.write(i - 1, i, divided_difference.faer_mul(t.read(i - 1, i)));

        prev = curr;
        log_prev = log_curr;
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Step {
    /// Evaluate the Padé approximant of the given degree.
    Pade(usize),
    /// Take one more square root although the Padé approximant is already accurate enough.
    ExtraSquareRoot,
    SquareRoot,
}

/// Decides what the square root loop does once $\|I - T\|_1 = $ `norm`.
///
/// An extra square root is only taken if it lowers the Padé degree by more than one, and at most
/// once per computation.
fn next_step(norm: f64, precision: Precision, has_extra_square_root: bool) -> Step {
    if norm >= precision.max_norm_for_pade() {
        return Step::SquareRoot;
    }

    let degree = pade_degree(norm, precision);
    let half_degree = pade_degree(norm / 2.0, precision);
    if degree <= half_degree + 1 || has_extra_square_root {
        Step::Pade(degree)
    } else {
        Step::ExtraSquareRoot
    }
}

fn pow_triangular_big<E: PowField>(
    out: MatMut<'_, E>,
    triangular_upper: MatRef<'_, E>,
    p: E::Real,
    parallelism: Parallelism,
    stack: PodStack<'_>,
    params: PowParams,
) -> Result<PowInfo, PowError> {
    let n = triangular_upper.nrows();
    let mut out = out;

    let precision = Precision::of::<E>();

    let (mut t, stack) = temp_mat_uninit::<E>(n, n, stack);
    let (mut sqrt_t, stack) = temp_mat_uninit::<E>(n, n, stack);
    let (mut i_minus_t, mut stack) = temp_mat_uninit::<E>(n, n, stack);

    ops::copy_upper(t.rb_mut(), triangular_upper);

    let mut square_roots = 0usize;
    let mut has_extra_square_root = false;
    let degree = loop {
        ops::identity_minus_upper(i_minus_t.rb_mut(), t.rb());
        let norm = ops::norm_l1_upper(i_minus_t.rb());
        if !norm.faer_is_finite() {
            return Err(PowError::NumericalFailure { square_roots });
        }

        match next_step(E::real_to_f64(norm), precision, has_extra_square_root) {
            Step::Pade(degree) => break degree,
            Step::ExtraSquareRoot => has_extra_square_root = true,
            Step::SquareRoot => {}
        }

        if square_roots >= params.max_square_roots {
            return Err(PowError::NumericalFailure { square_roots });
        }
        sqrt_triangular_upper(sqrt_t.rb_mut(), t.rb());
        t.copy_from(sqrt_t.rb());
        square_roots += 1;
    };

    compute_pade(
        out.rb_mut(),
        degree,
        i_minus_t.rb(),
        p,
        parallelism,
        stack.rb_mut(),
    );

    // undo the square roots, fixing the diagonal and superdiagonal at each level since they are
    // known exactly
    let (mut tmp, _) = temp_mat_uninit::<E>(n, n, stack);
    for level in (1..=square_roots).rev() {
        let scale = E::Real::faer_from_f64(libm::ldexp(1.0, -(level as i32)));
        pow_diag_superdiag(out.rb_mut(), triangular_upper, p.faer_mul(scale));

        triangular::matmul(
            tmp.rb_mut(),
            BlockStructure::TriangularUpper,
            out.rb(),
            BlockStructure::TriangularUpper,
            out.rb(),
            BlockStructure::TriangularUpper,
            None,
            E::faer_one(),
            parallelism,
        );
        ops::copy_upper(out.rb_mut(), tmp.rb());
    }
    pow_diag_superdiag(out.rb_mut(), triangular_upper, p);

    Ok(PowInfo {
        square_roots,
        pade_degree: degree,
    })
}

/// Computes $T^p$ for the upper triangular matrix $T$ and the real exponent $p$, and stores the
/// result in `out`.
///
/// Matrices of dimension up to $2$ are handled in closed form. Larger matrices are brought close
/// to the identity by repeated square roots, after which a Padé approximant is evaluated and
/// squared back up.
///
/// Only the upper triangular part of `triangular_upper` is accessed. The strictly lower
/// triangular part of `out` is set to zero.
///
/// The diagonal entries of $T$ must be such that their principal powers are defined: for real
/// types, they must be nonnegative, otherwise the result is filled with `NaN`s.
///
/// # Errors
///
/// Returns [`PowError::NumericalFailure`] if $T$ could not be brought close enough to the
/// identity within [`PowParams::max_square_roots`] square roots, which happens when it is
/// singular.
///
/// # Panics
///
/// - Panics if `triangular_upper` is not square, or if `out` does not have the same dimensions.
/// - Panics if the provided memory in `stack` is insufficient (see [`pow_triangular_req`]).
#[track_caller]
pub fn pow_triangular<E: PowField>(
    out: MatMut<'_, E>,
    triangular_upper: MatRef<'_, E>,
    p: E::Real,
    parallelism: Parallelism,
    stack: PodStack<'_>,
    params: PowParams,
) -> Result<PowInfo, PowError> {
    let n = triangular_upper.nrows();
    assert!(all(
        triangular_upper.ncols() == n,
        out.nrows() == n,
        out.ncols() == n,
    ));

    #[cfg(feature = "perf-warn")]
    {
        if !ops::is_col_major(triangular_upper) && faer::__perf_warn!(POW_INPUT_WARN) {
            if triangular_upper.col_stride().unsigned_abs() == 1 {
                log::warn!(target: "faer_perf", "Matrix power prefers column-major input matrix. Found row-major matrix.");
            } else {
                log::warn!(target: "faer_perf", "Matrix power prefers column-major input matrix. Found matrix with generic strides.");
            }
        }
        if !ops::is_col_major(out.rb()) && faer::__perf_warn!(POW_OUTPUT_WARN) {
            if out.col_stride().unsigned_abs() == 1 {
                log::warn!(target: "faer_perf", "Matrix power prefers column-major output matrix. Found row-major matrix.");
            } else {
                log::warn!(target: "faer_perf", "Matrix power prefers column-major output matrix. Found matrix with generic strides.");
            }
        }
    }

    let mut out = out;
    match n {
        0 => {}
        1 => out.write(0, 0, triangular_upper.read(0, 0).pow_real(p)),
        2 => {
            pow_diag_superdiag(out.rb_mut(), triangular_upper, p);
            out.write(1, 0, E::faer_zero());
        }
        _ => {
            return pow_triangular_big(out, triangular_upper, p, parallelism, stack, params);
        }
    }

    Ok(PowInfo::default())
}

/// Evaluator of real powers of a borrowed upper triangular matrix.
///
/// Holds no state besides the borrowed matrix and the tuning parameters, so it can be reused for
/// any number of exponents.
#[derive(Copy, Clone, Debug)]
pub struct TriangularPowerAtomic<'a, E: Entity> {
    triangular_upper: MatRef<'a, E>,
    params: PowParams,
}

impl<'a, E: PowField> TriangularPowerAtomic<'a, E> {
    /// Creates an evaluator for the powers of `triangular_upper`.
    ///
    /// Only the upper triangular part of the matrix is accessed.
    ///
    /// # Panics
    ///
    /// Panics if `triangular_upper` is not square.
    #[track_caller]
    #[inline]
    pub fn new(triangular_upper: MatRef<'a, E>) -> Self {
        assert!(triangular_upper.nrows() == triangular_upper.ncols());
        Self {
            triangular_upper,
            params: PowParams::default(),
        }
    }

    /// Returns a copy of `self` that uses the given tuning parameters.
    #[inline]
    pub fn with_params(self, params: PowParams) -> Self {
        Self { params, ..self }
    }

    /// Returns the tuning parameters.
    #[inline]
    pub fn params(&self) -> PowParams {
        self.params
    }

    /// Returns the borrowed matrix.
    #[inline]
    pub fn matrix(&self) -> MatRef<'a, E> {
        self.triangular_upper
    }

    /// Computes $T^p$ and stores the result in `out`, returning info about the computation.
    ///
    /// See [`pow_triangular`].
    #[track_caller]
    #[inline]
    pub fn compute_with_info(
        &self,
        out: MatMut<'_, E>,
        p: E::Real,
        parallelism: Parallelism,
        stack: PodStack<'_>,
    ) -> Result<PowInfo, PowError> {
        pow_triangular(
            out,
            self.triangular_upper,
            p,
            parallelism,
            stack,
            self.params,
        )
    }
}
