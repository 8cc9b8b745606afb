use crate::{
    atomic::{pow_triangular, pow_triangular_req, PowParams, TriangularPowerAtomic},
    binary::{
        pow_triangular_int, pow_triangular_int_apply, pow_triangular_int_apply_req,
        pow_triangular_int_req,
    },
    lazy::PowExpr,
    ops,
    scalar::PowField,
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

/// Square matrix whose real powers can be computed, and applied to other matrices.
pub trait PowerComputable<E: PowField> {
    /// Returns the number of rows of the matrix.
    fn nrows(&self) -> usize;
    /// Returns the number of columns of the matrix.
    fn ncols(&self) -> usize;

    /// Computes the size and alignment of the workspace required by [`Self::compute`].
    fn compute_req(&self, parallelism: Parallelism) -> Result<StackReq, SizeOverflow>;

    /// Computes $A^p$ and stores the result in `out`.
    ///
    /// # Panics
    ///
    /// - Panics if `out` does not have the same dimensions as the matrix.
    /// - Panics if the provided memory in `stack` is insufficient (see [`Self::compute_req`]).
    fn compute(
        &self,
        out: MatMut<'_, E>,
        p: E::Real,
        parallelism: Parallelism,
        stack: PodStack<'_>,
    ) -> Result<(), PowError>;

    /// Computes the size and alignment of the workspace required by [`Self::compute_on`], for a
    /// right-hand side with `rhs_ncols` columns.
    fn compute_on_req(
        &self,
        rhs_ncols: usize,
        parallelism: Parallelism,
    ) -> Result<StackReq, SizeOverflow>;

    /// Computes $A^p B$, where $B$ is `rhs`, and stores the result in `out`.
    ///
    /// # Panics
    ///
    /// - Panics if `rhs.nrows() != self.ncols()`, or if `out` does not have the same dimensions
    ///   as `rhs`.
    /// - Panics if the provided memory in `stack` is insufficient (see [`Self::compute_on_req`]).
    fn compute_on(
        &self,
        out: MatMut<'_, E>,
        rhs: MatRef<'_, E>,
        p: E::Real,
        parallelism: Parallelism,
        stack: PodStack<'_>,
    ) -> Result<(), PowError>;

    /// Returns a deferred expression for $A^p$.
    #[inline]
    fn pow(&self, p: E::Real) -> PowExpr<'_, Self, E>
    where
        Self: Sized,
    {
        PowExpr::new(self, p)
    }
}

impl<E: PowField> PowerComputable<E> for TriangularPowerAtomic<'_, E> {
    #[inline]
    fn nrows(&self) -> usize {
        self.matrix().nrows()
    }

    #[inline]
    fn ncols(&self) -> usize {
        self.matrix().ncols()
    }

    fn compute_req(&self, parallelism: Parallelism) -> Result<StackReq, SizeOverflow> {
        pow_triangular_req::<E>(self.nrows(), parallelism)
    }

    #[track_caller]
    fn compute(
        &self,
        out: MatMut<'_, E>,
        p: E::Real,
        parallelism: Parallelism,
        stack: PodStack<'_>,
    ) -> Result<(), PowError> {
        self.compute_with_info(out, p, parallelism, stack)
            .map(|_| ())
    }

    fn compute_on_req(
        &self,
        rhs_ncols: usize,
        parallelism: Parallelism,
    ) -> Result<StackReq, SizeOverflow> {
        let _ = rhs_ncols;
        let n = self.nrows();
        StackReq::try_all_of([
            temp_mat_req::<E>(n, n)?,
            pow_triangular_req::<E>(n, parallelism)?,
        ])
    }

    #[track_caller]
    fn compute_on(
        &self,
        out: MatMut<'_, E>,
        rhs: MatRef<'_, E>,
        p: E::Real,
        parallelism: Parallelism,
        stack: PodStack<'_>,
    ) -> Result<(), PowError> {
        let n = self.nrows();
        assert!(all(
            rhs.nrows() == n,
            out.nrows() == n,
            out.ncols() == rhs.ncols(),
        ));

        let (mut pow, stack) = temp_mat_uninit::<E>(n, n, stack);
        self.compute_with_info(pow.rb_mut(), p, parallelism, stack)?;
        triangular::matmul(
            out,
            BlockStructure::Rectangular,
            pow.rb(),
            BlockStructure::TriangularUpper,
            rhs,
            BlockStructure::Rectangular,
            None,
            E::faer_one(),
            parallelism,
        );
        Ok(())
    }
}

/// Evaluator of real powers of a borrowed upper triangular matrix, that splits the exponent into
/// an integer part and a fractional part.
///
/// The integer part is computed by binary powering, which is exact up to rounding, and the
/// fractional part by [`TriangularPowerAtomic`].
#[derive(Copy, Clone, Debug)]
pub struct TriangularPower<'a, E: Entity> {
    triangular_upper: MatRef<'a, E>,
    params: PowParams,
}

impl<'a, E: PowField> TriangularPower<'a, E> {
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

    /// Returns a copy of `self` that uses the given tuning parameters for the fractional part.
    #[inline]
    pub fn with_params(self, params: PowParams) -> Self {
        Self { params, ..self }
    }

    /// Returns the borrowed matrix.
    #[inline]
    pub fn matrix(&self) -> MatRef<'a, E> {
        self.triangular_upper
    }

    /// Returns the ratio of the largest to the smallest diagonal entry in absolute value.
    fn condition_estimate(&self) -> f64 {
        let t = self.triangular_upper;
        let mut max = 0.0f64;
        let mut min = f64::INFINITY;
        for i in 0..t.nrows() {
            let abs = E::real_to_f64(t.read(i, i).faer_abs());
            max = max.max(abs);
            min = min.min(abs);
        }
        if t.nrows() == 0 {
            1.0
        } else {
            max / min
        }
    }

    /// Splits `p` into an integer part $k$ and a fractional part $x$ such that $p = k + x$.
    ///
    /// $x$ is usually in $[0, 1)$, but a fractional part above one half is replaced by $x - 1$
    /// when the ratio of the extreme diagonal entries of the matrix is small enough.
    pub fn split_exponent(&self, p: E::Real) -> (i64, E::Real) {
        let int = E::real_floor(p);
        let frac = p.faer_sub(int);
        let mut k = E::real_to_f64(int) as i64;

        let x = E::real_to_f64(frac);
        if x > 0.5 && x > (1.0 - x) * libm::pow(self.condition_estimate(), x) {
            k += 1;
            return (k, frac.faer_sub(E::Real::faer_one()));
        }
        (k, frac)
    }
}

impl<E: PowField> PowerComputable<E> for TriangularPower<'_, E> {
    #[inline]
    fn nrows(&self) -> usize {
        self.triangular_upper.nrows()
    }

    #[inline]
    fn ncols(&self) -> usize {
        self.triangular_upper.ncols()
    }

    fn compute_req(&self, parallelism: Parallelism) -> Result<StackReq, SizeOverflow> {
        let n = self.nrows();
        let mat = temp_mat_req::<E>(n, n)?;
        StackReq::try_all_of([
            mat,
            StackReq::try_any_of([
                pow_triangular_req::<E>(n, parallelism)?,
                StackReq::try_all_of([mat, pow_triangular_int_req::<E>(n, parallelism)?])?,
            ])?,
        ])
    }

    #[track_caller]
    fn compute(
        &self,
        out: MatMut<'_, E>,
        p: E::Real,
        parallelism: Parallelism,
        stack: PodStack<'_>,
    ) -> Result<(), PowError> {
        let n = self.nrows();
        assert!(all(out.nrows() == n, out.ncols() == n));

        let t = self.triangular_upper;
        let (k, x) = self.split_exponent(p);

        if x == E::Real::faer_zero() {
            pow_triangular_int(out, t, k, parallelism, stack);
            return Ok(());
        }
        if k == 0 {
            pow_triangular(out, t, x, parallelism, stack, self.params)?;
            return Ok(());
        }

        let mut out = out;
        let (mut frac, mut stack) = temp_mat_uninit::<E>(n, n, stack);
        pow_triangular(frac.rb_mut(), t, x, parallelism, stack.rb_mut(), self.params)?;

        let (mut int, stack) = temp_mat_uninit::<E>(n, n, stack);
        pow_triangular_int(int.rb_mut(), t, k, parallelism, stack);

        triangular::matmul(
            out.rb_mut(),
            BlockStructure::TriangularUpper,
            int.rb(),
            BlockStructure::TriangularUpper,
            frac.rb(),
            BlockStructure::TriangularUpper,
            None,
            E::faer_one(),
            parallelism,
        );
        ops::zero_strictly_lower(out);
        Ok(())
    }

    fn compute_on_req(
        &self,
        rhs_ncols: usize,
        parallelism: Parallelism,
    ) -> Result<StackReq, SizeOverflow> {
        let n = self.nrows();
        StackReq::try_any_of([
            pow_triangular_int_apply_req::<E>(n, rhs_ncols, parallelism)?,
            StackReq::try_all_of([
                temp_mat_req::<E>(n, n)?,
                StackReq::try_any_of([
                    pow_triangular_req::<E>(n, parallelism)?,
                    StackReq::try_all_of([
                        temp_mat_req::<E>(n, rhs_ncols)?,
                        pow_triangular_int_apply_req::<E>(n, rhs_ncols, parallelism)?,
                    ])?,
                ])?,
            ])?,
        ])
    }

    #[track_caller]
    fn compute_on(
        &self,
        out: MatMut<'_, E>,
        rhs: MatRef<'_, E>,
        p: E::Real,
        parallelism: Parallelism,
        stack: PodStack<'_>,
    ) -> Result<(), PowError> {
        let n = self.nrows();
        assert!(all(
            rhs.nrows() == n,
            out.nrows() == n,
            out.ncols() == rhs.ncols(),
        ));

        let t = self.triangular_upper;
        let (k, x) = self.split_exponent(p);

        if x == E::Real::faer_zero() {
            pow_triangular_int_apply(out, t, rhs, k, parallelism, stack);
            return Ok(());
        }

        // the fractional part is applied first, then the integer part
        let (mut frac, mut stack) = temp_mat_uninit::<E>(n, n, stack);
        pow_triangular(frac.rb_mut(), t, x, parallelism, stack.rb_mut(), self.params)?;

        let (mut frac_rhs, stack) = temp_mat_uninit::<E>(n, rhs.ncols(), stack);
        triangular::matmul(
            frac_rhs.rb_mut(),
            BlockStructure::Rectangular,
            frac.rb(),
            BlockStructure::TriangularUpper,
            rhs,
            BlockStructure::Rectangular,
            None,
            E::faer_one(),
            parallelism,
        );
        pow_triangular_int_apply(out, t, frac_rhs.rb(), k, parallelism, stack);
        Ok(())
    }
}
